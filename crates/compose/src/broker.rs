//! External requirement broker.
//!
//! Every invocation declares the credentials secret it needs. The orchestrator
//! resolves it between calls and hands it back on a later invocation; only
//! then are the resources that depend on it rendered. Nothing is carried over
//! from one call to the next.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Resource as _;
use modelrepo_core::kinds::{ActionsSecret, ActionsSecretParameters, ActionsSecretSpec, SecretKeySelector};
use modelrepo_core::wire::{ResourceSelector, RunFunctionRequest};
use modelrepo_core::CredentialsRef;
use tracing::{debug, warn};

use crate::context::InvocationContext;
use crate::keys;
use crate::rules::SecretMirrorRule;

/// Requirement name the credentials secret is declared under.
pub const SECRET_REQUIREMENT: &str = "secret";

/// One resolved secret, reduced to what mirrors reference. Values are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub name: String,
    pub namespace: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not supplied yet; expect to be invoked again.
    Pending,
    /// Supplied, but the orchestrator found no matching object.
    NotFound,
    Resolved(Vec<ResolvedSecret>),
}

pub fn credentials_selector(credentials: Option<&CredentialsRef>) -> ResourceSelector {
    let non_empty = |s: &String| if s.is_empty() { None } else { Some(s.clone()) };
    ResourceSelector {
        api_version: Secret::API_VERSION.to_string(),
        kind: Secret::KIND.to_string(),
        match_name: credentials.and_then(|c| non_empty(&c.secret_name)),
        namespace: credentials.and_then(|c| non_empty(&c.secret_namespace)),
    }
}

/// Look up what the orchestrator resolved for [`SECRET_REQUIREMENT`].
/// Items that are not decodable secrets are skipped; a note is returned for each.
pub fn resolve(ctx: &InvocationContext, req: &RunFunctionRequest, credentials: Option<&CredentialsRef>) -> (Resolution, Vec<String>) {
    let items = match req.required_resource(SECRET_REQUIREMENT) {
        None => return (Resolution::Pending, Vec::new()),
        Some([]) => return (Resolution::NotFound, Vec::new()),
        Some(items) => items,
    };
    let mut notes = Vec::new();
    let mut secrets = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value::<Secret>(item.resource.clone()) {
            Ok(secret) => match reduce(secret, credentials) {
                Some(resolved) => secrets.push(resolved),
                None => {
                    warn!(xr = %ctx, item = i, "skipping required secret without name or namespace");
                    notes.push(format!(
                        "skipped required resource {SECRET_REQUIREMENT:?} item {i}: no secret name and namespace to reference"
                    ));
                }
            },
            Err(e) => {
                warn!(xr = %ctx, item = i, error = %e, "skipping undecodable required resource");
                notes.push(format!("skipped required resource {SECRET_REQUIREMENT:?} item {i}: {e}"));
            }
        }
    }
    debug!(xr = %ctx, count = secrets.len(), "required secrets resolved");
    (Resolution::Resolved(secrets), notes)
}

/// `None` when neither the secret nor the credentials reference names it;
/// a mirror cannot point at an unnamed secret.
fn reduce(secret: Secret, credentials: Option<&CredentialsRef>) -> Option<ResolvedSecret> {
    let Secret { metadata, data, .. } = secret;
    let ObjectMeta { name, namespace, .. } = metadata;
    let named = |s: Option<String>| s.filter(|s| !s.is_empty());
    let name = named(name).or_else(|| named(credentials.map(|c| c.secret_name.clone())))?;
    let namespace = named(namespace).or_else(|| named(credentials.map(|c| c.secret_namespace.clone())))?;
    Some(ResolvedSecret { name, namespace, keys: data.map(|d| d.into_keys().collect()).unwrap_or_default() })
}

/// One mirror per secret entry, keyed by repository name and entry key.
pub fn secret_mirrors(repo_name: &str, secrets: &[ResolvedSecret], rule: &SecretMirrorRule) -> Vec<(String, ActionsSecret)> {
    secrets
        .iter()
        .flat_map(|s| s.keys.iter().map(move |k| (s, k)))
        .map(|(secret, entry)| {
            let mirror = ActionsSecret {
                metadata: ObjectMeta::default(),
                spec: ActionsSecretSpec {
                    management_policies: rule.management_policies.clone(),
                    for_provider: ActionsSecretParameters {
                        plaintext_value_secret_ref: SecretKeySelector {
                            key: entry.clone(),
                            name: secret.name.clone(),
                            namespace: secret.namespace.clone(),
                        },
                        repository: repo_name.to_string(),
                        secret_name: entry.clone(),
                    },
                },
            };
            (keys::secret_mirror(repo_name, entry), mirror)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn creds() -> CredentialsRef {
        CredentialsRef { secret_name: "github".into(), secret_namespace: "crossplane-system".into() }
    }

    fn request(required: serde_json::Value) -> RunFunctionRequest {
        serde_json::from_value(json!({ "requiredResources": required })).unwrap()
    }

    fn secret(name: &str, ns: &str, data: serde_json::Value) -> serde_json::Value {
        json!({ "apiVersion": "v1", "kind": "Secret", "metadata": { "name": name, "namespace": ns }, "data": data })
    }

    #[test]
    fn selector_uses_credentials_reference() {
        let sel = credentials_selector(Some(&creds()));
        assert_eq!(sel.api_version, "v1");
        assert_eq!(sel.kind, "Secret");
        assert_eq!(sel.match_name.as_deref(), Some("github"));
        assert_eq!(sel.namespace.as_deref(), Some("crossplane-system"));

        let bare = credentials_selector(None);
        assert_eq!(bare.kind, "Secret");
        assert!(bare.match_name.is_none() && bare.namespace.is_none());
        assert_eq!(serde_json::to_value(&bare).unwrap(), json!({ "apiVersion": "v1", "kind": "Secret" }));
    }

    #[test]
    fn absent_requirement_is_pending() {
        let ctx = InvocationContext::default();
        let (res, notes) = resolve(&ctx, &RunFunctionRequest::default(), Some(&creds()));
        assert_eq!(res, Resolution::Pending);
        assert!(notes.is_empty());
    }

    #[test]
    fn empty_items_are_not_found() {
        let ctx = InvocationContext::default();
        let (res, _) = resolve(&ctx, &request(json!({ "secret": { "items": [] } })), Some(&creds()));
        assert_eq!(res, Resolution::NotFound);
    }

    #[test]
    fn resolved_secret_keeps_keys_not_values() {
        let ctx = InvocationContext::default();
        let req = request(json!({ "secret": { "items": [
            { "resource": secret("github", "crossplane-system", json!({ "TOKEN": "c2VjcmV0", "GHPAT": "cGF0" })) },
            { "resource": { "apiVersion": "v1", "kind": "ConfigMap" } }
        ] } }));
        let (res, notes) = resolve(&ctx, &req, Some(&creds()));
        let Resolution::Resolved(secrets) = res else { panic!("expected resolved") };
        assert_eq!(secrets, vec![ResolvedSecret {
            name: "github".into(),
            namespace: "crossplane-system".into(),
            keys: vec!["GHPAT".into(), "TOKEN".into()],
        }]);
        assert_eq!(notes.len(), 1, "the ConfigMap item is skipped");
    }

    #[test]
    fn unnamed_secret_falls_back_to_credentials_reference() {
        let ctx = InvocationContext::default();
        let req = request(json!({ "secret": { "items": [
            { "resource": { "apiVersion": "v1", "kind": "Secret", "metadata": {}, "data": { "TOKEN": "eA==" } } }
        ] } }));
        let (res, notes) = resolve(&ctx, &req, Some(&creds()));
        assert!(notes.is_empty());
        assert_eq!(res, Resolution::Resolved(vec![ResolvedSecret {
            name: "github".into(),
            namespace: "crossplane-system".into(),
            keys: vec!["TOKEN".into()],
        }]));
    }

    #[test]
    fn unnamed_secret_without_credentials_is_skipped() {
        let ctx = InvocationContext::default();
        let req = request(json!({ "secret": { "items": [
            { "resource": { "apiVersion": "v1", "kind": "Secret", "metadata": {}, "data": { "TOKEN": "eA==" } } },
            { "resource": { "apiVersion": "v1", "kind": "Secret", "metadata": { "name": "github" }, "data": { "GHPAT": "eQ==" } } }
        ] } }));
        let (res, notes) = resolve(&ctx, &req, None);
        assert_eq!(res, Resolution::Resolved(Vec::new()), "neither item has a namespace to reference");
        assert_eq!(notes.len(), 2);
        assert!(notes[0].contains("no secret name and namespace"), "notes={notes:?}");
        let Resolution::Resolved(secrets) = res else { unreachable!() };
        assert!(secret_mirrors("Models.test.com", &secrets, &SecretMirrorRule::default()).is_empty());
    }

    #[test]
    fn mirrors_reference_secret_name_and_namespace() {
        let secrets = vec![ResolvedSecret { name: "github".into(), namespace: "crossplane-system".into(), keys: vec!["TOKEN".into()] }];
        let mirrors = secret_mirrors("Models.test.com", &secrets, &SecretMirrorRule::default());
        assert_eq!(mirrors.len(), 1);
        let (key, mirror) = &mirrors[0];
        assert_eq!(key, "secret-Models.test.com-TOKEN");
        let p = &mirror.spec.for_provider;
        assert_eq!(p.secret_name, "TOKEN");
        assert_eq!(p.repository, "Models.test.com");
        assert_eq!(p.plaintext_value_secret_ref, SecretKeySelector {
            key: "TOKEN".into(),
            name: "github".into(),
            namespace: "crossplane-system".into(),
        });
    }
}
