//! modelrepo core types: the composite intent, the function wire protocol and
//! the managed resource kinds the composer fills in.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

pub mod kinds;
pub mod wire;

pub const XR_API_VERSION: &str = "svc.systems/v1alpha1";
pub const XR_KIND: &str = "KubeModelRepo";

/// Annotation binding a managed resource to a pre-existing external object.
pub const EXTERNAL_NAME: &str = "crossplane.io/external-name";
/// Annotation carrying the key a desired resource is tracked under.
pub const COMPOSITION_RESOURCE_NAME: &str = "crossplane.io/composition-resource-name";

/// The composite resource (intent) driving one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeModelRepo {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: KubeModelRepoSpec,
}

impl KubeModelRepo {
    pub fn name(&self) -> &str { self.metadata.name.as_deref().unwrap_or("") }

    /// Reject composites of another kind. Absent `apiVersion`/`kind` are
    /// accepted; the API group must match, any version of it is fine.
    pub fn check_kind(&self) -> Result<(), IntentError> {
        let group = |api_version: &str| api_version.split('/').next().unwrap_or_default().to_string();
        let wrong_group = !self.api_version.is_empty() && group(&self.api_version) != group(XR_API_VERSION);
        let wrong_kind = !self.kind.is_empty() && self.kind != XR_KIND;
        if wrong_group || wrong_kind {
            return Err(IntentError::WrongKind { api_version: self.api_version.clone(), kind: self.kind.clone() });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeModelRepoSpec {
    #[serde(default)]
    pub repos: Vec<RepoSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsRef>,
}

/// One flat intent entry. `group` is the partitioning key; fields the engine
/// does not know about are kept so they survive into the rendered config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepoSpec {
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci: Option<OciRef>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OciRef {
    pub image: String,
    /// Version range constraint, e.g. `>=2.0.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sem_ver: Option<String>,
}

/// Reference to the secret holding the provider token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRef {
    pub secret_name: String,
    pub secret_namespace: String,
}

/// Reasons an invocation cannot produce any desired state.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("composite resource is missing from the request")]
    Missing,
    #[error("cannot decode composite resource: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("composite resource is {api_version:?}/{kind:?}, expected {}/{}", XR_API_VERSION, XR_KIND)]
    WrongKind { api_version: String, kind: String },
}

pub mod prelude {
    pub use super::kinds::*;
    pub use super::wire::*;
    pub use super::{CredentialsRef, IntentError, KubeModelRepo, KubeModelRepoSpec, OciRef, RepoSpec};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_spec_keeps_unknown_fields() {
        let v = serde_json::json!({
            "group": "cert-manager.io",
            "oci": { "image": "quay.io/jetstack/charts/cert-manager", "semVer": ">=1.14.0" },
            "crdPath": "deploy/crds"
        });
        let spec: RepoSpec = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(spec.group, "cert-manager.io");
        assert_eq!(spec.oci.as_ref().and_then(|o| o.sem_ver.as_deref()), Some(">=1.14.0"));
        assert_eq!(spec.extra.get("crdPath"), Some(&serde_json::json!("deploy/crds")));
        assert_eq!(serde_json::to_value(&spec).unwrap(), v);
    }

    #[test]
    fn composite_without_spec_decodes_empty() {
        let xr: KubeModelRepo = serde_json::from_value(serde_json::json!({
            "apiVersion": XR_API_VERSION,
            "kind": XR_KIND,
            "metadata": { "name": "models" }
        }))
        .unwrap();
        assert_eq!(xr.name(), "models");
        assert!(xr.spec.repos.is_empty());
        assert!(xr.spec.credentials.is_none());
        assert!(xr.check_kind().is_ok());
    }

    #[test]
    fn foreign_composites_are_rejected() {
        let decode = |v: serde_json::Value| serde_json::from_value::<KubeModelRepo>(v).unwrap();
        let bucket = decode(serde_json::json!({ "apiVersion": "s3.aws/v1", "kind": "Bucket", "metadata": { "name": "b" } }));
        let err = bucket.check_kind().unwrap_err();
        assert!(matches!(err, IntentError::WrongKind { ref kind, .. } if kind == "Bucket"));
        assert!(err.to_string().contains("expected svc.systems/v1alpha1/KubeModelRepo"), "err={err}");

        assert!(decode(serde_json::json!({ "apiVersion": "svc.systems/v1beta1", "kind": XR_KIND })).check_kind().is_ok());
        assert!(decode(serde_json::json!({ "apiVersion": XR_API_VERSION, "kind": "Other" })).check_kind().is_err());
        assert!(decode(serde_json::json!({ "spec": { "repos": [] } })).check_kind().is_ok());
    }
}
