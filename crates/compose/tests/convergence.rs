#![forbid(unsafe_code)]

//! Drives the composer through the orchestrator loop: each call sees what the
//! previous call produced, as the platform would report it back.

use modelrepo_compose::Composer;
use modelrepo_core::wire::{ConditionStatus, Ready, Resource, Resources, RunFunctionRequest, RunFunctionResponse};
use serde_json::{json, Value};

fn initial_request() -> RunFunctionRequest {
    serde_json::from_value(json!({
        "meta": { "tag": "loop" },
        "observed": { "composite": { "resource": {
            "apiVersion": "svc.systems/v1alpha1",
            "kind": "KubeModelRepo",
            "metadata": { "name": "models" },
            "spec": {
                "repos": [
                    { "group": "cert-manager.io", "oci": { "image": "quay.io/jetstack/charts/cert-manager", "semVer": ">=1.14.0" } },
                    { "group": "acme.io", "oci": { "image": "ghcr.io/acme/charts/acme" } }
                ],
                "credentials": { "secretName": "github", "secretNamespace": "crossplane-system" }
            }
        } } }
    }))
    .unwrap()
}

fn resolved_secret() -> Resource {
    Resource::new(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": "github", "namespace": "crossplane-system" },
        "data": { "GHPAT": "cGF0", "NUGET_KEY": "bnVnZXQ=" }
    }))
}

/// What the platform reports after applying `resp`: every resource ready,
/// files echo the content they were created with.
fn observe_applied(resp: &RunFunctionResponse) -> std::collections::BTreeMap<String, Resource> {
    resp.desired
        .resources
        .iter()
        .map(|(key, desired)| {
            let mut doc = desired.resource.clone();
            let mut status = json!({ "conditions": [ { "type": "Ready", "status": "True" }, { "type": "Synced", "status": "True" } ] });
            if let Some(content) = doc.pointer("/spec/forProvider/content").cloned() {
                status["atProvider"] = json!({ "content": content });
            }
            doc["status"] = status;
            (key.clone(), Resource::new(doc))
        })
        .collect()
}

fn without_ready(resp: &RunFunctionResponse) -> Value {
    let mut resources = resp.desired.resources.clone();
    for r in resources.values_mut() {
        r.ready = Ready::Unspecified;
    }
    serde_json::to_value(resources).unwrap()
}

#[test]
fn converges_once_requirements_resolve_and_resources_report_ready() {
    let composer = Composer::builtin().unwrap();

    // 1: nothing resolved yet; mirrors are held back, the requirement is declared.
    let mut req = initial_request();
    let first = composer.run(&req);
    assert!(!first.is_fatal());
    assert!(first.desired.resources.keys().all(|k| !k.starts_with("secret-")));
    assert!(first.requirements.resources.contains_key("secret"));
    assert_eq!(first.conditions[0].status, ConditionStatus::False);

    // 2: the orchestrator supplies the secret and what it applied so far.
    req.required_resources.insert("secret".into(), Resources { items: vec![resolved_secret()] });
    req.observed.resources = observe_applied(&first);
    let second = composer.run(&req);
    let mirrors: Vec<&String> = second.desired.resources.keys().filter(|k| k.starts_with("secret-")).collect();
    assert_eq!(mirrors.len(), 4, "two entries for each of two repositories");
    assert!(second.requirements.resources.contains_key("secret"), "declared again on every call");
    for (key, res) in &second.desired.resources {
        if key.starts_with("file-") {
            assert_eq!(res.resource["spec"]["forProvider"]["overwriteOnCreate"], false, "{key} matches what was observed");
        }
    }

    // 3: everything, mirrors included, reported ready.
    req.observed.resources = observe_applied(&second);
    let third = composer.run(&req);
    assert_eq!(third.conditions[0].status, ConditionStatus::True);
    assert!(third.desired.resources.values().all(|r| r.ready == Ready::True));
    assert_eq!(without_ready(&second), without_ready(&third), "desired documents are stable once inputs stop changing");
}
