//! Content reconciler: decides overwrite-on-create for repository files by
//! comparing freshly rendered content with what the platform last observed.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use modelrepo_core::kinds::{RepositoryFile, RepositoryFileSpec};
use modelrepo_core::wire::Resource;
use serde_json::Value as Json;

use crate::render::FileDraft;

/// Content the provider reported for a file, if any.
pub fn observed_content(observed: &Resource) -> Option<&str> {
    observed.resource.pointer("/status/atProvider/content").and_then(Json::as_str)
}

/// Overwrite only to heal drift: there must be an observation carrying
/// content, and it must differ from what we render now.
pub fn overwrite_on_create(observed: Option<&Resource>, rendered: &str) -> bool {
    match observed.and_then(observed_content) {
        Some(previous) => previous != rendered,
        None => false,
    }
}

pub fn reconcile(draft: FileDraft, observed: Option<&Resource>) -> RepositoryFile {
    let FileDraft { management_policies, mut parameters, .. } = draft;
    parameters.overwrite_on_create = overwrite_on_create(observed, &parameters.content);
    RepositoryFile {
        metadata: ObjectMeta::default(),
        spec: RepositoryFileSpec { management_policies, for_provider: parameters },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelrepo_core::kinds::RepositoryFileParameters;
    use serde_json::json;

    fn observed(status: Json) -> Resource {
        Resource::new(json!({ "apiVersion": "repo.github.upbound.io/v1alpha1", "kind": "RepositoryFile", "status": status }))
    }

    #[test]
    fn no_observation_means_no_overwrite() {
        assert!(!overwrite_on_create(None, "x"));
    }

    #[test]
    fn null_or_absent_content_means_no_overwrite() {
        assert!(!overwrite_on_create(Some(&observed(json!({ "atProvider": { "content": null } }))), "x"));
        assert!(!overwrite_on_create(Some(&observed(json!({ "atProvider": {} }))), "x"));
        assert!(!overwrite_on_create(Some(&observed(json!(null))), "x"));
    }

    #[test]
    fn equal_content_keeps_flag_off_and_drift_turns_it_on() {
        let same = observed(json!({ "atProvider": { "content": "{\n  \"Config\": []\n}" } }));
        assert!(!overwrite_on_create(Some(&same), "{\n  \"Config\": []\n}"));
        let drifted = observed(json!({ "atProvider": { "content": "{\"Config\":[]}" } }));
        assert!(overwrite_on_create(Some(&drifted), "{\n  \"Config\": []\n}"));
    }

    #[test]
    fn reconcile_sets_flag_on_the_rendered_file() {
        let draft = FileDraft {
            key: "file-a-readme".into(),
            management_policies: Default::default(),
            parameters: RepositoryFileParameters { content: "new".into(), file: "README.md".into(), ..Default::default() },
        };
        let file = reconcile(draft, Some(&observed(json!({ "atProvider": { "content": "old" } }))));
        assert!(file.spec.for_provider.overwrite_on_create);
        assert_eq!(file.spec.for_provider.content, "new");
    }
}
