//! Managed resource kinds rendered by the composer.
//!
//! Only the field shapes the composer fills in are modelled; everything else
//! is left to provider defaults and late initialization.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Operations the managed platform may perform on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementPolicy {
    Observe,
    Create,
    Update,
    Delete,
    LateInitialize,
    #[serde(rename = "*")]
    All,
}

pub type ManagementPolicies = SmallVec<[ManagementPolicy; 4]>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Orphan,
}

// ---------------- repo.github.upbound.io ----------------

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize)]
#[kube(group = "repo.github.upbound.io", version = "v1alpha1", kind = "Repository", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub management_policies: ManagementPolicies,
    pub for_provider: RepositoryParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryParameters {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub settings: RepositorySettings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template: Vec<TemplateRepository>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

/// Static repository policy flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RepositorySettings {
    pub allow_auto_merge: bool,
    pub allow_merge_commit: bool,
    pub allow_rebase_merge: bool,
    pub allow_squash_merge: bool,
    pub allow_update_branch: bool,
    pub delete_branch_on_merge: bool,
    pub has_discussions: bool,
    pub has_issues: bool,
    pub has_wiki: bool,
    pub private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squash_merge_commit_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squash_merge_commit_title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRepository {
    pub owner: String,
    pub repository: String,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize)]
#[kube(group = "repo.github.upbound.io", version = "v1alpha1", kind = "RepositoryRuleset", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRulesetSpec {
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub management_policies: ManagementPolicies,
    pub for_provider: RepositoryRulesetParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRulesetParameters {
    pub name: String,
    pub repository: String,
    pub enforcement: String,
    pub target: String,
    pub conditions: Vec<RulesetConditions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bypass_actors: Vec<BypassActor>,
    pub rules: Vec<RulesetRules>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetConditions {
    pub ref_name: Vec<RefNameCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefNameCondition {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BypassActor {
    pub actor_type: String,
    pub actor_id: i64,
    pub bypass_mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetRules {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pull_request: Vec<PullRequestRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_status_checks: Vec<RequiredStatusChecks>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequestRule {
    pub required_review_thread_resolution: bool,
    pub dismiss_stale_reviews_on_push: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_approving_review_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredStatusChecks {
    pub required_check: Vec<RequiredCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredCheck {
    pub context: String,
    pub integration_id: i64,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize)]
#[kube(group = "repo.github.upbound.io", version = "v1alpha1", kind = "RepositoryFile", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct RepositoryFileSpec {
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub management_policies: ManagementPolicies,
    pub for_provider: RepositoryFileParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryFileParameters {
    pub branch: String,
    pub commit_message: String,
    pub content: String,
    pub file: String,
    pub overwrite_on_create: bool,
    pub repository: String,
}

// ---------------- actions.github.upbound.io ----------------

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize)]
#[kube(group = "actions.github.upbound.io", version = "v1alpha1", kind = "ActionsSecret", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct ActionsSecretSpec {
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub management_policies: ManagementPolicies,
    pub for_provider: ActionsSecretParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionsSecretParameters {
    pub plaintext_value_secret_ref: SecretKeySelector,
    pub repository: String,
    pub secret_name: String,
}

/// Points at one key of a secret; the value itself never enters a desired document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub key: String,
    pub name: String,
    pub namespace: String,
}

// ---------------- http.crossplane.io ----------------

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize)]
#[kube(group = "http.crossplane.io", version = "v1alpha2", kind = "Request", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub management_policies: ManagementPolicies,
    pub for_provider: RequestParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    pub headers: BTreeMap<String, Vec<String>>,
    pub payload: RequestPayload,
    pub mappings: Vec<RequestMapping>,
    pub wait_timeout: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMapping {
    pub action: MappingAction,
    pub method: HttpMethod,
    /// jq expression evaluated by the provider, e.g. `(.payload.baseUrl)`.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MappingAction {
    Observe,
    Create,
    Update,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn repository_serializes_with_type_meta_and_flat_settings() {
        let repo = Repository {
            metadata: ObjectMeta::default(),
            spec: RepositorySpec {
                management_policies: SmallVec::from_slice(&[ManagementPolicy::Observe, ManagementPolicy::LateInitialize]),
                for_provider: RepositoryParameters {
                    name: "Models.x".into(),
                    description: "d".into(),
                    settings: RepositorySettings { allow_auto_merge: true, ..Default::default() },
                    ..Default::default()
                },
            },
        };
        let v = serde_json::to_value(&repo).unwrap();
        assert_eq!(v["apiVersion"], "repo.github.upbound.io/v1alpha1");
        assert_eq!(v["kind"], "Repository");
        assert_eq!(v["spec"]["managementPolicies"], serde_json::json!(["Observe", "LateInitialize"]));
        assert_eq!(v["spec"]["forProvider"]["allowAutoMerge"], true);
        assert!(v["spec"]["forProvider"].get("topics").is_none());
    }

    #[test]
    fn mapping_enums_are_uppercase() {
        let m = RequestMapping { action: MappingAction::Observe, method: HttpMethod::Get, url: "(.payload.baseUrl)".into(), body: None };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v, serde_json::json!({ "action": "OBSERVE", "method": "GET", "url": "(.payload.baseUrl)" }));
    }
}
