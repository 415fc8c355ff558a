//! Desired resource renderer: turns one group into its fixed family of
//! managed resources according to the rule table.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use modelrepo_core::kinds::{
    HttpMethod, ManagementPolicies, MappingAction, RefNameCondition, Repository, RepositoryFileParameters, RepositoryParameters,
    RepositoryRuleset, RepositoryRulesetParameters, RepositoryRulesetSpec, RepositorySpec, Request, RequestMapping, RequestParameters,
    RequestPayload, RequestSpec, RequiredStatusChecks, RulesetConditions, RulesetRules,
};
use modelrepo_core::{CredentialsRef, RepoSpec, EXTERNAL_NAME};
use serde::Serialize;

use crate::keys;
use crate::partition::ResourceGroup;
use crate::rules::{RuleTable, TemplateVars};

const PAYLOAD_URL: &str = "(.payload.baseUrl)";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("rendering {field}: {source}")]
    Template { field: String, #[source] source: minijinja::Error },
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

fn template_error(field: impl Into<String>) -> impl FnOnce(minijinja::Error) -> RenderError {
    let field = field.into();
    move |source| RenderError::Template { field, source }
}

/// A content file before the overwrite decision has been made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDraft {
    pub key: String,
    pub management_policies: ManagementPolicies,
    pub parameters: RepositoryFileParameters,
}

/// Everything rendered for one group that does not depend on resolved
/// requirements.
#[derive(Debug, Clone)]
pub struct GroupPlan {
    pub repo_name: String,
    pub repository: Repository,
    pub ruleset: RepositoryRuleset,
    pub files: Vec<FileDraft>,
    pub workflow_permission: Option<Request>,
}

pub struct Renderer<'r> {
    rules: &'r RuleTable,
}

impl<'r> Renderer<'r> {
    pub fn new(rules: &'r RuleTable) -> Self { Self { rules } }

    pub fn render(&self, group: &ResourceGroup<'_>, credentials: Option<&CredentialsRef>) -> Result<GroupPlan, RenderError> {
        let vars = self.vars(group)?;
        let repo_name = vars.get("name").unwrap_or_default().to_string();
        Ok(GroupPlan {
            repository: self.repository(&vars),
            ruleset: self.ruleset(&repo_name),
            files: self.files(group, &vars)?,
            workflow_permission: self.workflow_permission(&repo_name, credentials)?,
            repo_name,
        })
    }

    fn vars(&self, group: &ResourceGroup<'_>) -> Result<TemplateVars, RenderError> {
        let rule = &self.rules.repository;
        let vars = TemplateVars::new().with("group", group.key).with("owner", rule.owner.as_str());
        let name = rule.name_template.render(&vars).map_err(template_error("repository.nameTemplate"))?;
        let vars = vars.with("name", name);
        let description = rule.description_template.render(&vars).map_err(template_error("repository.descriptionTemplate"))?;
        Ok(vars.with("description", description).with("images", images_list(&group.entries)))
    }

    fn repository(&self, vars: &TemplateVars) -> Repository {
        let rule = &self.rules.repository;
        let name = vars.get("name").unwrap_or_default().to_string();
        Repository {
            metadata: ObjectMeta {
                annotations: Some(BTreeMap::from([(EXTERNAL_NAME.to_string(), name.clone())])),
                ..Default::default()
            },
            spec: RepositorySpec {
                management_policies: rule.management_policies.clone(),
                for_provider: RepositoryParameters {
                    description: vars.get("description").unwrap_or_default().to_string(),
                    name,
                    settings: rule.settings.clone(),
                    template: rule.template.iter().cloned().collect(),
                    topics: rule.topics.clone(),
                },
            },
        }
    }

    fn ruleset(&self, repo_name: &str) -> RepositoryRuleset {
        let rule = &self.rules.ruleset;
        let required_status_checks = if rule.required_checks.is_empty() {
            Vec::new()
        } else {
            vec![RequiredStatusChecks { required_check: rule.required_checks.clone() }]
        };
        RepositoryRuleset {
            metadata: ObjectMeta::default(),
            spec: RepositoryRulesetSpec {
                management_policies: rule.management_policies.clone(),
                for_provider: RepositoryRulesetParameters {
                    name: rule.name.clone(),
                    repository: repo_name.to_string(),
                    enforcement: rule.enforcement.clone(),
                    target: rule.target.clone(),
                    conditions: vec![RulesetConditions {
                        ref_name: vec![RefNameCondition { include: rule.include_refs.clone(), exclude: Vec::new() }],
                    }],
                    bypass_actors: rule.bypass_actors.clone(),
                    rules: vec![RulesetRules {
                        pull_request: rule.pull_request.iter().cloned().collect(),
                        required_status_checks,
                    }],
                },
            },
        }
    }

    fn files(&self, group: &ResourceGroup<'_>, vars: &TemplateVars) -> Result<Vec<FileDraft>, RenderError> {
        let repo_name = vars.get("name").unwrap_or_default();
        let mut out = Vec::with_capacity(self.rules.files.len());
        for rule in &self.rules.files {
            let file = rule.path.render(vars).map_err(template_error(format!("files[{}].path", rule.id)))?;
            let content = match &rule.template {
                Some(body) => body.render_as(&file, vars).map_err(template_error(format!("files[{}].template", rule.id)))?,
                None => entries_document(&group.entries)?,
            };
            let commit_message =
                rule.commit_message.render(vars).map_err(template_error(format!("files[{}].commitMessage", rule.id)))?;
            out.push(FileDraft {
                key: keys::file(group.key, &rule.id),
                management_policies: rule.management_policies.clone(),
                parameters: RepositoryFileParameters {
                    branch: rule.branch.clone(),
                    commit_message,
                    content,
                    file,
                    overwrite_on_create: false,
                    repository: repo_name.to_string(),
                },
            });
        }
        Ok(out)
    }

    /// The bearer header carries a reference the provider resolves, never the token.
    fn workflow_permission(&self, repo_name: &str, credentials: Option<&CredentialsRef>) -> Result<Option<Request>, serde_json::Error> {
        let (rule, creds) = match (&self.rules.workflow_permissions, credentials) {
            (Some(rule), Some(creds)) => (rule, creds),
            _ => return Ok(None),
        };
        let body = serde_json::to_string_pretty(&serde_json::json!({
            "default_workflow_permissions": rule.default_workflow_permissions,
            "can_approve_pull_request_reviews": rule.can_approve_pull_request_reviews,
        }))?;
        let headers = BTreeMap::from([
            ("Accept".to_string(), vec!["application/vnd.github+json".to_string()]),
            (
                "Authorization".to_string(),
                vec![format!("Bearer {{{{ {}:{}:{} }}}}", creds.secret_name, creds.secret_namespace, rule.token_key)],
            ),
        ]);
        let put = |action| RequestMapping { action, method: HttpMethod::Put, url: PAYLOAD_URL.to_string(), body: Some(body.clone()) };
        Ok(Some(Request {
            metadata: ObjectMeta::default(),
            spec: RequestSpec {
                deletion_policy: rule.deletion_policy,
                management_policies: ManagementPolicies::new(),
                for_provider: RequestParameters {
                    headers,
                    payload: RequestPayload {
                        base_url: format!(
                            "{}/repos/{}/{}/actions/permissions/workflow",
                            rule.api_base.trim_end_matches('/'),
                            self.rules.repository.owner,
                            repo_name
                        ),
                        body: None,
                    },
                    mappings: vec![
                        RequestMapping { action: MappingAction::Observe, method: HttpMethod::Get, url: PAYLOAD_URL.to_string(), body: None },
                        put(MappingAction::Create),
                        put(MappingAction::Update),
                    ],
                    wait_timeout: rule.wait_timeout.clone(),
                },
            },
        }))
    }
}

/// The group's raw entries as `{"Config": [...]}`, two-space indented, in
/// original order.
pub fn entries_document(entries: &[&RepoSpec]) -> Result<String, serde_json::Error> {
    #[derive(Serialize)]
    struct ConfigDocument<'a> {
        #[serde(rename = "Config")]
        config: &'a [&'a RepoSpec],
    }
    serde_json::to_string_pretty(&ConfigDocument { config: entries })
}

/// Markdown bullet list of the group's sources, in original order.
pub fn images_list(entries: &[&RepoSpec]) -> String {
    entries
        .iter()
        .map(|e| match &e.oci {
            Some(oci) => match &oci.sem_ver {
                Some(range) => format!("- `{}` ({})", oci.image, range),
                None => format!("- `{}`", oci.image),
            },
            None => format!("- `{}`", e.group),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
