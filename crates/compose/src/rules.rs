//! Versioned rule tables: the static policy (flags, rule lists, file
//! templates) the renderer applies to every group.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use modelrepo_core::kinds::{
    BypassActor, DeletionPolicy, ManagementPolicies, PullRequestRule, RepositorySettings, RequiredCheck, TemplateRepository,
};
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

const V1_YAML: &str = include_str!("../rules/v1.yaml");
const V2_YAML: &str = include_str!("../rules/v2.yaml");

/// Shared template environment. Templates are rendered under the name of the
/// file they produce, which selects the escaping for that format.
static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.set_auto_escape_callback(escape_for);
    env
});

/// Escaping for values substituted into a file, by extension. Plain text
/// fields (names, paths, commit messages) render under an empty name.
pub fn escape_for(name: &str) -> AutoEscape {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("xml" | "csproj" | "props" | "targets") => AutoEscape::Html,
        Some("yaml" | "yml" | "json") => AutoEscape::Json,
        _ => AutoEscape::None,
    }
}

/// Variables a repository name template may reference.
pub const NAME_VARS: &[&str] = &["group", "owner"];
/// Variables a description template may reference.
pub const DESCRIPTION_VARS: &[&str] = &["group", "owner", "name"];
/// Variables file paths, commit messages and bodies may reference.
pub const FILE_VARS: &[&str] = &["group", "owner", "name", "description", "images"];

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("reading rule table {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("parsing rule table: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{field}: {source}")]
    Syntax { field: String, #[source] source: minijinja::Error },
    #[error("{field}: unknown template variable {var:?}")]
    UnknownVariable { field: String, var: String },
    #[error("duplicate file rule id {0:?}")]
    DuplicateFile(String),
    #[error("{0} must not be empty")]
    Empty(String),
    #[error("unknown rules version {0:?} (expected v1 or v2)")]
    UnknownVersion(String),
}

/// Builtin rule table revisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RulesVersion {
    #[serde(rename = "v1")]
    V1,
    #[default]
    #[serde(rename = "v2")]
    V2,
}

impl FromStr for RulesVersion {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(RulesVersion::V1),
            "v2" => Ok(RulesVersion::V2),
            other => Err(RulesError::UnknownVersion(other.to_string())),
        }
    }
}

impl fmt::Display for RulesVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { RulesVersion::V1 => "v1", RulesVersion::V2 => "v2" })
    }
}

/// Jinja template source (`{{ group }}`), rendered with strict undefined
/// variables. Rule tables are validated on load, so rendering a loaded
/// table's template only fails on a runtime error inside the template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(String);

impl Template {
    pub fn new(s: impl Into<String>) -> Self { Self(s.into()) }

    pub fn as_str(&self) -> &str { &self.0 }

    /// Top-level variables the template reads, sorted.
    pub fn variables(&self) -> Result<BTreeSet<String>, minijinja::Error> {
        Ok(TEMPLATES.template_from_str(&self.0)?.undeclared_variables(false).into_iter().collect())
    }

    /// Render as plain text.
    pub fn render(&self, vars: &TemplateVars) -> Result<String, minijinja::Error> { self.render_as("", vars) }

    /// Render as the content of `file`; substituted values are escaped for
    /// its format (see [`escape_for`]).
    pub fn render_as(&self, file: &str, vars: &TemplateVars) -> Result<String, minijinja::Error> {
        TEMPLATES.render_named_str(file, &self.0, &vars.0)
    }

    fn check(&self, field: &str, allowed: &[&str]) -> Result<(), RulesError> {
        let vars = self.variables().map_err(|source| RulesError::Syntax { field: field.to_string(), source })?;
        match vars.into_iter().find(|v| !allowed.contains(&v.as_str())) {
            Some(var) => Err(RulesError::UnknownVariable { field: field.to_string(), var }),
            None => Ok(()),
        }
    }
}

/// Values available to templates while rendering one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars(BTreeMap<&'static str, String>);

impl TemplateVars {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> { self.0.get(name).map(String::as_str) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTable {
    pub version: String,
    pub repository: RepositoryRule,
    pub ruleset: RulesetRule,
    #[serde(default)]
    pub files: Vec<FileRule>,
    #[serde(default)]
    pub secret_mirror: SecretMirrorRule,
    /// Out-of-band workflow permission request; omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_permissions: Option<WorkflowPermissionRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRule {
    pub name_template: Template,
    pub description_template: Template,
    pub owner: String,
    #[serde(default)]
    pub management_policies: ManagementPolicies,
    #[serde(default)]
    pub settings: RepositorySettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateRepository>,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetRule {
    pub name: String,
    pub enforcement: String,
    pub target: String,
    pub include_refs: Vec<String>,
    #[serde(default)]
    pub management_policies: ManagementPolicies,
    #[serde(default)]
    pub bypass_actors: Vec<BypassActor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestRule>,
    #[serde(default)]
    pub required_checks: Vec<RequiredCheck>,
}

/// One content file per group. Without a `template` the file holds the
/// group's raw entries as an indented JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRule {
    /// Stable role name, part of the resource key.
    pub id: String,
    pub path: Template,
    pub branch: String,
    pub commit_message: Template,
    #[serde(default)]
    pub management_policies: ManagementPolicies,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMirrorRule {
    #[serde(default)]
    pub management_policies: ManagementPolicies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPermissionRule {
    pub api_base: String,
    /// Key inside the credentials secret holding the bearer token.
    pub token_key: String,
    pub default_workflow_permissions: String,
    pub can_approve_pull_request_reviews: bool,
    pub wait_timeout: String,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

impl RuleTable {
    pub fn builtin(version: RulesVersion) -> Result<Self, RulesError> {
        Self::from_yaml_str(match version {
            RulesVersion::V1 => V1_YAML,
            RulesVersion::V2 => V2_YAML,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, RulesError> {
        let table: RuleTable = serde_yaml::from_str(yaml)?;
        table.validate()?;
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| RulesError::Io { path: path.display().to_string(), source })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), RulesError> {
        let repo = &self.repository;
        if repo.name_template.as_str().trim().is_empty() {
            return Err(RulesError::Empty("repository.nameTemplate".into()));
        }
        repo.name_template.check("repository.nameTemplate", NAME_VARS)?;
        repo.description_template.check("repository.descriptionTemplate", DESCRIPTION_VARS)?;

        let mut seen = BTreeSet::new();
        for file in &self.files {
            if file.id.is_empty() {
                return Err(RulesError::Empty("files[].id".into()));
            }
            if !seen.insert(file.id.as_str()) {
                return Err(RulesError::DuplicateFile(file.id.clone()));
            }
            file.path.check(&format!("files[{}].path", file.id), FILE_VARS)?;
            file.commit_message.check(&format!("files[{}].commitMessage", file.id), FILE_VARS)?;
            if let Some(body) = &file.template {
                body.check(&format!("files[{}].template", file.id), FILE_VARS)?;
            }
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, RulesError> { Ok(serde_yaml::to_string(self)?) }
}
