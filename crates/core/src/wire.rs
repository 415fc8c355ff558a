//! Function wire protocol in its JSON form (`RunFunctionRequest` /
//! `RunFunctionResponse`). Maps are ordered so serialized output is stable.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::IntentError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ready {
    #[default]
    #[serde(rename = "READY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "READY_TRUE")]
    True,
    #[serde(rename = "READY_FALSE")]
    False,
}

impl Ready {
    pub fn is_unspecified(&self) -> bool { matches!(self, Ready::Unspecified) }
}

/// A composed or composite resource document plus its readiness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub resource: Json,
    /// Base64 encoded values, passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connection_details: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Ready::is_unspecified")]
    pub ready: Ready,
}

impl Resource {
    pub fn new(resource: Json) -> Self { Self { resource, ..Default::default() } }

    /// `true` when the document is absent (`null` or `{}`).
    pub fn is_empty(&self) -> bool {
        match &self.resource {
            Json::Null => true,
            Json::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Resource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub items: Vec<Resource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(default)]
    pub tag: String,
    /// Duration string such as `60s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFunctionRequest {
    #[serde(default)]
    pub meta: RequestMeta,
    #[serde(default)]
    pub observed: State,
    #[serde(default)]
    pub desired: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Json>,
    /// Resources the orchestrator resolved for earlier requirement declarations.
    #[serde(default, alias = "extraResources", skip_serializing_if = "BTreeMap::is_empty")]
    pub required_resources: BTreeMap<String, Resources>,
}

impl RunFunctionRequest {
    /// Decode the observed composite resource. An absent or empty document is
    /// reported as [`IntentError::Missing`].
    pub fn observed_composite<T: DeserializeOwned>(&self) -> Result<T, IntentError> {
        let composite = match &self.observed.composite {
            Some(c) if !c.is_empty() => c,
            _ => return Err(IntentError::Missing),
        };
        Ok(serde_json::from_value(composite.resource.clone())?)
    }

    pub fn observed_resource(&self, key: &str) -> Option<&Resource> {
        self.observed.resources.get(key)
    }

    /// Items resolved for a requirement; `None` until the orchestrator has
    /// supplied them.
    pub fn required_resource(&self, name: &str) -> Option<&[Resource]> {
        self.required_resources.get(name).map(|r| r.items.as_slice())
    }
}

/// Selector for a resource the function needs the orchestrator to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "SEVERITY_NORMAL")]
    Normal,
    #[serde(rename = "SEVERITY_FATAL")]
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnResult {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    #[serde(rename = "STATUS_CONDITION_UNKNOWN")]
    Unknown,
    #[serde(rename = "STATUS_CONDITION_TRUE")]
    True,
    #[serde(rename = "STATUS_CONDITION_FALSE")]
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    #[serde(rename = "TARGET_COMPOSITE")]
    Composite,
    #[serde(rename = "TARGET_COMPOSITE_AND_CLAIM")]
    CompositeAndClaim,
}

/// Condition the orchestrator should set on the composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFunctionResponse {
    #[serde(default)]
    pub meta: ResponseMeta,
    #[serde(default)]
    pub desired: State,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<FnResult>,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Json>,
}

impl RunFunctionResponse {
    pub fn is_fatal(&self) -> bool {
        self.results.iter().any(|r| r.severity == Severity::Fatal)
    }

    pub fn desired_resource(&self, key: &str) -> Option<&Json> {
        self.desired.resources.get(key).map(|r| &r.resource)
    }
}
