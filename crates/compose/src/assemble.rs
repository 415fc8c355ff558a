//! Response assembler: desired set, requirements, results and conditions
//! merged into one `RunFunctionResponse`.

use std::collections::BTreeMap;
use std::time::Duration;

use modelrepo_core::wire::{
    Condition, FnResult, Requirements, Resource, ResourceSelector, ResponseMeta, RunFunctionRequest, RunFunctionResponse, Severity, State,
};
use modelrepo_core::COMPOSITION_RESOURCE_NAME;
use serde::Serialize;
use serde_json::Value as Json;

pub struct ResponseBuilder {
    meta: ResponseMeta,
    desired: State,
    results: Vec<FnResult>,
    requirements: Requirements,
    conditions: Vec<Condition>,
    context: Option<Json>,
}

impl ResponseBuilder {
    /// Start from the request: echo the tag and context, and carry forward
    /// whatever earlier pipeline steps already desired.
    pub fn from_request(req: &RunFunctionRequest, ttl: Option<Duration>) -> Self {
        Self {
            meta: ResponseMeta { tag: req.meta.tag.clone(), ttl: ttl.map(|d| format!("{}s", d.as_secs())) },
            desired: req.desired.clone(),
            results: Vec::new(),
            requirements: Requirements::default(),
            conditions: Vec::new(),
            context: req.context.clone(),
        }
    }

    /// Insert or replace the desired resource under `key`. The document is
    /// annotated with the key so the orchestrator can track it.
    pub fn upsert<T: Serialize>(&mut self, key: &str, obj: &T) -> Result<(), serde_json::Error> {
        let mut doc = serde_json::to_value(obj)?;
        doc["metadata"]["annotations"][COMPOSITION_RESOURCE_NAME] = Json::String(key.to_string());
        self.desired.resources.insert(key.to_string(), Resource::new(doc));
        Ok(())
    }

    pub fn require(&mut self, name: &str, selector: ResourceSelector) {
        self.requirements.resources.insert(name.to_string(), selector);
    }

    pub fn normal(&mut self, message: impl Into<String>) {
        self.results.push(FnResult { severity: Severity::Normal, message: message.into(), reason: None });
    }

    pub fn condition(&mut self, condition: Condition) { self.conditions.push(condition); }

    pub fn desired(&self) -> &BTreeMap<String, Resource> { &self.desired.resources }

    pub fn desired_mut(&mut self) -> &mut BTreeMap<String, Resource> { &mut self.desired.resources }

    pub fn build(self) -> RunFunctionResponse {
        RunFunctionResponse {
            meta: self.meta,
            desired: self.desired,
            results: self.results,
            requirements: self.requirements,
            conditions: self.conditions,
            context: self.context,
        }
    }

    /// Aborted invocation: no desired resources, a single fatal result.
    pub fn fatal(req: &RunFunctionRequest, message: impl Into<String>) -> RunFunctionResponse {
        RunFunctionResponse {
            meta: ResponseMeta { tag: req.meta.tag.clone(), ttl: None },
            desired: State::default(),
            results: vec![FnResult { severity: Severity::Fatal, message: message.into(), reason: None }],
            requirements: Requirements::default(),
            conditions: Vec::new(),
            context: req.context.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with_desired() -> RunFunctionRequest {
        serde_json::from_value(json!({
            "meta": { "tag": "abc" },
            "desired": { "resources": {
                "from-earlier-step": { "resource": { "kind": "Bucket" } },
                "repo-x": { "resource": { "kind": "Repository", "spec": { "old": true } } }
            } }
        }))
        .unwrap()
    }

    #[test]
    fn upsert_annotates_and_last_write_wins() {
        let req = request_with_desired();
        let mut b = ResponseBuilder::from_request(&req, Some(Duration::from_secs(60)));
        b.upsert("repo-x", &json!({ "kind": "Repository", "spec": { "v": 1 } })).unwrap();
        b.upsert("repo-x", &json!({ "kind": "Repository", "metadata": { "annotations": { "a": "b" } }, "spec": { "v": 2 } })).unwrap();
        let resp = b.build();

        assert_eq!(resp.meta.tag, "abc");
        assert_eq!(resp.meta.ttl.as_deref(), Some("60s"));
        assert_eq!(resp.desired.resources.len(), 2, "passthrough kept, no duplicate key");
        let repo = resp.desired_resource("repo-x").unwrap();
        assert_eq!(repo["spec"], json!({ "v": 2 }));
        assert_eq!(repo["metadata"]["annotations"]["a"], "b");
        assert_eq!(repo["metadata"]["annotations"][COMPOSITION_RESOURCE_NAME], "repo-x");
        assert!(resp.desired_resource("from-earlier-step").is_some());
    }

    #[test]
    fn fatal_drops_desired_state() {
        let resp = ResponseBuilder::fatal(&request_with_desired(), "composite resource is missing from the request");
        assert!(resp.desired.resources.is_empty());
        assert_eq!(resp.results.len(), 1);
        assert!(resp.is_fatal());
        assert_eq!(resp.meta.tag, "abc");
    }
}
