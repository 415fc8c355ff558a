//! Readiness aggregator: per desired resource, has the platform reported it
//! ready? Feeds condition data back to the orchestrator; never fails the call.

use std::collections::BTreeMap;

use modelrepo_core::wire::{Condition, ConditionStatus, Ready, Resource, State, Target};
use serde::Deserialize;

pub const RESOURCES_READY: &str = "ResourcesReady";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessVerdict {
    pub ready: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    pub verdicts: BTreeMap<String, ReadinessVerdict>,
}

#[derive(Debug, Deserialize)]
struct ObservedCondition {
    #[serde(rename = "type")]
    type_: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Verdict for one desired key against the observed snapshot.
pub fn verdict(observed: Option<&Resource>) -> ReadinessVerdict {
    let not_ready = |message: String| ReadinessVerdict { ready: false, message };
    let Some(observed) = observed else { return not_ready("not yet observed".into()) };
    let conditions = match observed.resource.pointer("/status/conditions") {
        None | Some(serde_json::Value::Null) => return not_ready("no conditions reported".into()),
        Some(raw) => match serde_json::from_value::<Vec<ObservedCondition>>(raw.clone()) {
            Ok(c) => c,
            Err(e) => return not_ready(format!("unreadable conditions: {e}")),
        },
    };
    match conditions.iter().find(|c| c.type_ == "Ready") {
        Some(c) if c.status == "True" => ReadinessVerdict { ready: true, message: "ready".into() },
        Some(c) => {
            let detail = c.message.as_deref().or(c.reason.as_deref()).unwrap_or("no reason given");
            not_ready(format!("Ready={}: {}", c.status, detail))
        }
        None => not_ready("no Ready condition reported".into()),
    }
}

pub fn assess(desired: &BTreeMap<String, Resource>, observed: &State) -> ReadinessReport {
    let verdicts = desired
        .keys()
        .map(|key| (key.clone(), verdict(observed.resources.get(key))))
        .collect();
    ReadinessReport { verdicts }
}

impl ReadinessReport {
    pub fn total(&self) -> usize { self.verdicts.len() }

    pub fn ready_count(&self) -> usize { self.verdicts.values().filter(|v| v.ready).count() }

    pub fn all_ready(&self) -> bool { self.ready_count() == self.total() }

    /// Keys not yet ready, in key order.
    pub fn pending(&self) -> impl Iterator<Item = (&str, &ReadinessVerdict)> {
        self.verdicts.iter().filter(|(_, v)| !v.ready).map(|(k, v)| (k.as_str(), v))
    }

    /// Mark ready resources; everything else keeps whatever flag it carried.
    pub fn apply(&self, desired: &mut BTreeMap<String, Resource>) {
        for (key, res) in desired.iter_mut() {
            if self.verdicts.get(key).is_some_and(|v| v.ready) {
                res.ready = Ready::True;
            }
        }
    }

    pub fn summary(&self) -> String {
        format!("{} of {} composed resources ready", self.ready_count(), self.total())
    }

    pub fn condition(&self) -> Condition {
        let (status, reason) = if self.all_ready() {
            (ConditionStatus::True, "Available")
        } else {
            (ConditionStatus::False, "Creating")
        };
        let message = self.pending().next().map(|(key, v)| match self.total() - self.ready_count() {
            1 => format!("waiting for {key}: {}", v.message),
            n => format!("waiting for {key} and {} more: {}", n - 1, v.message),
        });
        Condition { type_: RESOURCES_READY.to_string(), status, reason: reason.to_string(), message, target: Some(Target::Composite) }
    }
}
