//! modelrepo compose: turns one `KubeModelRepo` intent into desired GitHub
//! resources, one invocation at a time.
//!
//! The engine is a pure function of the request. Anything it cannot render yet
//! (secrets that have not been resolved) is left out and picked up again when
//! the orchestrator calls back with more information.

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use modelrepo_core::wire::{RunFunctionRequest, RunFunctionResponse};
use modelrepo_core::{IntentError, KubeModelRepo};
use serde::Deserialize;
use tracing::{debug, info, warn};

pub mod assemble;
pub mod broker;
pub mod content;
pub mod context;
pub mod keys;
pub mod partition;
pub mod readiness;
pub mod render;
pub mod rules;

pub use assemble::ResponseBuilder;
pub use context::InvocationContext;
pub use rules::{RuleTable, RulesError, RulesVersion};

use broker::{Resolution, SECRET_REQUIREMENT};
use render::Renderer;

/// Per-step function input. Unknown fields (`apiVersion`, `kind`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInput {
    #[serde(default)]
    pub rules_version: Option<RulesVersion>,
}

#[derive(Debug, thiserror::Error)]
enum ComposeError {
    #[error(transparent)]
    Intent(#[from] IntentError),
    #[error("rendering group {group}: {source}")]
    Render { group: String, #[source] source: render::RenderError },
    #[error("encoding desired resource {key}: {source}")]
    Encode { key: String, #[source] source: serde_json::Error },
}

/// Holds the configured rule table; cheap to share across threads.
#[derive(Debug, Clone)]
pub struct Composer {
    rules: RuleTable,
    ttl: Option<Duration>,
}

impl Composer {
    pub fn new(rules: RuleTable) -> Self { Self { rules, ttl: None } }

    /// Composer over the default builtin rule table.
    pub fn builtin() -> Result<Self, RulesError> { Ok(Self::new(RuleTable::builtin(RulesVersion::default())?)) }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn rules(&self) -> &RuleTable { &self.rules }

    /// Run one invocation. Always returns a response; a missing or
    /// undecodable intent yields a fatal one with no desired resources.
    pub fn run(&self, req: &RunFunctionRequest) -> RunFunctionResponse {
        let started = Instant::now();
        counter!("compose_invocations_total", 1u64);
        let resp = match self.compose(req) {
            Ok(resp) => resp,
            Err(e) => {
                counter!("compose_fatal_total", 1u64);
                warn!(tag = %req.meta.tag, error = %e, "invocation aborted");
                ResponseBuilder::fatal(req, e.to_string())
            }
        };
        histogram!("compose_desired_resources", resp.desired.resources.len() as f64);
        histogram!("compose_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        resp
    }

    fn compose(&self, req: &RunFunctionRequest) -> Result<RunFunctionResponse, ComposeError> {
        let xr: KubeModelRepo = req.observed_composite()?;
        xr.check_kind()?;
        let ctx = InvocationContext::new(req, &xr);
        let span = ctx.span();
        let _entered = span.enter();
        info!(repos = xr.spec.repos.len(), "running function");

        let mut out = ResponseBuilder::from_request(req, self.ttl);
        out.normal(format!("Running function for {ctx}"));
        let rules = self.rules_for(req, &mut out);

        let credentials = xr.spec.credentials.as_ref();
        out.require(SECRET_REQUIREMENT, broker::credentials_selector(credentials));
        let (resolution, notes) = broker::resolve(&ctx, req, credentials);
        for note in notes {
            out.normal(note);
        }
        match &resolution {
            Resolution::Pending => {
                counter!("compose_pending_requirements_total", 1u64);
                out.normal(format!("waiting for required resource {SECRET_REQUIREMENT:?}; secret mirrors not rendered yet"));
            }
            Resolution::NotFound => {
                out.normal(format!("required resource {SECRET_REQUIREMENT:?} matched nothing; secret mirrors not rendered"));
            }
            Resolution::Resolved(_) => {}
        }
        if credentials.is_none() && rules.workflow_permissions.is_some() {
            out.normal("no credentials reference; workflow permission requests not rendered");
        }

        let renderer = Renderer::new(&rules);
        let encode = |key: &str| {
            let key = key.to_string();
            move |source| ComposeError::Encode { key, source }
        };
        for group in partition::partition(&xr.spec.repos) {
            let plan = renderer
                .render(&group, credentials)
                .map_err(|source| ComposeError::Render { group: group.key.to_string(), source })?;
            debug!(group = group.key, repo = %plan.repo_name, entries = group.entries.len(), "rendered group");

            let key = keys::repository(group.key);
            out.upsert(&key, &plan.repository).map_err(encode(&key))?;
            let key = keys::ruleset(group.key);
            out.upsert(&key, &plan.ruleset).map_err(encode(&key))?;

            for draft in plan.files {
                let key = draft.key.clone();
                let file = content::reconcile(draft, req.observed_resource(&key));
                if file.spec.for_provider.overwrite_on_create {
                    debug!(key = %key, "observed content drifted; overwriting");
                }
                out.upsert(&key, &file).map_err(encode(&key))?;
            }

            if let Some(permission) = &plan.workflow_permission {
                let key = keys::workflow_permission(group.key);
                out.upsert(&key, permission).map_err(encode(&key))?;
            }

            if let Resolution::Resolved(secrets) = &resolution {
                for (key, mirror) in broker::secret_mirrors(&plan.repo_name, secrets, &rules.secret_mirror) {
                    out.upsert(&key, &mirror).map_err(encode(&key))?;
                }
            }
        }

        let report = readiness::assess(out.desired(), &req.observed);
        report.apply(out.desired_mut());
        for (key, verdict) in report.pending() {
            debug!(key = %key, reason = %verdict.message, "not ready");
        }
        out.normal(report.summary());
        out.condition(report.condition());
        info!(desired = report.total(), ready = report.ready_count(), "function complete");
        Ok(out.build())
    }

    /// The configured table, unless the step input selects a builtin revision.
    fn rules_for<'a>(&'a self, req: &RunFunctionRequest, out: &mut ResponseBuilder) -> Cow<'a, RuleTable> {
        let Some(raw) = &req.input else { return Cow::Borrowed(&self.rules) };
        let input = match FunctionInput::deserialize(raw) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "ignoring undecodable function input");
                out.normal(format!("ignoring function input: {e}"));
                return Cow::Borrowed(&self.rules);
            }
        };
        match input.rules_version {
            Some(version) => match RuleTable::builtin(version) {
                Ok(table) => Cow::Owned(table),
                Err(e) => {
                    warn!(%version, error = %e, "builtin rule table failed to load");
                    out.normal(format!("rules {version} unavailable ({e}); using {}", self.rules.version));
                    Cow::Borrowed(&self.rules)
                }
            },
            None => Cow::Borrowed(&self.rules),
        }
    }
}
