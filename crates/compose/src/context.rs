use std::fmt;

use modelrepo_core::{wire::RunFunctionRequest, KubeModelRepo};
use tracing::{info_span, Span};

/// Correlation fields for one invocation, passed explicitly to the
/// components that log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub tag: String,
    pub xr_api_version: String,
    pub xr_kind: String,
    pub xr_name: String,
}

impl InvocationContext {
    pub fn new(req: &RunFunctionRequest, xr: &KubeModelRepo) -> Self {
        Self {
            tag: req.meta.tag.clone(),
            xr_api_version: xr.api_version.clone(),
            xr_kind: xr.kind.clone(),
            xr_name: xr.name().to_string(),
        }
    }

    pub fn span(&self) -> Span {
        info_span!(
            "run_function",
            tag = %self.tag,
            xr.api_version = %self.xr_api_version,
            xr.kind = %self.xr_kind,
            xr.name = %self.xr_name,
        )
    }
}

impl fmt::Display for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.xr_kind, self.xr_name)
    }
}
