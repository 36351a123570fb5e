//! Per-notification dispatch context.

use std::sync::Arc;

use buildmail_common::{
    EnvVars, build::Build, config::DispatchConfig, listener::BuildListener,
};

use crate::trigger::{EmailTrigger, TriggeredSet};

/// Everything one notification's assembly needs to know: the build it
/// describes, the trigger that caused it, the full set of triggers that
/// fired, and the host's log sink and configuration.
#[derive(Clone)]
pub struct DispatchContext {
    pub build: Arc<Build>,
    pub trigger: Arc<dyn EmailTrigger>,
    pub triggered: Arc<TriggeredSet>,
    pub listener: Arc<dyn BuildListener>,
    pub config: Arc<DispatchConfig>,
}

impl DispatchContext {
    /// The build's environment, the source for `$VAR` expansion.
    #[must_use]
    pub fn env(&self) -> &EnvVars {
        &self.build.env
    }

    /// Emit a build-log line only when debug mode is on.
    pub fn debug(&self, line: &str) {
        if self.config.debug_mode {
            self.listener.log(line);
        }
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("build", &self.build.id)
            .field("trigger", &self.trigger.display_name())
            .field("triggered", &self.triggered)
            .finish_non_exhaustive()
    }
}
