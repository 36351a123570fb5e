//! Host build model consumed by the dispatch pipeline.
//!
//! The pipeline never drives builds; it only inspects a completed (or
//! completing) build's outcome and records one piece of state on it: the
//! message id of the first successfully sent notification, used by the
//! next build to thread a failure email as a reply.

use std::{path::PathBuf, sync::Arc, sync::OnceLock};

use crate::EnvVars;

/// Outcome of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl std::fmt::Display for BuildResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "SUCCESS",
            Self::Unstable => "UNSTABLE",
            Self::Failure => "FAILURE",
            Self::NotBuilt => "NOT_BUILT",
            Self::Aborted => "ABORTED",
        })
    }
}

/// The point in the build lifecycle a trigger is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    PreBuild,
    PostBuild,
}

/// One build of one project, as seen by the notification pipeline.
#[derive(Debug, Default)]
pub struct Build {
    /// Display name of the project this build belongs to
    pub project: String,
    /// Build number within the project
    pub number: u32,
    /// Stable build identifier (used in saved-output filenames)
    pub id: String,
    /// Outcome, if the build has one yet
    pub result: Option<BuildResult>,
    /// Browsable URL of the build
    pub url: String,
    /// Workspace directory, if the build has one
    pub workspace: Option<PathBuf>,
    /// Environment exposed to recipient-list expansion
    pub env: EnvVars,
    /// Whether the build is still running
    pub in_progress: bool,
    /// The chronologically previous build of the same project
    pub previous: Option<Arc<Build>>,
    pub message_id: OnceLock<String>,
}

impl Build {
    /// Record the message id of a successfully sent notification.
    ///
    /// The first write wins; later sends within the same build leave the
    /// record untouched. Returns `true` if this call performed the write.
    pub fn record_message_id(&self, message_id: String) -> bool {
        self.message_id.set(message_id).is_ok()
    }

    /// The correlation record, if any notification has been sent for this
    /// build.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.get().map(String::as_str)
    }

    /// The previous build, skipped when it is still in progress since its
    /// outcome cannot be compared yet.
    #[must_use]
    pub fn previous_completed(&self) -> Option<&Arc<Build>> {
        self.previous
            .as_ref()
            .filter(|previous| !previous.in_progress)
    }

    /// Whether this build's result differs from the previous completed
    /// build's result.
    #[must_use]
    pub fn status_changed(&self) -> bool {
        match self.previous_completed() {
            Some(previous) => previous.result != self.result,
            None => true,
        }
    }
}
