//! Attachment seam.
//!
//! File selection, glob matching and log compression belong to the host;
//! the pipeline only asks an injected [`AttachmentCollector`] for the
//! finished parts and carries them on the message.

use serde::{Deserialize, Serialize};

use crate::context::DispatchContext;

/// One finished attachment part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Capability that turns glob patterns and build logs into attachments.
pub trait AttachmentCollector: Send + Sync {
    /// Collect the files under the build matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the build's files cannot be read.
    fn collect(
        &self,
        ctx: &DispatchContext,
        pattern: &str,
    ) -> Result<Vec<Attachment>, std::io::Error>;

    /// Produce the build log as an attachment, compressed when asked.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the log cannot be read.
    fn build_log(
        &self,
        ctx: &DispatchContext,
        compress: bool,
    ) -> Result<Attachment, std::io::Error>;
}
