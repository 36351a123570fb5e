//! Pipeline error type.

use crate::{content::RenderError, transport::TransportError};

/// Failure assembling or sending one notification.
///
/// The dispatcher catches this at the per-message boundary: one broken
/// notification never stops the others that fired for the same build.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Failed to collect attachments: {0}")]
    Attachment(#[from] std::io::Error),

    #[error("{0}")]
    Unexpected(String),
}
