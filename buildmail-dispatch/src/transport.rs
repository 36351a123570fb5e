//! The mail transport seam.
//!
//! SMTP, connection pooling and MIME encoding belong to the host; the
//! pipeline only needs to know whether a send worked, and when it did
//! not, whether retrying could help and which addresses were affected.

use async_trait::async_trait;
use buildmail_common::address::Address;

use crate::message::OutboundMessage;

/// Send failure, classified by what the pipeline can do about it.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Connection-level failure worth one retry.
    #[error("{0}")]
    Transient(String),

    /// The server took some recipients and rejected others.
    #[error("{message}")]
    Partial {
        message: String,
        /// Addresses the server accepted
        sent: Vec<Address>,
        /// Valid addresses the send never reached
        valid_unsent: Vec<Address>,
        /// Addresses the server rejected as invalid
        invalid: Vec<Address>,
    },

    /// Anything else. Retrying will not help.
    #[error("{0}")]
    Fatal(String),
}

impl TransportError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Delivers assembled messages.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one message to all of its recipients.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] classified so the pipeline can decide
    /// between retrying, recording a partial success, or giving up.
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}
