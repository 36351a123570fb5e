//! Build-notification dispatch pipeline
//!
//! This crate turns a finished build into outbound email:
//! - Evaluate the project's triggers, honoring replacement between them
//! - Resolve recipients with environment expansion, cc:/bcc: routing,
//!   deduplication and administrator exclusions
//! - Render subject and body through an injected template engine
//! - Gate every message through an optional pre-send script
//! - Hand the result to the transport, retrying once on socket errors

pub mod attachments;
pub mod content;
pub mod context;
pub mod dispatcher;
mod error;
pub mod gate;
pub mod message;
pub mod recipients;
pub mod transport;
pub mod trigger;

// Re-export the types a host wires together
pub use attachments::{Attachment, AttachmentCollector};
pub use content::{ContentRenderer, HtmlPostProcessor, Macro, RenderError, TemplateEngine};
pub use context::DispatchContext;
pub use dispatcher::{
    DispatchOutcome, DispatchStatus, MailDispatcher, Publisher, RetryPolicy,
};
// Re-export common types
pub use buildmail_common::{
    address::{Address, AddressList},
    build::{Build, BuildResult, Phase},
    config::DispatchConfig,
    listener::{BufferListener, BuildListener, TracingListener},
};
pub use error::DispatchError;
pub use gate::{GateRequest, GateResponse, GateVerdict, ScriptEngine, ScriptError};
pub use message::OutboundMessage;
pub use transport::{MailTransport, TransportError};
pub use trigger::{EmailSpec, EmailTrigger, Evaluation, TriggeredSet};
