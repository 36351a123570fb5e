//! Pre-send gate script.
//!
//! Just before sending, an administrator-supplied script may inspect the
//! assembled message, rewrite it, or cancel the send. Script execution
//! itself is the host's business through [`ScriptEngine`]; the pipeline
//! owns the policy around it: blank scripts are skipped, failures and
//! timeouts never block the notification, and a security violation is
//! surfaced in the build log.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use buildmail_common::{build::Build, config::DispatchConfig};

use crate::{context::DispatchContext, message::OutboundMessage};

/// What the script engine is handed for one gate run.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub script: String,
    pub build: Arc<Build>,
    /// The assembled message; edits here flow into the send
    pub message: OutboundMessage,
    pub trigger_name: String,
    /// Display names of every trigger group that fired
    pub triggered: Vec<String>,
    /// Cancellation flag the script may set
    pub cancel: bool,
    /// Whether the engine should confine the script
    pub sandboxed: bool,
}

/// What the script engine hands back.
#[derive(Debug, Clone)]
pub struct GateResponse {
    pub cancel: bool,
    pub message: OutboundMessage,
}

/// Script execution failure, split by how the pipeline reacts.
#[derive(thiserror::Error, Debug)]
pub enum ScriptError {
    /// The script reached past the sandbox.
    #[error("{0}")]
    Security(String),

    /// The script itself failed.
    #[error("{message}")]
    Runtime { message: String, trace: String },
}

/// Executes gate scripts. Hosts bring their own script language and
/// sandbox; a request with `sandboxed` set must be confined.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    async fn execute(&self, request: GateRequest) -> Result<GateResponse, ScriptError>;
}

/// Outcome of the gate: whether to proceed, and with which message.
#[derive(Debug)]
pub struct GateVerdict {
    pub proceed: bool,
    pub message: OutboundMessage,
}

/// Run the gate script over an assembled message.
///
/// A blank script proceeds untouched. A security violation, runtime
/// failure, or timeout is reported to the build log and the original
/// message proceeds; only the script explicitly setting the cancel flag
/// stops the send.
pub async fn run(
    engine: &dyn ScriptEngine,
    script: &str,
    message: OutboundMessage,
    ctx: &DispatchContext,
    config: &DispatchConfig,
) -> GateVerdict {
    if script.trim().is_empty() {
        return GateVerdict {
            proceed: true,
            message,
        };
    }

    ctx.debug("Executing pre-send script");
    if config.sandbox_enabled {
        ctx.debug("Setting up sandbox for pre-send script");
    }

    let request = GateRequest {
        script: script.to_string(),
        build: Arc::clone(&ctx.build),
        message: message.clone(),
        trigger_name: ctx.trigger.display_name().to_string(),
        triggered: ctx.triggered.names(),
        cancel: false,
        sandboxed: config.sandbox_enabled,
    };

    let timeout = Duration::from_secs(config.script_timeout_secs);
    match tokio::time::timeout(timeout, engine.execute(request)).await {
        Ok(Ok(response)) => {
            ctx.debug(&format!("Pre-send script set cancel to {}", response.cancel));
            GateVerdict {
                proceed: !response.cancel,
                message: response.message,
            }
        }
        Ok(Err(ScriptError::Security(violation))) => {
            ctx.listener.error(&format!(
                "Pre-send script tried to access secured objects: {violation}"
            ));
            GateVerdict {
                proceed: true,
                message,
            }
        }
        Ok(Err(ScriptError::Runtime { message: why, trace })) => {
            ctx.listener.error(&why);
            ctx.listener.log(&trace);
            GateVerdict {
                proceed: true,
                message,
            }
        }
        Err(_elapsed) => {
            ctx.listener.error(&format!(
                "Pre-send script timed out after {} seconds",
                config.script_timeout_secs
            ));
            GateVerdict {
                proceed: true,
                message,
            }
        }
    }
}
