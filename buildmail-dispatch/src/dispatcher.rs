//! The dispatch pipeline.
//!
//! [`MailDispatcher::perform`] is the entry point a host calls when a
//! build reaches a phase: evaluate the project's triggers, and for each
//! surviving trigger assemble a message, run it through the pre-send
//! gate, apply the emergency reroute, and hand it to the transport with
//! one retry on connection-level failures. A failure in one
//! notification never stops the others that fired for the same build.

use std::{sync::Arc, time::Duration};

use buildmail_common::{
    address::Address,
    build::{Build, BuildResult, Phase},
    config::DispatchConfig,
    listener::BuildListener,
};
use serde::{Deserialize, Serialize};

use crate::{
    attachments::AttachmentCollector,
    content::{ContentRenderer, Macro},
    context::DispatchContext,
    error::DispatchError,
    gate::{self, ScriptEngine},
    message::OutboundMessage,
    recipients,
    transport::{MailTransport, TransportError},
    trigger::{EmailTrigger, Evaluation, evaluate},
};

/// Retry behavior for connection-level send failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first included
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts, in seconds
    #[serde(default = "defaults::backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            backoff_secs: defaults::backoff_secs(),
        }
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        2
    }

    pub const fn backoff_secs() -> u64 {
        10
    }
}

/// How one notification ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Delivered to at least one recipient
    Sent,
    /// The gate script cancelled the send
    Cancelled,
    /// Nothing to send to
    Skipped,
    Failed,
}

/// The result of one notification's trip through the pipeline.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub trigger: String,
    pub status: DispatchStatus,
    /// The message id, when anything was delivered
    pub message_id: Option<String>,
    pub sent: Vec<Address>,
    pub valid_unsent: Vec<Address>,
    pub invalid: Vec<Address>,
}

impl DispatchOutcome {
    fn new(trigger: &str, status: DispatchStatus) -> Self {
        Self {
            trigger: trigger.to_string(),
            status,
            message_id: None,
            sent: Vec::new(),
            valid_unsent: Vec::new(),
            invalid: Vec::new(),
        }
    }
}

/// Per-project notification configuration: the defaults triggers defer
/// to, the pre-send script, and the triggers themselves.
#[derive(Clone, Default)]
pub struct Publisher {
    pub recipient_list: String,
    /// Concrete project MIME type, when the project picks one
    pub content_type: Option<String>,
    pub default_subject: String,
    pub default_body: String,
    pub attachments_pattern: String,
    pub presend_script: String,
    pub attach_build_log: bool,
    pub compress_build_log: bool,
    pub reply_to: String,
    /// Save each rendered body into the build's workspace
    pub save_output: bool,
    pub triggers: Vec<Arc<dyn EmailTrigger>>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("recipient_list", &self.recipient_list)
            .field("content_type", &self.content_type)
            .field("triggers", &self.triggers.len())
            .finish_non_exhaustive()
    }
}

/// The assembled pipeline. Hosts construct one per server with their
/// transport, template engine, and script engine, and call
/// [`Self::perform`] for every build.
pub struct MailDispatcher {
    config: Arc<DispatchConfig>,
    renderer: ContentRenderer,
    transport: Arc<dyn MailTransport>,
    script_engine: Arc<dyn ScriptEngine>,
    attachments: Option<Arc<dyn AttachmentCollector>>,
    retry: RetryPolicy,
}

impl MailDispatcher {
    #[must_use]
    pub fn new(
        config: Arc<DispatchConfig>,
        renderer: ContentRenderer,
        transport: Arc<dyn MailTransport>,
        script_engine: Arc<dyn ScriptEngine>,
    ) -> Self {
        Self {
            config,
            renderer,
            transport,
            script_engine,
            attachments: None,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_attachment_collector(mut self, collector: Arc<dyn AttachmentCollector>) -> Self {
        self.attachments = Some(collector);
        self
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Evaluate the publisher's triggers for one build phase and send a
    /// notification for each trigger that survives replacement.
    pub async fn perform(
        &self,
        publisher: &Publisher,
        build: Arc<Build>,
        phase: Phase,
        listener: Arc<dyn BuildListener>,
    ) -> Vec<DispatchOutcome> {
        let triggered =
            match evaluate(&publisher.triggers, &build, phase, listener.as_ref()) {
                Evaluation::Fired(triggered) => Arc::new(triggered),
                Evaluation::Nothing | Evaluation::Circular => return Vec::new(),
            };

        let mut outcomes = Vec::new();
        for (name, group) in triggered.iter() {
            listener.log(&format!("Sending email for trigger: {name}"));
            for trigger in group {
                let ctx = DispatchContext {
                    build: Arc::clone(&build),
                    trigger: Arc::clone(trigger),
                    triggered: Arc::clone(&triggered),
                    listener: Arc::clone(&listener),
                    config: Arc::clone(&self.config),
                };
                outcomes.push(self.dispatch(publisher, &ctx).await);
            }
        }
        outcomes
    }

    /// Send one notification, catching assembly and send failures at the
    /// per-message boundary.
    pub async fn dispatch(&self, publisher: &Publisher, ctx: &DispatchContext) -> DispatchOutcome {
        match self.try_dispatch(publisher, ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(trigger = ctx.trigger.display_name(), error = %err, "Could not send email.");
                ctx.listener
                    .error("Could not send email as a part of the post-build publishers.");
                ctx.listener.error(&err.to_string());
                DispatchOutcome::new(ctx.trigger.display_name(), DispatchStatus::Failed)
            }
        }
    }

    async fn try_dispatch(
        &self,
        publisher: &Publisher,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let message = self.build_message(publisher, ctx)?;

        // The script source is itself a template.
        let macros = vec![Macro::new("TRIGGER_NAME", ctx.trigger.display_name())];
        let script = match self
            .renderer
            .render(&publisher.presend_script, ctx, &macros)
        {
            Ok(script) => script,
            Err(err) => {
                ctx.listener
                    .error(&format!("Failed to render pre-send script: {err}"));
                String::new()
            }
        };

        let verdict = gate::run(
            self.script_engine.as_ref(),
            &script,
            message,
            ctx,
            &self.config,
        )
        .await;
        if !verdict.proceed {
            ctx.listener
                .log("Email sending was cancelled by user script.");
            return Ok(DispatchOutcome::new(
                ctx.trigger.display_name(),
                DispatchStatus::Cancelled,
            ));
        }
        let mut message = verdict.message;

        // The reroute wins over anything the gate script added.
        if self.config.has_emergency_reroute() {
            message.clear_recipients();
            let mut set = recipients::RecipientSet::default();
            recipients::add_from_recipient_list(
                &self.config.emergency_reroute,
                ctx.env(),
                &mut set,
                ctx.listener.as_ref(),
            );
            for address in set.to.iter().chain(set.cc.iter()).chain(set.bcc.iter()) {
                message.to.push(address.clone());
            }
        }

        self.send(message, ctx).await
    }

    fn build_message(
        &self,
        publisher: &Publisher,
        ctx: &DispatchContext,
    ) -> Result<OutboundMessage, DispatchError> {
        let spec = ctx.trigger.email();

        let from = Address::parse(&self.config.admin_address).map_err(|err| {
            DispatchError::Configuration(format!(
                "System admin address '{}' is invalid: {err}",
                self.config.admin_address
            ))
        })?;
        let mut message = OutboundMessage::new(from);

        message.set_header("X-Buildmail-Job", &ctx.build.project);
        if let Some(result) = ctx.build.result {
            message.set_header("X-Buildmail-Result", result.to_string());
        }

        let macros = vec![Macro::new("TRIGGER_NAME", ctx.trigger.display_name())];

        let mime =
            ContentRenderer::resolve_content_type(spec, publisher.content_type.as_deref(), &self.config);
        message.content_type = format!("{mime}; charset={}", self.config.effective_charset());

        message.subject = self
            .renderer
            .render_subject(spec, &publisher.default_subject, ctx, &macros)?;
        message.body =
            self.renderer
                .render_body(spec, &publisher.default_body, &mime, ctx, &macros)?;

        if publisher.save_output {
            self.renderer.save_output(&message.body, &mime, ctx);
        }

        if let Some(collector) = self.attachments.as_deref() {
            for pattern in [
                publisher.attachments_pattern.as_str(),
                spec.attachments_pattern.as_str(),
            ] {
                if !pattern.trim().is_empty() {
                    message.attachments.extend(collector.collect(ctx, pattern)?);
                }
            }
            if spec.attach_build_log || publisher.attach_build_log {
                ctx.debug("Request made to attach build log");
                let compress = spec.compress_build_log || publisher.compress_build_log;
                message.attachments.push(collector.build_log(ctx, compress)?);
            }
        }

        let set = recipients::resolve(spec, &publisher.recipient_list, ctx, &self.config);
        message.to = set.to;
        message.cc = set.cc;
        message.bcc = set.bcc;

        message.reply_to = recipients::resolve_reply_to(
            &publisher.reply_to,
            &spec.reply_to,
            ctx.env(),
            ctx.listener.as_ref(),
        );

        self.thread_onto_previous(&mut message, ctx);

        if let Some(list_id) = self.config.list_id.as_deref() {
            message.set_header("List-ID", list_id);
        }
        if self.config.precedence_bulk {
            message.set_header("Precedence", "bulk");
        }

        Ok(message)
    }

    /// Thread this notification as a reply to the previous build's, when
    /// that build did not succeed.
    fn thread_onto_previous(&self, message: &mut OutboundMessage, ctx: &DispatchContext) {
        let Some(previous) = ctx.build.previous_completed() else {
            return;
        };
        if previous.result == Some(BuildResult::Success) {
            return;
        }
        if let Some(message_id) = previous.message_id() {
            ctx.debug("Setting In-Reply-To since last build was not successful");
            message.set_header("In-Reply-To", message_id);
            message.set_header("References", message_id);
        }
    }

    async fn send(
        &self,
        message: OutboundMessage,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let trigger = ctx.trigger.display_name();
        let recipients = message.all_recipients();
        if recipients.is_empty() {
            ctx.listener
                .log("An attempt to send an e-mail to empty list of recipients, ignored.");
            return Ok(DispatchOutcome::new(trigger, DispatchStatus::Skipped));
        }

        let mut line = String::from("Sending email to:");
        for address in &recipients {
            line.push(' ');
            line.push_str(&address.to_string());
        }
        ctx.listener.log(&line);

        let mut attempt = 1;
        loop {
            match self.transport.send(&message).await {
                Ok(()) => {
                    ctx.build.record_message_id(message.message_id.clone());
                    let mut outcome = DispatchOutcome::new(trigger, DispatchStatus::Sent);
                    outcome.message_id = Some(message.message_id.clone());
                    outcome.sent = recipients;
                    return Ok(outcome);
                }
                Err(err @ TransportError::Transient(_)) if attempt < self.retry.max_attempts => {
                    tracing::debug!(error = %err, attempt, "Connection-level send failure");
                    ctx.listener.log(
                        "Socket error sending email, retrying once more in 10 seconds...",
                    );
                    tokio::time::sleep(Duration::from_secs(self.retry.backoff_secs)).await;
                    attempt += 1;
                }
                Err(TransportError::Transient(why)) => {
                    ctx.listener.error("Failed after second try sending email");
                    ctx.listener.error(&why);
                    return Ok(DispatchOutcome::new(trigger, DispatchStatus::Failed));
                }
                Err(TransportError::Partial {
                    message: why,
                    sent,
                    valid_unsent,
                    invalid,
                }) => {
                    ctx.listener.error(&why);
                    log_addresses(
                        ctx.listener.as_ref(),
                        "Successfully sent to the following addresses:",
                        &sent,
                    );
                    log_addresses(
                        ctx.listener.as_ref(),
                        "Error sending to the following VALID addresses:",
                        &valid_unsent,
                    );
                    log_addresses(
                        ctx.listener.as_ref(),
                        "Error sending to the following INVALID addresses:",
                        &invalid,
                    );

                    let status = if sent.is_empty() {
                        DispatchStatus::Failed
                    } else {
                        ctx.build.record_message_id(message.message_id.clone());
                        DispatchStatus::Sent
                    };
                    let mut outcome = DispatchOutcome::new(trigger, status);
                    if !sent.is_empty() {
                        outcome.message_id = Some(message.message_id.clone());
                    }
                    outcome.sent = sent;
                    outcome.valid_unsent = valid_unsent;
                    outcome.invalid = invalid;
                    return Ok(outcome);
                }
                Err(TransportError::Fatal(why)) => {
                    ctx.listener.error(&why);
                    return Ok(DispatchOutcome::new(trigger, DispatchStatus::Failed));
                }
            }
        }
    }
}

impl std::fmt::Debug for MailDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailDispatcher")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn log_addresses(listener: &dyn BuildListener, heading: &str, addresses: &[Address]) {
    if addresses.is_empty() {
        return;
    }
    let mut line = String::from(heading);
    for address in addresses {
        line.push(' ');
        line.push_str(&address.to_string());
    }
    listener.error(&line);
}
