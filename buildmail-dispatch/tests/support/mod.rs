//! Shared fakes for pipeline integration tests.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use buildmail_dispatch::{
    ContentRenderer, DispatchContext, GateRequest, GateResponse, Macro, MailTransport,
    OutboundMessage, RenderError, ScriptEngine, ScriptError, TemplateEngine, TransportError,
};
use parking_lot::Mutex;

/// Template engine that expands `$BUILD_STATUS`, `$PROJECT_NAME`,
/// `$BUILD_NUMBER`, `$BUILD_URL` and any extra macros.
pub struct FakeTemplateEngine;

impl TemplateEngine for FakeTemplateEngine {
    fn render(
        &self,
        template: &str,
        ctx: &DispatchContext,
        macros: &[Macro],
    ) -> Result<String, RenderError> {
        let status = ctx
            .build
            .result
            .map_or_else(|| "UNKNOWN".to_string(), |result| result.to_string());
        let mut out = template
            .replace("$PROJECT_NAME", &ctx.build.project)
            .replace("$BUILD_NUMBER", &ctx.build.number.to_string())
            .replace("$BUILD_STATUS", &status)
            .replace("$BUILD_URL", &ctx.build.url);
        for m in macros {
            out = out.replace(&format!("${}", m.name), &m.value);
        }
        Ok(out)
    }
}

pub fn renderer() -> ContentRenderer {
    ContentRenderer::new(Box::new(FakeTemplateEngine))
}

/// Transport that replays a scripted sequence of results and records
/// every message handed to it.
pub struct FakeTransport {
    results: Mutex<VecDeque<Result<(), TransportError>>>,
    pub sent: Mutex<Vec<OutboundMessage>>,
}

impl FakeTransport {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Replay the given results in order; once exhausted, succeed.
    pub fn scripted(results: Vec<Result<(), TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn deliveries(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MailTransport for FakeTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message.clone());
        self.results.lock().pop_front().unwrap_or(Ok(()))
    }
}

/// Collector that fabricates one part per pattern and a canned log.
pub struct FakeCollector;

impl buildmail_dispatch::AttachmentCollector for FakeCollector {
    fn collect(
        &self,
        _ctx: &DispatchContext,
        pattern: &str,
    ) -> Result<Vec<buildmail_dispatch::Attachment>, std::io::Error> {
        Ok(vec![buildmail_dispatch::Attachment {
            filename: pattern.to_string(),
            content_type: "application/octet-stream".to_string(),
            content: b"artifact".to_vec(),
        }])
    }

    fn build_log(
        &self,
        ctx: &DispatchContext,
        compress: bool,
    ) -> Result<buildmail_dispatch::Attachment, std::io::Error> {
        Ok(buildmail_dispatch::Attachment {
            filename: if compress {
                format!("build-{}.log.gz", ctx.build.id)
            } else {
                format!("build-{}.log", ctx.build.id)
            },
            content_type: "text/plain".to_string(),
            content: b"log".to_vec(),
        })
    }
}

/// Script engine that never runs; for publishers without a gate script.
pub struct NoScriptEngine;

#[async_trait]
impl ScriptEngine for NoScriptEngine {
    async fn execute(&self, request: GateRequest) -> Result<GateResponse, ScriptError> {
        Ok(GateResponse {
            cancel: false,
            message: request.message,
        })
    }
}

/// Script engine that cancels every send.
pub struct CancelEngine;

#[async_trait]
impl ScriptEngine for CancelEngine {
    async fn execute(&self, request: GateRequest) -> Result<GateResponse, ScriptError> {
        Ok(GateResponse {
            cancel: true,
            message: request.message,
        })
    }
}

/// Script engine that rewrites the subject and adds a recipient.
pub struct RewriteEngine;

#[async_trait]
impl ScriptEngine for RewriteEngine {
    async fn execute(&self, mut request: GateRequest) -> Result<GateResponse, ScriptError> {
        request.message.subject = format!("[gated] {}", request.message.subject);
        if let Ok(address) = buildmail_dispatch::Address::parse("added-by-script@example.com") {
            request.message.to.push(address);
        }
        Ok(GateResponse {
            cancel: false,
            message: request.message,
        })
    }
}
