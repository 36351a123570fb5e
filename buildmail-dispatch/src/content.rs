//! Subject and body rendering.
//!
//! A trigger's templates may defer to the project's defaults through the
//! `$PROJECT_DEFAULT_SUBJECT` / `$PROJECT_DEFAULT_CONTENT` indirection
//! tokens; the resolved template then goes through the injected
//! [`TemplateEngine`]. HTML bodies pass through the [`HtmlPostProcessor`]
//! so hosts can inline stylesheets before sending.

use std::io::Write;

use buildmail_common::config::DispatchConfig;
use rand::Rng;

use crate::{
    context::DispatchContext,
    trigger::{ContentType, EmailSpec},
};

/// Fallback subject when neither the trigger nor the project sets one.
pub const DEFAULT_SUBJECT_TEMPLATE: &str = "$PROJECT_NAME - Build # $BUILD_NUMBER - $BUILD_STATUS!";

/// Fallback body when neither the trigger nor the project sets one.
pub const DEFAULT_BODY_TEMPLATE: &str = "$PROJECT_NAME - Build # $BUILD_NUMBER - $BUILD_STATUS:\n\nCheck console output at $BUILD_URL to view the results.";

/// Indirection token: use the project's default subject.
pub const PROJECT_DEFAULT_SUBJECT: &str = "$PROJECT_DEFAULT_SUBJECT";

/// Indirection token: use the project's default body.
pub const PROJECT_DEFAULT_BODY: &str = "$PROJECT_DEFAULT_CONTENT";

/// One extra token/value pair made available to the template engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub name: String,
    pub value: String,
}

impl Macro {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Rendering failure from the injected engine.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Template failed to render: {0}")]
    Template(String),
}

/// Expands templates against a build. Hosts bring their own token
/// language; the pipeline only hands over the context and extra macros.
pub trait TemplateEngine: Send + Sync {
    /// Render `template` for the notification in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] when the template cannot be expanded.
    fn render(
        &self,
        template: &str,
        ctx: &DispatchContext,
        macros: &[Macro],
    ) -> Result<String, RenderError>;
}

/// Rewrites a rendered HTML body before it is sent.
pub trait HtmlPostProcessor: Send + Sync {
    fn inline_css(&self, html: String, ctx: &DispatchContext) -> String;
}

/// Post-processor that leaves the body untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPostProcessor;

impl HtmlPostProcessor for IdentityPostProcessor {
    fn inline_css(&self, html: String, _ctx: &DispatchContext) -> String {
        html
    }
}

/// Renders one notification's subject, body and content type.
pub struct ContentRenderer {
    engine: Box<dyn TemplateEngine>,
    post: Box<dyn HtmlPostProcessor>,
}

impl ContentRenderer {
    #[must_use]
    pub fn new(engine: Box<dyn TemplateEngine>) -> Self {
        Self {
            engine,
            post: Box::new(IdentityPostProcessor),
        }
    }

    #[must_use]
    pub fn with_post_processor(mut self, post: Box<dyn HtmlPostProcessor>) -> Self {
        self.post = post;
        self
    }

    /// Resolve a trigger template through the project-default
    /// indirection. A blank trigger template also defers to the project;
    /// a blank project default falls back to the built-in template.
    #[must_use]
    pub fn resolve_indirection<'a>(
        template: &'a str,
        project_default: &'a str,
        builtin: &'a str,
    ) -> &'a str {
        let template = if template.trim().is_empty()
            || template == PROJECT_DEFAULT_SUBJECT
            || template == PROJECT_DEFAULT_BODY
        {
            project_default
        } else {
            template
        };
        if template.trim().is_empty() {
            builtin
        } else {
            template
        }
    }

    /// The effective MIME type for one notification: the trigger's
    /// concrete choice, else the project's, else the administrator
    /// default, else `text/plain`.
    #[must_use]
    pub fn resolve_content_type(
        spec: &EmailSpec,
        project_content_type: Option<&str>,
        config: &DispatchConfig,
    ) -> String {
        if let Some(mime) = spec.content_type.mime() {
            return mime.to_string();
        }
        if spec.content_type == ContentType::Project {
            if let Some(mime) = project_content_type.filter(|m| !m.trim().is_empty()) {
                return mime.to_string();
            }
        }
        config
            .default_content_type
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or("text/plain")
            .to_string()
    }

    /// Render an arbitrary template, such as a gate-script source.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] when the engine rejects the template.
    pub fn render(
        &self,
        template: &str,
        ctx: &DispatchContext,
        macros: &[Macro],
    ) -> Result<String, RenderError> {
        self.engine.render(template, ctx, macros)
    }

    /// Render the subject for one notification.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] when the engine rejects the template.
    pub fn render_subject(
        &self,
        spec: &EmailSpec,
        project_default: &str,
        ctx: &DispatchContext,
        macros: &[Macro],
    ) -> Result<String, RenderError> {
        let template =
            Self::resolve_indirection(&spec.subject, project_default, DEFAULT_SUBJECT_TEMPLATE);
        self.engine.render(template, ctx, macros)
    }

    /// Render the body for one notification, post-processing HTML.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] when the engine rejects the template.
    pub fn render_body(
        &self,
        spec: &EmailSpec,
        project_default: &str,
        mime: &str,
        ctx: &DispatchContext,
        macros: &[Macro],
    ) -> Result<String, RenderError> {
        let template =
            Self::resolve_indirection(&spec.body, project_default, DEFAULT_BODY_TEMPLATE);
        let body = self.engine.render(template, ctx, macros)?;
        if mime.starts_with("text/html") {
            Ok(self.post.inline_css(body, ctx))
        } else {
            Ok(body)
        }
    }

    /// Save the rendered body into the build's workspace for inspection.
    ///
    /// Failures are reported to the build log and otherwise ignored; a
    /// missing workspace is not an error.
    pub fn save_output(&self, body: &str, mime: &str, ctx: &DispatchContext) {
        let Some(workspace) = ctx.build.workspace.as_ref() else {
            return;
        };

        let extension = if mime.starts_with("text/html") {
            ".html"
        } else {
            ".txt"
        };
        let nonce: u32 = rand::rng().random_range(0..100_000);
        let filename = format!(
            "{}-{}{}{}",
            ctx.trigger.display_name(),
            ctx.build.id,
            nonce,
            extension
        );
        let path = workspace.join(filename);

        let written = std::fs::File::create(&path)
            .and_then(|mut file| file.write_all(body.as_bytes()));
        if let Err(err) = written {
            ctx.listener.error(&format!(
                "Error trying to save email output to file. {err}"
            ));
        }
    }
}

impl std::fmt::Debug for ContentRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentRenderer").finish_non_exhaustive()
    }
}
