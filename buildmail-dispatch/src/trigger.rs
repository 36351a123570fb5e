//! Email triggers and their evaluation against a build.
//!
//! A trigger is a named predicate bound to a build phase, carrying the
//! [`EmailSpec`] that shapes the notification it produces and the list of
//! other trigger names it supersedes when both fire. New trigger kinds
//! implement [`EmailTrigger`] and register with the publisher; the
//! standard kinds the pipeline ships cover the usual outcomes.

use std::sync::Arc;

use buildmail_common::{
    build::{Build, BuildResult, Phase},
    listener::BuildListener,
};
use serde::{Deserialize, Serialize};

use crate::recipients::RecipientProvider;

/// Content type selector on an [`EmailSpec`].
///
/// `Project` defers to the project's selection, `Default` to the
/// administrator default; the remaining variants are concrete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Project,
    Default,
    Plain,
    Html,
}

impl ContentType {
    /// The concrete MIME type, if this selector names one.
    #[must_use]
    pub const fn mime(self) -> Option<&'static str> {
        match self {
            Self::Plain => Some("text/plain"),
            Self::Html => Some("text/html"),
            Self::Project | Self::Default => None,
        }
    }
}

/// The template/recipient/attachment configuration attached to one trigger.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmailSpec {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub content_type: ContentType,
    /// Comma-separated recipient tokens, possibly `cc:`/`bcc:` prefixed,
    /// with `$VAR` environment references
    #[serde(default)]
    pub recipient_list: String,
    #[serde(skip, default)]
    pub recipient_providers: Vec<Arc<dyn RecipientProvider>>,
    #[serde(default)]
    pub reply_to: String,
    #[serde(default)]
    pub attachments_pattern: String,
    #[serde(default)]
    pub attach_build_log: bool,
    #[serde(default)]
    pub compress_build_log: bool,
}

impl Default for EmailSpec {
    fn default() -> Self {
        Self {
            subject: crate::content::PROJECT_DEFAULT_SUBJECT.to_string(),
            body: crate::content::PROJECT_DEFAULT_BODY.to_string(),
            content_type: ContentType::Project,
            recipient_list: crate::recipients::PROJECT_RECIPIENTS_TOKEN.to_string(),
            recipient_providers: Vec::new(),
            reply_to: String::new(),
            attachments_pattern: String::new(),
            attach_build_log: false,
            compress_build_log: false,
        }
    }
}

impl std::fmt::Debug for EmailSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSpec")
            .field("subject", &self.subject)
            .field("content_type", &self.content_type)
            .field("recipient_list", &self.recipient_list)
            .field("recipient_providers", &self.recipient_providers.len())
            .field("reply_to", &self.reply_to)
            .field("attachments_pattern", &self.attachments_pattern)
            .field("attach_build_log", &self.attach_build_log)
            .field("compress_build_log", &self.compress_build_log)
            .finish_non_exhaustive()
    }
}

/// A named condition bound to a build phase and an [`EmailSpec`].
pub trait EmailTrigger: Send + Sync {
    /// Display name, the identity used for grouping and replacement.
    fn display_name(&self) -> &str;

    /// The build phase this trigger evaluates in.
    fn phase(&self) -> Phase {
        Phase::PostBuild
    }

    /// Whether this trigger fires for the given build.
    fn fires(&self, build: &Build) -> bool;

    /// Display names of triggers this one supersedes when it also fires.
    fn replaces(&self) -> &[String] {
        &[]
    }

    /// The notification configuration for this trigger.
    fn email(&self) -> &EmailSpec;
}

macro_rules! standard_trigger {
    ($(#[$doc:meta])* $name:ident, $display:literal, |$build:ident| $fires:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            pub email: EmailSpec,
            pub replaces: Vec<String>,
        }

        impl $name {
            #[must_use]
            pub fn new(email: EmailSpec) -> Self {
                Self {
                    email,
                    replaces: Vec::new(),
                }
            }

            #[must_use]
            pub fn replacing(mut self, replaces: Vec<String>) -> Self {
                self.replaces = replaces;
                self
            }
        }

        impl EmailTrigger for $name {
            fn display_name(&self) -> &str {
                $display
            }

            fn fires(&self, $build: &Build) -> bool {
                $fires
            }

            fn replaces(&self) -> &[String] {
                &self.replaces
            }

            fn email(&self) -> &EmailSpec {
                &self.email
            }
        }
    };
}

standard_trigger!(
    /// Fires for every build regardless of outcome.
    AlwaysTrigger, "Always", |_build| true
);

standard_trigger!(
    /// Fires when the build failed.
    FailureTrigger, "Failure", |build| build.result == Some(BuildResult::Failure)
);

standard_trigger!(
    /// Fires when the build is unstable.
    UnstableTrigger, "Unstable", |build| build.result == Some(BuildResult::Unstable)
);

standard_trigger!(
    /// Fires when the build succeeded.
    SuccessTrigger, "Success", |build| build.result == Some(BuildResult::Success)
);

standard_trigger!(
    /// Fires when the outcome differs from the previous completed build.
    StatusChangedTrigger, "Status Changed", |build| build.status_changed()
);

standard_trigger!(
    /// Fires when a previously broken build succeeds again.
    FixedTrigger, "Fixed", |build| {
        build.result == Some(BuildResult::Success)
            && build.previous_completed().is_some_and(|previous| {
                matches!(
                    previous.result,
                    Some(BuildResult::Failure | BuildResult::Unstable)
                )
            })
    }
);

/// Fires before the build runs, unconditionally.
#[derive(Debug, Clone, Default)]
pub struct PreBuildTrigger {
    pub email: EmailSpec,
    pub replaces: Vec<String>,
}

impl PreBuildTrigger {
    #[must_use]
    pub fn new(email: EmailSpec) -> Self {
        Self {
            email,
            replaces: Vec::new(),
        }
    }
}

impl EmailTrigger for PreBuildTrigger {
    fn display_name(&self) -> &str {
        "Before Build"
    }

    fn phase(&self) -> Phase {
        Phase::PreBuild
    }

    fn fires(&self, _build: &Build) -> bool {
        true
    }

    fn replaces(&self) -> &[String] {
        &self.replaces
    }

    fn email(&self) -> &EmailSpec {
        &self.email
    }
}

/// The triggers that fired for one build and phase, grouped by display
/// name in first-fired order.
#[derive(Clone, Default)]
pub struct TriggeredSet {
    groups: Vec<(String, Vec<Arc<dyn EmailTrigger>>)>,
}

impl TriggeredSet {
    /// Record a fired trigger under its display name, preserving the
    /// order in which names first fired.
    pub fn insert(&mut self, trigger: Arc<dyn EmailTrigger>) {
        let name = trigger.display_name();
        if let Some((_, group)) = self.groups.iter_mut().find(|(n, _)| n == name) {
            group.push(trigger);
        } else {
            self.groups.push((name.to_string(), vec![trigger]));
        }
    }

    /// Remove the group under `name`. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.groups.len();
        self.groups.retain(|(n, _)| n != name);
        self.groups.len() != before
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Arc<dyn EmailTrigger>]> {
        self.groups
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, group)| group.as_slice())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Iterate groups in first-fired order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Arc<dyn EmailTrigger>])> {
        self.groups
            .iter()
            .map(|(name, group)| (name.as_str(), group.as_slice()))
    }

    /// The group names in first-fired order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.groups.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl std::fmt::Debug for TriggeredSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.groups
                    .iter()
                    .map(|(name, group)| (name, group.len())),
            )
            .finish()
    }
}

/// Result of evaluating the configured triggers against one build.
#[derive(Debug)]
pub enum Evaluation {
    /// At least one group survived replacement resolution.
    Fired(TriggeredSet),
    /// No trigger fired at all.
    Nothing,
    /// Triggers fired, but replacement removed every group.
    Circular,
}

/// Evaluate the configured triggers against a build for one phase.
///
/// Fired triggers are grouped by display name in configuration order,
/// then every group named in any fired trigger's replacement list is
/// removed. When replacement removes everything that fired, the
/// evaluation is a detected circular replacement, distinct from nothing
/// having fired.
pub fn evaluate(
    triggers: &[Arc<dyn EmailTrigger>],
    build: &Build,
    phase: Phase,
    listener: &dyn BuildListener,
) -> Evaluation {
    let mut triggered = TriggeredSet::default();
    let mut any_fired = false;

    for trigger in triggers {
        if trigger.phase() == phase && trigger.fires(build) {
            listener.log(&format!(
                "Email was triggered for: {}",
                trigger.display_name()
            ));
            triggered.insert(Arc::clone(trigger));
            any_fired = true;
        }
    }

    // The replacement set is computed over everything that fired, before
    // any removal, so a replaced trigger still contributes its own list.
    let mut replaced: Vec<String> = Vec::new();
    for (_, group) in triggered.iter() {
        for trigger in group {
            for name in trigger.replaces() {
                if !replaced.contains(name) {
                    replaced.push(name.clone());
                }
            }
        }
    }

    for name in &replaced {
        if triggered.remove(name) {
            listener.log(&format!(
                "Trigger {name} was overridden by another trigger and will not send an email."
            ));
        }
    }

    if any_fired && triggered.is_empty() {
        listener.log(
            "There is a circular trigger replacement with the email triggers.  No email is sent.",
        );
        Evaluation::Circular
    } else if triggered.is_empty() {
        listener.log("No emails were triggered.");
        Evaluation::Nothing
    } else {
        Evaluation::Fired(triggered)
    }
}
