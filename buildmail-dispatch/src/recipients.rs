//! Recipient resolution.
//!
//! Turns the trigger's recipient providers and configured recipient list
//! into the deduplicated to/cc/bcc sets for one notification. Resolution
//! expands `$VAR` references from the build environment, honors `cc:` and
//! `bcc:` prefixes, collapses case-variant duplicates, and removes
//! addresses matching the administrator's exclusion patterns. When the
//! emergency reroute is active it short-circuits everything else.

use buildmail_common::{
    EnvVars,
    address::{Address, AddressList},
    config::DispatchConfig,
    listener::BuildListener,
};

use crate::{context::DispatchContext, trigger::EmailSpec};

/// Token in a trigger's recipient list that expands to the project's
/// default recipient list.
pub const PROJECT_RECIPIENTS_TOKEN: &str = "$DEFAULT_RECIPIENTS";

/// Which collection a recipient lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

/// The deduplicated recipient collections for one notification.
///
/// An address already present in any collection is never added again,
/// whichever collection the duplicate was bound for. Comparison is by
/// normalized form, so case variants collapse to the first-seen spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    pub to: AddressList,
    pub cc: AddressList,
    pub bcc: AddressList,
}

impl RecipientSet {
    /// Add an address to the given collection unless it is already
    /// present anywhere in the set.
    pub fn add(&mut self, address: Address, kind: RecipientKind) {
        if self.contains(&address) {
            return;
        }
        match kind {
            RecipientKind::To => self.to.push(address),
            RecipientKind::Cc => self.cc.push(address),
            RecipientKind::Bcc => self.bcc.push(address),
        }
    }

    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.to.contains(address) || self.cc.contains(address) || self.bcc.contains(address)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty()
    }

    /// Remove every address whose normalized form matches any of the
    /// given `*` patterns, from all three collections.
    pub fn exclude(&mut self, patterns: &[String], listener: &dyn BuildListener) {
        for list in [&mut self.to, &mut self.cc, &mut self.bcc] {
            list.retain(|address| {
                let normalized = address.normalized();
                let excluded = patterns
                    .iter()
                    .any(|pattern| wildcard_match(&pattern.to_ascii_lowercase(), &normalized));
                if excluded {
                    listener.log(&format!("Excluding recipient: {address}"));
                }
                !excluded
            });
        }
    }
}

/// Contributes recipients derived from the build, such as committers,
/// requesters, or upstream culprits. Hosts implement this against their
/// own change data.
pub trait RecipientProvider: Send + Sync {
    fn contribute(&self, ctx: &DispatchContext, into: &mut RecipientSet);
}

/// Expand `$VAR` and `${VAR}` references from the environment. Unknown
/// variables expand to nothing.
#[must_use]
pub fn expand_env(input: &str, env: &EnvVars) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    if let Some(value) = env.get(&name) {
                        out.push_str(value);
                    }
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some(&(_, c)) if c.is_ascii_alphanumeric() || c == '_' => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Some(value) = env.get(&name) {
                    out.push_str(value);
                }
            }
            _ => out.push('$'),
        }
    }

    out
}

/// Parse a comma-separated recipient list into the set.
///
/// Tokens may carry a case-insensitive `cc:` or `bcc:` prefix. A token
/// that fails to parse is reported to the listener and skipped; the rest
/// of the list still resolves.
pub fn add_from_recipient_list(
    list: &str,
    env: &EnvVars,
    into: &mut RecipientSet,
    listener: &dyn BuildListener,
) {
    let expanded = expand_env(list, env);
    for token in expanded.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let (token, kind) = strip_kind_prefix(token);
        match Address::parse(token) {
            Ok(address) => into.add(address, kind),
            Err(err) => {
                listener.error(&format!("Failed to parse address '{token}': {err}"));
            }
        }
    }
}

fn strip_kind_prefix(token: &str) -> (&str, RecipientKind) {
    let lower = token.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("bcc:") {
        (token[token.len() - rest.len()..].trim_start(), RecipientKind::Bcc)
    } else if let Some(rest) = lower.strip_prefix("cc:") {
        (token[token.len() - rest.len()..].trim_start(), RecipientKind::Cc)
    } else {
        (token, RecipientKind::To)
    }
}

/// Resolve the full recipient set for one notification.
///
/// With the emergency reroute active, the reroute list is the entire
/// result and providers, the trigger's recipient list, and exclusion
/// patterns are all skipped. Otherwise providers contribute first, then
/// the trigger's recipient list with [`PROJECT_RECIPIENTS_TOKEN`]
/// expanded to `project_recipient_list`, and exclusion patterns are
/// applied last over the combined result.
#[must_use]
pub fn resolve(
    spec: &EmailSpec,
    project_recipient_list: &str,
    ctx: &DispatchContext,
    config: &DispatchConfig,
) -> RecipientSet {
    let mut set = RecipientSet::default();

    if config.has_emergency_reroute() {
        ctx.debug("Emergency reroute turned on");
        ctx.debug(&format!(
            "Emergency reroute is set to: {}",
            config.emergency_reroute
        ));
        add_from_recipient_list(
            &config.emergency_reroute,
            ctx.env(),
            &mut set,
            ctx.listener.as_ref(),
        );
        return set;
    }

    for provider in &spec.recipient_providers {
        provider.contribute(ctx, &mut set);
    }
    let list = spec
        .recipient_list
        .replace(PROJECT_RECIPIENTS_TOKEN, project_recipient_list);
    add_from_recipient_list(&list, ctx.env(), &mut set, ctx.listener.as_ref());

    set.exclude(&config.excluded_recipients, ctx.listener.as_ref());
    set
}

/// Resolve the reply-to list: the project's entries first, then the
/// trigger's, deduplicated. Exclusion patterns do not apply here.
#[must_use]
pub fn resolve_reply_to(
    project_reply_to: &str,
    spec_reply_to: &str,
    env: &EnvVars,
    listener: &dyn BuildListener,
) -> AddressList {
    let mut set = RecipientSet::default();
    add_from_recipient_list(project_reply_to, env, &mut set, listener);
    add_from_recipient_list(spec_reply_to, env, &mut set, listener);
    set.to
}

/// Glob match where `*` spans any run of characters. Everything else is
/// literal.
#[must_use]
pub fn wildcard_match(pattern: &str, input: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == input,
        Some((prefix, rest)) => {
            let Some(remaining) = input.strip_prefix(prefix) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            (0..=remaining.len())
                .filter(|i| remaining.is_char_boundary(*i))
                .any(|i| wildcard_match(rest, &remaining[i..]))
        }
    }
}
