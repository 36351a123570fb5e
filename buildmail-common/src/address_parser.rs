//! Strict email mailbox parser for recipient-list tokens.
//!
//! Tokens come from comma-separated recipient lists configured per trigger
//! (or from the emergency-reroute override), so the accepted shapes are the
//! ones that configuration realistically contains:
//!
//! ```text
//! user@example.com
//! first.last@example.com
//! "quoted local"@example.com
//! Some Name <user@example.com>
//! <user@example.com>
//! ```
//!
//! A display name, when present, is dropped; only the mailbox survives.
//!
//! # Size Constraints
//!
//! - Maximum token length: 256 octets
//! - Maximum local-part: 64 octets
//! - Maximum domain: 255 octets

/// Result type for address parsing
pub type Result<T> = std::result::Result<T, AddressError>;

/// Errors that can occur while parsing one recipient token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,
    #[error("Address exceeds 256 octets")]
    TooLong,
    #[error("Local-part exceeds 64 octets")]
    LocalPartTooLong,
    #[error("Domain exceeds 255 octets")]
    DomainTooLong,
    #[error("Missing '@' separator in mailbox")]
    MissingAtSign,
    #[error("Missing closing angle bracket '>'")]
    MissingCloseBracket,
    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("Unclosed quoted string in local-part")]
    UnclosedQuotedString,
}

/// A parsed mailbox (local-part@domain)
#[derive(Debug, Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Mailbox {
    /// The local part (before @)
    pub local_part: String,
    /// The domain (after @)
    pub domain: String,
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

/// Parse one recipient token into a [`Mailbox`].
///
/// Leading and trailing whitespace is tolerated. An optional display name
/// before an angle-bracketed mailbox is discarded.
///
/// # Errors
///
/// Returns `AddressError` if the token does not contain a valid mailbox.
pub fn parse_mailbox(input: &str) -> Result<Mailbox> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }

    if trimmed.len() > 256 {
        return Err(AddressError::TooLong);
    }

    let mailbox = strip_display_name(trimmed)?;

    let at_pos = find_unquoted_at(mailbox)?;
    let local_part = &mailbox[..at_pos];
    let domain = &mailbox[at_pos + 1..];

    if local_part.len() > 64 {
        return Err(AddressError::LocalPartTooLong);
    }
    if domain.len() > 255 {
        return Err(AddressError::DomainTooLong);
    }

    Ok(Mailbox {
        local_part: parse_local_part(local_part)?,
        domain: parse_domain(domain)?,
    })
}

/// Reduce `Name <mailbox>` or `<mailbox>` to the bare mailbox.
fn strip_display_name(input: &str) -> Result<&str> {
    let Some(open) = input.find('<') else {
        return Ok(input);
    };

    if !input.ends_with('>') {
        return Err(AddressError::MissingCloseBracket);
    }

    let inner = input[open + 1..input.len() - 1].trim();
    if inner.is_empty() {
        Err(AddressError::Empty)
    } else {
        Ok(inner)
    }
}

/// Find the position of '@' that is not inside a quoted string
fn find_unquoted_at(input: &str) -> Result<usize> {
    let mut in_quotes = false;
    let mut prev_was_backslash = false;

    for (i, ch) in input.char_indices() {
        if ch == '"' && !prev_was_backslash {
            in_quotes = !in_quotes;
        } else if ch == '@' && !in_quotes {
            return Ok(i);
        }

        prev_was_backslash = ch == '\\' && !prev_was_backslash;
    }

    Err(AddressError::MissingAtSign)
}

/// Parse a local-part: dot-string or quoted-string
fn parse_local_part(input: &str) -> Result<String> {
    if input.is_empty() {
        return Err(AddressError::InvalidLocalPart(
            "Empty local-part".to_string(),
        ));
    }

    if input.starts_with('"') {
        parse_quoted_string(input)
    } else {
        parse_dot_string(input)
    }
}

/// Parse a dot-string: atoms separated by single dots
fn parse_dot_string(input: &str) -> Result<String> {
    if input.starts_with('.') || input.ends_with('.') {
        return Err(AddressError::InvalidLocalPart(
            "Dot-string cannot start or end with '.'".to_string(),
        ));
    }

    if input.contains("..") {
        return Err(AddressError::InvalidLocalPart(
            "Dot-string cannot contain consecutive dots".to_string(),
        ));
    }

    for ch in input.chars() {
        if ch != '.' && !is_atext(ch) {
            return Err(AddressError::InvalidLocalPart(format!(
                "Invalid character '{ch}' in atom"
            )));
        }
    }

    Ok(input.to_string())
}

/// Parse a quoted-string local part, keeping the quotes
fn parse_quoted_string(input: &str) -> Result<String> {
    if !input.ends_with('"') || input.len() < 2 {
        return Err(AddressError::UnclosedQuotedString);
    }

    let content = &input[1..input.len() - 1];

    let mut chars = content.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            // quoted-pair: backslash followed by any ASCII graphic
            match chars.next() {
                Some(next) if next.is_ascii_graphic() || next == ' ' => {}
                _ => return Err(AddressError::UnclosedQuotedString),
            }
        } else if ch == '"' {
            return Err(AddressError::InvalidLocalPart(
                "Unescaped quote inside quoted string".to_string(),
            ));
        }
    }

    Ok(input.to_string())
}

/// Parse a domain: sub-domains separated by dots, LDH rule per label
fn parse_domain(input: &str) -> Result<String> {
    if input.is_empty() {
        return Err(AddressError::InvalidDomain("Empty domain".to_string()));
    }

    if input.starts_with('.') || input.ends_with('.') {
        return Err(AddressError::InvalidDomain(
            "Domain cannot start or end with '.'".to_string(),
        ));
    }

    if input.contains("..") {
        return Err(AddressError::InvalidDomain(
            "Domain cannot contain consecutive dots".to_string(),
        ));
    }

    for label in input.split('.') {
        parse_label(label)?;
    }

    Ok(input.to_string())
}

/// Validate one domain label: starts and ends with a letter or digit,
/// hyphens allowed in the middle
fn parse_label(input: &str) -> Result<()> {
    if input
        .chars()
        .next()
        .is_none_or(|first| !first.is_ascii_alphanumeric())
    {
        return Err(AddressError::InvalidDomain(format!(
            "Label '{input}' must start with letter or digit"
        )));
    }

    if input
        .chars()
        .last()
        .is_none_or(|last| !last.is_ascii_alphanumeric())
    {
        return Err(AddressError::InvalidDomain(format!(
            "Label '{input}' must end with letter or digit"
        )));
    }

    for ch in input.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '-' {
            return Err(AddressError::InvalidDomain(format!(
                "Invalid character '{ch}' in label"
            )));
        }
    }

    Ok(())
}

/// Check if character is valid atext (atom text)
#[inline]
const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}
