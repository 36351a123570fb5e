use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
    ops::{Deref, DerefMut},
};

use serde::{Deserialize, Serialize};

use crate::address_parser::{self, AddressError, Mailbox};

/// An email address with equality by normalized (case-folded) form.
///
/// Two addresses that differ only in letter case compare equal, so
/// recipient sets collapse `User@Example.COM` and `user@example.com`
/// into one entry while preserving the first-seen spelling for output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Address(pub Mailbox);

impl Address {
    /// Parse a single recipient token.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if the token is not a valid mailbox.
    pub fn parse(token: &str) -> Result<Self, AddressError> {
        address_parser::parse_mailbox(token).map(Self)
    }

    /// The normalized (lowercased) form used for equality and for
    /// matching exclusion patterns.
    #[must_use]
    pub fn normalized(&self) -> String {
        format!(
            "{}@{}",
            self.0.local_part.to_ascii_lowercase(),
            self.0.domain.to_ascii_lowercase()
        )
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.0.local_part, self.0.domain)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.local_part.eq_ignore_ascii_case(&other.0.local_part)
            && self.0.domain.eq_ignore_ascii_case(&other.0.domain)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl From<Mailbox> for Address {
    fn from(value: Mailbox) -> Self {
        Self(value)
    }
}

impl Deref for Address {
    type Target = Mailbox;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Address {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressList(pub Vec<Address>);

impl Display for AddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            Display::fmt(addr, f)?;
        }
        Ok(())
    }
}

impl From<Vec<Address>> for AddressList {
    fn from(value: Vec<Address>) -> Self {
        Self(value)
    }
}

impl Deref for AddressList {
    type Target = Vec<Address>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AddressList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
