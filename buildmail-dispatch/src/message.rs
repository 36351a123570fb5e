//! The assembled outbound notification message.
//!
//! This is the envelope the pipeline builds, the gate script may mutate,
//! and the transport ultimately sends. MIME/multipart encoding is the
//! transport's concern; this model stays at the header/recipient/body
//! level the pipeline reasons about.

use buildmail_common::address::{Address, AddressList};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachments::Attachment;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: Address,
    pub to: AddressList,
    pub cc: AddressList,
    pub bcc: AddressList,
    pub reply_to: AddressList,
    pub subject: String,
    pub body: String,
    /// Full content type including charset, e.g. `text/plain; charset=UTF-8`
    pub content_type: String,
    /// Extra headers in insertion order (trace, threading, list headers)
    pub headers: Vec<(String, String)>,
    pub attachments: Vec<Attachment>,
    pub sent_at: DateTime<Utc>,
    /// Generated message id, recorded on the build after a successful send
    pub message_id: String,
}

impl OutboundMessage {
    /// Create an empty message from the given sender, stamped with the
    /// current time and a fresh message id.
    #[must_use]
    pub fn new(from: Address) -> Self {
        Self {
            from,
            to: AddressList::default(),
            cc: AddressList::default(),
            bcc: AddressList::default(),
            reply_to: AddressList::default(),
            subject: String::new(),
            body: String::new(),
            content_type: String::new(),
            headers: Vec::new(),
            attachments: Vec::new(),
            sent_at: Utc::now(),
            message_id: format!("<{}@buildmail>", ulid::Ulid::new()),
        }
    }

    /// Set a header, replacing any existing value under the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        for (existing, existing_value) in &mut self.headers {
            if existing.eq_ignore_ascii_case(name) {
                *existing_value = value;
                return;
            }
        }
        self.headers.push((name.to_string(), value));
    }

    /// Look up a header by name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All recipients in to, cc, bcc order.
    #[must_use]
    pub fn all_recipients(&self) -> Vec<Address> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .cloned()
            .collect()
    }

    /// Drop every recipient from all three collections.
    pub fn clear_recipients(&mut self) {
        self.to.clear();
        self.cc.clear();
        self.bcc.clear();
    }
}
