//! Module dedicated to the canonical wire form of appended messages.
//!
//! Saving a copy of a sent message (and similar flows) appends a raw
//! message to a remote mailbox. The wire form expected by the append
//! verb is a minimal header block followed by a blank line and the
//! body, using CRLF line endings. Building it is delegated to
//! `mail-builder`.

use chrono::{DateTime, FixedOffset};
use mail_builder::{
    headers::{address::Address, raw::Raw},
    MessageBuilder,
};

use super::{Error, Result};

/// An outgoing message to be appended to a remote mailbox.
#[derive(Clone, Debug, Default)]
pub struct OutgoingMessage {
    /// The sender address.
    pub from: String,

    /// The recipient addresses.
    pub to: Vec<String>,

    /// The optional carbon-copy addresses.
    pub cc: Vec<String>,

    /// The Subject header.
    pub subject: String,

    /// The Date header.
    pub date: DateTime<FixedOffset>,

    /// The Message-ID header.
    pub message_id: String,

    /// The optional In-Reply-To header, for replies.
    pub in_reply_to: Option<String>,

    /// The optional References header, for threading.
    pub references: Option<String>,

    /// The plain text body.
    pub body: String,
}

impl OutgoingMessage {
    /// Build the canonical CRLF wire form of the message, ready to be
    /// passed to the append verb.
    pub fn to_raw(&self) -> Result<Vec<u8>> {
        let to = Address::new_list(
            self.to
                .iter()
                .map(|email| Address::new_address(None::<&str>, email))
                .collect(),
        );

        let mut builder = MessageBuilder::new()
            .from(Address::new_address(None::<&str>, &self.from))
            .to(to)
            .subject(&self.subject)
            .header("Date", Raw::new(self.date.to_rfc2822()))
            .header("Message-ID", Raw::new(&self.message_id));

        if !self.cc.is_empty() {
            builder = builder.cc(Address::new_list(
                self.cc
                    .iter()
                    .map(|email| Address::new_address(None::<&str>, email))
                    .collect(),
            ));
        }

        if let Some(in_reply_to) = &self.in_reply_to {
            builder = builder.header("In-Reply-To", Raw::new(in_reply_to));
        }

        if let Some(references) = &self.references {
            builder = builder.header("References", Raw::new(references));
        }

        builder = builder.text_body(&self.body);

        builder.write_to_vec().map_err(Error::BuildMessageError)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{flag::Flags, message::Message};

    fn outgoing() -> OutgoingMessage {
        OutgoingMessage {
            from: "alice@example.com".into(),
            to: vec!["bob@example.com".into()],
            cc: vec![],
            subject: "Hello".into(),
            date: FixedOffset::east_opt(3600)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
                .unwrap(),
            message_id: "<out@example.com>".into(),
            in_reply_to: Some("<abc@example.com>".into()),
            references: None,
            body: "Hi Bob".into(),
        }
    }

    #[test]
    fn raw_form_uses_crlf_and_blank_line_separator() {
        let raw = outgoing().to_raw().unwrap();
        let text = String::from_utf8(raw).unwrap();

        assert!(text.contains("\r\n\r\n"));
        assert!(!text.replace("\r\n", "").contains('\n'));
        assert!(text.contains("Subject: Hello\r\n"));
        assert!(text.contains("Message-ID: <out@example.com>\r\n"));
    }

    #[test]
    fn raw_form_parses_back() {
        let raw = outgoing().to_raw().unwrap();
        let msg = Message::parse("account", "folder", 1, Flags::default(), 0, &raw).unwrap();

        assert_eq!(msg.subject, "Hello");
        assert_eq!(msg.message_id, "<out@example.com>");
        assert_eq!(msg.from.unwrap().email, "alice@example.com");
        assert_eq!(msg.in_reply_to.as_deref(), Some("<abc@example.com>"));
    }
}
