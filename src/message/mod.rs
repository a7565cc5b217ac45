//! Module dedicated to message management.
//!
//! The [`Message`] entity is the cached representation of one remote
//! message. Parsing the raw wire form into a structured message is
//! delegated to `mail-parser` and treated as a black box: a message
//! that cannot be parsed is skipped by the sync engine, never fatal.

pub mod append;
mod error;

use chrono::{DateTime, FixedOffset, TimeZone};
use mail_parser::{MessageParser, MimeHeaders};
use tracing::warn;

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{account::AccountId, flag::Flags, folder::FolderId};

/// A mailbox participant, either sender or recipient.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Address {
    /// The optional display name.
    pub name: Option<String>,

    /// The email address.
    pub email: String,
}

impl Address {
    pub fn new(name: Option<impl ToString>, email: impl ToString) -> Self {
        Self {
            name: name.map(|name| name.to_string()),
            email: email.to_string(),
        }
    }
}

/// Attachment metadata extracted from a parsed message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Attachment {
    /// The attachment file name, when present.
    pub name: String,

    /// The attachment MIME type.
    pub mime: String,

    /// The attachment size in bytes.
    pub size: u32,
}

/// The message entity, as persisted by the store.
///
/// A message belongs to exactly one folder. Its `message_id` is
/// unique per account while its `uid` is only unique within its
/// folder, monotonically increasing as assigned by the server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    /// The identifier of the account owning the message.
    pub account_id: AccountId,

    /// The identifier of the folder containing the message.
    pub folder_id: FolderId,

    /// The server-assigned UID, unique within the folder.
    pub uid: u32,

    /// The Message-ID header, unique within the account.
    pub message_id: String,

    /// The flags attached to the message.
    pub flags: Flags,

    /// The message size in bytes, as reported by the server.
    pub size: u32,

    /// The Subject header.
    pub subject: String,

    /// The sender address.
    pub from: Option<Address>,

    /// The recipient addresses.
    pub to: Vec<Address>,

    /// The Date header.
    pub date: Option<DateTime<FixedOffset>>,

    /// The plain text body, when present.
    pub text_body: Option<String>,

    /// The HTML body, when present.
    pub html_body: Option<String>,

    /// The attachment metadata list.
    pub attachments: Vec<Attachment>,

    /// The In-Reply-To header, used for threading.
    pub in_reply_to: Option<String>,

    /// The References header, used for threading.
    pub references: Option<String>,
}

impl Message {
    /// Return `true` if the message has been read.
    pub fn is_seen(&self) -> bool {
        self.flags.is_seen()
    }

    /// Parse a message from its raw wire form.
    ///
    /// The raw form comes straight from a full fetch on the remote
    /// server. Messages without a Message-ID header get a synthetic
    /// one derived from their folder and UID, so they can still be
    /// deduplicated by the (account, message id) key.
    pub fn parse(
        account_id: impl ToString,
        folder_id: impl ToString,
        uid: u32,
        flags: Flags,
        size: u32,
        raw: &[u8],
    ) -> Result<Message> {
        let folder_id = folder_id.to_string();

        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or(Error::ParseMessageError(uid))?;

        let message_id = parsed
            .message_id()
            .map(|id| format!("<{id}>"))
            .unwrap_or_else(|| format!("<{folder_id}#{uid}@local>"));

        let from = parsed
            .from()
            .and_then(|addrs| addrs.first())
            .and_then(|addr| {
                let email = addr.address.as_ref()?;
                Some(Address::new(addr.name.as_ref(), email))
            });

        let to = parsed
            .to()
            .map(|addrs| {
                addrs
                    .iter()
                    .filter_map(|addr| {
                        let email = addr.address.as_ref()?;
                        Some(Address::new(addr.name.as_ref(), email))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let date = parsed.date().and_then(convert_date);

        let attachments = parsed
            .attachments()
            .map(|part| Attachment {
                name: part.attachment_name().unwrap_or("attachment").to_owned(),
                mime: part
                    .content_type()
                    .map(|ctype| match ctype.subtype() {
                        Some(subtype) => format!("{}/{subtype}", ctype.ctype()),
                        None => ctype.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".into()),
                size: part.contents().len() as u32,
            })
            .collect();

        Ok(Message {
            account_id: account_id.to_string(),
            folder_id,
            uid,
            message_id,
            flags,
            size,
            subject: parsed.subject().map(ToOwned::to_owned).unwrap_or_default(),
            from,
            to,
            date,
            text_body: parsed.body_text(0).map(|body| body.into_owned()),
            html_body: parsed.body_html(0).map(|body| body.into_owned()),
            attachments,
            in_reply_to: parsed
                .header("In-Reply-To")
                .and_then(|header| header.as_text())
                .map(ToOwned::to_owned),
            references: parsed
                .header("References")
                .and_then(|header| header.as_text())
                .map(ToOwned::to_owned),
        })
    }
}

/// Transform a [`mail_parser::DateTime`] into a fixed offset
/// [`chrono::DateTime`].
fn convert_date(date: &mail_parser::DateTime) -> Option<DateTime<FixedOffset>> {
    let tz_secs = (date.tz_hour as i32) * 3600 + (date.tz_minute as i32) * 60;
    let tz_sign = if date.tz_before_gmt { -1 } else { 1 };

    let tz = match FixedOffset::east_opt(tz_sign * tz_secs) {
        Some(tz) => tz,
        None => {
            warn!("invalid timezone seconds {tz_secs}, falling back to UTC");
            FixedOffset::east_opt(0).unwrap()
        }
    };

    tz.with_ymd_and_hms(
        date.year as i32,
        date.month as u32,
        date.day as u32,
        date.hour as u32,
        date.minute as u32,
        date.second as u32,
    )
    .earliest()
}
