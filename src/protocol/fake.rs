//! Module dedicated to the in-memory fake mail server.
//!
//! The fake server implements [`ProtocolConnection`] and
//! [`Connector`] over plain in-process state. The test suite drives
//! it through the [`FakeServer`] handle: mutate mailboxes between
//! sync passes, push idle events, or make the next connections fail
//! to exercise the reconnect paths.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{
    Connector, Error, IdleEvent, MailboxStatus, ProtocolConnection, RawMessage, RemoteMailbox,
    Result, UidEntry,
};
use crate::{
    account::AccountConfig,
    flag::{Flag, Flags},
    folder::FolderKind,
};

#[derive(Debug, Default)]
struct StoredMessage {
    flags: Flags,
    raw: Vec<u8>,
}

#[derive(Debug)]
struct FakeMailbox {
    delimiter: String,
    kind: Option<FolderKind>,
    next_uid: u32,
    messages: BTreeMap<u32, StoredMessage>,
}

impl Default for FakeMailbox {
    fn default() -> Self {
        Self {
            delimiter: "/".into(),
            kind: None,
            next_uid: 1,
            messages: BTreeMap::new(),
        }
    }
}

impl FakeMailbox {
    fn status(&self) -> MailboxStatus {
        MailboxStatus {
            total: self.messages.len() as u32,
            unread: self
                .messages
                .values()
                .filter(|msg| !msg.flags.is_seen())
                .count() as u32,
            next_uid: self.next_uid,
        }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    mailboxes: BTreeMap<String, FakeMailbox>,
    events: VecDeque<IdleEvent>,
    fail_connects: u32,
    active: u32,
    max_active: u32,
    total_connects: u32,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ServerState>,
    notify: Notify,
}

/// The fake mail server handle.
///
/// Cloning the handle shares the underlying state, so tests can keep
/// mutating the server while connections are live.
#[derive(Clone, Debug, Default)]
pub struct FakeServer {
    shared: Arc<Shared>,
}

impl FakeServer {
    /// Create a fake server with an empty INBOX.
    pub fn new() -> Self {
        let server = Self::default();
        server.create_mailbox_with_kind("INBOX", Some(FolderKind::Inbox));
        server
    }

    /// Build a connector handing out connections to this server.
    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            shared: self.shared.clone(),
            supports_idle: true,
            connect_delay: None,
        }
    }

    pub fn create_mailbox(&self, path: impl ToString) {
        self.create_mailbox_with_kind(path, None)
    }

    pub fn create_mailbox_with_kind(&self, path: impl ToString, kind: Option<FolderKind>) {
        let mut state = self.shared.state.lock().unwrap();
        let mailbox = state.mailboxes.entry(path.to_string()).or_default();
        mailbox.kind = kind;
    }

    pub fn delete_mailbox(&self, path: &str) {
        self.shared.state.lock().unwrap().mailboxes.remove(path);
    }

    /// Deliver a raw message to the given mailbox and return its UID.
    pub fn append(&self, path: &str, raw: impl Into<Vec<u8>>, flags: Flags) -> u32 {
        let mut state = self.shared.state.lock().unwrap();
        let mailbox = state.mailboxes.entry(path.to_string()).or_default();
        let uid = mailbox.next_uid;
        mailbox.next_uid += 1;
        mailbox.messages.insert(
            uid,
            StoredMessage {
                flags,
                raw: raw.into(),
            },
        );
        uid
    }

    pub fn set_flag(&self, path: &str, uid: u32, flag: Flag, on: bool) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(msg) = state
            .mailboxes
            .get_mut(path)
            .and_then(|mailbox| mailbox.messages.get_mut(&uid))
        {
            if on {
                msg.flags.insert(flag);
            } else {
                msg.flags.remove(&flag);
            }
        }
    }

    pub fn remove(&self, path: &str, uid: u32) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(mailbox) = state.mailboxes.get_mut(path) {
            mailbox.messages.remove(&uid);
        }
    }

    /// Queue an idle event and wake every connection currently in
    /// watch mode.
    pub fn push_event(&self, event: IdleEvent) {
        self.shared.state.lock().unwrap().events.push_back(event);
        self.shared.notify.notify_waiters();
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.shared.state.lock().unwrap().fail_connects = n;
    }

    pub fn active_connections(&self) -> u32 {
        self.shared.state.lock().unwrap().active
    }

    /// The highest number of simultaneously open connections observed
    /// so far.
    pub fn max_active_connections(&self) -> u32 {
        self.shared.state.lock().unwrap().max_active
    }

    pub fn total_connects(&self) -> u32 {
        self.shared.state.lock().unwrap().total_connects
    }
}

/// The fake connection factory.
#[derive(Clone, Debug)]
pub struct FakeConnector {
    shared: Arc<Shared>,
    supports_idle: bool,
    connect_delay: Option<Duration>,
}

impl FakeConnector {
    /// Disable the native idle capability, forcing watchers into
    /// their polling fallback.
    pub fn without_idle(mut self) -> Self {
        self.supports_idle = false;
        self
    }

    /// Delay every connection attempt, useful to observe concurrency
    /// limits.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &AccountConfig) -> Result<Box<dyn ProtocolConnection>> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(Error::ConnectionError(format!(
                    "cannot reach {}:{}",
                    config.host, config.port
                )));
            }
            state.active += 1;
            state.total_connects += 1;
            state.max_active = state.max_active.max(state.active);
        }

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        Ok(Box::new(FakeConnection {
            shared: self.shared.clone(),
            selected: None,
            open: true,
            supports_idle: self.supports_idle,
        }))
    }
}

/// One fake connection, handed out by [`FakeConnector`].
#[derive(Debug)]
pub struct FakeConnection {
    shared: Arc<Shared>,
    selected: Option<String>,
    open: bool,
    supports_idle: bool,
}

impl FakeConnection {
    fn with_state<T>(&self, f: impl FnOnce(&mut ServerState) -> Result<T>) -> Result<T> {
        if !self.open {
            return Err(Error::ConnectionClosed);
        }
        let mut state = self.shared.state.lock().unwrap();
        f(&mut state)
    }

    fn with_selected<T>(&self, f: impl FnOnce(&mut FakeMailbox) -> Result<T>) -> Result<T> {
        let selected = self
            .selected
            .clone()
            .ok_or(Error::NoMailboxSelected)?;
        self.with_state(|state| {
            let mailbox = state
                .mailboxes
                .get_mut(&selected)
                .ok_or_else(|| Error::MailboxNotFound(selected.clone()))?;
            f(mailbox)
        })
    }
}

#[async_trait]
impl ProtocolConnection for FakeConnection {
    async fn open(&mut self) -> Result<()> {
        // connections from the connector are already open
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.shared.state.lock().unwrap().active -= 1;
        }
        Ok(())
    }

    async fn select(&mut self, folder: &str) -> Result<MailboxStatus> {
        let status = self.with_state(|state| {
            state
                .mailboxes
                .get(folder)
                .map(|mailbox| mailbox.status())
                .ok_or_else(|| Error::MailboxNotFound(folder.to_owned()))
        })?;
        self.selected = Some(folder.to_owned());
        Ok(status)
    }

    async fn list_mailboxes(&mut self) -> Result<Vec<RemoteMailbox>> {
        self.with_state(|state| {
            Ok(state
                .mailboxes
                .iter()
                .map(|(path, mailbox)| RemoteMailbox {
                    path: path.clone(),
                    delimiter: mailbox.delimiter.clone(),
                    kind: mailbox
                        .kind
                        .clone()
                        .or_else(|| FolderKind::from_path(path, &mailbox.delimiter)),
                })
                .collect())
        })
    }

    async fn status(&mut self, folder: &str) -> Result<MailboxStatus> {
        self.with_state(|state| {
            state
                .mailboxes
                .get(folder)
                .map(|mailbox| mailbox.status())
                .ok_or_else(|| Error::MailboxNotFound(folder.to_owned()))
        })
    }

    async fn search_uid_range(&mut self, low: u32, high: u32) -> Result<Vec<UidEntry>> {
        self.with_selected(|mailbox| {
            Ok(mailbox
                .messages
                .range(low..=high)
                .map(|(uid, msg)| UidEntry {
                    uid: *uid,
                    flags: msg.flags.clone(),
                })
                .collect())
        })
    }

    async fn search_all(&mut self) -> Result<Vec<UidEntry>> {
        self.with_selected(|mailbox| {
            Ok(mailbox
                .messages
                .iter()
                .map(|(uid, msg)| UidEntry {
                    uid: *uid,
                    flags: msg.flags.clone(),
                })
                .collect())
        })
    }

    async fn fetch_range_by_seq(&mut self, low: u32, high: u32) -> Result<Vec<RawMessage>> {
        self.with_selected(|mailbox| {
            Ok(mailbox
                .messages
                .iter()
                .enumerate()
                .filter(|(i, _)| {
                    let seqno = (*i as u32) + 1;
                    seqno >= low && seqno <= high
                })
                .map(|(_, (uid, msg))| RawMessage {
                    uid: *uid,
                    flags: msg.flags.clone(),
                    size: msg.raw.len() as u32,
                    raw: msg.raw.clone(),
                })
                .collect())
        })
    }

    async fn fetch_uid_range(&mut self, low: u32, high: u32) -> Result<Vec<RawMessage>> {
        self.with_selected(|mailbox| {
            Ok(mailbox
                .messages
                .range(low..=high)
                .map(|(uid, msg)| RawMessage {
                    uid: *uid,
                    flags: msg.flags.clone(),
                    size: msg.raw.len() as u32,
                    raw: msg.raw.clone(),
                })
                .collect())
        })
    }

    async fn fetch_full(&mut self, uid: u32) -> Result<RawMessage> {
        self.with_selected(|mailbox| {
            mailbox
                .messages
                .get(&uid)
                .map(|msg| RawMessage {
                    uid,
                    flags: msg.flags.clone(),
                    size: msg.raw.len() as u32,
                    raw: msg.raw.clone(),
                })
                .ok_or_else(|| Error::ProtocolError(format!("uid {uid} not found")))
        })
    }

    async fn fetch_flags(&mut self, low: u32, high: u32) -> Result<Vec<UidEntry>> {
        self.search_uid_range(low, high).await
    }

    async fn set_flag(&mut self, uid: u32, flag: &Flag, on: bool) -> Result<()> {
        self.with_selected(|mailbox| {
            let msg = mailbox
                .messages
                .get_mut(&uid)
                .ok_or_else(|| Error::ProtocolError(format!("uid {uid} not found")))?;
            if on {
                msg.flags.insert(flag.clone());
            } else {
                msg.flags.remove(flag);
            }
            Ok(())
        })
    }

    async fn expunge(&mut self) -> Result<()> {
        self.with_selected(|mailbox| {
            mailbox
                .messages
                .retain(|_, msg| !msg.flags.contains(&Flag::Deleted));
            Ok(())
        })
    }

    async fn move_message(&mut self, uid: u32, target: &str) -> Result<()> {
        let msg = self.with_selected(|mailbox| {
            mailbox
                .messages
                .remove(&uid)
                .ok_or_else(|| Error::ProtocolError(format!("uid {uid} not found")))
        })?;
        self.with_state(|state| {
            let mailbox = state
                .mailboxes
                .get_mut(target)
                .ok_or_else(|| Error::MailboxNotFound(target.to_owned()))?;
            let uid = mailbox.next_uid;
            mailbox.next_uid += 1;
            mailbox.messages.insert(uid, msg);
            Ok(())
        })
    }

    async fn create_mailbox(&mut self, folder: &str) -> Result<()> {
        self.with_state(|state| {
            state.mailboxes.entry(folder.to_owned()).or_default();
            Ok(())
        })
    }

    async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<()> {
        self.with_state(|state| {
            let mailbox = state
                .mailboxes
                .remove(from)
                .ok_or_else(|| Error::MailboxNotFound(from.to_owned()))?;
            state.mailboxes.insert(to.to_owned(), mailbox);
            Ok(())
        })
    }

    async fn delete_mailbox(&mut self, folder: &str) -> Result<()> {
        self.with_state(|state| {
            state
                .mailboxes
                .remove(folder)
                .map(|_| ())
                .ok_or_else(|| Error::MailboxNotFound(folder.to_owned()))
        })
    }

    async fn append(&mut self, folder: &str, raw: &[u8], flags: &Flags) -> Result<u32> {
        self.with_state(|state| {
            let mailbox = state
                .mailboxes
                .get_mut(folder)
                .ok_or_else(|| Error::MailboxNotFound(folder.to_owned()))?;
            let uid = mailbox.next_uid;
            mailbox.next_uid += 1;
            mailbox.messages.insert(
                uid,
                StoredMessage {
                    flags: flags.clone(),
                    raw: raw.to_vec(),
                },
            );
            Ok(uid)
        })
    }

    fn supports_idle(&self) -> bool {
        self.supports_idle
    }

    async fn idle(&mut self, timeout: Duration) -> Result<IdleEvent> {
        loop {
            let notified = self.shared.notify.notified();

            {
                if !self.open {
                    return Err(Error::ConnectionClosed);
                }
                let mut state = self.shared.state.lock().unwrap();
                if let Some(event) = state.events.pop_front() {
                    return Ok(event);
                }
            }

            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep(timeout) => return Ok(IdleEvent::Timeout),
            }
        }
    }

    async fn noop(&mut self) -> Result<Option<IdleEvent>> {
        self.with_state(|state| Ok(state.events.pop_front()))
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if self.open {
            self.shared.state.lock().unwrap().active -= 1;
        }
    }
}
