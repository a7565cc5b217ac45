//! Module dedicated to real-time mailbox watching.
//!
//! A [`Watcher`] keeps one dedicated connection in watch mode on one
//! folder and turns server notifications into cache updates plus
//! [`WatcherEvent`]s. When the server exposes a native long-poll
//! primitive the watcher idles on it, otherwise it falls back to a
//! keep-alive polling loop.
//!
//! Connection loss triggers an exponential reconnect backoff. Once the
//! retry budget is exhausted the watcher gives up, emits
//! [`WatcherEvent::Degraded`] and stops: clients keep working off the
//! cache, refreshed by the background scheduler.

mod error;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{
    account::Account,
    flag::Flags,
    message::Message,
    protocol::{Connector, IdleEvent, ProtocolConnection},
    store::Store,
    sync::{report::FolderSyncReport, SyncEngine},
};

/// How long one native watch round lasts before the connection is
/// refreshed with a keep-alive round trip.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(9 * 60);

/// The interval of the polling fallback, used when the server has no
/// native long-poll primitive.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// The default number of consecutive reconnect failures tolerated
/// before the watcher degrades.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Return the reconnect delay for the given 1-based attempt number:
/// exponential from 1s, capped at 60s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    let delay = BACKOFF_BASE * 2u32.pow(exp);
    delay.min(BACKOFF_CAP)
}

/// The watch configuration.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// The lifecycle state of a watcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchState {
    /// The loop has been spawned but has not connected yet.
    Disconnected,
    Connecting,
    Watching,
    /// A sync pass triggered by a notification is running.
    Syncing,
    /// The connection dropped, a reconnect is pending.
    Reconnecting,
    /// Terminal: stopped on request, because the watched folder is
    /// gone, or because the reconnect budget ran out. A fresh
    /// [`Watcher::start`] resumes watching.
    Stopped,
}

/// The event emitted by a watcher after a change was synced into the
/// cache.
#[derive(Clone, Debug, PartialEq)]
pub enum WatcherEvent {
    /// A new message was cached.
    NewEmail {
        account_id: String,
        folder: String,
        message: Message,
    },

    /// The flags of a cached message changed.
    EmailUpdated {
        account_id: String,
        folder: String,
        uid: u32,
        flags: Flags,
    },

    /// A cached message was deleted on the server.
    EmailDeleted {
        account_id: String,
        folder: String,
        uid: u32,
    },

    /// The watcher exhausted its reconnect budget and stopped. The
    /// cache stays usable but is no longer refreshed in real time.
    Degraded {
        account_id: String,
        folder: String,
        reason: String,
    },
}

/// The real-time mailbox watcher factory.
#[derive(Clone)]
pub struct Watcher {
    connector: Arc<dyn Connector>,
    store: Arc<dyn Store>,
    engine: SyncEngine,
    config: WatchConfig,
}

impl Watcher {
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn Store>) -> Self {
        Self {
            connector,
            engine: SyncEngine::new(store.clone()),
            store,
            config: WatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn a watch loop on the given folder and return its handle.
    pub fn start(&self, account: Account, folder: impl ToString) -> WatchHandle {
        let folder = folder.to_string();
        let account_id = account.id().to_owned();
        let (events, _) = broadcast::channel(128);
        let (state_tx, state_rx) = watch::channel(WatchState::Disconnected);
        let (stop_tx, stop_rx) = watch::channel(false);
        let sync_gate = Arc::new(Mutex::new(()));

        let watch_loop = WatchLoop {
            connector: self.connector.clone(),
            store: self.store.clone(),
            engine: self.engine.clone(),
            config: self.config.clone(),
            account,
            folder: folder.clone(),
            events: events.clone(),
            state: state_tx,
            stop: stop_rx,
            sync_gate: sync_gate.clone(),
        };

        let task = tokio::spawn(watch_loop.run());

        WatchHandle {
            account_id,
            folder,
            events,
            state: state_rx,
            stop: stop_tx,
            task,
            sync_gate,
        }
    }
}

/// The handle of a spawned watch loop.
pub struct WatchHandle {
    account_id: String,
    folder: String,
    events: broadcast::Sender<WatcherEvent>,
    state: watch::Receiver<WatchState>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    sync_gate: Arc<Mutex<()>>,
}

impl WatchHandle {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Subscribe to the events of the watch loop.
    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            debug!("cannot join watch loop: {err}");
        }
    }
}

enum CycleEnd {
    /// The loop was asked to stop.
    Stopped,
    /// The watched mailbox no longer exists.
    FolderGone,
}

struct WatchLoop {
    connector: Arc<dyn Connector>,
    store: Arc<dyn Store>,
    engine: SyncEngine,
    config: WatchConfig,
    account: Account,
    folder: String,
    events: broadcast::Sender<WatcherEvent>,
    state: watch::Sender<WatchState>,
    stop: watch::Receiver<bool>,
    sync_gate: Arc<Mutex<()>>,
}

impl WatchLoop {
    async fn run(mut self) {
        let mut attempt = 0;

        loop {
            if *self.stop.borrow() {
                break;
            }

            self.state.send_replace(WatchState::Connecting);

            match self.watch_cycle(&mut attempt).await {
                Ok(CycleEnd::Stopped) => break,
                Ok(CycleEnd::FolderGone) => {
                    info!("watched folder {} is gone, stopping watch", self.folder);
                    break;
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        warn!(
                            "watch of {} failed {attempt} times in a row, giving up: {err}",
                            self.folder,
                        );
                        let _ = self.events.send(WatcherEvent::Degraded {
                            account_id: self.account.id().to_owned(),
                            folder: self.folder.clone(),
                            reason: err.to_string(),
                        });
                        break;
                    }

                    let delay = backoff_delay(attempt);
                    debug!(
                        "watch cycle of {} failed (attempt {attempt}): {err}, retrying in {delay:?}",
                        self.folder,
                    );
                    self.state.send_replace(WatchState::Reconnecting);

                    tokio::select! {
                        _ = self.stop.wait_for(|stop| *stop) => break,
                        _ = time::sleep(delay) => (),
                    }
                }
            }
        }

        self.state.send_replace(WatchState::Stopped);
    }

    /// One connection lifetime: connect, catch up, then stay in watch
    /// mode until the connection drops or the loop is stopped.
    async fn watch_cycle(&mut self, attempt: &mut u32) -> Result<CycleEnd> {
        let mut conn = self.connector.connect(&self.account.config).await?;

        // catch up on whatever happened while disconnected; no events
        // for the catch-up, subscribers re-query state on (re)start
        if self.run_sync(conn.as_mut(), false).await?.folder_deleted {
            return Ok(CycleEnd::FolderGone);
        }

        // the cycle is healthy, reset the reconnect budget
        *attempt = 0;

        let use_idle = conn.supports_idle();
        self.state.send_replace(WatchState::Watching);
        info!(
            "watching folder {} ({})",
            self.folder,
            if use_idle { "idle" } else { "polling" },
        );

        loop {
            let event = if use_idle {
                let idle = conn.idle(self.config.idle_timeout);
                tokio::select! {
                    _ = self.stop.wait_for(|stop| *stop) => return Ok(CycleEnd::Stopped),
                    event = idle => event?,
                }
            } else {
                tokio::select! {
                    _ = self.stop.wait_for(|stop| *stop) => return Ok(CycleEnd::Stopped),
                    _ = time::sleep(self.config.poll_interval) => (),
                }
                match conn.noop().await? {
                    Some(event) => event,
                    None => continue,
                }
            };

            match event {
                IdleEvent::Timeout => {
                    // keep the connection alive, then re-enter idle
                    conn.noop().await?;
                }
                event => {
                    debug!("change notification on {}: {event:?}", self.folder);
                    if self.run_sync(conn.as_mut(), true).await?.folder_deleted {
                        return Ok(CycleEnd::FolderGone);
                    }
                    self.state.send_replace(WatchState::Watching);
                }
            }
        }
    }

    /// Run one sync pass, optionally emitting the resulting cache diff
    /// as watcher events. Passes are single-flight: when another pass
    /// already runs for this watcher, the notification is dropped and
    /// the in-flight pass picks the change up.
    async fn run_sync(
        &self,
        conn: &mut dyn ProtocolConnection,
        emit: bool,
    ) -> Result<FolderSyncReport> {
        let Ok(_gate) = self.sync_gate.try_lock() else {
            debug!("sync already in flight for {}, skipping", self.folder);
            return Ok(FolderSyncReport {
                folder: self.folder.clone(),
                ..Default::default()
            });
        };

        self.state.send_replace(WatchState::Syncing);
        let before = self.snapshot().await?;
        let report = self
            .engine
            .sync_folder(conn, self.account.id(), &self.folder)
            .await?;

        if emit && !report.folder_deleted {
            self.emit_diff(before).await?;
        }

        Ok(report)
    }

    /// Snapshot the cached flags of the watched folder, keyed by UID.
    async fn snapshot(&self) -> Result<HashMap<u32, Flags>> {
        let mut flags = HashMap::new();

        if let Some(folder) = self
            .store
            .find_folder(self.account.id(), &self.folder)
            .await?
        {
            for uid in self.store.list_uids(&folder.id).await? {
                if let Some(msg) = self.store.find_message_by_uid(&folder.id, uid).await? {
                    flags.insert(uid, msg.flags);
                }
            }
        }

        Ok(flags)
    }

    async fn emit_diff(&self, before: HashMap<u32, Flags>) -> Result<()> {
        let account_id = self.account.id().to_owned();
        let Some(folder) = self.store.find_folder(&account_id, &self.folder).await? else {
            return Ok(());
        };

        let mut remaining: HashSet<u32> = before.keys().copied().collect();

        for uid in self.store.list_uids(&folder.id).await? {
            let Some(msg) = self.store.find_message_by_uid(&folder.id, uid).await? else {
                continue;
            };
            remaining.remove(&uid);

            match before.get(&uid) {
                None => {
                    let _ = self.events.send(WatcherEvent::NewEmail {
                        account_id: account_id.clone(),
                        folder: self.folder.clone(),
                        message: msg,
                    });
                }
                Some(flags) if *flags != msg.flags => {
                    let _ = self.events.send(WatcherEvent::EmailUpdated {
                        account_id: account_id.clone(),
                        folder: self.folder.clone(),
                        uid,
                        flags: msg.flags,
                    });
                }
                Some(_) => (),
            }
        }

        for uid in remaining {
            let _ = self.events.send(WatcherEvent::EmailDeleted {
                account_id: account_id.clone(),
                folder: self.folder.clone(),
                uid,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;
    use crate::{
        account::AccountConfig,
        protocol::fake::FakeServer,
        store::memory::MemoryStore,
    };

    fn account() -> Account {
        Account {
            config: AccountConfig {
                id: "account".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<WatcherEvent>) -> WatcherEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no watcher event within 5s")
            .expect("watcher event channel closed")
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let secs: Vec<u64> = (1..=8).map(|n| backoff_delay(n).as_secs()).collect();
        assert_eq!(secs, [1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[tokio::test]
    async fn idle_notification_turns_into_new_email_event() {
        let server = FakeServer::new();
        let store = Arc::new(MemoryStore::new());
        let watcher = Watcher::new(Arc::new(server.connector()), store);

        let handle = watcher.start(account(), "INBOX");
        let mut rx = handle.subscribe();

        // let the catch-up pass finish before delivering
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.state(), WatchState::Watching);

        server.append(
            "INBOX",
            "Message-ID: <a@x>\r\nSubject: hi\r\n\r\nbody",
            Flags::default(),
        );
        server.push_event(IdleEvent::NewMail { count: 1 });

        match next_event(&mut rx).await {
            WatcherEvent::NewEmail { folder, message, .. } => {
                assert_eq!(folder, "INBOX");
                assert_eq!(message.subject, "hi");
            }
            event => panic!("unexpected event {event:?}"),
        }

        handle.stop().await;
    }

    #[tokio::test]
    async fn polling_fallback_detects_changes() {
        let server = FakeServer::new();
        let store = Arc::new(MemoryStore::new());
        let watcher = Watcher::new(Arc::new(server.connector().without_idle()), store)
            .with_config(WatchConfig {
                poll_interval: Duration::from_millis(50),
                ..Default::default()
            });

        let handle = watcher.start(account(), "INBOX");
        let mut rx = handle.subscribe();

        tokio::time::sleep(Duration::from_millis(100)).await;
        server.append(
            "INBOX",
            "Message-ID: <b@x>\r\nSubject: poll\r\n\r\nbody",
            Flags::default(),
        );
        server.push_event(IdleEvent::NewMail { count: 1 });

        assert!(matches!(
            next_event(&mut rx).await,
            WatcherEvent::NewEmail { .. }
        ));

        handle.stop().await;
    }

    #[tokio::test]
    async fn watcher_degrades_once_the_retry_budget_is_exhausted() {
        let server = FakeServer::new();
        server.fail_next_connects(u32::MAX);
        let store = Arc::new(MemoryStore::new());
        let watcher = Watcher::new(Arc::new(server.connector()), store).with_config(WatchConfig {
            max_attempts: 1,
            ..Default::default()
        });

        let handle = watcher.start(account(), "INBOX");
        let mut rx = handle.subscribe();

        assert!(matches!(
            next_event(&mut rx).await,
            WatcherEvent::Degraded { .. }
        ));

        timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watch loop still running");
        assert_eq!(handle.state(), WatchState::Stopped);
    }

    #[tokio::test]
    async fn in_flight_pass_swallows_concurrent_notifications() {
        let server = FakeServer::new();
        let store = Arc::new(MemoryStore::new());
        let watcher = Watcher::new(Arc::new(server.connector()), store);

        let handle = watcher.start(account(), "INBOX");
        let mut rx = handle.subscribe();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // hold the gate: the pass triggered by the notification must
        // be skipped, not queued
        let gate = handle.sync_gate.clone();
        let guard = gate.lock().await;
        server.append(
            "INBOX",
            "Message-ID: <c@x>\r\nSubject: blocked\r\n\r\nbody",
            Flags::default(),
        );
        server.push_event(IdleEvent::NewMail { count: 1 });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        drop(guard);

        // the next notification syncs the pending message
        server.push_event(IdleEvent::NewMail { count: 1 });
        assert!(matches!(
            next_event(&mut rx).await,
            WatcherEvent::NewEmail { .. }
        ));

        handle.stop().await;
    }

    #[tokio::test]
    async fn deleting_the_watched_mailbox_stops_the_loop() {
        let server = FakeServer::new();
        server.create_mailbox("Archive");
        let store = Arc::new(MemoryStore::new());
        let watcher = Watcher::new(Arc::new(server.connector()), store);

        let handle = watcher.start(account(), "Archive");
        tokio::time::sleep(Duration::from_millis(100)).await;

        server.delete_mailbox("Archive");
        server.push_event(IdleEvent::Expunged { seqno: 1 });

        timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watch loop still running");
        assert_eq!(handle.state(), WatchState::Stopped);
    }
}
