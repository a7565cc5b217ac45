//! Module dedicated to client session connection multiplexing.
//!
//! A [`Session`] represents one authenticated real-time client. It
//! owns every server connection opened on behalf of that client and
//! keeps the two connection roles strictly apart: watch connections
//! stay parked in idle and never serve queries, query connections
//! serve fetches and mutations and never idle. Tearing the session
//! down releases everything it owns.
//!
//! Account ownership is re-checked against the store on every call,
//! never cached: an account revoked mid-session becomes unreachable on
//! the next operation.

mod error;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::sync::broadcast;
use tracing::{debug, info};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{
    account::Account,
    protocol::{Connector, ProtocolConnection},
    store::Store,
    watch::{WatchHandle, WatchState, Watcher, WatcherEvent},
};

/// How long a pooled query connection may sit unused before
/// [`Session::evict_idle`] closes it.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5 * 60);

/// The process-wide counters shared by the manager and its sessions.
#[derive(Debug, Default)]
struct Registry {
    sessions: usize,
    watches: usize,
}

/// The session factory, shared by the whole process.
#[derive(Clone)]
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    store: Arc<dyn Store>,
    watcher: Watcher,
    registry: Arc<Mutex<Registry>>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn Store>) -> Self {
        Self {
            watcher: Watcher::new(connector.clone(), store.clone()),
            connector,
            store,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn with_watcher(mut self, watcher: Watcher) -> Self {
        self.watcher = watcher;
        self
    }

    /// Open a session for the given authenticated user.
    pub fn open_session(&self, user_id: impl ToString) -> Session {
        let user_id = user_id.to_string();
        debug!("opening session for user {user_id}");
        self.registry.lock().unwrap().sessions += 1;
        Session {
            user_id,
            connector: self.connector.clone(),
            store: self.store.clone(),
            watcher: self.watcher.clone(),
            watches: HashMap::new(),
            queries: HashMap::new(),
            registry: self.registry.clone(),
        }
    }

    /// A snapshot of what the whole process currently serves: open
    /// sessions and live watch connections across all of them.
    pub fn stats(&self) -> ManagerStats {
        let registry = self.registry.lock().unwrap();
        ManagerStats {
            sessions: registry.sessions,
            watch_connections: registry.watches,
        }
    }
}

/// The process-wide resource counters of the session manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ManagerStats {
    /// The number of open sessions.
    pub sessions: usize,

    /// The number of live watch connections across all sessions.
    pub watch_connections: usize,
}

/// One pooled query connection slot.
enum Slot {
    /// The connection is parked and ready, with its last release time.
    Idle(Box<dyn ProtocolConnection>, Instant),

    /// The connection is checked out by an in-flight operation.
    Busy,
}

/// The per-client connection multiplexer.
pub struct Session {
    user_id: String,
    connector: Arc<dyn Connector>,
    store: Arc<dyn Store>,
    watcher: Watcher,
    /// Watch handles keyed by (account id, folder path).
    watches: HashMap<(String, String), WatchHandle>,
    /// Query connections keyed by account id, one slot per account.
    queries: HashMap<String, Slot>,
    registry: Arc<Mutex<Registry>>,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Load the account and check it belongs to the session user.
    async fn authorize(&self, account_id: &str) -> Result<Account> {
        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or_else(|| Error::AccountNotFoundError(account_id.to_owned()))?;

        if account.user_id != self.user_id {
            return Err(Error::NotAuthorizedError {
                user: self.user_id.clone(),
                account: account_id.to_owned(),
            });
        }

        Ok(account)
    }

    /// Start watching the given folder and return an event
    /// subscription. Watching an already watched folder just
    /// subscribes to the existing watch.
    pub async fn start_watch(
        &mut self,
        account_id: &str,
        folder: &str,
    ) -> Result<broadcast::Receiver<WatcherEvent>> {
        let account = self.authorize(account_id).await?;
        let key = (account_id.to_owned(), folder.to_owned());

        // a finished watch (degraded or folder gone) is replaced
        if let Some(handle) = self.watches.get(&key) {
            if !handle.is_finished() {
                return Ok(handle.subscribe());
            }
        }

        info!("user {} starts watching {account_id}/{folder}", self.user_id);
        let handle = self.watcher.start(account, folder);
        let rx = handle.subscribe();
        if self.watches.insert(key, handle).is_none() {
            self.registry.lock().unwrap().watches += 1;
        }
        Ok(rx)
    }

    /// Stop the watch of the given folder. Returns `false` when
    /// nothing was being watched.
    pub async fn stop_watch(&mut self, account_id: &str, folder: &str) -> Result<bool> {
        self.authorize(account_id).await?;
        let key = (account_id.to_owned(), folder.to_owned());

        match self.watches.remove(&key) {
            Some(handle) => {
                info!("user {} stops watching {account_id}/{folder}", self.user_id);
                self.release_watches(1);
                handle.stop().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn release_watches(&self, n: usize) {
        let mut registry = self.registry.lock().unwrap();
        registry.watches = registry.watches.saturating_sub(n);
    }

    /// The state of the watch on the given folder, when any.
    pub fn watch_state(&self, account_id: &str, folder: &str) -> Option<WatchState> {
        self.watches
            .get(&(account_id.to_owned(), folder.to_owned()))
            .map(|handle| handle.state())
    }

    /// Check out the query connection of the given account, opening
    /// one on first use.
    ///
    /// Each account has one pooled query connection per session, and
    /// query operations on it are serialized: checking out a
    /// connection that is already in use is an error, never a second
    /// connection.
    pub async fn checkout_query(&mut self, account_id: &str) -> Result<Box<dyn ProtocolConnection>> {
        let account = self.authorize(account_id).await?;

        match self.queries.remove(account_id) {
            Some(Slot::Idle(conn, _)) => {
                self.queries.insert(account_id.to_owned(), Slot::Busy);
                Ok(conn)
            }
            Some(Slot::Busy) => {
                self.queries.insert(account_id.to_owned(), Slot::Busy);
                Err(Error::ConnectionBusyError(account_id.to_owned()))
            }
            None => {
                debug!("opening query connection for account {account_id}");
                let conn = self.connector.connect(&account.config).await?;
                self.queries.insert(account_id.to_owned(), Slot::Busy);
                Ok(conn)
            }
        }
    }

    /// Return a checked-out query connection to the pool.
    pub fn checkin_query(&mut self, account_id: &str, conn: Box<dyn ProtocolConnection>) {
        self.queries
            .insert(account_id.to_owned(), Slot::Idle(conn, Instant::now()));
    }

    /// Close pooled query connections unused for longer than
    /// `max_idle`.
    pub async fn evict_idle(&mut self, max_idle: Duration) {
        let expired: Vec<String> = self
            .queries
            .iter()
            .filter_map(|(account_id, slot)| match slot {
                Slot::Idle(_, last_used) if last_used.elapsed() >= max_idle => {
                    Some(account_id.clone())
                }
                _ => None,
            })
            .collect();

        for account_id in expired {
            if let Some(Slot::Idle(mut conn, _)) = self.queries.remove(&account_id) {
                debug!("evicting idle query connection of account {account_id}");
                if let Err(err) = conn.close().await {
                    debug!("cannot close evicted connection: {err}");
                }
            }
        }
    }

    /// A snapshot of what the session currently owns.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            watches: self.watches.len(),
            query_connections: self
                .queries
                .values()
                .filter(|slot| matches!(slot, Slot::Idle(..)))
                .count(),
        }
    }

    /// Tear the session down: stop every watch and close every pooled
    /// query connection.
    pub async fn teardown(mut self) {
        info!("tearing down session of user {}", self.user_id);

        let watches: Vec<_> = self.watches.drain().collect();
        self.release_watches(watches.len());
        for (_, handle) in watches {
            handle.stop().await;
        }

        for (_, slot) in self.queries.drain() {
            if let Slot::Idle(mut conn, _) = slot {
                if let Err(err) = conn.close().await {
                    debug!("cannot close query connection: {err}");
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap();
        registry.sessions = registry.sessions.saturating_sub(1);
        // watches the session still holds (dropped without teardown)
        registry.watches = registry.watches.saturating_sub(self.watches.len());
    }
}

/// The resource counters of one session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionStats {
    /// The number of live watches.
    pub watches: usize,

    /// The number of pooled (idle) query connections.
    pub query_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{account::AccountConfig, protocol::fake::FakeServer, store::memory::MemoryStore};

    async fn setup(user_id: &str) -> (FakeServer, Arc<MemoryStore>, SessionManager) {
        let server = FakeServer::new();
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(Account {
                config: AccountConfig {
                    id: "account".into(),
                    ..Default::default()
                },
                user_id: user_id.into(),
                active: true,
                last_sync_at: None,
            })
            .await
            .unwrap();
        let manager = SessionManager::new(Arc::new(server.connector()), store.clone());
        (server, store, manager)
    }

    #[tokio::test]
    async fn foreign_accounts_are_not_reachable() {
        let (_server, _store, manager) = setup("alice").await;
        let mut session = manager.open_session("bob");

        let err = session.start_watch("account", "INBOX").await.unwrap_err();
        assert!(matches!(err, Error::NotAuthorizedError { .. }));

        let err = session.checkout_query("account").await.unwrap_err();
        assert!(matches!(err, Error::NotAuthorizedError { .. }));
    }

    #[tokio::test]
    async fn query_connections_are_pooled_per_account() {
        let (server, _store, manager) = setup("alice").await;
        let mut session = manager.open_session("alice");

        let conn = session.checkout_query("account").await.unwrap();
        session.checkin_query("account", conn);
        let conn = session.checkout_query("account").await.unwrap();
        session.checkin_query("account", conn);

        assert_eq!(server.total_connects(), 1);
    }

    #[tokio::test]
    async fn checked_out_connections_are_exclusive() {
        let (_server, _store, manager) = setup("alice").await;
        let mut session = manager.open_session("alice");

        let conn = session.checkout_query("account").await.unwrap();
        let err = session.checkout_query("account").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionBusyError(_)));

        session.checkin_query("account", conn);
        assert!(session.checkout_query("account").await.is_ok());
    }

    #[tokio::test]
    async fn watching_twice_subscribes_to_the_same_watch() {
        let (server, _store, manager) = setup("alice").await;
        let mut session = manager.open_session("alice");

        session.start_watch("account", "INBOX").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.start_watch("account", "INBOX").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(session.stats().watches, 1);
        assert_eq!(server.total_connects(), 1);

        session.teardown().await;
    }

    #[tokio::test]
    async fn teardown_releases_every_connection() {
        let (server, _store, manager) = setup("alice").await;
        let mut session = manager.open_session("alice");

        session.start_watch("account", "INBOX").await.unwrap();
        let conn = session.checkout_query("account").await.unwrap();
        session.checkin_query("account", conn);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(server.active_connections() > 0);

        session.teardown().await;

        // the watch task drops its connection on the way out
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn manager_stats_track_sessions_and_watch_connections() {
        let (_server, _store, manager) = setup("alice").await;
        assert_eq!(
            manager.stats(),
            ManagerStats {
                sessions: 0,
                watch_connections: 0,
            },
        );

        let mut first = manager.open_session("alice");
        let second = manager.open_session("alice");
        assert_eq!(manager.stats().sessions, 2);

        first.start_watch("account", "INBOX").await.unwrap();
        assert_eq!(manager.stats().watch_connections, 1);

        // resubscribing does not double-count
        first.start_watch("account", "INBOX").await.unwrap();
        assert_eq!(manager.stats().watch_connections, 1);

        first.stop_watch("account", "INBOX").await.unwrap();
        assert_eq!(manager.stats().watch_connections, 0);

        first.start_watch("account", "INBOX").await.unwrap();
        first.teardown().await;
        assert_eq!(
            manager.stats(),
            ManagerStats {
                sessions: 1,
                watch_connections: 0,
            },
        );

        // a session dropped without teardown is released too
        drop(second);
        assert_eq!(manager.stats().sessions, 0);
    }

    #[tokio::test]
    async fn stopping_an_unknown_watch_is_a_no_op() {
        let (_server, _store, manager) = setup("alice").await;
        let mut session = manager.open_session("alice");

        assert!(!session.stop_watch("account", "INBOX").await.unwrap());
    }
}
