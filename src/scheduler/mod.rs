//! Module dedicated to the global background sync scheduler.
//!
//! One scheduler runs per process. It serves sync requests coming from
//! session activity and periodic triggers, bounded two ways: a global
//! concurrency limit on simultaneous account syncs, served fairly in
//! request order, and a single-flight rule per account so that a burst
//! of requests for the same account coalesces into the one run already
//! in flight.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{protocol::Connector, store::Store, sync::SyncEngine};

/// The default number of account syncs allowed to run at the same
/// time.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// The global background sync scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    connector: Arc<dyn Connector>,
    store: Arc<dyn Store>,
    engine: SyncEngine,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SyncScheduler {
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn Store>) -> Self {
        Self {
            engine: SyncEngine::new(store.clone()),
            connector,
            store,
            semaphore: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replace the default engine, typically to attach an event
    /// handler.
    pub fn with_engine(mut self, engine: SyncEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Request a background sync of the given account.
    ///
    /// Returns `true` when a run was scheduled, `false` when one is
    /// already queued or in flight for this account, in which case the
    /// request coalesces into it.
    pub fn request_sync(&self, account_id: impl ToString) -> bool {
        let account_id = account_id.to_string();

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(account_id.clone()) {
                debug!("sync of account {account_id} already in flight, coalescing");
                return false;
            }
        }

        let scheduler = self.clone();
        let task = tokio::spawn(async move {
            scheduler.run(&account_id).await;
            scheduler.in_flight.lock().unwrap().remove(&account_id);
        });
        self.tasks.lock().unwrap().push(task);

        true
    }

    /// Request a background sync of every active account.
    pub async fn sync_all(&self) {
        let accounts = match self.store.list_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!("cannot list accounts to sync: {err}");
                return;
            }
        };

        for account in accounts {
            if account.active {
                self.request_sync(account.id());
            }
        }
    }

    async fn run(&self, account_id: &str) {
        // permits are granted in request order
        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };

        let account = match self.store.find_account(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!("cannot sync account {account_id}: account not found");
                return;
            }
            Err(err) => {
                warn!("cannot sync account {account_id}: {err}");
                return;
            }
        };

        info!("background sync of account {account_id} starts");
        match self.engine.sync_account(self.connector.as_ref(), &account).await {
            Ok(report) if report.is_ok() => {
                info!("background sync of account {account_id} done");
            }
            Ok(report) => {
                warn!(
                    "background sync of account {account_id} done with {} folder error(s)",
                    report.errors.len(),
                );
            }
            Err(err) => {
                warn!("background sync of account {account_id} failed: {err}");
            }
        }
    }

    /// The number of syncs currently queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Wait for every scheduled sync to finish.
    pub async fn drain(&self) {
        loop {
            let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
            if tasks.is_empty() {
                break;
            }
            for res in futures::future::join_all(tasks).await {
                if let Err(err) = res {
                    debug!("cannot join sync task: {err}");
                }
            }
        }
    }
}
