//! End-to-end sync scenarios against the in-memory fake server and
//! store.

use std::sync::{Arc, Mutex};

use mailsync::{
    account::{Account, AccountConfig},
    flag::{Flag, Flags},
    protocol::{fake::FakeServer, Connector, ProtocolConnection},
    store::{memory::MemoryStore, Store},
    sync::{SyncEngine, SyncEvent},
};

fn config() -> AccountConfig {
    AccountConfig {
        id: "account".into(),
        ..Default::default()
    }
}

fn account() -> Account {
    Account {
        config: config(),
        user_id: "alice".into(),
        active: true,
        last_sync_at: None,
    }
}

fn raw(id: &str, subject: &str) -> Vec<u8> {
    format!(
        "Message-ID: <{id}@example.com>\r\n\
         From: Alice <alice@example.com>\r\n\
         To: bob@example.com\r\n\
         Subject: {subject}\r\n\
         \r\n\
         body",
    )
    .into_bytes()
}

async fn connect(server: &FakeServer) -> Box<dyn ProtocolConnection> {
    server.connector().connect(&config()).await.unwrap()
}

#[test_log::test(tokio::test)]
async fn bootstrap_pages_backward_and_reports_progress() {
    let server = FakeServer::new();
    for n in 1..=250 {
        server.append("INBOX", raw(&format!("m{n}"), "hello"), Flags::default());
    }

    let store = Arc::new(MemoryStore::new());
    let progress = Arc::new(Mutex::new(Vec::new()));
    let engine = SyncEngine::new(store.clone()).with_handler({
        let progress = progress.clone();
        move |event| {
            let progress = progress.clone();
            async move {
                if let SyncEvent::FolderProgress { processed, .. } = event {
                    progress.lock().unwrap().push(processed);
                }
            }
        }
    });

    let mut conn = connect(&server).await;
    let report = engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    assert!(report.bootstrapped);
    assert_eq!(report.new_messages, 250);
    assert_eq!(report.last_synced_uid, 250);
    assert_eq!(*progress.lock().unwrap(), vec![100, 200, 250]);

    let folder = store.find_folder("account", "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.last_synced_uid, 250);
    assert_eq!(folder.total_count, 250);
    assert_eq!(folder.unread_count, 250);
    assert_eq!(store.list_uids(&folder.id).await.unwrap().len(), 250);
}

#[test_log::test(tokio::test)]
async fn bootstrapping_an_empty_folder_is_a_no_op() {
    let server = FakeServer::new();
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(store.clone());

    let mut conn = connect(&server).await;
    let report = engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    assert!(report.bootstrapped);
    assert_eq!(report.new_messages, 0);
    assert_eq!(report.last_synced_uid, 0);

    let folder = store.find_folder("account", "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.last_synced_uid, 0);
    assert_eq!(folder.total_count, 0);
    assert_eq!(folder.unread_count, 0);
    assert!(store.list_uids(&folder.id).await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn syncing_twice_changes_nothing() {
    let server = FakeServer::new();
    server.append("INBOX", raw("a", "one"), Flags::from(Flag::Seen));
    server.append("INBOX", raw("b", "two"), Flags::default());

    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(store.clone());

    let mut conn = connect(&server).await;
    engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();
    let report = engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    assert!(!report.bootstrapped);
    assert_eq!(report.new_messages, 0);
    assert_eq!(report.flag_updates, 0);
    assert_eq!(report.deleted_messages, 0);

    let folder = store.find_folder("account", "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.unread_count, 1);
    assert_eq!(folder.total_count, 2);
}

#[test_log::test(tokio::test)]
async fn incremental_pass_picks_up_new_messages() {
    let server = FakeServer::new();
    server.append("INBOX", raw("a", "one"), Flags::from(Flag::Seen));

    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(store.clone());

    let mut conn = connect(&server).await;
    engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    server.append("INBOX", raw("b", "two"), Flags::default());
    let report = engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    assert!(!report.bootstrapped);
    assert_eq!(report.new_messages, 1);
    assert_eq!(report.last_synced_uid, 2);

    let folder = store.find_folder("account", "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.unread_count, 1);
    assert_eq!(store.list_uids(&folder.id).await.unwrap(), vec![1, 2]);
}

#[test_log::test(tokio::test)]
async fn flag_changes_are_mirrored_and_counted() {
    let server = FakeServer::new();
    let uid = server.append("INBOX", raw("a", "one"), Flags::default());

    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(store.clone());

    let mut conn = connect(&server).await;
    engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    server.set_flag("INBOX", uid, Flag::Seen, true);
    let report = engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    assert_eq!(report.flag_updates, 1);

    let folder = store.find_folder("account", "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.unread_count, 0);
    let msg = store
        .find_message_by_uid(&folder.id, uid)
        .await
        .unwrap()
        .unwrap();
    assert!(msg.is_seen());
}

#[test_log::test(tokio::test)]
async fn server_side_deletions_are_detected_by_set_difference() {
    let server = FakeServer::new();
    for id in ["a", "b", "c", "d"] {
        server.append("INBOX", raw(id, "subject"), Flags::default());
    }

    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(store.clone());

    let mut conn = connect(&server).await;
    engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    server.remove("INBOX", 2);
    server.remove("INBOX", 4);
    let report = engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    assert_eq!(report.deleted_messages, 2);

    let folder = store.find_folder("account", "INBOX").await.unwrap().unwrap();
    assert_eq!(store.list_uids(&folder.id).await.unwrap(), vec![1, 3]);
    // deletions trigger a full recount
    assert_eq!(folder.total_count, 2);
    assert_eq!(folder.unread_count, 2);
}

#[test_log::test(tokio::test)]
async fn cursor_never_goes_backward() {
    let server = FakeServer::new();
    for id in ["a", "b", "c"] {
        server.append("INBOX", raw(id, "subject"), Flags::default());
    }

    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(store.clone());

    let mut conn = connect(&server).await;
    engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    server.remove("INBOX", 1);
    server.remove("INBOX", 2);
    server.remove("INBOX", 3);
    let report = engine
        .sync_folder(conn.as_mut(), "account", "INBOX")
        .await
        .unwrap();

    assert_eq!(report.deleted_messages, 3);
    assert_eq!(report.last_synced_uid, 3);

    let folder = store.find_folder("account", "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.last_synced_uid, 3);
}

#[test_log::test(tokio::test)]
async fn missing_mailbox_cascade_deletes_and_still_succeeds() {
    let server = FakeServer::new();
    server.create_mailbox("Archive");
    server.append("Archive", raw("a", "old"), Flags::default());

    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(store.clone());

    let mut conn = connect(&server).await;
    engine
        .sync_folder(conn.as_mut(), "account", "Archive")
        .await
        .unwrap();
    assert!(store
        .find_folder("account", "Archive")
        .await
        .unwrap()
        .is_some());

    server.delete_mailbox("Archive");
    let report = engine
        .sync_folder(conn.as_mut(), "account", "Archive")
        .await
        .unwrap();

    assert!(report.folder_deleted);
    assert_eq!(report.deleted_messages, 1);
    assert!(store
        .find_folder("account", "Archive")
        .await
        .unwrap()
        .is_none());
}

#[test_log::test(tokio::test)]
async fn full_account_sync_reconciles_the_folder_list() {
    let server = FakeServer::new();
    server.create_mailbox("Sent");
    server.append("INBOX", raw("a", "one"), Flags::default());
    server.append("Sent", raw("b", "two"), Flags::from(Flag::Seen));

    let store = Arc::new(MemoryStore::new());
    store.insert_account(account()).await.unwrap();
    let engine = SyncEngine::new(store.clone());

    let report = engine
        .sync_account(&server.connector(), &account())
        .await
        .unwrap();
    assert!(report.is_ok());
    assert_eq!(report.folders.len(), 2);

    // a folder dropped from the listing disappears locally too
    server.delete_mailbox("Sent");
    let report = engine
        .sync_account(&server.connector(), &account())
        .await
        .unwrap();
    assert!(report.is_ok());
    assert_eq!(report.deleted_folders, vec!["Sent".to_string()]);
    assert!(store.find_folder("account", "Sent").await.unwrap().is_none());

    let account = store.find_account("account").await.unwrap().unwrap();
    assert!(account.last_sync_at.is_some());
}

#[test_log::test(tokio::test)]
async fn vanished_folder_keeps_the_account_sync_ok() {
    let server = FakeServer::new();
    server.create_mailbox("Shortlived");
    server.append("INBOX", raw("a", "one"), Flags::default());

    let store = Arc::new(MemoryStore::new());
    store.insert_account(account()).await.unwrap();
    let engine = SyncEngine::new(store.clone());

    let report = engine
        .sync_account(&server.connector(), &account())
        .await
        .unwrap();
    assert!(report.is_ok());

    server.delete_mailbox("Shortlived");
    let report = engine
        .sync_account(&server.connector(), &account())
        .await
        .unwrap();

    assert!(report.is_ok());
    assert_eq!(report.deleted_folders, vec!["Shortlived".to_string()]);
    assert!(store
        .find_folder("account", "INBOX")
        .await
        .unwrap()
        .is_some());
}
