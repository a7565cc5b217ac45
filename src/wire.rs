//! Module dedicated to the real-time wire messages.
//!
//! The JSON messages exchanged with real-time clients over the
//! delivery transport (kept out of this library). Message types are
//! namespaced strings (`idle:start`, `email:new`), payload fields are
//! camel-cased.

use serde::{Deserialize, Serialize};

use crate::{
    sync::{SyncEvent, SyncStatus},
    watch::WatcherEvent,
};

/// An inbound message, sent by a real-time client.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    /// Start watching an account. Without a folder path the inbox is
    /// watched.
    #[serde(rename = "idle:start", rename_all = "camelCase")]
    IdleStart {
        account_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folder_path: Option<String>,
    },

    #[serde(rename = "idle:stop", rename_all = "camelCase")]
    IdleStop { account_id: String },
}

/// An outbound message, pushed to a real-time client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth:success", rename_all = "camelCase")]
    AuthSuccess {
        identity: String,
        session_id: String,
    },

    #[serde(rename = "auth:error")]
    AuthError { error: String },

    #[serde(rename = "idle:started", rename_all = "camelCase")]
    IdleStarted {
        account_id: String,
        folder_path: String,
        success: bool,
    },

    #[serde(rename = "idle:error", rename_all = "camelCase")]
    IdleError { account_id: String, error: String },

    #[serde(rename = "idle:stopped", rename_all = "camelCase")]
    IdleStopped { account_id: String, success: bool },

    #[serde(rename = "email:new", rename_all = "camelCase")]
    EmailNew {
        account_id: String,
        folder_path: String,
        count: u32,
    },

    #[serde(rename = "email:update", rename_all = "camelCase")]
    EmailUpdate {
        account_id: String,
        folder_path: String,
        seqno: u32,
    },

    #[serde(rename = "email:deleted", rename_all = "camelCase")]
    EmailDeleted {
        account_id: String,
        folder_path: String,
        seqno: u32,
    },

    #[serde(rename = "sync:progress", rename_all = "camelCase")]
    SyncProgress {
        account_id: String,
        status: SyncStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl From<WatcherEvent> for ServerMessage {
    fn from(event: WatcherEvent) -> Self {
        match event {
            WatcherEvent::NewEmail {
                account_id, folder, ..
            } => Self::EmailNew {
                account_id,
                folder_path: folder,
                count: 1,
            },
            WatcherEvent::EmailUpdated {
                account_id,
                folder,
                uid,
                ..
            } => Self::EmailUpdate {
                account_id,
                folder_path: folder,
                seqno: uid,
            },
            WatcherEvent::EmailDeleted {
                account_id,
                folder,
                uid,
            } => Self::EmailDeleted {
                account_id,
                folder_path: folder,
                seqno: uid,
            },
            WatcherEvent::Degraded {
                account_id, reason, ..
            } => Self::IdleError {
                account_id,
                error: reason,
            },
        }
    }
}

impl From<SyncEvent> for ServerMessage {
    fn from(event: SyncEvent) -> Self {
        match event {
            SyncEvent::FolderProgress {
                account_id,
                folder,
                processed,
                total,
            } => Self::SyncProgress {
                account_id,
                status: SyncStatus::Syncing,
                progress: Some(processed as f32 / total.max(1) as f32),
                message: Some(folder),
            },
            SyncEvent::AccountProgress {
                account_id,
                status,
                progress,
                message,
            } => Self::SyncProgress {
                account_id,
                status,
                progress,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn client_messages_use_namespaced_types_and_camel_case_fields() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "idle:start", "accountId": "a"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::IdleStart {
                account_id: "a".into(),
                folder_path: None,
            }
        );

        let msg = ClientMessage::IdleStop {
            account_id: "a".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "idle:stop", "accountId": "a"}),
        );
    }

    #[test]
    fn new_email_events_map_to_email_new_messages() {
        let msg = ServerMessage::from(WatcherEvent::NewEmail {
            account_id: "a".into(),
            folder: "INBOX".into(),
            message: Default::default(),
        });

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "email:new",
                "accountId": "a",
                "folderPath": "INBOX",
                "count": 1,
            }),
        );
    }

    #[test]
    fn sync_progress_omits_absent_fields() {
        let msg = ServerMessage::SyncProgress {
            account_id: "a".into(),
            status: SyncStatus::Completed,
            progress: None,
            message: None,
        };

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "sync:progress", "accountId": "a", "status": "completed"}),
        );
    }
}
