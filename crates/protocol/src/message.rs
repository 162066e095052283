//! Message definitions.
//!
//! All messages are JSON objects. Requests are tagged by their `action`
//! field; responses are a single shape with optional fields so a worker
//! can answer any request kind with the same type.

use corelib::{ListKey, WorkerAddress};
use serde::{Deserialize, Serialize};

/// The payload of a list as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPayload {
    pub url: ListKey,
    pub name: String,
    pub creator: String,
}

/// A request, client-originated or internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Create (or re-apply) a list. `is_replica` is false on the client
    /// path and true when a router fan-out re-enters the write.
    CreateList {
        url: ListKey,
        name: String,
        creator: String,
        #[serde(default)]
        is_replica: bool,
    },
    /// Tombstone a list.
    DeleteList { list_url: ListKey },
    /// Read a list.
    GetList { url: ListKey },
    /// Probe existence without reading the payload.
    CheckList { list_url: ListKey },
    /// Router → replica: re-apply a client write as a replica copy.
    ReplicateWrite { original_data: Box<Request> },
    /// Router → holder: push one key to another worker.
    ReplicateData {
        data_key: ListKey,
        target_worker: WorkerAddress,
    },
    /// Worker → worker: a pushed copy arriving on the replication channel.
    ReceiveReplication {
        data: ListPayload,
        source_worker: WorkerAddress,
    },
    /// Enumerate the active keys a worker holds.
    ListKeys,
}

impl Request {
    /// The key a request operates on, when it names one.
    pub fn key(&self) -> Option<&ListKey> {
        match self {
            Request::CreateList { url, .. } | Request::GetList { url } => Some(url),
            Request::DeleteList { list_url } | Request::CheckList { list_url } => Some(list_url),
            Request::ReplicateWrite { original_data } => original_data.key(),
            Request::ReplicateData { data_key, .. } => Some(data_key),
            Request::ReceiveReplication { data, .. } => Some(&data.url),
            Request::ListKeys => None,
        }
    }
}

/// Outcome marker of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// A structured response. Handlers never leak internals; failures carry a
/// human-readable `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub had_list: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<ListKey>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_replication: Option<bool>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            message: None,
            list: None,
            had_list: None,
            exists: None,
            active: None,
            keys: None,
            requires_replication: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_list(mut self, list: ListPayload) -> Self {
        self.list = Some(list);
        self
    }

    pub fn with_had_list(mut self, had_list: bool) -> Self {
        self.had_list = Some(had_list);
        self
    }

    pub fn with_existence(mut self, exists: bool, active: bool) -> Self {
        self.exists = Some(exists);
        self.active = Some(active);
        self
    }

    pub fn with_keys(mut self, keys: Vec<ListKey>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_requires_replication(mut self, required: bool) -> Self {
        self.requires_replication = Some(required);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Router → worker framing: the original request plus the identity of the
/// client it came from. Internal requests carry no client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub request: Request,
}

/// Worker → router framing, mirroring [`RequestEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub response: Response,
}

/// First frame a worker sends on the router's worker channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHello {
    pub worker_address: WorkerAddress,
}

/// Periodic liveness message on the heartbeat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_address: WorkerAddress,
}

/// Router's reply to a heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub status: String,
}

impl HeartbeatAck {
    pub fn ack() -> Self {
        Self {
            status: "ack".to_owned(),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.status == "ack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_tag_by_action() {
        let request = Request::DeleteList {
            list_url: ListKey::new("k1"),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["action"], "delete_list");
        assert_eq!(json["list_url"], "k1");
    }

    #[test]
    fn create_list_defaults_to_primary_apply() {
        // A client request has no is_replica field at all.
        let json = r#"{"action":"create_list","url":"k1","name":"g","creator":"c"}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        match request {
            Request::CreateList { is_replica, .. } => assert!(!is_replica),
            other => panic!("parsed wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let json = r#"{"action":"explode","url":"k1"}"#;
        assert!(serde_json::from_str::<Request>(json).is_err());
    }

    #[test]
    fn response_omits_unset_fields() {
        let response = Response::success().with_had_list(true);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["had_list"], true);
        assert!(json.get("list").is_none());
        assert!(json.get("exists").is_none());
    }

    #[test]
    fn envelope_without_client_is_internal() {
        let envelope = RequestEnvelope {
            client: None,
            request: Request::ListKeys,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("client").is_none());
    }
}
