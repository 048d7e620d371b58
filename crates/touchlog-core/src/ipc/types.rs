//! Request/response envelopes for daemon IPC.
//!
//! Both sides exchange one JSON value per message over the Unix socket:
//!
//! ```text
//! Request:  {"version":1,"type":"Status"|"QueryExecute"|"ReindexPaths"|"Shutdown","payload":...}
//! Response: {"version":1,"success":true,"error":"...","data":...}
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::SearchResult;

/// Current IPC protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Command carried by a [`Message`]. Unrecognised names are kept so the
/// server can report them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Status,
    QueryExecute,
    ReindexPaths,
    Shutdown,
    Other(String),
}

/// A missing `type` decodes as an empty unknown name.
impl Default for MessageType {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Status" => Self::Status,
            "QueryExecute" => Self::QueryExecute,
            "ReindexPaths" => Self::ReindexPaths,
            "Shutdown" => Self::Shutdown,
            _ => Self::Other(s),
        }
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Status => "Status",
            Self::QueryExecute => "QueryExecute",
            Self::ReindexPaths => "ReindexPaths",
            Self::Shutdown => "Shutdown",
            Self::Other(name) => name,
        })
    }
}

/// A client request.
///
/// Missing `version` and `type` fields decode as zero values so the server
/// can still answer with an error instead of dropping the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub version: u32,
    #[serde(default, rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    pub fn new(kind: MessageType) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            payload: None,
        }
    }

    pub fn with_payload<T: Serialize>(kind: MessageType, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            kind,
            payload: Some(serde_json::to_value(payload)?),
        })
    }

    pub fn status() -> Self {
        Self::new(MessageType::Status)
    }

    pub fn shutdown() -> Self {
        Self::new(MessageType::Shutdown)
    }

    pub fn query(query: impl Into<String>) -> serde_json::Result<Self> {
        Self::with_payload(
            MessageType::QueryExecute,
            &QueryExecuteRequest {
                query: query.into(),
            },
        )
    }

    pub fn reindex(paths: Vec<String>) -> serde_json::Result<Self> {
        Self::with_payload(MessageType::ReindexPaths, &ReindexPathsRequest { paths })
    }

    /// Decode the payload into `T`. An absent payload decodes as JSON `null`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone().unwrap_or(Value::Null))
    }
}

/// The server's reply to one [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub version: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            success: true,
            error: None,
            data: None,
        }
    }

    /// Successful response carrying `data`; a serialisation failure becomes
    /// an error response.
    pub fn ok_with<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                data: Some(value),
                ..Self::ok()
            },
            Err(e) => Self::error(format!("encoding response: {e}")),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            success: false,
            error: Some(message.into()),
            data: None,
        }
    }

    /// Decode `data` into `T`. Absent data decodes as JSON `null`.
    pub fn decode_data<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.clone().unwrap_or(Value::Null))
    }
}

/// `Status` reply data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pid: u32,
}

fn is_zero(pid: &u32) -> bool {
    *pid == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryExecuteRequest {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryExecuteResponse {
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexPathsRequest {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexPathsResponse {
    pub processed: usize,
}
