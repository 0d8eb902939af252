//! Request and reply types.

use serde::{Deserialize, Serialize};

/// Parameters of the `Query` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Registered database name
    pub database: String,
    /// Table holding the series
    pub table: String,
    /// Field key within the table
    pub field: String,
}

impl QueryRequest {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            field: field.into(),
        }
    }
}

/// Result of the `Query` call.
///
/// `timestamps` and `means` are parallel and ordered by ascending time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReply {
    pub timestamps: Vec<i64>,
    pub means: Vec<i64>,
}

impl QueryReply {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Iterate `(timestamp, mean)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.timestamps.iter().copied().zip(self.means.iter().copied())
    }
}

/// A remote call and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Call {
    Query(QueryRequest),
}

impl Call {
    /// Method name used in logs.
    pub fn method(&self) -> &'static str {
        match self {
            Call::Query(_) => "TamDB.Query",
        }
    }
}

/// Client to server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub call: Call,
}

/// Outcome of a call. Errors carry only a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Query(QueryReply),
    Error { message: String },
}

/// Server to client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub reply: Reply,
}

impl Response {
    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            reply: Reply::Error {
                message: message.into(),
            },
        }
    }
}
