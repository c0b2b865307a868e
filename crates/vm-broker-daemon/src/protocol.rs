//! Protocol types for daemon communication
//!
//! Every WebSocket text frame carries one JSON document. Clients send an
//! [`Envelope`] and receive exactly one [`Reply`] with the same `id`:
//!
//! ```json
//! {"id": 1, "request": {"type": "Stop", "name": "vm1"}}
//! {"id": 1, "response": {"type": "TransactionStarted", "transaction": 7}}
//! ```
//!
//! Replies on one connection may arrive out of order; a blocked
//! `*Result` request never holds back the replies to later requests.

use serde::{Deserialize, Serialize};
use vm_broker::{
    CreateArgs, CreateResult, Error, InstanceDetails, OperationErrorKind, StartArgs,
    TransactionId, TransactionInfo,
};

/// A request tagged with a client-chosen correlation id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id echoed in the reply
    pub id: u64,
    /// The request itself
    pub request: Request,
}

/// The answer to one [`Envelope`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// Correlation id of the request; `None` when the frame could not be parsed
    pub id: Option<u64>,
    /// The response
    pub response: Response,
}

/// Request messages from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Begin creating an instance
    Create(CreateArgs),
    /// Next creation result
    CreateResult { transaction: TransactionId },

    /// Begin starting an instance
    Start(StartArgs),
    /// Outcome of a start
    StartResult { transaction: TransactionId },

    /// Begin a graceful stop
    Stop { name: String },
    /// Outcome of a stop
    StopResult { transaction: TransactionId },

    /// Begin a forceful quit
    Quit { name: String },
    /// Outcome of a quit
    QuitResult { transaction: TransactionId },

    /// Begin deleting an instance
    Delete { name: String },
    /// Outcome of a deletion
    DeleteResult { transaction: TransactionId },

    /// Begin looking up an instance
    GetInstanceDetails { name: String },
    /// Details of the instance
    GetInstanceDetailsResult { transaction: TransactionId },

    /// Begin listing instances
    GetInstances,
    /// Names of all instances
    GetInstancesResult { transaction: TransactionId },

    /// Cancel a transaction
    Cancel { transaction: TransactionId },

    /// List live transactions
    ListTransactions,
}

/// Machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Cancelled by the client or by daemon shutdown
    Cancelled,
    /// The transaction id is not live
    UnknownTransaction,
    /// The named instance does not exist
    NotFound,
    /// The named instance already exists
    AlreadyExists,
    /// The backend failed the operation
    Backend,
    /// The result did not match the request
    UnexpectedResult,
    /// The broker is not accepting work
    Unavailable,
    /// The frame could not be understood
    InvalidRequest,
}

/// Response messages from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// An operation was accepted
    TransactionStarted { transaction: TransactionId },

    /// A creation result, partial or final
    Created { result: CreateResult },

    /// The operation succeeded
    Done,

    /// Details of an instance
    InstanceDetails { details: InstanceDetails },

    /// Names of all instances
    Instances { names: Vec<String> },

    /// A cancellation was queued
    CancelRequested,

    /// Live transactions
    Transactions { transactions: Vec<TransactionInfo> },

    /// The request failed
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Error response for a frame that could not be parsed
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Response::Error {
            code: ErrorCode::InvalidRequest,
            message: message.into(),
        }
    }
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Cancelled => ErrorCode::Cancelled,
            Error::UnknownTransaction(_) => ErrorCode::UnknownTransaction,
            Error::Operation(op) => match op.kind {
                OperationErrorKind::NotFound => ErrorCode::NotFound,
                OperationErrorKind::AlreadyExists => ErrorCode::AlreadyExists,
                OperationErrorKind::Cancelled => ErrorCode::Cancelled,
                OperationErrorKind::Backend => ErrorCode::Backend,
            },
            Error::UnexpectedResult { .. } => ErrorCode::UnexpectedResult,
            Error::DispatcherClosed | Error::Config(_) => ErrorCode::Unavailable,
        }
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        Response::Error {
            code: ErrorCode::from(&err),
            message: err.to_string(),
        }
    }
}
