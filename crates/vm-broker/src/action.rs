//! Messages exchanged between the request façade and the dispatcher
//!
//! Every interaction with the transaction table is one [`Action`] sent over
//! the dispatcher's inbound channel. Operations are described by the
//! [`Operation`] enum rather than captured in closures, and the values an
//! operation produces travel as [`ResultValue`]s, so both the set of requests
//! and the set of outcomes are exhaustively matched.

use async_channel::Receiver;
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::error::{OperationError, Result};
use crate::transaction::TransactionInfo;
use crate::types::{CreateArgs, CreateResult, InstanceDetails, StartArgs, TransactionId};

/// A lifecycle operation together with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create a new instance
    Create(CreateArgs),
    /// Start an existing instance
    Start(StartArgs),
    /// Gracefully stop an instance
    Stop {
        /// Instance name
        name: String,
    },
    /// Forcefully quit an instance
    Quit {
        /// Instance name
        name: String,
    },
    /// Delete an instance
    Delete {
        /// Instance name
        name: String,
    },
    /// Retrieve the details of an instance
    Status {
        /// Instance name
        name: String,
    },
    /// Retrieve the names of all instances
    ListInstances,
}

impl Operation {
    /// The operation family
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create(_) => OperationKind::Create,
            Operation::Start(_) => OperationKind::Start,
            Operation::Stop { .. } => OperationKind::Stop,
            Operation::Quit { .. } => OperationKind::Quit,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Status { .. } => OperationKind::Status,
            Operation::ListInstances => OperationKind::ListInstances,
        }
    }
}

/// Operation family, used for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Instance creation
    Create,
    /// Instance start
    Start,
    /// Instance stop
    Stop,
    /// Instance quit
    Quit,
    /// Instance deletion
    Delete,
    /// Instance details lookup
    Status,
    /// Instance listing
    ListInstances,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "create",
            OperationKind::Start => "start",
            OperationKind::Stop => "stop",
            OperationKind::Quit => "quit",
            OperationKind::Delete => "delete",
            OperationKind::Status => "status",
            OperationKind::ListInstances => "list-instances",
        };
        f.write_str(name)
    }
}

/// Terminal payload of a successful operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Final creation result, `finished` is always set
    Created(CreateResult),
    /// Start, stop, quit and delete succeeded
    Done,
    /// Instance details
    Details(InstanceDetails),
    /// Instance names in the order the service reported them
    Instances(Vec<String>),
}

/// One value written to a transaction's result channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultValue {
    /// Non-terminal creation progress; more values follow
    Progress(CreateResult),
    /// Terminal success
    Final(Payload),
    /// Terminal failure
    Failed(OperationError),
}

impl ResultValue {
    /// Whether no further values follow this one
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultValue::Progress(_))
    }
}

/// What a `GetResult` hands back: access to a live transaction's results
#[derive(Debug, Clone)]
pub struct ResultHandle {
    pub(crate) id: TransactionId,
    pub(crate) results: Receiver<ResultValue>,
    pub(crate) token: CancellationToken,
}

impl ResultHandle {
    /// Transaction the handle belongs to
    pub fn id(&self) -> TransactionId {
        self.id
    }
}

/// Message consumed by the dispatcher
#[derive(Debug)]
pub enum Action {
    /// Open a transaction and launch its operation
    Start {
        /// Operation to run
        operation: Operation,
        /// Receives the allocated identifier
        reply: oneshot::Sender<TransactionId>,
    },

    /// Ask for access to a transaction's results
    GetResult {
        /// Transaction to read
        id: TransactionId,
        /// Receives the result handle or an error for unknown and
        /// cancelled transactions
        reply: oneshot::Sender<Result<ResultHandle>>,
    },

    /// Request cancellation of a transaction; best effort, no reply
    Cancel {
        /// Transaction to cancel
        id: TransactionId,
    },

    /// Release a transaction whose terminal value has been consumed
    Complete {
        /// Transaction to release
        id: TransactionId,
    },

    /// Snapshot the live transactions
    Inspect {
        /// Receives one entry per live transaction, ordered by identifier
        reply: oneshot::Sender<Vec<TransactionInfo>>,
    },
}
