//! VM Broker Library
//!
//! Asynchronous, transaction-tracked dispatch of VM lifecycle operations.
//! Each request is split into an initiator that returns a transaction id
//! immediately and a result accessor that blocks until the outcome is
//! known. A single dispatcher task owns the table of in-flight
//! transactions; every operation runs on its own task and reports through a
//! per-transaction result channel. Transactions can be cancelled
//! individually, and a process-wide shutdown signal unblocks every pending
//! call.
//!
//! The lifecycle backend is pluggable through [`InstanceService`];
//! [`SimulatedService`] provides an in-memory implementation.

#![warn(missing_docs)]

pub mod action;
pub mod api;
pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod runner;
pub mod runtime;
pub mod service;
pub mod sim;
pub mod transaction;
pub mod types;

pub use api::ServerApi;
pub use broker::{Broker, BrokerBuilder};
pub use config::{BrokerConfig, ConfigError};
pub use error::{Error, OperationError, OperationErrorKind, Result};
pub use runner::ProgressSink;
pub use service::{InstanceService, OperationContext};
pub use sim::SimulatedService;
pub use transaction::{TransactionInfo, TransactionState};
pub use tokio_util::sync::CancellationToken;
pub use types::{
    CreateArgs, CreateResult, InstanceDetails, Mount, PortMapping, SshConfig, StartArgs,
    TransactionId, VmSpec,
};

/// Convenience prelude for vm-broker users
pub mod prelude {
    pub use crate::api::ServerApi;
    pub use crate::broker::Broker;
    pub use crate::error::{Error, OperationError, Result};
    pub use crate::runner::ProgressSink;
    pub use crate::service::{InstanceService, OperationContext};
    pub use crate::types::{CreateArgs, CreateResult, InstanceDetails, StartArgs, TransactionId, VmSpec};

    pub use async_trait::async_trait;
}
