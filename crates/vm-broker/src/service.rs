//! The instance service collaborator
//!
//! The broker does not know how instances are created or run. It drives an
//! [`InstanceService`] implementation, one call per transaction, and relays
//! whatever that call returns.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::OperationError;
use crate::runner::ProgressSink;
use crate::types::{CreateArgs, CreateResult, InstanceDetails, TransactionId, VmSpec};

/// Execution context of one operation
///
/// Implementations should check [`OperationContext::is_cancelled`] (or await
/// [`OperationContext::cancelled`]) at natural suspension points and give up
/// with [`OperationError::cancelled`] once it fires. Cancellation is never
/// forced on running work.
#[derive(Debug, Clone)]
pub struct OperationContext {
    id: TransactionId,
    token: CancellationToken,
}

impl OperationContext {
    /// Create a context for a transaction
    pub fn new(id: TransactionId, token: CancellationToken) -> Self {
        Self { id, token }
    }

    /// Transaction the operation belongs to
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Whether the transaction or the whole broker has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the operation is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Fail with a cancellation error if the operation has been cancelled
    pub fn check_cancelled(&self) -> Result<(), OperationError> {
        if self.is_cancelled() {
            Err(OperationError::cancelled())
        } else {
            Ok(())
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Backend performing instance lifecycle operations
///
/// Shared read-only by every running operation; any serialization the
/// backend needs is up to the implementation.
#[async_trait]
pub trait InstanceService: Send + Sync + 'static {
    /// Create an instance
    ///
    /// Progress is reported through `progress`; the returned value is the
    /// terminal result and is delivered with `finished` set.
    async fn create(
        &self,
        ctx: &OperationContext,
        args: CreateArgs,
        progress: &ProgressSink,
    ) -> Result<CreateResult, OperationError>;

    /// Start an existing instance with the given spec
    async fn start(
        &self,
        ctx: &OperationContext,
        name: &str,
        spec: &VmSpec,
    ) -> Result<(), OperationError>;

    /// Gracefully stop an instance
    async fn stop(&self, ctx: &OperationContext, name: &str) -> Result<(), OperationError>;

    /// Forcefully quit an instance
    async fn quit(&self, ctx: &OperationContext, name: &str) -> Result<(), OperationError>;

    /// Delete an instance
    async fn delete(&self, ctx: &OperationContext, name: &str) -> Result<(), OperationError>;

    /// Retrieve the details of an instance
    async fn status(
        &self,
        ctx: &OperationContext,
        name: &str,
    ) -> Result<InstanceDetails, OperationError>;

    /// Retrieve the names of all instances, in a stable order
    async fn get_instances(&self, ctx: &OperationContext) -> Result<Vec<String>, OperationError>;
}
