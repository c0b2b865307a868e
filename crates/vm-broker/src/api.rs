//! Request façade
//!
//! [`ServerApi`] exposes every lifecycle capability as a pair of calls: an
//! initiator that returns a transaction id as soon as the dispatcher has
//! accepted the request, and a result accessor that blocks until the
//! operation has something to report. A typical exchange:
//!
//! ```text
//! start(args)     -> id = 2
//! start_result(2) -> Ok(())
//! ```
//!
//! Creation reports progress, so `create_result` must be called until it
//! returns a result with `finished` set.
//!
//! Every blocking step races the process-wide shutdown signal. A call
//! preempted by shutdown fails with [`Error::Cancelled`] and leaves the
//! transaction table untouched.
//!
//! A cancelled transaction is never released by a read: every later result
//! call on it fails with [`Error::Cancelled`] until the broker shuts down or
//! the abandoned-transaction sweep removes it.

use futures::FutureExt;
use futures::channel::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::action::{Action, Operation, Payload, ResultHandle, ResultValue};
use crate::error::{Error, Result};
use crate::transaction::TransactionInfo;
use crate::types::{CreateArgs, CreateResult, InstanceDetails, StartArgs, TransactionId};

/// Outcome of waiting for a transaction's next value
enum Read {
    Value(ResultValue),
    /// The transaction was cancelled or its runner went away
    Cancelled,
    /// The shutdown signal fired
    Shutdown,
}

/// Synchronous-looking entry points of the broker
#[derive(Debug, Clone)]
pub struct ServerApi {
    actions: async_channel::Sender<Action>,
    shutdown: CancellationToken,
}

impl ServerApi {
    pub(crate) fn new(actions: async_channel::Sender<Action>, shutdown: CancellationToken) -> Self {
        Self { actions, shutdown }
    }

    /// Initiate the creation of an instance
    pub async fn create(&self, args: CreateArgs) -> Result<TransactionId> {
        info!("Create {:?} called", args);
        self.initiate(Operation::Create(args)).await
    }

    /// Wait for the next creation result
    ///
    /// Returns results with `finished == false` while creation is in
    /// progress; keep calling until `finished` is set. The call that sees the
    /// final result, or an operation error, releases the transaction.
    pub async fn create_result(&self, id: TransactionId) -> Result<CreateResult> {
        info!("CreateResult({}) called", id);
        let handle = self.open_results(id).await?;

        let outcome = match self.read(&handle).await {
            Read::Shutdown => return Err(Error::Cancelled),
            Read::Value(ResultValue::Progress(progress)) => {
                debug!("CreateResult({}) progress: {:?}", id, progress.line);
                return Ok(progress);
            }
            Read::Value(ResultValue::Final(Payload::Created(created))) => Ok(created),
            Read::Value(ResultValue::Final(_)) => Err(Error::UnexpectedResult {
                id,
                expected: "create",
            }),
            Read::Value(ResultValue::Failed(err)) => Err(Error::Operation(err)),
            Read::Cancelled => return Err(Error::Cancelled),
        };

        self.complete(id).await;
        info!("CreateResult({}) finished: {:?}", id, outcome.as_ref().err());
        outcome
    }

    /// Initiate the start of an instance
    pub async fn start(&self, args: StartArgs) -> Result<TransactionId> {
        info!("Start [{}] called", args.name);
        self.initiate(Operation::Start(args)).await
    }

    /// Wait until the instance has started or the start failed
    pub async fn start_result(&self, id: TransactionId) -> Result<()> {
        self.void_result("StartResult", id).await
    }

    /// Initiate a graceful stop of an instance
    pub async fn stop(&self, name: &str) -> Result<TransactionId> {
        info!("Stop [{}] called", name);
        self.initiate(Operation::Stop {
            name: name.to_string(),
        })
        .await
    }

    /// Wait until the instance has stopped or the stop failed
    pub async fn stop_result(&self, id: TransactionId) -> Result<()> {
        self.void_result("StopResult", id).await
    }

    /// Initiate a forceful quit of an instance
    pub async fn quit(&self, name: &str) -> Result<TransactionId> {
        info!("Quit [{}] called", name);
        self.initiate(Operation::Quit {
            name: name.to_string(),
        })
        .await
    }

    /// Wait until the instance has quit or the quit failed
    pub async fn quit_result(&self, id: TransactionId) -> Result<()> {
        self.void_result("QuitResult", id).await
    }

    /// Initiate the deletion of an instance
    pub async fn delete(&self, name: &str) -> Result<TransactionId> {
        info!("Delete [{}] called", name);
        self.initiate(Operation::Delete {
            name: name.to_string(),
        })
        .await
    }

    /// Wait until the instance has been deleted or the deletion failed
    pub async fn delete_result(&self, id: TransactionId) -> Result<()> {
        self.void_result("DeleteResult", id).await
    }

    /// Initiate a lookup of an instance's details
    pub async fn get_instance_details(&self, name: &str) -> Result<TransactionId> {
        info!("GetInstanceDetails [{}] called", name);
        self.initiate(Operation::Status {
            name: name.to_string(),
        })
        .await
    }

    /// Wait for an instance's details
    pub async fn get_instance_details_result(&self, id: TransactionId) -> Result<InstanceDetails> {
        self.single_result("GetInstanceDetailsResult", "instance details", id, |payload| {
            match payload {
                Payload::Details(details) => Some(details),
                _ => None,
            }
        })
        .await
    }

    /// Initiate a listing of all instance names
    pub async fn get_instances(&self) -> Result<TransactionId> {
        info!("GetInstances called");
        self.initiate(Operation::ListInstances).await
    }

    /// Wait for the names of all instances
    pub async fn get_instances_result(&self, id: TransactionId) -> Result<Vec<String>> {
        self.single_result("GetInstancesResult", "instance list", id, |payload| {
            match payload {
                Payload::Instances(names) => Some(names),
                _ => None,
            }
        })
        .await
    }

    /// Request cancellation of a transaction
    ///
    /// Returns as soon as the request has been queued; the operation stops
    /// at its next cancellation check. Cancelling an unknown or completed
    /// transaction is not an error.
    pub async fn cancel(&self, id: TransactionId) -> Result<()> {
        info!("Cancel({}) called", id);
        self.submit(Action::Cancel { id }).await
    }

    /// Snapshot of the live transactions, ordered by id
    pub async fn transactions(&self) -> Result<Vec<TransactionInfo>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Action::Inspect { reply }).await?;
        self.await_reply(rx).await
    }

    async fn initiate(&self, operation: Operation) -> Result<TransactionId> {
        let (reply, rx) = oneshot::channel();
        self.submit(Action::Start { operation, reply }).await?;
        let id = self.await_reply(rx).await?;
        info!("Transaction ID {}", id);
        Ok(id)
    }

    async fn void_result(&self, call: &str, id: TransactionId) -> Result<()> {
        self.single_result(call, "completion", id, |payload| match payload {
            Payload::Done => Some(()),
            _ => None,
        })
        .await
    }

    /// Read one terminal value and release the transaction unless it was cancelled
    async fn single_result<T>(
        &self,
        call: &str,
        expected: &'static str,
        id: TransactionId,
        extract: impl FnOnce(Payload) -> Option<T>,
    ) -> Result<T> {
        info!("{}({}) called", call, id);
        let handle = self.open_results(id).await?;

        let outcome = match self.read(&handle).await {
            Read::Shutdown => return Err(Error::Cancelled),
            Read::Value(ResultValue::Final(payload)) => {
                extract(payload).ok_or(Error::UnexpectedResult { id, expected })
            }
            Read::Value(ResultValue::Progress(_)) => Err(Error::UnexpectedResult { id, expected }),
            Read::Value(ResultValue::Failed(err)) => Err(Error::Operation(err)),
            Read::Cancelled => return Err(Error::Cancelled),
        };

        self.complete(id).await;
        info!("{}({}) finished: {:?}", call, id, outcome.as_ref().err());
        outcome
    }

    /// Ask the dispatcher for access to a transaction's results
    async fn open_results(&self, id: TransactionId) -> Result<ResultHandle> {
        let (reply, rx) = oneshot::channel();
        self.submit(Action::GetResult { id, reply }).await?;
        self.await_reply(rx).await?
    }

    async fn read(&self, handle: &ResultHandle) -> Read {
        futures::select_biased! {
            _ = self.shutdown.cancelled().fuse() => Read::Shutdown,
            _ = handle.token.cancelled().fuse() => Read::Cancelled,
            value = handle.results.recv().fuse() => match value {
                Ok(value) => Read::Value(value),
                Err(_) => Read::Cancelled,
            },
        }
    }

    /// Release a transaction; a failure to reach the dispatcher is ignored
    async fn complete(&self, id: TransactionId) {
        if let Err(e) = self.submit(Action::Complete { id }).await {
            debug!("Could not complete transaction {}: {}", id, e);
        }
    }

    async fn submit(&self, action: Action) -> Result<()> {
        futures::select_biased! {
            _ = self.shutdown.cancelled().fuse() => Err(Error::Cancelled),
            sent = self.actions.send(action).fuse() => sent.map_err(|_| Error::DispatcherClosed),
        }
    }

    async fn await_reply<T>(&self, reply: oneshot::Receiver<T>) -> Result<T> {
        futures::select_biased! {
            _ = self.shutdown.cancelled().fuse() => Err(Error::Cancelled),
            value = reply.fuse() => value.map_err(|_| Error::DispatcherClosed),
        }
    }
}
