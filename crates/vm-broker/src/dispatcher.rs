//! The dispatcher actor
//!
//! A single task that owns the transaction table and consumes [`Action`]s
//! one at a time, in arrival order. Every table mutation happens here, so
//! allocation, lookup and release never race. The only slow work an action
//! triggers, running the operation itself, is handed to the spawner.

use async_channel::Receiver;
use futures::FutureExt;
use futures::channel::oneshot;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{Action, Operation};
use crate::config::BrokerConfig;
use crate::runner;
use crate::runtime::{Spawner, Ticker};
use crate::service::{InstanceService, OperationContext};
use crate::transaction::TransactionTable;
use crate::types::TransactionId;

enum Event {
    Action(Action),
    Sweep,
    Stop,
}

/// Actor owning the transaction table
pub struct Dispatcher {
    actions: Receiver<Action>,
    table: TransactionTable,
    service: Arc<dyn InstanceService>,
    spawner: Arc<dyn Spawner>,
    shutdown: CancellationToken,
    config: BrokerConfig,
}

impl Dispatcher {
    pub(crate) fn new(
        actions: Receiver<Action>,
        service: Arc<dyn InstanceService>,
        spawner: Arc<dyn Spawner>,
        shutdown: CancellationToken,
        config: BrokerConfig,
    ) -> Self {
        Self {
            actions,
            table: TransactionTable::new(config.result_buffer),
            service,
            spawner,
            shutdown,
            config,
        }
    }

    /// Number of actions waiting to be processed
    pub fn queued_actions(&self) -> usize {
        self.actions.len()
    }

    /// Process actions until shutdown or until every façade handle is gone
    ///
    /// On exit every live transaction is cancelled.
    pub async fn run(mut self) {
        info!("Dispatcher started");

        let mut ticker = match self.config.transaction_ttl {
            Some(_) => Ticker::every(self.config.sweep_interval),
            None => Ticker::disabled(),
        };

        loop {
            let event = futures::select_biased! {
                _ = self.shutdown.cancelled().fuse() => Event::Stop,
                action = self.actions.recv().fuse() => match action {
                    Ok(action) => Event::Action(action),
                    Err(_) => Event::Stop,
                },
                _ = ticker.tick().fuse() => Event::Sweep,
            };

            match event {
                Event::Action(action) => self.handle(action),
                Event::Sweep => self.sweep(),
                Event::Stop => break,
            }
        }

        let cancelled = self.table.cancel_all();
        info!(
            "Dispatcher stopped, cancelled {} live transaction(s)",
            cancelled
        );
    }

    fn handle(&mut self, action: Action) {
        match action {
            Action::Start { operation, reply } => self.start_transaction(operation, reply),

            Action::GetResult { id, reply } => {
                let result = self.table.get_result(id);
                if let Err(e) = &result {
                    debug!("GetResult({}) rejected: {}", id, e);
                }
                // a caller preempted by shutdown no longer listens
                let _ = reply.send(result);
            }

            Action::Cancel { id } => {
                if self.table.cancel(id) {
                    info!("Transaction {} cancelled", id);
                } else {
                    debug!("Cancel for unknown transaction {} ignored", id);
                }
            }

            Action::Complete { id } => {
                if self.table.complete(id) {
                    debug!("Transaction {} completed", id);
                } else {
                    debug!("Transaction {} already released", id);
                }
            }

            Action::Inspect { reply } => {
                let _ = reply.send(self.table.snapshot());
            }
        }
    }

    fn start_transaction(&mut self, operation: Operation, reply: oneshot::Sender<TransactionId>) {
        let kind = operation.kind();
        let transaction = self.table.allocate(kind, &self.shutdown);
        let id = transaction.id;
        info!("Transaction {} opened for {}", id, kind);

        let ctx = OperationContext::new(id, transaction.token);
        self.spawner.spawn(Box::pin(runner::run_operation(
            operation,
            ctx,
            self.service.clone(),
            transaction.results,
        )));

        if reply.send(id).is_err() {
            warn!(
                "Initiator of transaction {} went away before learning its id, discarding it",
                id
            );
            self.table.discard(id);
        }
    }

    fn sweep(&mut self) {
        let Some(ttl) = self.config.transaction_ttl else {
            return;
        };

        for id in self.table.sweep_expired(ttl) {
            warn!(
                "Transaction {} abandoned for more than {:?}, discarding it",
                id, ttl
            );
        }
    }
}
