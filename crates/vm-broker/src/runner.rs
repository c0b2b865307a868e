//! Operation runner
//!
//! Runs exactly one operation against the instance service and writes its
//! outcome onto the transaction's result channel: any number of progress
//! values (creation only) followed by one terminal value. Once the
//! transaction is cancelled nothing more is written, and a write never
//! outlives the cancellation, so an unread channel cannot wedge the runner.

use async_channel::Sender;
use futures::FutureExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::action::{Operation, Payload, ResultValue};
use crate::error::OperationError;
use crate::service::{InstanceService, OperationContext};
use crate::types::CreateResult;

/// Channel through which a creation reports progress
#[derive(Debug, Clone)]
pub struct ProgressSink {
    results: Sender<ResultValue>,
    token: CancellationToken,
}

impl ProgressSink {
    pub(crate) fn new(results: Sender<ResultValue>, token: CancellationToken) -> Self {
        Self { results, token }
    }

    /// Report a non-terminal creation result
    ///
    /// Blocks until the caller has room to receive it. `finished` is cleared
    /// whatever its value. Fails with a cancellation error once the
    /// transaction is cancelled or its results are no longer wanted.
    pub async fn send(&self, mut progress: CreateResult) -> Result<(), OperationError> {
        progress.finished = false;
        if deliver(&self.results, &self.token, ResultValue::Progress(progress)).await {
            Ok(())
        } else {
            Err(OperationError::cancelled())
        }
    }

    /// Report a progress line
    pub async fn line(&self, line: impl Into<String>) -> Result<(), OperationError> {
        self.send(CreateResult::progress(line)).await
    }
}

/// Write one value unless the transaction is cancelled first
///
/// Returns whether the value was accepted by the channel.
async fn deliver(results: &Sender<ResultValue>, token: &CancellationToken, value: ResultValue) -> bool {
    if token.is_cancelled() {
        return false;
    }

    futures::select_biased! {
        _ = token.cancelled().fuse() => false,
        sent = results.send(value).fuse() => sent.is_ok(),
    }
}

/// Run `operation` to completion and deliver its terminal value
pub(crate) async fn run_operation(
    operation: Operation,
    ctx: OperationContext,
    service: Arc<dyn InstanceService>,
    results: Sender<ResultValue>,
) {
    let id = ctx.id();
    let kind = operation.kind();
    debug!("Running {} for transaction {}", kind, id);

    let outcome = match operation {
        Operation::Create(args) => {
            let progress = ProgressSink::new(results.clone(), ctx.token().clone());
            service
                .create(&ctx, args, &progress)
                .await
                .map(|mut created| {
                    created.finished = true;
                    Payload::Created(created)
                })
        }
        Operation::Start(args) => service
            .start(&ctx, &args.name, &args.vm_spec)
            .await
            .map(|()| Payload::Done),
        Operation::Stop { name } => service.stop(&ctx, &name).await.map(|()| Payload::Done),
        Operation::Quit { name } => service.quit(&ctx, &name).await.map(|()| Payload::Done),
        Operation::Delete { name } => service.delete(&ctx, &name).await.map(|()| Payload::Done),
        Operation::Status { name } => service.status(&ctx, &name).await.map(Payload::Details),
        Operation::ListInstances => service.get_instances(&ctx).await.map(Payload::Instances),
    };

    if ctx.is_cancelled() {
        debug!("Transaction {} cancelled, dropping its {} outcome", id, kind);
        return;
    }

    let value = match outcome {
        Ok(payload) => ResultValue::Final(payload),
        Err(err) => ResultValue::Failed(err),
    };

    if deliver(&results, ctx.token(), value).await {
        debug!("Transaction {} delivered its {} outcome", id, kind);
    } else {
        debug!("Transaction {} outcome no longer wanted", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedService;
    use crate::types::{CreateArgs, TransactionId};
    use std::time::Duration;

    fn context(token: &CancellationToken) -> OperationContext {
        OperationContext::new(TransactionId::new(1), token.clone())
    }

    #[smol_potat::test]
    async fn test_create_delivers_progress_then_final() {
        let service = Arc::new(
            SimulatedService::new().with_creation_steps(["Downloading", "Booting"]),
        );
        let token = CancellationToken::new();
        let (tx, rx) = async_channel::bounded(1);

        smol::spawn(run_operation(
            Operation::Create(CreateArgs::named("vm1")),
            context(&token),
            service,
            tx,
        ))
        .detach();

        let mut values = Vec::new();
        while let Ok(value) = rx.recv().await {
            values.push(value);
        }

        assert_eq!(values.len(), 3);
        assert!(matches!(&values[0], ResultValue::Progress(p) if !p.finished));
        assert!(matches!(&values[1], ResultValue::Progress(p) if !p.finished));
        match &values[2] {
            ResultValue::Final(Payload::Created(created)) => {
                assert!(created.finished);
                assert_eq!(created.name, "vm1");
            }
            other => panic!("unexpected terminal value: {:?}", other),
        }
    }

    #[smol_potat::test]
    async fn test_operation_error_is_terminal() {
        let service = Arc::new(SimulatedService::new());
        let token = CancellationToken::new();
        let (tx, rx) = async_channel::bounded(1);

        run_operation(
            Operation::Stop {
                name: "missing".to_string(),
            },
            context(&token),
            service,
            tx,
        )
        .await;

        assert_eq!(
            rx.recv().await.unwrap(),
            ResultValue::Failed(OperationError::not_found("missing"))
        );
        assert!(rx.recv().await.is_err());
    }

    #[smol_potat::test]
    async fn test_cancelled_runner_does_not_block_on_unread_channel() {
        let service = Arc::new(
            SimulatedService::new().with_creation_steps(["one", "two", "three"]),
        );
        let token = CancellationToken::new();
        let (tx, rx) = async_channel::bounded(1);

        let runner = smol::spawn(run_operation(
            Operation::Create(CreateArgs::named("vm1")),
            context(&token),
            service.clone(),
            tx,
        ));

        // let the first progress value fill the channel, then cancel
        smol::Timer::after(Duration::from_millis(20)).await;
        token.cancel();
        runner.await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert!(!service.contains("vm1"));
    }

    #[smol_potat::test]
    async fn test_progress_sink_clears_finished_flag() {
        let token = CancellationToken::new();
        let (tx, rx) = async_channel::bounded(1);
        let sink = ProgressSink::new(tx, token.clone());

        sink.send(CreateResult::finished("sneaky")).await.unwrap();
        match rx.recv().await.unwrap() {
            ResultValue::Progress(progress) => assert!(!progress.finished),
            other => panic!("unexpected value: {:?}", other),
        }

        token.cancel();
        assert_eq!(
            sink.line("late").await,
            Err(OperationError::cancelled())
        );
    }
}
