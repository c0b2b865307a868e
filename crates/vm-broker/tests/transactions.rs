//! End-to-end tests of the transaction lifecycle through the request façade

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use vm_broker::{
    Broker, BrokerConfig, CreateArgs, Error, OperationError, SimulatedService, StartArgs,
    TransactionId, TransactionState, VmSpec,
};

fn broker_with(service: SimulatedService) -> Broker {
    Broker::builder()
        .build(Arc::new(service))
        .expect("Failed to build broker")
}

#[smol_potat::test]
async fn test_create_reports_progress_then_releases() {
    let broker = broker_with(SimulatedService::new().with_creation_steps(["Downloading image"]));
    let api = broker.api();

    let id = api.create(CreateArgs::named("vm1")).await.unwrap();
    assert_eq!(id, TransactionId::new(1));

    let progress = api.create_result(id).await.unwrap();
    assert!(!progress.finished);
    assert_eq!(progress.name, "");
    assert_eq!(progress.line.as_deref(), Some("Downloading image"));

    let done = api.create_result(id).await.unwrap();
    assert!(done.finished);
    assert_eq!(done.name, "vm1");

    let err = api.create_result(id).await.unwrap_err();
    assert!(err.is_unknown_transaction());
}

#[smol_potat::test]
async fn test_create_needs_one_call_per_value() {
    let broker = broker_with(SimulatedService::new().with_creation_steps(["one", "two", "three"]));
    let api = broker.api();

    let id = api.create(CreateArgs::default()).await.unwrap();

    for step in ["one", "two", "three"] {
        let progress = api.create_result(id).await.unwrap();
        assert!(!progress.finished);
        assert_eq!(progress.line.as_deref(), Some(step));

        // still held after every partial read
        let live = api.transactions().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, id);
        assert_eq!(live[0].state, TransactionState::ValueReady);
    }

    let done = api.create_result(id).await.unwrap();
    assert!(done.finished);
    assert_eq!(done.name, "vm1");
    assert!(api.transactions().await.unwrap().is_empty());
}

#[smol_potat::test]
async fn test_stop_releases_after_single_read() {
    let broker = broker_with(SimulatedService::new());
    let api = broker.api();

    let id = api.create(CreateArgs::named("vm1")).await.unwrap();
    while !api.create_result(id).await.unwrap().finished {}

    // burn identifiers so the stop lands on 7
    for _ in 0..5 {
        let id = api.get_instances().await.unwrap();
        api.get_instances_result(id).await.unwrap();
    }

    let id = api.stop("vm1").await.unwrap();
    assert_eq!(id.get(), 7);
    api.stop_result(id).await.unwrap();

    let err = api.stop_result(id).await.unwrap_err();
    assert!(err.is_unknown_transaction());
}

#[smol_potat::test]
async fn test_operation_error_is_propagated_and_releases() {
    let broker = broker_with(SimulatedService::new());
    let api = broker.api();

    let id = api.stop("missing").await.unwrap();
    let err = api.stop_result(id).await.unwrap_err();
    assert_eq!(err.operation_error(), Some(&OperationError::not_found("missing")));

    assert!(api.stop_result(id).await.unwrap_err().is_unknown_transaction());
}

#[smol_potat::test]
async fn test_create_error_is_terminal() {
    let broker = broker_with(
        SimulatedService::new()
            .with_instance("vm1", VmSpec::default())
            .with_creation_steps(["never reported"]),
    );
    let api = broker.api();

    let id = api.create(CreateArgs::named("vm1")).await.unwrap();
    let err = api.create_result(id).await.unwrap_err();
    assert_eq!(err.operation_error(), Some(&OperationError::already_exists("vm1")));
    assert!(api.transactions().await.unwrap().is_empty());
}

#[smol_potat::test]
async fn test_cancel_instance_listing() {
    let broker = broker_with(SimulatedService::new().with_operation_delay(Duration::from_secs(30)));
    let api = broker.api();

    let first = api.get_instances().await.unwrap();
    let second = api.get_instances().await.unwrap();
    let id = api.get_instances().await.unwrap();
    assert_eq!(id.get(), 3);

    let reader = {
        let api = api.clone();
        smol::spawn(async move { api.get_instances_result(id).await })
    };
    smol::Timer::after(Duration::from_millis(10)).await;
    api.cancel(id).await.unwrap();

    let err = reader.await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(api.get_instances_result(id).await.unwrap_err().is_cancelled());

    // the cancelled slot is kept, the other listings are untouched
    let live: Vec<_> = api
        .transactions()
        .await
        .unwrap()
        .into_iter()
        .map(|info| (info.id, info.state))
        .collect();
    assert_eq!(
        live,
        vec![
            (first, TransactionState::Pending),
            (second, TransactionState::Pending),
            (id, TransactionState::Cancelled),
        ]
    );
}

#[smol_potat::test]
async fn test_cancel_before_reading() {
    let broker = broker_with(SimulatedService::new().with_operation_delay(Duration::from_secs(30)));
    let api = broker.api();

    let id = api.get_instances().await.unwrap();
    api.cancel(id).await.unwrap();

    for _ in 0..3 {
        assert!(api.get_instances_result(id).await.unwrap_err().is_cancelled());
    }

    let live = api.transactions().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].state, TransactionState::Cancelled);
}

#[smol_potat::test]
async fn test_cancel_during_progress_yields_no_stale_value() {
    let broker = broker_with(
        SimulatedService::new()
            .with_creation_steps(["one", "two", "three"])
            .with_step_delay(Duration::from_millis(5)),
    );
    let api = broker.api();

    let id = api.create(CreateArgs::named("vm1")).await.unwrap();
    let progress = api.create_result(id).await.unwrap();
    assert_eq!(progress.line.as_deref(), Some("one"));

    // let the runner park the next value in the channel
    smol::Timer::after(Duration::from_millis(30)).await;
    api.cancel(id).await.unwrap();

    assert!(api.create_result(id).await.unwrap_err().is_cancelled());
    assert!(api.create_result(id).await.unwrap_err().is_cancelled());
}

#[smol_potat::test]
async fn test_cancel_is_idempotent() {
    let broker = broker_with(SimulatedService::new());
    let api = broker.api();

    api.cancel(TransactionId::new(99)).await.unwrap();

    let id = api.get_instances().await.unwrap();
    api.get_instances_result(id).await.unwrap();
    api.cancel(id).await.unwrap();
    api.cancel(id).await.unwrap();

    assert!(api.transactions().await.unwrap().is_empty());
}

#[smol_potat::test]
async fn test_full_lifecycle() {
    let service = Arc::new(SimulatedService::new());
    let broker = Broker::builder().build(service.clone()).unwrap();
    let api = broker.api();

    let id = api.create(CreateArgs::named("web")).await.unwrap();
    while !api.create_result(id).await.unwrap().finished {}
    assert!(service.is_running("web"));

    let id = api.quit("web").await.unwrap();
    api.quit_result(id).await.unwrap();
    assert!(!service.is_running("web"));

    let spec = VmSpec {
        mem_mib: 4096,
        ..VmSpec::default()
    };
    let id = api
        .start(StartArgs {
            name: "web".to_string(),
            vm_spec: spec.clone(),
        })
        .await
        .unwrap();
    api.start_result(id).await.unwrap();

    let id = api.get_instance_details("web").await.unwrap();
    let details = api.get_instance_details_result(id).await.unwrap();
    assert_eq!(details.name, "web");
    assert_eq!(details.vm_spec, spec);

    let id = api.get_instances().await.unwrap();
    assert_eq!(api.get_instances_result(id).await.unwrap(), vec!["web"]);

    let id = api.stop("web").await.unwrap();
    api.stop_result(id).await.unwrap();

    let id = api.delete("web").await.unwrap();
    api.delete_result(id).await.unwrap();
    assert!(!service.contains("web"));

    let id = api.get_instance_details("web").await.unwrap();
    let err = api.get_instance_details_result(id).await.unwrap_err();
    assert_eq!(err.operation_error(), Some(&OperationError::not_found("web")));

    assert!(api.transactions().await.unwrap().is_empty());
}

#[smol_potat::test]
async fn test_concurrent_callers_get_distinct_ids() {
    let broker = broker_with(SimulatedService::new());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let api = broker.api();
            smol::spawn(async move {
                let id = api.create(CreateArgs::default()).await.unwrap();
                loop {
                    let result = api.create_result(id).await.unwrap();
                    if result.finished {
                        return (id, result.name);
                    }
                }
            })
        })
        .collect();

    let mut ids = BTreeSet::new();
    let mut names = BTreeSet::new();
    for task in tasks {
        let (id, name) = task.await;
        ids.insert(id);
        names.insert(name);
    }

    assert_eq!(ids.len(), 16);
    assert_eq!(names.len(), 16);
    assert!(broker.api().transactions().await.unwrap().is_empty());
}

#[smol_potat::test]
async fn test_shutdown_while_blocked_on_send() {
    let config = BrokerConfig {
        action_queue_capacity: 1,
        ..BrokerConfig::default()
    };
    let (broker, dispatcher) = Broker::builder()
        .with_config(config)
        .build_parts(Arc::new(SimulatedService::new()))
        .unwrap();
    let api = broker.api();

    // fill the queue; nothing drains it yet
    api.cancel(TransactionId::new(1)).await.unwrap();
    assert_eq!(dispatcher.queued_actions(), 1);

    let blocked = {
        let api = api.clone();
        smol::spawn(async move { api.get_instances().await })
    };
    smol::Timer::after(Duration::from_millis(10)).await;

    broker.shutdown();
    assert!(matches!(blocked.await, Err(Error::Cancelled)));
    assert_eq!(dispatcher.queued_actions(), 1);

    // the dispatcher stops without serving the rejected call
    dispatcher.run().await;
    assert!(matches!(api.get_instances().await, Err(Error::Cancelled)));
}

#[smol_potat::test]
async fn test_shutdown_unblocks_result_readers() {
    let broker = broker_with(SimulatedService::new().with_operation_delay(Duration::from_secs(30)));
    let api = broker.api();

    let id = api.delete("anything").await.unwrap();
    let reader = {
        let api = api.clone();
        smol::spawn(async move { api.delete_result(id).await })
    };
    smol::Timer::after(Duration::from_millis(10)).await;

    broker.shutdown();
    assert!(reader.await.unwrap_err().is_cancelled());
}

#[smol_potat::test]
async fn test_abandoned_transactions_are_swept() {
    let config = BrokerConfig::default()
        .with_transaction_ttl(Duration::from_millis(20))
        .with_sweep_interval(Duration::from_millis(10));
    let broker = Broker::builder()
        .with_config(config)
        .build(Arc::new(SimulatedService::new()))
        .unwrap();
    let api = broker.api();

    let id = api.get_instances().await.unwrap();
    smol::Timer::after(Duration::from_millis(100)).await;

    assert!(api.transactions().await.unwrap().is_empty());
    assert!(
        api.get_instances_result(id)
            .await
            .unwrap_err()
            .is_unknown_transaction()
    );
}

#[smol_potat::test]
async fn test_sweep_reclaims_cancelled_transactions() {
    let config = BrokerConfig::default()
        .with_transaction_ttl(Duration::from_millis(20))
        .with_sweep_interval(Duration::from_millis(10));
    let broker = Broker::builder()
        .with_config(config)
        .build(Arc::new(
            SimulatedService::new().with_operation_delay(Duration::from_secs(30)),
        ))
        .unwrap();
    let api = broker.api();

    let id = api.quit("vm1").await.unwrap();
    api.cancel(id).await.unwrap();
    assert!(api.quit_result(id).await.unwrap_err().is_cancelled());

    smol::Timer::after(Duration::from_millis(100)).await;
    assert!(api.transactions().await.unwrap().is_empty());
    assert!(api.quit_result(id).await.unwrap_err().is_unknown_transaction());
}
