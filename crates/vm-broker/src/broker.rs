//! Broker assembly
//!
//! [`BrokerBuilder`] wires a façade to a freshly spawned dispatcher:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vm_broker::{Broker, SimulatedService};
//!
//! # async fn run() -> vm_broker::Result<()> {
//! let broker = Broker::builder().build(Arc::new(SimulatedService::new()))?;
//! let api = broker.api();
//!
//! let id = api.get_instances().await?;
//! let names = api.get_instances_result(id).await?;
//! println!("{:?}", names);
//!
//! broker.shutdown();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::ServerApi;
use crate::config::BrokerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::runtime::{SmolSpawner, Spawner};
use crate::service::InstanceService;

/// A running broker
#[derive(Debug, Clone)]
pub struct Broker {
    api: ServerApi,
    shutdown: CancellationToken,
}

impl Broker {
    /// Start configuring a broker
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// The request façade; clone it freely
    pub fn api(&self) -> ServerApi {
        self.api.clone()
    }

    /// The process-wide shutdown signal
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Fire the shutdown signal
    ///
    /// Stops the dispatcher, cancels every live transaction and unblocks
    /// every pending façade call with a cancellation error.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Broker shutdown requested");
        }
        self.shutdown.cancel();
    }
}

/// Builder for [`Broker`]
pub struct BrokerBuilder {
    config: BrokerConfig,
    spawner: Arc<dyn Spawner>,
    shutdown: CancellationToken,
}

impl BrokerBuilder {
    /// Create a builder with the default configuration and the smol spawner
    pub fn new() -> Self {
        Self {
            config: BrokerConfig::default(),
            spawner: Arc::new(SmolSpawner),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use the given configuration
    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the dispatcher and operations on a custom spawner
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Tie the broker to an existing shutdown signal
    pub fn with_shutdown_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Spawn the dispatcher and return the running broker
    pub fn build(self, service: Arc<dyn InstanceService>) -> Result<Broker> {
        let spawner = self.spawner.clone();
        let (broker, dispatcher) = self.build_parts(service)?;
        spawner.spawn(Box::pin(dispatcher.run()));
        Ok(broker)
    }

    /// Assemble the broker without starting its dispatcher
    ///
    /// The caller is responsible for driving [`Dispatcher::run`].
    pub fn build_parts(self, service: Arc<dyn InstanceService>) -> Result<(Broker, Dispatcher)> {
        self.config.validate()?;

        let (actions_tx, actions_rx) = async_channel::bounded(self.config.action_queue_capacity);
        let dispatcher = Dispatcher::new(
            actions_rx,
            service,
            self.spawner,
            self.shutdown.clone(),
            self.config,
        );
        let broker = Broker {
            api: ServerApi::new(actions_tx, self.shutdown.clone()),
            shutdown: self.shutdown,
        };

        Ok((broker, dispatcher))
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
