//! In-memory instance service
//!
//! [`SimulatedService`] keeps an instance catalogue in memory and walks
//! through configurable creation steps. It exercises the broker end to end
//! without a hypervisor and backs the daemon's simulated mode.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::OperationError;
use crate::runner::ProgressSink;
use crate::runtime::sleep;
use crate::service::{InstanceService, OperationContext};
use crate::types::{CreateArgs, CreateResult, InstanceDetails, SshConfig, VmSpec};

const DEFAULT_WORKLOAD: &str = "ubuntu";
const FIRST_SSH_PORT: u16 = 10022;

#[derive(Debug, Clone)]
struct SimInstance {
    details: InstanceDetails,
    running: bool,
}

/// Instance service backed by an in-memory catalogue
#[derive(Debug)]
pub struct SimulatedService {
    instances: RwLock<BTreeMap<String, SimInstance>>,
    creation_steps: Vec<String>,
    step_delay: Duration,
    operation_delay: Duration,
    next_name: AtomicU64,
    next_ssh_port: AtomicU16,
}

impl SimulatedService {
    /// Create an empty service with the default creation steps
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(BTreeMap::new()),
            creation_steps: vec![
                "Downloading workload image".to_string(),
                "Booting instance".to_string(),
            ],
            step_delay: Duration::ZERO,
            operation_delay: Duration::ZERO,
            next_name: AtomicU64::new(1),
            next_ssh_port: AtomicU16::new(FIRST_SSH_PORT),
        }
    }

    /// Replace the progress lines reported during creation
    pub fn with_creation_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.creation_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Pause between creation steps
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Pause before every non-creation operation completes
    pub fn with_operation_delay(mut self, delay: Duration) -> Self {
        self.operation_delay = delay;
        self
    }

    /// Seed the catalogue with a stopped instance
    pub fn with_instance(self, name: impl Into<String>, spec: VmSpec) -> Self {
        let name = name.into();
        match self.details_for(&name, DEFAULT_WORKLOAD, spec) {
            Ok(details) => {
                self.write().insert(
                    name,
                    SimInstance {
                        details,
                        running: false,
                    },
                );
            }
            Err(e) => warn!("Not seeding simulated instance {}: {}", name, e),
        }
        self
    }

    /// Whether an instance with that name exists
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Whether the named instance is running
    pub fn is_running(&self, name: &str) -> bool {
        self.read().get(name).is_some_and(|i| i.running)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, SimInstance>> {
        self.instances.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, SimInstance>> {
        self.instances.write().unwrap_or_else(|e| e.into_inner())
    }

    fn details_for(
        &self,
        name: &str,
        workload: &str,
        spec: VmSpec,
    ) -> Result<InstanceDetails, OperationError> {
        Ok(InstanceDetails {
            name: name.to_string(),
            workload: workload.to_string(),
            ssh: SshConfig {
                key_path: format!("/var/lib/vm-broker/instances/{}/id_rsa", name),
                port: self.allocate_ssh_port()?,
            },
            vm_spec: spec,
        })
    }

    /// Hand out the next forwarded SSH port; never wraps around
    fn allocate_ssh_port(&self) -> Result<u16, OperationError> {
        self.next_ssh_port
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |port| port.checked_add(1))
            .map_err(|_| OperationError::backend("No SSH ports left to forward"))
    }

    fn generate_name(&self) -> String {
        format!("vm{}", self.next_name.fetch_add(1, Ordering::SeqCst))
    }

    async fn pause(ctx: &OperationContext, delay: Duration) -> Result<(), OperationError> {
        if !delay.is_zero() {
            futures::select_biased! {
                _ = ctx.cancelled().fuse() => {},
                _ = sleep(delay).fuse() => {},
            }
        }
        ctx.check_cancelled()
    }

    fn with_existing<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SimInstance) -> Result<T, OperationError>,
    ) -> Result<T, OperationError> {
        let mut instances = self.write();
        let instance = instances
            .get_mut(name)
            .ok_or_else(|| OperationError::not_found(name))?;
        f(instance)
    }
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceService for SimulatedService {
    async fn create(
        &self,
        ctx: &OperationContext,
        args: CreateArgs,
        progress: &ProgressSink,
    ) -> Result<CreateResult, OperationError> {
        let name = args.name.clone().unwrap_or_else(|| self.generate_name());
        if self.contains(&name) {
            return Err(OperationError::already_exists(&name));
        }

        info!("Creating simulated instance {}", name);
        for step in &self.creation_steps {
            progress.line(step.clone()).await?;
            Self::pause(ctx, self.step_delay).await?;
        }

        let workload = if args.workload.is_empty() {
            DEFAULT_WORKLOAD
        } else {
            args.workload.as_str()
        };
        let details = self.details_for(&name, workload, args.custom_spec.unwrap_or_default())?;

        let mut instances = self.write();
        if instances.contains_key(&name) {
            return Err(OperationError::already_exists(&name));
        }
        instances.insert(
            name.clone(),
            SimInstance {
                details,
                running: true,
            },
        );

        Ok(CreateResult::finished(name))
    }

    async fn start(
        &self,
        ctx: &OperationContext,
        name: &str,
        spec: &VmSpec,
    ) -> Result<(), OperationError> {
        Self::pause(ctx, self.operation_delay).await?;
        self.with_existing(name, |instance| {
            if instance.running {
                return Err(OperationError::backend(format!(
                    "Instance '{}' is already running",
                    name
                )));
            }
            instance.details.vm_spec = spec.clone();
            instance.running = true;
            Ok(())
        })?;
        debug!("Started simulated instance {}", name);
        Ok(())
    }

    async fn stop(&self, ctx: &OperationContext, name: &str) -> Result<(), OperationError> {
        Self::pause(ctx, self.operation_delay).await?;
        self.with_existing(name, |instance| {
            if !instance.running {
                return Err(OperationError::backend(format!(
                    "Instance '{}' is not running",
                    name
                )));
            }
            instance.running = false;
            Ok(())
        })?;
        debug!("Stopped simulated instance {}", name);
        Ok(())
    }

    async fn quit(&self, ctx: &OperationContext, name: &str) -> Result<(), OperationError> {
        Self::pause(ctx, self.operation_delay).await?;
        self.with_existing(name, |instance| {
            instance.running = false;
            Ok(())
        })
    }

    async fn delete(&self, ctx: &OperationContext, name: &str) -> Result<(), OperationError> {
        Self::pause(ctx, self.operation_delay).await?;
        self.write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| OperationError::not_found(name))
    }

    async fn status(
        &self,
        ctx: &OperationContext,
        name: &str,
    ) -> Result<InstanceDetails, OperationError> {
        Self::pause(ctx, self.operation_delay).await?;
        self.read()
            .get(name)
            .map(|instance| instance.details.clone())
            .ok_or_else(|| OperationError::not_found(name))
    }

    async fn get_instances(&self, ctx: &OperationContext) -> Result<Vec<String>, OperationError> {
        Self::pause(ctx, self.operation_delay).await?;
        Ok(self.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationErrorKind;
    use crate::types::TransactionId;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> OperationContext {
        OperationContext::new(TransactionId::new(1), CancellationToken::new())
    }

    #[smol_potat::test]
    async fn test_lifecycle() {
        let service = SimulatedService::new().with_instance("vm1", VmSpec::default());
        let ctx = ctx();

        assert!(!service.is_running("vm1"));
        service.start(&ctx, "vm1", &VmSpec::default()).await.unwrap();
        assert!(service.is_running("vm1"));

        let err = service.start(&ctx, "vm1", &VmSpec::default()).await.unwrap_err();
        assert!(err.message.contains("already running"));

        service.stop(&ctx, "vm1").await.unwrap();
        assert!(service.stop(&ctx, "vm1").await.is_err());

        // quit does not care whether the instance runs
        service.quit(&ctx, "vm1").await.unwrap();

        service.delete(&ctx, "vm1").await.unwrap();
        assert_eq!(
            service.delete(&ctx, "vm1").await,
            Err(OperationError::not_found("vm1"))
        );
    }

    #[smol_potat::test]
    async fn test_instances_are_listed_in_name_order() {
        let service = SimulatedService::new()
            .with_instance("zeta", VmSpec::default())
            .with_instance("alpha", VmSpec::default())
            .with_instance("mid", VmSpec::default());

        let names = service.get_instances(&ctx()).await.unwrap();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[smol_potat::test]
    async fn test_status_reports_spec_and_ssh() {
        let spec = VmSpec {
            cpus: 8,
            ..VmSpec::default()
        };
        let service = SimulatedService::new()
            .with_instance("a", VmSpec::default())
            .with_instance("b", spec.clone());

        let a = service.status(&ctx(), "a").await.unwrap();
        let b = service.status(&ctx(), "b").await.unwrap();
        assert_eq!(b.vm_spec, spec);
        assert_eq!(a.ssh.port, FIRST_SSH_PORT);
        assert_eq!(b.ssh.port, FIRST_SSH_PORT + 1);
        assert_eq!(a.workload, DEFAULT_WORKLOAD);
    }

    #[smol_potat::test]
    async fn test_ssh_ports_do_not_wrap() {
        let service = SimulatedService::new().with_creation_steps(Vec::<String>::new());
        service.next_ssh_port.store(u16::MAX - 1, Ordering::SeqCst);

        let (tx, _rx) = async_channel::bounded(1);
        let token = CancellationToken::new();
        let sink = ProgressSink::new(tx, token.clone());
        let ctx = OperationContext::new(TransactionId::new(1), token);

        service
            .create(&ctx, CreateArgs::named("last"), &sink)
            .await
            .unwrap();
        assert_eq!(service.status(&ctx, "last").await.unwrap().ssh.port, u16::MAX - 1);

        let err = service
            .create(&ctx, CreateArgs::named("one-too-many"), &sink)
            .await
            .unwrap_err();
        assert_eq!(err.kind, OperationErrorKind::Backend);
        assert!(!service.contains("one-too-many"));
    }

    #[smol_potat::test]
    async fn test_operation_delay_observes_cancellation() {
        let service = SimulatedService::new().with_operation_delay(Duration::from_secs(30));
        let token = CancellationToken::new();
        let ctx = OperationContext::new(TransactionId::new(1), token.clone());

        let listing = smol::spawn(async move { service.get_instances(&ctx).await });
        smol::Timer::after(Duration::from_millis(10)).await;
        token.cancel();

        assert_eq!(listing.await, Err(OperationError::cancelled()));
    }
}
