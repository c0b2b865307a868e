//! Data shapes exchanged between callers, the broker and instance services
//!
//! The broker passes these through without interpreting them, apart from
//! the `finished` flag of [`CreateResult`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tracked transaction
///
/// Allocated monotonically by the dispatcher, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wrap a raw identifier
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Host to guest port forwarding rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host
    pub host: u16,
    /// Port inside the instance
    pub guest: u16,
}

/// Host directory shared with the instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount tag seen by the guest
    pub tag: String,
    /// 9p security model
    pub security_model: String,
    /// Host path
    pub path: String,
}

/// Resources and host integration of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Memory in MiB
    pub mem_mib: u32,
    /// Number of virtual CPUs
    pub cpus: u32,
    /// Root disk size in GiB
    pub disk_gib: u32,
    /// Port forwarding rules
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    /// Shared directories
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

impl Default for VmSpec {
    fn default() -> Self {
        Self {
            mem_mib: 2048,
            cpus: 2,
            disk_gib: 60,
            port_mappings: Vec::new(),
            mounts: Vec::new(),
        }
    }
}

/// Arguments of an instance creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateArgs {
    /// Instance name; the service picks one when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Workload the instance is built from
    #[serde(default)]
    pub workload: String,
    /// Keep verbose creation output
    #[serde(default)]
    pub debug: bool,
    /// Update the guest packages during creation
    #[serde(default)]
    pub update: bool,
    /// Overrides of the workload's default spec
    #[serde(default)]
    pub custom_spec: Option<VmSpec>,
}

impl CreateArgs {
    /// Creation arguments for a named instance
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// One step of an instance creation
///
/// Creation reports zero or more values with `finished == false` followed by
/// exactly one value with `finished == true` whose `name` is the name of the
/// created instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResult {
    /// Whether this is the terminal value of the creation
    pub finished: bool,
    /// Instance name, set on the terminal value
    #[serde(default)]
    pub name: String,
    /// Progress line, set on non-terminal values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
}

impl CreateResult {
    /// A non-terminal progress value
    pub fn progress(line: impl Into<String>) -> Self {
        Self {
            finished: false,
            name: String::new(),
            line: Some(line.into()),
        }
    }

    /// The terminal value for a created instance
    pub fn finished(name: impl Into<String>) -> Self {
        Self {
            finished: true,
            name: name.into(),
            line: None,
        }
    }
}

/// Arguments of an instance start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartArgs {
    /// Instance to start
    pub name: String,
    /// Spec to start it with
    #[serde(default)]
    pub vm_spec: VmSpec,
}

/// SSH access information of an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    /// Private key used to log in
    pub key_path: String,
    /// Forwarded SSH port on the host
    pub port: u16,
}

/// Details of an existing instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    /// Instance name
    pub name: String,
    /// Workload the instance was created from
    pub workload: String,
    /// SSH access
    pub ssh: SshConfig,
    /// Current spec
    pub vm_spec: VmSpec,
}
