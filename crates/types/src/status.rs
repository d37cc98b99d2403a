//! Serde model of the cluster status document.
//!
//! The collector fetches this document once per run (cluster scope and
//! controller scope) and treats it as read-only input: machines with their
//! nested containers on one side, applications with their units and
//! subordinate units on the other, joined by network address.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level status document returned by the control plane.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusDocument {
    /// Model metadata (name, substrate kind).
    #[serde(default)]
    pub model: ModelStatus,
    /// Machines keyed by machine identifier (e.g. `"0"`).
    #[serde(default)]
    pub machines: BTreeMap<String, MachineStatus>,
    /// Applications keyed by application name.
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationStatus>,
}

/// Model section of the status document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelStatus {
    #[serde(default)]
    pub name: String,
    /// Substrate kind; `"caas"` models additionally get a pod listing snapshot.
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// One machine or container entry.
///
/// Containers nest recursively under their host machine and carry the same
/// shape. A machine still being provisioned may have no address yet.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MachineStatus {
    #[serde(default)]
    pub dns_name: Option<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub containers: BTreeMap<String, MachineStatus>,
}

/// One application entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApplicationStatus {
    /// Present when the application is subordinate; such applications carry
    /// no units of their own in the topology walk.
    #[serde(default)]
    pub subordinate_to: Option<Vec<String>>,
    #[serde(default)]
    pub units: BTreeMap<String, UnitStatus>,
}

/// One workload unit entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnitStatus {
    #[serde(default)]
    pub public_address: Option<String>,
    #[serde(default)]
    pub subordinates: BTreeMap<String, UnitStatus>,
}
