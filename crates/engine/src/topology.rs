//! Topology resolution: derive which units live on which machine from the
//! cluster status document.
//!
//! Machine and container addresses are the join keys between the machine
//! table and the application/unit table. An address referenced by a unit
//! that does not resolve to a known machine means the snapshot is
//! internally inconsistent; that is the one malformed-document case that
//! fails the whole invocation instead of being skipped.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{Result, anyhow};
use clusterdump_types::{Endpoint, MachineStatus, StatusDocument, Target};

/// Machine/container identifier → co-located unit names and addresses.
pub type Topology = BTreeMap<String, BTreeSet<String>>;

/// Resolve the topology from a status document.
///
/// Machines and containers with a known address register it; units (and
/// their subordinate units) with a public address attach to the machine
/// owning that address. Entries without an address contribute nothing.
pub fn resolve(status: &StatusDocument) -> Result<Topology> {
    let mut topology = Topology::new();
    let mut address_owner: HashMap<&str, &str> = HashMap::new();
    for (machine_id, machine) in &status.machines {
        register_machine(machine_id, machine, &mut topology, &mut address_owner);
    }

    for application in status.applications.values() {
        if application.subordinate_to.is_some() {
            continue;
        }
        for (unit_id, unit) in &application.units {
            let Some(address) = unit.public_address.as_deref() else {
                continue;
            };
            attach_unit(unit_id, address, &address_owner, &mut topology)?;
            for (subordinate_id, subordinate) in &unit.subordinates {
                let Some(address) = subordinate.public_address.as_deref() else {
                    continue;
                };
                attach_unit(subordinate_id, address, &address_owner, &mut topology)?;
            }
        }
    }

    Ok(topology)
}

fn register_machine<'a>(
    id: &'a str,
    machine: &'a MachineStatus,
    topology: &mut Topology,
    address_owner: &mut HashMap<&'a str, &'a str>,
) {
    if let Some(address) = machine.dns_name.as_deref() {
        topology.entry(id.to_string()).or_default().insert(address.to_string());
        address_owner.insert(address, id);
    } else if !machine.containers.is_empty() {
        // A container parent stays visible even before it has an address.
        topology.entry(id.to_string()).or_default();
    }
    for (container_id, container) in &machine.containers {
        register_machine(container_id, container, topology, address_owner);
    }
}

fn attach_unit(unit_id: &str, address: &str, address_owner: &HashMap<&str, &str>, topology: &mut Topology) -> Result<()> {
    let owner = address_owner
        .get(address)
        .ok_or_else(|| anyhow!("unit '{unit_id}' has address {address} which matches no known machine"))?;
    topology
        .entry(owner.to_string())
        .or_default()
        .insert(unit_id.to_string());
    Ok(())
}

/// Build the fan-out target set from the cluster and controller status.
///
/// Each machine/container with at least one IP address becomes a target;
/// direct endpoints come first, followed by one proxy-jump route through
/// every controller address, since workload machines may not be reachable
/// from the operator's network directly.
pub fn targets(status: &StatusDocument, controller: &StatusDocument, user: &str) -> Vec<Target> {
    let hops: Vec<String> = controller
        .machines
        .values()
        .flat_map(|machine| machine.ip_addresses.iter())
        .map(|ip| format!("{user}@{ip}"))
        .collect();

    let mut out = Vec::new();
    for (machine_id, machine) in &status.machines {
        collect_targets(machine_id, machine, user, &hops, &mut out);
    }
    out
}

fn collect_targets(id: &str, machine: &MachineStatus, user: &str, hops: &[String], out: &mut Vec<Target>) {
    if !machine.ip_addresses.is_empty() {
        let mut endpoints: Vec<Endpoint> = machine
            .ip_addresses
            .iter()
            .map(|ip| Endpoint::direct(format!("{user}@{ip}")))
            .collect();
        for ip in &machine.ip_addresses {
            for hop in hops {
                endpoints.push(Endpoint::via(format!("{user}@{ip}"), hop.clone()));
            }
        }
        out.push(Target::new(id, endpoints));
    }
    // A machine still allocating has no address yet; its containers may.
    for (container_id, container) in &machine.containers {
        collect_targets(container_id, container, user, hops, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(raw: &str) -> StatusDocument {
        serde_yaml::from_str(raw).expect("status fixture parses")
    }

    #[test]
    fn units_land_on_the_machine_owning_their_address() {
        let doc = status(
            r#"
machines:
  "0":
    dns-name: 10.0.0.5
  "1":
    dns-name: 10.0.0.7
applications:
  app:
    units:
      app/0: {public-address: 10.0.0.5}
      app/1: {public-address: 10.0.0.7}
"#,
        );
        let topology = resolve(&doc).expect("resolves");
        assert!(topology["0"].contains("app/0"));
        assert!(topology["1"].contains("app/1"));
        assert!(!topology["1"].contains("app/0"));
    }

    #[test]
    fn subordinates_attach_via_their_own_address() {
        let doc = status(
            r#"
machines:
  "0":
    dns-name: 10.0.0.5
    containers:
      0/lxd/0: {dns-name: 10.0.0.6}
applications:
  app:
    units:
      app/0:
        public-address: 10.0.0.5
        subordinates:
          sub/0: {public-address: 10.0.0.6}
  sub:
    subordinate-to: [app]
"#,
        );
        let topology = resolve(&doc).expect("resolves");
        assert!(topology["0"].contains("app/0"));
        assert!(topology["0/lxd/0"].contains("sub/0"));
    }

    #[test]
    fn addressless_container_parent_keeps_an_empty_entry() {
        let doc = status(
            r#"
machines:
  "0":
    containers:
      0/lxd/0: {dns-name: 10.0.0.6}
"#,
        );
        let topology = resolve(&doc).expect("resolves");
        assert_eq!(topology["0"], BTreeSet::new());
        assert!(topology["0/lxd/0"].contains("10.0.0.6"));
    }

    #[test]
    fn units_without_an_address_are_skipped() {
        let doc = status(
            r#"
machines:
  "0": {dns-name: 10.0.0.5}
applications:
  app:
    units:
      app/0: {}
"#,
        );
        let topology = resolve(&doc).expect("resolves");
        assert_eq!(topology["0"].len(), 1);
    }

    #[test]
    fn unmatched_unit_address_fails_the_run() {
        let doc = status(
            r#"
machines:
  "0": {dns-name: 10.0.0.5}
applications:
  app:
    units:
      app/0: {public-address: 192.168.0.99}
"#,
        );
        let error = resolve(&doc).expect_err("must fail");
        assert!(error.to_string().contains("192.168.0.99"));
    }

    #[test]
    fn targets_order_direct_endpoints_before_jumps() {
        let doc = status(
            r#"
machines:
  "0":
    ip-addresses: [10.0.0.5, 252.0.0.1]
"#,
        );
        let controller = status(
            r#"
machines:
  "0":
    ip-addresses: [10.0.9.1]
"#,
        );
        let targets = targets(&doc, &controller, "ubuntu");
        assert_eq!(targets.len(), 1);
        let endpoints = &targets[0].endpoints;
        assert_eq!(endpoints[0], Endpoint::direct("ubuntu@10.0.0.5"));
        assert_eq!(endpoints[1], Endpoint::direct("ubuntu@252.0.0.1"));
        assert_eq!(endpoints[2], Endpoint::via("ubuntu@10.0.0.5", "ubuntu@10.0.9.1"));
        assert_eq!(endpoints[3], Endpoint::via("ubuntu@252.0.0.1", "ubuntu@10.0.9.1"));
    }

    #[test]
    fn allocating_machines_yield_no_target_but_containers_do() {
        let doc = status(
            r#"
machines:
  "0":
    containers:
      0/lxd/0: {ip-addresses: [10.0.0.6]}
"#,
        );
        let targets = targets(&doc, &StatusDocument::default(), "ubuntu");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "0/lxd/0");
    }
}
