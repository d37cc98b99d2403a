//! Addon loading and execution.
//!
//! Definition sources are layered: the embedded defaults first, then any
//! user-supplied files, later names overriding earlier ones. Loading
//! validates every definition (a source with an unusable definition is a
//! fatal configuration error); enabling applies the elevation policy, since
//! local and sudo-bearing addons can exfiltrate operator credentials and
//! must be opted into explicitly.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clusterdump_types::{AddonAction, AddonDefinition, CollectionContext, PerUnitScope, PerUnitTemplate, Target, Template};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::fanout::{FanOut, FanOutTask};
use clusterdump_util::shell_ok_in;

/// Built-in addon definitions shipped with the collector.
pub const DEFAULT_ADDONS: &str = include_str!("../assets/addons.yaml");

/// Addons implicitly enabled when the run is authorized for elevation.
pub const ELEVATED_DEFAULT_ADDONS: &[&str] = &["listening", "psaux"];

/// Load the layered addon definition map: built-ins, then `files` in order.
pub fn load_addons(files: &[PathBuf]) -> Result<IndexMap<String, AddonDefinition>> {
    let mut addons = parse_source(DEFAULT_ADDONS, "<built-in>")?;
    for path in files {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read addons file {}", path.display()))?;
        for (name, definition) in parse_source(&text, &path.display().to_string())? {
            debug!(addon = %name, source = %path.display(), "addon definition overrides earlier source");
            addons.insert(name, definition);
        }
    }
    Ok(addons)
}

fn parse_source(text: &str, label: &str) -> Result<IndexMap<String, AddonDefinition>> {
    let entries: IndexMap<String, IndexMap<String, String>> =
        serde_yaml::from_str(text).with_context(|| format!("addons source {label} is not valid YAML"))?;
    let mut addons = IndexMap::with_capacity(entries.len());
    for (name, actions) in &entries {
        let definition =
            AddonDefinition::from_entries(name, actions).with_context(|| format!("addons source {label} is malformed"))?;
        for action in &definition.actions {
            if let AddonAction::Skipped { key } = action {
                warn!(addon = %name, key = %key, source = label, "unrecognized addon action will be skipped");
            }
        }
        addons.insert(name.clone(), definition);
    }
    Ok(addons)
}

/// Pick the enabled addons, applying the elevation policy.
///
/// Requesting an undefined addon is a configuration error; requesting one
/// that needs elevation without authorization drops it with a warning.
pub fn select_enabled(
    addons: &IndexMap<String, AddonDefinition>,
    enabled: &[String],
    allow_elevated: bool,
) -> Result<Vec<AddonDefinition>> {
    let mut selected = Vec::with_capacity(enabled.len());
    for name in enabled {
        let definition = addons
            .get(name)
            .ok_or_else(|| anyhow!("no addons source defines '{name}'"))?;
        if definition.requires_elevated() && !allow_elevated {
            warn!(addon = %name, "addon needs elevated authorization (local or sudo commands); disabled");
            continue;
        }
        selected.push(definition.clone());
    }
    Ok(selected)
}

/// Executes enabled addons through the fan-out pool.
pub struct AddonEngine<'a> {
    fanout: &'a FanOut,
    context: CollectionContext,
}

impl<'a> AddonEngine<'a> {
    pub fn new(fanout: &'a FanOut, context: CollectionContext) -> Self {
        Self { fanout, context }
    }

    /// Create the remote push and output directories on every machine.
    pub async fn prepare(&self, machines: &[Target]) {
        let command = format!("mkdir -p {} {}", self.context.location, self.context.output);
        let tasks = machines.iter().map(|m| FanOutTask::shell(m.clone(), command.clone())).collect();
        self.fanout.dispatch(tasks).await;
    }

    /// Run one addon across the targets.
    ///
    /// `units` pairs each unit identifier with the target of its owning
    /// machine. Template errors surface immediately (configuration errors);
    /// per-target execution failures stay inside the fan-out pool.
    pub async fn run(&self, addon: &AddonDefinition, machines: &[Target], units: &[(String, Target)]) -> Result<()> {
        for action in &addon.actions {
            match action {
                AddonAction::Local(template) => self.run_local(addon, template, machines).await?,
                AddonAction::Remote(template) => self.run_remote(template, machines).await?,
                AddonAction::LocalPerUnit(per_unit) => self.run_per_unit(addon, per_unit, machines, units).await?,
                AddonAction::Skipped { key } => {
                    warn!(addon = %addon.name, key = %key, "skipping unrecognized action");
                }
            }
        }
        Ok(())
    }

    /// Run locally in a fresh scratch directory and push everything the
    /// command left behind to every machine's push location.
    async fn run_local(&self, addon: &AddonDefinition, template: &Template, machines: &[Target]) -> Result<()> {
        // TempDir removal on drop covers the command failing too.
        let scratch = tempfile::tempdir().context("failed to create addon scratch directory")?;
        let command = template.render(&self.context)?;
        if !shell_ok_in(&command, scratch.path()).await {
            warn!(addon = %addon.name, "local addon command failed, nothing to push");
            return Ok(());
        }
        let tasks = machines
            .iter()
            .map(|m| FanOutTask::push(m.clone(), scratch.path().to_path_buf(), self.context.location.clone()))
            .collect();
        self.fanout.dispatch(tasks).await;
        Ok(())
    }

    /// Run on every machine inside the run's remote working directory.
    async fn run_remote(&self, template: &Template, machines: &[Target]) -> Result<()> {
        let mut tasks = Vec::with_capacity(machines.len());
        for machine in machines {
            let scoped = self.context.for_machine(&machine.id);
            let command = template.render(&scoped)?;
            tasks.push(FanOutTask::shell(machine.clone(), format!("cd {}; {command}", scoped.location)));
        }
        self.fanout.dispatch(tasks).await;
        Ok(())
    }

    /// Run locally per machine or per unit, saving stdout on the target
    /// under a per-addon output directory.
    async fn run_per_unit(
        &self,
        addon: &AddonDefinition,
        per_unit: &PerUnitTemplate,
        machines: &[Target],
        units: &[(String, Target)],
    ) -> Result<()> {
        let output_dir = format!("{}/{}", self.context.output, addon.name);
        let mut tasks = Vec::new();
        match per_unit.scope {
            PerUnitScope::Machines => {
                for machine in machines {
                    let scoped = self.context.for_machine(&machine.id);
                    let command = per_unit.template.render(&scoped)?;
                    tasks.push(FanOutTask::pipe(
                        machine.clone(),
                        command,
                        output_dir.clone(),
                        filesystem_safe(&machine.id),
                    ));
                }
            }
            PerUnitScope::Units => {
                for (unit_id, target) in units {
                    let scoped = self.context.for_unit(unit_id);
                    let command = per_unit.template.render(&scoped)?;
                    tasks.push(FanOutTask::pipe(target.clone(), command, output_dir.clone(), filesystem_safe(unit_id)));
                }
            }
        }
        self.fanout.dispatch(tasks).await;
        Ok(())
    }
}

/// Identifier usable as a file name: path separators become underscores.
fn filesystem_safe(id: &str) -> String {
    id.replace('/', "_")
}

/// Helper for tests and the CLI: write enabled-by-elevation names into the
/// requested set without duplicating existing entries.
pub fn extend_with_elevated_defaults(enabled: &mut Vec<String>) {
    for name in ELEVATED_DEFAULT_ADDONS {
        if !enabled.iter().any(|existing| existing == name) {
            enabled.push((*name).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn built_in_definitions_load() {
        let addons = load_addons(&[]).expect("built-ins load");
        assert!(addons.contains_key("ps-mem"));
        assert!(addons.contains_key("crm-status"));
    }

    #[test]
    fn later_sources_override_earlier_names() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "ps-mem:\n  remote: \"ps aux --sort=-rss > {{output}}/ps.txt\"").expect("write");
        let addons = load_addons(&[file.path().to_path_buf()]).expect("loads");
        match &addons["ps-mem"].actions[0] {
            AddonAction::Remote(template) => assert!(template.source().contains("--sort=-rss")),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn malformed_source_is_a_fatal_load_error() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "broken:\n  unknown-kind: \"true\"").expect("write");
        let error = load_addons(&[file.path().to_path_buf()]).expect_err("must fail");
        assert!(format!("{error:#}").contains("malformed"));
    }

    #[test]
    fn elevation_policy_gates_local_and_sudo_addons() {
        let addons = load_addons(&[]).expect("loads");
        let names = vec!["crm-status".to_string(), "ps-mem".to_string()];
        let unprivileged = select_enabled(&addons, &names, false).expect("selects");
        assert_eq!(unprivileged.len(), 1);
        assert_eq!(unprivileged[0].name, "ps-mem");
        let privileged = select_enabled(&addons, &names, true).expect("selects");
        assert_eq!(privileged.len(), 2);
    }

    #[test]
    fn unknown_enabled_name_is_a_configuration_error() {
        let addons = load_addons(&[]).expect("loads");
        assert!(select_enabled(&addons, &["no-such-addon".to_string()], true).is_err());
    }

    #[test]
    fn elevated_defaults_extend_without_duplicates() {
        let mut enabled = vec!["psaux".to_string()];
        extend_with_elevated_defaults(&mut enabled);
        assert_eq!(enabled, vec!["psaux".to_string(), "listening".to_string()]);
    }
}
