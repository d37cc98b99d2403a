//! Addon definitions: named local/remote command pairs loaded from YAML.
//!
//! Action kinds are a closed enum resolved once when a definition source is
//! parsed. Unrecognized action keys become a `Skipped` variant so execution
//! can warn and move on instead of failing on a string lookup at run time.

use indexmap::IndexMap;
use thiserror::Error;

use crate::context::{Placeholder, Template, TemplateError};

/// Marker that makes a command text require elevated authorization.
pub const ELEVATED_MARKER: &str = "sudo";

/// Error raised while parsing one addon definition.
#[derive(Debug, Error)]
pub enum AddonParseError {
    /// None of the entry's keys named a recognized action kind.
    #[error("addon '{name}' defines none of the recognized actions (local, remote, local-per-unit)")]
    NoRecognizedActions { name: String },
    /// A `local-per-unit` command must use exactly one of `{machine}` / `{unit}`.
    #[error("local-per-unit command for addon '{name}' must reference exactly one of {{machine}} or {{unit}}")]
    PerUnitPlaceholders { name: String },
    /// A command template failed to parse.
    #[error("addon '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: TemplateError,
    },
}

/// Which target collection a `local-per-unit` command iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerUnitScope {
    Machines,
    Units,
}

/// A validated `local-per-unit` command template.
///
/// The scope is derived from which of the two identity placeholders the
/// template references; referencing both or neither is rejected at load time.
#[derive(Debug, Clone)]
pub struct PerUnitTemplate {
    pub template: Template,
    pub scope: PerUnitScope,
}

/// One action of an addon definition.
#[derive(Debug, Clone)]
pub enum AddonAction {
    /// Run locally in a scratch directory; produced files are pushed to every
    /// target's push location.
    Local(Template),
    /// Run on every target inside the run's remote working directory.
    Remote(Template),
    /// Run locally once per machine or unit, capturing stdout to the target.
    LocalPerUnit(PerUnitTemplate),
    /// Unrecognized action key, kept so execution can log and skip it.
    Skipped { key: String },
}

/// A named addon: ordered actions parsed from one definition source.
#[derive(Debug, Clone)]
pub struct AddonDefinition {
    pub name: String,
    pub actions: Vec<AddonAction>,
}

impl AddonDefinition {
    /// Parse one definition entry (`name: {action-kind: command, ...}`).
    ///
    /// At least one recognized action kind must be present.
    pub fn from_entries(name: &str, entries: &IndexMap<String, String>) -> Result<Self, AddonParseError> {
        let mut actions = Vec::with_capacity(entries.len());
        for (key, command) in entries {
            let action = match key.as_str() {
                "local" => AddonAction::Local(parse_template(name, command)?),
                "remote" => AddonAction::Remote(parse_template(name, command)?),
                "local-per-unit" => {
                    let template = parse_template(name, command)?;
                    let scope = match (template.uses(Placeholder::Machine), template.uses(Placeholder::Unit)) {
                        (true, false) => PerUnitScope::Machines,
                        (false, true) => PerUnitScope::Units,
                        _ => return Err(AddonParseError::PerUnitPlaceholders { name: name.to_string() }),
                    };
                    AddonAction::LocalPerUnit(PerUnitTemplate { template, scope })
                }
                other => AddonAction::Skipped { key: other.to_string() },
            };
            actions.push(action);
        }

        let recognized = actions.iter().any(|a| !matches!(a, AddonAction::Skipped { .. }));
        if !recognized {
            return Err(AddonParseError::NoRecognizedActions { name: name.to_string() });
        }

        Ok(Self {
            name: name.to_string(),
            actions,
        })
    }

    /// Whether running this addon needs elevated authorization: any
    /// local-class action, or an elevation marker in any command text.
    pub fn requires_elevated(&self) -> bool {
        self.actions.iter().any(|action| match action {
            AddonAction::Local(_) | AddonAction::LocalPerUnit(_) => true,
            AddonAction::Remote(template) => template.source().contains(ELEVATED_MARKER),
            AddonAction::Skipped { .. } => false,
        })
    }
}

fn parse_template(name: &str, command: &str) -> Result<Template, AddonParseError> {
    Template::parse(command).map_err(|source| AddonParseError::Template {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn single_recognized_action_loads() {
        let addon = AddonDefinition::from_entries("ps-mem", &entries(&[("remote", "ps aux > {output}/ps.txt")]))
            .expect("loads");
        assert_eq!(addon.actions.len(), 1);
        assert!(!addon.requires_elevated());
    }

    #[test]
    fn no_recognized_action_fails() {
        let err = AddonDefinition::from_entries("broken", &entries(&[("remot", "ps aux")])).expect_err("rejects");
        assert!(matches!(err, AddonParseError::NoRecognizedActions { .. }));
    }

    #[test]
    fn unknown_key_alongside_recognized_is_skipped() {
        let addon = AddonDefinition::from_entries("mixed", &entries(&[("remote", "true"), ("cloud", "x")]))
            .expect("loads");
        assert!(matches!(addon.actions[1], AddonAction::Skipped { ref key } if key == "cloud"));
    }

    #[test]
    fn per_unit_scope_follows_placeholder() {
        let addon = AddonDefinition::from_entries("show", &entries(&[("local-per-unit", "show {unit}")]))
            .expect("loads");
        match &addon.actions[0] {
            AddonAction::LocalPerUnit(per_unit) => assert_eq!(per_unit.scope, PerUnitScope::Units),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn per_unit_with_both_placeholders_is_rejected() {
        let err = AddonDefinition::from_entries("bad", &entries(&[("local-per-unit", "x {unit} {machine}")]))
            .expect_err("rejects");
        assert!(matches!(err, AddonParseError::PerUnitPlaceholders { .. }));
    }

    #[test]
    fn per_unit_with_no_placeholder_is_rejected() {
        let err = AddonDefinition::from_entries("bad", &entries(&[("local-per-unit", "uptime")]))
            .expect_err("rejects");
        assert!(matches!(err, AddonParseError::PerUnitPlaceholders { .. }));
    }

    #[test]
    fn sudo_in_remote_command_requires_elevation() {
        let addon = AddonDefinition::from_entries("crm", &entries(&[("remote", "sudo crm status > {output}/crm")]))
            .expect("loads");
        assert!(addon.requires_elevated());
        let local = AddonDefinition::from_entries("cfg", &entries(&[("local", "gather > cfg.txt")])).expect("loads");
        assert!(local.requires_elevated());
    }
}
