//! Shared data model for the clusterdump collector: the cluster status
//! document, fan-out targets, addon definitions, and the typed command
//! template / collection context pair.

pub mod addon;
pub mod context;
pub mod status;
pub mod target;

pub use addon::{AddonAction, AddonDefinition, AddonParseError, PerUnitScope, PerUnitTemplate, ELEVATED_MARKER};
pub use context::{CollectionContext, Placeholder, Template, TemplateError};
pub use status::{ApplicationStatus, MachineStatus, ModelStatus, StatusDocument, UnitStatus};
pub use target::{Endpoint, Target};
