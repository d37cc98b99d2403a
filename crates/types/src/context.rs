//! Typed command templates and the per-run substitution context.
//!
//! Addon commands are free-form shell text with named placeholders such as
//! `{location}` or `{unit}`. Instead of best-effort string formatting, a
//! template is parsed once into literal and placeholder segments over a closed
//! placeholder set, so unknown placeholders are rejected when a definition is
//! loaded and the per-unit placeholder rules become a structural check.

use std::fmt;

use thiserror::Error;

/// The closed set of placeholders a command template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Remote directory addon files are pushed to.
    Location,
    /// Remote directory addon output is collected from.
    Output,
    /// Machine/container identifier of the current target.
    Machine,
    /// Unit identifier of the current target.
    Unit,
    /// Unique run identifier.
    Uniq,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "location" => Some(Self::Location),
            "output" => Some(Self::Output),
            "machine" => Some(Self::Machine),
            "unit" => Some(Self::Unit),
            "uniq" => Some(Self::Uniq),
            _ => None,
        }
    }

    /// Placeholder name as written in templates, without braces.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Output => "output",
            Self::Machine => "machine",
            Self::Unit => "unit",
            Self::Uniq => "uniq",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.name())
    }
}

/// Error raised while parsing or rendering a template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// A `{word}` reference that is not part of the recognized set.
    #[error("unknown placeholder '{{{name}}}' in command template: {template}")]
    UnknownPlaceholder { name: String, template: String },
    /// A recognized placeholder had no value in the rendering context.
    #[error("no value available for placeholder {placeholder}")]
    MissingValue { placeholder: Placeholder },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

/// A command template parsed into literal and placeholder segments.
///
/// Only `{word}` spans made of lowercase letters and hyphens are treated as
/// placeholder references; anything else in braces (shell `${VAR}`, awk
/// bodies, …) passes through as literal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
    raw: String,
}

impl Template {
    /// Parse a template, rejecting unknown placeholder references.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(open) = rest.find('{') {
            let (before, after_open) = (&rest[..open], &rest[open + 1..]);
            let close = after_open.find('}');
            let inner = close.map(|c| &after_open[..c]);
            let is_reference = inner
                .map(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '-'))
                .unwrap_or(false);
            if !is_reference {
                literal.push_str(before);
                literal.push('{');
                rest = after_open;
                continue;
            }
            let name = inner.expect("reference implies closing brace");
            let placeholder = Placeholder::parse(name).ok_or_else(|| TemplateError::UnknownPlaceholder {
                name: name.to_string(),
                template: raw.to_string(),
            })?;
            literal.push_str(before);
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Slot(placeholder));
            rest = &after_open[close.expect("reference implies closing brace") + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            segments,
            raw: raw.to_string(),
        })
    }

    /// The template text as written in the definition source.
    pub fn source(&self) -> &str {
        &self.raw
    }

    /// Whether the template references the given placeholder.
    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Slot(p) if *p == placeholder))
    }

    /// Render against a context; every referenced placeholder must resolve.
    pub fn render(&self, context: &CollectionContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(placeholder) => {
                    let value = context
                        .value(*placeholder)
                        .ok_or(TemplateError::MissingValue { placeholder: *placeholder })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Per-run values threaded into every templated command.
///
/// Immutable once constructed; the machine/unit fields are filled per target
/// via [`CollectionContext::for_machine`] / [`CollectionContext::for_unit`].
#[derive(Debug, Clone)]
pub struct CollectionContext {
    /// Unique run identifier.
    pub uniq: String,
    /// Remote directory addon files are pushed to.
    pub location: String,
    /// Remote directory addon output is written to.
    pub output: String,
    /// Current machine identifier, when dispatching per machine.
    pub machine: Option<String>,
    /// Current unit identifier, when dispatching per unit.
    pub unit: Option<String>,
}

impl CollectionContext {
    /// Build the run-wide context from the run id and the remote dump root.
    pub fn new(uniq: &str, dump_location: &str) -> Self {
        Self {
            uniq: uniq.to_string(),
            location: format!("{dump_location}/{uniq}/addons"),
            output: format!("{dump_location}/{uniq}/addon_output"),
            machine: None,
            unit: None,
        }
    }

    /// A copy of this context scoped to one machine.
    pub fn for_machine(&self, machine: &str) -> Self {
        Self {
            machine: Some(machine.to_string()),
            ..self.clone()
        }
    }

    /// A copy of this context scoped to one unit.
    pub fn for_unit(&self, unit: &str) -> Self {
        Self {
            unit: Some(unit.to_string()),
            ..self.clone()
        }
    }

    fn value(&self, placeholder: Placeholder) -> Option<&str> {
        match placeholder {
            Placeholder::Uniq => Some(&self.uniq),
            Placeholder::Location => Some(&self.location),
            Placeholder::Output => Some(&self.output),
            Placeholder::Machine => self.machine.as_deref(),
            Placeholder::Unit => self.unit.as_deref(),
        }
    }
}
