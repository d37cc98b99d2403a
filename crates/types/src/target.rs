//! Fan-out targets: one machine/container with its candidate endpoints.

use std::fmt;

/// One way to reach a target host, optionally through an intermediate hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `user@address` of the target itself.
    pub host: String,
    /// Optional proxy-jump hop (`user@address` of an intermediary).
    pub via: Option<String>,
}

impl Endpoint {
    /// Endpoint reached directly.
    pub fn direct(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            via: None,
        }
    }

    /// Endpoint reached through a proxy-jump hop.
    pub fn via(host: impl Into<String>, hop: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            via: Some(hop.into()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.via {
            Some(hop) => write!(f, "{} (via {hop})", self.host),
            None => write!(f, "{}", self.host),
        }
    }
}

/// One machine or container addressed by fan-out.
///
/// Endpoints are ordered: attempts go down the list and stop at the first
/// one that succeeds. Direct addresses come first, jump routes after.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: String,
    pub endpoints: Vec<Endpoint>,
}

impl Target {
    pub fn new(id: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            id: id.into(),
            endpoints,
        }
    }
}
