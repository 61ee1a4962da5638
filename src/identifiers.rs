//! Agent routing identifiers.
//!
//! # Responsibilities
//! - Parse the comma-separated `kind=value` list that tags an edge agent
//! - Reject unknown kinds and malformed entries (all-or-nothing)
//! - Synthesize the default `host=<cluster>` identifier
//!
//! # Design Decisions
//! - Kind names are matched exactly (case-sensitive)
//! - Values are accepted as-is; CIDR/IP syntax is the tunnel runtime's concern
//! - An empty list is valid and means "no explicit identifiers"

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing an identifier list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Entry did not split into exactly two `=`-separated parts.
    #[error("malformed identifier entry {0:?}, expected kind=value")]
    Malformed(String),

    /// Entry used a kind outside the recognized set.
    #[error("unknown identifier kind {0:?}")]
    UnknownKind(String),
}

/// The recognized identifier kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Host,
    Cidr,
    Ipv4,
    Ipv6,
    Uid,
}

impl IdentifierKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Host => "host",
            IdentifierKind::Cidr => "cidr",
            IdentifierKind::Ipv4 => "ipv4",
            IdentifierKind::Ipv6 => "ipv6",
            IdentifierKind::Uid => "uid",
        }
    }
}

impl FromStr for IdentifierKind {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(IdentifierKind::Host),
            "cidr" => Ok(IdentifierKind::Cidr),
            "ipv4" => Ok(IdentifierKind::Ipv4),
            "ipv6" => Ok(IdentifierKind::Ipv6),
            "uid" => Ok(IdentifierKind::Uid),
            other => Err(IdentifierError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed routing tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentIdentifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl fmt::Display for AgentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.value)
    }
}

/// Ordered identifier list attached to an edge agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentIdentifiers(Vec<AgentIdentifier>);

impl AgentIdentifiers {
    /// Parse a raw `kind=value[,kind=value...]` list.
    ///
    /// Any malformed entry invalidates the whole list.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() {
            return Ok(Self::default());
        }

        raw.split(',')
            .map(|entry| {
                let parts: Vec<&str> = entry.split('=').collect();
                if parts.len() != 2 {
                    return Err(IdentifierError::Malformed(entry.to_string()));
                }
                Ok(AgentIdentifier {
                    kind: parts[0].parse()?,
                    value: parts[1].to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Identifier list used when none is configured: `host=<cluster>`.
    pub fn default_for_cluster(cluster_name: &str) -> Self {
        Self(vec![AgentIdentifier {
            kind: IdentifierKind::Host,
            value: cluster_name.to_string(),
        }])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentIdentifier> {
        self.0.iter()
    }
}

impl fmt::Display for AgentIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}

/// Returns true if `raw` is empty or every entry is a well-formed `kind=value`.
pub fn validate(raw: &str) -> bool {
    AgentIdentifiers::parse(raw).is_ok()
}
