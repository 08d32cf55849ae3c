//! Intent types: the published, immutable records of architectural decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::canonical_hash_hex;
use crate::error::ConvergentError;

/// Unique identifier for a published intent.
///
/// Opaque string assigned by the publisher. Implements `Ord` for
/// deterministic ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(String);

impl IntentId {
    /// Create a new IntentId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IntentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a publishing agent. Opaque, publisher-assigned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Create a new AgentId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Category of a published intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    /// A design decision.
    Decision,
    /// An interface the intent introduces or claims.
    Interface,
    /// A dependency on another component.
    Dependency,
    /// A constraint on the shared design space.
    Constraint,
}

impl IntentCategory {
    /// Parse a category from its lowercase spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "decision" => Some(Self::Decision),
            "interface" => Some(Self::Interface),
            "dependency" => Some(Self::Dependency),
            "constraint" => Some(Self::Constraint),
            _ => None,
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decision => write!(f, "decision"),
            Self::Interface => write!(f, "interface"),
            Self::Dependency => write!(f, "dependency"),
            Self::Constraint => write!(f, "constraint"),
        }
    }
}

/// Kind of a named interface surface.
///
/// The set is open: unknown kinds round-trip through `Other` without loss.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    /// A class or struct-like type with behavior.
    Class,
    /// A free function.
    Function,
    /// A method on a class.
    Method,
    /// A network or API endpoint.
    Endpoint,
    /// A plain type or schema.
    Type,
    /// Any other kind, preserved verbatim (lowercased).
    Other(String),
}

impl InterfaceKind {
    /// Parse a kind from its lowercase spelling. Never fails; unknown
    /// spellings become `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "class" => Self::Class,
            "function" => Self::Function,
            "method" => Self::Method,
            "endpoint" => Self::Endpoint,
            "type" => Self::Type,
            other => Self::Other(other.to_string()),
        }
    }

    /// Lowercase canonical spelling.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
            Self::Endpoint => "endpoint",
            Self::Type => "type",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for InterfaceKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InterfaceKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A named, typed surface an intent provides or requires.
///
/// `(name, kind)` is the primary match axis; tags are unordered;
/// structural comparison is case- and whitespace-insensitive on names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    /// Interface name, compared case-insensitively.
    pub name: String,
    /// Kind of surface.
    pub kind: InterfaceKind,
    /// Optional signature, e.g. `"(user_id: str, scope: str) -> Token"`.
    pub signature: Option<String>,
    /// Unordered descriptive tags.
    pub tags: Vec<String>,
}

impl InterfaceSpec {
    /// Create a spec without signature.
    pub fn new(name: impl Into<String>, kind: InterfaceKind, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            signature: None,
            tags,
        }
    }

    /// Attach a signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

/// Severity of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Worth surfacing, never fatal.
    Warn,
    /// Must not be violated by any intent merged into a parent graph.
    Hard,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

/// A constraint on the shared design space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// What the constraint is about, e.g. `"tests"` or an interface name.
    pub subject: String,
    /// The predicate that must hold, e.g. `"tests_pass"`.
    pub predicate: String,
    /// How fatal a violation is.
    pub severity: Severity,
    /// File or module scopes the constraint applies to.
    pub scope: Vec<String>,
}

impl Constraint {
    /// Create a new constraint.
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        severity: Severity,
        scope: Vec<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            severity,
            scope,
        }
    }
}

/// Kind of evidence supporting an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// The agent believes it will build this.
    Speculative,
    /// Code exists in a commit.
    Committed,
    /// Tests exercise the artifact.
    Tested,
    /// Another agent consumes the interface.
    Consumed,
    /// Operator-supplied, weight passed through verbatim.
    Manual,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Speculative => write!(f, "speculative"),
            Self::Committed => write!(f, "committed"),
            Self::Tested => write!(f, "tested"),
            Self::Consumed => write!(f, "consumed"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A single piece of evidence attached to an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Kind of evidence.
    pub kind: EvidenceKind,
    /// Weight, non-negative. For non-manual kinds this is usually the
    /// configured base weight for the kind.
    pub weight: f64,
    /// When the evidence was produced.
    pub timestamp: DateTime<Utc>,
    /// Where it came from (gate name, commit id, operator).
    pub source: String,
}

impl Evidence {
    /// Create a new evidence record.
    pub fn new(
        kind: EvidenceKind,
        weight: f64,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            weight,
            timestamp,
            source: source.into(),
        }
    }
}

/// A published, immutable record of an architectural decision.
///
/// Once stored, all fields except the evidence list are immutable; the
/// graph is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Stable, unique id within a graph.
    pub intent_id: IntentId,
    /// The publishing agent.
    pub agent_id: AgentId,
    /// Human-readable description of what will be built.
    pub description: String,
    /// Category of the intent.
    pub category: IntentCategory,
    /// Interfaces this intent introduces or claims.
    pub interfaces: Vec<InterfaceSpec>,
    /// Names of surfaces this intent provides.
    pub provides: Vec<String>,
    /// Names of surfaces this intent requires from others.
    pub requires: Vec<String>,
    /// Constraints the intent places on the design space.
    pub constraints: Vec<Constraint>,
    /// Files the work is expected to touch.
    pub files_affected: Vec<String>,
    /// Evidence list; the only mutable (append-only) field.
    pub evidence: Vec<Evidence>,
    /// When the intent was published.
    pub created_at: DateTime<Utc>,
}

impl Intent {
    /// Validate required fields and value ranges.
    pub fn validate(&self) -> Result<(), ConvergentError> {
        if self.intent_id.as_str().is_empty() {
            return Err(ConvergentError::validation("intent_id must not be empty"));
        }
        if self.agent_id.as_str().is_empty() {
            return Err(ConvergentError::validation("agent_id must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(ConvergentError::validation("description must not be empty"));
        }
        for iface in &self.interfaces {
            if iface.name.trim().is_empty() {
                return Err(ConvergentError::validation("interface name must not be empty"));
            }
        }
        for ev in &self.evidence {
            if ev.weight < 0.0 {
                return Err(ConvergentError::validation(format!(
                    "evidence weight must be >= 0, got {}",
                    ev.weight
                )));
            }
        }
        Ok(())
    }

    /// Fingerprint of the immutable content (everything except evidence).
    ///
    /// Republishing with an identical fingerprint is a no-op; a differing
    /// fingerprint under the same id is a `DuplicateIntent` error.
    pub fn content_fingerprint(&self) -> String {
        #[derive(Serialize)]
        struct ImmutableView<'a> {
            intent_id: &'a IntentId,
            agent_id: &'a AgentId,
            description: &'a str,
            category: IntentCategory,
            interfaces: &'a [InterfaceSpec],
            provides: &'a [String],
            requires: &'a [String],
            constraints: &'a [Constraint],
            files_affected: &'a [String],
            created_at: &'a DateTime<Utc>,
        }
        canonical_hash_hex(&ImmutableView {
            intent_id: &self.intent_id,
            agent_id: &self.agent_id,
            description: &self.description,
            category: self.category,
            interfaces: &self.interfaces,
            provides: &self.provides,
            requires: &self.requires,
            constraints: &self.constraints,
            files_affected: &self.files_affected,
            created_at: &self.created_at,
        })
    }

    /// Hard constraints declared by this intent.
    pub fn hard_constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.severity == Severity::Hard)
    }
}

/// Builder for [`Intent`], keeping call sites readable.
#[derive(Debug, Clone)]
pub struct IntentBuilder {
    intent: Intent,
}

impl IntentBuilder {
    /// Start a builder with the required fields.
    pub fn new(
        intent_id: impl Into<String>,
        agent_id: impl Into<String>,
        description: impl Into<String>,
        category: IntentCategory,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            intent: Intent {
                intent_id: IntentId::new(intent_id),
                agent_id: AgentId::new(agent_id),
                description: description.into(),
                category,
                interfaces: Vec::new(),
                provides: Vec::new(),
                requires: Vec::new(),
                constraints: Vec::new(),
                files_affected: Vec::new(),
                evidence: Vec::new(),
                created_at,
            },
        }
    }

    /// Add an interface.
    pub fn interface(mut self, spec: InterfaceSpec) -> Self {
        self.intent.interfaces.push(spec);
        self
    }

    /// Add a provided surface name.
    pub fn provides(mut self, name: impl Into<String>) -> Self {
        self.intent.provides.push(name.into());
        self
    }

    /// Add a required surface name.
    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.intent.requires.push(name.into());
        self
    }

    /// Add a constraint.
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.intent.constraints.push(constraint);
        self
    }

    /// Add an affected file.
    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.intent.files_affected.push(path.into());
        self
    }

    /// Add an evidence record.
    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.intent.evidence.push(evidence);
        self
    }

    /// Finish building.
    pub fn build(self) -> Intent {
        self.intent
    }
}
