use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Action {action} belongs to namespace {action_namespace}, not {namespace}")]
    ActionNamespaceMismatch {
        action: String,
        action_namespace: String,
        namespace: String,
    },

    #[error("Role {role} in namespace {namespace} is declared with different principal types")]
    RoleTypesMismatch { role: String, namespace: String },

    #[error("Invalid principal type: {0}")]
    InvalidPrincipalType(String),

    #[error("Invalid inheritance marker: {0}")]
    InvalidInheritanceMarker(String),

    #[error("Invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("Parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(String),

    #[error("Duplicate relation {relation} in {namespace}")]
    DuplicateRelation { namespace: String, relation: String },

    #[error("Unknown namespace {namespace} referenced from {referenced_from}")]
    UnknownNamespace {
        namespace: String,
        referenced_from: String,
    },

    #[error("Unknown relation {namespace}#{relation} referenced from {referenced_from}")]
    UnknownRelation {
        namespace: String,
        relation: String,
        referenced_from: String,
    },

    #[error("Invalid arrow in {namespace}#{relation}: {tupleset} is not a relation")]
    InvalidArrow {
        namespace: String,
        relation: String,
        tupleset: String,
    },

    #[error("Cycle detected between {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Relation {relation} already exists in {namespace} with a different definition")]
    ConflictingRelation { namespace: String, relation: String },

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
}

impl SchemaError {
    pub(crate) fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchemaError>;
