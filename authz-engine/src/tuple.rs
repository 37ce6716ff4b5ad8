//! Tuple shapes exchanged with the authorization engine.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: &str, object_id: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub object: ObjectRef,
    pub optional_relation: Option<String>,
}

impl SubjectRef {
    pub fn new(object_type: &str, object_id: &str) -> Self {
        Self {
            object: ObjectRef::new(object_type, object_id),
            optional_relation: None,
        }
    }

    pub fn with_relation(mut self, relation: &str) -> Self {
        self.optional_relation = Some(relation.to_string());
        self
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.optional_relation {
            Some(relation) => write!(f, "{}#{}", self.object, relation),
            None => write!(f, "{}", self.object),
        }
    }
}

/// `resource#relation@subject`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineTuple {
    pub resource: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl EngineTuple {
    pub fn new(resource: ObjectRef, relation: &str, subject: SubjectRef) -> Self {
        Self {
            resource,
            relation: relation.to_string(),
            subject,
        }
    }
}

impl fmt::Display for EngineTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

/// Does `subject` have `permission` on `resource`?
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRequest {
    pub resource: ObjectRef,
    pub permission: String,
    pub subject: SubjectRef,
}

impl CheckRequest {
    pub fn new(resource: ObjectRef, permission: &str, subject: SubjectRef) -> Self {
        Self {
            resource,
            permission: permission.to_string(),
            subject,
        }
    }
}

impl fmt::Display for CheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.permission, self.subject)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub request: CheckRequest,
    pub allowed: bool,
}
