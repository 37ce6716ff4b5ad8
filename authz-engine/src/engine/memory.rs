use super::AuthzEngine;
use crate::check::{PermissionChecker, TupleReader, WILDCARD_ID};
use crate::config::EngineSettings;
use crate::error::{AuthzError, Result};
use crate::tuple::{CheckRequest, CheckResult, EngineTuple, ObjectRef, SubjectRef};
use async_trait::async_trait;
use authz_schema::{compile_source, ReferenceTarget, SchemaGraph};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_MAX_CHECK_DEPTH: u32 = 50;

type TupleKey = (ObjectRef, String);

/// In-process engine for development and tests
pub struct InMemoryAuthzEngine {
    schema: RwLock<Option<Arc<SchemaGraph>>>,
    tuples: DashMap<TupleKey, HashSet<SubjectRef>>,
    max_depth: u32,
    trace_checks: bool,
}

impl InMemoryAuthzEngine {
    pub fn new() -> Self {
        Self {
            schema: RwLock::new(None),
            tuples: DashMap::new(),
            max_depth: DEFAULT_MAX_CHECK_DEPTH,
            trace_checks: false,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new()
            .with_max_depth(settings.max_check_depth)
            .with_tracing(settings.tracing)
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.trace_checks = enabled;
        self
    }

    /// Number of stored tuples
    pub fn len(&self) -> usize {
        self.tuples.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, tuple: &EngineTuple) -> bool {
        self.tuples
            .get(&(tuple.resource.clone(), tuple.relation.clone()))
            .is_some_and(|subjects| subjects.contains(&tuple.subject))
    }

    fn installed_schema(&self) -> Result<Arc<SchemaGraph>> {
        self.schema
            .read()
            .clone()
            .ok_or_else(|| AuthzError::Engine("no schema has been written".to_string()))
    }

    /// The tuple must target a plain relation that accepts the subject type.
    fn validate_tuple(schema: &SchemaGraph, tuple: &EngineTuple) -> Result<()> {
        let Some(relation) = schema.relation(&tuple.resource.object_type, &tuple.relation) else {
            return Err(AuthzError::InvalidRelation(format!(
                "{}#{} is not defined",
                tuple.resource.object_type, tuple.relation
            )));
        };
        if relation.is_permission() {
            return Err(AuthzError::InvalidRelation(format!(
                "{}#{} is a permission and cannot be written",
                tuple.resource.object_type, tuple.relation
            )));
        }

        let subject = &tuple.subject;
        let accepted = relation.allowed().iter().any(|reference| {
            reference.namespace == subject.object.object_type
                && match (&reference.target, &subject.optional_relation) {
                    (ReferenceTarget::Direct, None) => subject.object.object_id != WILDCARD_ID,
                    (ReferenceTarget::Wildcard, None) => subject.object.object_id == WILDCARD_ID,
                    (ReferenceTarget::Relation(expected), Some(actual)) => expected == actual,
                    _ => false,
                }
        });
        if accepted {
            Ok(())
        } else {
            Err(AuthzError::InvalidRelation(format!(
                "subject {} is not allowed on {}#{}",
                subject, tuple.resource.object_type, tuple.relation
            )))
        }
    }

    fn evaluate(&self, schema: &SchemaGraph, request: &CheckRequest) -> Result<bool> {
        let allowed = PermissionChecker::new(schema, self, self.max_depth).check(request)?;
        if self.trace_checks {
            debug!(request = %request, allowed, "Permission evaluated");
        }
        Ok(allowed)
    }
}

impl Default for InMemoryAuthzEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TupleReader for InMemoryAuthzEngine {
    fn subjects(&self, resource: &ObjectRef, relation: &str) -> Vec<SubjectRef> {
        // copied out so no shard lock is held while the checker recurses
        self.tuples
            .get(&(resource.clone(), relation.to_string()))
            .map(|subjects| subjects.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuthzEngine for InMemoryAuthzEngine {
    async fn write_schema(&self, schema: String) -> Result<()> {
        let compiled = compile_source(&schema)?;
        let definitions = compiled.graph().len();
        *self.schema.write() = Some(Arc::new(compiled.graph().clone()));
        info!(definitions, "Schema installed");
        Ok(())
    }

    async fn add_relation(&self, tuple: EngineTuple) -> Result<()> {
        let schema = self.installed_schema()?;
        Self::validate_tuple(&schema, &tuple)?;
        debug!(tuple = %tuple, "Touching relation");
        self.tuples
            .entry((tuple.resource, tuple.relation))
            .or_default()
            .insert(tuple.subject);
        Ok(())
    }

    async fn delete_relation(&self, tuple: EngineTuple) -> Result<()> {
        debug!(tuple = %tuple, "Deleting relation");
        let key = (tuple.resource, tuple.relation);
        if let Some(mut subjects) = self.tuples.get_mut(&key) {
            subjects.remove(&tuple.subject);
        }
        self.tuples.remove_if(&key, |_, subjects| subjects.is_empty());
        Ok(())
    }

    async fn check_relation(&self, request: CheckRequest) -> Result<bool> {
        let schema = self.installed_schema()?;
        self.evaluate(&schema, &request)
    }

    async fn batch_check_permission(&self, requests: Vec<CheckRequest>) -> Result<Vec<CheckResult>> {
        let schema = self.installed_schema()?;
        requests
            .into_iter()
            .map(|request| {
                let allowed = self.evaluate(&schema, &request)?;
                Ok(CheckResult { request, allowed })
            })
            .collect()
    }
}
