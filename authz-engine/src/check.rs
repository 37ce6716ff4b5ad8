//! Permission evaluation over an installed schema and a tuple set.

use crate::error::{AuthzError, Result};
use crate::tuple::{CheckRequest, ObjectRef, SubjectRef};
use authz_schema::{RelationKind, Rewrite, SchemaGraph};
use tracing::trace;

/// Wildcard object id matching every subject of a type
pub const WILDCARD_ID: &str = "*";

/// Source of stored tuples for the evaluator
pub trait TupleReader {
    /// Subjects holding `relation` on `resource`
    fn subjects(&self, resource: &ObjectRef, relation: &str) -> Vec<SubjectRef>;
}

/// Walks the schema rewrites for one check:
/// - direct tuples, wildcard subjects and subject usersets
/// - computed usersets and tuple-to-userset arrows
/// - union, intersection and exclusion
///
/// Every hop through another relation counts towards `max_depth`.
pub struct PermissionChecker<'a, R: TupleReader> {
    schema: &'a SchemaGraph,
    tuples: &'a R,
    max_depth: u32,
}

impl<'a, R: TupleReader> PermissionChecker<'a, R> {
    pub fn new(schema: &'a SchemaGraph, tuples: &'a R, max_depth: u32) -> Self {
        Self {
            schema,
            tuples,
            max_depth,
        }
    }

    pub fn check(&self, request: &CheckRequest) -> Result<bool> {
        self.check_relation(&request.resource, &request.permission, &request.subject, 0)
    }

    fn check_relation(
        &self,
        resource: &ObjectRef,
        name: &str,
        subject: &SubjectRef,
        depth: u32,
    ) -> Result<bool> {
        if depth >= self.max_depth {
            return Err(AuthzError::MaxDepthExceeded);
        }
        let Some(relation) = self.schema.relation(&resource.object_type, name) else {
            return Err(AuthzError::InvalidRelation(format!(
                "{}#{name} is not defined",
                resource.object_type
            )));
        };
        trace!(resource = %resource, relation = name, subject = %subject, depth, "Evaluating");

        match &relation.kind {
            RelationKind::Relation(_) => self.check_direct(resource, name, subject, depth),
            RelationKind::Permission(rewrite) => {
                self.check_rewrite(resource, rewrite, subject, depth)
            }
        }
    }

    fn check_direct(
        &self,
        resource: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        depth: u32,
    ) -> Result<bool> {
        for stored in self.tuples.subjects(resource, relation) {
            if stored == *subject || is_wildcard_match(&stored, subject) {
                return Ok(true);
            }
            if let Some(userset) = &stored.optional_relation {
                if self.check_relation(&stored.object, userset, subject, depth + 1)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn check_rewrite(
        &self,
        resource: &ObjectRef,
        rewrite: &Rewrite,
        subject: &SubjectRef,
        depth: u32,
    ) -> Result<bool> {
        match rewrite {
            Rewrite::Computed(name) => self.check_relation(resource, name, subject, depth + 1),
            Rewrite::TupleToUserset { tupleset, computed } => {
                for parent in self.tuples.subjects(resource, tupleset) {
                    // arrows only resolve on types that define the target
                    if self
                        .schema
                        .relation(&parent.object.object_type, computed)
                        .is_none()
                    {
                        continue;
                    }
                    if self.check_relation(&parent.object, computed, subject, depth + 1)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rewrite::Union(children) => {
                for child in children {
                    if self.check_rewrite(resource, child, subject, depth)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rewrite::Intersection(children) => {
                if children.is_empty() {
                    return Ok(false);
                }
                for child in children {
                    if !self.check_rewrite(resource, child, subject, depth)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Rewrite::Exclusion(base, excluded) => Ok(self
                .check_rewrite(resource, base, subject, depth)?
                && !self.check_rewrite(resource, excluded, subject, depth)?),
            Rewrite::Nil => Ok(false),
        }
    }
}

fn is_wildcard_match(stored: &SubjectRef, subject: &SubjectRef) -> bool {
    stored.optional_relation.is_none()
        && subject.optional_relation.is_none()
        && stored.object.object_id == WILDCARD_ID
        && stored.object.object_type == subject.object.object_type
}
