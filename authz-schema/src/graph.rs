//! In-memory form of a schema: namespace definitions holding relations and
//! permissions. This is what the DSL parser produces and the generator,
//! merger and validator consume.

use crate::model::PrincipalType;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaGraph {
    definitions: Vec<NamespaceDefinition>,
}

impl SchemaGraph {
    pub fn new(definitions: Vec<NamespaceDefinition>) -> Self {
        Self { definitions }
    }

    pub fn definitions(&self) -> &[NamespaceDefinition] {
        &self.definitions
    }

    pub fn into_definitions(self) -> Vec<NamespaceDefinition> {
        self.definitions
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.name.as_str())
    }

    pub fn definition(&self, name: &str) -> Option<&NamespaceDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn definition_mut(&mut self, name: &str) -> Option<&mut NamespaceDefinition> {
        self.definitions.iter_mut().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definition(name).is_some()
    }

    pub fn relation(&self, namespace: &str, relation: &str) -> Option<&RelationDefinition> {
        self.definition(namespace)
            .and_then(|definition| definition.relation(relation))
    }

    pub fn push(&mut self, definition: NamespaceDefinition) {
        self.definitions.push(definition);
    }

    /// Appends an empty definition unless one with the same name exists.
    pub fn ensure_definition(&mut self, name: &str) {
        if !self.contains(name) {
            self.definitions.push(NamespaceDefinition::new(name));
        }
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDefinition {
    pub name: String,
    pub comment: Option<String>,
    pub relations: Vec<RelationDefinition>,
}

impl NamespaceDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            comment: None,
            relations: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: RelationDefinition) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relation(name).is_some()
    }

    pub fn permissions(&self) -> impl Iterator<Item = &RelationDefinition> {
        self.relations.iter().filter(|r| r.is_permission())
    }
}

/// A `relation` (stored tuples) or a `permission` (computed rewrite).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDefinition {
    pub name: String,
    pub comment: Option<String>,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    Relation(Vec<AllowedReference>),
    Permission(Rewrite),
}

impl RelationDefinition {
    pub fn relation(name: &str, allowed: Vec<AllowedReference>) -> Self {
        Self {
            name: name.to_string(),
            comment: None,
            kind: RelationKind::Relation(allowed),
        }
    }

    pub fn permission(name: &str, rewrite: Rewrite) -> Self {
        Self {
            name: name.to_string(),
            comment: None,
            kind: RelationKind::Permission(rewrite),
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn is_permission(&self) -> bool {
        matches!(self.kind, RelationKind::Permission(_))
    }

    pub fn allowed(&self) -> &[AllowedReference] {
        match &self.kind {
            RelationKind::Relation(allowed) => allowed,
            RelationKind::Permission(_) => &[],
        }
    }

    pub fn rewrite(&self) -> Option<&Rewrite> {
        match &self.kind {
            RelationKind::Permission(rewrite) => Some(rewrite),
            RelationKind::Relation(_) => None,
        }
    }
}

/// One subject type a relation accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllowedReference {
    pub namespace: String,
    pub target: ReferenceTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceTarget {
    /// `ns`: a concrete object of the namespace
    Direct,
    /// `ns#relation`: everyone holding `relation` on an object of `ns`
    Relation(String),
    /// `ns:*`: every object of the namespace
    Wildcard,
}

impl AllowedReference {
    pub fn direct(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            target: ReferenceTarget::Direct,
        }
    }

    pub fn relation(namespace: &str, relation: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            target: ReferenceTarget::Relation(relation.to_string()),
        }
    }

    pub fn wildcard(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            target: ReferenceTarget::Wildcard,
        }
    }
}

impl From<&PrincipalType> for AllowedReference {
    fn from(principal: &PrincipalType) -> Self {
        match &principal.relation {
            Some(relation) => Self::relation(&principal.namespace, relation),
            None => Self::direct(&principal.namespace),
        }
    }
}

impl fmt::Display for AllowedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            ReferenceTarget::Direct => write!(f, "{}", self.namespace),
            ReferenceTarget::Relation(relation) => write!(f, "{}#{}", self.namespace, relation),
            ReferenceTarget::Wildcard => write!(f, "{}:*", self.namespace),
        }
    }
}

/// Userset rewrite of a permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Another relation or permission on the same object
    Computed(String),
    /// `tupleset->computed`: follow `tupleset` then evaluate `computed`
    TupleToUserset { tupleset: String, computed: String },
    Union(Vec<Rewrite>),
    Intersection(Vec<Rewrite>),
    Exclusion(Box<Rewrite>, Box<Rewrite>),
    Nil,
}

impl Rewrite {
    pub fn computed(relation: &str) -> Self {
        Self::Computed(relation.to_string())
    }

    pub fn arrow(tupleset: &str, computed: &str) -> Self {
        Self::TupleToUserset {
            tupleset: tupleset.to_string(),
            computed: computed.to_string(),
        }
    }

    /// A union of a single child collapses to the child.
    pub fn union(children: impl IntoIterator<Item = Rewrite>) -> Self {
        Self::collapse(children.into_iter().collect(), Self::Union)
    }

    pub fn intersection(children: impl IntoIterator<Item = Rewrite>) -> Self {
        Self::collapse(children.into_iter().collect(), Self::Intersection)
    }

    pub fn exclusion(base: Rewrite, excluded: Rewrite) -> Self {
        Self::Exclusion(Box::new(base), Box::new(excluded))
    }

    fn collapse(mut children: Vec<Rewrite>, build: fn(Vec<Rewrite>) -> Rewrite) -> Self {
        match children.len() {
            0 => Self::Nil,
            1 => children.pop().unwrap_or(Self::Nil),
            _ => build(children),
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(
            self,
            Self::Union(_) | Self::Intersection(_) | Self::Exclusion(..)
        )
    }

    /// Relations referenced directly on the same object.
    pub fn computed_references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Self::Computed(name) = node {
                out.push(name.as_str());
            }
        });
        out
    }

    /// `(tupleset, computed)` pairs of every arrow in the rewrite.
    pub fn arrows(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Self::TupleToUserset { tupleset, computed } = node {
                out.push((tupleset.as_str(), computed.as_str()));
            }
        });
        out
    }

    fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Rewrite)) {
        visit(self);
        match self {
            Self::Union(children) | Self::Intersection(children) => {
                for child in children {
                    child.walk(visit);
                }
            }
            Self::Exclusion(base, excluded) => {
                base.walk(visit);
                excluded.walk(visit);
            }
            Self::Computed(_) | Self::TupleToUserset { .. } | Self::Nil => {}
        }
    }
}
