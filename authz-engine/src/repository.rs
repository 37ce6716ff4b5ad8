//! System of record for relation tuples.

pub mod postgres;

pub use postgres::PostgresRelationRepository;

use crate::error::{AuthzError, Result};
use crate::models::{NaturalKey, Relation};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Field filter for [`RelationRepository::get_by_fields`]. `None` matches
/// any value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationFilter {
    pub subject_namespace_id: Option<String>,
    pub subject_id: Option<String>,
    pub object_namespace_id: Option<String>,
    pub object_id: Option<String>,
    pub role_id: Option<String>,
    pub namespace_edge_id: Option<String>,
}

impl RelationFilter {
    pub fn subject(mut self, namespace_id: &str, id: &str) -> Self {
        self.subject_namespace_id = Some(namespace_id.to_string());
        self.subject_id = Some(id.to_string());
        self
    }

    pub fn object(mut self, namespace_id: &str, id: &str) -> Self {
        self.object_namespace_id = Some(namespace_id.to_string());
        self.object_id = Some(id.to_string());
        self
    }

    pub fn role(mut self, role_id: &str) -> Self {
        self.role_id = Some(role_id.to_string());
        self
    }

    pub fn edge(mut self, edge: &str) -> Self {
        self.namespace_edge_id = Some(edge.to_string());
        self
    }

    pub fn matches(&self, relation: &Relation) -> bool {
        fn field(filter: Option<&String>, value: &str) -> bool {
            filter.map_or(true, |expected| expected == value)
        }

        field(self.subject_namespace_id.as_ref(), &relation.subject_namespace_id)
            && field(self.subject_id.as_ref(), &relation.subject_id)
            && field(self.object_namespace_id.as_ref(), &relation.object_namespace_id)
            && field(self.object_id.as_ref(), &relation.object_id)
            && field(self.role_id.as_ref(), relation.role_name())
            && field(self.namespace_edge_id.as_ref(), &relation.namespace_edge_id)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelationRepository: Send + Sync {
    /// Stores `relation`, or returns the stored row with the same natural
    /// key unchanged.
    async fn create(&self, relation: Relation) -> Result<Relation>;

    async fn get(&self, id: &str) -> Result<Relation>;

    async fn get_by_fields(&self, filter: RelationFilter) -> Result<Vec<Relation>>;

    async fn list(&self) -> Result<Vec<Relation>>;

    /// Replaces the row with `relation.id`. Keeps `created_at`.
    async fn update(&self, relation: Relation) -> Result<Relation>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory relation repository for testing and development
pub struct InMemoryRelationRepository {
    rows: DashMap<String, Relation>,
    index: DashMap<NaturalKey, String>,
}

impl InMemoryRelationRepository {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            index: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn sorted(mut relations: Vec<Relation>) -> Vec<Relation> {
        relations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        relations
    }
}

impl Default for InMemoryRelationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationRepository for InMemoryRelationRepository {
    async fn create(&self, mut relation: Relation) -> Result<Relation> {
        relation.validate()?;

        match self.index.entry(relation.natural_key()) {
            Entry::Occupied(entry) => self
                .rows
                .get(entry.get())
                .map(|row| row.value().clone())
                .ok_or_else(|| AuthzError::Storage(format!("dangling index entry {}", entry.get()))),
            Entry::Vacant(entry) => {
                if relation.id.is_empty() {
                    relation.id = Uuid::new_v4().to_string();
                }
                let now = Utc::now();
                relation.created_at = now;
                relation.updated_at = now;
                entry.insert(relation.id.clone());
                self.rows.insert(relation.id.clone(), relation.clone());
                Ok(relation)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Relation> {
        self.rows
            .get(id)
            .map(|row| row.value().clone())
            .ok_or_else(|| AuthzError::not_found("relation", id))
    }

    async fn get_by_fields(&self, filter: RelationFilter) -> Result<Vec<Relation>> {
        let matching = self
            .rows
            .iter()
            .filter(|row| filter.matches(row.value()))
            .map(|row| row.value().clone())
            .collect();
        Ok(Self::sorted(matching))
    }

    async fn list(&self) -> Result<Vec<Relation>> {
        Ok(Self::sorted(
            self.rows.iter().map(|row| row.value().clone()).collect(),
        ))
    }

    async fn update(&self, mut relation: Relation) -> Result<Relation> {
        relation.validate()?;
        let existing = self.get(&relation.id).await?;

        let old_key = existing.natural_key();
        let new_key = relation.natural_key();
        if old_key != new_key {
            match self.index.entry(new_key) {
                Entry::Occupied(_) => {
                    return Err(AuthzError::InvalidRelation(
                        "an identical relation already exists".to_string(),
                    ))
                }
                Entry::Vacant(entry) => {
                    entry.insert(relation.id.clone());
                }
            }
            self.index.remove(&old_key);
        }

        relation.created_at = existing.created_at;
        relation.updated_at = Utc::now();
        self.rows.insert(relation.id.clone(), relation.clone());
        Ok(relation)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let (_, removed) = self
            .rows
            .remove(id)
            .ok_or_else(|| AuthzError::not_found("relation", id))?;
        self.index.remove(&removed.natural_key());
        Ok(())
    }
}
