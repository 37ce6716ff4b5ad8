//! Namespace, role and permission records persisted during bootstrap.
//!
//! Every upsert is keyed by name so re-running a migration updates rows in
//! place.

use crate::error::{AuthzError, Result};
use crate::models::Metadata;
use async_trait::async_trait;
use authz_schema::naming::{parse_permission_key, permission_key};
use authz_schema::Namespace;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub id: String,
    pub namespace: Namespace,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: String,
    pub name: String,
    pub title: String,
    /// Namespaces the role can be bound on
    pub scopes: Vec<String>,
    pub permissions: Vec<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub id: String,
    /// Bare verb, e.g. `create`
    pub name: String,
    pub namespace_id: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NamespaceRecord {
    pub fn new(namespace: Namespace) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            namespace,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl RoleRecord {
    pub fn new(name: &str, title: &str, scopes: Vec<String>, permissions: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.to_string(),
            title: title.to_string(),
            scopes,
            permissions,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl PermissionRecord {
    pub fn new(namespace_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.to_string(),
            namespace_id: namespace_id.to_string(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// `"<service>.<resource>.<verb>"`
    pub fn key(&self) -> String {
        permission_key(&self.namespace_id, &self.name)
    }
}

#[async_trait]
pub trait NamespaceService: Send + Sync {
    async fn upsert(&self, record: NamespaceRecord) -> Result<NamespaceRecord>;
    async fn get(&self, name: &str) -> Result<NamespaceRecord>;
    async fn list(&self) -> Result<Vec<NamespaceRecord>>;
}

#[async_trait]
pub trait RoleService: Send + Sync {
    async fn upsert(&self, record: RoleRecord) -> Result<RoleRecord>;
    async fn get(&self, name: &str) -> Result<RoleRecord>;
    async fn list(&self) -> Result<Vec<RoleRecord>>;
}

#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn upsert(&self, record: PermissionRecord) -> Result<PermissionRecord>;
    /// Looks up a permission by its `"<service>.<resource>.<verb>"` key
    async fn get(&self, key: &str) -> Result<PermissionRecord>;
    async fn list(&self) -> Result<Vec<PermissionRecord>>;
}

/// The three catalog collaborators bootstrap writes to
#[derive(Clone)]
pub struct CatalogServices {
    pub namespaces: Arc<dyn NamespaceService>,
    pub roles: Arc<dyn RoleService>,
    pub permissions: Arc<dyn PermissionService>,
}

impl CatalogServices {
    /// All three backed by one [`InMemoryCatalog`]
    pub fn in_memory(catalog: Arc<InMemoryCatalog>) -> Self {
        Self {
            namespaces: catalog.clone(),
            roles: catalog.clone(),
            permissions: catalog,
        }
    }
}

/// Catalog kept in process memory
#[derive(Default)]
pub struct InMemoryCatalog {
    namespaces: DashMap<String, NamespaceRecord>,
    roles: DashMap<String, RoleRecord>,
    permissions: DashMap<String, PermissionRecord>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Inserts under `key` or overwrites while keeping the original id and
/// creation time.
fn upsert_by_key<T: Clone>(
    map: &DashMap<String, T>,
    key: String,
    mut record: T,
    identity: impl Fn(&mut T) -> (&mut String, &mut DateTime<Utc>, &mut DateTime<Utc>),
) -> T {
    let now = Utc::now();
    match map.entry(key) {
        Entry::Occupied(mut entry) => {
            let (existing_id, existing_created, _) = identity(entry.get_mut());
            let (id, created_at) = (existing_id.clone(), *existing_created);
            {
                let (new_id, new_created, new_updated) = identity(&mut record);
                *new_id = id;
                *new_created = created_at;
                *new_updated = now;
            }
            entry.insert(record.clone());
            record
        }
        Entry::Vacant(entry) => {
            {
                let (new_id, new_created, new_updated) = identity(&mut record);
                if new_id.is_empty() {
                    *new_id = Uuid::new_v4().to_string();
                }
                *new_created = now;
                *new_updated = now;
            }
            entry.insert(record.clone());
            record
        }
    }
}

fn sorted<T: Clone>(map: &DashMap<String, T>) -> Vec<T> {
    let mut entries: Vec<(String, T)> = map
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().map(|(_, value)| value).collect()
}

#[async_trait]
impl NamespaceService for InMemoryCatalog {
    async fn upsert(&self, record: NamespaceRecord) -> Result<NamespaceRecord> {
        if record.namespace.name.is_empty() {
            return Err(AuthzError::InvalidRelation("namespace name is required".to_string()));
        }
        let key = record.namespace.name.clone();
        Ok(upsert_by_key(&self.namespaces, key, record, |r| {
            (&mut r.id, &mut r.created_at, &mut r.updated_at)
        }))
    }

    async fn get(&self, name: &str) -> Result<NamespaceRecord> {
        self.namespaces
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AuthzError::not_found("namespace", name))
    }

    async fn list(&self) -> Result<Vec<NamespaceRecord>> {
        Ok(sorted(&self.namespaces))
    }
}

#[async_trait]
impl RoleService for InMemoryCatalog {
    async fn upsert(&self, record: RoleRecord) -> Result<RoleRecord> {
        if record.name.is_empty() {
            return Err(AuthzError::InvalidRelation("role name is required".to_string()));
        }
        let key = record.name.clone();
        Ok(upsert_by_key(&self.roles, key, record, |r| {
            (&mut r.id, &mut r.created_at, &mut r.updated_at)
        }))
    }

    async fn get(&self, name: &str) -> Result<RoleRecord> {
        self.roles
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AuthzError::not_found("role", name))
    }

    async fn list(&self) -> Result<Vec<RoleRecord>> {
        Ok(sorted(&self.roles))
    }
}

#[async_trait]
impl PermissionService for InMemoryCatalog {
    async fn upsert(&self, record: PermissionRecord) -> Result<PermissionRecord> {
        let key = record.key();
        parse_permission_key(&key)?;
        Ok(upsert_by_key(&self.permissions, key, record, |r| {
            (&mut r.id, &mut r.created_at, &mut r.updated_at)
        }))
    }

    async fn get(&self, key: &str) -> Result<PermissionRecord> {
        self.permissions
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AuthzError::not_found("permission", key))
    }

    async fn list(&self) -> Result<Vec<PermissionRecord>> {
        Ok(sorted(&self.permissions))
    }
}
