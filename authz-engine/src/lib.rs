//! Relation-tuple runtime for the Warden authorization platform
//!
//! Sits between callers and a Zanzibar-style authorization engine:
//! - Relations (subject holds role or edge on object) are stored in a
//!   relation repository and mirrored as engine tuples
//! - Permission checks, single and batched, are answered by the engine
//! - Bootstrap merges service definitions onto the base schema, records
//!   namespaces, permissions and roles in the catalog and installs the
//!   schema in the engine
//!
//! # Example
//!
//! ```rust
//! use authz_engine::{
//!     AuthzEngine, InMemoryAuthzEngine, InMemoryRelationRepository, Relation, RelationService,
//! };
//! use authz_schema::{compile_schema, BaseSchema};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(InMemoryAuthzEngine::new());
//!     let schema = compile_schema(BaseSchema::load()?.graph())?;
//!     engine.write_schema(schema.into_source()).await?;
//!
//!     let relations = RelationService::new(Arc::new(InMemoryRelationRepository::new()), engine);
//!     let owner = Relation::for_role("app/user", "alice", "app/organization", "acme", "owner");
//!     relations.create(owner.clone()).await?;
//!
//!     assert!(relations.check_permission(&owner, "app_organization_update").await?);
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod catalog;
pub mod check;
pub mod config;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod models;
pub mod repository;
pub mod runtime;
pub mod service;
pub mod telemetry;
pub mod transform;
pub mod tuple;

pub use bootstrap::{BootstrapService, MigrationReport};
pub use catalog::{
    CatalogServices, InMemoryCatalog, NamespaceRecord, NamespaceService, PermissionRecord,
    PermissionService, RoleRecord, RoleService,
};
pub use config::AuthzSettings;
pub use definitions::{DefinitionSource, StaticDefinitionSource, YamlDefinitionSource};
pub use engine::{build_engine, AuthzEngine, InMemoryAuthzEngine, SpiceDbHttpEngine};
pub use error::{AuthzError, ErrorKind, Result};
pub use models::{CheckPair, Metadata, NaturalKey, PermissionCheck, Relation, RelationType};
pub use repository::{
    InMemoryRelationRepository, PostgresRelationRepository, RelationFilter, RelationRepository,
};
pub use runtime::AuthzRuntime;
pub use service::{ReconcileReport, RelationService};
pub use transform::{from_engine_tuple, to_check_request, to_engine_tuple};
pub use tuple::{CheckRequest, CheckResult, EngineTuple, ObjectRef, SubjectRef};
