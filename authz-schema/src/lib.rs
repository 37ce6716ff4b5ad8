//! Schema compiler for the Warden authorization platform
//!
//! Turns operator input into a Zanzibar-style schema:
//! - Policies (role grants permission on namespace) compile to one
//!   definition per namespace
//! - Service definitions (custom resources and their verbs) merge onto the
//!   built-in base schema, wiring each verb into the organization, project,
//!   role-binding and role namespaces
//! - The merged graph is rendered to schema source, parsed back and
//!   validated before anything downstream may use it
//!
//! # Example
//!
//! ```rust
//! use authz_schema::{apply_service_definition, compile_schema, BaseSchema, ServiceDefinition};
//!
//! # fn main() -> Result<(), authz_schema::SchemaError> {
//! let base = BaseSchema::load()?;
//! let orders = ServiceDefinition::new("orders").with_resource("order", &["create", "get"]);
//!
//! let merged = apply_service_definition(base.graph(), &orders)?;
//! let compiled = compile_schema(&merged)?;
//! assert!(compiled.source().contains("permission orders_order_create"));
//! # Ok(())
//! # }
//! ```

pub mod base;
pub mod compiler;
pub mod dsl;
pub mod error;
pub mod graph;
pub mod merge;
pub mod model;
pub mod naming;
pub mod validate;

pub use base::{predefined_roles, BaseSchema, BASE_SCHEMA_SOURCE};
pub use compiler::{
    build_namespace_definition, build_policy_definitions, compile_policies, compile_policy_graph,
    PolicyDefinition, PolicyRole,
};
pub use error::{Result, SchemaError};
pub use graph::{
    AllowedReference, NamespaceDefinition, ReferenceTarget, RelationDefinition, RelationKind,
    Rewrite, SchemaGraph,
};
pub use merge::{apply_service_definition, apply_service_definitions, service_definitions_from_graph};
pub use model::{
    InheritedNamespace, Namespace, Permission, PermissionInheritance, Policy, PrincipalType,
    ResourceDefinition, ResourcePermission, Role, RoleDefinition, ServiceDefinition,
};
pub use validate::{compile_schema, compile_source, validate_graph, CompiledSchema};
