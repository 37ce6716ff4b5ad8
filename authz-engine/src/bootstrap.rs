//! Schema migration: merges service definitions onto the base schema,
//! records the result in the catalog and installs it in the engine.
//!
//! Every stage is all-or-nothing on the schema and safe to re-run.

use crate::catalog::{CatalogServices, NamespaceRecord, PermissionRecord, RoleRecord};
use crate::check::WILDCARD_ID;
use crate::config::BootstrapSettings;
use crate::definitions::DefinitionSource;
use crate::engine::AuthzEngine;
use crate::error::{AuthzError, Result};
use crate::models::{Metadata, Relation};
use crate::service::RelationService;
use authz_schema::naming::{
    fq_permission_name, is_system_namespace, resolve_namespace_alias, split_namespace,
    ADMIN_RELATION, DEFAULT_SERVICE, GROUP_NAMESPACE, ORGANIZATION_NAMESPACE,
    ORGANIZATION_RELATION, PLATFORM_ID, PLATFORM_NAMESPACE, PLATFORM_RELATION, PROJECT_NAMESPACE,
    PROJECT_RELATION, ROLE_NAMESPACE, SERVICE_USER_PRINCIPAL, USER_PRINCIPAL,
};
use authz_schema::{
    apply_service_definitions, compile_policy_graph, compile_schema, predefined_roles,
    service_definitions_from_graph, BaseSchema, CompiledSchema, Namespace, NamespaceDefinition,
    Policy, SchemaGraph, ServiceDefinition,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Namespace policies grant to when nothing else declares it
pub const DEFAULT_PRINCIPAL_NAMESPACE: &str = "user";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub definitions: usize,
    pub namespaces: usize,
    pub permissions: usize,
    pub roles: usize,
    pub super_users: usize,
}

pub struct BootstrapService {
    base: BaseSchema,
    definitions: Arc<dyn DefinitionSource>,
    catalog: CatalogServices,
    engine: Arc<dyn AuthzEngine>,
    relations: Arc<RelationService>,
    settings: BootstrapSettings,
}

impl BootstrapService {
    pub fn new(
        base: BaseSchema,
        definitions: Arc<dyn DefinitionSource>,
        catalog: CatalogServices,
        engine: Arc<dyn AuthzEngine>,
        relations: Arc<RelationService>,
        settings: BootstrapSettings,
    ) -> Self {
        Self {
            base,
            definitions,
            catalog,
            engine,
            relations,
            settings,
        }
    }

    /// Runs every stage in order and stops at the first failure.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let (compiled, mut report) = self.migrate_schema_with_report().await?;
        report.roles = self.migrate_roles(compiled.graph()).await?.len();
        report.super_users = self.make_super_users().await?;
        info!(?report, "Migration finished");
        Ok(report)
    }

    /// Merges definitions onto the base schema, validates, records
    /// namespaces and permissions, then pushes the schema.
    pub async fn migrate_schema(&self) -> Result<CompiledSchema> {
        Ok(self.migrate_schema_with_report().await?.0)
    }

    async fn migrate_schema_with_report(&self) -> Result<(CompiledSchema, MigrationReport)> {
        let definitions = self.definitions.get_definitions().await?;
        info!(services = definitions.len(), "Migrating schema");

        let merged = apply_service_definitions(self.base.graph(), &definitions)?;
        let compiled = compile_schema(&merged)?;

        let namespaces = self.persist_namespaces(compiled.graph()).await?;
        let permissions = self
            .persist_permissions(compiled.graph(), &definitions)
            .await?;
        self.push_schema(compiled.source()).await?;

        info!(namespaces, permissions, "Schema migrated");
        let report = MigrationReport {
            definitions: definitions.len(),
            namespaces,
            permissions,
            ..MigrationReport::default()
        };
        Ok((compiled, report))
    }

    /// Upserts the built-in roles plus roles declared in service
    /// definitions. Every role permission must exist in `schema`.
    pub async fn migrate_roles(&self, schema: &SchemaGraph) -> Result<Vec<RoleRecord>> {
        let custom = self.definitions.get_definitions().await?;
        let roles = predefined_roles()
            .into_iter()
            .chain(custom.into_iter().flat_map(|definition| definition.roles));

        let mut upserted = Vec::new();
        for role in roles {
            if let Some(missing) = role
                .permissions
                .iter()
                .find(|permission| schema.relation(ROLE_NAMESPACE, permission).is_none())
            {
                return Err(AuthzError::Migration(format!(
                    "role {} references unknown permission {missing}",
                    role.name
                )));
            }

            for permission in &role.permissions {
                self.grant_role_permission(&role.name, permission).await?;
            }

            let scopes = role
                .scopes
                .iter()
                .map(|scope| resolve_namespace_alias(scope).to_string())
                .collect();
            let record = RoleRecord::new(&role.name, &role.title, scopes, role.permissions)
                .with_metadata(Metadata::new().with("description", role.description));
            upserted.push(self.catalog.roles.upsert(record).await?);
        }

        info!(roles = upserted.len(), "Roles migrated");
        Ok(upserted)
    }

    /// `app/role:<role>#<permission>` for every user and service user, so a
    /// binding to the role carries the permission.
    async fn grant_role_permission(&self, role: &str, permission: &str) -> Result<()> {
        for principal in [USER_PRINCIPAL, SERVICE_USER_PRINCIPAL] {
            let relation =
                Relation::for_edge(principal, WILDCARD_ID, ROLE_NAMESPACE, role, permission);
            self.relations.create(relation).await?;
        }
        Ok(())
    }

    /// Grants platform admin to every configured admin user.
    pub async fn make_super_users(&self) -> Result<usize> {
        for user_id in &self.settings.admin_users {
            let relation = Relation::for_edge(
                USER_PRINCIPAL,
                user_id,
                PLATFORM_NAMESPACE,
                PLATFORM_ID,
                ADMIN_RELATION,
            );
            self.relations.create(relation).await?;
            info!(user_id = %user_id, "Platform admin granted");
        }
        Ok(self.settings.admin_users.len())
    }

    /// Compiles `policies` into a standalone schema and pushes it.
    #[instrument(skip(self, policies), fields(policies = policies.len()))]
    pub async fn migrate_policies(&self, policies: &[Policy]) -> Result<CompiledSchema> {
        let mut graph = compile_policy_graph(policies)?;
        if !graph.contains(DEFAULT_PRINCIPAL_NAMESPACE) {
            graph.push(NamespaceDefinition::new(DEFAULT_PRINCIPAL_NAMESPACE));
        }
        let compiled = compile_schema(&graph)?;
        self.push_schema(compiled.source()).await?;
        info!(definitions = compiled.graph().len(), "Policies migrated");
        Ok(compiled)
    }

    async fn persist_namespaces(&self, schema: &SchemaGraph) -> Result<usize> {
        let mut count = 0;
        for name in schema.namespaces() {
            let (service, _) = split_namespace(name);
            let metadata = Metadata::new()
                .with("service", service)
                .with("system", is_system_namespace(name).to_string());
            self.catalog
                .namespaces
                .upsert(NamespaceRecord::new(namespace_with_parents(name)).with_metadata(metadata))
                .await?;
            count += 1;
        }
        Ok(count)
    }

    async fn persist_permissions(
        &self,
        schema: &SchemaGraph,
        custom: &[ServiceDefinition],
    ) -> Result<usize> {
        let builtin = service_definitions_from_graph(schema, &[DEFAULT_SERVICE]);
        let mut count = 0;
        for service in custom.iter().chain(&builtin) {
            for (namespace, permission) in service.permissions() {
                let fq = fq_permission_name(&namespace, &permission.name);
                let inherits = namespace_with_parents(&namespace)
                    .inherited_permissions(&fq)
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                let metadata = Metadata::new()
                    .with("description", permission.description.clone())
                    .with("fq_name", fq)
                    .with("inherits", inherits);
                self.catalog
                    .permissions
                    .upsert(PermissionRecord::new(&namespace, &permission.name).with_metadata(metadata))
                    .await?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Retries transient failures with exponential backoff.
    async fn push_schema(&self, source: &str) -> Result<()> {
        let attempts = self.settings.schema_push_attempts.max(1);
        let mut backoff = Duration::from_millis(self.settings.schema_push_backoff_ms);
        let mut attempt = 1;
        loop {
            match self.engine.write_schema(source.to_string()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, error = %e, "Schema push failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Catalog namespace with the edges its permissions are inherited along.
fn namespace_with_parents(name: &str) -> Namespace {
    let namespace = Namespace::new(name);
    match name {
        ORGANIZATION_NAMESPACE => namespace.inherits_from(PLATFORM_RELATION, PLATFORM_NAMESPACE),
        PROJECT_NAMESPACE | GROUP_NAMESPACE => {
            namespace.inherits_from(ORGANIZATION_RELATION, ORGANIZATION_NAMESPACE)
        }
        _ if is_system_namespace(name) => namespace,
        _ => namespace.inherits_from(PROJECT_RELATION, PROJECT_NAMESPACE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_parents() {
        let order = namespace_with_parents("orders/order");
        assert_eq!(order.inherited.len(), 1);
        assert_eq!(order.inherited[0].parent_namespace_id, PROJECT_NAMESPACE);
        assert_eq!(
            order.inherited_permissions("orders_order_get")[0].to_string(),
            "project:orders_order_get"
        );

        assert_eq!(
            namespace_with_parents(PROJECT_NAMESPACE).inherited[0].relation,
            ORGANIZATION_RELATION
        );
        assert!(namespace_with_parents(USER_PRINCIPAL).inherited.is_empty());
    }
}
