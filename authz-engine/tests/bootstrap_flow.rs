//! Bootstrap against the in-memory engine, followed by permission checks
//! that walk the merged schema.

use authz_engine::config::BootstrapSettings;
use authz_engine::*;
use authz_schema::naming::{PLATFORM_ID, PLATFORM_NAMESPACE, USER_PRINCIPAL};
use authz_schema::{
    predefined_roles, BaseSchema, Permission, Policy, PrincipalType, ResourcePermission, Role, RoleDefinition,
    ServiceDefinition,
};
use std::sync::Arc;

struct Harness {
    engine: Arc<InMemoryAuthzEngine>,
    catalog: Arc<InMemoryCatalog>,
    relations: Arc<RelationService>,
    bootstrap: BootstrapService,
}

fn orders() -> ServiceDefinition {
    ServiceDefinition::new("orders").with_resource("order", &["create", "get", "delete"])
}

fn harness(definitions: Vec<ServiceDefinition>, admin_users: &[&str]) -> Harness {
    let engine = Arc::new(InMemoryAuthzEngine::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let relations = Arc::new(RelationService::new(
        Arc::new(InMemoryRelationRepository::new()),
        engine.clone(),
    ));
    let settings = BootstrapSettings {
        admin_users: admin_users.iter().map(ToString::to_string).collect(),
        schema_push_backoff_ms: 1,
        ..BootstrapSettings::default()
    };
    let bootstrap = BootstrapService::new(
        BaseSchema::load().unwrap(),
        Arc::new(StaticDefinitionSource::new(definitions)),
        CatalogServices::in_memory(catalog.clone()),
        engine.clone(),
        relations.clone(),
        settings,
    );
    Harness {
        engine,
        catalog,
        relations,
        bootstrap,
    }
}

/// Wildcard tuples written for the built-in roles, one per principal type
/// and permission.
fn predefined_role_tuples() -> usize {
    predefined_roles()
        .iter()
        .map(|role| role.permissions.len() * 2)
        .sum()
}

fn edge(subject: (&str, &str), object: (&str, &str), name: &str) -> Relation {
    Relation::for_edge(subject.0, subject.1, object.0, object.1, name)
}

fn user(id: &str) -> (&'static str, &str) {
    (USER_PRINCIPAL, id)
}

async fn allowed(h: &Harness, subject: (&str, &str), object: (&str, &str), permission: &str) -> bool {
    let probe = edge(subject, object, "probe");
    h.relations.check_permission(&probe, permission).await.unwrap()
}

#[tokio::test]
async fn test_migrate_records_catalog_and_installs_schema() {
    let h = harness(vec![orders()], &["root"]);
    let report = h.bootstrap.migrate().await.unwrap();

    assert_eq!(report.definitions, 1);
    assert_eq!(report.roles, 9);
    assert_eq!(report.super_users, 1);

    let namespaces = NamespaceService::list(h.catalog.as_ref()).await.unwrap();
    assert_eq!(namespaces.len(), report.namespaces);
    let order = NamespaceService::get(h.catalog.as_ref(), "orders/order").await.unwrap();
    assert_eq!(order.metadata.get("service"), Some("orders"));
    assert_eq!(order.namespace.inherited[0].parent_namespace_id, "app/project");

    let create = PermissionService::get(h.catalog.as_ref(), "orders.order.create").await.unwrap();
    assert_eq!(create.metadata.get("fq_name"), Some("orders_order_create"));
    assert_eq!(create.metadata.get("inherits"), Some("project:orders_order_create"));
    assert!(PermissionService::get(h.catalog.as_ref(), "app.organization.administer").await.is_ok());

    // role grants plus the superuser tuple
    assert_eq!(h.engine.len(), predefined_role_tuples() + 1);
    let role_grants = h
        .relations
        .get_by_fields(RelationFilter::default().object("app/role", "app_organization_viewer"))
        .await
        .unwrap();
    let mut subjects: Vec<_> = role_grants
        .iter()
        .map(|r| (r.subject_namespace_id.as_str(), r.subject_id.as_str(), r.namespace_edge_id.as_str()))
        .collect();
    subjects.sort_unstable();
    assert_eq!(
        subjects,
        [
            ("app/serviceuser", "*", "app_organization_get"),
            ("app/user", "*", "app_organization_get"),
        ]
    );
    let admins = h
        .relations
        .get_by_fields(RelationFilter::default().object(PLATFORM_NAMESPACE, PLATFORM_ID))
        .await
        .unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].subject_id, "root");
}

#[tokio::test]
async fn test_migrate_twice_is_idempotent() {
    let h = harness(vec![orders()], &["root"]);
    let first = h.bootstrap.migrate().await.unwrap();
    let second = h.bootstrap.migrate().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        h.relations.list().await.unwrap().len(),
        predefined_role_tuples() + 1
    );
    assert_eq!(
        RoleService::list(h.catalog.as_ref()).await.unwrap().len(),
        first.roles
    );
    assert_eq!(
        PermissionService::list(h.catalog.as_ref()).await.unwrap().len(),
        first.permissions
    );
}

#[tokio::test]
async fn test_superuser_reaches_custom_resources() {
    let h = harness(vec![orders()], &["root"]);
    h.bootstrap.migrate().await.unwrap();

    let acme = ("app/organization", "acme");
    let project = ("app/project", "p1");
    let order = ("orders/order", "o1");
    for relation in [
        edge((PLATFORM_NAMESPACE, PLATFORM_ID), acme, "platform"),
        edge(acme, project, "org"),
        edge(project, order, "project"),
    ] {
        h.relations.create(relation).await.unwrap();
    }

    assert!(allowed(&h, user("root"), order, "create").await);
    assert!(allowed(&h, user("root"), acme, "app_organization_delete").await);
    assert!(!allowed(&h, user("mallory"), order, "create").await);
}

#[tokio::test]
async fn test_role_binding_grants_role_permissions() {
    let h = harness(vec![orders()], &[]);
    h.bootstrap.migrate().await.unwrap();

    let acme = ("app/organization", "acme");
    let binding = ("app/rolebinding", "rb1");
    let role = ("app/role", "app_organization_viewer");
    for relation in [
        edge(user("bob"), binding, "bearer"),
        edge(role, binding, "role"),
        edge(binding, acme, "granted"),
    ] {
        h.relations.create(relation).await.unwrap();
    }

    assert!(allowed(&h, user("bob"), acme, "app_organization_get").await);
    assert!(!allowed(&h, user("bob"), acme, "app_organization_update").await);
    assert!(!allowed(&h, user("alice"), acme, "app_organization_get").await);
}

#[tokio::test]
async fn test_operator_role_with_unknown_permission_fails() {
    let mut service = orders();
    service.roles.push(RoleDefinition {
        name: "order_clerk".to_string(),
        title: "Order Clerk".to_string(),
        scopes: vec!["project".to_string()],
        permissions: vec!["orders_order_refund".to_string()],
        ..RoleDefinition::default()
    });
    let h = harness(vec![service], &[]);

    let compiled = h.bootstrap.migrate_schema().await.unwrap();
    let err = h.bootstrap.migrate_roles(compiled.graph()).await.unwrap_err();
    assert!(matches!(err, AuthzError::Migration(msg) if msg.contains("orders_order_refund")));
}

#[tokio::test]
async fn test_operator_role_scopes_resolve_aliases() {
    let mut service = orders();
    service.roles.push(RoleDefinition {
        name: "order_clerk".to_string(),
        title: "Order Clerk".to_string(),
        scopes: vec!["project".to_string()],
        permissions: vec!["orders_order_create".to_string()],
        ..RoleDefinition::default()
    });
    let h = harness(vec![service], &[]);

    let compiled = h.bootstrap.migrate_schema().await.unwrap();
    h.bootstrap.migrate_roles(compiled.graph()).await.unwrap();

    let clerk = RoleService::get(h.catalog.as_ref(), "order_clerk").await.unwrap();
    assert_eq!(clerk.scopes, vec!["app/project".to_string()]);
    assert_eq!(clerk.permissions, vec!["orders_order_create".to_string()]);

    let project = ("app/project", "p1");
    let order = ("orders/order", "o1");
    let binding = ("app/rolebinding", "rb1");
    for relation in [
        edge(project, order, "project"),
        edge(user("cy"), binding, "bearer"),
        edge(("app/role", "order_clerk"), binding, "role"),
        edge(binding, project, "granted"),
    ] {
        h.relations.create(relation).await.unwrap();
    }
    assert!(allowed(&h, user("cy"), order, "create").await);
    assert!(!allowed(&h, user("cy"), order, "delete").await);
}

#[tokio::test]
async fn test_invalid_definition_aborts_before_push() {
    let mut service = orders();
    service.resources[0].permissions.push(ResourcePermission {
        name: "bulk_create".to_string(),
        description: String::new(),
    });
    let h = harness(vec![service], &[]);

    assert!(matches!(
        h.bootstrap.migrate_schema().await,
        Err(AuthzError::Schema(_))
    ));
    assert!(NamespaceService::list(h.catalog.as_ref()).await.unwrap().is_empty());

    // nothing was installed, so writes are refused
    let write = h
        .relations
        .create(edge(user("root"), (PLATFORM_NAMESPACE, PLATFORM_ID), "admin"))
        .await;
    assert!(write.is_err());
}

#[tokio::test]
async fn test_migrate_policies_installs_standalone_schema() {
    let h = harness(Vec::new(), &[]);
    let policies = vec![
        Policy::new(
            "document",
            Role::new("editor", vec![PrincipalType::direct("user")]),
            Permission::new("write"),
        ),
        Policy::new(
            "document",
            Role::new("editor", vec![PrincipalType::direct("user")]),
            Permission::new("read"),
        ),
    ];
    let compiled = h.bootstrap.migrate_policies(&policies).await.unwrap();
    assert!(compiled.graph().contains("user"));

    h.relations
        .create(Relation::for_role("user", "ann", "document", "d1", "editor"))
        .await
        .unwrap();
    assert!(allowed(&h, ("user", "ann"), ("document", "d1"), "read").await);
    assert!(!allowed(&h, ("user", "ben"), ("document", "d1"), "write").await);
}

#[tokio::test]
async fn test_runtime_bootstraps_from_definition_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("storage.yaml"),
        "name: storage\nresources:\n  - name: bucket\n    permissions:\n      - name: read\n        description: Read objects\n",
    )
    .unwrap();

    let mut settings = AuthzSettings::default();
    settings.bootstrap.definitions_path = Some(dir.path().to_path_buf());
    settings.bootstrap.admin_users = vec!["root".to_string()];

    let runtime = AuthzRuntime::from_settings(&settings).await.unwrap();
    let report = runtime.bootstrap.migrate().await.unwrap();
    assert_eq!(report.definitions, 1);

    let read = PermissionService::get(runtime.catalog.permissions.as_ref(), "storage.bucket.read")
        .await
        .unwrap();
    assert_eq!(read.metadata.get("description"), Some("Read objects"));
    assert_eq!(
        runtime.relations.list().await.unwrap().len(),
        predefined_role_tuples() + 1
    );
}
