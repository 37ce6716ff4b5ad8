//! Overlays service definitions onto a schema graph.
//!
//! For each `(resource, verb)` pair with fully-qualified name `FQ` the merge
//! writes five relations:
//!
//! | namespace            | relation                                                                     |
//! |----------------------|------------------------------------------------------------------------------|
//! | `<service>/<resource>` | `verb = owner + project->app_project_administer + project->FQ + granted->FQ` |
//! | `app/organization`   | `FQ = owner + platform->superuser + granted->app_organization_administer + granted->FQ` |
//! | `app/project`        | `FQ = org->FQ + granted->app_project_administer + granted->FQ`                |
//! | `app/rolebinding`    | `FQ = bearer & role->FQ`                                                      |
//! | `app/role`           | `relation FQ: app/user:* \| app/serviceuser:*`                                |
//!
//! Relations are only ever appended. A relation that already exists with
//! the same body is skipped, so merging the same definition twice is a
//! no-op.

use crate::error::{Result, SchemaError};
use crate::graph::{AllowedReference, NamespaceDefinition, RelationDefinition, Rewrite, SchemaGraph};
use crate::model::{ResourceDefinition, ResourcePermission, ServiceDefinition};
use crate::naming::{
    fq_permission_name, namespace_name, BEARER_RELATION, GRANTED_RELATION,
    ORGANIZATION_ADMINISTER_PERMISSION, ORGANIZATION_NAMESPACE, ORGANIZATION_RELATION,
    OWNER_RELATION, PLATFORM_RELATION, PROJECT_ADMINISTER_PERMISSION, PROJECT_NAMESPACE,
    PROJECT_RELATION, ROLE_BINDING_NAMESPACE, ROLE_NAMESPACE, ROLE_RELATION,
    SERVICE_USER_PRINCIPAL, SUPERUSER_PERMISSION, USER_PRINCIPAL,
};
use tracing::debug;

pub const AUTO_GENERATED_MARKER: &str = "auto-generated for";

/// Returns a new graph with `service` merged onto `graph`.
pub fn apply_service_definition(
    graph: &SchemaGraph,
    service: &ServiceDefinition,
) -> Result<SchemaGraph> {
    service.validate()?;
    let mut merged = graph.clone();

    let mut for_organization = Vec::new();
    let mut for_project = Vec::new();
    let mut for_role_binding = Vec::new();
    let mut for_role = Vec::new();

    for resource in &service.resources {
        let namespace = namespace_name(&service.name, &resource.name);
        let mut resource_relations = Vec::with_capacity(resource.permissions.len() + 3);

        for permission in &resource.permissions {
            let fq = fq_permission_name(&namespace, &permission.name);
            resource_relations.push(RelationDefinition::permission(
                &permission.name,
                Rewrite::union([
                    Rewrite::computed(OWNER_RELATION),
                    Rewrite::arrow(PROJECT_RELATION, PROJECT_ADMINISTER_PERMISSION),
                    Rewrite::arrow(PROJECT_RELATION, &fq),
                    Rewrite::arrow(GRANTED_RELATION, &fq),
                ]),
            ));
            for_organization.push(RelationDefinition::permission(
                &fq,
                Rewrite::union([
                    Rewrite::computed(OWNER_RELATION),
                    Rewrite::arrow(PLATFORM_RELATION, SUPERUSER_PERMISSION),
                    Rewrite::arrow(GRANTED_RELATION, ORGANIZATION_ADMINISTER_PERMISSION),
                    Rewrite::arrow(GRANTED_RELATION, &fq),
                ]),
            ));
            for_project.push(RelationDefinition::permission(
                &fq,
                Rewrite::union([
                    Rewrite::arrow(ORGANIZATION_RELATION, &fq),
                    Rewrite::arrow(GRANTED_RELATION, PROJECT_ADMINISTER_PERMISSION),
                    Rewrite::arrow(GRANTED_RELATION, &fq),
                ]),
            ));
            for_role_binding.push(RelationDefinition::permission(
                &fq,
                Rewrite::intersection([
                    Rewrite::computed(BEARER_RELATION),
                    Rewrite::arrow(ROLE_RELATION, &fq),
                ]),
            ));
            for_role.push(RelationDefinition::relation(
                &fq,
                vec![
                    AllowedReference::wildcard(USER_PRINCIPAL),
                    AllowedReference::wildcard(SERVICE_USER_PRINCIPAL),
                ],
            ));
        }

        resource_relations.push(RelationDefinition::relation(
            OWNER_RELATION,
            vec![
                AllowedReference::direct(USER_PRINCIPAL),
                AllowedReference::direct(SERVICE_USER_PRINCIPAL),
            ],
        ));
        resource_relations.push(RelationDefinition::relation(
            PROJECT_RELATION,
            vec![AllowedReference::direct(PROJECT_NAMESPACE)],
        ));
        resource_relations.push(RelationDefinition::relation(
            GRANTED_RELATION,
            vec![AllowedReference::direct(ROLE_BINDING_NAMESPACE)],
        ));

        merged.ensure_definition(&namespace);
        let definition = target(&mut merged, &namespace, &service.name)?;
        append_relations(definition, resource_relations, None)?;
    }

    let marker = format!("{AUTO_GENERATED_MARKER} {}", service.name);
    for (namespace, relations) in [
        (ORGANIZATION_NAMESPACE, for_organization),
        (PROJECT_NAMESPACE, for_project),
        (ROLE_BINDING_NAMESPACE, for_role_binding),
        (ROLE_NAMESPACE, for_role),
    ] {
        let definition = target(&mut merged, namespace, &service.name)?;
        let appended = append_relations(definition, relations, Some(&marker))?;
        debug!(service = %service.name, namespace, appended, "Merged service relations");
    }

    Ok(merged)
}

/// Merges every definition in order.
pub fn apply_service_definitions(
    graph: &SchemaGraph,
    services: &[ServiceDefinition],
) -> Result<SchemaGraph> {
    services
        .iter()
        .try_fold(graph.clone(), |merged, service| {
            apply_service_definition(&merged, service)
        })
}

fn target<'a>(
    graph: &'a mut SchemaGraph,
    namespace: &str,
    service: &str,
) -> Result<&'a mut NamespaceDefinition> {
    graph
        .definition_mut(namespace)
        .ok_or_else(|| SchemaError::UnknownNamespace {
            namespace: namespace.to_string(),
            referenced_from: format!("service {service}"),
        })
}

/// Appends relations that are not present yet; the first appended one
/// carries `marker` as its comment. Returns how many were appended.
fn append_relations(
    definition: &mut NamespaceDefinition,
    relations: Vec<RelationDefinition>,
    marker: Option<&str>,
) -> Result<usize> {
    let mut appended = 0;
    for relation in relations {
        match definition.relation(&relation.name) {
            Some(existing) if existing.kind == relation.kind => continue,
            Some(_) => {
                return Err(SchemaError::ConflictingRelation {
                    namespace: definition.name.clone(),
                    relation: relation.name,
                })
            }
            None => {}
        }
        let relation = match marker {
            Some(marker) if appended == 0 => relation.with_comment(marker),
            _ => relation,
        };
        definition.relations.push(relation);
        appended += 1;
    }
    Ok(appended)
}

/// Rebuilds service definitions from the permissions declared on
/// `app/rolebinding`. Only services named in `filter` are returned unless
/// it is empty.
pub fn service_definitions_from_graph(
    graph: &SchemaGraph,
    filter: &[&str],
) -> Vec<ServiceDefinition> {
    let mut services: Vec<ServiceDefinition> = Vec::new();
    let Some(role_binding) = graph.definition(ROLE_BINDING_NAMESPACE) else {
        return services;
    };

    for relation in role_binding.permissions() {
        let mut parts = relation.name.split('_');
        let (Some(service), Some(resource)) = (parts.next(), parts.next()) else {
            continue;
        };
        let verb: String = parts.collect();
        if verb.is_empty() || (!filter.is_empty() && !filter.contains(&service)) {
            continue;
        }

        let index = match services.iter().position(|s| s.name == service) {
            Some(index) => index,
            None => {
                services.push(ServiceDefinition::new(service));
                services.len() - 1
            }
        };
        let Some(definition) = services.get_mut(index) else {
            continue;
        };
        let permission = ResourcePermission {
            name: verb,
            description: String::new(),
        };
        match definition.resources.iter_mut().find(|r| r.name == resource) {
            Some(existing) => existing.permissions.push(permission),
            None => definition.resources.push(ResourceDefinition {
                name: resource.to_string(),
                permissions: vec![permission],
            }),
        }
    }
    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseSchema;
    use crate::dsl::{generate_relation, generate_schema};

    fn orders() -> ServiceDefinition {
        ServiceDefinition::new("orders").with_resource("order", &["create", "get"])
    }

    #[test]
    fn test_merge_writes_five_relations_per_permission() {
        let base = BaseSchema::load().unwrap();
        let merged = apply_service_definition(base.graph(), &orders()).unwrap();

        let resource = merged.definition("orders/order").unwrap();
        assert_eq!(
            generate_relation(resource.relation("create").unwrap()),
            "permission create = owner + project->app_project_administer + project->orders_order_create + granted->orders_order_create"
        );
        assert!(resource.has_relation("owner"));
        assert!(resource.has_relation("project"));
        assert!(resource.has_relation("granted"));

        assert_eq!(
            generate_relation(merged.relation(ORGANIZATION_NAMESPACE, "orders_order_get").unwrap()),
            "permission orders_order_get = owner + platform->superuser + granted->app_organization_administer + granted->orders_order_get"
        );
        assert_eq!(
            generate_relation(merged.relation(PROJECT_NAMESPACE, "orders_order_get").unwrap()),
            "permission orders_order_get = org->orders_order_get + granted->app_project_administer + granted->orders_order_get"
        );
        assert_eq!(
            generate_relation(merged.relation(ROLE_BINDING_NAMESPACE, "orders_order_get").unwrap()),
            "permission orders_order_get = bearer & role->orders_order_get"
        );
        assert_eq!(
            generate_relation(merged.relation(ROLE_NAMESPACE, "orders_order_get").unwrap()),
            "relation orders_order_get: app/user:* | app/serviceuser:*"
        );
    }

    #[test]
    fn test_merge_leaves_base_untouched_and_appends_at_end() {
        let base = BaseSchema::load().unwrap();
        let before = base.graph().clone();
        let merged = apply_service_definition(base.graph(), &orders()).unwrap();
        assert_eq!(base.graph(), &before);

        let original = before.definition(ORGANIZATION_NAMESPACE).unwrap();
        let extended = merged.definition(ORGANIZATION_NAMESPACE).unwrap();
        assert_eq!(&extended.relations[..original.relations.len()], &original.relations[..]);

        let first_new = &extended.relations[original.relations.len()];
        assert_eq!(first_new.name, "orders_order_create");
        assert_eq!(first_new.comment.as_deref(), Some("auto-generated for orders"));
        assert_eq!(extended.relations[original.relations.len() + 1].comment, None);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let base = BaseSchema::load().unwrap();
        let once = apply_service_definition(base.graph(), &orders()).unwrap();
        let twice = apply_service_definition(&once, &orders()).unwrap();
        assert_eq!(generate_schema(&once), generate_schema(&twice));
    }

    #[test]
    fn test_conflicting_relation_rejected() {
        let base = BaseSchema::load().unwrap();
        let merged = apply_service_definition(base.graph(), &orders()).unwrap();

        let mut tampered = merged.clone();
        let project = tampered.definition_mut(PROJECT_NAMESPACE).unwrap();
        let index = project
            .relations
            .iter()
            .position(|r| r.name == "orders_order_get")
            .unwrap();
        project.relations[index] =
            RelationDefinition::permission("orders_order_get", Rewrite::computed("granted"));

        assert_eq!(
            apply_service_definition(&tampered, &orders()),
            Err(SchemaError::ConflictingRelation {
                namespace: PROJECT_NAMESPACE.to_string(),
                relation: "orders_order_get".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_base_namespace_is_reported() {
        let graph = SchemaGraph::new(vec![NamespaceDefinition::new(ORGANIZATION_NAMESPACE)]);
        assert!(matches!(
            apply_service_definition(&graph, &orders()),
            Err(SchemaError::UnknownNamespace { .. })
        ));
    }

    #[test]
    fn test_service_definitions_from_graph() {
        let base = BaseSchema::load().unwrap();
        let merged = apply_service_definitions(
            base.graph(),
            &[orders(), ServiceDefinition::new("billing").with_resource("invoice", &["pay"])],
        )
        .unwrap();

        let services = service_definitions_from_graph(&merged, &["orders", "billing"]);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "orders");
        assert_eq!(services[0].resources[0].name, "order");
        let verbs: Vec<_> = services[0].resources[0]
            .permissions
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(verbs, vec!["create", "get"]);

        let app = service_definitions_from_graph(&merged, &["app"]);
        assert_eq!(app.len(), 1);
        let resources: Vec<_> = app[0].resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(resources, vec!["organization", "project", "group"]);
    }
}
