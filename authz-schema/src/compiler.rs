//! Compiles role/permission policies into one schema definition per
//! namespace.
//!
//! Policies are grouped by the namespace of the permission, then by
//! `<role>_<role namespace>_<namespace>` so that a role imported from
//! another namespace never merges with a same-named local role. Every
//! permission becomes the union of the roles granting it: local roles as
//! computed usersets, imported roles as arrows through a relation named
//! after the role's home namespace.

use crate::dsl::generate_definition;
use crate::error::{Result, SchemaError};
use crate::graph::{AllowedReference, NamespaceDefinition, RelationDefinition, Rewrite, SchemaGraph};
use crate::model::{Policy, PrincipalType};
use crate::naming::normalize_identifier;
use itertools::Itertools;
use std::collections::BTreeMap;

/// Namespaces that receive role declarations for roles other namespaces
/// import from them.
pub const HIERARCHY_NAMESPACES: [&str; 3] = ["team", "organization", "project"];

/// Roles of one namespace after grouping policies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDefinition {
    pub namespace: String,
    pub roles: Vec<PolicyRole>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRole {
    pub name: String,
    /// Home namespace of the role; equal to the definition's namespace for
    /// local roles.
    pub namespace: String,
    pub types: Vec<PrincipalType>,
    pub permissions: Vec<String>,
}

impl PolicyDefinition {
    fn has_role(&self, name: &str, namespace: &str) -> bool {
        self.roles
            .iter()
            .any(|role| role.name == name && role.namespace == namespace)
    }

    /// Permission names in first-seen order over the sorted roles.
    pub fn permissions(&self) -> Vec<&str> {
        self.roles
            .iter()
            .flat_map(|role| role.permissions.iter().map(String::as_str))
            .unique()
            .collect()
    }
}

/// Groups policies into per-namespace role sets. Fails without partial
/// output when an action belongs to another namespace or one role is
/// declared with diverging principal types.
pub fn build_policy_definitions(policies: &[Policy]) -> Result<Vec<PolicyDefinition>> {
    let mut grouped: BTreeMap<String, Vec<(String, PolicyRole)>> = BTreeMap::new();

    for policy in policies {
        let namespace = normalize_identifier(&policy.namespace_id);
        let action_namespace = normalize_identifier(&policy.action.namespace_id);
        if !action_namespace.is_empty() && action_namespace != namespace {
            return Err(SchemaError::ActionNamespaceMismatch {
                action: policy.action.id.clone(),
                action_namespace,
                namespace,
            });
        }

        let role_name = normalize_identifier(&policy.role.id);
        let role_namespace = if policy.role.namespace_id.is_empty() {
            namespace.clone()
        } else {
            normalize_identifier(&policy.role.namespace_id)
        };
        let types = normalize_types(&policy.role.types);
        let action = normalize_identifier(&policy.action.id);
        let key = format!("{role_name}_{role_namespace}_{namespace}");

        let roles = grouped.entry(namespace.clone()).or_default();
        match roles.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, role)) => {
                if role.types.is_empty() {
                    role.types = types;
                } else if !types.is_empty() && role.types != types {
                    return Err(SchemaError::RoleTypesMismatch {
                        role: role_name,
                        namespace,
                    });
                }
                if !role.permissions.contains(&action) {
                    role.permissions.push(action);
                }
            }
            None => roles.push((
                key,
                PolicyRole {
                    name: role_name,
                    namespace: role_namespace,
                    types,
                    permissions: vec![action],
                },
            )),
        }
    }

    let mut definitions: Vec<PolicyDefinition> = grouped
        .into_iter()
        .map(|(namespace, roles)| PolicyDefinition {
            namespace,
            roles: roles.into_iter().map(|(_, role)| role).collect(),
        })
        .collect();

    propagate_hierarchy_roles(&mut definitions);

    for definition in &mut definitions {
        definition
            .roles
            .sort_by(|a, b| (&a.name, &a.namespace).cmp(&(&b.name, &b.namespace)));
        if let Some(role) = definition
            .roles
            .iter()
            .find(|role| role.namespace == definition.namespace && role.types.is_empty())
        {
            return Err(SchemaError::InvalidDefinition(format!(
                "role {} in {} declares no principal types",
                role.name, definition.namespace
            )));
        }
    }

    Ok(definitions)
}

/// Declares imported roles inside the hierarchy namespace they come from,
/// so arrows into that namespace resolve.
fn propagate_hierarchy_roles(definitions: &mut [PolicyDefinition]) {
    let imported: Vec<PolicyRole> = definitions
        .iter()
        .flat_map(|definition| {
            definition
                .roles
                .iter()
                .filter(move |role| role.namespace != definition.namespace)
                .filter(|role| HIERARCHY_NAMESPACES.contains(&role.namespace.as_str()))
        })
        .cloned()
        .collect();

    for role in imported {
        if let Some(target) = definitions
            .iter_mut()
            .find(|definition| definition.namespace == role.namespace)
        {
            if !target.has_role(&role.name, &role.namespace) {
                target.roles.push(PolicyRole {
                    permissions: Vec::new(),
                    ..role
                });
            }
        }
    }
}

fn normalize_types(types: &[PrincipalType]) -> Vec<PrincipalType> {
    types
        .iter()
        .map(|principal| PrincipalType {
            namespace: normalize_identifier(&principal.namespace),
            relation: principal.relation.as_deref().map(normalize_identifier),
        })
        .collect()
}

pub fn build_namespace_definition(definition: &PolicyDefinition) -> NamespaceDefinition {
    let mut out = NamespaceDefinition::new(&definition.namespace);
    let (local, imported): (Vec<&PolicyRole>, Vec<&PolicyRole>) = definition
        .roles
        .iter()
        .partition(|role| role.namespace == definition.namespace);

    for role in &local {
        let allowed = role.types.iter().map(AllowedReference::from).collect();
        out.relations
            .push(RelationDefinition::relation(&role.name, allowed));
    }
    for namespace in imported.iter().map(|role| role.namespace.as_str()).unique() {
        out.relations.push(RelationDefinition::relation(
            namespace,
            vec![AllowedReference::direct(namespace)],
        ));
    }

    for permission in definition.permissions() {
        let terms = definition
            .roles
            .iter()
            .filter(|role| role.permissions.iter().any(|p| p == permission))
            .map(|role| {
                if role.namespace == definition.namespace {
                    Rewrite::computed(&role.name)
                } else {
                    Rewrite::arrow(&role.namespace, &role.name)
                }
            });
        out.relations
            .push(RelationDefinition::permission(permission, Rewrite::union(terms)));
    }
    out
}

/// Compiles policies into a schema graph, one definition per namespace
/// sorted by namespace name.
pub fn compile_policy_graph(policies: &[Policy]) -> Result<SchemaGraph> {
    let definitions = build_policy_definitions(policies)?;
    Ok(SchemaGraph::new(
        definitions.iter().map(build_namespace_definition).collect(),
    ))
}

/// Compiles policies into one schema source block per namespace.
pub fn compile_policies(policies: &[Policy]) -> Result<Vec<String>> {
    let graph = compile_policy_graph(policies)?;
    tracing::debug!(namespaces = graph.len(), "Compiled policies");
    Ok(graph.definitions().iter().map(generate_definition).collect())
}
