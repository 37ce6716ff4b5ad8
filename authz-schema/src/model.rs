use crate::error::{Result, SchemaError};
use crate::naming::{is_valid_permission_name, is_valid_relation_name, namespace_name};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A resource type in the authorization graph
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inherited: Vec<InheritedNamespace>,
}

impl Namespace {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            inherited: Vec::new(),
        }
    }

    pub fn inherits_from(mut self, relation: &str, parent_namespace_id: &str) -> Self {
        self.inherited.push(InheritedNamespace {
            relation: relation.to_string(),
            parent_namespace_id: parent_namespace_id.to_string(),
        });
        self
    }

    /// Markers for `permission` reached through each parent edge.
    pub fn inherited_permissions(&self, permission: &str) -> Vec<PermissionInheritance> {
        self.inherited
            .iter()
            .map(|edge| PermissionInheritance::new(&edge.relation, permission))
            .collect()
    }
}

/// Edge along which a parent namespace's permissions propagate downward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritedNamespace {
    pub relation: String,
    pub parent_namespace_id: String,
}

/// Subject shape allowed to hold a role: a plain namespace (`user`) or a
/// userset of another namespace (`team#team_member`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalType {
    pub namespace: String,
    pub relation: Option<String>,
}

impl PrincipalType {
    pub fn direct(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            relation: None,
        }
    }

    pub fn userset(namespace: &str, relation: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            relation: Some(relation.to_string()),
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || SchemaError::InvalidPrincipalType(value.to_string());
        match value.split_once('#') {
            Some((namespace, relation)) => {
                if namespace.is_empty() || relation.is_empty() || relation.contains('#') {
                    return Err(invalid());
                }
                Ok(Self::userset(namespace, relation))
            }
            None if value.is_empty() => Err(invalid()),
            None => Ok(Self::direct(value)),
        }
    }
}

impl FromStr for PrincipalType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PrincipalType {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PrincipalType> for String {
    fn from(value: PrincipalType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PrincipalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}#{}", self.namespace, relation),
            None => write!(f, "{}", self.namespace),
        }
    }
}

/// `"<via-relation>:<role-or-permission>"`: a permission a namespace
/// inherits from the object reached through `relation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionInheritance {
    pub relation: String,
    pub target: String,
}

impl PermissionInheritance {
    pub fn new(relation: &str, target: &str) -> Self {
        Self {
            relation: relation.to_string(),
            target: target.to_string(),
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once(':') {
            Some((relation, target))
                if !relation.is_empty() && !target.is_empty() && !target.contains(':') =>
            {
                Ok(Self::new(relation, target))
            }
            _ => Err(SchemaError::InvalidInheritanceMarker(value.to_string())),
        }
    }
}

impl TryFrom<String> for PermissionInheritance {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PermissionInheritance> for String {
    fn from(value: PermissionInheritance) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PermissionInheritance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.relation, self.target)
    }
}

/// A role that principals can hold. An empty `namespace_id` means the role
/// is local to whichever namespace references it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace_id: String,
    #[serde(default)]
    pub types: Vec<PrincipalType>,
}

impl Role {
    pub fn new(id: &str, types: Vec<PrincipalType>) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            namespace_id: String::new(),
            types,
        }
    }

    pub fn in_namespace(mut self, namespace_id: &str) -> Self {
        self.namespace_id = namespace_id.to_string();
        self
    }
}

/// An action that can be performed on objects of a namespace
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace_id: String,
}

impl Permission {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            namespace_id: String::new(),
        }
    }

    pub fn in_namespace(mut self, namespace_id: &str) -> Self {
        self.namespace_id = namespace_id.to_string();
        self
    }
}

/// "Role R on namespace N grants permission A"
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: String,
    pub namespace_id: String,
    pub role: Role,
    pub action: Permission,
}

impl Policy {
    pub fn new(namespace_id: &str, role: Role, action: Permission) -> Self {
        Self {
            id: String::new(),
            namespace_id: namespace_id.to_string(),
            role,
            action,
        }
    }
}

/// Operator-authored description of a pluggable service and its resources
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    #[serde(default)]
    pub roles: Vec<RoleDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<ResourcePermission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A named bundle of fully-qualified permissions, optionally limited to
/// the namespaces listed in `scopes`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl RoleDefinition {
    pub fn new(name: &str, title: &str, scopes: &[&str], permissions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            description: String::new(),
            scopes: scopes.iter().map(ToString::to_string).collect(),
            permissions: permissions.iter().map(ToString::to_string).collect(),
        }
    }
}

impl ServiceDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource: &str, permissions: &[&str]) -> Self {
        self.resources.push(ResourceDefinition {
            name: resource.to_string(),
            permissions: permissions
                .iter()
                .map(|name| ResourcePermission {
                    name: (*name).to_string(),
                    description: String::new(),
                })
                .collect(),
        });
        self
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(source)
            .map_err(|e| SchemaError::InvalidDefinition(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Service and resource names must be plain lowercase identifiers
    /// without `_`, verbs must pass [`is_valid_permission_name`].
    pub fn validate(&self) -> Result<()> {
        check_segment("service", &self.name)?;
        for resource in &self.resources {
            check_segment("resource", &resource.name)?;
            for permission in &resource.permissions {
                if !is_valid_permission_name(&permission.name)
                    || permission.name.chars().any(|c| c.is_ascii_uppercase())
                {
                    return Err(SchemaError::InvalidIdentifier {
                        kind: "permission",
                        value: permission.name.clone(),
                    });
                }
            }
        }
        for role in &self.roles {
            if !is_valid_relation_name(&role.name) {
                return Err(SchemaError::InvalidIdentifier {
                    kind: "role",
                    value: role.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Every `(namespace, permission)` pair the service declares.
    pub fn permissions(&self) -> impl Iterator<Item = (String, &ResourcePermission)> + '_ {
        self.resources.iter().flat_map(move |resource| {
            let namespace = namespace_name(&self.name, &resource.name);
            resource
                .permissions
                .iter()
                .map(move |permission| (namespace.clone(), permission))
        })
    }
}

fn check_segment(kind: &'static str, value: &str) -> Result<()> {
    if is_valid_relation_name(value) && !value.contains('_') {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_type_parse() {
        assert_eq!(PrincipalType::parse("user").unwrap(), PrincipalType::direct("user"));
        let userset = PrincipalType::parse("team#team_member").unwrap();
        assert_eq!(userset.namespace, "team");
        assert_eq!(userset.relation.as_deref(), Some("team_member"));
        assert_eq!(userset.to_string(), "team#team_member");

        for bad in ["", "#member", "team#", "a#b#c"] {
            assert!(matches!(
                PrincipalType::parse(bad),
                Err(SchemaError::InvalidPrincipalType(_))
            ));
        }
    }

    #[test]
    fn test_permission_inheritance_format() {
        let marker = PermissionInheritance::parse("org:app_organization_administer").unwrap();
        assert_eq!(marker.relation, "org");
        assert_eq!(marker.target, "app_organization_administer");
        assert_eq!(marker.to_string(), "org:app_organization_administer");
        assert!(PermissionInheritance::parse("org").is_err());
        assert!(PermissionInheritance::parse(":x").is_err());
        assert!(PermissionInheritance::parse("a:b:c").is_err());
    }

    #[test]
    fn test_namespace_inherited_permissions() {
        let namespace = Namespace::new("orders/order").inherits_from("project", "app/project");
        let markers = namespace.inherited_permissions("app_project_administer");
        assert_eq!(markers, vec![PermissionInheritance::new("project", "app_project_administer")]);
        assert_eq!(markers[0].to_string(), "project:app_project_administer");
    }

    #[test]
    fn test_principal_type_serde_as_string() {
        let role = Role::new("admin", vec![PrincipalType::userset("team", "member")]);
        let json = serde_json::to_value(&role).unwrap();
        assert_eq!(json["types"][0], "team#member");

        let back: Role = serde_json::from_value(json).unwrap();
        assert_eq!(back, role);
    }

    #[test]
    fn test_service_definition_from_yaml() {
        let yaml = r"
name: orders
resources:
  - name: order
    permissions:
      - name: create
        description: Create an order
      - name: get
roles:
  - name: order_viewer
    scopes: [app/project]
    permissions: [orders_order_get]
";
        let definition = ServiceDefinition::from_yaml(yaml).unwrap();
        assert_eq!(definition.name, "orders");
        let pairs: Vec<_> = definition
            .permissions()
            .map(|(ns, p)| format!("{ns}:{}", p.name))
            .collect();
        assert_eq!(pairs, vec!["orders/order:create", "orders/order:get"]);
        assert_eq!(definition.roles[0].permissions, vec!["orders_order_get"]);
    }

    #[test]
    fn test_service_definition_rejects_bad_names() {
        assert!(ServiceDefinition::new("my_service").validate().is_err());
        assert!(ServiceDefinition::new("Orders").validate().is_err());
        let bad_verb = ServiceDefinition::new("orders").with_resource("order", &["bulk_create"]);
        assert!(matches!(
            bad_verb.validate(),
            Err(SchemaError::InvalidIdentifier { kind: "permission", .. })
        ));
        assert!(ServiceDefinition::from_yaml("name: [").is_err());
    }
}
