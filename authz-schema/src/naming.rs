//! Well-known namespace, relation and permission names plus the helpers that
//! build fully-qualified names for service resources.

use crate::error::{Result, SchemaError};

/// Service name owning every built-in namespace.
pub const DEFAULT_SERVICE: &str = "app";
/// Resource name used when a namespace carries no service prefix.
pub const DEFAULT_RESOURCE: &str = "default";

pub const PLATFORM_NAMESPACE: &str = "app/platform";
pub const ORGANIZATION_NAMESPACE: &str = "app/organization";
pub const PROJECT_NAMESPACE: &str = "app/project";
pub const GROUP_NAMESPACE: &str = "app/group";
pub const ROLE_BINDING_NAMESPACE: &str = "app/rolebinding";
pub const ROLE_NAMESPACE: &str = "app/role";
pub const USER_PRINCIPAL: &str = "app/user";
pub const SERVICE_USER_PRINCIPAL: &str = "app/serviceuser";
pub const SUPER_USER_PRINCIPAL: &str = "app/superuser";

/// Object id of the single platform object.
pub const PLATFORM_ID: &str = "platform";

pub const PLATFORM_RELATION: &str = "platform";
pub const ORGANIZATION_RELATION: &str = "org";
pub const PROJECT_RELATION: &str = "project";
pub const OWNER_RELATION: &str = "owner";
pub const MEMBER_RELATION: &str = "member";
pub const ADMIN_RELATION: &str = "admin";
pub const GRANTED_RELATION: &str = "granted";
pub const BEARER_RELATION: &str = "bearer";
pub const ROLE_RELATION: &str = "role";

pub const SUPERUSER_PERMISSION: &str = "superuser";
pub const ORGANIZATION_ADMINISTER_PERMISSION: &str = "app_organization_administer";
pub const PROJECT_ADMINISTER_PERMISSION: &str = "app_project_administer";

/// Namespaces that ship with the base schema.
pub const SYSTEM_NAMESPACES: [&str; 9] = [
    PLATFORM_NAMESPACE,
    ORGANIZATION_NAMESPACE,
    PROJECT_NAMESPACE,
    GROUP_NAMESPACE,
    ROLE_BINDING_NAMESPACE,
    ROLE_NAMESPACE,
    USER_PRINCIPAL,
    SERVICE_USER_PRINCIPAL,
    SUPER_USER_PRINCIPAL,
];

/// `"<service>/<resource>"`
pub fn namespace_name(service: &str, resource: &str) -> String {
    format!("{service}/{resource}")
}

/// Splits a namespace into `(service, resource)`. A name without a service
/// prefix is treated as the service itself with the default resource.
pub fn split_namespace(namespace: &str) -> (&str, &str) {
    match namespace.split_once('/') {
        Some((service, resource)) => (service, resource),
        None => (namespace, DEFAULT_RESOURCE),
    }
}

/// `"<service>_<resource>_<verb>"`, the name a resource permission takes
/// outside its own namespace.
pub fn fq_permission_name(namespace: &str, verb: &str) -> String {
    let (service, resource) = split_namespace(namespace);
    format!("{service}_{resource}_{verb}")
}

/// `"<service>.<resource>.<verb>"`, the catalog key of a permission.
pub fn permission_key(namespace: &str, verb: &str) -> String {
    let (service, resource) = split_namespace(namespace);
    format!("{service}.{resource}.{verb}")
}

/// Inverse of [`permission_key`]: returns `(namespace, verb)`.
pub fn parse_permission_key(key: &str) -> Result<(String, String)> {
    let mut parts = key.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(resource), Some(verb), None)
            if !service.is_empty() && !resource.is_empty() && !verb.is_empty() =>
        {
            Ok((namespace_name(service, resource), verb.to_string()))
        }
        _ => Err(SchemaError::InvalidIdentifier {
            kind: "permission key",
            value: key.to_string(),
        }),
    }
}

/// Maps shorthand namespace names to the built-in namespace they stand for.
/// Unknown names are returned unchanged.
pub fn resolve_namespace_alias(name: &str) -> &str {
    match name {
        "user" => USER_PRINCIPAL,
        "serviceuser" => SERVICE_USER_PRINCIPAL,
        "superuser" => SUPER_USER_PRINCIPAL,
        "org" | "organization" => ORGANIZATION_NAMESPACE,
        "project" => PROJECT_NAMESPACE,
        "group" => GROUP_NAMESPACE,
        "platform" => PLATFORM_NAMESPACE,
        "role" => ROLE_NAMESPACE,
        "rolebinding" => ROLE_BINDING_NAMESPACE,
        other => other,
    }
}

pub fn is_system_namespace(namespace: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&namespace)
}

/// Permission verbs may only contain ASCII alphanumerics so that the
/// fully-qualified name splits back unambiguously on `_`.
pub fn is_valid_permission_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Engine identifiers are restricted to lowercase ASCII, digits and `_`.
pub fn normalize_identifier(value: &str) -> String {
    value.replace('-', "_")
}

pub(crate) fn is_valid_relation_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub(crate) fn is_valid_namespace_name(name: &str) -> bool {
    match name.split_once('/') {
        Some((prefix, rest)) => is_valid_relation_name(prefix) && is_valid_relation_name(rest),
        None => is_valid_relation_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fq_permission_name() {
        assert_eq!(fq_permission_name("orders/order", "create"), "orders_order_create");
        assert_eq!(fq_permission_name("app/project", "administer"), "app_project_administer");
        assert_eq!(fq_permission_name("billing", "read"), "billing_default_read");
    }

    #[test]
    fn test_permission_key_roundtrip() {
        let key = permission_key("orders/order", "get");
        assert_eq!(key, "orders.order.get");
        assert_eq!(
            parse_permission_key(&key).unwrap(),
            ("orders/order".to_string(), "get".to_string())
        );
        assert!(parse_permission_key("orders.get").is_err());
        assert!(parse_permission_key("a..b").is_err());
    }

    #[test]
    fn test_aliases() {
        assert_eq!(resolve_namespace_alias("org"), ORGANIZATION_NAMESPACE);
        assert_eq!(resolve_namespace_alias("user"), USER_PRINCIPAL);
        assert_eq!(resolve_namespace_alias("orders/order"), "orders/order");
        assert!(is_system_namespace(resolve_namespace_alias("project")));
        assert!(!is_system_namespace("orders/order"));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_permission_name("projectcreate"));
        assert!(!is_valid_permission_name("project_create"));
        assert!(!is_valid_permission_name(""));
        assert!(is_valid_namespace_name("app/user"));
        assert!(is_valid_namespace_name("team"));
        assert!(!is_valid_namespace_name("App/user"));
        assert!(!is_valid_namespace_name("a/b/c"));
        assert_eq!(normalize_identifier("team-member"), "team_member");
    }
}
