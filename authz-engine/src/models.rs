use crate::error::{AuthzError, Result};
use authz_schema::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of fact a relation records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    /// A subject holds a role on an object
    Role,
    /// A structural edge such as "this project belongs to that org"
    Namespace,
}

/// A relation tuple as kept in the system of record.
///
/// Exactly one of `role_id` / `namespace_edge_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Relation {
    #[serde(default)]
    pub id: String,
    pub subject_namespace_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub subject_relation: Option<String>,
    pub object_namespace_id: String,
    pub object_id: String,
    #[serde(default)]
    pub role_id: String,
    /// Richer role record, preferred over `role_id` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub namespace_edge_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    /// `subject` holds `role_id` on `object`.
    pub fn for_role(
        subject_namespace_id: &str,
        subject_id: &str,
        object_namespace_id: &str,
        object_id: &str,
        role_id: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            subject_namespace_id: subject_namespace_id.to_string(),
            subject_id: subject_id.to_string(),
            object_namespace_id: object_namespace_id.to_string(),
            object_id: object_id.to_string(),
            role_id: role_id.to_string(),
            created_at: now,
            updated_at: now,
            ..Self::default()
        }
    }

    /// `object` is linked to `subject` through the structural edge `edge`.
    pub fn for_edge(
        subject_namespace_id: &str,
        subject_id: &str,
        object_namespace_id: &str,
        object_id: &str,
        edge: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            subject_namespace_id: subject_namespace_id.to_string(),
            subject_id: subject_id.to_string(),
            object_namespace_id: object_namespace_id.to_string(),
            object_id: object_id.to_string(),
            namespace_edge_id: edge.to_string(),
            created_at: now,
            updated_at: now,
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        if self.role_id.is_empty() {
            self.role_id = role.id.clone();
        }
        self.role = Some(role);
        self
    }

    pub fn with_subject_relation(mut self, relation: &str) -> Self {
        self.subject_relation = Some(relation.to_string());
        self
    }

    pub fn relation_type(&self) -> RelationType {
        if self.namespace_edge_id.is_empty() {
            RelationType::Role
        } else {
            RelationType::Namespace
        }
    }

    /// Role name with the role record taking precedence over the bare id.
    pub fn role_name(&self) -> &str {
        match &self.role {
            Some(role) if !role.id.is_empty() => &role.id,
            _ => &self.role_id,
        }
    }

    /// Namespace the role was declared in, if known.
    pub fn role_namespace(&self) -> Option<&str> {
        self.role
            .as_ref()
            .map(|role| role.namespace_id.as_str())
            .filter(|namespace| !namespace.is_empty())
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            subject_namespace_id: self.subject_namespace_id.clone(),
            subject_id: self.subject_id.clone(),
            object_namespace_id: self.object_namespace_id.clone(),
            object_id: self.object_id.clone(),
            role_id: self.role_name().to_string(),
            namespace_edge_id: self.namespace_edge_id.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("subject namespace", &self.subject_namespace_id),
            ("subject id", &self.subject_id),
            ("object namespace", &self.object_namespace_id),
            ("object id", &self.object_id),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(AuthzError::InvalidRelation(format!("{field} is required")));
        }

        match (self.role_name().is_empty(), self.namespace_edge_id.is_empty()) {
            (false, true) | (true, false) => Ok(()),
            (true, true) => Err(AuthzError::InvalidRelation(
                "either a role or a namespace edge is required".to_string(),
            )),
            (false, false) => Err(AuthzError::InvalidRelation(
                "a relation cannot carry both a role and a namespace edge".to_string(),
            )),
        }
    }
}

/// Identity of a relation independent of its row id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub subject_namespace_id: String,
    pub subject_id: String,
    pub object_namespace_id: String,
    pub object_id: String,
    pub role_id: String,
    pub namespace_edge_id: String,
}

/// String-only metadata attached to catalog records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl TryFrom<serde_json::Value> for Metadata {
    type Error = AuthzError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(AuthzError::InvalidMetadata {
                key: String::new(),
            });
        };
        map.into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(value) => Ok((key, value)),
                _ => Err(AuthzError::InvalidMetadata { key }),
            })
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Self)
    }
}

impl From<Metadata> for serde_json::Value {
    fn from(metadata: Metadata) -> Self {
        metadata
            .0
            .into_iter()
            .map(|(key, value)| (key, serde_json::Value::String(value)))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }
}

/// One entry of a batch permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub relation: Relation,
    pub permission: String,
}

impl PermissionCheck {
    pub fn new(relation: Relation, permission: &str) -> Self {
        Self {
            relation,
            permission: permission.to_string(),
        }
    }
}

/// A check paired with its decision, positionally matching the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckPair {
    pub check: PermissionCheck,
    pub granted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relation_type_follows_edge() {
        let membership = Relation::for_role("app/user", "u1", "app/organization", "o1", "owner");
        assert_eq!(membership.relation_type(), RelationType::Role);

        let edge = Relation::for_edge("app/organization", "o1", "app/project", "p1", "org");
        assert_eq!(edge.relation_type(), RelationType::Namespace);
        assert_eq!(edge.role_name(), "");
    }

    #[test]
    fn test_role_record_takes_precedence() {
        let relation = Relation::for_role("user", "u1", "team", "t1", "viewer")
            .with_role(Role::new("organization", Vec::new()).in_namespace("team"));
        assert_eq!(relation.role_name(), "organization");
        assert_eq!(relation.role_namespace(), Some("team"));
        assert_eq!(relation.natural_key().role_id, "organization");
    }

    #[test]
    fn test_validate() {
        assert!(Relation::for_role("user", "u1", "doc", "d1", "owner").validate().is_ok());
        assert!(Relation::for_role("user", "", "doc", "d1", "owner").validate().is_err());
        assert!(Relation::for_role("user", "u1", "doc", "d1", "").validate().is_err());

        let mut both = Relation::for_role("user", "u1", "doc", "d1", "owner");
        both.namespace_edge_id = "parent".to_string();
        assert!(matches!(both.validate(), Err(AuthzError::InvalidRelation(_))));
    }

    #[test]
    fn test_metadata_rejects_non_string_values() {
        let metadata = Metadata::try_from(json!({"description": "Create orders"})).unwrap();
        assert_eq!(metadata.get("description"), Some("Create orders"));

        let err = Metadata::try_from(json!({"description": "ok", "weight": 3})).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidMetadata { key } if key == "weight"));
        assert!(Metadata::try_from(json!(["not", "a", "map"])).is_err());
    }

    #[test]
    fn test_metadata_to_json() {
        let value: serde_json::Value = Metadata::new().with("title", "Owner").into();
        assert_eq!(value, json!({"title": "Owner"}));
    }
}
