//! Maps stored relations onto engine tuples and check requests.

use crate::error::{AuthzError, Result};
use crate::models::{Relation, RelationType};
use crate::tuple::{CheckRequest, EngineTuple, ObjectRef, SubjectRef};
use authz_schema::naming::normalize_identifier;

/// Converts `relation` into the tuple the engine stores.
///
/// A role whose declared namespace differs from the object namespace can
/// never be reached from that object and is rejected.
pub fn to_engine_tuple(relation: &Relation) -> Result<EngineTuple> {
    relation.validate()?;

    let relation_name = match relation.relation_type() {
        RelationType::Namespace => relation.namespace_edge_id.as_str(),
        RelationType::Role => {
            check_role_namespace(relation)?;
            relation.role_name()
        }
    };

    Ok(EngineTuple::new(
        object(relation),
        &normalize_identifier(relation_name),
        subject(relation),
    ))
}

/// Builds the check for `permission` between the relation's subject and
/// object. Role and edge fields are ignored.
pub fn to_check_request(relation: &Relation, permission: &str) -> Result<CheckRequest> {
    if permission.is_empty() {
        return Err(AuthzError::InvalidRelation(
            "permission is required".to_string(),
        ));
    }
    for (field, value) in [
        ("subject namespace", &relation.subject_namespace_id),
        ("subject id", &relation.subject_id),
        ("object namespace", &relation.object_namespace_id),
        ("object id", &relation.object_id),
    ] {
        if value.is_empty() {
            return Err(AuthzError::InvalidRelation(format!("{field} is required")));
        }
    }

    Ok(CheckRequest::new(
        object(relation),
        &normalize_identifier(permission),
        subject(relation),
    ))
}

/// Rebuilds a relation from an engine tuple. The tuple's relation name
/// becomes the role unless `edges` lists it as a structural edge.
pub fn from_engine_tuple(tuple: &EngineTuple, edges: &[&str]) -> Relation {
    let subject = &tuple.subject;
    let mut relation = if edges.contains(&tuple.relation.as_str()) {
        Relation::for_edge(
            &subject.object.object_type,
            &subject.object.object_id,
            &tuple.resource.object_type,
            &tuple.resource.object_id,
            &tuple.relation,
        )
    } else {
        Relation::for_role(
            &subject.object.object_type,
            &subject.object.object_id,
            &tuple.resource.object_type,
            &tuple.resource.object_id,
            &tuple.relation,
        )
    };
    relation.subject_relation.clone_from(&subject.optional_relation);
    relation
}

fn check_role_namespace(relation: &Relation) -> Result<()> {
    match relation.role_namespace() {
        Some(namespace)
            if normalize_identifier(namespace)
                != normalize_identifier(&relation.object_namespace_id) =>
        {
            Err(AuthzError::RoleNamespaceMismatch {
                role: relation.role_name().to_string(),
                namespace: relation.object_namespace_id.clone(),
            })
        }
        _ => Ok(()),
    }
}

fn object(relation: &Relation) -> ObjectRef {
    ObjectRef::new(
        &normalize_identifier(&relation.object_namespace_id),
        &relation.object_id,
    )
}

fn subject(relation: &Relation) -> SubjectRef {
    let subject = SubjectRef::new(
        &normalize_identifier(&relation.subject_namespace_id),
        &relation.subject_id,
    );
    match relation.subject_relation.as_deref() {
        Some(name) if !name.is_empty() => subject.with_relation(&normalize_identifier(name)),
        _ => subject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz_schema::Role;

    #[test]
    fn test_role_relation() {
        let relation = Relation::for_role("app/user", "u1", "app/organization", "o1", "owner");
        let tuple = to_engine_tuple(&relation).unwrap();
        assert_eq!(tuple.to_string(), "app/organization:o1#owner@app/user:u1");
    }

    #[test]
    fn test_edge_relation_uses_edge_name() {
        let relation = Relation::for_edge("app/organization", "o1", "app/project", "p1", "org");
        let tuple = to_engine_tuple(&relation).unwrap();
        assert_eq!(tuple.relation, "org");
        assert_eq!(tuple.subject.object.object_type, "app/organization");
    }

    #[test]
    fn test_identifiers_are_normalized() {
        let relation = Relation::for_role("service-user", "s1", "billing/credit-note", "c1", "can-view")
            .with_subject_relation("team-member");
        let tuple = to_engine_tuple(&relation).unwrap();
        assert_eq!(
            tuple.to_string(),
            "billing/credit_note:c1#can_view@service_user:s1#team_member"
        );
    }

    #[test]
    fn test_role_namespace_mismatch() {
        let relation = Relation::for_role("user", "u1", "project", "p1", "editor")
            .with_role(Role::new("editor", Vec::new()).in_namespace("org"));
        let err = to_engine_tuple(&relation).unwrap_err();
        assert_eq!(err.to_string(), "Role editor doesn't exist in project");
    }

    #[test]
    fn test_check_request_ignores_role() {
        let relation = Relation::for_role("app/user", "u1", "app/project", "p1", "whatever");
        let check = to_check_request(&relation, "app_project_get").unwrap();
        assert_eq!(check.to_string(), "app/project:p1#app_project_get@app/user:u1");
        assert!(to_check_request(&relation, "").is_err());
    }

    #[test]
    fn test_from_engine_tuple() {
        let tuple = EngineTuple::new(
            ObjectRef::new("app/project", "p1"),
            "org",
            SubjectRef::new("app/organization", "o1"),
        );
        let relation = from_engine_tuple(&tuple, &["org", "project"]);
        assert_eq!(relation.namespace_edge_id, "org");
        assert_eq!(to_engine_tuple(&relation).unwrap(), tuple);

        let relation = from_engine_tuple(&tuple, &[]);
        assert_eq!(relation.role_id, "org");
    }
}
