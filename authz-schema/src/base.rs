use crate::dsl::parse_schema;
use crate::error::Result;
use crate::graph::SchemaGraph;
use crate::model::RoleDefinition;
use crate::naming::{GROUP_NAMESPACE, ORGANIZATION_NAMESPACE, PROJECT_NAMESPACE};

/// Built-in schema every service definition is merged onto.
pub const BASE_SCHEMA_SOURCE: &str = include_str!("base_schema.zed");

/// The parsed built-in schema. Held by value and never mutated; merging
/// produces a new graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseSchema {
    graph: SchemaGraph,
}

impl BaseSchema {
    pub fn load() -> Result<Self> {
        Self::from_source(BASE_SCHEMA_SOURCE)
    }

    pub fn from_source(source: &str) -> Result<Self> {
        let graph = parse_schema(source)?;
        tracing::debug!(definitions = graph.len(), "Parsed base schema");
        Ok(Self { graph })
    }

    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    pub fn into_graph(self) -> SchemaGraph {
        self.graph
    }
}

/// Platform roles installed by every migration.
pub fn predefined_roles() -> Vec<RoleDefinition> {
    vec![
        RoleDefinition::new(
            "app_organization_owner",
            "Organization Owner",
            &[ORGANIZATION_NAMESPACE],
            &["app_organization_administer"],
        ),
        RoleDefinition::new(
            "app_organization_manager",
            "Organization Manager",
            &[ORGANIZATION_NAMESPACE],
            &[
                "app_organization_update",
                "app_organization_get",
                "app_organization_projectcreate",
                "app_organization_projectlist",
                "app_organization_groupcreate",
                "app_organization_grouplist",
                "app_organization_serviceusermanage",
            ],
        ),
        RoleDefinition::new(
            "app_organization_accessmanager",
            "Organization Access Manager",
            &[ORGANIZATION_NAMESPACE],
            &[
                "app_organization_invitationcreate",
                "app_organization_invitationlist",
                "app_organization_rolemanage",
                "app_organization_policymanage",
            ],
        ),
        RoleDefinition::new(
            "app_organization_viewer",
            "Organization Viewer",
            &[ORGANIZATION_NAMESPACE],
            &["app_organization_get"],
        ),
        RoleDefinition::new(
            "app_project_owner",
            "Project Owner",
            &[PROJECT_NAMESPACE],
            &["app_project_administer"],
        ),
        RoleDefinition::new(
            "app_project_manager",
            "Project Manager",
            &[PROJECT_NAMESPACE],
            &[
                "app_project_update",
                "app_project_get",
                "app_project_resourcelist",
                "app_organization_projectcreate",
                "app_organization_projectlist",
                "app_organization_grouplist",
            ],
        ),
        RoleDefinition::new(
            "app_project_viewer",
            "Project Viewer",
            &[PROJECT_NAMESPACE],
            &["app_project_get"],
        ),
        RoleDefinition::new(
            "app_group_owner",
            "Group Owner",
            &[GROUP_NAMESPACE],
            &["app_group_administer"],
        ),
        RoleDefinition::new(
            "app_group_member",
            "Group Member",
            &[GROUP_NAMESPACE],
            &["app_group_get"],
        ),
    ]
}
