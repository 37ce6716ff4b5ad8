//! Turns a candidate graph into an authoritative schema: regenerate the
//! source, parse it back, then check references, arrows and cycles. The
//! result is all-or-nothing.

use crate::dsl::{generate_schema, parse_schema};
use crate::error::{Result, SchemaError};
use crate::graph::{NamespaceDefinition, ReferenceTarget, RelationKind, SchemaGraph};
use crate::naming::{is_valid_namespace_name, is_valid_relation_name};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Validated schema source together with the graph parsed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSchema {
    source: String,
    graph: SchemaGraph,
}

impl CompiledSchema {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    pub fn into_source(self) -> String {
        self.source
    }
}

/// Generates source for `graph` and validates it.
pub fn compile_schema(graph: &SchemaGraph) -> Result<CompiledSchema> {
    compile_source(&generate_schema(graph))
}

/// Parses and validates schema source.
pub fn compile_source(source: &str) -> Result<CompiledSchema> {
    let graph = parse_schema(source)?;
    validate_graph(&graph)?;
    debug!(definitions = graph.len(), bytes = source.len(), "Schema validated");
    Ok(CompiledSchema {
        source: source.to_string(),
        graph,
    })
}

pub fn validate_graph(graph: &SchemaGraph) -> Result<()> {
    let mut seen = HashSet::new();
    for definition in graph.definitions() {
        if !is_valid_namespace_name(&definition.name) {
            return Err(SchemaError::InvalidIdentifier {
                kind: "namespace",
                value: definition.name.clone(),
            });
        }
        if !seen.insert(definition.name.as_str()) {
            return Err(SchemaError::DuplicateDefinition(definition.name.clone()));
        }
        check_relation_names(definition)?;
    }

    for definition in graph.definitions() {
        check_references(graph, definition)?;
    }

    check_cycles(graph)
}

fn check_relation_names(definition: &NamespaceDefinition) -> Result<()> {
    let mut seen = HashSet::new();
    for relation in &definition.relations {
        if !is_valid_relation_name(&relation.name) {
            return Err(SchemaError::InvalidIdentifier {
                kind: "relation",
                value: relation.name.clone(),
            });
        }
        if !seen.insert(relation.name.as_str()) {
            return Err(SchemaError::DuplicateRelation {
                namespace: definition.name.clone(),
                relation: relation.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_references(graph: &SchemaGraph, definition: &NamespaceDefinition) -> Result<()> {
    for relation in &definition.relations {
        let origin = format!("{}#{}", definition.name, relation.name);
        match &relation.kind {
            RelationKind::Relation(allowed) => {
                for reference in allowed {
                    let Some(target) = graph.definition(&reference.namespace) else {
                        return Err(SchemaError::UnknownNamespace {
                            namespace: reference.namespace.clone(),
                            referenced_from: origin,
                        });
                    };
                    if let ReferenceTarget::Relation(name) = &reference.target {
                        if !target.has_relation(name) {
                            return Err(SchemaError::UnknownRelation {
                                namespace: reference.namespace.clone(),
                                relation: name.clone(),
                                referenced_from: origin,
                            });
                        }
                    }
                }
            }
            RelationKind::Permission(rewrite) => {
                for name in rewrite.computed_references() {
                    if !definition.has_relation(name) {
                        return Err(SchemaError::UnknownRelation {
                            namespace: definition.name.clone(),
                            relation: name.to_string(),
                            referenced_from: origin,
                        });
                    }
                }
                for (tupleset, computed) in rewrite.arrows() {
                    check_arrow(graph, definition, &relation.name, tupleset, computed)?;
                }
            }
        }
    }
    Ok(())
}

/// The tupleset must be a plain relation of this namespace and the computed
/// relation must exist on at least one of its subject types.
fn check_arrow(
    graph: &SchemaGraph,
    definition: &NamespaceDefinition,
    relation: &str,
    tupleset: &str,
    computed: &str,
) -> Result<()> {
    let invalid = || SchemaError::InvalidArrow {
        namespace: definition.name.clone(),
        relation: relation.to_string(),
        tupleset: tupleset.to_string(),
    };
    let Some(tupleset_relation) = definition.relation(tupleset) else {
        return Err(invalid());
    };
    if tupleset_relation.is_permission() {
        return Err(invalid());
    }

    let resolves = tupleset_relation.allowed().iter().any(|reference| {
        graph
            .definition(&reference.namespace)
            .is_some_and(|target| target.has_relation(computed))
    });
    if resolves {
        Ok(())
    } else {
        Err(SchemaError::UnknownRelation {
            namespace: tupleset_relation
                .allowed()
                .first()
                .map(|r| r.namespace.clone())
                .unwrap_or_default(),
            relation: computed.to_string(),
            referenced_from: format!("{}#{}", definition.name, relation),
        })
    }
}

/// Computed usersets on the same object must not form a loop. Arrows are
/// left out since they recurse through stored data.
fn check_cycles(graph: &SchemaGraph) -> Result<()> {
    let mut edges: DiGraph<String, ()> = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
    let mut node = |edges: &mut DiGraph<String, ()>, key: String| {
        *nodes
            .entry(key.clone())
            .or_insert_with(|| edges.add_node(key))
    };

    for definition in graph.definitions() {
        for relation in &definition.relations {
            let Some(rewrite) = relation.rewrite() else {
                continue;
            };
            let from = node(&mut edges, format!("{}#{}", definition.name, relation.name));
            for name in rewrite.computed_references() {
                let to = node(&mut edges, format!("{}#{}", definition.name, name));
                edges.add_edge(from, to, ());
            }
        }
    }

    for component in tarjan_scc(&edges) {
        let looping = match component.as_slice() {
            [single] => edges.contains_edge(*single, *single),
            members => members.len() > 1,
        };
        if looping {
            let mut names: Vec<String> = component
                .iter()
                .filter_map(|index| edges.node_weight(*index).cloned())
                .collect();
            names.sort();
            return Err(SchemaError::Cycle(names));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Result<CompiledSchema> {
        compile_source(source)
    }

    const USERS: &str = "definition user {}\n";

    #[test]
    fn test_valid_schema() {
        let source = format!(
            "{USERS}definition doc {{\n\trelation owner: user\n\trelation parent: doc\n\tpermission view = owner + parent->view\n}}"
        );
        let compiled = compile(&source).unwrap();
        assert_eq!(compiled.source(), source);
        assert!(compiled.graph().relation("doc", "view").is_some());
    }

    #[test]
    fn test_unknown_namespace() {
        assert!(matches!(
            compile("definition doc { relation owner: user }"),
            Err(SchemaError::UnknownNamespace { namespace, .. }) if namespace == "user"
        ));
    }

    #[test]
    fn test_unknown_computed_relation() {
        let source = format!("{USERS}definition doc {{ relation owner: user\n permission view = owner + editor }}");
        assert!(matches!(
            compile(&source),
            Err(SchemaError::UnknownRelation { relation, .. }) if relation == "editor"
        ));
    }

    #[test]
    fn test_unknown_subject_relation() {
        let source = format!("{USERS}definition group {{ relation member: user }}\ndefinition doc {{ relation viewer: group#admin }}");
        assert!(matches!(
            compile(&source),
            Err(SchemaError::UnknownRelation { relation, .. }) if relation == "admin"
        ));
    }

    #[test]
    fn test_arrow_rules() {
        let over_permission = format!(
            "{USERS}definition doc {{ relation owner: user\n permission p = owner\n permission q = p->owner }}"
        );
        assert!(matches!(compile(&over_permission), Err(SchemaError::InvalidArrow { .. })));

        let missing_target = format!(
            "{USERS}definition doc {{ relation parent: user\n permission view = parent->view }}"
        );
        assert!(matches!(
            compile(&missing_target),
            Err(SchemaError::UnknownRelation { relation, .. }) if relation == "view"
        ));
    }

    #[test]
    fn test_duplicates() {
        let duplicate_relation =
            format!("{USERS}definition doc {{ relation owner: user\n relation owner: user }}");
        assert!(matches!(
            compile(&duplicate_relation),
            Err(SchemaError::DuplicateRelation { .. })
        ));
        assert!(matches!(
            compile("definition user {}\ndefinition user {}"),
            Err(SchemaError::DuplicateDefinition(name)) if name == "user"
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let source = format!(
            "{USERS}definition doc {{ relation owner: user\n permission a = b + owner\n permission b = a }}"
        );
        assert_eq!(
            compile(&source),
            Err(SchemaError::Cycle(vec!["doc#a".to_string(), "doc#b".to_string()]))
        );
        let self_loop = format!("{USERS}definition doc {{ permission a = a }}");
        assert!(matches!(compile(&self_loop), Err(SchemaError::Cycle(_))));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(matches!(
            compile("definition Doc {}"),
            Err(SchemaError::InvalidIdentifier { kind: "namespace", .. })
        ));
        assert!(compile("definition doc {\n\tpermission view = \n}").is_err());
    }

    #[test]
    fn test_compile_schema_regenerates_source() {
        let graph = parse_schema("definition user {}  definition doc { relation owner: user }").unwrap();
        let compiled = compile_schema(&graph).unwrap();
        assert_eq!(
            compiled.source(),
            "definition user {}\n\ndefinition doc {\n\trelation owner: user\n}"
        );
        assert_eq!(compiled.graph(), &graph);
    }
}
