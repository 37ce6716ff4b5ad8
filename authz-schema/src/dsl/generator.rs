use crate::graph::{NamespaceDefinition, RelationDefinition, RelationKind, Rewrite, SchemaGraph};
use itertools::Itertools;
use std::fmt::Write;

/// Renders every definition of the graph, separated by blank lines.
pub fn generate_schema(graph: &SchemaGraph) -> String {
    graph
        .definitions()
        .iter()
        .map(generate_definition)
        .join("\n\n")
}

pub fn generate_definition(definition: &NamespaceDefinition) -> String {
    let mut out = String::new();
    write_comment(&mut out, definition.comment.as_deref(), "");

    if definition.relations.is_empty() {
        let _ = write!(out, "definition {} {{}}", definition.name);
        return out;
    }

    let _ = writeln!(out, "definition {} {{", definition.name);
    for relation in &definition.relations {
        write_comment(&mut out, relation.comment.as_deref(), "\t");
        let _ = writeln!(out, "\t{}", generate_relation(relation));
    }
    out.push('}');
    out
}

pub fn generate_relation(relation: &RelationDefinition) -> String {
    match &relation.kind {
        RelationKind::Relation(allowed) => {
            format!("relation {}: {}", relation.name, allowed.iter().join(" | "))
        }
        RelationKind::Permission(rewrite) => {
            format!("permission {} = {}", relation.name, generate_rewrite(rewrite))
        }
    }
}

pub fn generate_rewrite(rewrite: &Rewrite) -> String {
    match rewrite {
        Rewrite::Computed(name) => name.clone(),
        Rewrite::TupleToUserset { tupleset, computed } => format!("{tupleset}->{computed}"),
        Rewrite::Union(children) => children.iter().map(operand).join(" + "),
        Rewrite::Intersection(children) => children.iter().map(operand).join(" & "),
        Rewrite::Exclusion(base, excluded) => {
            format!("{} - {}", operand(base), operand(excluded))
        }
        Rewrite::Nil => "nil".to_string(),
    }
}

fn operand(rewrite: &Rewrite) -> String {
    if rewrite.is_compound() {
        format!("({})", generate_rewrite(rewrite))
    } else {
        generate_rewrite(rewrite)
    }
}

fn write_comment(out: &mut String, comment: Option<&str>, indent: &str) {
    if let Some(comment) = comment {
        for line in comment.lines() {
            let _ = writeln!(out, "{indent}// {line}");
        }
    }
}
