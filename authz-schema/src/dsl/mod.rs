//! Text form of a schema: `definition`, `relation` and `permission` blocks
//! with `+` unions, `&` intersections, `-` exclusions and `->` arrows.

mod generator;
mod lexer;
mod parser;

pub use generator::{generate_definition, generate_relation, generate_rewrite, generate_schema};
pub use parser::parse_schema;
