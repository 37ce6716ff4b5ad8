use super::lexer::{tokenize, Spanned, Token};
use crate::error::{Result, SchemaError};
use crate::graph::{
    AllowedReference, NamespaceDefinition, RelationDefinition, Rewrite, SchemaGraph,
};

/// Parses schema source into a graph. Definitions and relations keep their
/// source order; `//` and `/* */` comments are attached to the item that
/// follows them.
pub fn parse_schema(source: &str) -> Result<SchemaGraph> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let mut definitions = Vec::new();

    loop {
        let comment = parser.take_comments();
        if parser.peek().is_none() {
            break;
        }
        let mut definition = parser.parse_definition()?;
        definition.comment = comment;
        definitions.push(definition);
    }

    Ok(SchemaGraph::new(definitions))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Union,
    Intersection,
    Exclusion,
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> SchemaError {
        let (line, column) = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or((1, 1), |s| (s.line, s.column));
        SchemaError::parse(line, column, message)
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        if self.peek() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn take_comments(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        while let Some(Token::Comment(text)) = self.peek() {
            lines.push(text.clone());
            self.advance();
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// definition = "definition" namespace "{" item* "}"
    fn parse_definition(&mut self) -> Result<NamespaceDefinition> {
        match self.peek() {
            Some(Token::Ident(keyword)) if keyword == "definition" => {
                self.advance();
            }
            _ => return Err(self.error("expected `definition`")),
        }
        let name = self.parse_namespace()?;
        self.expect(&Token::LBrace, "`{`")?;

        let mut definition = NamespaceDefinition::new(&name);
        loop {
            let comment = self.take_comments();
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    break;
                }
                Some(Token::Ident(keyword)) if keyword == "relation" => {
                    self.advance();
                    let mut relation = self.parse_relation()?;
                    relation.comment = comment;
                    definition.relations.push(relation);
                }
                Some(Token::Ident(keyword)) if keyword == "permission" => {
                    self.advance();
                    let mut permission = self.parse_permission()?;
                    permission.comment = comment;
                    definition.relations.push(permission);
                }
                None => return Err(self.error(format!("unterminated definition `{name}`"))),
                _ => return Err(self.error("expected `relation`, `permission` or `}`")),
            }
        }
        Ok(definition)
    }

    /// namespace = ident ("/" ident)?
    fn parse_namespace(&mut self) -> Result<String> {
        let first = self.expect_ident("namespace name")?;
        if self.peek() == Some(&Token::Slash) {
            self.advance();
            let second = self.expect_ident("namespace name after `/`")?;
            Ok(format!("{first}/{second}"))
        } else {
            Ok(first)
        }
    }

    /// relation = name ":" reference ("|" reference)*
    fn parse_relation(&mut self) -> Result<RelationDefinition> {
        let name = self.expect_ident("relation name")?;
        self.expect(&Token::Colon, "`:` after relation name")?;

        let mut allowed = vec![self.parse_reference()?];
        while self.peek() == Some(&Token::Pipe) {
            self.advance();
            allowed.push(self.parse_reference()?);
        }
        Ok(RelationDefinition::relation(&name, allowed))
    }

    /// reference = namespace ("#" relation | ":" "*")?
    fn parse_reference(&mut self) -> Result<AllowedReference> {
        let namespace = self.parse_namespace()?;
        match self.peek() {
            Some(Token::Hash) => {
                self.advance();
                let relation = self.expect_ident("relation after `#`")?;
                Ok(AllowedReference::relation(&namespace, &relation))
            }
            Some(Token::Colon) => {
                self.advance();
                self.expect(&Token::Star, "`*` after `:`")?;
                Ok(AllowedReference::wildcard(&namespace))
            }
            _ => Ok(AllowedReference::direct(&namespace)),
        }
    }

    /// permission = name "=" expression
    fn parse_permission(&mut self) -> Result<RelationDefinition> {
        let name = self.expect_ident("permission name")?;
        self.expect(&Token::Equals, "`=` after permission name")?;
        let rewrite = self.parse_expression()?;
        Ok(RelationDefinition::permission(&name, rewrite))
    }

    fn peek_operator(&self) -> Option<Operator> {
        match self.peek() {
            Some(Token::Plus) => Some(Operator::Union),
            Some(Token::Amp) => Some(Operator::Intersection),
            Some(Token::Minus) => Some(Operator::Exclusion),
            _ => None,
        }
    }

    /// expression = primary (("+" | "&" | "-") primary)*
    ///
    /// Operators share one precedence level and associate to the left.
    /// A run of the same operator builds a single n-ary node.
    fn parse_expression(&mut self) -> Result<Rewrite> {
        let mut left = self.parse_primary()?;
        let mut open: Option<Operator> = None;

        while let Some(operator) = self.peek_operator() {
            self.advance();
            let right = self.parse_primary()?;
            left = match (operator, left) {
                (Operator::Union, Rewrite::Union(mut children))
                    if open == Some(Operator::Union) =>
                {
                    children.push(right);
                    Rewrite::Union(children)
                }
                (Operator::Intersection, Rewrite::Intersection(mut children))
                    if open == Some(Operator::Intersection) =>
                {
                    children.push(right);
                    Rewrite::Intersection(children)
                }
                (Operator::Union, left) => Rewrite::Union(vec![left, right]),
                (Operator::Intersection, left) => Rewrite::Intersection(vec![left, right]),
                (Operator::Exclusion, left) => Rewrite::exclusion(left, right),
            };
            open = Some(operator);
        }
        Ok(left)
    }

    /// primary = "(" expression ")" | "nil" | ident ("->" ident)?
    fn parse_primary(&mut self) -> Result<Rewrite> {
        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "nil" => {
                self.advance();
                Ok(Rewrite::Nil)
            }
            Some(Token::Ident(_)) => {
                let name = self.expect_ident("relation name")?;
                if self.peek() == Some(&Token::Arrow) {
                    self.advance();
                    let computed = self.expect_ident("permission after `->`")?;
                    Ok(Rewrite::arrow(&name, &computed))
                } else {
                    Ok(Rewrite::computed(&name))
                }
            }
            _ => Err(self.error("expected expression")),
        }
    }
}
