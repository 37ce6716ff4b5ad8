use crate::error::{Result, SchemaError};
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Ident(String),
    Comment(String),
    Slash,
    Colon,
    Star,
    Pipe,
    Hash,
    Equals,
    Plus,
    Amp,
    Minus,
    Arrow,
    LBrace,
    RBrace,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

struct Cursor<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
}

impl Cursor<'_> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, mut keep: impl FnMut(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !keep(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }
}

/// Splits schema source into tokens. Comments are kept so the parser can
/// attach them to the definition or relation that follows.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut cursor = Cursor {
        chars: input.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();

    while let Some(c) = cursor.peek() {
        let (line, column) = (cursor.line, cursor.column);
        let token = match c {
            c if c.is_whitespace() => {
                cursor.bump();
                continue;
            }
            '/' => {
                cursor.bump();
                match cursor.peek() {
                    Some('/') => {
                        cursor.bump();
                        let text = cursor.take_while(|c| c != '\n');
                        Token::Comment(text.trim().to_string())
                    }
                    Some('*') => {
                        cursor.bump();
                        Token::Comment(block_comment(&mut cursor, line, column)?)
                    }
                    _ => Token::Slash,
                }
            }
            '-' => {
                cursor.bump();
                if cursor.peek() == Some('>') {
                    cursor.bump();
                    Token::Arrow
                } else {
                    Token::Minus
                }
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                Token::Ident(cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_'))
            }
            other => {
                cursor.bump();
                match other {
                    ':' => Token::Colon,
                    '*' => Token::Star,
                    '|' => Token::Pipe,
                    '#' => Token::Hash,
                    '=' => Token::Equals,
                    '+' => Token::Plus,
                    '&' => Token::Amp,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    unexpected => {
                        return Err(SchemaError::parse(
                            line,
                            column,
                            format!("unexpected character `{unexpected}`"),
                        ))
                    }
                }
            }
        };
        tokens.push(Spanned {
            token,
            line,
            column,
        });
    }

    Ok(tokens)
}

fn block_comment(cursor: &mut Cursor<'_>, line: usize, column: usize) -> Result<String> {
    let mut text = String::new();
    loop {
        match cursor.bump() {
            Some('*') if cursor.peek() == Some('/') => {
                cursor.bump();
                break;
            }
            Some(c) => text.push(c),
            None => return Err(SchemaError::parse(line, column, "unterminated block comment")),
        }
    }
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .collect();
    Ok(lines.join("\n"))
}
