//! Job condition parsing and evaluation.
//!
//! A condition is a boolean expression over the triggering event:
//!
//! ```text
//! event.kind == 'release' && (event.action == 'created' || event.action == 'published')
//! ```
//!
//! Supported: `==`, `!=`, `&&`, `||`, parentheses and the literals `true` and
//! `false`. Operands are event attributes or quoted strings. Conditions are
//! parsed once when the graph is built and evaluated once per run.

use gatehouse_core::event::{Event, EventAttribute, EventKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,
    #[error("unknown event attribute '{0}'")]
    UnknownAttribute(String),
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),
    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
    },
    #[error("'{0}' is not a valid event kind")]
    InvalidKind(String),
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Attribute(EventAttribute),
    Text(String),
}

impl Operand {
    fn resolve<'a>(&'a self, event: &'a Event) -> Option<&'a str> {
        match self {
            Operand::Attribute(attribute) => event.attribute(*attribute),
            Operand::Text(text) => Some(text.as_str()),
        }
    }
}

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Literal(bool),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    /// Parse a condition string.
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let condition = parser.parse_or()?;
        match parser.peek() {
            None => Ok(condition),
            Some(token) => Err(ConditionError::Unexpected {
                expected: "end of condition",
                found: token.describe(),
            }),
        }
    }

    /// Evaluate the condition against an event snapshot.
    pub fn evaluate(&self, event: &Event) -> bool {
        match self {
            Condition::Literal(value) => *value,
            Condition::Compare { left, op, right } => {
                let (l, r) = (left.resolve(event), right.resolve(event));
                let equal = l.is_some() && l == r;
                match op {
                    CompareOp::Eq => equal,
                    CompareOp::Ne => !equal,
                }
            }
            Condition::All(parts) => parts.iter().all(|c| c.evaluate(event)),
            Condition::Any(parts) => parts.iter().any(|c| c.evaluate(event)),
        }
    }
}

/// Whether a job is eligible to run. No condition means always eligible.
pub fn eligible(condition: Option<&Condition>, event: &Event) -> bool {
    condition.is_none_or(|c| c.evaluate(event))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Eq,
    Ne,
    Str(String),
    Ident(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::And => "'&&'".to_string(),
            Token::Or => "'||'".to_string(),
            Token::Eq => "'=='".to_string(),
            Token::Ne => "'!='".to_string(),
            Token::Str(s) => format!("string '{}'", s),
            Token::Ident(s) => format!("'{}'", s),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '\'' | '"' => {
                let quote = ch;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].1 != quote {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(ConditionError::UnterminatedString(offset));
                }
                tokens.push(Token::Str(chars[start..end].iter().map(|&(_, c)| c).collect()));
                i = end + 1;
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i].1) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().map(|&(_, c)| c).collect()));
            }
            _ => return Err(ConditionError::UnexpectedChar { ch, offset }),
        }
    }

    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '-'
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn found(token: Option<&Token>) -> String {
        token
            .map(Token::describe)
            .unwrap_or_else(|| "end of condition".to_string())
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionError> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::Any(parts)
        })
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionError> {
        let mut parts = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            parts.push(self.parse_unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::All(parts)
        })
    }

    fn parse_unary(&mut self) -> Result<Condition, ConditionError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(ConditionError::Unexpected {
                        expected: "')'",
                        found: Self::found(other.as_ref()),
                    }),
                }
            }
            Some(Token::Ident(word)) if word == "true" || word == "false" => {
                let value = word == "true";
                self.pos += 1;
                Ok(Condition::Literal(value))
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Condition, ConditionError> {
        let left = self.parse_operand()?;
        let op = match self.next() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            other => {
                return Err(ConditionError::Unexpected {
                    expected: "'==' or '!='",
                    found: Self::found(other.as_ref()),
                });
            }
        };
        let right = self.parse_operand()?;
        let (left, right) = normalize_kind(left, right)?;
        Ok(Condition::Compare { left, op, right })
    }

    fn parse_operand(&mut self) -> Result<Operand, ConditionError> {
        match self.next() {
            Some(Token::Str(text)) => Ok(Operand::Text(text)),
            Some(Token::Ident(path)) => EventAttribute::from_path(&path)
                .map(Operand::Attribute)
                .ok_or(ConditionError::UnknownAttribute(path)),
            other => Err(ConditionError::Unexpected {
                expected: "an event attribute or a quoted string",
                found: Self::found(other.as_ref()),
            }),
        }
    }
}

/// Kind literals must name a real event kind; aliases collapse to the
/// canonical spelling so comparisons stay plain string equality.
fn normalize_kind(left: Operand, right: Operand) -> Result<(Operand, Operand), ConditionError> {
    let canonical = |text: String| -> Result<Operand, ConditionError> {
        text.parse::<EventKind>()
            .map(|kind| Operand::Text(kind.as_str().to_string()))
            .map_err(|_| ConditionError::InvalidKind(text))
    };

    match (left, right) {
        (Operand::Attribute(EventAttribute::Kind), Operand::Text(text)) => Ok((
            Operand::Attribute(EventAttribute::Kind),
            canonical(text)?,
        )),
        (Operand::Text(text), Operand::Attribute(EventAttribute::Kind)) => Ok((
            canonical(text)?,
            Operand::Attribute(EventAttribute::Kind),
        )),
        other => Ok(other),
    }
}
