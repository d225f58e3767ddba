//! Activation conditions: boolean expressions over named checks.
//!
//! ```text
//! is-member-of(/staff) AND NOT (has-identity-provider-link(github) OR is-member-of(/contractors))
//! ```
//!
//! A check is written like a trigger, `<provider-id>` or
//! `<provider-id>(<parameter>)`. `NOT` binds tighter than `AND`, which binds
//! tighter than `OR`. Keywords are case-insensitive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::trigger::is_valid_provider_id;
use crate::error::ValidationError;

/// One named check, resolved by a condition provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionCheck {
    pub provider_id: String,
    pub parameter: Option<String>,
}

impl ConditionCheck {
    #[must_use]
    pub fn new(provider_id: impl Into<String>, parameter: Option<&str>) -> Self {
        Self {
            provider_id: provider_id.into(),
            parameter: parameter.map(str::to_string),
        }
    }

    #[must_use]
    pub fn parameter(&self) -> Option<&str> {
        self.parameter.as_deref()
    }
}

impl fmt::Display for ConditionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameter {
            Some(param) => write!(f, "{}({param})", self.provider_id),
            None => f.write_str(&self.provider_id),
        }
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConditionExpr {
    Check(ConditionCheck),
    Not(Box<ConditionExpr>),
    All(Vec<ConditionExpr>),
    Any(Vec<ConditionExpr>),
}

impl ConditionExpr {
    /// Every check of the expression, left to right.
    #[must_use]
    pub fn checks(&self) -> Vec<&ConditionCheck> {
        let mut checks = Vec::new();
        self.collect_checks(&mut checks);
        checks
    }

    fn collect_checks<'a>(&'a self, out: &mut Vec<&'a ConditionCheck>) {
        match self {
            Self::Check(check) => out.push(check),
            Self::Not(inner) => inner.collect_checks(out),
            Self::All(items) | Self::Any(items) => {
                for item in items {
                    item.collect_checks(out);
                }
            }
        }
    }

    /// Evaluate the expression, asking `check` for the value of every leaf
    /// it needs. `AND` and `OR` short-circuit.
    ///
    /// # Errors
    ///
    /// Returns the first error `check` returns.
    pub fn evaluate<E, F>(&self, check: &mut F) -> Result<bool, E>
    where
        F: FnMut(&ConditionCheck) -> Result<bool, E>,
    {
        match self {
            Self::Check(leaf) => check(leaf),
            Self::Not(inner) => Ok(!inner.evaluate(check)?),
            Self::All(items) => {
                for item in items {
                    if !item.evaluate(check)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(items) => {
                for item in items {
                    if item.evaluate(check)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Any(_) => 1,
            Self::All(_) => 2,
            Self::Not(_) | Self::Check(_) => 3,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (items, separator, min) = match self {
            Self::Check(check) => return check.fmt(f),
            Self::Not(inner) => {
                f.write_str("NOT ")?;
                return inner.fmt_operand(f, 3);
            }
            Self::All(items) => (items, " AND ", 3),
            Self::Any(items) => (items, " OR ", 2),
        };
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                f.write_str(separator)?;
            }
            item.fmt_operand(f, min)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Not,
    Check(ConditionCheck),
}

fn tokenize(text: &str) -> Result<Vec<Token>, &'static str> {
    let mut tokens = Vec::new();
    let mut rest = text.trim_start();
    while let Some(first) = rest.chars().next() {
        match first {
            '(' => {
                tokens.push(Token::Open);
                rest = &rest[1..];
            }
            ')' => {
                tokens.push(Token::Close);
                rest = &rest[1..];
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
                    .unwrap_or(rest.len());
                let word = &rest[..end];
                rest = &rest[end..];
                if word.eq_ignore_ascii_case("and") {
                    tokens.push(Token::And);
                } else if word.eq_ignore_ascii_case("or") {
                    tokens.push(Token::Or);
                } else if word.eq_ignore_ascii_case("not") {
                    tokens.push(Token::Not);
                } else {
                    if !is_valid_provider_id(word) {
                        return Err("check ids must be lowercase letters, digits and dashes");
                    }
                    let mut parameter = None;
                    if let Some(after_open) = rest.strip_prefix('(') {
                        let close = after_open
                            .find(')')
                            .ok_or("missing closing parenthesis")?;
                        let param = after_open[..close].trim();
                        if param.is_empty() {
                            return Err("empty parameter");
                        }
                        if param.contains('(') {
                            return Err("nested parentheses in parameter");
                        }
                        parameter = Some(param);
                        rest = &after_open[close + 1..];
                    }
                    tokens.push(Token::Check(ConditionCheck::new(word, parameter)));
                }
            }
        }
        rest = rest.trim_start();
    }
    Ok(tokens)
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
    peeked: Option<Token>,
}

impl Parser {
    fn peek(&mut self) -> Option<&Token> {
        if self.peeked.is_none() {
            self.peeked = self.tokens.next();
        }
        self.peeked.as_ref()
    }

    fn next(&mut self) -> Option<Token> {
        self.peeked.take().or_else(|| self.tokens.next())
    }

    fn any(&mut self) -> Result<ConditionExpr, &'static str> {
        let mut items = vec![self.all()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            items.push(self.all()?);
        }
        Ok(collapse(items, ConditionExpr::Any))
    }

    fn all(&mut self) -> Result<ConditionExpr, &'static str> {
        let mut items = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            items.push(self.unary()?);
        }
        Ok(collapse(items, ConditionExpr::All))
    }

    fn unary(&mut self) -> Result<ConditionExpr, &'static str> {
        match self.next() {
            Some(Token::Not) => Ok(ConditionExpr::Not(Box::new(self.unary()?))),
            Some(Token::Open) => {
                let inner = self.any()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("missing closing parenthesis"),
                }
            }
            Some(Token::Check(check)) => Ok(ConditionExpr::Check(check)),
            Some(Token::Close) => Err("unexpected closing parenthesis"),
            Some(Token::And | Token::Or) => Err("operator without left operand"),
            None => Err("unexpected end of expression"),
        }
    }
}

fn collapse(mut items: Vec<ConditionExpr>, combine: fn(Vec<ConditionExpr>) -> ConditionExpr) -> ConditionExpr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        combine(items)
    }
}

impl FromStr for ConditionExpr {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ValidationError::InvalidCondition {
            input: input.to_string(),
            reason,
        };
        let tokens = tokenize(input).map_err(invalid)?;
        if tokens.is_empty() {
            return Err(invalid("empty expression"));
        }
        let mut parser = Parser {
            tokens: tokens.into_iter(),
            peeked: None,
        };
        let expr = parser.any().map_err(invalid)?;
        if parser.next().is_some() {
            return Err(invalid("unexpected input after expression"));
        }
        Ok(expr)
    }
}

impl TryFrom<String> for ConditionExpr {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConditionExpr> for String {
    fn from(value: ConditionExpr) -> Self {
        value.to_string()
    }
}
