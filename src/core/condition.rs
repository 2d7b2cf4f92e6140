//! Condition gate - typed run-condition expressions
//!
//! Expressions are parsed once, when the workflow is built, into a small AST.
//! Evaluation is pure: it only reads a [`GateScope`] and an immutable
//! [`ContextSnapshot`].

use crate::core::{context::ContextSnapshot, state::JobStatus};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Parsed run condition of a job or step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `always()`
    Always,
    /// `success()`: nothing failed so far
    Success,
    /// `failure()`: something failed so far
    Failure,
    /// `cancelled()`: a prerequisite was cancelled
    Cancelled,
    /// `true` / `false`
    Literal(bool),
    /// `needs.<job>.result == '<status>'`
    StatusEquals { job: String, status: JobStatus },
    /// `needs.<job>.outputs.<key> == '<value>'`
    OutputEquals {
        job: String,
        key: String,
        value: String,
    },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ConditionParseError {
    pub reason: String,
}

impl ConditionParseError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Status predicates as seen from the thing being gated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateScope {
    pub success: bool,
    pub failure: bool,
    pub cancelled: bool,
}

impl GateScope {
    /// Scope of a job gate: derived from the terminal statuses of its `needs`
    pub fn for_needs(
        needs: &[String],
        snapshot: &ContextSnapshot,
        cancelled_counts_as_failure: bool,
    ) -> Self {
        let statuses: Vec<Option<JobStatus>> =
            needs.iter().map(|need| snapshot.status(need)).collect();

        let success = statuses
            .iter()
            .all(|s| matches!(s, Some(JobStatus::Succeeded)));
        let cancelled = statuses
            .iter()
            .any(|s| matches!(s, Some(JobStatus::Cancelled)));
        let failure = statuses.iter().any(|s| match s {
            Some(JobStatus::Failed) => true,
            Some(JobStatus::Cancelled) => cancelled_counts_as_failure,
            _ => false,
        });

        Self {
            success,
            failure,
            cancelled,
        }
    }

    /// Scope of a step gate: derived from the instance's step history so far
    pub fn for_steps(failed_so_far: bool) -> Self {
        Self {
            success: !failed_so_far,
            failure: failed_so_far,
            cancelled: false,
        }
    }
}

impl Condition {
    /// Parse an expression, with or without a `${{ }}` wrapper
    pub fn parse(expression: &str) -> Result<Condition, ConditionParseError> {
        let trimmed = expression.trim();
        let inner = match trimmed
            .strip_prefix("${{")
            .and_then(|rest| rest.strip_suffix("}}"))
        {
            Some(inner) => inner.trim(),
            None => trimmed,
        };

        if inner.is_empty() {
            return Err(ConditionParseError::new("empty expression"));
        }

        let tokens = tokenize(inner)?;
        let mut parser = Parser { tokens, pos: 0 };
        let condition = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ConditionParseError::new(format!(
                "unexpected token {}",
                token
            )));
        }
        Ok(condition)
    }

    /// Evaluate against a gate scope and a snapshot of published outputs
    pub fn evaluate(&self, scope: &GateScope, snapshot: &ContextSnapshot) -> bool {
        match self {
            Condition::Always => true,
            Condition::Success => scope.success,
            Condition::Failure => scope.failure,
            Condition::Cancelled => scope.cancelled,
            Condition::Literal(value) => *value,
            Condition::StatusEquals { job, status } => snapshot.status(job) == Some(*status),
            Condition::OutputEquals { job, key, value } => {
                snapshot.output(job, key) == Some(value.as_str())
            }
            Condition::Not(inner) => !inner.evaluate(scope, snapshot),
            Condition::And(lhs, rhs) => {
                lhs.evaluate(scope, snapshot) && rhs.evaluate(scope, snapshot)
            }
            Condition::Or(lhs, rhs) => {
                lhs.evaluate(scope, snapshot) || rhs.evaluate(scope, snapshot)
            }
        }
    }

    /// Jobs whose outputs this condition reads
    pub fn referenced_jobs(&self) -> Vec<&str> {
        let mut jobs = Vec::new();
        self.collect_jobs(&mut jobs);
        jobs
    }

    fn collect_jobs<'a>(&'a self, jobs: &mut Vec<&'a str>) {
        match self {
            Condition::StatusEquals { job, .. } | Condition::OutputEquals { job, .. } => {
                if !jobs.contains(&job.as_str()) {
                    jobs.push(job);
                }
            }
            Condition::Not(inner) => inner.collect_jobs(jobs),
            Condition::And(lhs, rhs) | Condition::Or(lhs, rhs) => {
                lhs.collect_jobs(jobs);
                rhs.collect_jobs(jobs);
            }
            _ => {}
        }
    }

    /// True for a bare `always()`
    pub fn is_always(&self) -> bool {
        matches!(self, Condition::Always)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "always()"),
            Condition::Success => write!(f, "success()"),
            Condition::Failure => write!(f, "failure()"),
            Condition::Cancelled => write!(f, "cancelled()"),
            Condition::Literal(value) => write!(f, "{}", value),
            Condition::StatusEquals { job, status } => {
                write!(f, "needs.{}.result == '{}'", job, status)
            }
            Condition::OutputEquals { job, key, value } => {
                write!(f, "needs.{}.outputs.{} == '{}'", job, key, value)
            }
            Condition::Not(inner) => write!(f, "!({})", inner),
            Condition::And(lhs, rhs) => write!(f, "({} && {})", lhs, rhs),
            Condition::Or(lhs, rhs) => write!(f, "({} || {})", lhs, rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Eq,
    Ne,
    Not,
    LParen,
    RParen,
    Str(String),
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::And => write!(f, "'&&'"),
            Token::Or => write!(f, "'||'"),
            Token::Eq => write!(f, "'=='"),
            Token::Ne => write!(f, "'!='"),
            Token::Not => write!(f, "'!'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Ident(s) => write!(f, "{}", s),
        }
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(&&)|(\|\|)|(==)|(!=)|(!)|(\()|(\))|'((?:[^']|'')*)'|([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*))",
        )
        .expect("token pattern is valid")
    })
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionParseError> {
    let regex = token_regex();
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.trim_start().is_empty() {
        let caps = regex.captures(rest).ok_or_else(|| {
            ConditionParseError::new(format!("unexpected input at '{}'", rest.trim_start()))
        })?;

        let token = if caps.get(1).is_some() {
            Token::And
        } else if caps.get(2).is_some() {
            Token::Or
        } else if caps.get(3).is_some() {
            Token::Eq
        } else if caps.get(4).is_some() {
            Token::Ne
        } else if caps.get(5).is_some() {
            Token::Not
        } else if caps.get(6).is_some() {
            Token::LParen
        } else if caps.get(7).is_some() {
            Token::RParen
        } else if let Some(s) = caps.get(8) {
            Token::Str(s.as_str().replace("''", "'"))
        } else if let Some(ident) = caps.get(9) {
            Token::Ident(ident.as_str().to_string())
        } else {
            return Err(ConditionParseError::new("unrecognized token"));
        };

        tokens.push(token);
        rest = &rest[caps.get(0).map_or(rest.len(), |m| m.end())..];
    }

    Ok(tokens)
}

/// Reference to an upstream job's published value
enum Reference {
    Result(String),
    Output(String, String),
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
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionParseError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ConditionParseError::new(format!(
                "expected {} but found {}",
                expected, token
            ))),
            None => Err(ConditionParseError::new(format!(
                "expected {} but reached end of expression",
                expected
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionParseError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Condition::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionParseError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Condition::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Condition, ConditionParseError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Condition, ConditionParseError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.expect(Token::RParen)?;
                    return match ident.to_ascii_lowercase().as_str() {
                        "always" => Ok(Condition::Always),
                        "success" => Ok(Condition::Success),
                        "failure" => Ok(Condition::Failure),
                        "cancelled" => Ok(Condition::Cancelled),
                        other => Err(ConditionParseError::new(format!(
                            "unknown function '{}()'",
                            other
                        ))),
                    };
                }

                match ident.as_str() {
                    "true" => return Ok(Condition::Literal(true)),
                    "false" => return Ok(Condition::Literal(false)),
                    _ => {}
                }

                let reference = parse_reference(&ident)?;
                let (negate, literal) = self.parse_comparison_tail()?;
                comparison(reference, literal, negate)
            }
            Some(Token::Str(literal)) => {
                let negate = match self.next() {
                    Some(Token::Eq) => false,
                    Some(Token::Ne) => true,
                    _ => {
                        return Err(ConditionParseError::new(format!(
                            "string literal '{}' must be compared with a job reference",
                            literal
                        )))
                    }
                };
                let reference = match self.next() {
                    Some(Token::Ident(ident)) => parse_reference(&ident)?,
                    _ => {
                        return Err(ConditionParseError::new(
                            "expected a job reference after comparison operator",
                        ))
                    }
                };
                comparison(reference, literal, negate)
            }
            Some(token) => Err(ConditionParseError::new(format!(
                "unexpected token {}",
                token
            ))),
            None => Err(ConditionParseError::new("unexpected end of expression")),
        }
    }

    fn parse_comparison_tail(&mut self) -> Result<(bool, String), ConditionParseError> {
        let negate = match self.next() {
            Some(Token::Eq) => false,
            Some(Token::Ne) => true,
            _ => {
                return Err(ConditionParseError::new(
                    "job references must be compared with '==' or '!='",
                ))
            }
        };
        match self.next() {
            Some(Token::Str(literal)) => Ok((negate, literal)),
            _ => Err(ConditionParseError::new(
                "expected a quoted string after comparison operator",
            )),
        }
    }
}

fn parse_reference(ident: &str) -> Result<Reference, ConditionParseError> {
    let parts: Vec<&str> = ident.split('.').collect();
    match parts.as_slice() {
        ["needs", job, "result"] => Ok(Reference::Result(job.to_string())),
        ["needs", job, "outputs", key] => Ok(Reference::Output(job.to_string(), key.to_string())),
        _ => Err(ConditionParseError::new(format!(
            "unknown reference '{}' (expected needs.<job>.result or needs.<job>.outputs.<key>)",
            ident
        ))),
    }
}

fn comparison(
    reference: Reference,
    literal: String,
    negate: bool,
) -> Result<Condition, ConditionParseError> {
    let condition = match reference {
        Reference::Result(job) => {
            let status = JobStatus::parse(&literal).ok_or_else(|| {
                ConditionParseError::new(format!("unknown job status '{}'", literal))
            })?;
            Condition::StatusEquals { job, status }
        }
        Reference::Output(job, key) => Condition::OutputEquals {
            job,
            key,
            value: literal,
        },
    };

    Ok(if negate {
        Condition::Not(Box::new(condition))
    } else {
        condition
    })
}
