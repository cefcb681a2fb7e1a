//! Structured query filters.
//!
//! A [`Filter`] renders to the OData-like text the backend API accepts
//! (`status/state ne 'Done' and asset/id eq '...'`). The orchestrator only
//! ever builds and prints these expressions; evaluating them is the storage
//! layer's job.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(value) => write!(f, "{value}"),
            Literal::Int(value) => write!(f, "{value}"),
            Literal::Float(value) => write!(f, "{value}"),
            Literal::Str(value) => write!(f, "'{}'", value.replace('\'', "''")),
            Literal::Time(value) => {
                f.write_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Str(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Str(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(value: DateTime<Utc>) -> Self {
        Literal::Time(value)
    }
}

/// Boolean filter expression over slash-separated field paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: Literal,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(
        field: impl Into<String>,
        op: CompareOp,
        value: impl Into<Literal>,
    ) -> Self {
        Filter::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Eq, Literal::Null)
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Ne, Literal::Null)
    }

    /// Conjunction of `filters`; flattens nested conjunctions.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut out = Vec::new();
        for filter in filters {
            match filter {
                Filter::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        Filter::And(out)
    }

    /// Disjunction of `filters`; flattens nested disjunctions.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut out = Vec::new();
        for filter in filters {
            match filter {
                Filter::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        Filter::Or(out)
    }

    pub fn and(self, other: Filter) -> Self {
        Filter::all([self, other])
    }

    pub fn or(self, other: Filter) -> Self {
        Filter::any([self, other])
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    fn is_compound(&self) -> bool {
        matches!(self, Filter::And(items) | Filter::Or(items) if items.len() > 1)
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    items: &[Filter],
    separator: &str,
) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(separator)?;
        }
        if item.is_compound() {
            write!(f, "({item})")?;
        } else {
            write!(f, "{item}")?;
        }
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.as_str())
            }
            Filter::And(items) => write_joined(f, items, " and "),
            Filter::Or(items) => write_joined(f, items, " or "),
            Filter::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

/// Sort key for collection queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} desc", self.field)
        } else {
            write!(f, "{} asc", self.field)
        }
    }
}
