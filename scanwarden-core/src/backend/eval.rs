//! Filter evaluation against serialized records.
//!
//! Comparisons follow SQL null rules: a missing or null field never matches
//! an ordered comparison, `eq null` matches a missing or null field and
//! `ne null` matches a present one. Strings that parse as RFC 3339 are
//! compared as instants whenever the other side is a time.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use scanwarden_model::{CompareOp, Filter, Literal, OrderBy};

pub(crate) fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .try_fold(record, |value, segment| value.get(segment))
        .filter(|value| !value.is_null())
}

pub(crate) fn matches(filter: &Filter, record: &Value) -> bool {
    match filter {
        Filter::Compare { field, op, value } => compare(lookup(record, field), *op, value),
        Filter::And(items) => items.iter().all(|item| matches(item, record)),
        Filter::Or(items) => items.iter().any(|item| matches(item, record)),
        Filter::Not(inner) => !matches(inner, record),
    }
}

fn compare(field: Option<&Value>, op: CompareOp, literal: &Literal) -> bool {
    if matches!(literal, Literal::Null) {
        return match op {
            CompareOp::Eq => field.is_none(),
            CompareOp::Ne => field.is_some(),
            _ => false,
        };
    }
    let Some(field) = field else {
        return false;
    };
    let Some(ordering) = order_against_literal(field, literal) else {
        return false;
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// `None` when the two sides are not comparable.
fn order_against_literal(field: &Value, literal: &Literal) -> Option<Ordering> {
    match (field, literal) {
        (Value::Bool(left), Literal::Bool(right)) => Some(left.cmp(right)),
        (Value::String(left), Literal::Str(right)) => Some(left.as_str().cmp(right.as_str())),
        (Value::String(left), Literal::Time(right)) => parse_time(left).map(|left| left.cmp(right)),
        (Value::Number(left), Literal::Int(right)) => match left.as_i64() {
            Some(left) => Some(left.cmp(right)),
            None => left.as_f64()?.partial_cmp(&(*right as f64)),
        },
        (Value::Number(left), Literal::Float(right)) => left.as_f64()?.partial_cmp(right),
        _ => None,
    }
}

/// Orders two records' values at one path. Missing values sort last.
fn order_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => match (left, right) {
            (Value::String(a), Value::String(b)) => match (parse_time(a), parse_time(b)) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a.cmp(b),
            },
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b))
                .unwrap_or(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        },
    }
}

pub(crate) fn sort(records: &mut [Value], order_by: &[OrderBy]) {
    if order_by.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for order in order_by {
            let left = lookup(a, &order.field);
            let right = lookup(b, &order.field);
            let ordering = match (left.is_some(), right.is_some(), order.descending) {
                // Keep missing values last in both directions.
                (true, true, true) => order_values(left, right).reverse(),
                _ => order_values(left, right),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
