use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use evalexpr::Value as EvalValue;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};
use crate::schema::{ColumnType, DateFormat, DateKind, NumericFormat};

/// Candidate date patterns, in elimination priority order. Day-first layouts
/// come before month-first so ambiguous cells resolve deterministically.
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d %b %Y",
    "%b %d, %Y",
];

pub const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M:%S%.f", "%H:%M", "%I:%M %p"];

pub const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
];

/// A single cell scalar. Blank cells are represented as `None` at the
/// `Option<Value>` level, never as a variant here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Number(Decimal),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Text(_) => 0,
            Value::Number(_) => 1,
            Value::Bool(_) => 2,
            Value::Date(_) => 3,
            Value::Time(_) => 4,
            Value::DateTime(_) => 5,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Text(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Date(date) => date.format("%Y-%m-%d").to_string(),
            Value::Time(time) => time.format("%H:%M:%S").to_string(),
            Value::DateTime(stamp) => stamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_display())
    }
}

impl Ord for Value {
    /// Total ordering: same kinds compare naturally, different kinds by a
    /// fixed rank. Calculated columns can produce mixed kinds across rows, so
    /// sorting must never panic on a kind mismatch.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordering wrapper placing blank cells before any value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparableValue(pub Option<Value>);

impl Ord for ComparableValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for ComparableValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parses one raw cell according to its column type. Blank-equivalent cells
/// come back as `None`; malformed cells are row-level fetch errors.
pub fn parse_cell(raw: &str, column_type: &ColumnType, row: usize) -> Result<Option<Value>> {
    let trimmed = raw.trim();
    match column_type {
        ColumnType::Blank => {
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Err(TableError::fetch(
                    row,
                    format!("unexpected value '{trimmed}' in a blank column"),
                ))
            }
        }
        ColumnType::Text => Ok(Some(Value::Text(raw.to_string()))),
        ColumnType::Numeric(spec) => {
            if trimmed.is_empty() {
                Ok(None)
            } else {
                parse_numeric(trimmed, spec)
                    .map(|number| Some(Value::Number(number)))
                    .map_err(|message| TableError::fetch(row, message))
            }
        }
        ColumnType::Date(spec) => {
            if trimmed.is_empty() {
                Ok(None)
            } else {
                parse_temporal(trimmed, spec)
                    .map(Some)
                    .map_err(|message| TableError::fetch(row, message))
            }
        }
        ColumnType::Boolean(tokens) => {
            if trimmed.is_empty() {
                Ok(None)
            } else {
                tokens
                    .interpret(trimmed)
                    .map(|flag| Some(Value::Bool(flag)))
                    .ok_or_else(|| {
                        TableError::fetch(
                            row,
                            format!(
                                "'{trimmed}' is neither '{}' nor '{}'",
                                tokens.true_token, tokens.false_token
                            ),
                        )
                    })
            }
        }
        ColumnType::OrBlank(spec) => {
            if trimmed == spec.blank_token {
                Ok(None)
            } else {
                parse_cell(raw, &spec.inner, row)
            }
        }
    }
}

/// Decimal parse with the column's common prefix/suffix stripped when present
/// and digit-group separators ignored.
pub fn parse_numeric(cell: &str, spec: &NumericFormat) -> std::result::Result<Decimal, String> {
    let mut body = cell;
    if let Some(prefix) = &spec.prefix {
        body = body.strip_prefix(prefix.as_str()).unwrap_or(body).trim_start();
    }
    if let Some(suffix) = &spec.suffix {
        body = body.strip_suffix(suffix.as_str()).unwrap_or(body).trim_end();
    }
    let cleaned: String = body
        .chars()
        .filter(|ch| !matches!(ch, ',' | '_'))
        .collect();
    cleaned
        .trim()
        .parse::<Decimal>()
        .map_err(|_| format!("'{cell}' is not numeric"))
}

pub fn parse_temporal(cell: &str, spec: &DateFormat) -> std::result::Result<Value, String> {
    let outcome = match spec.kind {
        DateKind::Date => NaiveDate::parse_from_str(cell, &spec.format).map(Value::Date),
        DateKind::Time => NaiveTime::parse_from_str(cell, &spec.format).map(Value::Time),
        DateKind::DateTime => {
            NaiveDateTime::parse_from_str(cell, &spec.format).map(Value::DateTime)
        }
    };
    outcome.map_err(|_| format!("'{cell}' does not match pattern '{}'", spec.format))
}

/// Lowercased, underscore-joined identifier used to bind columns into
/// expression contexts.
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn value_to_evalexpr(value: &Option<Value>) -> EvalValue {
    match value {
        None => EvalValue::Empty,
        Some(Value::Text(text)) => EvalValue::String(text.clone()),
        Some(Value::Number(number)) => {
            if number.scale() == 0
                && let Some(int) = number.to_i64()
            {
                EvalValue::Int(int)
            } else {
                EvalValue::Float(number.to_f64().unwrap_or(f64::NAN))
            }
        }
        Some(Value::Bool(flag)) => EvalValue::Boolean(*flag),
        Some(Value::Date(date)) => EvalValue::String(date.format("%Y-%m-%d").to_string()),
        Some(Value::Time(time)) => EvalValue::String(time.format("%H:%M:%S").to_string()),
        Some(Value::DateTime(stamp)) => {
            EvalValue::String(stamp.format("%Y-%m-%d %H:%M:%S").to_string())
        }
    }
}

/// Converts an expression result back into a cell. Tuples have no column
/// representation; non-finite floats cannot be stored as decimals.
pub fn evalexpr_to_value(result: EvalValue) -> std::result::Result<Option<Value>, String> {
    match result {
        EvalValue::Empty => Ok(None),
        EvalValue::String(text) => Ok(Some(Value::Text(text))),
        EvalValue::Int(int) => Ok(Some(Value::Number(Decimal::from(int)))),
        EvalValue::Float(float) => Decimal::from_f64(float)
            .map(|number| Some(Value::Number(number)))
            .ok_or_else(|| format!("'{float}' cannot be stored as a number")),
        EvalValue::Boolean(flag) => Ok(Some(Value::Bool(flag))),
        EvalValue::Tuple(_) => Err("a tuple cannot be stored in a column".to_string()),
    }
}
