//! Import format model.
//!
//! Everything the guesser produces lives here:
//! - `TrimChoice`: junk margins removed from a raw grid before typing.
//! - `ColumnType`: the closed set of column types with their parse payloads.
//! - `ColumnId` / `ColumnInfo`: validated column identifiers plus their type.
//! - `TextFormat`: the complete guessed format, serializable as a YAML
//!   sidecar so later runs can skip the guess.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::Context;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::data::Value;
use crate::error::{Result, TableError};

/// Margins to strip from a raw grid: rows from the top and bottom, columns
/// from the left and right. Amounts beyond the grid size clamp to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TrimChoice {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl TrimChoice {
    pub fn new(top: usize, bottom: usize, left: usize, right: usize) -> Self {
        TrimChoice {
            top,
            bottom,
            left,
            right,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == TrimChoice::default()
    }

    /// Returns the sub-grid with the margins removed.
    pub fn trim(&self, grid: &[Vec<String>]) -> Vec<Vec<String>> {
        let top = self.top.min(grid.len());
        let bottom = self.bottom.min(grid.len() - top);
        grid[top..grid.len() - bottom]
            .iter()
            .map(|row| {
                let left = self.left.min(row.len());
                let right = self.right.min(row.len() - left);
                row[left..row.len() - right].to_vec()
            })
            .collect()
    }

    /// Parses a `top,bottom,left,right` spec as accepted on the command line.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(TableError::User(format!(
                "trim spec '{spec}' must have four comma-separated counts (top,bottom,left,right)"
            )));
        }
        let mut counts = [0usize; 4];
        for (slot, part) in counts.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                TableError::User(format!("trim spec '{spec}': '{part}' is not a count"))
            })?;
        }
        Ok(TrimChoice::new(counts[0], counts[1], counts[2], counts[3]))
    }
}

impl fmt::Display for TrimChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.top, self.bottom, self.left, self.right
        )
    }
}

/// Validated column identifier: starts with a letter, continues with
/// letters, digits, spaces or underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(String);

impl ColumnId {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let mut chars = trimmed.chars();
        let valid = match chars.next() {
            Some(first) if first.is_alphabetic() => {
                chars.all(|ch| ch.is_alphanumeric() || ch == ' ' || ch == '_')
            }
            _ => false,
        };
        if valid {
            Ok(ColumnId(trimmed.to_string()))
        } else {
            Err(TableError::User(format!(
                "'{raw}' is not a valid column name"
            )))
        }
    }

    /// Derives the closest valid id from raw header text. `None` when nothing
    /// salvageable remains (empty, or no leading letter after cleanup).
    pub fn sanitize(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .trim()
            .chars()
            .map(|ch| {
                if ch.is_alphanumeric() || ch == ' ' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        let cleaned = cleaned
            .trim_matches(|ch: char| ch == '_' || ch == ' ')
            .to_string();
        match cleaned.chars().next() {
            Some(first) if first.is_alphabetic() => Some(ColumnId(cleaned)),
            _ => None,
        }
    }

    /// Positional fallback name for columns without a usable header.
    pub fn generated(index: usize) -> Self {
        ColumnId(format!("field_{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NumericFormat {
    /// Display unit label; empty means dimensionless.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    /// Minimum fraction digits observed across the column; display hint only.
    #[serde(default)]
    pub min_decimal_places: u32,
    /// Common prefix stripped from every cell before parsing (e.g. `$`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Common suffix stripped from every cell before parsing (e.g. `%`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateKind {
    Date,
    Time,
    DateTime,
}

impl DateKind {
    pub fn label(&self) -> &'static str {
        match self {
            DateKind::Date => "date",
            DateKind::Time => "time",
            DateKind::DateTime => "datetime",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateFormat {
    pub kind: DateKind,
    /// A strftime-style pattern from the fixed candidate list.
    pub format: String,
}

impl DateFormat {
    pub fn new(kind: DateKind, format: impl Into<String>) -> Self {
        DateFormat {
            kind,
            format: format.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BooleanTokens {
    pub true_token: String,
    pub false_token: String,
}

impl BooleanTokens {
    pub fn new(true_token: impl Into<String>, false_token: impl Into<String>) -> Self {
        BooleanTokens {
            true_token: true_token.into(),
            false_token: false_token.into(),
        }
    }

    /// Case-insensitive match against either token.
    pub fn interpret(&self, cell: &str) -> Option<bool> {
        if cell.eq_ignore_ascii_case(&self.true_token) {
            Some(true)
        } else if cell.eq_ignore_ascii_case(&self.false_token) {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrBlankType {
    pub inner: Box<ColumnType>,
    /// The exact token whose occurrences read as blank (e.g. `NA`).
    pub blank_token: String,
}

/// The closed set of column types. Every consumer matches exhaustively; new
/// kinds are compile errors until handled everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Blank,
    Text,
    Numeric(NumericFormat),
    Date(DateFormat),
    Boolean(BooleanTokens),
    OrBlank(OrBlankType),
}

impl ColumnType {
    /// Wraps `inner` as blank-tolerant. Wrapping `Blank` or another
    /// `OrBlank` is an invariant violation.
    pub fn or_blank(inner: ColumnType, blank_token: impl Into<String>) -> Result<Self> {
        match inner {
            ColumnType::Blank | ColumnType::OrBlank(_) => Err(TableError::internal(format!(
                "or_blank cannot wrap {inner}"
            ))),
            other => Ok(ColumnType::OrBlank(OrBlankType {
                inner: Box::new(other),
                blank_token: blank_token.into(),
            })),
        }
    }

    /// Fill value used when concatenation must invent a cell for this type.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            ColumnType::Blank => None,
            ColumnType::Text => Some(Value::Text(String::new())),
            ColumnType::Numeric(_) => Some(Value::Number(rust_decimal::Decimal::ZERO)),
            ColumnType::Date(spec) => Some(match spec.kind {
                DateKind::Date => Value::Date(chrono::NaiveDate::default()),
                DateKind::Time => Value::Time(chrono::NaiveTime::default()),
                DateKind::DateTime => Value::DateTime(chrono::NaiveDateTime::default()),
            }),
            ColumnType::Boolean(_) => Some(Value::Bool(false)),
            ColumnType::OrBlank(_) => None,
        }
    }

    /// Re-checks invariants after deserialization.
    pub fn validate(&self) -> Result<()> {
        if let ColumnType::OrBlank(spec) = self {
            match spec.inner.as_ref() {
                ColumnType::Blank | ColumnType::OrBlank(_) => {
                    return Err(TableError::User(format!(
                        "or_blank cannot wrap {}",
                        spec.inner
                    )));
                }
                inner => inner.validate()?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Blank => f.write_str("blank"),
            ColumnType::Text => f.write_str("text"),
            ColumnType::Numeric(spec) => {
                f.write_str("numeric")?;
                let mut details = Vec::new();
                if !spec.unit.is_empty() {
                    details.push(format!("unit={}", spec.unit));
                }
                if spec.min_decimal_places > 0 {
                    details.push(format!("dp={}", spec.min_decimal_places));
                }
                if let Some(prefix) = &spec.prefix {
                    details.push(format!("prefix={prefix}"));
                }
                if let Some(suffix) = &spec.suffix {
                    details.push(format!("suffix={suffix}"));
                }
                if details.is_empty() {
                    Ok(())
                } else {
                    write!(f, "({})", details.join(", "))
                }
            }
            ColumnType::Date(spec) => write!(f, "{}({})", spec.kind.label(), spec.format),
            ColumnType::Boolean(tokens) => {
                write!(f, "boolean({}/{})", tokens.true_token, tokens.false_token)
            }
            ColumnType::OrBlank(spec) => {
                write!(f, "{} or blank('{}')", spec.inner, spec.blank_token)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub id: ColumnId,
    pub column_type: ColumnType,
}

impl ColumnInfo {
    pub fn new(id: ColumnId, column_type: ColumnType) -> Self {
        ColumnInfo { id, column_type }
    }
}

/// A complete guessed (or hand-written) import format. Serializes to the
/// YAML sidecar consumed by `import`, `process` and `concat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFormat {
    /// Charset label resolvable by `Encoding::for_label`, e.g. `UTF-8`.
    pub charset: String,
    pub separator: Option<char>,
    pub quote: Option<char>,
    #[serde(default)]
    pub trim: TrimChoice,
    pub columns: Vec<ColumnInfo>,
}

impl TextFormat {
    pub fn encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.charset.as_bytes())
            .ok_or_else(|| TableError::User(format!("unknown charset label '{}'", self.charset)))
    }

    pub fn validate(&self) -> Result<()> {
        self.encoding()?;
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(&column.id) {
                return Err(TableError::User(format!(
                    "duplicate column '{}' in format",
                    column.id
                )));
            }
            column.column_type.validate()?;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("Reading format file {path:?}"))?;
        let format: TextFormat = serde_yaml::from_str(&text)
            .with_context(|| format!("Parsing format file {path:?}"))?;
        format
            .validate()
            .with_context(|| format!("Validating format file {path:?}"))?;
        Ok(format)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text =
            serde_yaml::to_string(self).with_context(|| "Serializing format".to_string())?;
        fs::write(path, text).with_context(|| format!("Writing format file {path:?}"))?;
        Ok(())
    }
}
