//! Expression support for the transformation engine.
//!
//! Wraps `evalexpr` behind a precompiled [`Expression`]: parse once, check
//! identifiers against a column lookup, then evaluate per row against a
//! context binding only the columns the expression references (plus
//! `row_number`). A small registered function set covers date arithmetic and
//! string shaping.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Duration, NaiveDate};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value as EvalValue, build_operator_tree,
};
use heck::{ToLowerCamelCase, ToSnakeCase, ToUpperCamelCase};
use regex::Regex;

use crate::data::{DATE_FORMATS, Value, evalexpr_to_value, normalize_column_name};
use crate::error::{Result, TableError};
use crate::schema::ColumnId;

/// Maps normalized identifiers back to the columns they name. `row_number`
/// is implicitly resolvable in every lookup.
#[derive(Debug, Clone, Default)]
pub struct ColumnLookup {
    names: std::collections::HashMap<String, ColumnId>,
}

impl ColumnLookup {
    pub fn new() -> Self {
        ColumnLookup::default()
    }

    pub fn from_ids<'a>(ids: impl IntoIterator<Item = &'a ColumnId>) -> Self {
        let mut lookup = ColumnLookup::new();
        for id in ids {
            lookup.insert(id);
        }
        lookup
    }

    pub fn insert(&mut self, id: &ColumnId) {
        self.names
            .insert(normalize_column_name(id.as_str()), id.clone());
    }

    /// Resolves an identifier as written in an expression; matching is by
    /// normalized name.
    pub fn resolve(&self, identifier: &str) -> Option<&ColumnId> {
        self.names.get(&normalize_column_name(identifier))
    }
}

/// A parsed expression. Parsing happens exactly once; evaluation reuses the
/// compiled operator tree.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    node: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self> {
        let node = build_operator_tree(source).map_err(|err| {
            TableError::Expression(format!("parsing '{source}': {err}"))
        })?;
        Ok(Expression {
            source: source.to_string(),
            node,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identifiers the expression reads, excluding the builtin `row_number`.
    pub fn variables(&self) -> BTreeSet<String> {
        self.node
            .iter_variable_identifiers()
            .filter(|name| *name != "row_number")
            .map(ToString::to_string)
            .collect()
    }

    /// Verifies every referenced identifier resolves to a known column.
    pub fn check(&self, lookup: &ColumnLookup) -> Result<()> {
        for identifier in self.variables() {
            if lookup.resolve(&identifier).is_none() {
                return Err(TableError::UnknownColumn(format!(
                    "{identifier} (in '{}')",
                    self.source
                )));
            }
        }
        Ok(())
    }

    pub fn evaluate(&self, context: &HashMapContext) -> Result<Option<Value>> {
        let result = self
            .node
            .eval_with_context(context)
            .map_err(|err| TableError::Expression(format!("'{}': {err}", self.source)))?;
        evalexpr_to_value(result)
            .map_err(|message| TableError::Expression(format!("'{}': {message}", self.source)))
    }

    /// Strict boolean evaluation for predicates.
    pub fn evaluate_bool(&self, context: &HashMapContext) -> Result<bool> {
        let result = self
            .node
            .eval_with_context(context)
            .map_err(|err| TableError::Expression(format!("'{}': {err}", self.source)))?;
        match result {
            EvalValue::Boolean(flag) => Ok(flag),
            other => Err(TableError::Expression(format!(
                "'{}' must yield a boolean, got {other:?}",
                self.source
            ))),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Builds a per-row evaluation context: registered functions, the supplied
/// column bindings, and a 1-based `row_number`.
pub fn row_context(bindings: &[(String, EvalValue)], row_number: usize) -> Result<HashMapContext> {
    let mut context = HashMapContext::new();
    register_temporal_functions(&mut context)?;
    register_string_functions(&mut context)?;
    for (name, value) in bindings {
        context
            .set_value(name.clone(), value.clone())
            .map_err(|err| TableError::Expression(format!("binding '{name}': {err}")))?;
    }
    context
        .set_value(
            "row_number".to_string(),
            EvalValue::Int(row_number as i64 + 1),
        )
        .map_err(|err| TableError::Expression(format!("binding row_number: {err}")))?;
    Ok(context)
}

fn register_temporal_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_function(
            "date_add".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_add")?;
                let date = parse_date_arg(&args[0])?;
                let days = parse_i64_arg(&args[1], "days")?;
                let result = date
                    .checked_add_signed(Duration::days(days))
                    .ok_or_else(|| eval_error("date_add overflow"))?;
                Ok(EvalValue::String(result.format("%Y-%m-%d").to_string()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "date_diff_days".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_diff_days")?;
                let left = parse_date_arg(&args[0])?;
                let right = parse_date_arg(&args[1])?;
                Ok(EvalValue::Int((left - right).num_days()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "date_format".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_format")?;
                let date = parse_date_arg(&args[0])?;
                let pattern = expect_string(&args[1], "format")?;
                Ok(EvalValue::String(date.format(pattern).to_string()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "year".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "year")?;
                let date = parse_date_arg(&args[0])?;
                Ok(EvalValue::Int(i64::from(chrono::Datelike::year(&date))))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "month".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "month")?;
                let date = parse_date_arg(&args[0])?;
                Ok(EvalValue::Int(i64::from(chrono::Datelike::month(&date))))
            }),
        )
        .map_err(to_expression_error)?;

    Ok(())
}

fn register_string_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_function(
            "lowercase".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "lowercase")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(value.to_lowercase()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "uppercase".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "uppercase")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(value.to_uppercase()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "trim".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "trim")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(value.trim().to_string()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "snake_case".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "snake_case")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(value.to_snake_case()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "camel_case".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "camel_case")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(value.to_lower_camel_case()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "pascal_case".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "pascal_case")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(value.to_upper_camel_case()))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "substring".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 3, "substring")?;
                let value = expect_string(&args[0], "value")?;
                let start = parse_i64_arg(&args[1], "start")?.max(0) as usize;
                let length = parse_i64_arg(&args[2], "length")?;
                if length <= 0 {
                    return Ok(EvalValue::String(String::new()));
                }
                let taken: String = value
                    .chars()
                    .skip(start)
                    .take(length as usize)
                    .collect();
                Ok(EvalValue::String(taken))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "regex_replace".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 3, "regex_replace")?;
                let value = expect_string(&args[0], "value")?;
                let pattern = expect_string(&args[1], "pattern")?;
                let replacement = expect_string(&args[2], "replacement")?;
                let regex = Regex::new(pattern)
                    .map_err(|err| eval_error(&format!("invalid regex: {err}")))?;
                Ok(EvalValue::String(
                    regex.replace_all(value, replacement).into_owned(),
                ))
            }),
        )
        .map_err(to_expression_error)?;

    context
        .set_function(
            "regex_match".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "regex_match")?;
                let value = expect_string(&args[0], "value")?;
                let pattern = expect_string(&args[1], "pattern")?;
                let regex = Regex::new(pattern)
                    .map_err(|err| eval_error(&format!("invalid regex: {err}")))?;
                Ok(EvalValue::Boolean(regex.is_match(value)))
            }),
        )
        .map_err(to_expression_error)?;

    Ok(())
}

fn to_expression_error(err: EvalexprError) -> TableError {
    TableError::Expression(err.to_string())
}

fn expect_args(
    arguments: &EvalValue,
    expected: usize,
    name: &str,
) -> std::result::Result<Vec<EvalValue>, EvalexprError> {
    match arguments {
        EvalValue::Empty if expected == 0 => Ok(Vec::new()),
        value if expected == 1 && !matches!(value, EvalValue::Tuple(_)) => Ok(vec![value.clone()]),
        EvalValue::Tuple(values) => {
            if values.len() != expected {
                return Err(EvalexprError::wrong_function_argument_amount(
                    values.len(),
                    expected,
                ));
            }
            Ok(values.clone())
        }
        _ => Err(eval_error(&format!(
            "{name} expects {expected} arguments provided as a tuple"
        ))),
    }
}

fn eval_error(message: &str) -> EvalexprError {
    EvalexprError::CustomMessage(message.to_string())
}

fn parse_date_arg(value: &EvalValue) -> std::result::Result<NaiveDate, EvalexprError> {
    let raw = expect_string(value, "date")?;
    for pattern in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw.trim(), pattern) {
            return Ok(date);
        }
    }
    Err(eval_error(&format!("'{raw}' is not a recognizable date")))
}

fn parse_i64_arg(value: &EvalValue, name: &str) -> std::result::Result<i64, EvalexprError> {
    match value {
        EvalValue::Int(int) => Ok(*int),
        EvalValue::Float(float) => Ok(*float as i64),
        other => Err(eval_error(&format!(
            "Expected integer for {name}, got {other:?}"
        ))),
    }
}

fn expect_string<'a>(
    value: &'a EvalValue,
    name: &str,
) -> std::result::Result<&'a str, EvalexprError> {
    if let EvalValue::String(text) = value {
        Ok(text)
    } else {
        Err(eval_error(&format!("Expected string for {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn context_with(bindings: &[(&str, EvalValue)]) -> HashMapContext {
        let owned: Vec<(String, EvalValue)> = bindings
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        row_context(&owned, 0).unwrap()
    }

    #[test]
    fn parse_rejects_malformed_expressions() {
        assert!(Expression::parse("age >=").is_err());
        assert!(Expression::parse("age >= 30").is_ok());
    }

    #[test]
    fn variables_lists_identifiers_without_row_number() {
        let expr = Expression::parse("age >= 30 && row_number < 10 && name != \"x\"").unwrap();
        let vars = expr.variables();
        assert!(vars.contains("age"));
        assert!(vars.contains("name"));
        assert!(!vars.contains("row_number"));
    }

    #[test]
    fn check_resolves_against_lookup() {
        let age = ColumnId::new("Age").unwrap();
        let lookup = ColumnLookup::from_ids([&age]);
        assert!(Expression::parse("age > 1").unwrap().check(&lookup).is_ok());
        assert!(
            Expression::parse("row_number > 1")
                .unwrap()
                .check(&lookup)
                .is_ok()
        );
        let err = Expression::parse("height > 1")
            .unwrap()
            .check(&lookup)
            .unwrap_err();
        assert!(matches!(err, TableError::UnknownColumn(_)));
    }

    #[test]
    fn evaluate_bool_is_strict() {
        let context = context_with(&[("age", EvalValue::Int(42))]);
        let ok = Expression::parse("age >= 30").unwrap();
        assert!(ok.evaluate_bool(&context).unwrap());
        let not_bool = Expression::parse("age + 1").unwrap();
        assert!(not_bool.evaluate_bool(&context).is_err());
    }

    #[test]
    fn evaluate_produces_cell_values() {
        let context = context_with(&[("price", EvalValue::Float(2.5))]);
        let expr = Expression::parse("price * 2").unwrap();
        assert_eq!(
            expr.evaluate(&context).unwrap(),
            Some(Value::Number(Decimal::new(5, 0)))
        );
    }

    #[test]
    fn registered_functions_work() {
        let context = context_with(&[("name", EvalValue::String("Ada Lovelace".into()))]);
        let snake = Expression::parse("snake_case(name)").unwrap();
        assert_eq!(
            snake.evaluate(&context).unwrap(),
            Some(Value::Text("ada_lovelace".into()))
        );
        let sub = Expression::parse("substring(name, 0, 3)").unwrap();
        assert_eq!(
            sub.evaluate(&context).unwrap(),
            Some(Value::Text("Ada".into()))
        );
        let diff = Expression::parse("date_diff_days(\"2024-03-01\", \"2024-02-28\")").unwrap();
        assert_eq!(
            diff.evaluate(&context).unwrap(),
            Some(Value::Number(Decimal::from(2)))
        );
        let replaced =
            Expression::parse("regex_replace(name, \"[aeiou]\", \"_\")").unwrap();
        assert_eq!(
            replaced.evaluate(&context).unwrap(),
            Some(Value::Text("Ad_ L_v_l_c_".into()))
        );
    }

    #[test]
    fn missing_binding_surfaces_as_expression_error() {
        let context = context_with(&[]);
        let expr = Expression::parse("age > 1").unwrap();
        assert!(matches!(
            expr.evaluate_bool(&context),
            Err(TableError::Expression(_))
        ));
    }
}
