//! Calculated columns.
//!
//! Source columns pass through untouched; a calculation whose name matches a
//! source column overrides it in place, anything else is appended in declared
//! order. Each expression is checked at construction against the source
//! columns plus the calculations declared before it, so later calculations
//! can build on earlier ones. A failed check turns only that column into an
//! error column; its siblings keep working.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

use crate::data::{
    DATE_FORMATS, DATETIME_FORMATS, TIME_FORMATS, Value, normalize_column_name, value_to_evalexpr,
};
use crate::error::{Result, TableError};
use crate::expr::{ColumnLookup, Expression, row_context};
use crate::recordset::{AlteredState, Column, RecordSet};
use crate::schema::{
    BooleanTokens, ColumnId, ColumnType, DateFormat, DateKind, NumericFormat,
};

use super::{lookup_for, row_out_of_range};

#[derive(Debug, Clone)]
pub struct Calculation {
    pub id: ColumnId,
    pub expression: Expression,
}

impl Calculation {
    pub fn new(id: ColumnId, expression: Expression) -> Self {
        Calculation { id, expression }
    }
}

/// Wraps `source` with the given calculated columns.
pub fn calculate(
    source: Rc<dyn RecordSet>,
    calculations: Vec<Calculation>,
) -> Result<Rc<dyn RecordSet>> {
    let mut seen = HashSet::new();
    for calc in &calculations {
        if !seen.insert(normalize_column_name(calc.id.as_str())) {
            return Err(TableError::User(format!(
                "duplicate calculated column '{}'",
                calc.id
            )));
        }
    }
    let mut lookup = lookup_for(&source);
    let mut checked = Vec::with_capacity(calculations.len());
    for calc in calculations {
        let identifiers = calc.expression.variables();
        let check = calc.expression.check(&lookup);
        checked.push(CheckedCalculation {
            id: calc.id.clone(),
            expression: calc.expression,
            identifiers,
            lookup: lookup.clone(),
            check,
        });
        lookup.insert(&calc.id);
    }
    let shared = Rc::new(CalcShared {
        source: source.clone(),
        calculations: checked,
    });

    let mut columns: Vec<Rc<dyn Column>> = Vec::new();
    for column in source.columns() {
        match position_of(&shared, column.id()) {
            Some(index) => columns.push(calculated_column(&shared, index)),
            None => columns.push(column.clone()),
        }
    }
    for index in 0..shared.calculations.len() {
        let id = &shared.calculations[index].id;
        let overrides_source = source
            .columns()
            .iter()
            .any(|column| same_name(column.id(), id));
        if !overrides_source {
            columns.push(calculated_column(&shared, index));
        }
    }
    Ok(Rc::new(CalculatedRecordSet { source, columns }))
}

fn same_name(a: &ColumnId, b: &ColumnId) -> bool {
    normalize_column_name(a.as_str()) == normalize_column_name(b.as_str())
}

fn position_of(shared: &Rc<CalcShared>, id: &ColumnId) -> Option<usize> {
    shared
        .calculations
        .iter()
        .position(|calc| same_name(&calc.id, id))
}

fn calculated_column(shared: &Rc<CalcShared>, index: usize) -> Rc<dyn Column> {
    Rc::new(CalculatedColumn {
        id: shared.calculations[index].id.clone(),
        index,
        shared: shared.clone(),
        inferred: RefCell::new(None),
    })
}

struct CheckedCalculation {
    id: ColumnId,
    expression: Expression,
    identifiers: BTreeSet<String>,
    /// Source columns plus calculations declared before this one.
    lookup: ColumnLookup,
    check: Result<()>,
}

struct CalcShared {
    source: Rc<dyn RecordSet>,
    calculations: Vec<CheckedCalculation>,
}

impl CalcShared {
    /// Evaluates calculation `index` at `row`. Identifiers naming an earlier
    /// calculation bind its computed value, so an overridden name means the
    /// new value, not the source cell.
    fn evaluate(&self, index: usize, row: usize) -> Result<Option<Value>> {
        let calc = &self.calculations[index];
        calc.check.clone()?;
        if !self.source.index_valid(row)? {
            return Err(row_out_of_range(row, self.source.len()?));
        }
        let mut bindings = Vec::with_capacity(calc.identifiers.len());
        for identifier in &calc.identifiers {
            let Some(id) = calc.lookup.resolve(identifier) else {
                continue;
            };
            let value = match self.calculations[..index]
                .iter()
                .position(|earlier| same_name(&earlier.id, id))
            {
                Some(earlier) => self.evaluate(earlier, row)?,
                None => {
                    let column = self.source.column(id).ok_or_else(|| {
                        TableError::internal(format!("checked column '{id}' disappeared"))
                    })?;
                    column.value(row)?
                }
            };
            bindings.push((identifier.clone(), value_to_evalexpr(&value)));
        }
        let context = row_context(&bindings, row)?;
        calc.expression.evaluate(&context)
    }
}

struct CalculatedColumn {
    id: ColumnId,
    index: usize,
    shared: Rc<CalcShared>,
    inferred: RefCell<Option<ColumnType>>,
}

impl Column for CalculatedColumn {
    fn id(&self) -> &ColumnId {
        &self.id
    }

    /// Inferred from the first row's value and memoized; an empty source
    /// types as text. Evaluation errors are reported but not cached.
    fn column_type(&self) -> Result<ColumnType> {
        self.shared.calculations[self.index].check.clone()?;
        if let Some(inferred) = self.inferred.borrow().as_ref() {
            return Ok(inferred.clone());
        }
        let inferred = if self.shared.source.is_empty()? {
            ColumnType::Text
        } else {
            match self.shared.evaluate(self.index, 0)? {
                Some(value) => type_for_value(&value),
                None => ColumnType::Text,
            }
        };
        *self.inferred.borrow_mut() = Some(inferred.clone());
        Ok(inferred)
    }

    fn value(&self, row: usize) -> Result<Option<Value>> {
        self.shared.evaluate(self.index, row)
    }

    fn altered_state(&self) -> AlteredState {
        AlteredState::Overwritten
    }
}

fn type_for_value(value: &Value) -> ColumnType {
    match value {
        Value::Text(_) => ColumnType::Text,
        Value::Number(number) => ColumnType::Numeric(NumericFormat {
            min_decimal_places: number.scale(),
            ..NumericFormat::default()
        }),
        Value::Bool(_) => ColumnType::Boolean(BooleanTokens::new("true", "false")),
        Value::Date(_) => ColumnType::Date(DateFormat::new(DateKind::Date, DATE_FORMATS[0])),
        Value::Time(_) => ColumnType::Date(DateFormat::new(DateKind::Time, TIME_FORMATS[0])),
        Value::DateTime(_) => {
            ColumnType::Date(DateFormat::new(DateKind::DateTime, DATETIME_FORMATS[0]))
        }
    }
}

struct CalculatedRecordSet {
    source: Rc<dyn RecordSet>,
    columns: Vec<Rc<dyn Column>>,
}

impl RecordSet for CalculatedRecordSet {
    fn columns(&self) -> &[Rc<dyn Column>] {
        &self.columns
    }

    fn len(&self) -> Result<usize> {
        self.source.len()
    }
}
