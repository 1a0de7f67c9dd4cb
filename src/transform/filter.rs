//! Row filtering.
//!
//! The index map (destination row -> source row) grows forward only, one
//! source row at a time. A row whose predicate raises a user-level error is
//! kept, and the error replays on every later fetch of that row. The
//! predicate's identifier check runs once, lazily, and its failure is sticky.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::data::Value;
use crate::error::{Result, TableError};
use crate::expr::{ColumnLookup, Expression, row_context};
use crate::recordset::{AlteredState, Column, RecordSet};
use crate::schema::{ColumnId, ColumnType};

use super::{bind_columns, lookup_for, row_out_of_range};

/// Wraps `source` so only rows satisfying `predicate` remain. Construction
/// never fails; problems surface on first row access.
pub fn filter(source: Rc<dyn RecordSet>, predicate: Expression) -> Rc<dyn RecordSet> {
    let lookup = lookup_for(&source);
    let identifiers = predicate.variables();
    let state = Rc::new(RefCell::new(FilterState {
        source: source.clone(),
        predicate,
        lookup,
        identifiers,
        checked: None,
        index_map: Vec::new(),
        row_errors: HashMap::new(),
        next_source_row: 0,
        source_exhausted: false,
    }));
    let columns = source
        .columns()
        .iter()
        .map(|column| {
            Rc::new(FilteredColumn {
                inner: column.clone(),
                state: state.clone(),
            }) as Rc<dyn Column>
        })
        .collect();
    Rc::new(FilteredRecordSet { columns, state })
}

struct FilterState {
    source: Rc<dyn RecordSet>,
    predicate: Expression,
    lookup: ColumnLookup,
    identifiers: BTreeSet<String>,
    checked: Option<Result<()>>,
    index_map: Vec<usize>,
    row_errors: HashMap<usize, TableError>,
    next_source_row: usize,
    source_exhausted: bool,
}

impl FilterState {
    fn ensure_checked(&mut self) -> Result<()> {
        if self.checked.is_none() {
            self.checked = Some(self.predicate.check(&self.lookup));
        }
        match &self.checked {
            Some(result) => result.clone(),
            None => Ok(()),
        }
    }

    /// Examines further source rows until the index map holds `needed`
    /// entries or the source runs out. Each source row is examined once.
    fn fill_to_len(&mut self, needed: usize) -> Result<()> {
        self.ensure_checked()?;
        while self.index_map.len() < needed && !self.source_exhausted {
            let row = self.next_source_row;
            if !self.source.index_valid(row)? {
                self.source_exhausted = true;
                break;
            }
            self.next_source_row += 1;
            match self.evaluate_row(row) {
                Ok(true) => self.index_map.push(row),
                Ok(false) => {}
                Err(err) if err.is_internal() => return Err(err),
                Err(err) => {
                    // kept, with the error replayed on later fetches
                    self.row_errors.insert(row, err);
                    self.index_map.push(row);
                }
            }
        }
        Ok(())
    }

    fn evaluate_row(&self, row: usize) -> Result<bool> {
        let bindings = bind_columns(&self.source, &self.lookup, &self.identifiers, row)?;
        let context = row_context(&bindings, row)?;
        self.predicate.evaluate_bool(&context)
    }

    fn fill_all(&mut self) -> Result<usize> {
        self.ensure_checked()?;
        while !self.source_exhausted {
            let goal = self.index_map.len() + 1;
            self.fill_to_len(goal)?;
            if self.index_map.len() < goal {
                break;
            }
        }
        Ok(self.index_map.len())
    }

    fn resolve(&mut self, row: usize) -> Result<usize> {
        self.fill_to_len(row + 1)?;
        match self.index_map.get(row) {
            Some(source_row) => {
                if let Some(err) = self.row_errors.get(source_row) {
                    return Err(err.clone());
                }
                Ok(*source_row)
            }
            None => Err(row_out_of_range(row, self.index_map.len())),
        }
    }
}

struct FilteredColumn {
    inner: Rc<dyn Column>,
    state: Rc<RefCell<FilterState>>,
}

impl Column for FilteredColumn {
    fn id(&self) -> &ColumnId {
        self.inner.id()
    }

    fn column_type(&self) -> Result<ColumnType> {
        self.inner.column_type()
    }

    fn value(&self, row: usize) -> Result<Option<Value>> {
        let source_row = self.state.borrow_mut().resolve(row)?;
        self.inner.value(source_row)
    }

    fn altered_state(&self) -> AlteredState {
        AlteredState::FilteredOrReordered
    }
}

struct FilteredRecordSet {
    columns: Vec<Rc<dyn Column>>,
    state: Rc<RefCell<FilterState>>,
}

impl RecordSet for FilteredRecordSet {
    fn columns(&self) -> &[Rc<dyn Column>] {
        &self.columns
    }

    fn len(&self) -> Result<usize> {
        self.state.borrow_mut().fill_all()
    }

    fn index_valid(&self, row: usize) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.fill_to_len(row + 1)?;
        Ok(row < state.index_map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recordset::MaterialRecordSet;
    use crate::schema::{ColumnInfo, NumericFormat};
    use std::cell::Cell;

    fn people() -> Rc<dyn RecordSet> {
        let columns = vec![
            ColumnInfo::new(ColumnId::new("Name").unwrap(), ColumnType::Text),
            ColumnInfo::new(
                ColumnId::new("Age").unwrap(),
                ColumnType::Numeric(NumericFormat::default()),
            ),
        ];
        let grid = vec![
            vec!["Alice".to_string(), "30".to_string()],
            vec!["Bob".to_string(), "5".to_string()],
            vec!["Cara".to_string(), "22".to_string()],
        ];
        Rc::new(MaterialRecordSet::from_grid(&columns, &grid).unwrap())
    }

    fn text(value: Result<Option<Value>>) -> String {
        value.unwrap().unwrap().as_display()
    }

    #[test]
    fn keeps_matching_rows_in_order() {
        let filtered = filter(people(), Expression::parse("Age > 10").unwrap());
        assert_eq!(filtered.len().unwrap(), 2);
        let name = filtered.column(&ColumnId::new("Name").unwrap()).unwrap();
        assert_eq!(text(name.value(0)), "Alice");
        assert_eq!(text(name.value(1)), "Cara");
        assert_eq!(name.altered_state(), AlteredState::FilteredOrReordered);
        assert!(filtered.index_valid(1).unwrap());
        assert!(!filtered.index_valid(2).unwrap());
    }

    #[test]
    fn beyond_end_is_a_fetch_error() {
        let filtered = filter(people(), Expression::parse("Age > 10").unwrap());
        let name = filtered.column(&ColumnId::new("Name").unwrap()).unwrap();
        let err = name.value(2).unwrap_err();
        assert!(matches!(err, TableError::Fetch { row: 2, .. }));
    }

    /// A column that counts how often each cell is fetched.
    struct CountingColumn {
        id: ColumnId,
        cells: Vec<String>,
        fetches: Rc<Cell<usize>>,
    }

    impl Column for CountingColumn {
        fn id(&self) -> &ColumnId {
            &self.id
        }

        fn column_type(&self) -> Result<ColumnType> {
            Ok(ColumnType::Numeric(NumericFormat::default()))
        }

        fn value(&self, row: usize) -> Result<Option<Value>> {
            self.fetches.set(self.fetches.get() + 1);
            let cell = self
                .cells
                .get(row)
                .ok_or_else(|| TableError::fetch(row, "row beyond column"))?;
            crate::data::parse_cell(cell, &ColumnType::Numeric(NumericFormat::default()), row)
        }

        fn altered_state(&self) -> AlteredState {
            AlteredState::Unaltered
        }
    }

    struct CountingSet {
        columns: Vec<Rc<dyn Column>>,
        rows: usize,
    }

    impl RecordSet for CountingSet {
        fn columns(&self) -> &[Rc<dyn Column>] {
            &self.columns
        }

        fn len(&self) -> Result<usize> {
            Ok(self.rows)
        }
    }

    #[test]
    fn source_rows_examined_at_most_once() {
        let fetches = Rc::new(Cell::new(0));
        let column = Rc::new(CountingColumn {
            id: ColumnId::new("n").unwrap(),
            cells: vec!["1".into(), "2".into(), "3".into(), "4".into()],
            fetches: fetches.clone(),
        });
        let source = Rc::new(CountingSet {
            columns: vec![column.clone() as Rc<dyn Column>],
            rows: 4,
        });
        let filtered = filter(source, Expression::parse("n > 1").unwrap());

        let wrapped = filtered.column(&ColumnId::new("n").unwrap()).unwrap();
        assert_eq!(text(wrapped.value(1)), "3");
        // examining source rows 0..=2 plus re-reading the kept cell
        let after_first = fetches.get();
        assert_eq!(text(wrapped.value(1)), "3");
        // the second request re-reads the cell but re-examines nothing
        assert_eq!(fetches.get(), after_first + 1);
    }

    #[test]
    fn predicate_errors_keep_the_row() {
        let columns = vec![ColumnInfo::new(
            ColumnId::new("Age").unwrap(),
            ColumnType::Numeric(NumericFormat::default()),
        )];
        let grid = vec![
            vec!["30".to_string()],
            vec!["oops".to_string()],
            vec!["7".to_string()],
        ];
        let source: Rc<dyn RecordSet> =
            Rc::new(MaterialRecordSet::from_grid(&columns, &grid).unwrap());
        let filtered = filter(source, Expression::parse("Age > 10").unwrap());

        // all of row 0 (true), row 1 (error, kept), row 2 dropped (false)
        assert_eq!(filtered.len().unwrap(), 2);
        let age = filtered.column(&ColumnId::new("Age").unwrap()).unwrap();
        assert_eq!(text(age.value(0)), "30");
        let err = age.value(1).unwrap_err();
        assert!(matches!(err, TableError::Fetch { row: 1, .. }));
        // the error replays on each fetch of that row
        assert!(age.value(1).is_err());
    }

    #[test]
    fn unknown_identifier_fails_the_check_stickily() {
        let filtered = filter(people(), Expression::parse("Salary > 10").unwrap());
        let first = filtered.len().unwrap_err();
        assert!(matches!(first, TableError::UnknownColumn(_)));
        let second = filtered.len().unwrap_err();
        assert_eq!(first, second);
    }
}
