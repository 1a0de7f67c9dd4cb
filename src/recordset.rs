//! Lazy columnar record sets.
//!
//! A [`RecordSet`] is an ordered collection of named, typed columns whose
//! cells are computed on demand. Imported grids are backed by
//! [`MaterialRecordSet`]: raw strings kept per column, parsed against the
//! column type at fetch time so malformed cells surface as row-level errors
//! exactly when read.

use std::rc::Rc;

use crate::data::{Value, parse_cell};
use crate::error::{Result, TableError};
use crate::schema::{ColumnId, ColumnInfo, ColumnType};

/// How a column relates to the table it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlteredState {
    Unaltered,
    Overwritten,
    FilteredOrReordered,
}

pub trait Column {
    fn id(&self) -> &ColumnId;

    /// May fail for error columns (e.g. a calculation that failed its check).
    fn column_type(&self) -> Result<ColumnType>;

    /// Lazily computes the cell at `row`. Blank cells are `Ok(None)`.
    fn value(&self, row: usize) -> Result<Option<Value>>;

    fn altered_state(&self) -> AlteredState;
}

pub trait RecordSet {
    fn columns(&self) -> &[Rc<dyn Column>];

    /// Row count. May require computation: a filtered set scans its source
    /// to exhaustion the first time this is called.
    fn len(&self) -> Result<usize>;

    /// Whether `row` exists, filling only as far as needed.
    fn index_valid(&self, row: usize) -> Result<bool> {
        Ok(row < self.len()?)
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn column(&self, id: &ColumnId) -> Option<Rc<dyn Column>> {
        self.columns().iter().find(|column| column.id() == id).cloned()
    }
}

impl std::fmt::Debug for dyn RecordSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSet").finish_non_exhaustive()
    }
}

/// A stored column: raw cell text plus the type to parse it with.
pub struct MaterialColumn {
    id: ColumnId,
    column_type: ColumnType,
    cells: Vec<String>,
}

impl MaterialColumn {
    pub fn new(info: ColumnInfo, cells: Vec<String>) -> Self {
        MaterialColumn {
            id: info.id,
            column_type: info.column_type,
            cells,
        }
    }
}

impl Column for MaterialColumn {
    fn id(&self) -> &ColumnId {
        &self.id
    }

    fn column_type(&self) -> Result<ColumnType> {
        Ok(self.column_type.clone())
    }

    fn value(&self, row: usize) -> Result<Option<Value>> {
        let raw = self.cells.get(row).ok_or_else(|| {
            TableError::fetch(row, format!("row beyond column '{}'", self.id))
        })?;
        parse_cell(raw, &self.column_type, row)
    }

    fn altered_state(&self) -> AlteredState {
        AlteredState::Unaltered
    }
}

pub struct MaterialRecordSet {
    columns: Vec<Rc<dyn Column>>,
    rows: usize,
}

impl MaterialRecordSet {
    /// Builds from a trimmed grid. Short rows pad with blank cells; duplicate
    /// column ids are rejected.
    pub fn from_grid(infos: &[ColumnInfo], grid: &[Vec<String>]) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for info in infos {
            if !seen.insert(&info.id) {
                return Err(TableError::User(format!(
                    "duplicate column '{}'",
                    info.id
                )));
            }
        }
        let columns = infos
            .iter()
            .enumerate()
            .map(|(index, info)| {
                let cells = grid
                    .iter()
                    .map(|row| row.get(index).cloned().unwrap_or_default())
                    .collect();
                Rc::new(MaterialColumn::new(info.clone(), cells)) as Rc<dyn Column>
            })
            .collect();
        Ok(MaterialRecordSet {
            columns,
            rows: grid.len(),
        })
    }
}

impl RecordSet for MaterialRecordSet {
    fn columns(&self) -> &[Rc<dyn Column>] {
        &self.columns
    }

    fn len(&self) -> Result<usize> {
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NumericFormat;
    use rust_decimal::Decimal;

    fn grid(cells: &[&[&str]]) -> Vec<Vec<String>> {
        cells
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    fn infos() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new(ColumnId::new("Name").unwrap(), ColumnType::Text),
            ColumnInfo::new(
                ColumnId::new("Age").unwrap(),
                ColumnType::or_blank(ColumnType::Numeric(NumericFormat::default()), "NA")
                    .unwrap(),
            ),
        ]
    }

    #[test]
    fn cells_parse_on_demand() {
        let set =
            MaterialRecordSet::from_grid(&infos(), &grid(&[&["Alice", "30"], &["Bob", "NA"]]))
                .unwrap();
        assert_eq!(set.len().unwrap(), 2);
        assert!(set.index_valid(1).unwrap());
        assert!(!set.index_valid(2).unwrap());

        let age = set.column(&ColumnId::new("Age").unwrap()).unwrap();
        assert_eq!(
            age.value(0).unwrap(),
            Some(Value::Number(Decimal::from(30)))
        );
        assert_eq!(age.value(1).unwrap(), None);
        assert_eq!(age.altered_state(), AlteredState::Unaltered);
    }

    #[test]
    fn malformed_cells_fail_per_fetch() {
        let set =
            MaterialRecordSet::from_grid(&infos(), &grid(&[&["Alice", "old"]])).unwrap();
        let age = set.column(&ColumnId::new("Age").unwrap()).unwrap();
        let err = age.value(0).unwrap_err();
        assert!(matches!(err, TableError::Fetch { row: 0, .. }));
        // a second fetch recomputes and fails the same way
        assert_eq!(age.value(0).unwrap_err(), err);
        // sibling cells are unaffected
        let name = set.column(&ColumnId::new("Name").unwrap()).unwrap();
        assert_eq!(name.value(0).unwrap(), Some(Value::Text("Alice".into())));
    }

    #[test]
    fn short_rows_pad_blank() {
        let set = MaterialRecordSet::from_grid(&infos(), &grid(&[&["Alice"]])).unwrap();
        let age = set.column(&ColumnId::new("Age").unwrap()).unwrap();
        assert_eq!(age.value(0).unwrap(), None);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let twice = vec![
            ColumnInfo::new(ColumnId::new("A").unwrap(), ColumnType::Text),
            ColumnInfo::new(ColumnId::new("A").unwrap(), ColumnType::Text),
        ];
        assert!(MaterialRecordSet::from_grid(&twice, &grid(&[&["x", "y"]])).is_err());
    }

    #[test]
    fn out_of_range_rows_error() {
        let set = MaterialRecordSet::from_grid(&infos(), &grid(&[&["Alice", "1"]])).unwrap();
        let name = set.column(&ColumnId::new("Name").unwrap()).unwrap();
        assert!(matches!(
            name.value(5).unwrap_err(),
            TableError::Fetch { row: 5, .. }
        ));
    }
}
