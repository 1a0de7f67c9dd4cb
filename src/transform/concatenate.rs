//! Table concatenation.
//!
//! Rows of all sources appear in order, located through precomputed
//! cumulative-length boundaries. Columns unify by name with exactly one type
//! per name across all sources; any mismatch is a hard user error, there is
//! no coercion. Values stay with their source table and are fetched on
//! demand.

use std::rc::Rc;

use crate::data::Value;
use crate::error::{Result, TableError};
use crate::recordset::{AlteredState, Column, RecordSet};
use crate::schema::{ColumnId, ColumnType};

use super::row_out_of_range;

/// What to do with a column that is missing from some source tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingColumnPolicy {
    /// Drop the column from the result.
    Omit,
    /// Fill rows from tables without the column with the type's default.
    Default,
    /// Make the column optional; rows from tables without it read as blank.
    WrapMaybe,
}

/// Concatenates the labelled sources. With `source_column` set, a leading
/// text column records which table each row came from.
pub fn concatenate(
    sources: Vec<(String, Rc<dyn RecordSet>)>,
    policy: MissingColumnPolicy,
    source_column: bool,
) -> Result<Rc<dyn RecordSet>> {
    if sources.is_empty() {
        return Err(TableError::User(
            "concatenate needs at least one source table".into(),
        ));
    }
    let mut boundaries = Vec::with_capacity(sources.len());
    let mut total = 0usize;
    for (_, set) in &sources {
        total += set.len()?;
        boundaries.push(total);
    }
    let mut unified: Vec<UnifiedColumn> = Vec::new();
    for (slot, (_, set)) in sources.iter().enumerate() {
        for column in set.columns() {
            let column_type = column.column_type()?;
            match unified
                .iter_mut()
                .find(|candidate| candidate.matches(column.id()))
            {
                Some(existing) => {
                    if existing.column_type != column_type {
                        return Err(TableError::TypeConflict {
                            column: existing.id.to_string(),
                            left: existing.column_type.to_string(),
                            right: column_type.to_string(),
                        });
                    }
                    existing.per_source[slot] = Some(column.clone());
                }
                None => {
                    let mut per_source = vec![None; sources.len()];
                    per_source[slot] = Some(column.clone());
                    unified.push(UnifiedColumn {
                        id: column.id().clone(),
                        column_type,
                        per_source,
                    });
                }
            }
        }
    }

    let shared = Rc::new(ConcatShared {
        boundaries,
        total,
        labels: sources.iter().map(|(label, _)| label.clone()).collect(),
    });
    let mut columns: Vec<Rc<dyn Column>> = Vec::new();
    if source_column {
        let id = source_label_id(&unified)?;
        columns.push(Rc::new(SourceLabelColumn {
            id,
            shared: shared.clone(),
        }));
    }
    for column in unified {
        let complete = column.per_source.iter().all(Option::is_some);
        let (column_type, absent) = if complete {
            (column.column_type, None)
        } else {
            match policy {
                MissingColumnPolicy::Omit => continue,
                MissingColumnPolicy::Default => {
                    let absent = column.column_type.default_value();
                    (column.column_type, absent)
                }
                MissingColumnPolicy::WrapMaybe => {
                    let wrapped = match &column.column_type {
                        ColumnType::Blank | ColumnType::OrBlank(_) => column.column_type.clone(),
                        other => ColumnType::or_blank(other.clone(), "")?,
                    };
                    (wrapped, None)
                }
            }
        };
        columns.push(Rc::new(ConcatColumn {
            id: column.id,
            column_type,
            per_source: column.per_source,
            absent,
            shared: shared.clone(),
        }));
    }
    Ok(Rc::new(ConcatRecordSet { columns, shared }))
}

struct UnifiedColumn {
    id: ColumnId,
    column_type: ColumnType,
    per_source: Vec<Option<Rc<dyn Column>>>,
}

impl UnifiedColumn {
    fn matches(&self, id: &ColumnId) -> bool {
        crate::data::normalize_column_name(self.id.as_str())
            == crate::data::normalize_column_name(id.as_str())
    }
}

fn source_label_id(unified: &[UnifiedColumn]) -> Result<ColumnId> {
    let mut candidate = "Source".to_string();
    let mut counter = 1usize;
    while unified.iter().any(|column| {
        crate::data::normalize_column_name(column.id.as_str())
            == crate::data::normalize_column_name(&candidate)
    }) {
        candidate = format!("Source_{counter}");
        counter += 1;
    }
    ColumnId::new(&candidate)
}

struct ConcatShared {
    /// Cumulative end offsets, one per source.
    boundaries: Vec<usize>,
    total: usize,
    labels: Vec<String>,
}

impl ConcatShared {
    /// Locates `row` as (source slot, local row).
    fn locate(&self, row: usize) -> Result<(usize, usize)> {
        if row >= self.total {
            return Err(row_out_of_range(row, self.total));
        }
        let slot = self.boundaries.partition_point(|end| *end <= row);
        let start = if slot == 0 {
            0
        } else {
            self.boundaries[slot - 1]
        };
        Ok((slot, row - start))
    }
}

struct ConcatColumn {
    id: ColumnId,
    column_type: ColumnType,
    per_source: Vec<Option<Rc<dyn Column>>>,
    /// Value for rows from tables without this column (`Default` policy).
    absent: Option<Value>,
    shared: Rc<ConcatShared>,
}

impl Column for ConcatColumn {
    fn id(&self) -> &ColumnId {
        &self.id
    }

    fn column_type(&self) -> Result<ColumnType> {
        Ok(self.column_type.clone())
    }

    fn value(&self, row: usize) -> Result<Option<Value>> {
        let (slot, local) = self.shared.locate(row)?;
        match &self.per_source[slot] {
            Some(column) => column.value(local),
            None => Ok(self.absent.clone()),
        }
    }

    fn altered_state(&self) -> AlteredState {
        AlteredState::FilteredOrReordered
    }
}

struct SourceLabelColumn {
    id: ColumnId,
    shared: Rc<ConcatShared>,
}

impl Column for SourceLabelColumn {
    fn id(&self) -> &ColumnId {
        &self.id
    }

    fn column_type(&self) -> Result<ColumnType> {
        Ok(ColumnType::Text)
    }

    fn value(&self, row: usize) -> Result<Option<Value>> {
        let (slot, _) = self.shared.locate(row)?;
        Ok(Some(Value::Text(self.shared.labels[slot].clone())))
    }

    fn altered_state(&self) -> AlteredState {
        AlteredState::FilteredOrReordered
    }
}

struct ConcatRecordSet {
    columns: Vec<Rc<dyn Column>>,
    shared: Rc<ConcatShared>,
}

impl RecordSet for ConcatRecordSet {
    fn columns(&self) -> &[Rc<dyn Column>] {
        &self.columns
    }

    fn len(&self) -> Result<usize> {
        Ok(self.shared.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recordset::MaterialRecordSet;
    use crate::schema::{ColumnInfo, NumericFormat};

    fn set(columns: Vec<(&str, ColumnType)>, rows: &[&[&str]]) -> Rc<dyn RecordSet> {
        let infos = columns
            .into_iter()
            .map(|(id, ty)| ColumnInfo::new(ColumnId::new(id).unwrap(), ty))
            .collect::<Vec<_>>();
        let grid = rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect::<Vec<_>>();
        Rc::new(MaterialRecordSet::from_grid(&infos, &grid).unwrap())
    }

    fn texts(result: &Rc<dyn RecordSet>, id: &str) -> Vec<String> {
        let column = result.column(&ColumnId::new(id).unwrap()).unwrap();
        (0..result.len().unwrap())
            .map(|row| {
                column
                    .value(row)
                    .unwrap()
                    .map(|value| value.as_display())
                    .unwrap_or_default()
            })
            .collect()
    }

    fn numeric() -> ColumnType {
        ColumnType::Numeric(NumericFormat::default())
    }

    #[test]
    fn rows_delegate_through_boundaries() {
        let first = set(vec![("Name", ColumnType::Text)], &[&["a"], &["b"]]);
        let second = set(vec![("Name", ColumnType::Text)], &[&["c"], &["d"], &["e"]]);
        let result = concatenate(
            vec![("t1".into(), first), ("t2".into(), second)],
            MissingColumnPolicy::Omit,
            false,
        )
        .unwrap();
        assert_eq!(result.len().unwrap(), 5);
        assert_eq!(texts(&result, "Name"), vec!["a", "b", "c", "d", "e"]);
        let name = result.column(&ColumnId::new("Name").unwrap()).unwrap();
        assert!(matches!(
            name.value(5).unwrap_err(),
            TableError::Fetch { row: 5, .. }
        ));
    }

    #[test]
    fn conflicting_types_name_column_and_types() {
        let first = set(vec![("X", ColumnType::Text)], &[&["a"]]);
        let second = set(vec![("X", numeric())], &[&["1"]]);
        let err = concatenate(
            vec![("t1".into(), first), ("t2".into(), second)],
            MissingColumnPolicy::Omit,
            false,
        )
        .unwrap_err();
        let TableError::TypeConflict { column, left, right } = &err else {
            panic!("expected type conflict, got {err:?}");
        };
        assert_eq!(column, "X");
        assert!(left.contains("text"));
        assert!(right.contains("numeric"));
        assert!(err.is_user());
    }

    #[test]
    fn omit_drops_partial_columns() {
        let first = set(
            vec![("Name", ColumnType::Text), ("Extra", numeric())],
            &[&["a", "1"]],
        );
        let second = set(vec![("Name", ColumnType::Text)], &[&["b"]]);
        let result = concatenate(
            vec![("t1".into(), first), ("t2".into(), second)],
            MissingColumnPolicy::Omit,
            false,
        )
        .unwrap();
        assert_eq!(result.columns().len(), 1);
        assert_eq!(result.columns()[0].id().as_str(), "Name");
    }

    #[test]
    fn default_fills_missing_cells() {
        let first = set(
            vec![("Name", ColumnType::Text), ("Extra", numeric())],
            &[&["a", "7"]],
        );
        let second = set(vec![("Name", ColumnType::Text)], &[&["b"]]);
        let result = concatenate(
            vec![("t1".into(), first), ("t2".into(), second)],
            MissingColumnPolicy::Default,
            false,
        )
        .unwrap();
        assert_eq!(texts(&result, "Extra"), vec!["7", "0"]);
    }

    #[test]
    fn wrap_maybe_blanks_missing_cells() {
        let first = set(
            vec![("Name", ColumnType::Text), ("Extra", numeric())],
            &[&["a", "7"]],
        );
        let second = set(vec![("Name", ColumnType::Text)], &[&["b"]]);
        let result = concatenate(
            vec![("t1".into(), first), ("t2".into(), second)],
            MissingColumnPolicy::WrapMaybe,
            false,
        )
        .unwrap();
        let extra = result.column(&ColumnId::new("Extra").unwrap()).unwrap();
        assert!(matches!(
            extra.column_type().unwrap(),
            ColumnType::OrBlank(_)
        ));
        assert!(extra.value(0).unwrap().is_some());
        assert!(extra.value(1).unwrap().is_none());
    }

    #[test]
    fn source_labels_prepend_a_text_column() {
        let first = set(vec![("Name", ColumnType::Text)], &[&["a"]]);
        let second = set(vec![("Name", ColumnType::Text)], &[&["b"], &["c"]]);
        let result = concatenate(
            vec![("left".into(), first), ("right".into(), second)],
            MissingColumnPolicy::Omit,
            true,
        )
        .unwrap();
        assert_eq!(result.columns()[0].id().as_str(), "Source");
        assert_eq!(texts(&result, "Source"), vec!["left", "right", "right"]);
    }

    #[test]
    fn empty_source_list_is_rejected() {
        let err = concatenate(Vec::new(), MissingColumnPolicy::Omit, false).unwrap_err();
        assert!(matches!(err, TableError::User(_)));
    }

    #[test]
    fn empty_tables_contribute_no_rows() {
        let first = set(vec![("Name", ColumnType::Text)], &[]);
        let second = set(vec![("Name", ColumnType::Text)], &[&["x"]]);
        let result = concatenate(
            vec![("t1".into(), first), ("t2".into(), second)],
            MissingColumnPolicy::Omit,
            false,
        )
        .unwrap();
        assert_eq!(result.len().unwrap(), 1);
        assert_eq!(texts(&result, "Name"), vec!["x"]);
    }
}
