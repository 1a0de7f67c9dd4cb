//! Multi-key sorting.
//!
//! Destination rows are produced by tournament selection: the remaining
//! source rows live in a linked list threaded through a flat array, and each
//! fill scans it for the minimum under the multi-key comparator, unlinks it,
//! and appends its index to the sort map. The map never shrinks or rewrites;
//! a destination index resolves to the same source index forever.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::data::{ComparableValue, Value};
use crate::error::{Result, TableError};
use crate::recordset::{AlteredState, Column, RecordSet};
use crate::schema::{ColumnId, ColumnType};

use super::row_out_of_range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub column: ColumnId,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn ascending(column: ColumnId) -> Self {
        SortKey {
            column,
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(column: ColumnId) -> Self {
        SortKey {
            column,
            direction: SortDirection::Descending,
        }
    }
}

/// Wraps `source` reordered by `keys`. Unknown key columns fail here, at
/// construction.
pub fn sort(source: Rc<dyn RecordSet>, keys: Vec<SortKey>) -> Result<Rc<dyn RecordSet>> {
    if keys.is_empty() {
        return Err(TableError::User("sort needs at least one key column".into()));
    }
    let resolved = keys
        .into_iter()
        .map(|key| {
            source
                .column(&key.column)
                .map(|column| ResolvedKey {
                    column,
                    direction: key.direction,
                })
                .ok_or_else(|| TableError::UnknownColumn(key.column.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    let state = Rc::new(RefCell::new(SortState {
        source: source.clone(),
        keys: resolved,
        sort_map: Vec::new(),
        remaining: Remaining::Unstarted,
    }));
    let columns = source
        .columns()
        .iter()
        .map(|column| {
            Rc::new(SortedColumn {
                inner: column.clone(),
                state: state.clone(),
            }) as Rc<dyn Column>
        })
        .collect();
    Ok(Rc::new(SortedRecordSet { source, columns, state }))
}

struct ResolvedKey {
    column: Rc<dyn Column>,
    direction: SortDirection,
}

/// Source rows not yet placed. Slot 0 of the array is the list head, entry
/// `i` stands for source row `i - 1`, and a link of 0 terminates. Exhaustion
/// replaces the arena outright; taking from an exhausted arena is a bug.
enum Remaining {
    Unstarted,
    Active(LinkedRows),
    Exhausted,
}

struct LinkedRows {
    next: Vec<usize>,
}

impl LinkedRows {
    fn new(total: usize) -> Self {
        let mut next: Vec<usize> = (1..=total).collect();
        next.push(0);
        LinkedRows { next }
    }
}

struct SortState {
    source: Rc<dyn RecordSet>,
    keys: Vec<ResolvedKey>,
    sort_map: Vec<usize>,
    remaining: Remaining,
}

impl SortState {
    /// Unlinks and returns the minimum remaining source row. Ties resolve to
    /// the earliest source row because the scan only replaces on strictly
    /// smaller keys.
    fn take_min(&mut self) -> Result<usize> {
        if let Remaining::Unstarted = self.remaining {
            let total = self.source.len()?;
            self.remaining = Remaining::Active(LinkedRows::new(total));
        }
        let keys = &self.keys;
        let list = match &mut self.remaining {
            Remaining::Active(list) => list,
            Remaining::Exhausted => {
                return Err(TableError::internal("sort arena already exhausted"));
            }
            Remaining::Unstarted => {
                return Err(TableError::internal("sort arena not initialized"));
            }
        };
        let mut best_prev = 0usize;
        let mut best = list.next[0];
        if best == 0 {
            return Err(TableError::internal("sort arena empty but not exhausted"));
        }
        let mut prev = best;
        let mut cursor = list.next[best];
        while cursor != 0 {
            if compare_rows(keys, cursor - 1, best - 1)? == Ordering::Less {
                best_prev = prev;
                best = cursor;
            }
            prev = cursor;
            cursor = list.next[cursor];
        }
        list.next[best_prev] = list.next[best];
        let row = best - 1;
        if list.next[0] == 0 {
            self.remaining = Remaining::Exhausted;
        }
        Ok(row)
    }

    fn fill_to(&mut self, target: usize) -> Result<usize> {
        let total = self.source.len()?;
        let needed = (target + 1).min(total);
        while self.sort_map.len() < needed {
            let row = self.take_min()?;
            self.sort_map.push(row);
        }
        Ok(total)
    }

    fn resolve(&mut self, row: usize) -> Result<usize> {
        let total = self.fill_to(row)?;
        match self.sort_map.get(row) {
            Some(source_row) => Ok(*source_row),
            None => Err(row_out_of_range(row, total)),
        }
    }
}

/// Key-tuple comparison, left column first. A broken cell sorts before any
/// readable one regardless of direction; two broken cells order by message
/// text so the result stays deterministic. Internal errors abort the sort.
fn compare_rows(keys: &[ResolvedKey], a: usize, b: usize) -> Result<Ordering> {
    for key in keys {
        let ordering = match (key.column.value(a), key.column.value(b)) {
            (Err(left), Err(right)) => {
                if left.is_internal() {
                    return Err(left);
                }
                if right.is_internal() {
                    return Err(right);
                }
                left.to_string().cmp(&right.to_string())
            }
            (Err(left), Ok(_)) => {
                if left.is_internal() {
                    return Err(left);
                }
                Ordering::Less
            }
            (Ok(_), Err(right)) => {
                if right.is_internal() {
                    return Err(right);
                }
                Ordering::Greater
            }
            (Ok(left), Ok(right)) => {
                let natural = ComparableValue(left).cmp(&ComparableValue(right));
                match key.direction {
                    SortDirection::Ascending => natural,
                    SortDirection::Descending => natural.reverse(),
                }
            }
        };
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

struct SortedColumn {
    inner: Rc<dyn Column>,
    state: Rc<RefCell<SortState>>,
}

impl Column for SortedColumn {
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

struct SortedRecordSet {
    source: Rc<dyn RecordSet>,
    columns: Vec<Rc<dyn Column>>,
    state: Rc<RefCell<SortState>>,
}

impl RecordSet for SortedRecordSet {
    fn columns(&self) -> &[Rc<dyn Column>] {
        &self.columns
    }

    fn len(&self) -> Result<usize> {
        self.source.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recordset::MaterialRecordSet;
    use crate::schema::{ColumnInfo, NumericFormat};

    fn table(names: &[&str], values: &[&str]) -> Rc<dyn RecordSet> {
        let columns = vec![
            ColumnInfo::new(ColumnId::new("Name").unwrap(), ColumnType::Text),
            ColumnInfo::new(
                ColumnId::new("Value").unwrap(),
                ColumnType::Numeric(NumericFormat::default()),
            ),
        ];
        let grid = names
            .iter()
            .zip(values)
            .map(|(name, value)| vec![name.to_string(), value.to_string()])
            .collect::<Vec<_>>();
        Rc::new(MaterialRecordSet::from_grid(&columns, &grid).unwrap())
    }

    fn column_texts(set: &Rc<dyn RecordSet>, id: &str) -> Vec<String> {
        let column = set.column(&ColumnId::new(id).unwrap()).unwrap();
        (0..set.len().unwrap())
            .map(|row| {
                column
                    .value(row)
                    .unwrap()
                    .map(|value| value.as_display())
                    .unwrap_or_default()
            })
            .collect()
    }

    #[test]
    fn ascending_single_key() {
        let source = table(&["a", "b", "c", "d", "e"], &["3", "1", "4", "1", "5"]);
        let sorted = sort(source, vec![SortKey::ascending(ColumnId::new("Value").unwrap())]).unwrap();
        assert_eq!(sorted.len().unwrap(), 5);
        assert_eq!(column_texts(&sorted, "Value"), vec!["1", "1", "3", "4", "5"]);
        // equal keys keep source order: row b before row d
        assert_eq!(column_texts(&sorted, "Name"), vec!["b", "d", "a", "c", "e"]);
    }

    #[test]
    fn repeated_requests_resolve_identically() {
        let source = table(&["a", "b", "c"], &["2", "1", "3"]);
        let sorted = sort(source, vec![SortKey::ascending(ColumnId::new("Value").unwrap())]).unwrap();
        let name = sorted.column(&ColumnId::new("Name").unwrap()).unwrap();
        let first = name.value(1).unwrap();
        let second = name.value(1).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().as_display(), "a");
    }

    #[test]
    fn descending_reverses_values_only() {
        let source = table(&["a", "b", "c"], &["2", "1", "3"]);
        let sorted = sort(
            source,
            vec![SortKey::descending(ColumnId::new("Value").unwrap())],
        )
        .unwrap();
        assert_eq!(column_texts(&sorted, "Value"), vec!["3", "2", "1"]);
    }

    #[test]
    fn multi_key_orders_left_first() {
        let columns = vec![
            ColumnInfo::new(ColumnId::new("Group").unwrap(), ColumnType::Text),
            ColumnInfo::new(
                ColumnId::new("Value").unwrap(),
                ColumnType::Numeric(NumericFormat::default()),
            ),
        ];
        let grid = vec![
            vec!["b".to_string(), "1".to_string()],
            vec!["a".to_string(), "1".to_string()],
            vec!["a".to_string(), "2".to_string()],
            vec!["b".to_string(), "2".to_string()],
        ];
        let source: Rc<dyn RecordSet> =
            Rc::new(MaterialRecordSet::from_grid(&columns, &grid).unwrap());
        let sorted = sort(
            source,
            vec![
                SortKey::ascending(ColumnId::new("Group").unwrap()),
                SortKey::descending(ColumnId::new("Value").unwrap()),
            ],
        )
        .unwrap();
        assert_eq!(column_texts(&sorted, "Group"), vec!["a", "a", "b", "b"]);
        assert_eq!(column_texts(&sorted, "Value"), vec!["2", "1", "2", "1"]);
    }

    #[test]
    fn broken_cells_sort_first_in_both_directions() {
        for direction in [SortDirection::Ascending, SortDirection::Descending] {
            let source = table(&["a", "b", "c"], &["2", "oops", "1"]);
            let sorted = sort(
                source,
                vec![SortKey {
                    column: ColumnId::new("Value").unwrap(),
                    direction,
                }],
            )
            .unwrap();
            assert_eq!(column_texts(&sorted, "Name")[0], "b");
        }
    }

    #[test]
    fn unknown_key_column_fails_at_construction() {
        let source = table(&["a"], &["1"]);
        let err = sort(source, vec![SortKey::ascending(ColumnId::new("Nope").unwrap())])
            .unwrap_err();
        assert!(matches!(err, TableError::UnknownColumn(_)));
    }

    #[test]
    fn beyond_end_is_a_fetch_error() {
        let source = table(&["a", "b"], &["2", "1"]);
        let sorted = sort(source, vec![SortKey::ascending(ColumnId::new("Value").unwrap())]).unwrap();
        let value = sorted.column(&ColumnId::new("Value").unwrap()).unwrap();
        assert!(matches!(
            value.value(2).unwrap_err(),
            TableError::Fetch { row: 2, .. }
        ));
        assert_eq!(sorted.len().unwrap(), 2);
    }
}
