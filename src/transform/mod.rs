//! Lazy transformations over record sets.
//!
//! Each transformation wraps its source record set(s) and computes rows on
//! demand. Index maps grow forward only and every destination row resolves
//! at most once; repeated fetches reuse the memoized mapping.

pub mod calculate;
pub mod concatenate;
pub mod filter;
pub mod sort;

pub use calculate::{Calculation, calculate};
pub use concatenate::{MissingColumnPolicy, concatenate};
pub use filter::filter;
pub use sort::{SortDirection, SortKey, sort};

use std::rc::Rc;

use crate::error::{Result, TableError};
use crate::expr::ColumnLookup;
use crate::recordset::RecordSet;

/// Lookup over every column of a record set.
pub(crate) fn lookup_for(source: &Rc<dyn RecordSet>) -> ColumnLookup {
    ColumnLookup::from_ids(source.columns().iter().map(|column| column.id()))
}

/// Fetch error for a destination row past the end of the data.
pub(crate) fn row_out_of_range(row: usize, len: usize) -> TableError {
    TableError::fetch(row, format!("row index out of range (table has {len} rows)"))
}

/// Binds every column the expression's checked identifiers name to that
/// column's value at `row`, erroring like a fetch if any read fails.
pub(crate) fn bind_columns(
    source: &Rc<dyn RecordSet>,
    lookup: &ColumnLookup,
    identifiers: &std::collections::BTreeSet<String>,
    row: usize,
) -> Result<Vec<(String, evalexpr::Value)>> {
    let mut bindings = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        let Some(id) = lookup.resolve(identifier) else {
            continue;
        };
        let column = source
            .column(id)
            .ok_or_else(|| TableError::internal(format!("checked column '{id}' disappeared")))?;
        let value = column.value(row)?;
        bindings.push((identifier.clone(), crate::data::value_to_evalexpr(&value)));
    }
    Ok(bindings)
}
