//! Table registry.
//!
//! Tables hold either loaded data or the error that loading produced, so a
//! broken import stays addressable (and re-reports its error) instead of
//! vanishing from the session.

use std::rc::Rc;

use log::debug;

use crate::error::{Result, TableError};
use crate::recordset::RecordSet;

/// Identifier of a registered table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(String);

impl TableId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(TableError::User("table id must not be blank".into()));
        }
        Ok(TableId(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered table: an id plus loaded data or a sticky load error.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    data: std::result::Result<Rc<dyn RecordSet>, TableError>,
}

impl Table {
    pub fn new(id: TableId, data: Rc<dyn RecordSet>) -> Self {
        Table { id, data: Ok(data) }
    }

    /// A table whose load failed; every access re-raises the stored error.
    pub fn erroneous(id: TableId, error: TableError) -> Self {
        Table { id, data: Err(error) }
    }

    pub fn id(&self) -> &TableId {
        &self.id
    }

    pub fn data(&self) -> Result<Rc<dyn RecordSet>> {
        self.data.clone()
    }

    pub fn is_erroneous(&self) -> bool {
        self.data.is_err()
    }
}

/// Session-scoped registry mapping ids to tables, insertion-ordered.
#[derive(Default)]
pub struct TableManager {
    tables: Vec<Table>,
}

impl TableManager {
    pub fn new() -> Self {
        TableManager::default()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn register(&mut self, table: Table) -> Result<()> {
        if self.tables.iter().any(|existing| existing.id == table.id) {
            return Err(TableError::DuplicateTable(table.id.to_string()));
        }
        debug!("registered table '{}'", table.id);
        self.tables.push(table);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Table> {
        self.tables
            .iter()
            .find(|table| table.id.as_str() == id)
            .ok_or_else(|| TableError::UnknownTable(id.to_string()))
    }

    /// The only table, or `None` when there are zero or several.
    pub fn single_table(&self) -> Option<&Table> {
        match self.tables.as_slice() {
            [table] => Some(table),
            _ => None,
        }
    }

    /// The only table, or a user error naming how many there are.
    pub fn require_single_table(&self) -> Result<&Table> {
        match self.tables.as_slice() {
            [table] => Ok(table),
            [] => Err(TableError::User("no table is loaded".into())),
            tables => Err(TableError::User(format!(
                "expected a single table but {} are loaded",
                tables.len()
            ))),
        }
    }

    pub fn rename(&mut self, from: &str, to: TableId) -> Result<()> {
        if self
            .tables
            .iter()
            .any(|table| table.id == to && table.id.as_str() != from)
        {
            return Err(TableError::DuplicateTable(to.to_string()));
        }
        let table = self
            .tables
            .iter_mut()
            .find(|table| table.id.as_str() == from)
            .ok_or_else(|| TableError::UnknownTable(from.to_string()))?;
        debug!("renamed table '{from}' to '{to}'");
        table.id = to;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Table> {
        let index = self
            .tables
            .iter()
            .position(|table| table.id.as_str() == id)
            .ok_or_else(|| TableError::UnknownTable(id.to_string()))?;
        Ok(self.tables.remove(index))
    }

    /// An unused id built from `stem`, appending `_1`, `_2`, ... on clashes.
    pub fn fresh_id(&self, stem: &str) -> Result<TableId> {
        let stem = if stem.trim().is_empty() { "table" } else { stem };
        if !self.tables.iter().any(|table| table.id.as_str() == stem) {
            return TableId::new(stem);
        }
        let mut counter = 1usize;
        loop {
            let candidate = format!("{stem}_{counter}");
            if !self
                .tables
                .iter()
                .any(|table| table.id.as_str() == candidate)
            {
                return TableId::new(candidate);
            }
            counter += 1;
        }
    }
}
