//! Database row representation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConversionError, Error, Result};
use crate::value::Value;

/// Column metadata shared across all rows in a result set.
///
/// Wrapped in `Arc` so all rows from the same query share one instance.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get the name of a column by index.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
///
/// Rows provide both ordinal and name-based access to column values.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row. For multiple rows from the same result set,
    /// prefer `with_columns` to share the column metadata.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            values,
            columns: Arc::new(ColumnInfo::new(column_names)),
        }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a value by index, converted to the requested host type.
    ///
    /// Fails with a `ConversionError` naming the column when the wire value
    /// is incompatible with `T`.
    pub fn try_get<'a, T>(&'a self, index: usize) -> Result<T>
    where
        T: TryFrom<&'a Value, Error = Error>,
    {
        let value = self.values.get(index).ok_or_else(|| {
            Error::usage(format!(
                "column index {} out of range ({} columns)",
                index,
                self.values.len()
            ))
        })?;
        T::try_from(value).map_err(|err| self.name_conversion(err, index))
    }

    /// Get a value by name, converted to the requested host type.
    pub fn try_get_by_name<'a, T>(&'a self, name: &str) -> Result<T>
    where
        T: TryFrom<&'a Value, Error = Error>,
    {
        let index = self
            .columns
            .index_of(name)
            .ok_or_else(|| Error::usage(format!("no column named '{name}'")))?;
        self.try_get(index)
    }

    /// Consume the row and return its values in column order.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn name_conversion(&self, err: Error, index: usize) -> Error {
        match err {
            Error::Conversion(c) => Error::Conversion(ConversionError {
                column: self.columns.name_at(index).map(str::to_string),
                ..c
            }),
            other => other,
        }
    }
}
