use std::collections::HashMap;
use std::sync::Arc;

use crate::value::SqlValue;

/// A row from a query result, with access by column name or index.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column names shared across all rows of the result set
    pub column_names: Arc<Vec<String>>,
    values: Vec<SqlValue>,
    // Shared name -> index map, built once per result set
    column_index: Arc<HashMap<String, usize>>,
}

impl Row {
    /// Get a value by column name.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.column_index
            .get(column_name)
            .and_then(|&idx| self.values.get(idx))
    }

    /// Get a value by column index.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// A materialized result set: the rows returned by a query plus the
/// affected-row count for DML statements.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    /// The rows returned by the query
    pub rows: Vec<Row>,
    /// The number of rows affected (for DML statements)
    pub rows_affected: u64,
}

impl ResultSet {
    /// Create an empty result set with the given column names.
    #[must_use]
    pub fn new(column_names: Vec<String>) -> Self {
        let column_index = Arc::new(
            column_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>(),
        );
        Self {
            column_names: Arc::new(column_names),
            column_index,
            rows: Vec::new(),
            rows_affected: 0,
        }
    }

    /// Append a row; values must be in column order.
    pub fn add_row(&mut self, values: Vec<SqlValue>) {
        self.rows.push(Row {
            column_names: Arc::clone(&self.column_names),
            values,
            column_index: Arc::clone(&self.column_index),
        });
        self.rows_affected += 1;
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}
