//! Table schemas.

use partix_common::constants::MAX_VARIABLE_LENGTH;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::row::Row;
use crate::value::{ColumnType, Value};

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    /// Creates a nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Marks the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Ordered columns plus the primary-key column positions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<Column>,
    primary_key: Vec<usize>,
}

impl Schema {
    /// Creates a schema without a primary key.
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            primary_key: Vec::new(),
        }
    }

    /// Sets the primary key by column names.
    pub fn with_primary_key<S: AsRef<str>>(mut self, names: &[S]) -> StorageResult<Self> {
        self.primary_key = self.indices_of("", names)?;
        Ok(self)
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the column count.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the column types in order.
    pub fn types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.column_type).collect()
    }

    /// Returns the primary-key column positions.
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    /// Returns true if a primary key is declared.
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Returns the position of the named column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Resolves a list of column names to positions.
    pub fn indices_of<S: AsRef<str>>(&self, table: &str, names: &[S]) -> StorageResult<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.index_of(n.as_ref())
                    .ok_or_else(|| StorageError::ColumnNotFound {
                        table: table.to_string(),
                        column: n.as_ref().to_string(),
                    })
            })
            .collect()
    }

    /// Types of the key columns. Without a primary key the whole row is the key.
    pub fn key_types(&self) -> Vec<ColumnType> {
        if self.primary_key.is_empty() {
            self.types()
        } else {
            self.primary_key
                .iter()
                .map(|&i| self.columns[i].column_type)
                .collect()
        }
    }

    /// Extracts the key of a row. Without a primary key the whole row is the key.
    pub fn key_of(&self, row: &Row) -> Row {
        if self.primary_key.is_empty() {
            row.clone()
        } else {
            row.project(&self.primary_key)
        }
    }

    /// Checks arity and nullability and coerces every value to its column type.
    pub fn conform(&self, table: &str, row: Row) -> StorageResult<Row> {
        if row.num_columns() != self.columns.len() {
            return Err(StorageError::SchemaMismatch {
                table: table.to_string(),
                expected: self.columns.len(),
                found: row.num_columns(),
            });
        }

        let values = row
            .into_iter()
            .zip(&self.columns)
            .map(|(value, column)| {
                if value.is_null() && !column.nullable {
                    return Err(StorageError::NullViolation {
                        table: table.to_string(),
                        column: column.name.clone(),
                    });
                }
                let value = value.coerce(column.column_type, &column.name)?;
                let size = match &value {
                    Value::Varchar(s) => s.len(),
                    Value::Varbinary(b) => b.len(),
                    _ => 0,
                };
                if size > MAX_VARIABLE_LENGTH {
                    return Err(StorageError::ValueTooLarge {
                        size,
                        max: MAX_VARIABLE_LENGTH,
                    });
                }
                Ok(value)
            })
            .collect::<StorageResult<Vec<Value>>>()?;

        Ok(Row::new(values))
    }
}
