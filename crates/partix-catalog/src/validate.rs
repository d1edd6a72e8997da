//! Catalog consistency checks.

use std::collections::HashSet;

use partix_storage::ColumnType;

use crate::error::{CatalogError, CatalogResult};
use crate::model::{DatabaseDef, TableDef, ViewDef};

/// Checks that a database definition is internally consistent.
pub fn validate(database: &DatabaseDef) -> CatalogResult<()> {
    if database.name.is_empty() {
        return Err(CatalogError::invalid("database has no name"));
    }

    let mut names = HashSet::new();
    for table in &database.tables {
        if !names.insert(table.name.as_str()) {
            return Err(CatalogError::invalid(format!(
                "duplicate table {}",
                table.name
            )));
        }
        validate_table(table)?;
    }

    let mut views = HashSet::new();
    for view in &database.views {
        if !views.insert(view.name.as_str()) {
            return Err(CatalogError::invalid(format!("duplicate view {}", view.name)));
        }
        validate_view(database, view)?;
    }

    let mut fragments = HashSet::new();
    for fragment in &database.fragments {
        if !fragments.insert(fragment.id) {
            return Err(CatalogError::invalid(format!(
                "duplicate fragment {}",
                fragment.id
            )));
        }
    }
    Ok(())
}

fn validate_table(table: &TableDef) -> CatalogResult<()> {
    if table.name.is_empty() {
        return Err(CatalogError::invalid("table has no name"));
    }
    if table.columns.is_empty() {
        return Err(CatalogError::invalid(format!("table {} has no columns", table.name)));
    }

    let mut columns = HashSet::new();
    for column in &table.columns {
        if !columns.insert(column.name.as_str()) {
            return Err(CatalogError::invalid(format!(
                "duplicate column {} in table {}",
                column.name, table.name
            )));
        }
    }

    let known = |name: &str| columns.contains(name);
    if let Some(missing) = table.primary_key.iter().find(|c| !known(c.as_str())) {
        return Err(dangling(&table.name, missing));
    }
    if let Some(column) = &table.partition_column {
        if !known(column.as_str()) {
            return Err(dangling(&table.name, column));
        }
    }

    if table.export && (!table.primary_key.is_empty() || !table.indexes.is_empty()) {
        return Err(CatalogError::invalid(format!(
            "export table {} cannot have keys or indexes",
            table.name
        )));
    }

    let mut indexes = HashSet::new();
    for index in &table.indexes {
        if !indexes.insert(index.name.as_str()) {
            return Err(CatalogError::invalid(format!(
                "duplicate index {} on table {}",
                index.name, table.name
            )));
        }
        if index.columns.is_empty() {
            return Err(CatalogError::invalid(format!("index {} has no columns", index.name)));
        }
        if let Some(missing) = index.columns.iter().find(|c| !known(c.as_str())) {
            return Err(dangling(&table.name, missing));
        }
    }
    Ok(())
}

fn validate_view(database: &DatabaseDef, view: &ViewDef) -> CatalogResult<()> {
    let source = database.table(&view.source).ok_or_else(|| {
        CatalogError::invalid(format!(
            "view {} references missing source table {}",
            view.name, view.source
        ))
    })?;
    let dest = database.table(&view.name).ok_or_else(|| {
        CatalogError::invalid(format!("view {} has no destination table", view.name))
    })?;
    if source.name == dest.name || source.export || dest.export {
        return Err(CatalogError::invalid(format!(
            "view {} must read and write distinct persistent tables",
            view.name
        )));
    }
    if view.group_by.is_empty() || dest.columns.len() != view.group_by.len() + 1 {
        return Err(CatalogError::invalid(format!(
            "view {} must have its group-by columns followed by one count column",
            view.name
        )));
    }

    for (position, name) in view.group_by.iter().enumerate() {
        let column = source
            .columns
            .iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| dangling(&source.name, name))?;
        if column.nullable {
            return Err(CatalogError::invalid(format!(
                "view {} groups by nullable column {}",
                view.name, name
            )));
        }
        if dest.columns[position].column_type != column.column_type {
            return Err(CatalogError::invalid(format!(
                "view {} column {} does not match source type {}",
                view.name, dest.columns[position].name, column.column_type
            )));
        }
    }
    if dest.columns[view.group_by.len()].column_type != ColumnType::BigInt {
        return Err(CatalogError::invalid(format!(
            "view {} count column must be BIGINT",
            view.name
        )));
    }

    let expected: Vec<&str> = dest.columns[..view.group_by.len()]
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    if dest.primary_key.iter().map(String::as_str).ne(expected) {
        return Err(CatalogError::invalid(format!(
            "view {} primary key must be its group-by columns",
            view.name
        )));
    }
    Ok(())
}

fn dangling(table: &str, column: &str) -> CatalogError {
    CatalogError::invalid(format!(
        "table {} has no column {} (dangling reference)",
        table, column
    ))
}
