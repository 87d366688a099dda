//! Structured import from flat column listings
//!
//! Input is one [`ColumnDescriptor`] per column, the shape an
//! `information_schema.columns` query (joined with key usage) produces. Import builds
//! the project directly and skips the mutation service: the source database is
//! trusted, and names it allows may not pass identifier validation here.

use crate::core::mutations::kind_for;
use crate::core::schema::{
    Connection, ConnectionDefinition, DefaultValue, Field, ForeignKeyRef, Position, Project, Table,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const TABLE_WIDTH: f64 = 250.0;
const TABLE_HEIGHT: f64 = 200.0;
const SPACING: f64 = 50.0;
const TABLES_PER_ROW: usize = 4;
const START: f64 = 100.0;

fn default_nullable() -> bool {
    true
}

/// One column of the source schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    /// Raw default expression as reported by the source
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub referenced_table: Option<String>,
    #[serde(default)]
    pub referenced_column: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            column_name: column_name.into(),
            data_type: data_type.into(),
            default: None,
            nullable: true,
            primary_key: false,
            unique: false,
            referenced_table: None,
            referenced_column: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.referenced_table = Some(table.into());
        self.referenced_column = Some(column.into());
        self
    }

    fn to_field(&self) -> Field {
        Field {
            not_null: !self.nullable || self.primary_key,
            primary: self.primary_key,
            unique: self.unique,
            default: self.default.as_deref().map(parse_default),
            ..Field::new(&self.column_name, &self.data_type)
        }
    }
}

/// Interpret a raw default expression
fn parse_default(raw: &str) -> DefaultValue {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        return DefaultValue::Null;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return DefaultValue::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return DefaultValue::Bool(false);
    }
    if let Ok(number) = trimmed.parse::<f64>() {
        return DefaultValue::Number(number);
    }
    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(trimmed);
    DefaultValue::Text(unquoted.replace("''", "'"))
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub project: Project,
    /// References and rows that could not be used
    pub warnings: Vec<String>,
}

/// Table named `name`, ignoring ASCII case like the rest of the model does
fn find_table<'a>(project: &'a Project, name: &str) -> Option<&'a Table> {
    project
        .tables
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(name))
}

fn find_field<'a>(table: &'a Table, name: &str) -> Option<&'a Field> {
    table
        .fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
}

/// Grid slot for the `index`-th imported table
fn grid_position(index: usize) -> Position {
    let row = index / TABLES_PER_ROW;
    let col = index % TABLES_PER_ROW;
    Position::new(
        START + col as f64 * (TABLE_WIDTH + SPACING),
        START + row as f64 * (TABLE_HEIGHT + SPACING),
    )
}

/// Build a project from column descriptors in two passes: tables and fields first,
/// then relationships for every reference that resolves.
pub fn import_columns(name: impl Into<String>, columns: &[ColumnDescriptor]) -> ImportOutcome {
    let mut project = Project::new(name);
    let mut warnings = Vec::new();
    let mut merged = HashSet::new();

    for column in columns {
        let index = match project
            .tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(&column.table_name))
        {
            Some(index) => {
                let existing = &project.tables[index].name;
                if *existing != column.table_name && merged.insert(column.table_name.clone()) {
                    warnings.push(format!(
                        "Merged table {} into {} (names differ only in case)",
                        column.table_name, existing
                    ));
                }
                index
            }
            None => {
                let table = Table {
                    position: grid_position(project.tables.len()),
                    ..Table::new(&column.table_name)
                };
                project.tables.push(table);
                project.tables.len() - 1
            }
        };

        let table = &mut project.tables[index];
        if find_field(table, &column.column_name).is_some() {
            warnings.push(format!(
                "Skipped duplicate column {}.{}",
                column.table_name, column.column_name
            ));
            continue;
        }
        table.fields.push(column.to_field());
    }

    for column in columns {
        let (Some(ref_table), Some(ref_column)) = (&column.referenced_table, &column.referenced_column)
        else {
            continue;
        };

        let Some((source, source_field)) = find_table(&project, &column.table_name)
            .and_then(|t| Some((t.id, find_field(t, &column.column_name)?.name.clone())))
        else {
            continue;
        };
        let target = find_table(&project, ref_table)
            .and_then(|t| Some((t.id, find_field(t, ref_column)?.name.clone())));
        let Some((target, target_field)) = target else {
            warnings.push(format!(
                "Reference {}.{} -> {}.{} does not resolve",
                column.table_name, column.column_name, ref_table, ref_column
            ));
            continue;
        };
        if project.connection_from(source, &source_field).is_some() {
            continue;
        }

        let Some(field) = project
            .table_mut(source)
            .and_then(|t| t.field_by_name_mut(&source_field))
        else {
            continue;
        };
        field.foreign_key = Some(ForeignKeyRef::new(target, target_field.clone()));
        let kind = kind_for(field);

        project
            .connections
            .push(Connection::from_definition(ConnectionDefinition::new(
                source,
                source_field,
                target,
                target_field,
                kind,
            )));
    }

    tracing::info!(
        "Imported {} tables and {} relationships ({} warnings)",
        project.tables.len(),
        project.connections.len(),
        warnings.len()
    );
    ImportOutcome { project, warnings }
}
