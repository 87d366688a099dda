//! Read-only export of a project as SQL DDL or JSON

use crate::core::schema::{DefaultValue, Field, Project, Table, TableId};
use crate::core::validation::{ValidationLevel, is_reserved_keyword, validate_identifier};
use serde::{Deserialize, Serialize};

/// Target SQL dialect; only affects identifier quoting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlDialect {
    #[default]
    MySQL,
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    fn quote(&self, identifier: &str) -> String {
        match self {
            SqlDialect::MySQL => format!("`{}`", identifier.replace('`', "``")),
            SqlDialect::PostgreSQL | SqlDialect::SQLite => {
                format!("\"{}\"", identifier.replace('"', "\"\""))
            }
        }
    }
}

impl std::str::FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(SqlDialect::MySQL),
            "postgres" | "postgresql" => Ok(SqlDialect::PostgreSQL),
            "sqlite" => Ok(SqlDialect::SQLite),
            other => Err(format!("Unknown SQL dialect '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub sql_dialect: SqlDialect,
    /// Emit a `-- position: x, y` comment above each table
    pub include_positions: bool,
    pub include_drop_statements: bool,
    /// One column per line instead of one statement per line
    pub pretty_print: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            sql_dialect: SqlDialect::MySQL,
            include_positions: false,
            include_drop_statements: false,
            pretty_print: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Table {0} not found")]
    TableNotFound(TableId),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct SchemaExporter;

impl SchemaExporter {
    /// `CREATE TABLE` statements for every table, in project order
    pub fn export_sql(project: &Project, options: &ExportOptions) -> String {
        let mut out = format!("-- Project: {}\n", project.name);
        for table in &project.tables {
            out.push('\n');
            out.push_str(&Self::render_table(project, table, options));
        }
        out
    }

    pub fn export_table_sql(
        project: &Project,
        id: TableId,
        options: &ExportOptions,
    ) -> Result<String, ExportError> {
        let table = project.table(id).ok_or(ExportError::TableNotFound(id))?;
        Ok(Self::render_table(project, table, options))
    }

    pub fn export_json(project: &Project) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(project)?)
    }

    fn render_table(project: &Project, table: &Table, options: &ExportOptions) -> String {
        let dialect = options.sql_dialect;
        let name = identifier(&table.name, dialect);
        let mut out = String::new();

        if options.include_positions {
            out.push_str(&format!(
                "-- position: {}, {}\n",
                table.position.x, table.position.y
            ));
        }
        if options.include_drop_statements {
            out.push_str(&format!("DROP TABLE IF EXISTS {};\n", name));
        }

        let mut lines: Vec<String> = table
            .fields
            .iter()
            .map(|f| column_definition(f, dialect))
            .collect();
        lines.extend(
            table
                .fields
                .iter()
                .filter_map(|f| foreign_key_clause(project, f, dialect)),
        );

        if options.pretty_print {
            out.push_str(&format!(
                "CREATE TABLE {} (\n    {}\n);\n",
                name,
                lines.join(",\n    ")
            ));
        } else {
            out.push_str(&format!("CREATE TABLE {} ({});\n", name, lines.join(", ")));
        }
        out
    }
}

/// Quote only when the bare name would not parse
fn identifier(name: &str, dialect: SqlDialect) -> String {
    let plain = validate_identifier(name, ValidationLevel::Minimal).is_valid();
    if plain && !is_reserved_keyword(name) {
        name.to_string()
    } else {
        dialect.quote(name)
    }
}

fn column_definition(field: &Field, dialect: SqlDialect) -> String {
    let mut parts = vec![identifier(&field.name, dialect), field.data_type.clone()];
    if field.not_null {
        parts.push("NOT NULL".to_string());
    }
    if let Some(default) = &field.default {
        parts.push(format!("DEFAULT {}", default_literal(default)));
    }
    if field.primary {
        parts.push("PRIMARY KEY".to_string());
    } else if field.unique {
        parts.push("UNIQUE".to_string());
    }
    parts.join(" ")
}

fn default_literal(value: &DefaultValue) -> String {
    match value {
        DefaultValue::Null => "NULL".to_string(),
        DefaultValue::Bool(true) => "TRUE".to_string(),
        DefaultValue::Bool(false) => "FALSE".to_string(),
        DefaultValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        DefaultValue::Number(n) => n.to_string(),
        DefaultValue::Text(text) if is_sql_expression(text) => text.clone(),
        DefaultValue::Text(text) => format!("'{}'", text.replace('\'', "''")),
    }
}

fn is_sql_expression(text: &str) -> bool {
    let upper = text.trim().to_ascii_uppercase();
    matches!(
        upper.as_str(),
        "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME" | "NOW()" | "LOCALTIMESTAMP"
    )
}

/// Clause for the field's annotation, if it still resolves
fn foreign_key_clause(project: &Project, field: &Field, dialect: SqlDialect) -> Option<String> {
    let fk = field.foreign_key.as_ref()?;
    let target = project.table(fk.table_id)?;
    if !target.has_field(&fk.field_name) {
        return None;
    }
    Some(format!(
        "FOREIGN KEY ({}) REFERENCES {}({})",
        identifier(&field.name, dialect),
        identifier(&target.name, dialect),
        identifier(&fk.field_name, dialect)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{TableId, demo_project};

    #[test]
    fn test_export_demo_sql() {
        let project = demo_project();
        let sql = SchemaExporter::export_sql(&project, &ExportOptions::default());

        assert!(sql.starts_with("-- Project: demo\n"));
        assert!(sql.contains("CREATE TABLE users (\n    id INTEGER NOT NULL PRIMARY KEY,"));
        assert!(sql.contains("username VARCHAR(255) NOT NULL UNIQUE"));
        assert!(sql.contains("FOREIGN KEY (user_id) REFERENCES users(id)"));
        assert_eq!(sql.matches("CREATE TABLE").count(), 3);
    }

    #[test]
    fn test_reserved_names_are_quoted() {
        let mut project = Project::new("p");
        project.tables.push(
            Table::new("order")
                .with_field(Field::new("select", "INT"))
                .with_field(Field::new("note", "TEXT")),
        );
        let id = project.tables[0].id;

        let sql = SchemaExporter::export_table_sql(&project, id, &ExportOptions::default()).unwrap();
        assert!(sql.contains("CREATE TABLE `order`"));
        assert!(sql.contains("`select` INT"));
        assert!(sql.contains("note TEXT"));

        let options = ExportOptions {
            sql_dialect: SqlDialect::PostgreSQL,
            ..Default::default()
        };
        let sql = SchemaExporter::export_table_sql(&project, id, &options).unwrap();
        assert!(sql.contains("CREATE TABLE \"order\""));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_literal(&DefaultValue::Null), "NULL");
        assert_eq!(default_literal(&DefaultValue::Number(5.0)), "5");
        assert_eq!(default_literal(&DefaultValue::Number(2.5)), "2.5");
        assert_eq!(default_literal(&DefaultValue::Bool(true)), "TRUE");
        assert_eq!(default_literal(&"it's".into()), "'it''s'");
        assert_eq!(
            default_literal(&"CURRENT_TIMESTAMP".into()),
            "CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_dangling_annotation_is_skipped() {
        let mut project = Project::new("p");
        project.tables.push(
            Table::new("orders")
                .with_field(Field::new("user_id", "INT").references(TableId::new(), "id")),
        );
        let sql = SchemaExporter::export_sql(&project, &ExportOptions::default());
        assert!(!sql.contains("FOREIGN KEY"));
    }

    #[test]
    fn test_options() {
        let mut project = Project::new("p");
        project.tables.push(
            Table::new("t")
                .with_position(10.0, 20.0)
                .with_field(Field::new("a", "INT")),
        );
        let options = ExportOptions {
            include_positions: true,
            include_drop_statements: true,
            pretty_print: false,
            ..Default::default()
        };
        let sql = SchemaExporter::export_sql(&project, &options);
        assert!(sql.contains("-- position: 10, 20\n"));
        assert!(sql.contains("DROP TABLE IF EXISTS t;\n"));
        assert!(sql.contains("CREATE TABLE t (a INT);"));
    }

    #[test]
    fn test_export_json_round_trips() {
        let project = demo_project();
        let json = SchemaExporter::export_json(&project).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tables.len(), 3);
        assert_eq!(back.connections.len(), 3);
        assert_eq!(back.id, project.id);
    }

    #[test]
    fn test_unknown_table() {
        let project = Project::new("p");
        let err = SchemaExporter::export_table_sql(&project, TableId::new(), &ExportOptions::default());
        assert!(matches!(err, Err(ExportError::TableNotFound(_))));
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("postgres".parse::<SqlDialect>(), Ok(SqlDialect::PostgreSQL));
        assert!("oracle".parse::<SqlDialect>().is_err());
    }
}
