//! Mutation & validation service
//!
//! Every operation reads the current [`Project`] and returns a brand new snapshot
//! wrapped in a [`Mutation`]; the input is never touched. A connection and the
//! foreign-key annotation on its source field are always written or removed in the
//! same snapshot, so no caller can observe one without the other.

use crate::core::error::SchemaError;
use crate::core::schema::{
    Connection, ConnectionDefinition, ConnectionId, Field, FieldId, Position, Project,
    RelationshipKind, Table, TableDefinition, TableId,
};
use crate::core::validation::{
    MAX_IDENTIFIER_LENGTH, ValidationLevel, ValidationReport, validate_data_type,
    validate_identifier,
};
use std::collections::{HashMap, HashSet};

/// Suffix appended to the name of duplicated or pasted tables.
/// `" (Copy)"` would not pass identifier validation, hence the underscore form.
pub const COPY_SUFFIX: &str = "_copy";

/// Offset applied to a duplicated table's position
pub const DUPLICATE_OFFSET: (f64, f64) = (40.0, 40.0);

/// Result of a successful mutation: the new snapshot plus the operation's value
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    pub project: Project,
    pub value: T,
    /// Non-fatal remarks (reserved words, type mismatches, ...)
    pub warnings: Vec<String>,
}

impl<T> Mutation<T> {
    fn new(mut project: Project, value: T) -> Self {
        project.touch();
        Self {
            project,
            value,
            warnings: Vec::new(),
        }
    }

    fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Mutation<U> {
        Mutation {
            project: self.project,
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

/// Applies table and connection operations while keeping the model consistent
#[derive(Debug, Clone)]
pub struct SchemaService {
    level: ValidationLevel,
    duplicate_offset: (f64, f64),
}

impl Default for SchemaService {
    fn default() -> Self {
        Self::new(ValidationLevel::default())
    }
}

impl SchemaService {
    pub fn new(level: ValidationLevel) -> Self {
        Self {
            level,
            duplicate_offset: DUPLICATE_OFFSET,
        }
    }

    pub fn level(&self) -> ValidationLevel {
        self.level
    }

    // ========================================================================
    // Table operations
    // ========================================================================

    /// Create a table from `definition` at `position`.
    ///
    /// Foreign-key annotations present in the definition are resolved and turned
    /// into connections in the same snapshot.
    pub fn add_table(
        &self,
        project: &Project,
        definition: TableDefinition,
        position: Position,
    ) -> Result<Mutation<TableId>, SchemaError> {
        let mut table = Table {
            id: TableId::new(),
            name: definition.name,
            fields: definition.fields,
            position,
            color: definition.color,
        };

        let mut seen = HashSet::new();
        for field in &mut table.fields {
            if !seen.insert(field.id) || project.contains_field_id(field.id) {
                field.id = FieldId::new();
                seen.insert(field.id);
            }
        }

        normalize_primary_key(&mut table, None);
        let mut warnings = self.validate_table(project, &table)?;

        let id = table.id;
        let mut next = project.clone();
        next.tables.push(table);
        warnings.extend(self.link_foreign_keys(&mut next, id, None)?);

        let name = next.table(id).map(|t| t.name.as_str()).unwrap_or_default();
        tracing::debug!("Added table '{}' ({})", name, id);
        Ok(Mutation::new(next, id).with_warnings(warnings))
    }

    /// Replace the stored table that has `table.id`.
    ///
    /// Fields that disappeared take their relationships with them; annotations that
    /// were added, changed or removed are mirrored onto connections. A renamed source
    /// field loses its annotation at once, while its connection stays behind under the
    /// old name until the orphan sweep drops it.
    pub fn update_table(
        &self,
        project: &Project,
        table: Table,
    ) -> Result<Mutation<TableId>, SchemaError> {
        let existing = project
            .table(table.id)
            .ok_or(SchemaError::TableNotFound(table.id))?;

        let mut table = table;
        normalize_primary_key(&mut table, Some(existing));
        let mut warnings = self.validate_table(project, &table)?;

        let id = table.id;
        let removed: Vec<String> = existing
            .fields
            .iter()
            .filter(|old| table.field(old.id).is_none())
            .map(|old| old.name.clone())
            .collect();

        let renamed: Vec<(FieldId, String)> = existing
            .fields
            .iter()
            .filter_map(|old| {
                let new = table.field(old.id)?;
                (new.name != old.name && new.foreign_key == old.foreign_key)
                    .then(|| (old.id, old.name.clone()))
            })
            .collect();

        let mut next = project.clone();
        if let Some(slot) = next.table_mut(id) {
            *slot = table;
        }
        for name in &removed {
            detach_field(&mut next, id, name);
        }
        warnings.extend(self.link_foreign_keys(&mut next, id, Some(existing))?);
        for (field_id, old_name) in &renamed {
            release_renamed_source(&mut next, id, *field_id, old_name);
        }

        tracing::debug!("Updated table {} ({} fields removed)", id, removed.len());
        Ok(Mutation::new(next, id).with_warnings(warnings))
    }

    /// Remove a table, every connection touching it and every annotation pointing at it
    pub fn delete_table(
        &self,
        project: &Project,
        id: TableId,
    ) -> Result<Mutation<Table>, SchemaError> {
        let removed = project
            .table(id)
            .cloned()
            .ok_or(SchemaError::TableNotFound(id))?;

        let dropped = project.connections_for_table(id).count();
        let mut next = project.clone();
        next.tables.retain(|t| t.id != id);
        next.connections.retain(|c| !c.touches_table(id));

        for table in &mut next.tables {
            for field in &mut table.fields {
                if field.foreign_key.as_ref().is_some_and(|fk| fk.table_id == id) {
                    field.foreign_key = None;
                }
            }
        }

        tracing::debug!(
            "Deleted table '{}' and {} connection(s)",
            removed.name,
            dropped
        );
        Ok(Mutation::new(next, removed))
    }

    /// Deep-copy a table with fresh table and field ids.
    ///
    /// Annotations are copied as-is and keep pointing at the original targets; no
    /// connections are created for the copy.
    pub fn duplicate_table(
        &self,
        project: &Project,
        id: TableId,
    ) -> Result<Mutation<TableId>, SchemaError> {
        let original = project.table(id).ok_or(SchemaError::TableNotFound(id))?;

        let (dx, dy) = self.duplicate_offset;
        let copy = Table {
            id: TableId::new(),
            name: copy_name(project, &original.name),
            fields: original.fields.iter().map(Field::with_new_id).collect(),
            position: original.position.offset(dx, dy),
            color: original.color.clone(),
        };

        let copy_id = copy.id;
        let mut next = project.clone();
        tracing::debug!("Duplicated table '{}' as '{}'", original.name, copy.name);
        next.tables.push(copy);
        Ok(Mutation::new(next, copy_id))
    }

    /// Position-only update. Skips validation so tables with legacy names can still move.
    pub fn move_table(
        &self,
        project: &Project,
        id: TableId,
        position: Position,
    ) -> Result<Mutation<()>, SchemaError> {
        let mut next = project.clone();
        let table = next.table_mut(id).ok_or(SchemaError::TableNotFound(id))?;
        table.position = position;
        Ok(Mutation::new(next, ()))
    }

    pub fn set_table_color(
        &self,
        project: &Project,
        id: TableId,
        color: Option<String>,
    ) -> Result<Mutation<()>, SchemaError> {
        let mut next = project.clone();
        let table = next.table_mut(id).ok_or(SchemaError::TableNotFound(id))?;
        table.color = color;
        Ok(Mutation::new(next, ()))
    }

    // ========================================================================
    // Field operations
    // ========================================================================

    pub fn add_field(
        &self,
        project: &Project,
        table_id: TableId,
        field: Field,
    ) -> Result<Mutation<FieldId>, SchemaError> {
        let mut table = project
            .table(table_id)
            .cloned()
            .ok_or(SchemaError::TableNotFound(table_id))?;

        let mut field = field;
        if project.contains_field_id(field.id) {
            field.id = FieldId::new();
        }
        let field_id = field.id;
        table.fields.push(field);

        Ok(self.update_table(project, table)?.map(|_| field_id))
    }

    /// Drop a field together with the relationships that reference it on either side
    pub fn remove_field(
        &self,
        project: &Project,
        table_id: TableId,
        field_id: FieldId,
    ) -> Result<Mutation<Field>, SchemaError> {
        let mut table = project
            .table(table_id)
            .cloned()
            .ok_or(SchemaError::TableNotFound(table_id))?;

        let index = table
            .fields
            .iter()
            .position(|f| f.id == field_id)
            .ok_or_else(|| SchemaError::FieldNotFound {
                table: table.name.clone(),
                field: field_id.to_string(),
            })?;
        let removed = table.fields.remove(index);

        Ok(self.update_table(project, table)?.map(|_| removed))
    }

    /// Make `field_id` the primary key, clearing the flag on its siblings
    pub fn set_primary_key(
        &self,
        project: &Project,
        table_id: TableId,
        field_id: FieldId,
    ) -> Result<Mutation<()>, SchemaError> {
        let mut table = project
            .table(table_id)
            .cloned()
            .ok_or(SchemaError::TableNotFound(table_id))?;

        if table.field(field_id).is_none() {
            return Err(SchemaError::FieldNotFound {
                table: table.name.clone(),
                field: field_id.to_string(),
            });
        }
        for field in &mut table.fields {
            field.primary = field.id == field_id;
            if field.primary {
                field.not_null = true;
            }
        }

        Ok(self.update_table(project, table)?.map(|_| ()))
    }

    // ========================================================================
    // Connection operations
    // ========================================================================

    /// Create a connection and annotate its source field, atomically
    pub fn add_connection(
        &self,
        project: &Project,
        definition: ConnectionDefinition,
    ) -> Result<Mutation<ConnectionId>, SchemaError> {
        let warnings = check_connection(project, &definition, None)?;

        let connection = Connection::from_definition(definition);
        let id = connection.id;
        let mut next = project.clone();
        set_annotation(&mut next, &connection);
        next.connections.push(connection);

        tracing::debug!("Added connection {}", id);
        Ok(Mutation::new(next, id).with_warnings(warnings))
    }

    /// Re-validate and replace a connection, moving the annotation if the source changed
    pub fn update_connection(
        &self,
        project: &Project,
        connection: Connection,
    ) -> Result<Mutation<ConnectionId>, SchemaError> {
        let existing = project
            .connection(connection.id)
            .cloned()
            .ok_or(SchemaError::ConnectionNotFound(connection.id))?;
        let warnings = check_connection(project, &connection.definition(), Some(connection.id))?;

        let id = connection.id;
        let mut next = project.clone();
        clear_annotation(&mut next, &existing);
        set_annotation(&mut next, &connection);
        if let Some(slot) = next.connections.iter_mut().find(|c| c.id == id) {
            *slot = connection;
        }

        tracing::debug!("Updated connection {}", id);
        Ok(Mutation::new(next, id).with_warnings(warnings))
    }

    /// Remove a connection and clear the annotation on its source field, atomically
    pub fn delete_connection(
        &self,
        project: &Project,
        id: ConnectionId,
    ) -> Result<Mutation<Connection>, SchemaError> {
        let existing = project
            .connection(id)
            .cloned()
            .ok_or(SchemaError::ConnectionNotFound(id))?;

        let mut next = project.clone();
        next.connections.retain(|c| c.id != id);
        clear_annotation(&mut next, &existing);

        tracing::debug!("Deleted connection {}", id);
        Ok(Mutation::new(next, existing))
    }

    // ========================================================================
    // Project operations
    // ========================================================================

    pub fn rename_project(
        &self,
        project: &Project,
        name: &str,
    ) -> Result<Mutation<()>, SchemaError> {
        let name = name.trim();
        if name.is_empty() {
            let mut report = ValidationReport::default();
            report.error("name", "Project name cannot be empty");
            return Err(SchemaError::Invalid(report));
        }
        let mut next = project.clone();
        next.name = name.to_string();
        Ok(Mutation::new(next, ()))
    }

    /// Independent copy of a whole project: every id is regenerated and
    /// relationships are re-targeted to the copied tables.
    pub fn duplicate_project(&self, project: &Project) -> Project {
        let table_ids: HashMap<TableId, TableId> = project
            .tables
            .iter()
            .map(|t| (t.id, TableId::new()))
            .collect();
        let remap = |id: TableId| table_ids.get(&id).copied().unwrap_or(id);

        let mut copy = Project::new(format!("{} (Copy)", project.name));
        copy.tables = project
            .tables
            .iter()
            .map(|t| {
                let mut table = t.clone();
                table.id = remap(t.id);
                for field in &mut table.fields {
                    field.id = FieldId::new();
                    if let Some(fk) = &mut field.foreign_key {
                        fk.table_id = remap(fk.table_id);
                    }
                }
                table
            })
            .collect();
        copy.connections = project
            .connections
            .iter()
            .map(|c| Connection {
                id: ConnectionId::new(),
                source_table: remap(c.source_table),
                target_table: remap(c.target_table),
                ..c.clone()
            })
            .collect();

        tracing::info!("Duplicated project '{}' as {}", project.name, copy.id);
        copy
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Shape checks shared by add and update; returns warnings on success
    fn validate_table(&self, project: &Project, table: &Table) -> Result<Vec<String>, SchemaError> {
        let mut report = ValidationReport::default();
        report.merge_identifier("name", validate_identifier(&table.name, self.level));

        if table.fields.is_empty() {
            report.error("fields", "A table needs at least one field");
        }

        let mut names = HashSet::new();
        for (i, field) in table.fields.iter().enumerate() {
            let path = format!("fields[{}].name", i);
            report.merge_identifier(&path, validate_identifier(&field.name, self.level));
            if !names.insert(field.name.to_ascii_lowercase()) {
                report.error(&path, format!("Duplicate field name '{}'", field.name));
            }
            if let Err(message) = validate_data_type(&field.data_type) {
                report.error(format!("fields[{}].data_type", i), message);
            }
        }

        if !report.is_valid() {
            tracing::warn!("Rejected table '{}': {}", table.name, report);
            return Err(SchemaError::Invalid(report));
        }

        let clash = project
            .tables
            .iter()
            .any(|t| t.id != table.id && t.name.eq_ignore_ascii_case(&table.name));
        if clash {
            return Err(SchemaError::DuplicateTableName(table.name.clone()));
        }

        Ok(report.warning_messages())
    }

    /// Mirror annotation changes on `table_id` (relative to `existing`) onto connections
    fn link_foreign_keys(
        &self,
        next: &mut Project,
        table_id: TableId,
        existing: Option<&Table>,
    ) -> Result<Vec<String>, SchemaError> {
        let table = next
            .table(table_id)
            .cloned()
            .ok_or(SchemaError::TableNotFound(table_id))?;

        let mut warnings = Vec::new();
        for field in &table.fields {
            let old = existing.and_then(|t| t.field(field.id));
            let old_fk = old.and_then(|f| f.foreign_key.as_ref());
            if old_fk == field.foreign_key.as_ref() {
                continue;
            }

            if let Some(old) = old.filter(|f| f.foreign_key.is_some()) {
                next.connections
                    .retain(|c| !(c.source_table == table_id && c.source_field == old.name));
            }

            if let Some(fk) = &field.foreign_key {
                let definition = ConnectionDefinition::new(
                    table_id,
                    field.name.clone(),
                    fk.table_id,
                    fk.field_name.clone(),
                    kind_for(field),
                );
                warnings.extend(check_connection(next, &definition, None)?);
                next.connections.push(Connection::from_definition(definition));
            }
        }
        Ok(warnings)
    }
}

/// Relationship kind implied by the referencing field's constraints
pub fn kind_for(field: &Field) -> RelationshipKind {
    if field.unique || field.primary {
        RelationshipKind::OneToOne
    } else {
        RelationshipKind::OneToMany
    }
}

/// Name for a copy of `name` that is a valid identifier and not yet taken
pub fn copy_name(project: &Project, name: &str) -> String {
    let budget = MAX_IDENTIFIER_LENGTH - COPY_SUFFIX.len() - 4;
    let stem: String = name.chars().take(budget).collect();
    project.generate_unique_table_name(&format!("{}{}", stem, COPY_SUFFIX))
}

/// Connections whose tables or field names no longer resolve, or whose source field
/// no longer carries the matching foreign-key annotation
pub fn find_invalid_connections(project: &Project) -> Vec<ConnectionId> {
    project
        .connections
        .iter()
        .filter(|c| {
            let annotation = c.foreign_key();
            let source_ok = project
                .table(c.source_table)
                .and_then(|t| t.field_by_name(&c.source_field))
                .is_some_and(|f| f.foreign_key.as_ref() == Some(&annotation));
            let target_ok = project
                .table(c.target_table)
                .is_some_and(|t| t.has_field(&c.target_field));
            !(source_ok && target_ok)
        })
        .map(|c| c.id)
        .collect()
}

/// At most one primary field survives: the newly flagged one, else the last flagged.
fn normalize_primary_key(table: &mut Table, existing: Option<&Table>) {
    let flagged: Vec<usize> = table
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.primary)
        .map(|(i, _)| i)
        .collect();
    let Some(&last) = flagged.last() else {
        return;
    };
    if flagged.len() == 1 {
        return;
    }

    let was_primary = |field: &Field| {
        existing
            .and_then(|t| t.field(field.id))
            .is_some_and(|old| old.primary)
    };
    let keep = flagged
        .iter()
        .rev()
        .copied()
        .find(|&i| !was_primary(&table.fields[i]))
        .unwrap_or(last);

    for i in flagged {
        if i != keep {
            table.fields[i].primary = false;
        }
    }
    tracing::debug!(
        "Primary key of '{}' normalised to '{}'",
        table.name,
        table.fields[keep].name
    );
}

/// Referential checks for a prospective connection; returns warnings on success
fn check_connection(
    project: &Project,
    definition: &ConnectionDefinition,
    ignore: Option<ConnectionId>,
) -> Result<Vec<String>, SchemaError> {
    let source = project
        .table(definition.source_table)
        .ok_or(SchemaError::TableNotFound(definition.source_table))?;
    let target = project
        .table(definition.target_table)
        .ok_or(SchemaError::TableNotFound(definition.target_table))?;
    let source_field =
        source
            .field_by_name(&definition.source_field)
            .ok_or_else(|| SchemaError::FieldNotFound {
                table: source.name.clone(),
                field: definition.source_field.clone(),
            })?;
    let target_field =
        target
            .field_by_name(&definition.target_field)
            .ok_or_else(|| SchemaError::FieldNotFound {
                table: target.name.clone(),
                field: definition.target_field.clone(),
            })?;

    let taken = project.connections.iter().find(|c| {
        Some(c.id) != ignore
            && c.source_table == definition.source_table
            && c.source_field == definition.source_field
    });
    if let Some(other) = taken {
        if other.target_table == definition.target_table
            && other.target_field == definition.target_field
        {
            return Err(SchemaError::DuplicateConnection {
                source_table: source.name.clone(),
                source_field: definition.source_field.clone(),
                target_table: target.name.clone(),
                target_field: definition.target_field.clone(),
            });
        }
        return Err(SchemaError::ForeignKeyTaken {
            table: source.name.clone(),
            field: definition.source_field.clone(),
        });
    }

    let mut warnings = Vec::new();
    if !source_field.is_type_compatible_with(target_field) {
        warnings.push(format!(
            "Type mismatch: {}.{} ({}) references {}.{} ({})",
            source.name,
            source_field.name,
            source_field.data_type,
            target.name,
            target_field.name,
            target_field.data_type
        ));
    }
    if !target_field.primary && !target_field.unique {
        warnings.push(format!(
            "Referenced field {}.{} is neither primary nor unique",
            target.name, target_field.name
        ));
    }
    Ok(warnings)
}

fn set_annotation(project: &mut Project, connection: &Connection) {
    let annotation = connection.foreign_key();
    if let Some(field) = project
        .table_mut(connection.source_table)
        .and_then(|t| t.field_by_name_mut(&connection.source_field))
    {
        field.foreign_key = Some(annotation);
    }
}

/// Clear the source field's annotation if it is the one `connection` set
fn clear_annotation(project: &mut Project, connection: &Connection) {
    let annotation = connection.foreign_key();
    if let Some(field) = project
        .table_mut(connection.source_table)
        .and_then(|t| t.field_by_name_mut(&connection.source_field))
        && field.foreign_key.as_ref() == Some(&annotation)
    {
        field.foreign_key = None;
    }
}

/// A source field renamed away from its connection gives up the annotation that
/// connection set. The connection itself is left for the orphan sweep.
fn release_renamed_source(
    project: &mut Project,
    table_id: TableId,
    field_id: FieldId,
    old_name: &str,
) {
    let Some(annotation) = project
        .connection_from(table_id, old_name)
        .map(Connection::foreign_key)
    else {
        return;
    };
    if let Some(field) = project
        .table_mut(table_id)
        .and_then(|t| t.fields.iter_mut().find(|f| f.id == field_id))
        && field.foreign_key.as_ref() == Some(&annotation)
    {
        field.foreign_key = None;
    }
}

/// Drop every relationship that names `table_id.field_name` on either end
fn detach_field(project: &mut Project, table_id: TableId, field_name: &str) {
    let (dropped, kept): (Vec<Connection>, Vec<Connection>) =
        std::mem::take(&mut project.connections)
            .into_iter()
            .partition(|c| {
                (c.source_table == table_id && c.source_field == field_name)
                    || (c.target_table == table_id && c.target_field == field_name)
            });
    project.connections = kept;

    for connection in &dropped {
        if connection.source_table != table_id || connection.source_field != field_name {
            clear_annotation(project, connection);
        }
    }

    for table in &mut project.tables {
        for field in &mut table.fields {
            let points_here = field
                .foreign_key
                .as_ref()
                .is_some_and(|fk| fk.table_id == table_id && fk.field_name == field_name);
            if points_here {
                field.foreign_key = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::schema::ForeignKeyRef;

    fn service() -> SchemaService {
        SchemaService::default()
    }

    fn users_def() -> TableDefinition {
        TableDefinition::new("users")
            .with_field(Field::new("id", "INT").primary_key())
            .with_field(Field::new("name", "VARCHAR(255)"))
    }

    fn orders_def() -> TableDefinition {
        TableDefinition::new("orders")
            .with_field(Field::new("id", "INT").primary_key())
            .with_field(Field::new("user_id", "INT"))
    }

    /// users + orders, no connection yet
    fn base() -> (Project, TableId, TableId) {
        let s = service();
        let project = Project::new("p");
        let m = s.add_table(&project, users_def(), Position::new(0.0, 0.0)).unwrap();
        let users = m.value;
        let m = s
            .add_table(&m.project, orders_def(), Position::new(300.0, 0.0))
            .unwrap();
        (m.project, users, m.value)
    }

    fn link(project: &Project, orders: TableId, users: TableId) -> Mutation<ConnectionId> {
        service()
            .add_connection(
                project,
                ConnectionDefinition::new(orders, "user_id", users, "id", RelationshipKind::OneToMany),
            )
            .unwrap()
    }

    #[test]
    fn test_add_table_does_not_touch_input() {
        let project = Project::new("p");
        let m = service()
            .add_table(&project, users_def(), Position::new(10.0, 20.0))
            .unwrap();
        assert!(project.tables.is_empty());
        assert_eq!(m.project.tables.len(), 1);
        assert_eq!(m.project.tables[0].position, Position::new(10.0, 20.0));
        assert!(m.project.updated_at >= project.updated_at);
    }

    #[test]
    fn test_add_table_rejects_bad_shapes() {
        let s = service();
        let project = Project::new("p");

        let err = s
            .add_table(&project, TableDefinition::new("1bad"), Position::default())
            .unwrap_err();
        let report = err.report().unwrap();
        assert!(report.issues.iter().any(|i| i.path == "name"));
        assert!(report.issues.iter().any(|i| i.path == "fields"));

        let def = TableDefinition::new("t")
            .with_field(Field::new("a", "INT"))
            .with_field(Field::new("A", "TEXT"))
            .with_field(Field::new("b", ""));
        let err = s.add_table(&project, def, Position::default()).unwrap_err();
        let paths: Vec<&str> = err
            .report()
            .unwrap()
            .issues
            .iter()
            .map(|i| i.path.as_str())
            .collect();
        assert!(paths.contains(&"fields[1].name"));
        assert!(paths.contains(&"fields[2].data_type"));
    }

    #[test]
    fn test_add_table_rejects_duplicate_name() {
        let (project, _, _) = base();
        let err = service()
            .add_table(&project, users_def(), Position::default())
            .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateTableName("users".to_string()));
    }

    #[test]
    fn test_add_table_warns_on_reserved_word() {
        let def = TableDefinition::new("order").with_field(Field::new("id", "INT"));
        let m = service()
            .add_table(&Project::new("p"), def, Position::default())
            .unwrap();
        assert_eq!(m.warnings.len(), 1);
        assert!(m.warnings[0].contains("reserved"));
    }

    #[test]
    fn test_add_table_keeps_single_primary_key() {
        let def = TableDefinition::new("t")
            .with_field(Field::new("a", "INT").primary_key())
            .with_field(Field::new("b", "INT").primary_key());
        let m = service()
            .add_table(&Project::new("p"), def, Position::default())
            .unwrap();
        let table = &m.project.tables[0];
        let primaries: Vec<&str> = table
            .fields
            .iter()
            .filter(|f| f.primary)
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(primaries, vec!["b"]);
    }

    #[test]
    fn test_update_table_newly_flagged_primary_wins() {
        let (project, users, _) = base();
        let mut table = project.table(users).unwrap().clone();
        // "name" is listed after "id", but "id" was already primary
        table.fields[1].primary = true;
        let m = service().update_table(&project, table).unwrap();
        let table = m.project.table(users).unwrap();
        assert!(!table.fields[0].primary);
        assert!(table.fields[1].primary);
    }

    #[test]
    fn test_add_table_regenerates_colliding_field_ids() {
        let (project, users, _) = base();
        let existing = project.table(users).unwrap().fields[0].clone();
        let twin = Field {
            name: "ref_id".to_string(),
            ..existing.clone()
        };
        let def = TableDefinition::new("other")
            .with_field(existing.clone())
            .with_field(twin);
        let m = service()
            .add_table(&project, def, Position::default())
            .unwrap();
        let other = m.project.table(m.value).unwrap();
        assert_ne!(other.fields[0].id, existing.id);
        assert_ne!(other.fields[1].id, existing.id);
        assert_ne!(other.fields[0].id, other.fields[1].id);
    }

    #[test]
    fn test_add_table_with_annotation_creates_connection() {
        let (project, users, _) = base();
        let def = TableDefinition::new("payments")
            .with_field(Field::new("id", "INT").primary_key())
            .with_field(Field::new("user_id", "INT").references(users, "id"));
        let m = service()
            .add_table(&project, def, Position::default())
            .unwrap();
        assert_eq!(m.project.connections.len(), 1);
        let connection = &m.project.connections[0];
        assert_eq!(connection.source_table, m.value);
        assert_eq!(connection.target_table, users);
        assert_eq!(connection.source_field, "user_id");
    }

    #[test]
    fn test_add_table_with_unresolvable_annotation_fails() {
        let (project, users, _) = base();
        let def = TableDefinition::new("payments")
            .with_field(Field::new("user_id", "INT").references(users, "missing"));
        let err = service()
            .add_table(&project, def, Position::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Referential);
    }

    #[test]
    fn test_add_connection_sets_annotation() {
        let (project, users, orders) = base();
        let m = link(&project, orders, users);

        let field = m
            .project
            .table(orders)
            .unwrap()
            .field_by_name("user_id")
            .unwrap();
        let fk = field.foreign_key.as_ref().unwrap();
        assert_eq!(fk.table_id, users);
        assert_eq!(fk.field_name, "id");
        assert_eq!(m.project.connections.len(), 1);
        assert!(project.connections.is_empty());
    }

    #[test]
    fn test_add_connection_rejects_missing_endpoints() {
        let (project, users, orders) = base();
        let s = service();

        let err = s
            .add_connection(
                &project,
                ConnectionDefinition::new(orders, "nope", users, "id", RelationshipKind::OneToMany),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::FieldNotFound { .. }));

        let err = s
            .add_connection(
                &project,
                ConnectionDefinition::new(
                    orders,
                    "user_id",
                    TableId::new(),
                    "id",
                    RelationshipKind::OneToMany,
                ),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::TableNotFound(_)));
    }

    #[test]
    fn test_add_connection_rejects_duplicates_and_second_fk() {
        let (project, users, orders) = base();
        let m = link(&project, orders, users);
        let s = service();

        let err = s
            .add_connection(
                &m.project,
                ConnectionDefinition::new(orders, "user_id", users, "id", RelationshipKind::OneToOne),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateConnection { .. }));

        let err = s
            .add_connection(
                &m.project,
                ConnectionDefinition::new(orders, "user_id", orders, "id", RelationshipKind::OneToOne),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::ForeignKeyTaken { .. }));
    }

    #[test]
    fn test_add_connection_warns_on_type_mismatch() {
        let (project, users, orders) = base();
        let m = service()
            .add_connection(
                &project,
                ConnectionDefinition::new(orders, "user_id", users, "name", RelationshipKind::OneToMany),
            )
            .unwrap();
        assert!(m.warnings.iter().any(|w| w.contains("Type mismatch")));
        assert!(m.warnings.iter().any(|w| w.contains("neither primary nor unique")));
    }

    #[test]
    fn test_delete_connection_clears_only_its_annotation() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);
        let payments = TableDefinition::new("payments")
            .with_field(Field::new("id", "INT").primary_key())
            .with_field(Field::new("order_id", "INT").references(orders, "id"));
        let m = s.add_table(&m.project, payments, Position::default()).unwrap();
        let connection_id = m
            .project
            .connection_from(orders, "user_id")
            .map(|c| c.id)
            .unwrap();

        let m = s.delete_connection(&m.project, connection_id).unwrap();
        let orders_table = m.project.table(orders).unwrap();
        assert!(orders_table.field_by_name("user_id").unwrap().foreign_key.is_none());
        let payments_table = m.project.table_by_name("payments").unwrap();
        assert!(payments_table.field_by_name("order_id").unwrap().foreign_key.is_some());
        assert_eq!(m.project.connections.len(), 1);
    }

    #[test]
    fn test_update_connection_moves_annotation() {
        let (project, users, orders) = base();
        let s = service();
        let m = s
            .add_field(&project, orders, Field::new("buyer_id", "INT"))
            .unwrap();
        let m = link(&m.project, orders, users);

        let mut connection = m.project.connection(m.value).unwrap().clone();
        connection.source_field = "buyer_id".to_string();
        let m = s.update_connection(&m.project, connection).unwrap();

        let table = m.project.table(orders).unwrap();
        assert!(table.field_by_name("user_id").unwrap().foreign_key.is_none());
        assert!(table.field_by_name("buyer_id").unwrap().foreign_key.is_some());
    }

    #[test]
    fn test_delete_table_cascades_both_directions() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);

        // orders as source: deleting orders drops the connection
        let gone = s.delete_table(&m.project, orders).unwrap();
        assert!(gone.project.connections.is_empty());
        assert_eq!(gone.value.name, "orders");

        // users as target: deleting users also clears orders.user_id's annotation
        let gone = s.delete_table(&m.project, users).unwrap();
        assert!(gone.project.connections.is_empty());
        let field = gone
            .project
            .table(orders)
            .unwrap()
            .field_by_name("user_id")
            .unwrap()
            .clone();
        assert!(field.foreign_key.is_none());
    }

    #[test]
    fn test_duplicate_table_keeps_annotations_without_connections() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);
        let m = s.duplicate_table(&m.project, orders).unwrap();

        let original = m.project.table(orders).unwrap();
        let copy = m.project.table(m.value).unwrap();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.name, "orders_copy");
        assert_eq!(copy.position, original.position.offset(40.0, 40.0));
        for field in &copy.fields {
            assert!(original.field(field.id).is_none());
        }
        let fk = copy.field_by_name("user_id").unwrap().foreign_key.clone();
        assert_eq!(fk.map(|f| f.table_id), Some(users));
        assert_eq!(m.project.connections.len(), 1);
    }

    #[test]
    fn test_remove_field_drops_referencing_connections() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);
        let id_field = m.project.table(users).unwrap().fields[0].id;

        let m = s.remove_field(&m.project, users, id_field).unwrap();
        assert_eq!(m.value.name, "id");
        assert!(m.project.connections.is_empty());
        let orders_table = m.project.table(orders).unwrap();
        assert!(orders_table.field_by_name("user_id").unwrap().foreign_key.is_none());
    }

    #[test]
    fn test_remove_last_field_is_rejected() {
        let project = Project::new("p");
        let s = service();
        let def = TableDefinition::new("solo").with_field(Field::new("id", "INT"));
        let m = s.add_table(&project, def, Position::default()).unwrap();
        let field_id = m.project.tables[0].fields[0].id;
        let err = s.remove_field(&m.project, m.value, field_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_update_table_annotation_change_relinks() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);

        let mut table = m.project.table(orders).unwrap().clone();
        table.fields[1].foreign_key = None;
        let m = s.update_table(&m.project, table).unwrap();
        assert!(m.project.connections.is_empty());

        let mut table = m.project.table(orders).unwrap().clone();
        table.fields[1] = table.fields[1].clone().references(users, "id");
        let m = s.update_table(&m.project, table).unwrap();
        assert_eq!(m.project.connections.len(), 1);
        assert_eq!(m.project.connections[0].target_table, users);
    }

    #[test]
    fn test_rename_keeps_stale_connection_for_sweep() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);

        let mut table = m.project.table(orders).unwrap().clone();
        table.fields[1].name = "uid".to_string();
        let m = s.update_table(&m.project, table).unwrap();

        assert_eq!(m.project.connections.len(), 1);
        assert_eq!(find_invalid_connections(&m.project), vec![m.project.connections[0].id]);
        let uid = m.project.table(orders).unwrap().field_by_name("uid").unwrap();
        assert!(uid.foreign_key.is_none());

        // the sweep's delete finds nothing left to clear
        let stale = m.project.connections[0].id;
        let m = s.delete_connection(&m.project, stale).unwrap();
        assert!(m.project.connections.is_empty());
        let table = m.project.table(orders).unwrap();
        assert!(table.fields.iter().all(|f| f.foreign_key.is_none()));
    }

    #[test]
    fn test_field_reusing_old_name_does_not_revive_connection() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);

        let mut table = m.project.table(orders).unwrap().clone();
        table.fields[1].name = "uid".to_string();
        let m = s.update_table(&m.project, table).unwrap();
        let m = s
            .add_field(&m.project, orders, Field::new("user_id", "INT"))
            .unwrap();

        // resolves by name again, but nothing carries its annotation
        assert_eq!(find_invalid_connections(&m.project).len(), 1);
        let stale = m.project.connections[0].id;
        let m = s.delete_connection(&m.project, stale).unwrap();
        let table = m.project.table(orders).unwrap();
        assert!(table.fields.iter().all(|f| f.foreign_key.is_none()));
    }

    #[test]
    fn test_delete_connection_leaves_foreign_annotation_alone() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);
        let id = m.value;

        // point the field elsewhere behind the connection's back
        let mut project = m.project.clone();
        let other = TableId::new();
        project.tables[1].fields[1].foreign_key = Some(ForeignKeyRef::new(other, "id"));
        assert_eq!(find_invalid_connections(&project), vec![id]);

        let m = s.delete_connection(&project, id).unwrap();
        let fk = m.project.table(orders).unwrap().fields[1].foreign_key.clone();
        assert_eq!(fk.map(|f| f.table_id), Some(other));
    }

    #[test]
    fn test_duplicate_self_referencing_table() {
        let s = service();
        let project = Project::new("p");
        let m = s
            .add_table(
                &project,
                TableDefinition::new("employees")
                    .with_field(Field::new("id", "INT").primary_key())
                    .with_field(Field::new("manager_id", "INT")),
                Position::default(),
            )
            .unwrap();
        let employees = m.value;
        let m = s
            .add_connection(
                &m.project,
                ConnectionDefinition::new(
                    employees,
                    "manager_id",
                    employees,
                    "id",
                    RelationshipKind::OneToMany,
                ),
            )
            .unwrap();

        let m = s.duplicate_table(&m.project, employees).unwrap();
        let copy = m.project.table(m.value).unwrap();
        assert_eq!(copy.name, "employees_copy");
        let fk = copy.field_by_name("manager_id").unwrap().foreign_key.clone().unwrap();
        // still points at the original, not at the copy
        assert_eq!(fk.table_id, employees);
        assert_eq!(fk.field_name, "id");

        assert_eq!(m.project.connections.len(), 1);
        assert_eq!(m.project.connections[0].source_table, employees);
        assert!(find_invalid_connections(&m.project).is_empty());
    }

    #[test]
    fn test_set_primary_key() {
        let (project, users, _) = base();
        let s = service();
        let name_id = project.table(users).unwrap().fields[1].id;
        let m = s.set_primary_key(&project, users, name_id).unwrap();
        let table = m.project.table(users).unwrap();
        assert_eq!(table.primary_key().map(|f| f.id), Some(name_id));
        assert_eq!(table.fields.iter().filter(|f| f.primary).count(), 1);
    }

    #[test]
    fn test_move_table_and_color() {
        let (project, users, _) = base();
        let s = service();
        let m = s
            .move_table(&project, users, Position::new(5.0, 6.0))
            .unwrap();
        let m = s
            .set_table_color(&m.project, users, Some("#ff0000".to_string()))
            .unwrap();
        let table = m.project.table(users).unwrap();
        assert_eq!(table.position, Position::new(5.0, 6.0));
        assert_eq!(table.color.as_deref(), Some("#ff0000"));

        let err = s
            .move_table(&project, TableId::new(), Position::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Referential);
    }

    #[test]
    fn test_duplicate_project_retargets_everything() {
        let (project, users, orders) = base();
        let s = service();
        let m = link(&project, orders, users);
        let copy = s.duplicate_project(&m.project);

        assert_ne!(copy.id, m.project.id);
        assert_eq!(copy.name, "p (Copy)");
        let copy_users = copy.table_by_name("users").unwrap();
        let copy_orders = copy.table_by_name("orders").unwrap();
        assert_ne!(copy_users.id, users);
        let connection = &copy.connections[0];
        assert_eq!(connection.source_table, copy_orders.id);
        assert_eq!(connection.target_table, copy_users.id);
        let fk = copy_orders.field_by_name("user_id").unwrap().foreign_key.clone();
        assert_eq!(fk.map(|f| f.table_id), Some(copy_users.id));
        assert!(find_invalid_connections(&copy).is_empty());
    }

    #[test]
    fn test_rename_project_rejects_blank() {
        let project = Project::new("p");
        assert!(service().rename_project(&project, "  ").is_err());
        let m = service().rename_project(&project, "Shop").unwrap();
        assert_eq!(m.project.name, "Shop");
    }

    #[test]
    fn test_copy_name_stays_a_valid_identifier() {
        let mut project = Project::new("p");
        assert_eq!(copy_name(&project, "users"), "users_copy");
        project.tables.push(Table::new("users_copy"));
        assert_eq!(copy_name(&project, "users"), "users_copy_2");

        let long = "a".repeat(64);
        let name = copy_name(&project, &long);
        assert!(name.len() <= MAX_IDENTIFIER_LENGTH);
        assert!(validate_identifier(&name, ValidationLevel::Strict).is_valid());
    }
}
