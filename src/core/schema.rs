//! Domain model: projects, tables, fields and connections
//!
//! Everything here is plain data. Consistency rules (one primary key per table,
//! connection/foreign-key pairing, cascades) are enforced by
//! [`SchemaService`](crate::core::SchemaService), which is the only code that
//! produces new [`Project`] snapshots.

use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Deserializer, Serialize};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Display, From, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`Project`]
    ProjectId
);
entity_id!(
    /// Identifier of a [`Table`], stable for the table's lifetime
    TableId
);
entity_id!(
    /// Identifier of a [`Field`], independent of the owning table id
    FieldId
);
entity_id!(
    /// Identifier of a [`Connection`]
    ConnectionId
);

/// Top-left corner of a table on the canvas
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

impl From<(f64, f64)> for Position {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Rendered or estimated bounding box of a table
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Default value of a field.
///
/// `Option<DefaultValue>::None` means "no default"; `Some(DefaultValue::Null)` is an
/// explicit `DEFAULT NULL`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        DefaultValue::Text(value.to_string())
    }
}

impl From<String> for DefaultValue {
    fn from(value: String) -> Self {
        DefaultValue::Text(value)
    }
}

impl From<bool> for DefaultValue {
    fn from(value: bool) -> Self {
        DefaultValue::Bool(value)
    }
}

impl From<f64> for DefaultValue {
    fn from(value: f64) -> Self {
        DefaultValue::Number(value)
    }
}

impl From<i64> for DefaultValue {
    fn from(value: i64) -> Self {
        DefaultValue::Number(value as f64)
    }
}

// Keeps an explicit JSON `null` distinct from a missing key.
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Foreign-key annotation stored on the referencing field
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table_id: TableId,
    pub field_name: String,
}

impl ForeignKeyRef {
    pub fn new(table_id: TableId, field_name: impl Into<String>) -> Self {
        Self {
            table_id,
            field_name: field_name.into(),
        }
    }
}

/// Broad family of a SQL data type, used for compatibility hints
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Text,
    DateTime,
    Boolean,
    Binary,
    Json,
    Other,
}

impl TypeFamily {
    pub fn of(base_type: &str) -> Self {
        match base_type {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "SERIAL"
            | "BIGSERIAL" | "SMALLSERIAL" => TypeFamily::Integer,
            "FLOAT" | "DOUBLE" | "REAL" | "DECIMAL" | "NUMERIC" => TypeFamily::Float,
            "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "UUID"
            | "CITEXT" => TypeFamily::Text,
            "DATE" | "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" | "TIME" | "YEAR" => {
                TypeFamily::DateTime
            }
            "BOOL" | "BOOLEAN" => TypeFamily::Boolean,
            "BLOB" | "BINARY" | "VARBINARY" | "BYTEA" | "LONGBLOB" | "MEDIUMBLOB" | "TINYBLOB" => {
                TypeFamily::Binary
            }
            "JSON" | "JSONB" => TypeFamily::Json,
            _ => TypeFamily::Other,
        }
    }
}

/// A column of a table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub default: Option<DefaultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeyRef>,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            id: FieldId::new(),
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            primary: false,
            unique: false,
            default: None,
            foreign_key: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<DefaultValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Annotate this field as referencing `table_id.field_name`.
    ///
    /// Only meaningful inside a table definition handed to the mutation service,
    /// which turns the annotation into a connection in the same snapshot.
    pub fn references(mut self, table_id: TableId, field_name: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKeyRef::new(table_id, field_name));
        self
    }

    /// Data type without parameters, upper-cased (`VARCHAR(255)` -> `VARCHAR`)
    pub fn base_type(&self) -> String {
        self.data_type
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_uppercase()
    }

    pub fn type_family(&self) -> TypeFamily {
        TypeFamily::of(&self.base_type())
    }

    /// Whether a foreign key between the two fields makes sense type-wise
    pub fn is_type_compatible_with(&self, other: &Field) -> bool {
        if self.base_type() == other.base_type() {
            return true;
        }
        let family = self.type_family();
        family != TypeFamily::Other && family == other.type_family()
    }

    /// Copy with a freshly generated id
    pub fn with_new_id(&self) -> Self {
        Self {
            id: FieldId::new(),
            ..self.clone()
        }
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Field {}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// An entity on the canvas
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TableId::new(),
            name: name.into(),
            fields: Vec::new(),
            position: Position::default(),
            color: None,
        }
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_name_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_by_name(name).is_some()
    }

    pub fn primary_key(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.primary)
    }

    /// Strip identity and placement, keeping what a copy needs
    pub fn to_definition(&self) -> TableDefinition {
        TableDefinition {
            name: self.name.clone(),
            fields: self.fields.clone(),
            color: self.color.clone(),
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Table {}

impl Hash for Table {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Input for creating a table: everything but id and position
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            color: None,
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Cardinality of a relationship
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    OneToOne,
    #[default]
    OneToMany,
}

impl std::fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipKind::OneToOne => write!(f, "1:1"),
            RelationshipKind::OneToMany => write!(f, "1:N"),
        }
    }
}

/// Directed relationship edge from a referencing field to a referenced field.
///
/// Fields are addressed by name because canvas handles are name-keyed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source_table: TableId,
    pub source_field: String,
    pub target_table: TableId,
    pub target_field: String,
    #[serde(default)]
    pub kind: RelationshipKind,
}

impl Connection {
    pub fn from_definition(definition: ConnectionDefinition) -> Self {
        Self {
            id: ConnectionId::new(),
            source_table: definition.source_table,
            source_field: definition.source_field,
            target_table: definition.target_table,
            target_field: definition.target_field,
            kind: definition.kind,
        }
    }

    pub fn definition(&self) -> ConnectionDefinition {
        ConnectionDefinition {
            source_table: self.source_table,
            source_field: self.source_field.clone(),
            target_table: self.target_table,
            target_field: self.target_field.clone(),
            kind: self.kind,
        }
    }

    pub fn touches_table(&self, table_id: TableId) -> bool {
        self.source_table == table_id || self.target_table == table_id
    }

    /// The annotation this connection implies on its source field
    pub fn foreign_key(&self) -> ForeignKeyRef {
        ForeignKeyRef::new(self.target_table, self.target_field.clone())
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Input for creating a connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    pub source_table: TableId,
    pub source_field: String,
    pub target_table: TableId,
    pub target_field: String,
    #[serde(default)]
    pub kind: RelationshipKind,
}

impl ConnectionDefinition {
    pub fn new(
        source_table: TableId,
        source_field: impl Into<String>,
        target_table: TableId,
        target_field: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            source_table,
            source_field: source_field.into(),
            target_table,
            target_field: target_field.into(),
            kind,
        }
    }
}

/// Root aggregate: one diagram
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            tables: Vec::new(),
            connections: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub(crate) fn table_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == id)
    }

    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn has_table(&self, id: TableId) -> bool {
        self.table(id).is_some()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Connections with `table_id` at either end
    pub fn connections_for_table(&self, table_id: TableId) -> impl Iterator<Item = &Connection> {
        self.connections
            .iter()
            .filter(move |c| c.touches_table(table_id))
    }

    /// Connection whose source endpoint is `table_id.field_name`
    pub fn connection_from(&self, table_id: TableId, field_name: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.source_table == table_id && c.source_field == field_name)
    }

    /// Whether any table already uses this field id
    pub fn contains_field_id(&self, id: FieldId) -> bool {
        self.tables
            .iter()
            .any(|t| t.fields.iter().any(|f| f.id == id))
    }

    /// `base`, or `base_2`, `base_3`, ... whichever is free first
    pub fn generate_unique_table_name(&self, base: &str) -> String {
        if self.table_by_name(base).is_none() {
            return base.to_string();
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{}_{}", base, counter);
            if self.table_by_name(&candidate).is_none() {
                return candidate;
            }
            counter += 1;
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Small sample project written by the `demo` command and used in tests
pub fn demo_project() -> Project {
    let mut project = Project::new("demo");

    let users = Table::new("users")
        .with_position(100.0, 100.0)
        .with_field(Field::new("id", "INTEGER").primary_key())
        .with_field(Field::new("username", "VARCHAR(255)").not_null().unique())
        .with_field(Field::new("email", "VARCHAR(255)").not_null().unique())
        .with_field(Field::new("created_at", "TIMESTAMP").not_null());

    let posts = Table::new("posts")
        .with_position(400.0, 100.0)
        .with_field(Field::new("id", "INTEGER").primary_key())
        .with_field(
            Field::new("user_id", "INTEGER")
                .not_null()
                .references(users.id, "id"),
        )
        .with_field(Field::new("title", "VARCHAR(255)").not_null())
        .with_field(Field::new("content", "TEXT"));

    let comments = Table::new("comments")
        .with_position(400.0, 400.0)
        .with_field(Field::new("id", "INTEGER").primary_key())
        .with_field(
            Field::new("post_id", "INTEGER")
                .not_null()
                .references(posts.id, "id"),
        )
        .with_field(
            Field::new("user_id", "INTEGER")
                .not_null()
                .references(users.id, "id"),
        )
        .with_field(Field::new("content", "TEXT").not_null());

    let links = [
        (posts.id, "user_id", users.id),
        (comments.id, "post_id", posts.id),
        (comments.id, "user_id", users.id),
    ];
    project.connections = links
        .into_iter()
        .map(|(source, field, target)| {
            Connection::from_definition(ConnectionDefinition::new(
                source,
                field,
                target,
                "id",
                RelationshipKind::OneToMany,
            ))
        })
        .collect();
    project.tables = vec![users, posts, comments];
    project
}
