//! In-memory clipboard for table copy/paste

use crate::core::mutations::copy_name;
use crate::core::schema::{Field, Position, Project, Table, TableDefinition, TableId};

/// Default offset between the anchor and a pasted table
pub const PASTE_OFFSET: (f64, f64) = (50.0, 50.0);

/// A copied table without identity or placement
#[derive(Debug, Clone, PartialEq)]
pub struct TableTemplate {
    pub name: String,
    pub fields: Vec<Field>,
    pub color: Option<String>,
}

impl From<&Table> for TableTemplate {
    fn from(table: &Table) -> Self {
        let TableDefinition {
            name,
            fields,
            color,
        } = table.to_definition();
        Self {
            name,
            fields,
            color,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clipboard {
    template: Option<TableTemplate>,
    offset: (f64, f64),
}

impl Default for Clipboard {
    fn default() -> Self {
        Self::new(PASTE_OFFSET)
    }
}

impl Clipboard {
    pub fn new(offset: (f64, f64)) -> Self {
        Self {
            template: None,
            offset,
        }
    }

    pub fn template(&self) -> Option<&TableTemplate> {
        self.template.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_none()
    }

    pub fn clear(&mut self) {
        self.template = None;
    }

    /// Remember the selected table. Needs exactly one selected table that exists.
    pub fn copy(&mut self, project: &Project, selected: &[TableId]) -> bool {
        let [id] = selected else {
            tracing::debug!("Copy ignored: {} tables selected", selected.len());
            return false;
        };
        let Some(table) = project.table(*id) else {
            return false;
        };
        self.template = Some(TableTemplate::from(table));
        tracing::debug!("Copied table '{}'", table.name);
        true
    }

    /// Definition and position for pasting the held template next to `anchor`.
    ///
    /// The copy gets a free `_copy` name, new field ids and no foreign keys, since
    /// the new table starts without relationships.
    pub fn paste(&self, project: &Project, anchor: Position) -> Option<(TableDefinition, Position)> {
        let template = self.template.as_ref()?;
        let fields = template
            .fields
            .iter()
            .map(|field| Field {
                foreign_key: None,
                ..field.with_new_id()
            })
            .collect();

        let definition = TableDefinition {
            name: copy_name(project, &template.name),
            fields,
            color: template.color.clone(),
        };
        let (dx, dy) = self.offset;
        Some((definition, anchor.offset(dx, dy)))
    }
}
