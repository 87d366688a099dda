//! Holder of the authoritative project snapshot
//!
//! The store owns the current [`Project`] behind an [`Arc`]. A mutation builds a
//! whole new snapshot through [`SchemaService`] and, only if it succeeds, the store
//! swaps it in and bumps the revision. Readers holding an older `Arc` keep seeing
//! the old snapshot.

use crate::core::error::SchemaError;
use crate::core::mutations::{Mutation, SchemaService};
use crate::core::schema::{
    Connection, ConnectionDefinition, ConnectionId, Position, Project, Table, TableDefinition,
    TableId,
};
use std::sync::Arc;

/// Value returned by a committed mutation
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub warnings: Vec<String>,
    /// Store revision after the commit
    pub revision: u64,
}

#[derive(Debug, Default)]
pub struct ProjectStore {
    service: SchemaService,
    current: Option<Arc<Project>>,
    revision: u64,
}

impl ProjectStore {
    pub fn new(service: SchemaService) -> Self {
        Self {
            service,
            current: None,
            revision: 0,
        }
    }

    /// Store with `project` already open
    pub fn with_project(service: SchemaService, project: Project) -> Self {
        let mut store = Self::new(service);
        store.open(project);
        store
    }

    pub fn open(&mut self, project: Project) {
        tracing::info!("Opened project '{}' ({})", project.name, project.id);
        self.current = Some(Arc::new(project));
        self.revision += 1;
    }

    pub fn close(&mut self) -> Option<Arc<Project>> {
        let closed = self.current.take();
        if closed.is_some() {
            self.revision += 1;
        }
        closed
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Current snapshot, shared
    pub fn snapshot(&self) -> Result<Arc<Project>, SchemaError> {
        self.current.clone().ok_or(SchemaError::NoProject)
    }

    pub fn project(&self) -> Option<&Project> {
        self.current.as_deref()
    }

    /// Monotonic counter, bumped by every committed change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn service(&self) -> &SchemaService {
        &self.service
    }

    /// Run `op` against the current snapshot and commit its result.
    ///
    /// On error the current snapshot and revision are left untouched.
    pub fn apply<T>(
        &mut self,
        op: impl FnOnce(&SchemaService, &Project) -> Result<Mutation<T>, SchemaError>,
    ) -> Result<Committed<T>, SchemaError> {
        let current = self.current.as_ref().ok_or(SchemaError::NoProject)?;
        let mutation = op(&self.service, current)?;

        self.current = Some(Arc::new(mutation.project));
        self.revision += 1;
        Ok(Committed {
            value: mutation.value,
            warnings: mutation.warnings,
            revision: self.revision,
        })
    }

    pub fn add_table(
        &mut self,
        definition: TableDefinition,
        position: Position,
    ) -> Result<Committed<TableId>, SchemaError> {
        self.apply(|s, p| s.add_table(p, definition, position))
    }

    pub fn update_table(&mut self, table: Table) -> Result<Committed<TableId>, SchemaError> {
        self.apply(|s, p| s.update_table(p, table))
    }

    pub fn delete_table(&mut self, id: TableId) -> Result<Committed<Table>, SchemaError> {
        self.apply(|s, p| s.delete_table(p, id))
    }

    pub fn duplicate_table(&mut self, id: TableId) -> Result<Committed<TableId>, SchemaError> {
        self.apply(|s, p| s.duplicate_table(p, id))
    }

    pub fn move_table(
        &mut self,
        id: TableId,
        position: Position,
    ) -> Result<Committed<()>, SchemaError> {
        self.apply(|s, p| s.move_table(p, id, position))
    }

    pub fn add_connection(
        &mut self,
        definition: ConnectionDefinition,
    ) -> Result<Committed<ConnectionId>, SchemaError> {
        self.apply(|s, p| s.add_connection(p, definition))
    }

    pub fn update_connection(
        &mut self,
        connection: Connection,
    ) -> Result<Committed<ConnectionId>, SchemaError> {
        self.apply(|s, p| s.update_connection(p, connection))
    }

    pub fn delete_connection(
        &mut self,
        id: ConnectionId,
    ) -> Result<Committed<Connection>, SchemaError> {
        self.apply(|s, p| s.delete_connection(p, id))
    }
}
