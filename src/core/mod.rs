//! Core domain models and business logic for database schema management

pub mod auto_layout;
pub mod canvas;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod mutations;
pub mod notifications;
mod schema;
pub mod storage;
pub mod store;
pub mod validation;

pub use auto_layout::{LayoutConfig, LayoutError, LayoutResult, calculate_layered_layout};
pub use canvas::{CanvasController, CanvasEdge, CanvasNode, CanvasState, Gesture, VisualGraph};
pub use clipboard::{Clipboard, TableTemplate};
pub use config::Config;
pub use error::{ErrorKind, SchemaError};
pub use export::{ExportError, ExportOptions, SchemaExporter, SqlDialect};
pub use import::{ColumnDescriptor, ImportOutcome, import_columns};
pub use mutations::{Mutation, SchemaService, find_invalid_connections};
pub use notifications::{CanvasNotification, NotificationType};
pub use schema::*;
pub use storage::{
    BlobStore, FileBlobStore, MemoryBlobStore, ProjectCodec, ProjectRepository, StorageError,
};
pub use store::{Committed, ProjectStore};
pub use validation::{ValidationLevel, ValidationReport};
