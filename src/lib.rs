//! Schemaboard - schema graph engine for a visual entity-relationship designer
//!
//! The [`core`] module holds the domain model, the mutation service that keeps it
//! consistent, the canvas synchronization layer and the auto-layout engine.

pub mod core;
