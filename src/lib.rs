//! weftdb: embedded, file-backed record store.
//!
//! A single data file holds variable-length serialized records at
//! allocator-chosen offsets; a side file tracks reclaimed byte ranges for
//! reuse (best two-fit, coalescing, end-of-file shrink); a fixed-stride
//! index file per model maps integer primary keys to record locations.
//! Records are typed: a static field-descriptor list per model drives a
//! tag-delimited text codec with XOR obfuscation.
//!
//! No server process, no transactions. Contended file opens are retried on
//! a fixed delay; everything else is synchronous I/O.

// Leaf modules
pub mod config;
pub mod consts;
pub mod types;
pub mod util;

// File-sharing layer
pub mod lock;

// Storage core
pub mod free;
pub mod index;
pub mod store;

// Records
pub mod codec;
pub mod recordset;
pub mod db;

// Convenience re-exports
pub use codec::{FieldDef, FieldKind, Model, Value};
pub use config::{Config, RetryPolicy};
pub use db::Database;
pub use recordset::RecordSet;
pub use types::{Point, RecordIndex};
