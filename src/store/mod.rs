//! Persistence layer: libSQL-backed storage for calls, live call state,
//! keyword statistics, triggers, and add-on results.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::*;
