// Relational entry store. SQLite is the source of truth; the vector index is derived from it.

pub mod sqlite;

pub use sqlite::*;
