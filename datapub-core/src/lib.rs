//! DataPub Core - Data Model
//!
//! Pure data structures and pure functions shared by the client and the
//! CLI: table definitions, row records, the error taxonomy, and the
//! immutable client configuration. No I/O lives here; everything in this
//! crate is testable without a network.

pub mod config;
pub mod error;
pub mod record;
pub mod table;

pub use config::{
    ClientConfig, DEFAULT_API_VERSION, DEFAULT_BATCH_SIZE, DEFAULT_HOST, DEFAULT_INSERT_RETRIES,
    DEFAULT_PROTOCOL, DEFAULT_SCHEMA, TOKEN_ENV_VAR,
};
pub use error::{classify_response, DatapubError, DatapubResult};
pub use record::{records_from_value, used_columns, Record};
pub use table::{
    normalize_name, normalize_table_definition, ColumnDefinition, ConstraintType,
    ForeignKeyReference, TableConstraint, TableDefinition, TableReference,
};
