//! DataPub Client
//!
//! Synchronous HTTP client for the DataPub tabular-data publishing
//! platform: create and drop remote tables, upload and query row data,
//! and read or write table metadata. Bulk uploads run through a
//! batching pipeline with bounded retries on server-side failures, on
//! top of the platform's transactional advanced API.
//!
//! ```no_run
//! use datapub_client::{DatapubClient, InsertMethod};
//! use datapub_core::{records_from_value, ClientConfig};
//! use serde_json::json;
//!
//! # fn main() -> datapub_core::DatapubResult<()> {
//! let client = DatapubClient::new(ClientConfig::with_token("xxxx"))?;
//!
//! let definition = json!({
//!     "columns": [
//!         {"name": "id", "data_type": "bigint", "is_nullable": false, "primary_key": true},
//!         {"name": "field1", "data_type": "varchar(128)", "is_nullable": false}
//!     ]
//! });
//! client.create_table("my_table", &definition, None)?;
//!
//! let records = records_from_value(json!([
//!     {"id": 1, "field1": "test"},
//!     {"id": 2, "field1": "test2"}
//! ]))?;
//! let rows = client.insert_into_table("my_table", &records, None, None, InsertMethod::Api)?;
//! assert_eq!(rows, 2);
//!
//! client.drop_table("my_table", None)?;
//! # Ok(())
//! # }
//! ```

pub mod advanced;
pub mod client;
pub mod insert;
pub mod roundtrip;
pub mod transport;

pub use advanced::AdvancedSession;
pub use client::DatapubClient;
pub use insert::InsertMethod;
pub use roundtrip::roundtrip;
pub use transport::{ApiResponse, HttpTransport, Transport};

pub use datapub_core::{ClientConfig, DatapubError, DatapubResult, Record};
