//! Backend-agnostic database connectivity with columnar results.
//!
//! A [`Driver`] opens [`Connection`]s to a [`TabularBackend`]. Statements run
//! queries or bulk ingestion, and query results are read as Arrow record
//! batches through a [`ResultStream`].

pub mod backend;
pub mod codec;
pub mod config;
mod connection;
mod driver;
pub mod error;
mod partition;
mod result;
mod statement;
pub mod types;

pub use backend::{
    BackendCursor, BackendSession, PartitionedQuery, TableDefinition, TabularBackend,
};
pub use config::{ConnectionOptions, DriverConfig, IngestMode, OptionKey};
pub use connection::Connection;
pub use driver::Driver;
pub use error::{DriverError, DriverErrorKind, DriverResult};
pub use partition::PartitionDescriptor;
pub use result::ResultStream;
pub use statement::{PartitionedResult, Statement, StatementMode};
