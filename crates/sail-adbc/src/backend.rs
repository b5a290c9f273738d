use crate::config::ConnectionOptions;
use crate::error::DriverResult;
use crate::partition::PartitionDescriptor;
use crate::types::{ColumnMetadata, Row};

/// A concrete tabular data engine that connections talk to.
///
/// The core depends only on this trait, so a native-protocol client,
/// an embedded engine, or a remote service can be plugged in by
/// implementing it.
#[async_trait::async_trait]
pub trait TabularBackend: Send + Sync {
    /// The name of the backend, used in diagnostics.
    fn name(&self) -> &str;

    /// Checks that the connection string is well-formed for this backend.
    /// This must not perform I/O.
    fn validate_target(&self, target: &str) -> DriverResult<()>;

    /// Whether the backend recognizes a connection option
    /// outside the common option set.
    fn supports_option(&self, _key: &str) -> bool {
        false
    }

    /// Opens a session. Unreachable targets fail with a connection error.
    async fn open_session(&self, options: &ConnectionOptions)
        -> DriverResult<Box<dyn BackendSession>>;
}

/// A backend session owned by exactly one connection.
///
/// A session is the unit of mutual exclusion: callers never use one
/// session from two places at the same time.
#[async_trait::async_trait]
pub trait BackendSession: Send {
    /// Runs a query and returns a cursor over its result.
    ///
    /// When `parameters` is given, the query is executed once per parameter
    /// tuple and the results are concatenated in tuple order. No tuple means
    /// no execution: the cursor has the result columns and no rows.
    async fn execute_query(
        &mut self,
        query: &str,
        parameters: Option<Vec<Row>>,
    ) -> DriverResult<Box<dyn BackendCursor>>;

    /// Plans a query in partitioned mode and returns one descriptor per partition.
    async fn plan_partitions(&mut self, query: &str) -> DriverResult<PartitionedQuery>;

    /// Opens a cursor over one partition produced by [`Self::plan_partitions`],
    /// possibly by another session.
    async fn read_partition(
        &mut self,
        partition: &PartitionDescriptor,
    ) -> DriverResult<Box<dyn BackendCursor>>;

    /// Creates a table. An existing table is an error unless `if_not_exists` is set.
    async fn create_table(
        &mut self,
        table: &TableDefinition,
        if_not_exists: bool,
    ) -> DriverResult<()>;

    /// Inserts all rows as a single batch operation and returns the number of rows inserted.
    async fn execute_batch_insert(
        &mut self,
        table: &TableDefinition,
        rows: Vec<Row>,
    ) -> DriverResult<u64>;

    /// Releases the session. Calling this more than once is a no-op.
    fn close(&mut self) -> DriverResult<()>;
}

/// A backend-side handle to an in-progress result set.
#[async_trait::async_trait]
pub trait BackendCursor: Send {
    /// The result set metadata, available before any row is fetched.
    fn columns(&self) -> &[ColumnMetadata];

    /// Fetches up to `max_rows` rows in cursor order.
    /// An empty rowset means the cursor is exhausted.
    async fn fetch_next_rowset(&mut self, max_rows: usize) -> DriverResult<Vec<Row>>;

    /// Releases the cursor. Calling this more than once is a no-op.
    fn close(&mut self) -> DriverResult<()>;
}

/// The columns of a query result planned in partitioned mode,
/// along with its partitions.
#[derive(Debug, Clone)]
pub struct PartitionedQuery {
    pub columns: Vec<ColumnMetadata>,
    pub partitions: Vec<PartitionDescriptor>,
}

/// The target table of a bulk ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnMetadata>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// The `CREATE TABLE` statement for backends that accept SQL text.
    pub fn create_table_sql(&self, if_not_exists: bool) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let null = if c.nullable { "" } else { " NOT NULL" };
                format!("{} {}{null}", quote_identifier(&c.name), c.sql_type)
            })
            .collect::<Vec<_>>()
            .join(", ");
        let if_not_exists = if if_not_exists { "IF NOT EXISTS " } else { "" };
        format!(
            "CREATE TABLE {if_not_exists}{} ({columns})",
            quote_identifier(&self.name)
        )
    }

    /// The parameterized `INSERT` statement for backends that accept SQL text.
    /// Values are always bound as parameters.
    pub fn insert_sql(&self) -> String {
        let names = self
            .columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({names}) VALUES ({placeholders})",
            quote_identifier(&self.name)
        )
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
