use std::fmt;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use log::{debug, warn};

use crate::backend::TableDefinition;
use crate::codec::record_batch_to_rows;
use crate::config::{IngestMode, OptionKey};
use crate::connection::{CloseSignal, CursorSlot, SessionState};
use crate::error::{DriverError, DriverResult};
use crate::partition::PartitionDescriptor;
use crate::result::ResultStream;
use crate::types::{columns_from_schema, schema_from_columns};

/// What a statement does when executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementMode {
    /// Run a SQL query.
    Query(String),
    /// Insert the bound batch into the named table.
    Ingest(String),
}

/// The result of executing a query in partitioned mode.
#[derive(Debug, Clone)]
pub struct PartitionedResult {
    pub schema: SchemaRef,
    pub partitions: Vec<PartitionDescriptor>,
}

/// An executed query whose cursor has not been handed off yet.
struct PendingResult {
    cursor: CursorSlot,
    schema: SchemaRef,
}

/// The stream handed off last. Revoking it closes its cursor right away.
struct HandedOff {
    signal: CloseSignal,
    cursor: CursorSlot,
}

/// A statement is either in query mode or in ingest mode.
/// Setting one mode replaces the other.
///
/// At most one batch is bound at a time. It supplies the parameters
/// of a query, or the rows to insert in ingest mode.
pub struct Statement {
    state: Arc<SessionState>,
    mode: Option<StatementMode>,
    ingest_mode: IngestMode,
    bound: Option<RecordBatch>,
    pending: Option<PendingResult>,
    handed_off: Option<HandedOff>,
    closed: bool,
}

impl Statement {
    pub(crate) fn new(state: Arc<SessionState>) -> Self {
        let mode = state
            .options
            .ingest_target_table
            .clone()
            .map(StatementMode::Ingest);
        let ingest_mode = state.config.ingest.mode;
        Self {
            state,
            mode,
            ingest_mode,
            bound: None,
            pending: None,
            handed_off: None,
            closed: false,
        }
    }

    pub fn mode(&self) -> Option<&StatementMode> {
        self.mode.as_ref()
    }

    pub fn ingest_mode(&self) -> IngestMode {
        self.ingest_mode
    }

    fn ensure_open(&self, operation: &str) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::invalid_state(format!(
                "{operation}: the statement is closed"
            )));
        }
        self.state.ensure_open(operation)
    }

    pub fn set_query(&mut self, query: impl Into<String>) -> DriverResult<()> {
        self.ensure_open("set_query")?;
        self.mode = Some(StatementMode::Query(query.into()));
        Ok(())
    }

    pub fn set_ingest_target(&mut self, table: impl Into<String>) -> DriverResult<()> {
        self.ensure_open("set_ingest_target")?;
        let table = table.into();
        if table.is_empty() {
            return Err(DriverError::invalid_state(
                "set_ingest_target: the table name must not be empty",
            ));
        }
        self.mode = Some(StatementMode::Ingest(table));
        Ok(())
    }

    pub fn set_option(&mut self, key: &str, value: &str) -> DriverResult<()> {
        match key {
            OptionKey::INGEST_TARGET_TABLE => self.set_ingest_target(value),
            OptionKey::INGEST_MODE => {
                self.ensure_open("set_option")?;
                self.ingest_mode = value.parse()?;
                Ok(())
            }
            _ => Err(DriverError::invalid_state(format!(
                "set_option: unrecognized statement option: {key}"
            ))),
        }
    }

    /// Binds the batch used by the next [`Self::execute`], replacing any batch bound before.
    pub fn bind(&mut self, batch: RecordBatch) -> DriverResult<()> {
        self.ensure_open("bind")?;
        self.bound = Some(batch);
        Ok(())
    }

    /// Executes the statement.
    ///
    /// For ingestion, returns the number of rows inserted.
    /// For queries, returns [`None`] and keeps the result for [`Self::get_result_stream`].
    pub async fn execute(&mut self) -> DriverResult<Option<u64>> {
        self.ensure_open("execute")?;
        match self.mode.clone() {
            None => Err(DriverError::invalid_state(
                "execute: a query or an ingest target must be set first",
            )),
            Some(StatementMode::Query(query)) => {
                self.execute_query(&query).await?;
                Ok(None)
            }
            Some(StatementMode::Ingest(table)) => {
                self.discard_pending().await?;
                self.execute_ingest(&table).await.map(Some)
            }
        }
    }

    async fn execute_query(&mut self, query: &str) -> DriverResult<()> {
        self.discard_pending().await?;
        self.revoke_handed_off().await?;
        let parameters = self.bound.as_ref().map(record_batch_to_rows).transpose()?;
        let mut session = self.state.session("execute").await?;
        match &parameters {
            Some(parameters) => debug!(
                "executing query with {} parameter set(s): {query}",
                parameters.len()
            ),
            None => debug!("executing query: {query}"),
        }
        let cursor = session.execute_query(query, parameters).await?;
        let cursor = self.state.track(&session, cursor).await;
        drop(session);
        let schema = self.state.result_schema(&cursor).await?;
        self.pending = Some(PendingResult { cursor, schema });
        Ok(())
    }

    async fn execute_ingest(&mut self, table: &str) -> DriverResult<u64> {
        let batch = self.bound.as_ref().ok_or_else(|| {
            DriverError::invalid_state("execute: bulk ingestion requires a bound batch")
        })?;
        // Type checks happen before anything reaches the backend.
        let columns = columns_from_schema(batch.schema_ref())?;
        let rows = record_batch_to_rows(batch)?;
        let definition = TableDefinition::new(table, columns);
        let mut session = self.state.session("execute").await?;
        match self.ingest_mode {
            IngestMode::Create | IngestMode::CreateAppend => {
                let if_not_exists = self.ingest_mode == IngestMode::CreateAppend;
                debug!("{}", definition.create_table_sql(if_not_exists));
                session.create_table(&definition, if_not_exists).await?;
            }
            IngestMode::Append => {}
        }
        debug!("{} ({} rows)", definition.insert_sql(), rows.len());
        session.execute_batch_insert(&definition, rows).await
    }

    /// Hands off the result of the last query to a new stream.
    /// The statement can still revoke the stream, but never reads from it.
    pub fn get_result_stream(&mut self) -> DriverResult<ResultStream> {
        self.ensure_open("get_result_stream")?;
        if let Some(StatementMode::Ingest(_)) = self.mode {
            return Err(DriverError::invalid_state(
                "get_result_stream: bulk ingestion does not produce a result",
            ));
        }
        let PendingResult { cursor, schema } = self.pending.take().ok_or_else(|| {
            DriverError::invalid_state("get_result_stream: execute() must be called first")
        })?;
        self.try_revoke_handed_off()?;
        let signal = CloseSignal::default();
        self.handed_off = Some(HandedOff {
            signal: signal.clone(),
            cursor: cursor.clone(),
        });
        Ok(ResultStream::new(
            cursor,
            schema,
            self.state.config.batch_size,
            vec![self.state.closed.clone(), signal],
        ))
    }

    /// Executes the query in partitioned mode.
    /// Each partition can be read by any connection to the same backend.
    pub async fn execute_partitions(&mut self) -> DriverResult<PartitionedResult> {
        self.ensure_open("execute_partitions")?;
        let query = match &self.mode {
            Some(StatementMode::Query(query)) => query.clone(),
            Some(StatementMode::Ingest(_)) => {
                return Err(DriverError::invalid_state(
                    "execute_partitions: bulk ingestion cannot be partitioned",
                ))
            }
            None => {
                return Err(DriverError::invalid_state(
                    "execute_partitions: a query must be set first",
                ))
            }
        };
        if self.bound.is_some() {
            return Err(DriverError::invalid_state(
                "execute_partitions: bound parameters are not supported",
            ));
        }
        self.discard_pending().await?;
        let mut session = self.state.session("execute_partitions").await?;
        let planned = session.plan_partitions(&query).await?;
        drop(session);
        debug!(
            "planned {} partition(s) for query: {query}",
            planned.partitions.len()
        );
        let schema = schema_from_columns(&planned.columns, &self.state.config.session_time_zone)?;
        Ok(PartitionedResult {
            schema,
            partitions: planned.partitions,
        })
    }

    /// Releases the unread result, if any, and revokes the stream handed off last.
    /// Calling this more than once is a no-op.
    ///
    /// The cursor of a revoked stream is closed here, unless the stream is reading
    /// from it on another task. It is then closed on the next call to the stream.
    pub fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.bound = None;
        let revoked = self.try_revoke_handed_off();
        self.try_discard_pending().and(revoked)
    }

    async fn discard_pending(&mut self) -> DriverResult<()> {
        match self.pending.take() {
            Some(pending) => pending.cursor.release().await,
            None => Ok(()),
        }
    }

    fn try_discard_pending(&mut self) -> DriverResult<()> {
        match self.pending.take() {
            Some(pending) => pending.cursor.try_release(),
            None => Ok(()),
        }
    }

    async fn revoke_handed_off(&mut self) -> DriverResult<()> {
        match self.handed_off.take() {
            Some(HandedOff { signal, cursor }) => {
                signal.close();
                cursor.release().await
            }
            None => Ok(()),
        }
    }

    fn try_revoke_handed_off(&mut self) -> DriverResult<()> {
        match self.handed_off.take() {
            Some(HandedOff { signal, cursor }) => {
                signal.close();
                cursor.try_release()
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("mode", &self.mode)
            .field("ingest_mode", &self.ingest_mode)
            .field("bound_rows", &self.bound.as_ref().map(|b| b.num_rows()))
            .field("pending", &self.pending.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // Streams already handed off outlive the statement.
        if let Err(e) = self.try_discard_pending() {
            warn!("failed to close pending result cursor: {e}");
        }
    }
}
