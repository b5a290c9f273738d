use std::sync::Arc;

use datafusion::arrow::datatypes::Schema;
use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SQLOptions;
use datafusion::physical_plan::{execute_stream, ExecutionPlan};
use datafusion::prelude::{SessionConfig, SessionContext};
use log::debug;
use sail_adbc::types::Row;
use sail_adbc::{
    BackendCursor, BackendSession, DriverError, DriverResult, PartitionDescriptor,
    PartitionedQuery, TableDefinition,
};

use crate::backend::DatabaseRegistry;
use crate::cursor::{columns_from_result_schema, plain_schema, MemoryCursor};
use crate::database::MemoryDatabase;
use crate::error::execution_error;
use crate::scalar::scalar_from_sql_value;
use crate::ticket::PartitionTicket;

/// A session bound to one in-memory database.
///
/// Every query is planned against a snapshot of the tables taken when
/// the query is executed. Only read-only queries are accepted.
pub struct MemorySession {
    database: Arc<MemoryDatabase>,
    registry: DatabaseRegistry,
    target_partitions: usize,
    closed: bool,
}

impl MemorySession {
    pub(crate) fn new(
        database: Arc<MemoryDatabase>,
        registry: DatabaseRegistry,
        target_partitions: usize,
    ) -> Self {
        Self {
            database,
            registry,
            target_partitions,
            closed: false,
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            Err(DriverError::invalid_state("the session is closed"))
        } else {
            Ok(())
        }
    }

    fn context(
        database: &MemoryDatabase,
        target_partitions: usize,
    ) -> DriverResult<SessionContext> {
        let config = SessionConfig::new().with_target_partitions(target_partitions);
        let ctx = SessionContext::new_with_config(config);
        database.register_tables(&ctx)?;
        Ok(ctx)
    }

    /// Plans the query as a read-only DataFrame. Placeholders are left unbound.
    async fn dataframe(ctx: &SessionContext, query: &str) -> DriverResult<DataFrame> {
        let options = SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false);
        ctx.sql_with_options(query, options)
            .await
            .map_err(execution_error)
    }

    async fn plan(
        ctx: &SessionContext,
        query: &str,
        parameters: Option<&Row>,
    ) -> DriverResult<Arc<dyn ExecutionPlan>> {
        let mut df = Self::dataframe(ctx, query).await?;
        if let Some(parameters) = parameters {
            let values = parameters
                .iter()
                .map(scalar_from_sql_value)
                .collect::<Vec<_>>();
            df = df.with_param_values(values).map_err(execution_error)?;
        }
        df.create_physical_plan().await.map_err(execution_error)
    }
}

fn same_column_types(left: &Schema, right: &Schema) -> bool {
    let left = plain_schema(left);
    let right = plain_schema(right);
    left.fields().len() == right.fields().len()
        && left
            .fields()
            .iter()
            .zip(right.fields())
            .all(|(l, r)| l.data_type() == r.data_type())
}

#[async_trait::async_trait]
impl BackendSession for MemorySession {
    async fn execute_query(
        &mut self,
        query: &str,
        parameters: Option<Vec<Row>>,
    ) -> DriverResult<Box<dyn BackendCursor>> {
        self.ensure_open()?;
        let ctx = Self::context(&self.database, self.target_partitions)?;
        let Some(parameters) = parameters else {
            let plan = Self::plan(&ctx, query, None).await?;
            let schema = plan.schema();
            let task_ctx = ctx.task_ctx();
            let stream = execute_stream(plan, task_ctx).map_err(execution_error)?;
            return Ok(Box::new(MemoryCursor::new(schema, vec![stream])));
        };
        if parameters.is_empty() {
            // Nothing to execute. The result keeps the columns of the query.
            let df = Self::dataframe(&ctx, query).await?;
            let schema = df.schema().inner().clone();
            return Ok(Box::new(MemoryCursor::new(schema, vec![])));
        }
        let mut schema = None;
        let mut streams = Vec::with_capacity(parameters.len());
        for (index, row) in parameters.iter().enumerate() {
            let plan = Self::plan(&ctx, query, Some(row))
                .await
                .map_err(|e| e.at_row(index))?;
            match &schema {
                None => schema = Some(plan.schema()),
                Some(first) if !same_column_types(first, &plan.schema()) => {
                    return Err(DriverError::execution(format!(
                        "the result schema changed with the parameters: {}",
                        plan.schema()
                    ))
                    .at_row(index))
                }
                Some(_) => {}
            }
            let task_ctx = ctx.task_ctx();
            streams.push(execute_stream(plan, task_ctx).map_err(execution_error)?);
        }
        let schema = schema.ok_or_else(|| DriverError::execution("no parameter set to execute"))?;
        Ok(Box::new(MemoryCursor::new(schema, streams)))
    }

    async fn plan_partitions(&mut self, query: &str) -> DriverResult<PartitionedQuery> {
        self.ensure_open()?;
        let ctx = Self::context(&self.database, self.target_partitions)?;
        let plan = Self::plan(&ctx, query, None).await?;
        let partition_count = plan.properties().output_partitioning().partition_count();
        debug!(
            "query planned with {partition_count} partition(s) in {}",
            self.database.name()
        );
        let partitions = (0..partition_count)
            .map(|partition| {
                PartitionTicket {
                    database: self.database.name().to_string(),
                    query: query.to_string(),
                    target_partitions: self.target_partitions,
                    partition,
                    partition_count,
                }
                .encode()
            })
            .collect::<DriverResult<Vec<_>>>()?;
        Ok(PartitionedQuery {
            columns: columns_from_result_schema(&plain_schema(&plan.schema())),
            partitions,
        })
    }

    async fn read_partition(
        &mut self,
        partition: &PartitionDescriptor,
    ) -> DriverResult<Box<dyn BackendCursor>> {
        self.ensure_open()?;
        let ticket = PartitionTicket::decode(partition)?;
        let database = self
            .registry
            .get(&ticket.database)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                DriverError::execution(format!("database {} does not exist", ticket.database))
            })?;
        let ctx = Self::context(&database, ticket.target_partitions)?;
        let plan = Self::plan(&ctx, &ticket.query, None).await?;
        let partition_count = plan.properties().output_partitioning().partition_count();
        if partition_count != ticket.partition_count || ticket.partition >= partition_count {
            return Err(DriverError::execution(format!(
                "{partition} is no longer valid: the query now has {partition_count} partition(s)"
            )));
        }
        let schema = plan.schema();
        let stream = plan
            .execute(ticket.partition, ctx.task_ctx())
            .map_err(execution_error)?;
        Ok(Box::new(MemoryCursor::new(schema, vec![stream])))
    }

    async fn create_table(
        &mut self,
        table: &TableDefinition,
        if_not_exists: bool,
    ) -> DriverResult<()> {
        self.ensure_open()?;
        self.database.create_table(table, if_not_exists)
    }

    async fn execute_batch_insert(
        &mut self,
        table: &TableDefinition,
        rows: Vec<Row>,
    ) -> DriverResult<u64> {
        self.ensure_open()?;
        self.database.insert(table, rows)
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            debug!("closing memory session for {}", self.database.name());
            self.closed = true;
        }
        Ok(())
    }
}
