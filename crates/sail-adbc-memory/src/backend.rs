use std::sync::Arc;

use dashmap::DashMap;
use log::info;
use sail_adbc::{BackendSession, ConnectionOptions, DriverError, DriverResult, TabularBackend};

use crate::database::MemoryDatabase;
use crate::session::MemorySession;

pub(crate) type DatabaseRegistry = Arc<DashMap<String, Arc<MemoryDatabase>>>;

/// The connection string prefix of the memory backend, followed by the database name.
pub const MEMORY_TARGET_PREFIX: &str = "mem://";

/// Overrides the query parallelism of a connection.
pub const TARGET_PARTITIONS_OPTION: &str = "mem.target_partitions";

/// A backend that keeps tables in memory and answers queries with DataFusion.
///
/// Databases are created on first connection and live as long as the backend.
/// Connections to the same target see the same tables.
#[derive(Clone)]
pub struct MemoryBackend {
    registry: DatabaseRegistry,
    target_partitions: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(DashMap::new()),
            target_partitions: 1,
        }
    }

    /// Sets the number of partitions a query is planned with.
    /// Values below one are raised to one.
    pub fn with_target_partitions(mut self, target_partitions: usize) -> Self {
        self.target_partitions = target_partitions.max(1);
        self
    }

    pub fn database(&self, name: &str) -> Option<Arc<MemoryDatabase>> {
        self.registry.get(name).map(|entry| entry.value().clone())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn database_name(target: &str) -> DriverResult<&str> {
    target
        .strip_prefix(MEMORY_TARGET_PREFIX)
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .ok_or_else(|| {
            DriverError::connection(format!(
                "invalid memory target {target}: expected {MEMORY_TARGET_PREFIX}<database>"
            ))
        })
}

#[async_trait::async_trait]
impl TabularBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn validate_target(&self, target: &str) -> DriverResult<()> {
        database_name(target).map(|_| ())
    }

    fn supports_option(&self, key: &str) -> bool {
        key == TARGET_PARTITIONS_OPTION
    }

    async fn open_session(
        &self,
        options: &ConnectionOptions,
    ) -> DriverResult<Box<dyn BackendSession>> {
        let name = database_name(&options.target)?;
        let target_partitions = match options.extra.get(TARGET_PARTITIONS_OPTION) {
            Some(value) => match value.parse::<usize>() {
                Ok(n) if n > 0 => n,
                Ok(_) => {
                    return Err(DriverError::connection(format!(
                        "{TARGET_PARTITIONS_OPTION} must be positive"
                    )))
                }
                Err(e) => {
                    return Err(DriverError::connection_with(
                        format!("invalid value for {TARGET_PARTITIONS_OPTION}: {value}"),
                        e,
                    ))
                }
            },
            None => self.target_partitions,
        };
        let database = self
            .registry
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("creating memory database {name}");
                Arc::new(MemoryDatabase::new(name))
            })
            .value()
            .clone();
        Ok(Box::new(MemorySession::new(
            database,
            self.registry.clone(),
            target_partitions,
        )))
    }
}
