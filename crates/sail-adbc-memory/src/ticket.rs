use sail_adbc::{DriverError, DriverResult, PartitionDescriptor};
use serde::{Deserialize, Serialize};

/// The backend payload of a partition descriptor.
///
/// A partition is re-planned from the query when it is read, so any session
/// of the same backend can read it as long as the planned partition count
/// has not changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PartitionTicket {
    pub database: String,
    pub query: String,
    pub target_partitions: usize,
    pub partition: usize,
    pub partition_count: usize,
}

impl PartitionTicket {
    pub fn encode(&self) -> DriverResult<PartitionDescriptor> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| DriverError::execution_with("failed to encode partition", e))?;
        let name = format!("{}/partition-{}", self.database, self.partition);
        Ok(PartitionDescriptor::new(Some(name), payload))
    }

    pub fn decode(partition: &PartitionDescriptor) -> DriverResult<Self> {
        serde_json::from_slice(partition.descriptor()).map_err(|e| {
            DriverError::invalid_state(format!("partition descriptor is not recognized: {e}"))
        })
    }
}
