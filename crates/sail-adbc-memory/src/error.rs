use datafusion::error::DataFusionError;
use sail_adbc::DriverError;

pub(crate) fn execution_error(error: DataFusionError) -> DriverError {
    DriverError::execution_with(error.to_string(), error)
}
