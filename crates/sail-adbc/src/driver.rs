use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use crate::backend::TabularBackend;
use crate::config::{ConnectionOptions, DriverConfig};
use crate::connection::Connection;
use crate::error::DriverResult;

/// The entry point of the library. A driver opens connections to one backend.
#[derive(Clone)]
pub struct Driver {
    backend: Arc<dyn TabularBackend>,
    config: Arc<DriverConfig>,
}

impl Driver {
    pub fn new(backend: Arc<dyn TabularBackend>, config: DriverConfig) -> DriverResult<Self> {
        config.validate()?;
        info!("initialized driver for backend {}", backend.name());
        Ok(Self {
            backend,
            config: Arc::new(config),
        })
    }

    /// Creates a driver with the configuration loaded from the environment.
    pub fn try_new(backend: Arc<dyn TabularBackend>) -> DriverResult<Self> {
        Self::new(backend, DriverConfig::load()?)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Validates the options and opens a connection with its own backend session.
    pub async fn open<I, K, V>(&self, options: I) -> DriverResult<Connection>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let options =
            ConnectionOptions::try_from_pairs(options, |key| self.backend.supports_option(key))?;
        self.open_with(options).await
    }

    /// Opens a connection with options that are already validated.
    pub async fn open_with(&self, options: ConnectionOptions) -> DriverResult<Connection> {
        self.backend.validate_target(&options.target)?;
        debug!(
            "opening {} session for {}",
            self.backend.name(),
            options.target
        );
        let session = self.backend.open_session(&options).await?;
        Ok(Connection::new(session, options, self.config.clone()))
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}
