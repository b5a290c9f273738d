use std::collections::BTreeMap;
use std::fmt;

use crate::error::{DriverError, DriverResult};

/// Option keys recognized by every backend.
pub struct OptionKey;

impl OptionKey {
    /// The backend connection string.
    pub const TARGET: &'static str = "target";
    pub const USERNAME: &'static str = "username";
    pub const PASSWORD: &'static str = "password";
    /// Puts a statement into bulk-ingest mode for the named table.
    pub const INGEST_TARGET_TABLE: &'static str = "ingest.target_table";
    /// The ingest policy of a statement (`create`, `append`, or `create_append`).
    pub const INGEST_MODE: &'static str = "ingest.mode";
}

/// Validated options for opening a connection.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub target: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// The default ingest target for statements created by the connection.
    pub ingest_target_table: Option<String>,
    /// Backend-specific options, keyed by option name.
    pub extra: BTreeMap<String, String>,
}

impl ConnectionOptions {
    /// Validates key-value options.
    /// Keys outside the common set are accepted only if `is_backend_option` recognizes them.
    pub fn try_from_pairs<I, K, V>(
        pairs: I,
        is_backend_option: impl Fn(&str) -> bool,
    ) -> DriverResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut target = None;
        let mut options = Self::default();
        for (key, value) in pairs {
            let key = key.as_ref();
            let value = value.into();
            match key {
                OptionKey::TARGET => target = Some(value),
                OptionKey::USERNAME => options.username = Some(value),
                OptionKey::PASSWORD => options.password = Some(value),
                OptionKey::INGEST_TARGET_TABLE => {
                    if value.is_empty() {
                        return Err(DriverError::connection(
                            "ingest target table must not be empty",
                        ));
                    }
                    options.ingest_target_table = Some(value)
                }
                _ if is_backend_option(key) => {
                    options.extra.insert(key.to_string(), value);
                }
                _ => {
                    return Err(DriverError::connection(format!(
                        "unrecognized connection option: {key}"
                    )))
                }
            }
        }
        options.target = match target {
            Some(target) if !target.trim().is_empty() => target,
            _ => {
                return Err(DriverError::connection(format!(
                    "missing connection option: {}",
                    OptionKey::TARGET
                )))
            }
        };
        Ok(options)
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("target", &self.target)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ingest_target_table", &self.ingest_target_table)
            .field("extra", &self.extra)
            .finish()
    }
}
