//! Hot-store connection configuration.

use serde::{Deserialize, Serialize};

/// Connection settings for the analytical store's HTTP interface.
///
/// Note: `port` is the HTTP interface port (8123 by default), not the
/// native protocol port (9000). The engine only speaks HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store hostname.
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP interface port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username.
    #[serde(default = "default_user")]
    pub user: String,

    /// Password. Usually supplied via `${VAR}` interpolation.
    #[serde(default)]
    pub password: String,

    /// Database holding the hot table.
    #[serde(default = "default_database")]
    pub database: String,

    /// Hot table name (unqualified).
    #[serde(default = "default_table")]
    pub table: String,

    /// Boolean marker column recording whether a row has been exported.
    #[serde(default = "default_marker_column")]
    pub marker_column: String,

    /// Per-request timeout in seconds. Mutations over large tables can run
    /// for minutes, so this defaults generously.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Value for the store's `mutations_sync` setting. 2 waits for the
    /// mutation on all replicas; 1 waits on the local replica only. 0 would
    /// make mutations asynchronous and is rejected by validation, since the
    /// engine's ordering guarantees depend on confirmed completion.
    #[serde(default = "default_mutation_sync")]
    pub mutation_sync: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            table: default_table(),
            marker_column: default_marker_column(),
            timeout_secs: default_timeout_secs(),
            mutation_sync: default_mutation_sync(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8123
}

fn default_user() -> String {
    "default".to_string()
}

fn default_database() -> String {
    "telemetry".to_string()
}

fn default_table() -> String {
    "flow_records".to_string()
}

fn default_marker_column() -> String {
    "exported".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_mutation_sync() -> u8 {
    2
}

impl StoreConfig {
    /// Fully qualified table name.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// Validate identifiers and settings.
    ///
    /// Identifier fields are interpolated into engine-built count queries,
    /// so they are restricted to plain identifier characters.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("store.database", &self.database),
            ("store.table", &self.table),
            ("store.marker_column", &self.marker_column),
        ] {
            if value.is_empty() {
                return Err(format!("{field} must not be empty"));
            }
            if !value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(format!(
                    "{field} may contain only alphanumeric characters and underscores, got {value:?}"
                ));
            }
        }

        if self.mutation_sync == 0 {
            return Err(
                "store.mutation_sync = 0 would make mutations asynchronous; the engine \
                 requires confirmed completion (use 1 or 2)"
                    .to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_http_interface() {
        let config = StoreConfig::default();
        assert_eq!(config.port, 8123);
        assert_eq!(config.mutation_sync, 2);
        assert_eq!(config.qualified_table(), "telemetry.flow_records");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_identifier_table() {
        let config = StoreConfig {
            table: "flows; DROP TABLE x".to_string(),
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_async_mutations() {
        let config = StoreConfig {
            mutation_sync: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("mutation_sync"));
    }

    #[test]
    fn parses_minimal_toml() {
        let config: StoreConfig = toml::from_str("host = \"ch.internal\"").unwrap();
        assert_eq!(config.host, "ch.internal");
        assert_eq!(config.table, "flow_records");
    }
}
