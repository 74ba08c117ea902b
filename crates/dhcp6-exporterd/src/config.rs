//! Exporter configuration.
//!
//! The DHCP server hands the exporter a JSON map of the form
//!
//! ```json
//! {
//!   "connection-type": "nxos",
//!   "connection-params": {
//!     "host": "http://10.0.0.1:80",
//!     "credentials": { "login": "admin", "password": "secret" },
//!     "heartbeat-interval": 10
//!   }
//! }
//! ```
//!
//! The daemon reads the same structure from a TOML file. Validation errors
//! name the offending field.

use crate::error::{ExporterError, Result};
use crate::pool::DEFAULT_POOL_SIZE;
use crate::transport::{BasicAuth, TlsInfo, TransportConfig, DEFAULT_REQUEST_TIMEOUT};
use reqwest::Url;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// The only supported `connection-type`.
pub const CONNECTION_TYPE_NXOS: &str = "nxos";

/// Validated switch connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub url: Url,
    pub auth: BasicAuth,
    /// Present only for `https` hosts.
    pub tls: Option<TlsInfo>,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
    pub pool_size: usize,
    pub multi_threaded: bool,
}

fn field_error(field: &str, what: &str) -> ExporterError {
    ExporterError::config(field, format!("field \"{}\" in \"connection-params\" {}", field, what))
}

fn required_str<'a>(map: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    match map.get(field) {
        None | Some(Value::Null) => Err(field_error(field, "must not be null")),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(field_error(field, "must be a string")),
    }
}

fn optional_positive(map: &Map<String, Value>, field: &str) -> Result<Option<u64>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) if n > 0 => Ok(Some(n)),
            _ => Err(field_error(field, "must be a positive integer")),
        },
    }
}

impl ConnectionParams {
    /// Parses and validates the `connection-params` map.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => {
                return Err(ExporterError::config(
                    "connection-params",
                    "NX-OS exporter configuration must not be null",
                ))
            }
            _ => return Err(ExporterError::config("connection-params", "must be a map")),
        };

        let host = required_str(map, "host")?;
        let url = Url::parse(host)
            .map_err(|e| field_error("host", &format!("must be a valid URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(field_error("host", "must be a valid http or https URL"));
        }

        let credentials = match map.get("credentials") {
            None | Some(Value::Null) => return Err(field_error("credentials", "must not be null")),
            Some(Value::Object(c)) => c,
            Some(_) => return Err(field_error("credentials", "must be a map")),
        };
        let auth = BasicAuth {
            login: required_str(credentials, "login")?.to_string(),
            password: required_str(credentials, "password")?.to_string(),
        };

        let tls = if url.scheme() == "https" {
            Some(TlsInfo {
                certificate: PathBuf::from(required_str(credentials, "certificate")?),
                keyfile: PathBuf::from(required_str(credentials, "keyfile")?),
            })
        } else {
            None
        };

        let heartbeat_interval = optional_positive(map, "heartbeat-interval")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        let request_timeout = optional_positive(map, "request-timeout")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let pool_size = optional_positive(map, "pool-size")?
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_POOL_SIZE);
        let multi_threaded = match map.get("multi-threaded") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(field_error("multi-threaded", "must be a boolean")),
        };

        Ok(Self {
            url,
            auth,
            tls,
            heartbeat_interval,
            request_timeout,
            pool_size,
            multi_threaded,
        })
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            multi_threaded: self.multi_threaded,
            pool_size: self.pool_size,
            auth: Some(self.auth.clone()),
        }
    }
}

/// Top-level exporter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    pub connection: ConnectionParams,
}

impl ExporterConfig {
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| ExporterError::config("config", "must be a map"))?;

        match map.get("connection-type") {
            Some(Value::String(t)) if t == CONNECTION_TYPE_NXOS => {}
            Some(Value::String(t)) => {
                return Err(ExporterError::config(
                    "connection-type",
                    format!("unsupported connection type \"{}\"", t),
                ))
            }
            _ => {
                return Err(ExporterError::config(
                    "connection-type",
                    "must be the string \"nxos\"",
                ))
            }
        }

        let params = map.get("connection-params").unwrap_or(&Value::Null);
        Ok(Self {
            connection: ConnectionParams::from_json(params)?,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(text)?;
        Self::from_json(&serde_json::to_value(value)?)
    }

    /// Loads a TOML file, or JSON when the extension is `.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ExporterError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Self::from_json(&serde_json::from_str(&text)?)
        } else {
            Self::from_toml_str(&text)
        }
    }
}
