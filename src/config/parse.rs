//! Loading of the settings file and the delimited schema/connection tables.
//!
//! Tables are comma-delimited with a header row; columns are addressed by
//! header name, so column order is free and unknown columns are ignored.

use super::expand_env_vars;
use super::types::{Configuration, ConnectionEndpoint, FieldSpec, Settings};
use crate::codec::{CodecError, FieldType};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{path}: missing required column {column}")]
    MissingColumn { path: String, column: &'static str },

    #[error("{path}:{line}: {message}")]
    Row {
        path: String,
        line: usize,
        message: String,
    },

    #[error("duplicate field key: {0}")]
    DuplicateKey(String),

    #[error("invalid field {key}: {message}")]
    InvalidField { key: String, message: String },

    #[error("field {key} references unknown connection {connection}")]
    UnknownConnection { key: String, connection: String },
}

/// Load the YAML settings file, expanding `$env{VAR}` references first.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let settings = serde_yaml::from_str(&expand_env_vars(&raw))?;
    Ok(settings)
}

/// Load and validate the full configuration named by `settings`.
///
/// A missing schema file yields an empty configuration (unload); a missing
/// connection table yields an empty connection list, which then fails
/// validation for any schema that still routes fields. Parse or validation
/// failures are returned so the caller can keep the previous configuration
/// active.
pub fn load_configuration(settings: &Settings) -> Result<Configuration, ConfigError> {
    if !settings.fields_path.exists() {
        warn!(path = %settings.fields_path.display(), "no field schema to load");
        return Ok(Configuration::default());
    }

    let connections = if settings.connections_path.exists() {
        load_connections(&settings.connections_path)?
    } else {
        warn!(path = %settings.connections_path.display(), "no connection table to load");
        Vec::new()
    };

    let fields = load_fields(&settings.fields_path)?;
    let config = Configuration {
        fields,
        connections,
    };
    validate(&config)?;

    info!(
        fields = config.fields.len(),
        connections = config.connections.len(),
        "loaded configuration"
    );
    Ok(config)
}

/// Parse the field schema table. Shared with the simulator, which routes by
/// explicit port instead of the connection table.
pub fn load_fields(path: &Path) -> Result<Vec<FieldSpec>, ConfigError> {
    let table = Table::read(path)?;
    for column in ["CONNECTION", "MSG_NAME", "FIELD_NAME", "DATA_TYPE", "BYTE_OFFSET", "BIT_OFFSET"]
    {
        table.require(column)?;
    }

    let mut fields = Vec::new();
    for row in table.rows() {
        let data_type: FieldType = row
            .get("DATA_TYPE")
            .parse()
            .map_err(|e: CodecError| row.invalid(e.to_string()))?;
        fields.push(FieldSpec {
            connection: row.get("CONNECTION").to_string(),
            msg_name: row.get("MSG_NAME").to_string(),
            field_name: row.get("FIELD_NAME").to_string(),
            data_type,
            byte_offset: row.parse_number("BYTE_OFFSET")?,
            bit_offset: row.parse_number("BIT_OFFSET")?,
            range_low: row.parse_optional_number("RANGE_LOW")?.unwrap_or(0.0),
            range_high: row.parse_optional_number("RANGE_HIGH")?.unwrap_or(0.0),
            units: row.get("UNITS").to_string(),
            description: row.get("DESCRIPTION").to_string(),
        });
    }
    Ok(fields)
}

fn load_connections(path: &Path) -> Result<Vec<ConnectionEndpoint>, ConfigError> {
    let table = Table::read(path)?;
    table.require("CONNECTION_NAME")?;
    table.require("PORT")?;

    let mut connections = Vec::new();
    for row in table.rows() {
        connections.push(ConnectionEndpoint {
            name: row.get("CONNECTION_NAME").to_string(),
            port: row.parse_number("PORT")?,
        });
    }
    Ok(connections)
}

fn validate(config: &Configuration) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for field in &config.fields {
        let key = field.key();
        if !seen.insert(key.clone()) {
            return Err(ConfigError::DuplicateKey(key));
        }
        if config.resolve_port(&field.connection).is_none() {
            return Err(ConfigError::UnknownConnection {
                key,
                connection: field.connection.clone(),
            });
        }
        if field.data_type == FieldType::U1 && field.bit_offset > 7 {
            return Err(ConfigError::InvalidField {
                key,
                message: format!("bit offset {} outside a byte", field.bit_offset),
            });
        }
    }
    Ok(())
}

/// A header-addressed delimited table.
struct Table {
    path: String,
    header: HashMap<String, usize>,
    lines: Vec<(usize, Vec<String>)>,
}

struct Row<'a> {
    table: &'a Table,
    line: usize,
    cells: &'a [String],
}

impl Table {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let path = path.display().to_string();

        let mut lines = raw
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l))
            .filter(|(_, l)| !l.trim().is_empty());

        let header = match lines.next() {
            Some((_, header_line)) => header_line
                .split(',')
                .enumerate()
                .map(|(i, name)| (name.trim().to_ascii_uppercase(), i))
                .collect(),
            None => HashMap::new(),
        };

        let lines = lines
            .map(|(n, l)| (n, l.split(',').map(|c| c.trim().to_string()).collect()))
            .collect();

        Ok(Self {
            path,
            header,
            lines,
        })
    }

    fn require(&self, column: &'static str) -> Result<(), ConfigError> {
        if self.header.contains_key(column) {
            Ok(())
        } else {
            Err(ConfigError::MissingColumn {
                path: self.path.clone(),
                column,
            })
        }
    }

    fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.lines.iter().map(|(line, cells)| Row {
            table: self,
            line: *line,
            cells,
        })
    }
}

impl Row<'_> {
    fn get(&self, column: &str) -> &str {
        self.table
            .header
            .get(column)
            .and_then(|i| self.cells.get(*i))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    fn parse_number<T: std::str::FromStr>(&self, column: &str) -> Result<T, ConfigError> {
        let cell = self.get(column);
        cell.parse()
            .map_err(|_| self.invalid(format!("invalid {}: {:?}", column, cell)))
    }

    fn parse_optional_number(&self, column: &str) -> Result<Option<f64>, ConfigError> {
        let cell = self.get(column);
        if cell.is_empty() {
            return Ok(None);
        }
        cell.parse()
            .map(Some)
            .map_err(|_| self.invalid(format!("invalid {}: {:?}", column, cell)))
    }

    fn invalid(&self, message: String) -> ConfigError {
        ConfigError::Row {
            path: self.table.path.clone(),
            line: self.line,
            message,
        }
    }
}
