use crate::codec::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Bootstrap settings for the daemon, loaded from a YAML file.
///
/// The field schema and connection table live in separate delimited files so
/// they can be re-generated and hot-reloaded independently of the settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_fields_path")]
    pub fields_path: PathBuf,

    #[serde(default = "default_connections_path")]
    pub connections_path: PathBuf,

    /// Listen address for the line-based consumer broadcast.
    #[serde(default = "default_broadcast_listen")]
    pub broadcast_listen: String,
}

fn default_fields_path() -> PathBuf {
    PathBuf::from("udaq_fields.csv")
}

fn default_connections_path() -> PathBuf {
    PathBuf::from("udaq_connections.csv")
}

fn default_broadcast_listen() -> String {
    "127.0.0.1:9069".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fields_path: default_fields_path(),
            connections_path: default_connections_path(),
            broadcast_listen: default_broadcast_listen(),
        }
    }
}

/// One decodable value within a telemetry message.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Name of the connection this field arrives on.
    pub connection: String,
    pub msg_name: String,
    pub field_name: String,
    pub data_type: FieldType,
    pub byte_offset: usize,
    pub bit_offset: u32,
    /// Expected value range, metadata only.
    pub range_low: f64,
    pub range_high: f64,
    pub units: String,
    pub description: String,
}

impl FieldSpec {
    /// Unique key within a loaded configuration.
    pub fn key(&self) -> String {
        format!("{}:{}", self.msg_name, self.field_name)
    }

    /// Exclusive end of the byte range this field occupies.
    pub fn byte_extent(&self) -> usize {
        self.byte_offset + self.data_type.byte_width()
    }
}

/// A named UDP source. Multiple names may resolve to the same port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEndpoint {
    pub name: String,
    pub port: u16,
}

/// The active schema plus endpoint table, swapped wholesale on reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    pub fields: Vec<FieldSpec>,
    pub connections: Vec<ConnectionEndpoint>,
}

impl Configuration {
    /// An empty configuration signals "unload everything".
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve a connection name to its UDP port, case-insensitively.
    pub fn resolve_port(&self, connection: &str) -> Option<u16> {
        self.connections
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(connection))
            .map(|c| c.port)
    }

    /// Group fields by resolved port. Fields naming an unknown connection are
    /// skipped here; `parse::load_configuration` rejects them at load time.
    ///
    /// The port is the grouping key, not the connection name, so two named
    /// connections sharing a port decode through one socket.
    pub fn group_by_port(&self) -> BTreeMap<u16, Vec<FieldSpec>> {
        let mut groups: BTreeMap<u16, Vec<FieldSpec>> = BTreeMap::new();
        for field in &self.fields {
            if let Some(port) = self.resolve_port(&field.connection) {
                groups.entry(port).or_default().push(field.clone());
            }
        }
        groups
    }

    /// Every field key in schema order, for the broadcast inventory.
    pub fn field_keys(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.key()).collect()
    }
}
