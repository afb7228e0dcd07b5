//! Schema-driven packet generator for exercising the acquisition pipeline.
//!
//! Takes the same field schema the service loads, plus a values table whose
//! header row names field keys and whose data rows supply one packet each.
//! Rows are replayed in order at the requested rate and repeat from the top
//! when exhausted. Unnamed fields encode as zero.

use crate::codec::{self, FieldType};
use crate::config::parse::{self, ConfigError};
use crate::config::FieldSpec;
use clap::Args;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::info;

#[derive(Debug, Error)]
pub enum SimulateError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema has no fields")]
    EmptySchema,

    #[error("values file has no data rows")]
    EmptyValues,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Field schema table to encode against
    #[arg(long)]
    pub schema: PathBuf,

    /// Values table: header row of field keys, one data row per packet
    #[arg(long)]
    pub values: PathBuf,

    /// Destination host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Destination UDP port
    #[arg(long)]
    pub port: u16,

    /// Packets per second
    #[arg(long, default_value_t = 1)]
    pub hz: u32,

    /// Stop after this many packets instead of repeating forever
    #[arg(long)]
    pub count: Option<u64>,
}

pub async fn run(args: SimulateArgs) -> Result<(), SimulateError> {
    let fields = parse::load_fields(&args.schema)?;
    if fields.is_empty() {
        return Err(SimulateError::EmptySchema);
    }
    let rows = load_values(&args.values)?;
    if rows.is_empty() {
        return Err(SimulateError::EmptyValues);
    }

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((args.host.as_str(), args.port)).await?;

    let period = Duration::from_millis((1000 / args.hz.max(1)).max(1) as u64);
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        fields = fields.len(),
        rows = rows.len(),
        host = %args.host,
        port = args.port,
        "sending simulated telemetry"
    );

    let mut sent = 0u64;
    'replay: loop {
        for row in &rows {
            tick.tick().await;
            let packet = encode_packet(&fields, row);
            socket.send(&packet).await?;
            sent += 1;
            if args.count == Some(sent) {
                break 'replay;
            }
        }
    }

    info!(sent = sent, "simulation complete");
    Ok(())
}

/// Parse the values table into per-row key/value maps. Cells that do not
/// parse as finite numbers are dropped, leaving the field at its zero
/// default for that packet.
fn load_values(path: &PathBuf) -> Result<Vec<HashMap<String, f64>>, SimulateError> {
    let raw = std::fs::read_to_string(path)?;
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());

    let headers: Vec<String> = match lines.next() {
        Some(header) => header.split(',').map(|h| h.trim().to_string()).collect(),
        None => return Ok(Vec::new()),
    };

    let rows = lines
        .map(|line| {
            headers
                .iter()
                .zip(line.split(','))
                .filter_map(|(key, cell)| {
                    let value: f64 = cell.trim().parse().ok()?;
                    value.is_finite().then(|| (key.clone(), value))
                })
                .collect()
        })
        .collect();
    Ok(rows)
}

/// Packet length implied by the schema: the highest field extent plus the
/// two trailing checksum bytes.
pub fn packet_length(fields: &[FieldSpec]) -> usize {
    fields.iter().map(|f| f.byte_extent()).max().unwrap_or(0) + 2
}

/// Encode one packet from `values` (keyed by `msgName:fieldName`) and append
/// the additive checksum.
pub fn encode_packet(fields: &[FieldSpec], values: &HashMap<String, f64>) -> Vec<u8> {
    let mut body = vec![0u8; packet_length(fields) - 2];
    for field in fields {
        let value = values.get(&field.key()).copied().unwrap_or(0.0);
        write_field(&mut body, field, value);
    }
    let checksum = codec::checksum16(&body);
    body.extend_from_slice(&checksum.to_le_bytes());
    body
}

fn write_field(body: &mut [u8], field: &FieldSpec, value: f64) {
    let offset = field.byte_offset;
    match field.data_type {
        FieldType::U1 => {
            // placed where the decoder reads it: bit 0 is the MSB of the byte
            let shift = 8 - (1 + field.bit_offset.min(7));
            body[offset] |= ((value as u8) & 1) << shift;
        }
        FieldType::U8 => body[offset] = value as u8,
        FieldType::U16 => body[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        FieldType::S16 => body[offset..offset + 2].copy_from_slice(&(value as i16).to_le_bytes()),
        FieldType::U32 => body[offset..offset + 4].copy_from_slice(&(value as u32).to_le_bytes()),
        FieldType::S32 => body[offset..offset + 4].copy_from_slice(&(value as i32).to_le_bytes()),
        FieldType::F32 => body[offset..offset + 4].copy_from_slice(&(value as f32).to_le_bytes()),
        FieldType::U64 => body[offset..offset + 8].copy_from_slice(&(value as u64).to_le_bytes()),
        FieldType::S64 => body[offset..offset + 8].copy_from_slice(&(value as i64).to_le_bytes()),
        FieldType::F64 => body[offset..offset + 8].copy_from_slice(&value.to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, ty: FieldType, byte_offset: usize, bit_offset: u32) -> FieldSpec {
        FieldSpec {
            connection: "sim".to_string(),
            msg_name: "m".to_string(),
            field_name: name.to_string(),
            data_type: ty,
            byte_offset,
            bit_offset,
            range_low: 0.0,
            range_high: 0.0,
            units: String::new(),
            description: String::new(),
        }
    }

    #[test]
    fn test_packet_length_covers_widest_field() {
        let fields = vec![
            field("a", FieldType::U8, 0, 0),
            field("b", FieldType::F64, 4, 0),
        ];
        assert_eq!(packet_length(&fields), 14);
    }

    #[test]
    fn test_encoded_packet_verifies_and_decodes() {
        let fields = vec![
            field("altitude", FieldType::F32, 0, 0),
            field("count", FieldType::U16, 4, 0),
            field("temperature", FieldType::S16, 6, 0),
            field("flag", FieldType::U1, 8, 3),
        ];
        let values: HashMap<String, f64> = [
            ("m:altitude".to_string(), 800.5),
            ("m:count".to_string(), 943.0),
            ("m:temperature".to_string(), -40.0),
            ("m:flag".to_string(), 1.0),
        ]
        .into_iter()
        .collect();

        let packet = encode_packet(&fields, &values);
        assert!(codec::verify_checksum(&packet));

        for field in &fields {
            let decoded =
                codec::decode_field(&packet, field.byte_offset, field.bit_offset, field.data_type)
                    .unwrap();
            let expected = values[&field.key()];
            assert!(
                (decoded - expected).abs() < 1e-6,
                "{}: got {}, want {}",
                field.key(),
                decoded,
                expected
            );
        }
    }

    #[test]
    fn test_missing_value_encodes_as_zero() {
        let fields = vec![field("a", FieldType::U32, 0, 0)];
        let packet = encode_packet(&fields, &HashMap::new());
        assert_eq!(
            codec::decode_field(&packet, 0, 0, FieldType::U32).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_bit_fields_share_a_byte() {
        let fields = vec![
            field("b3", FieldType::U1, 0, 3),
            field("b7", FieldType::U1, 0, 7),
        ];
        let values: HashMap<String, f64> = [
            ("m:b3".to_string(), 1.0),
            ("m:b7".to_string(), 1.0),
        ]
        .into_iter()
        .collect();

        let packet = encode_packet(&fields, &values);
        assert_eq!(packet[0], 0b0001_0001);
    }

    #[test]
    fn test_values_rows_drop_unparseable_cells() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("values.csv");
        std::fs::write(&path, "m:a,m:b\n1.5,oops\n2.5,3\n").unwrap();

        let rows = load_values(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("m:a"), Some(&1.5));
        assert_eq!(rows[0].get("m:b"), None);
        assert_eq!(rows[1].get("m:b"), Some(&3.0));
    }
}
