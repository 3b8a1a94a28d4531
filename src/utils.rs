//! Packet trace helpers

use tracing::info;

/// Upper-case hex bytes separated by spaces: `9D 03 00 01`.
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log one frame with its direction, e.g. `[MODBUS-RTU] send slave:157 9D 03 ...`.
pub fn log_packet(direction: &str, data: &[u8], slave_address: Option<u8>) {
    let hex_string = format_hex_packet(data);
    match slave_address {
        Some(id) => info!("[MODBUS-RTU] {} slave:{} {}", direction, id, hex_string),
        None => info!("[MODBUS-RTU] {} {}", direction, hex_string),
    }
}
