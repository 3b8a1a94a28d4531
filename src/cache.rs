//! Register value cache
//!
//! Keys are canonical four-digit lower-case hex register addresses
//! (`"01f4"`), values the lower-case hex of the raw payload bytes last read
//! from that register (`"002a"`). Entries are created on the first
//! successful read and overwritten on every later one; nothing is evicted.
//!
//! Only the master mutates the cache, and only while it holds the
//! transaction lock. Readers get eventually-consistent copies.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use parking_lot::RwLock;

use crate::error::{ModbusError, ModbusResult};

/// Canonical cache key for a register address.
pub fn register_key(register: u16) -> String {
    format!("{:04x}", register)
}

/// Parse a hex register address such as `"01f4"`, `"1F4"` or `"0x01f4"`.
pub fn parse_register(text: &str) -> ModbusResult<u16> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u16::from_str_radix(digits, 16)
        .map_err(|_| ModbusError::validation(format!("invalid register address '{}'", text)))
}

/// Lower-case contiguous hex of `bytes`.
pub fn hex_value(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Last-known register values.
#[derive(Debug, Default)]
pub struct RegisterCache {
    entries: RwLock<HashMap<String, String>>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a register by hex address; the key is normalised first.
    pub fn get(&self, register: &str) -> Option<String> {
        let register = parse_register(register).ok()?;
        self.get_register(register)
    }

    pub fn get_register(&self, register: u16) -> Option<String> {
        self.entries.read().get(&register_key(register)).cloned()
    }

    pub(crate) fn update(&self, register: u16, value: String) {
        self.entries.write().insert(register_key(register), value);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Ordered copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_key_format() {
        assert_eq!(register_key(1), "0001");
        assert_eq!(register_key(0x01F4), "01f4");
        assert_eq!(register_key(0xFFFF), "ffff");
    }

    #[test]
    fn test_parse_register() {
        assert_eq!(parse_register("01f4").unwrap(), 0x01F4);
        assert_eq!(parse_register("1F4").unwrap(), 0x01F4);
        assert_eq!(parse_register(" 0x01f4 ").unwrap(), 0x01F4);
        assert!(parse_register("zz").is_err());
        assert!(parse_register("12345").is_err());
    }

    #[test]
    fn test_hex_value() {
        assert_eq!(hex_value(&[0x00, 0x2A]), "002a");
        assert_eq!(hex_value(&[0xDE, 0xAD, 0xBE, 0xEF]), "deadbeef");
        assert_eq!(hex_value(&[]), "");
    }

    #[test]
    fn test_update_overwrites_in_place() {
        let cache = RegisterCache::new();
        assert!(cache.is_empty());

        cache.update(0x0001, "002a".to_string());
        cache.update(0x0001, "002b".to_string());
        cache.update(0x01F4, "ffff".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("0001").as_deref(), Some("002b"));
        assert_eq!(cache.get("01F4").as_deref(), Some("ffff"));
        assert_eq!(cache.get("1f4").as_deref(), Some("ffff"));
        assert_eq!(cache.get_register(0x0002), None);
        assert_eq!(cache.get("not-hex"), None);
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let cache = RegisterCache::new();
        cache.update(0x0010, "01".to_string());
        cache.update(0x0002, "02".to_string());

        let keys: Vec<_> = cache.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["0002".to_string(), "0010".to_string()]);
    }
}
