//! Small shared helpers.

/// Stable 32-bit FNV-1a hash, used for schema string ids.
pub fn string_id(text: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in text.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Milliseconds since the unix epoch.
pub fn unix_epoch_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_id_is_stable_and_distinct() {
        assert_eq!(string_id("EURUSD"), string_id("EURUSD"));
        assert_ne!(string_id("EURUSD"), string_id("BTCUSD"));
        assert_ne!(string_id(""), string_id("a"));
    }

    #[test]
    fn test_unix_epoch_ms_is_recent() {
        // 2020-01-01 in ms.
        assert!(unix_epoch_ms() > 1_577_836_800_000);
    }
}
