//! Storage key layout. Both backends share it, so a log written through
//! `lin-kv` reads the same as one kept in memory.

/// Counter holding the offset the next append will receive.
pub fn next_offset(key: &str) -> String {
    format!("log:{key}:next")
}

/// Payload of the entry at `offset`.
pub fn entry(key: &str, offset: u64) -> String {
    format!("log:{key}:{offset}")
}

/// Highest offset a consumer has committed.
pub fn commit(key: &str) -> String {
    format!("commit:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(next_offset("orders"), "log:orders:next");
        assert_eq!(entry("orders", 12), "log:orders:12");
        assert_eq!(commit("orders"), "commit:orders");
    }
}
