//! Opaque, lexicographically sortable ids for Message Records, Domains,
//! Aliases, and DNS Snapshots. A ULID-shaped id (48-bit millisecond
//! timestamp + 80 bits of randomness, Crockford base32) rather than a UUIDv4
//! so that `message.status, message.updated_at`-style range scans over the
//! Store stay roughly time-ordered without an extra index.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Generates a new id. Panics only if the system clock is set before the
/// Unix epoch, which indicates a misconfigured host, not a recoverable
/// runtime condition.
pub fn new_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64;
    let mut rand_bytes = [0u8; 10];
    rand::rng().fill_bytes(&mut rand_bytes);
    encode(millis, &rand_bytes)
}

fn encode(millis: u64, rand_bytes: &[u8; 10]) -> String {
    let mut out = String::with_capacity(26);
    // 48-bit timestamp -> 10 base32 characters.
    for i in (0..10).rev() {
        let shift = i * 5;
        let idx = ((millis >> shift) & 0x1f) as usize;
        out.push(CROCKFORD[idx] as char);
    }
    // 80-bit randomness -> 16 base32 characters.
    let mut acc: u128 = 0;
    for b in rand_bytes {
        acc = (acc << 8) | *b as u128;
    }
    for i in (0..16).rev() {
        let shift = i * 5;
        let idx = ((acc >> shift) & 0x1f) as usize;
        out.push(CROCKFORD[idx] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_fixed_length_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = new_id();
            assert_eq!(id.len(), 26);
            assert!(seen.insert(id), "generated a duplicate id");
        }
    }

    #[test]
    fn ids_generated_later_sort_greater_or_equal() {
        let first = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = new_id();
        assert!(second >= first);
    }
}
