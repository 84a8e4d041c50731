//! Validation for the `userId` / `chatId` / `turnId` id format.
//!
//! Spec: ids match `^[A-Za-z0-9_-]{1,128}$`. Hand-rolled rather than pulling
//! in `regex` for a single fixed-character-class check.

/// Returns `true` iff `s` is 1..=128 bytes of ASCII alphanumerics, `_`, or `-`.
pub fn validate_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 128
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Deterministic per-turn id (spec §3 `Turn.id`: "e.g., hash of
/// `userId|chatId|seq|createdAt`"). Used by `SessionStore::append` when the
/// caller leaves `Turn.id` empty, so two calls with identical
/// `(user_id, chat_id, seq, created_at)` always produce the same id.
pub fn compute_turn_id(user_id: &str, chat_id: &str, seq: u64, created_at: i64) -> String {
    let joined = format!("{user_id}|{chat_id}|{seq}|{created_at}");
    format!("{:016x}", fnv1a(joined.as_bytes()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
