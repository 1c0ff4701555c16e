use sha2::{Digest, Sha256};

/// Cache key of a planner call: SHA-256 over the domain text, a zero byte and the
/// problem text, as lower-case hex.
pub fn plan_cache_key(domain_pddl: &str, problem_pddl: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain_pddl.as_bytes());
    hasher.update([0u8]);
    hasher.update(problem_pddl.as_bytes());
    to_hex_lower(&hasher.finalize())
}

fn to_hex_lower(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write as _;
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}
