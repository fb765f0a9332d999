use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

/// SHA-256 of `target_hash || decimal(nonce)`.
pub fn pow_digest(target_hash: &str, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(target_hash.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

/// Count leading zero bits in a byte array.
pub fn count_leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut zero_bits = 0u32;
    for byte in bytes {
        if *byte == 0 {
            zero_bits += 8;
        } else {
            zero_bits += byte.leading_zeros();
            break;
        }
    }
    zero_bits
}

/// Proof-of-work predicate. Pure; safe to call on untrusted input.
pub fn verify(target_hash: &str, nonce: u64, difficulty: u32) -> bool {
    count_leading_zero_bits(&pow_digest(target_hash, nonce)) >= difficulty
}

/// Search for a nonce satisfying `verify(target_hash, nonce, difficulty)`,
/// starting at `start`. Returns `None` once `cancel` is observed.
pub fn solve(target_hash: &str, difficulty: u32, start: u64, cancel: &AtomicBool) -> Option<u64> {
    let mut nonce = start;
    loop {
        // Poll the flag every 4096 hashes
        if nonce.wrapping_sub(start) & 0xFFF == 0 && cancel.load(Ordering::Relaxed) {
            return None;
        }
        if verify(target_hash, nonce, difficulty) {
            return Some(nonce);
        }
        nonce = nonce.wrapping_add(1);
        if nonce == start {
            return None;
        }
    }
}
