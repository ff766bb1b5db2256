//! Consistent hashing over the candidate list.
//!
//! The service key is hashed with the 31-multiplier string hash and fed to the
//! linear-congruential jump hash. When the candidate count grows from `n` to `n + 1`,
//! a key either keeps its bucket or moves to the new last bucket.

use driftwire::Endpoint;

use crate::balancer::LoadBalancer;

#[derive(Debug, Default)]
pub struct ConsistentHash;

impl ConsistentHash {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for ConsistentHash {
    fn name(&self) -> &'static str {
        "consistent-hash"
    }

    fn pick(&self, service_key: &str, candidates: &[Endpoint]) -> Endpoint {
        let buckets = i32::try_from(candidates.len()).unwrap_or(i32::MAX);
        let index = consistent_hash(string_hash(service_key) as i64, buckets);
        candidates[index as usize].clone()
    }
}

/// `h = 31 * h + c` over UTF-16 code units, wrapping at 32 bits.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Maps `input` to a bucket in `[0, buckets)`. `buckets` must be positive.
pub fn consistent_hash(input: i64, buckets: i32) -> i32 {
    let mut state = input as u64;
    let mut candidate: i32 = 0;
    loop {
        state = state.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        let next_double = (((state >> 33) as i32) as f64 + 1.0) / 2_147_483_648.0;
        let next = ((candidate as f64 + 1.0) / next_double) as i32;
        if next >= 0 && next < buckets {
            candidate = next;
        } else {
            return candidate;
        }
    }
}
