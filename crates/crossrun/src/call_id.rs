//! Call id generation.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::endpoint::ProcessId;

/// Produces call ids of the form `<process>:<sequence>:<salt>`.
///
/// The sequence makes ids unique within one process lifetime; the salt is drawn once per
/// generator so a restarted process does not reuse ids its peers may still remember.
pub struct CallIdGenerator {
    process: String,
    salt: String,
    seq: AtomicU64,
}

impl CallIdGenerator {
    pub fn new(process: &ProcessId) -> Self {
        Self {
            process: process.to_string(),
            salt: format!("{:08x}", rand::random::<u32>()),
            seq: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}:{}", self.process, seq, self.salt)
    }
}
