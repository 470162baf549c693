use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub const NODE_ID_PREFIX: &str = "node";
pub const DOCUMENT_ID_PREFIX: &str = "doc";

pub trait IdGenerator: Send + Sync {
    fn generate(&self, prefix: &str) -> String;
}

/// 128-bit random identifiers, rendered as `<prefix>_<32 hex chars>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, Uuid::new_v4().simple())
    }
}

/// Deterministic `<prefix>_<n>` identifiers for tests and fixtures.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl IdGenerator for SequentialIdGenerator {
    fn generate(&self, prefix: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}_{}", prefix, n)
    }
}
