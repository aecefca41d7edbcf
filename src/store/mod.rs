pub mod memory;
pub mod outbox;

pub use memory::{MemoryStore, StoreTx, Tables};
pub use outbox::{
    AuditLogSubscriber, AuditRecord, EventKind, OutboxEvent, OutboxRelay, OutboxSubscriber,
};
