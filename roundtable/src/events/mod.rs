//! Audit events for dispatch and consensus
//!
//! # Architecture
//!
//! 1. **Event Types** (`types.rs`): one event per routing decision, task
//!    completion, status change and consensus round.
//!
//! 2. **Audit Sink** (`sink.rs`): the fire-and-forget seam the dispatcher
//!    and roundtable report through. A failing sink is logged and ignored.
//!
//! 3. **Event Bus** (`bus.rs`): Tokio broadcast-based pub/sub that doubles
//!    as an audit sink and keeps a bounded in-memory history. Each retained
//!    event is stamped with a uuid so it can be looked up later.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Dispatcher  │────▶│  AuditSink   │────▶│  tracing /   │
//! │  Roundtable  │     │   (log)      │     │  EventBus    │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod sink;
pub mod types;

pub use bus::{EventBus, RecordedEvent, SharedEventBus};
pub use sink::{emit, AuditSink, FanoutAuditSink, SharedAuditSink, TracingAuditSink};
pub use types::{DispatchEvent, EventId};
