//! Orchestration of confidential exchanges: the request pipeline, per-session
//! busy gating, and rolling-summary compaction.

pub mod compactor;
pub mod exchange;

pub use compactor::{maybe_compact, should_compact, COMPACTION_WINDOW};
pub use exchange::{Exchanger, CONTEXT_RECENT};
