//! `loreforge-engine` — asynchronous job processing with real-time progress.
//!
//! ## Design
//!
//! - The task store is the single source of truth; the queue only transports
//! - One writer owns a record at any instant (submitter, claiming worker, or
//!   a status-gated control operation); bridges only read
//! - Progress writes are monotonic and double as stop checkpoints
//! - Streams terminate exactly once, with `completed`, `failed` or `error`
//!
//! ## Components
//!
//! - [`JobSubmitter`]: insert `Pending` record, then publish the job message
//! - [`WorkerPool`]: N independent workers running [`JobHandler`]s with a
//!   [`JobContext`] progress callback
//! - [`ProgressBridge`]: per-stream polling loop turning fresh store reads
//!   into [`TaskStreamEvent`]s
//! - [`TaskControl`]: explicit `retry`, cooperative `stop`

pub mod bridge;
pub mod control;
pub mod events;
pub mod handler;
mod retry;
pub mod submit;
pub mod worker;

pub use bridge::{BridgeConfig, ProgressBridge};
pub use control::{ControlConfig, ControlError, TaskControl};
pub use events::TaskStreamEvent;
pub use handler::{HandlerError, HandlerRegistry, JobContext, JobHandler};
pub use submit::{JobSubmitter, SubmitError};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerStats};
