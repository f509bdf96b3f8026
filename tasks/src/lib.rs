//! Background task operations (C11–C13): the task engine's progress
//! gating, the embed/reduce/auto-tag operations it drives, the vector
//! index façade they share, and the near-duplicate clusterer built on
//! top of it. The `api` crate owns dispatching each operation onto a
//! [`tokio::task`] and wiring its [`engine::TaskHandle`] to an SSE stream.

pub mod auto_tag;
pub mod embed;
pub mod engine;
pub mod near_duplicate;
pub mod reduce;
pub mod state;
pub mod vector_index;

pub use engine::{TaskEngine, TaskHandle, TaskKind, TaskProgress, TaskStatus};
pub use vector_index::{BruteForceIndex, VectorIndex};
