pub mod config;
pub mod model;
pub mod output;
pub mod pool;
pub mod requests;
pub mod reuse;
pub mod scheduler;
pub mod set_index;
pub mod stats;
pub mod thread;
pub mod trace;
pub mod tree;

pub use config::Settings;
pub use model::model_core;
pub use scheduler::{schedule_threads, Hierarchy};
pub use stats::{Histogram, MissBreakdown};
pub use thread::{Access, Thread};

/// Byte address in device memory.
#[allow(non_camel_case_types)]
pub type address = u64;

/// Sentinel for an infinite reuse distance (first-ever use of a line).
///
/// Also doubles as the "unlimited" marker for MSHR counts.
pub const INF: u64 = 99_999_999;
