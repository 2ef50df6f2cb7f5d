//! Affinity Pump
//!
//! Lets code bound to one designated thread (a UI or apartment thread) block on
//! asynchronous work without deadlocking, and without letting unrelated
//! background work jump onto that thread while it is blocked.
//!
//! # Example
//!
//! ```
//! use affinity_pump::Scheduler;
//!
//! let scheduler = Scheduler::new();
//! let s = scheduler.clone();
//! let answer = scheduler
//!     .run_synchronously_with_result(move || async move {
//!         // CPU work off the affinity thread, then back.
//!         s.switch_to_background().await?;
//!         let value = (1..=6).product::<u32>();
//!         s.switch_to_affinity_thread().await?;
//!         anyhow::Ok(value)
//!     })
//!     .unwrap();
//! assert_eq!(answer, 720);
//! ```

#![doc(html_root_url = "https://docs.rs/affinity-pump")]
#![warn(rust_2018_idioms)]

pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use runtime::error::{SchedulerError, SchedulerResult};
pub use runtime::scheduler::{
    yield_now, JoinGuard, NodeRef, RelevanceSuppression, Scheduler, SchedulerConfig,
    SchedulerHandle, SwitchToAffinity, SwitchToBackground, TaskHandle, WorkScheduler,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
