//! A small multitasking kernel running in user space.
//!
//! Tasks are scheduled one at a time on a single virtual processor by a
//! dispatcher that picks the next task with a priority-with-aging policy. A
//! periodic tick gives every task a quantum of ticks, after which it is
//! preempted at its next kernel call. Tasks can sleep, wait for each other to
//! terminate, synchronize with counting semaphores and exchange fixed-size
//! messages through bounded queues.
//!
//! ```no_run
//! use ukern::{Config, boot};
//!
//! let report = boot(Config::default(), |kernel| {
//!     let Ok(worker) = kernel.spawn(|kernel| {
//!         kernel.sleep(core::time::Duration::from_millis(10));
//!         7
//!     }) else {
//!         return -1;
//!     };
//!     kernel.join(worker).unwrap_or(-1)
//! })
//! .unwrap();
//! assert_eq!(report.exit_code(ukern::TaskId::MAIN), Some(7));
//! ```
pub mod arch;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod sync;
pub mod task;
pub mod time;

mod roster;
mod scheduler;

pub use error::{BootError, Error, Result};
pub use ipc::mqueue::QueueId;
pub use kernel::{Config, Kernel, Report, Tick, boot};
pub use sync::PreemptionGuard;
pub use sync::semaphore::SemaphoreId;
pub use task::{State, TaskId, TaskReport};
