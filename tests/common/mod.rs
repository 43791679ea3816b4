#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use ukern::{Config, Kernel, Report, TaskId};

/// Install the kernel logger once for the whole test binary.
pub fn setup() {
    #[cfg(feature = "logging")]
    ukern::arch::log::setup(log::LevelFilter::Debug);
}

/// Boot a kernel with a manual tick source and the default quantum. The main
/// task must return 0: assertions failing inside a task terminate it with
/// the panic exit code.
pub fn run<F>(main: F) -> Report
where
    F: FnOnce(&Kernel) -> i32 + Send + 'static,
{
    run_with(Config::manual(), main)
}

pub fn run_with<F>(config: Config, main: F) -> Report
where
    F: FnOnce(&Kernel) -> i32 + Send + 'static,
{
    setup();
    let report = ukern::boot(config, main).expect("kernel failed to boot");
    assert_eq!(report.exit_code(TaskId::MAIN), Some(0), "main task failed");
    report
}

/// An ordered record of what the tasks did, shared between them.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// The identifier of the task created in position `n`. The main task is 0
/// and the first spawned task is 2.
pub fn task(n: usize) -> TaskId {
    TaskId::from(n)
}
