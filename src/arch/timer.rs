use core::time::Duration;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A periodic tick source. A dedicated thread calls the tick handler at a
/// fixed interval until the timer is dropped.
#[derive(Debug)]
pub struct Timer {
    /// Set when the timer must stop firing.
    stopped: Arc<AtomicBool>,

    /// The thread delivering the ticks.
    thread: Option<JoinHandle<()>>,
}

/// Arm a periodic timer that calls `handler` every `interval`. Deadlines are
/// computed from the arming instant, so a late tick does not shift the
/// following ones.
///
/// # Errors
/// Returns an error if the thread delivering the ticks cannot be created.
pub fn arm<F>(interval: Duration, handler: F) -> io::Result<Timer>
where
    F: Fn() + Send + 'static,
{
    let stopped = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&stopped);
    let thread = thread::Builder::new()
        .name(String::from("tick"))
        .spawn(move || {
            let mut deadline = Instant::now() + interval;
            while !stop.load(Ordering::Acquire) {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
                if stop.load(Ordering::Acquire) {
                    break;
                }
                handler();
                deadline += interval;
            }
        })?;

    log::debug!("Tick source armed with a {interval:?} interval");
    Ok(Timer {
        stopped,
        thread: Some(thread),
    })
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            _ = thread.join();
        }
    }
}
