use std::io::Write;

/// A simple logger that writes every record on its own line to the standard
/// error stream, prefixed by a coloured level marker.
struct Logger {}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let level = match record.level() {
                log::Level::Error => "\x1B[1m\x1b[31m[!]\x1b[0m",
                log::Level::Warn => "\x1B[1m\x1b[33m[-]\x1b[0m",
                log::Level::Info => "\x1B[1m\x1b[32m[*]\x1b[0m",
                log::Level::Debug => "\x1B[1m\x1b[34m[#]\x1b[0m",
                log::Level::Trace => "\x1B[1m\x1b[35m[~]\x1b[0m",
            };
            // Captured by the test harness.
            eprintln!("{} {}", level, record.args());
        }
    }

    fn flush(&self) {
        _ = std::io::stderr().flush();
    }
}

/// Setup the logging subsystem. All log submitted to the logging subsystem
/// will be ignored until this function is called. Calling it again only
/// changes the maximum level: the logger itself is installed once per
/// process, and another logger installed by the application is left alone.
#[cfg(feature = "logging")]
pub fn setup(level: log::LevelFilter) {
    log::set_max_level(level);
    if log::set_logger(&Logger {}).is_ok() {
        log::trace!("Logger initialized");
    }
}
