// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities intended for the test suite.  These should not be used in
//! production code.

use camino::Utf8PathBuf;
use provisioner::config::ConfigLogging;
use provisioner::config::ConfigLoggingIfExists;
use provisioner::config::ConfigLoggingLevel;
use slog::Logger;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

static LOG_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A logger for one test, writing to a file of its own
///
/// The file is removed by [`LogContext::cleanup_successful`] and kept when a
/// test panics before getting there, so that failures can be investigated.
pub struct LogContext {
    pub log: Logger,
    log_path: Utf8PathBuf,
}

impl LogContext {
    /// Creates a logger for the test `test_name`.  File logging is directed
    /// to a fresh file in the temporary directory, whatever `path` the
    /// configuration names.
    pub fn new(test_name: &str, config: &ConfigLogging) -> LogContext {
        let level = match config {
            ConfigLogging::StderrTerminal { level }
            | ConfigLogging::File { level, .. } => *level,
        };
        let log_path = log_path_for_test(test_name);
        let config = ConfigLogging::File {
            level,
            path: log_path.clone(),
            if_exists: ConfigLoggingIfExists::Fail,
        };
        let log = config
            .to_logger("test")
            .unwrap_or_else(|error| {
                panic!("creating log for test {}: {}", test_name, error)
            })
            .new(slog::o!("test_name" => test_name.to_owned()));
        LogContext { log, log_path }
    }

    pub fn log_path(&self) -> &Utf8PathBuf {
        &self.log_path
    }

    /// Removes the log file.  Call this at the end of a test that passed.
    pub fn cleanup_successful(self) {
        let LogContext { log, log_path } = self;
        drop(log);
        // The async drain may still be flushing; a leftover file is harmless.
        let _ = std::fs::remove_file(&log_path);
    }
}

fn log_path_for_test(test_name: &str) -> Utf8PathBuf {
    let dir = Utf8PathBuf::try_from(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    dir.join(format!(
        "{}.{}.{}.log",
        test_name,
        std::process::id(),
        LOG_COUNTER.fetch_add(1, Ordering::SeqCst),
    ))
}

/// Set up a [`LogContext`] appropriate for a test named `test_name`
pub fn test_setup_log(test_name: &str) -> LogContext {
    let log_config = ConfigLogging::File {
        level: ConfigLoggingLevel::Trace,
        path: Utf8PathBuf::from("UNUSED"),
        if_exists: ConfigLoggingIfExists::Fail,
    };

    LogContext::new(test_name, &log_config)
}
