// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and building the root logger

use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationSeconds;
use slog::Drain;
use slog::Level;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use std::fs::OpenOptions;
use std::time::Duration;
use thiserror::Error;

/// Configuration for the VM-creation core
///
/// Everything the orchestrator needs to know about director-wide policy is
/// here; it is handed to [`crate::VmCreator::new`] once and never consulted
/// from anywhere else.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Name of this director.  Part of every VM's group tags and metadata.
    pub director_name: String,
    /// Number of times a provider create call is attempted when the provider
    /// flags its failure as retryable.
    #[serde(default = "default_max_vm_create_tries")]
    pub max_vm_create_tries: u32,
    /// Leave VMs (and their records) in place when their agent never becomes
    /// ready, so that an operator can investigate.
    #[serde(default)]
    pub keep_unreachable_vms: bool,
    /// Ask the agent fleet to drop stale ARP entries for a new VM's static
    /// addresses.
    #[serde(default)]
    pub flush_arp: bool,
    /// Generate a random password for VMs whose environment does not set one.
    #[serde(default)]
    pub generate_vm_passwords: bool,
    /// Agent defaults merged beneath the reserved block of every VM's
    /// environment.
    #[serde(default)]
    pub agent_env: serde_json::Map<String, serde_json::Value>,
    /// Certificates pushed to every agent once it is ready.
    #[serde(default)]
    pub trusted_certs: Option<String>,
    /// Secure management-channel settings.  When present, each agent gets a
    /// client certificate in its environment.
    #[serde(default)]
    pub mbus: Option<MbusConfig>,
    /// When present, network settings carry a legacy DNS record name.
    #[serde(default)]
    pub legacy_dns: Option<LegacyDnsConfig>,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Logging configuration for the process embedding this core.
    pub log: ConfigLogging,
}

fn default_max_vm_create_tries() -> u32 {
    5
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MbusConfig {
    /// PEM-encoded CA of the management-channel server, handed to agents so
    /// that they can verify it.
    pub server_ca: String,
    /// Domain used to build agent certificate names
    /// (`<agent-id>.agent.<internal_domain>`).
    #[serde(default = "default_internal_domain")]
    pub internal_domain: String,
}

fn default_internal_domain() -> String {
    String::from("bosh-internal")
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LegacyDnsConfig {
    pub root_domain: String,
}

/// Bounds on the potentially long-running steps of VM creation
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Timeouts {
    /// Bound on a single provider create call.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_provider_call_timeout")]
    pub provider_call: Duration,
    /// Bound on writing the VM record.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_persistence_timeout")]
    pub persistence: Duration,
    /// Bound on waiting for the agent to report ready.  This is unrelated to
    /// `max_vm_create_tries`: an agent that never comes up is not retried.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_agent_ready_timeout")]
    pub agent_ready: Duration,
}

fn default_provider_call_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_persistence_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_agent_ready_timeout() -> Duration {
    Duration::from_secs(600)
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            provider_call: default_provider_call_timeout(),
            persistence: default_persistence_timeout(),
            agent_ready: default_agent_ready_timeout(),
        }
    }
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        config_parsed
            .validate()
            .map_err(|err| LoadError::Invalid { path: path.into(), err })?;
        Ok(config_parsed)
    }

    pub fn validate(&self) -> Result<(), InvalidConfigError> {
        if self.director_name.is_empty() {
            return Err(InvalidConfigError::EmptyDirectorName);
        }
        if self.max_vm_create_tries == 0 {
            return Err(InvalidConfigError::ZeroCreateTries);
        }
        let timeouts = [
            ("provider_call", self.timeouts.provider_call),
            ("persistence", self.timeouts.persistence),
            ("agent_ready", self.timeouts.agent_ready),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_zero() {
                return Err(InvalidConfigError::ZeroTimeout { name });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\"")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("invalid configuration in \"{path}\"")]
    Invalid {
        path: Utf8PathBuf,
        #[source]
        err: InvalidConfigError,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum InvalidConfigError {
    #[error("director_name must not be empty")]
    EmptyDirectorName,
    #[error("max_vm_create_tries must be at least 1")]
    ZeroCreateTries,
    #[error("timeouts.{name} must be non-zero")]
    ZeroTimeout { name: &'static str },
}

/// Represents the logging configuration (the "log" top-level object in the
/// configuration file).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "mode")]
pub enum ConfigLogging {
    #[serde(rename = "stderr-terminal")]
    StderrTerminal { level: ConfigLoggingLevel },

    #[serde(rename = "file")]
    File {
        level: ConfigLoggingLevel,
        path: Utf8PathBuf,
        if_exists: ConfigLoggingIfExists,
    },
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLoggingIfExists {
    Fail,
    Truncate,
    Append,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLoggingLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl From<ConfigLoggingLevel> for Level {
    fn from(config_level: ConfigLoggingLevel) -> Level {
        match config_level {
            ConfigLoggingLevel::Trace => Level::Trace,
            ConfigLoggingLevel::Debug => Level::Debug,
            ConfigLoggingLevel::Info => Level::Info,
            ConfigLoggingLevel::Warn => Level::Warning,
            ConfigLoggingLevel::Error => Level::Error,
            ConfigLoggingLevel::Critical => Level::Critical,
        }
    }
}

#[derive(Debug, Error, SlogInlineError)]
#[error("open log file \"{path}\"")]
pub struct LogInitError {
    path: Utf8PathBuf,
    #[source]
    err: std::io::Error,
}

impl ConfigLogging {
    /// Create the root logger based on the requested configuration.
    pub fn to_logger(
        &self,
        name: &'static str,
    ) -> Result<Logger, LogInitError> {
        match self {
            ConfigLogging::StderrTerminal { level } => {
                let decorator =
                    slog_term::TermDecorator::new().stderr().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                Ok(async_root_logger(*level, drain))
            }

            ConfigLogging::File { level, path, if_exists } => {
                let mut open_options = OpenOptions::new();
                open_options.write(true);
                open_options.create(true);

                match if_exists {
                    ConfigLoggingIfExists::Fail => {
                        open_options.create_new(true);
                    }
                    ConfigLoggingIfExists::Append => {
                        open_options.append(true);
                    }
                    ConfigLoggingIfExists::Truncate => {
                        open_options.truncate(true);
                    }
                }

                let drain = log_drain_for_file(&open_options, path, name)?;
                Ok(async_root_logger(*level, drain))
            }
        }
    }
}

// The async drain takes care of synchronization for both the terminal and
// file drains, which would otherwise use a std::sync::Mutex that is not
// futures-aware.
fn async_root_logger<T>(level: ConfigLoggingLevel, drain: T) -> Logger
where
    T: slog::Drain + Send + 'static,
    <T as slog::Drain>::Err: std::fmt::Debug,
{
    let pid = std::process::id();
    let level_drain = slog::LevelFilter(drain, Level::from(level)).fuse();
    let async_drain = slog_async::Async::new(level_drain).build().fuse();
    Logger::root(async_drain, slog::o!("pid" => pid))
}

fn log_drain_for_file(
    open_options: &OpenOptions,
    path: &Utf8Path,
    name: &'static str,
) -> Result<impl Drain<Ok = (), Err = slog::Never> + Send, LogInitError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| LogInitError { path: path.to_owned(), err })?;
    }

    let file = open_options
        .open(path)
        .map_err(|err| LogInitError { path: path.to_owned(), err })?;

    // Record a message to the stderr so that a reader who doesn't already
    // know how logging is configured knows where the rest of the log messages
    // went.
    eprintln!("note: configured to log to \"{}\"", path);
    Ok(slog_bunyan::with_name(name, file).build().fuse())
}
