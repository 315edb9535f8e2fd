// SPDX-License-Identifier: GPL-3.0-or-later

//! This module defines the log configuration document (`spec.md` §6).
//!
//! The shape mirrors Python's `logging.config.dictConfig`, which is what
//! the distilled specification describes: named `formatters`, `filters`,
//! `handlers` and `loggers`, plus a `root` logger and a
//! `disable_existing_loggers` switch. `puma` does not implement a generic
//! dict-config interpreter — `crate::logging::init` reads just enough of
//! this document to configure the two supported sinks (console, rotating
//! file) the way the teacher's `config::Loader` reads just enough of its
//! own YAML to configure compilation database output.
//!
//! ```yaml
//! version: 1
//! disable_existing_loggers: false
//! formatters:
//!   console:
//!     format: "%(timestamp)s %(level)s %(target)s: %(message)s"
//! handlers:
//!   console:
//!     class: console
//!     level: debug
//!     formatter: console
//! loggers: {}
//! root:
//!   level: debug
//!   handlers: [console]
//! ```
//!
//! ```yaml
//! version: 1
//! disable_existing_loggers: false
//! formatters:
//!   file:
//!     format: "%(timestamp)s %(level)s %(target)s: %(message)s"
//! handlers:
//!   rotating_file:
//!     class: rotating_file
//!     level: info
//!     formatter: file
//!     filename: /var/log/puma/puma.log
//!     rotation: midnight
//!     retention_days: 30
//! loggers: {}
//! root:
//!   level: info
//!   handlers: [rotating_file]
//! ```

pub use types::*;

mod types {
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::fmt;
    use std::path::PathBuf;

    const CURRENT_VERSION: u32 = 1;

    /// Top-level log configuration document (`spec.md` §6).
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LogConfig {
        pub version: u32,
        #[serde(default)]
        pub disable_existing_loggers: bool,
        #[serde(default)]
        pub formatters: HashMap<String, Formatter>,
        #[serde(default)]
        pub filters: HashMap<String, Filter>,
        #[serde(default)]
        pub handlers: HashMap<String, Handler>,
        #[serde(default)]
        pub loggers: HashMap<String, LoggerConfig>,
        pub root: LoggerConfig,
    }

    /// A named message format, applied by a handler at emit time.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Formatter {
        pub format: String,
        #[serde(default, rename = "datefmt")]
        pub date_format: Option<String>,
    }

    /// A named filter factory descriptor. `puma` recognises only the
    /// `target_prefix` kind; unrecognised kinds are accepted (so
    /// documents remain forward-compatible) but ignored by
    /// `crate::logging::init`.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Filter {
        pub class: String,
        #[serde(default)]
        pub prefix: Option<String>,
    }

    /// A named sink. `class` selects between the two profiles `spec.md`
    /// §6 requires: `console` and `rotating_file` (midnight rotation,
    /// UTC, `retention_days`-bounded).
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Handler {
        pub class: HandlerClass,
        pub level: LevelName,
        #[serde(default)]
        pub formatter: Option<String>,
        #[serde(default)]
        pub filename: Option<PathBuf>,
        #[serde(default)]
        pub rotation: Option<Rotation>,
        #[serde(default)]
        pub retention_days: Option<u32>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum HandlerClass {
        Console,
        RotatingFile,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Rotation {
        Midnight,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum LevelName {
        Error,
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LevelName {
        pub fn to_level_filter(self) -> log::LevelFilter {
            match self {
                LevelName::Error => log::LevelFilter::Error,
                LevelName::Warn => log::LevelFilter::Warn,
                LevelName::Info => log::LevelFilter::Info,
                LevelName::Debug => log::LevelFilter::Debug,
                LevelName::Trace => log::LevelFilter::Trace,
            }
        }
    }

    /// Per-logger (or `root`) level and the handlers it fans out to.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LoggerConfig {
        pub level: LevelName,
        #[serde(default)]
        pub handlers: Vec<String>,
        #[serde(default = "default_propagate")]
        pub propagate: bool,
    }

    fn default_propagate() -> bool {
        true
    }

    const DEV_CONSOLE_HANDLER: &str = "console";
    const PROD_FILE_HANDLER: &str = "rotating_file";
    const MESSAGE_FORMAT: &str = "%(timestamp)s %(level)s %(target)s: %(message)s";

    impl LogConfig {
        /// Console-only profile; the development default matching the
        /// teacher's `env_logger::init()` behaviour.
        pub fn development() -> Self {
            let mut formatters = HashMap::new();
            formatters.insert(
                DEV_CONSOLE_HANDLER.to_string(),
                Formatter { format: MESSAGE_FORMAT.to_string(), date_format: None },
            );
            let mut handlers = HashMap::new();
            handlers.insert(
                DEV_CONSOLE_HANDLER.to_string(),
                Handler {
                    class: HandlerClass::Console,
                    level: LevelName::Debug,
                    formatter: Some(DEV_CONSOLE_HANDLER.to_string()),
                    filename: None,
                    rotation: None,
                    retention_days: None,
                },
            );
            Self {
                version: CURRENT_VERSION,
                disable_existing_loggers: false,
                formatters,
                filters: HashMap::new(),
                handlers,
                loggers: HashMap::new(),
                root: LoggerConfig {
                    level: LevelName::Debug,
                    handlers: vec![DEV_CONSOLE_HANDLER.to_string()],
                    propagate: true,
                },
            }
        }

        /// Time-rotated file profile: midnight rotation, 30-day
        /// retention, UTC timestamps, at `path`.
        pub fn production(path: impl Into<PathBuf>) -> Self {
            let mut formatters = HashMap::new();
            formatters.insert(
                PROD_FILE_HANDLER.to_string(),
                Formatter { format: MESSAGE_FORMAT.to_string(), date_format: None },
            );
            let mut handlers = HashMap::new();
            handlers.insert(
                PROD_FILE_HANDLER.to_string(),
                Handler {
                    class: HandlerClass::RotatingFile,
                    level: LevelName::Info,
                    formatter: Some(PROD_FILE_HANDLER.to_string()),
                    filename: Some(path.into()),
                    rotation: Some(Rotation::Midnight),
                    retention_days: Some(30),
                },
            );
            Self {
                version: CURRENT_VERSION,
                disable_existing_loggers: false,
                formatters,
                filters: HashMap::new(),
                handlers,
                loggers: HashMap::new(),
                root: LoggerConfig {
                    level: LevelName::Info,
                    handlers: vec![PROD_FILE_HANDLER.to_string()],
                    propagate: true,
                },
            }
        }
    }

    impl fmt::Display for LogConfig {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(f, "Log configuration:")?;
            match serde_yml::to_string(self) {
                Ok(yaml_string) => {
                    for line in yaml_string.lines() {
                        writeln!(f, "{line}")?;
                    }
                    Ok(())
                }
                Err(_) => panic!("log configuration can't be serialized"),
            }
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn development_profile_round_trips_through_yaml() {
            let config = LogConfig::development();
            let yaml = serde_yml::to_string(&config).unwrap();
            let decoded: LogConfig = serde_yml::from_str(&yaml).unwrap();
            assert_eq!(config, decoded);
        }

        #[test]
        fn production_profile_sets_thirty_day_retention() {
            let config = LogConfig::production("/var/log/puma/puma.log");
            let handler = &config.handlers[PROD_FILE_HANDLER];
            assert_eq!(handler.retention_days, Some(30));
            assert_eq!(handler.rotation, Some(Rotation::Midnight));
        }

        #[test]
        fn display_renders_as_yaml() {
            let config = LogConfig::development();
            let rendered = config.to_string();
            assert!(rendered.starts_with("Log configuration:\n"));
            assert!(rendered.contains("version: 1"));
        }
    }
}
