pub mod apply;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod merge;
pub mod normalize;
pub mod notify;
pub mod parse;
pub mod processor;

pub use apply::{AppliedOutcome, ApplyEngine, ApplyOptions, ApplyOverrides};
pub use config::{load_config, load_config_from_str, Config, NotificationConfig, OcrConfig};
pub use db::Database;
pub use error::{ApplyError, ConfigError, FibretrackError, ProcessError, Result};
pub use logging::init_logging;
pub use merge::{merge_duplicates, MergeOutcome};
pub use normalize::normalize_identifier;
pub use notify::{LogNotifier, Notifier};
pub use parse::{ParseOutcome, ParsedEntry, Parser};
