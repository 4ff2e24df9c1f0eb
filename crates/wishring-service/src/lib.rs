//! Background sync daemon for the WishRing counter ring.
//!
//! The `wishring-service` binary connects to a ring over Bluetooth LE and
//! keeps the local daily counter in sync until interrupted. It also offers
//! one-shot subcommands that read or change the counter without a ring.
//!
//! # Configuration
//!
//! The service reads `~/.config/wishring/config.toml` (the platform config
//! directory on macOS and Windows). Every section is optional:
//!
//! ```toml
//! [device]
//! address = "AA:BB:CC:DD:EE:FF"
//! name_prefixes = ["WISH_RING", "WishRing", "MRD"]
//!
//! [link]
//! scan_timeout_secs = 10
//! connection_timeout_secs = 15
//! retry_attempts = 3
//! initial_retry_delay_ms = 3000
//! max_retry_delay_ms = 60000
//!
//! [counter]
//! default_wish_text = "I am growing every day."
//! default_target_count = 1000
//! reset_policy = "log_only"
//!
//! [storage]
//! path = "~/.local/share/wishring/wishring.db"
//! reset_retention_days = 30
//! ```

pub mod config;
pub mod report;

pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use report::{StatsReport, StatusReport, recent_history};
