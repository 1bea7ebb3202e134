//! Configuration Module
//!
//! Environment-driven configuration for the session proxy.

mod settings;

pub use settings::{
    ConfigError, ENV_CLIENT_ID, ENV_EVENT_CHANNEL_CAPACITY, ENV_HOST, ENV_PACING_DELAY_MS,
    ENV_PORT, ENV_SESSION_TIMEOUT_SECS, ProxySettings, SessionLimits, load_dotenv,
};
