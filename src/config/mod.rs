//! Configuration management for socketlog

pub mod settings;

pub use settings::{
    ClientConfig, LogFormat, LoggingSettings, ServerConfig, ServerSettings, ShutdownSettings,
    StorageSettings, TimestampSettings,
};
