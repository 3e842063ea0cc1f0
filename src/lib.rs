#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod backend;
pub mod calls;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod monitor;
pub mod overlay;
pub mod registry;
pub mod transform;

pub use config::TargetConfig;
pub use dispatch::HookSet;
pub use lifecycle::Session;
