//! # rust-nds
//!
//! Application layer of the device runtime. The tree model, naming rules,
//! state machines and PV links live in `nds-core`; the in-memory control
//! system and its test device live in `nds-backend-mock`. This crate glues
//! them to a configuration file and a tracing subscriber.
//!
//! - **`config`**: `NdsConfig`, loaded from TOML plus `NDS_` environment variables.
//! - **`tracing_init`**: global subscriber setup honoring `RUST_LOG`.
//! - **`app`**: builds the factory, applies the naming rules and creates the
//!   configured devices.

pub mod app;
pub mod config;
pub mod tracing_init;

pub use app::App;
pub use config::NdsConfig;
pub use nds_backend_mock as mock;
pub use nds_core as core;
