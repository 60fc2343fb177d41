pub mod adb;
pub mod config;
pub mod error;
pub mod logging;
pub mod meminfo;
pub mod mission;
pub mod sampler;
pub mod session;
pub mod snapshot;
pub mod store;
