pub mod client;
pub mod config;
pub mod destinations;
pub mod errors;
pub mod filters;
pub mod ipc;
pub mod logging;
pub mod state;
pub mod status;
