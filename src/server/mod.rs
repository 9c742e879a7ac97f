//! HTTP server

pub mod http;

pub use http::{handle_request, run, shutdown_signal, AppState, StoreBackend};
