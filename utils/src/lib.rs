//! Shared utilities for the Harbor workspace.

pub mod logging;
pub mod net;

pub use logging::{init_logging, init_test_tracing, LogFormat};
pub use net::find_free_port;
