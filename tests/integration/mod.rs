//! Integration tests for the call session.
//!
//! Tests are organized by functionality:
//! - `dialing_tests` - outgoing and incoming calls up to `Active`
//! - `negotiation_tests` - candidate buffering and negotiation failures
//! - `teardown_tests` - every way a call or session ends
//! - `driver_tests` - intents through the session driver

pub mod driver_tests;
pub mod teardown_tests;

use tracing::Level;

/// Initialize tracing for tests (call once per test).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}
