//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

#![allow(dead_code, reason = "each suite uses a different subset of the constants")]

/// Commercial type the default catalogue maps `2gb` to.
pub const DEFAULT_INSTANCE_TYPE: &str = "DEV1-S";

/// Compose project publishing host port 8080.
pub const WEB_COMPOSE: &str = "services:\n  web:\n    image: nginx\n    ports:\n      - \"8080:80\"\n";

/// Base URL machines use to call back.
pub const CALLBACK_BASE: &str = "http://orchestrator.test";

/// Failure body the simulated machine posts for a broken compose pull.
pub const PULL_FAILURE_BODY: &str =
    "pull access denied for private/web\n--- files ---\ndocker-compose.yml\n.env\n";
