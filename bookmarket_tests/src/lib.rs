//! End-to-end tests against a running marketplace server.
//! Run with `--features system_tests`, server url taken from `BOOKMARKET_URL`.

#[cfg(all(test, feature = "system_tests"))]
mod system_tests;
