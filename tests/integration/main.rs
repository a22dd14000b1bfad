//! Integration tests for campus-session
//! These run the real HTTP adapters against a local mock server

pub mod test_harness;

pub mod backend_test;
pub mod firebase_test;
pub mod session_flow_test;
