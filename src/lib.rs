//! Lambda test server workspace.
//!
//! This is a virtual package that carries workspace-level integration tests.
//! The functionality lives in the member crate:
//!
//! - `lambda-test-server`: in-process AWS Lambda Runtime API for driving
//!   function code end to end from tests
