//! End-to-end integration tests for Atrium
//!
//! These tests drive the client against a mock backend through a full
//! session: login, authenticated calls, token refresh and logout.
