//! Atrium Core Types
//!
//! This crate provides the synchronous building blocks of the Atrium API client:
//! - Token claims decoding and expiry policy
//! - The `Session` object and its credential stores
//! - Tenant identifiers
//! - Response envelope types
//! - Client configuration
//! - Core error types

pub mod claims;
pub mod config;
pub mod envelope;
pub mod error;
pub mod session;
pub mod store;
pub mod tenant;

pub use error::{Error, Result};
