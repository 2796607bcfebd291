//! # callgate Common Library
//!
//! Shared code for the callgate services including:
//! - Common error type
//! - Service configuration loading
//! - Webhook signature calculation and verification
//! - Payload sanitization for audit logging

pub mod config;
pub mod error;
pub mod sanitize;
pub mod signature;

pub use error::{Error, Result};
