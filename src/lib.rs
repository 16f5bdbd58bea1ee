//! Usage, cost and provider-ranking aggregation for AI model routing
//!
//! Records flow one way: [`sources`] → [`services::pricing`] →
//! [`services::aggregator`] → [`services::ranking`]. Each stage is a pure
//! function of its input; caching lives in explicit values handed to callers.

pub mod config;
pub mod services;
pub mod sources;
pub mod types;
