//! Turnstile - In-process Request Governance
//!
//! This crate implements the request-governance layer of a multi-tenant web
//! backend: fixed-window rate limiting, session idle timeouts, CSRF tokens
//! and tag-based cache invalidation. All limiter, session and token state is
//! held in process memory and swept in the background.

pub mod cache;
pub mod config;
pub mod csrf;
pub mod error;
pub mod grpc;
pub mod pipeline;
pub mod ratelimit;
pub mod session;
pub mod sweep;
