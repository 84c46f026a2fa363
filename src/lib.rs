#![deny(missing_docs)]

//! Core library for the attache artifact converter.

/// Artifact data model and wire serialization.
pub mod artifact;
/// Optional-dependency capability tracking.
pub mod capability;
/// Environment-driven configuration management.
pub mod config;
/// Inline option DSL parsing (`path[key: value, ...]`).
pub mod dsl;
/// Structured logging and tracing setup.
pub mod logging;
/// Format processors and their registry.
pub mod processor;
/// Dispatch and local/service fallback routing.
pub mod router;
/// HTTP server exposing the processing surface.
pub mod server;
/// Remote processing service client.
pub mod service;
/// Input resolution: source handlers and archive expansion.
pub mod source;
