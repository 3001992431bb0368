//! relaycheck -- diagnostics and conformance testing for tunneling relay
//! namespaces.
//!
//! This crate provides the core library for relay namespace reachability
//! probing, deployment topology resolution, and a fail-soft conformance
//! suite exercising request/response and duplex-streaming scenarios against
//! a live relay endpoint.

pub mod harness;
pub mod namespace;
pub mod probes;
pub mod pump;
pub mod relay;
pub mod scenarios;
