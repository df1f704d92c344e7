//! Integration test entry point for driftnet-node.
//!
//! Run with: cargo test --test integration

mod harness;

mod convergence;
mod lifecycle;
