//! Integration tests module
//!
//! End-to-end tests for the novel-relay workspace, including:
//! - OpenAI-compatible backend over HTTP
//! - Local volume translation through registry and workers
//! - Degradation handling and upload gating

pub mod backend_test;
pub mod fixtures;
pub mod workflow_test;
