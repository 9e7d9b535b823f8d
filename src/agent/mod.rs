//! Reasoning backend agents
//!
//! # Module Structure
//!
//! - [`openai`] - chat-completions client shared by both agents
//! - [`diagnostic`] - envelope analysis and the backend-free health check
//! - [`resolution`] - remediation step generation and fix ranking

pub mod diagnostic;
pub mod openai;
pub mod resolution;
