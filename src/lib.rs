//! azdiag - diagnostic and remediation agent for Azure VM connectivity
//!
//! The crate is built around one idea: every piece of the pipeline talks to
//! Azure through a single access client that resolves its strategy once, at
//! construction, and after that always answers with uniform result
//! envelopes. A run that cannot reach the provider degrades to offline
//! simulation instead of failing.
//!
//! # Module Structure
//!
//! - [`azure`] - access-mode resolution, the resource client, envelopes
//! - [`agent`] - reasoning backend agents (diagnosis and resolution)
//! - [`pipeline`] - one diagnostic pass from fetch to optional fix
//! - [`metrics`] - injected Prometheus recorder and the exposition server
//! - [`config`] - runtime configuration, read from the environment once

pub mod agent;
pub mod azure;
pub mod config;
pub mod metrics;
pub mod pipeline;
