//! Azure management API interaction
//!
//! The resource-access layer everything else sits on: access-mode
//! resolution, token acquisition, the access client, and the uniform
//! envelopes it answers with.
//!
//! # Module Structure
//!
//! - [`auth`] - access-mode resolution and token acquisition
//! - [`client`] - the resource access client with offline fallback
//! - [`envelope`] - uniform result envelopes and the error taxonomy
//! - [`http`] - HTTP utilities for management API calls
//! - [`sim`] - embedded simulated datasets for offline mode

pub mod auth;
pub mod client;
pub mod envelope;
pub mod http;
pub mod sim;
