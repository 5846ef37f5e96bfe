#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the x402 A2A payment extension.
//!
//! Provides [`facilitator_client::FacilitatorClient`], a `reqwest`-based
//! implementation of [`a2a_x402::facilitator::Facilitator`] that talks to
//! a remote facilitator's `/verify` and `/settle` endpoints over JSON.

pub mod facilitator_client;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
