#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types and orchestration for the x402 payment extension to the
//! A2A agent protocol.
//!
//! A merchant agent that needs payment pauses the task and attaches
//! payment requirements to it; the client agent signs one of the offered
//! options with its wallet and answers with a submission message; the
//! merchant verifies and settles the payment through a facilitator and
//! resumes (or fails) the task. All payment state rides on the task's own
//! metadata, so the protocol composes with any A2A transport.
//!
//! This crate is transport-agnostic: the [`facilitator::Facilitator`]
//! trait is implemented elsewhere (see the `a2a-x402-http` crate for a
//! remote HTTP facilitator client) and wallets are supplied by the
//! embedding application.
//!
//! # Modules
//!
//! - [`a2a`] - Minimal task/message substrate the extension rides on
//! - [`client`] - Client-side orchestration: select, sign, submit
//! - [`error`] - Protocol error types
//! - [`extension`] - Extension identity, declaration, and activation
//! - [`facilitator`] - Verify/settle trait for external facilitators
//! - [`merchant`] - Merchant-side orchestration: require, verify, settle
//! - [`metadata`] - Protocol metadata keys and typed access to them
//! - [`networks`] - Registry of well-known networks and default assets
//! - [`proto`] - Wire format types
//! - [`status`] - The payment status vocabulary
//! - [`tracker`] - The payment state machine over task metadata

pub mod a2a;
pub mod client;
pub mod error;
pub mod extension;
pub mod facilitator;
pub mod merchant;
pub mod metadata;
pub mod networks;
pub mod proto;
pub mod status;
pub mod tracker;
