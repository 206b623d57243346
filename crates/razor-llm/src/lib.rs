//! Generation-service boundary for debtrazor.
//!
//! Provides the `Generate` trait every pipeline stage calls, the
//! `ProviderAdapter` trait, a middleware chain,
//! `LlmClient` for routing requests by provider, and helpers for pulling
//! code blocks and JSON documents out of generated text.

mod client;
mod extract;
mod openai;
mod provider;
mod types;

pub use client::*;
pub use extract::*;
pub use openai::OpenAiAdapter;
pub use provider::*;
pub use types::*;
