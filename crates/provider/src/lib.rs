//! Completion provider implementations for apotheca.
//!
//! One concrete adapter: [`OpenAiCompatProvider`], which speaks the
//! OpenAI-compatible streaming `/chat/completions` protocol. The adapter's
//! whole job is normalization — whatever the upstream does (token deltas,
//! fragmented tool calls, error payloads, dropped connections), the agent
//! loop sees a single uniform event vocabulary and never a synchronous
//! failure.

pub mod openai;

pub use openai::OpenAiCompatProvider;

use apotheca_config::ProviderConfig;

/// Build the configured provider.
///
/// A missing API key is not an error at construction time; the adapter
/// reports it per-request as a terminal `UpstreamError` event.
pub fn from_config(config: &ProviderConfig) -> OpenAiCompatProvider {
    OpenAiCompatProvider::new("openai", &config.base_url, config.api_key.clone())
}
