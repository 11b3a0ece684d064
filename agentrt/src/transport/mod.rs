//! Abstract collaborator contracts consumed by the runtime.
//!
//! The scheduler never speaks to a provider directly. It depends on a
//! `Transport` trait supplied by the embedding application, and classifies
//! whatever comes back through [`TransportError`]. No concrete HTTP client
//! lives in this crate.

mod error;

pub use error::TransportError;

use async_trait::async_trait;
use serde_json::Value;

/// One opaque request/response round trip against a provider/model.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, provider: &str, model: &str, payload: Value) -> Result<Value, TransportError>;
}

/// `embed(text) -> vector` used only by optional similarity helpers outside
/// the scheduling path. No default implementation ships here.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, TransportError>;
}
