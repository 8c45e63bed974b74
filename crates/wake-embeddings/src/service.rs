//! Embedding provider contract and clients.
//!
//! [`HttpEmbedder`] reaches the external embedding service over HTTP with a
//! short timeout (embedding calls sit on the turn path, so they must fail
//! fast and let retrieval degrade). [`HashEmbedder`] is the deterministic
//! test double used across the workspace: texts sharing terms get similar
//! vectors, so ranking tests behave like the real thing.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use wake_settings::EmbeddingSettings;

use crate::errors::{EmbeddingError, Result};
use crate::normalize::l2_normalize;

/// An embedding provider: text in, vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a vector of [`Embedder::dimensions`] floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output vector dimensions.
    fn dimensions(&self) -> usize;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP client for an external embedding service.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    timeout_ms: u64,
}

impl HttpEmbedder {
    /// Create a client from embedding settings.
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            timeout_ms: settings.timeout_ms,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout(self.timeout_ms)
                } else {
                    EmbeddingError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Request(format!(
                "service returned {status}"
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        if body.embedding.len() != self.dimensions {
            return Err(EmbeddingError::Dimensions {
                expected: self.dimensions,
                actual: body.embedding.len(),
            });
        }
        debug!(chars = text.len(), "embedded text");
        Ok(body.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic bag-of-words hash embedder.
///
/// Each lowercase alphanumeric term is hashed into a bucket of the output
/// vector; the result is L2-normalized. Texts that share terms produce
/// similar vectors, which makes ranking assertions meaningful without a
/// real model.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Create a hash embedder with the given output dimensions.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0_f32; self.dimensions];
        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(term.to_lowercase().as_bytes());
            let bucket = (usize::from(digest[0]) << 8) | usize::from(digest[1]);
            v[bucket % self.dimensions] += 1.0;
        }
        l2_normalize(&mut v);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Embedder that always fails, for exercising degraded retrieval paths.
pub struct FailingEmbedder {
    dimensions: usize,
}

impl FailingEmbedder {
    /// Create a failing embedder.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(EmbeddingError::Request("service unavailable".to_owned()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
