use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    db::PersistenceError,
    domain::Candidate,
    moderation::{SimilarityError, SimilarityScorer},
};

use super::{
    client::GeminiClient,
    inference::{parse_similarity, similarity_request},
};

/// Supplies the texts a candidate is compared against.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// Contents of non-rejected blogs, leaving out `exclude` when given.
    async fn corpus(&self, exclude: Option<i64>) -> Result<Vec<String>, PersistenceError>;
}

pub struct GeminiSimilarityScorer {
    client: GeminiClient,
    corpus: Arc<dyn CorpusSource>,
}

impl GeminiSimilarityScorer {
    pub fn new(client: GeminiClient, corpus: Arc<dyn CorpusSource>) -> Self {
        Self { client, corpus }
    }
}

#[async_trait]
impl SimilarityScorer for GeminiSimilarityScorer {
    async fn max_similarity(&self, candidate: &Candidate<'_>) -> Result<f64, SimilarityError> {
        let corpus = self
            .corpus
            .corpus(candidate.blog_id)
            .await
            .map_err(SimilarityError::Corpus)?;
        if corpus.is_empty() {
            return Ok(0.0);
        }

        let reply = self
            .client
            .generate(&similarity_request(candidate.content, &corpus))
            .await?;
        let score = parse_similarity(&reply)?;
        tracing::debug!(target: "gemini", corpus = corpus.len(), score, "similarity score received");
        Ok(score)
    }
}
