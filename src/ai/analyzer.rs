use async_trait::async_trait;

use crate::{
    domain::ContentAnalysis,
    moderation::{AnalysisError, ContentAnalyzer},
};

use super::{
    client::GeminiClient,
    inference::{analysis_request, parse_analysis},
};

pub struct GeminiContentAnalyzer {
    client: GeminiClient,
}

impl GeminiContentAnalyzer {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentAnalyzer for GeminiContentAnalyzer {
    async fn analyze(&self, content: &str) -> Result<ContentAnalysis, AnalysisError> {
        let reply = self.client.generate(&analysis_request(content)).await?;
        let analysis = parse_analysis(&reply)?;
        tracing::debug!(
            target: "gemini",
            flagged = analysis.flagged,
            confidence = analysis.confidence,
            "content analysis received"
        );
        Ok(analysis)
    }
}
