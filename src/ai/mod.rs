mod analyzer;
mod client;
mod inference;
mod similarity;

pub use analyzer::GeminiContentAnalyzer;
pub use client::{GeminiClient, GeminiError};
pub use similarity::{CorpusSource, GeminiSimilarityScorer};
