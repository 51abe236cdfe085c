use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ContentAnalysis, ContentCategories},
    moderation::{AnalysisError, SimilarityError},
};

const ANALYSIS_INSTRUCTION: &str = r#"You review user-submitted blog posts for a publishing platform. Check the content for:
1. Spam content
2. Hate speech
3. Inappropriate content
4. Violence

Respond only with a JSON object of this exact shape:
{
  "flagged": boolean,
  "categories": {
    "spam": boolean,
    "hate": boolean,
    "inappropriate": boolean,
    "violence": boolean
  },
  "reasons": string[],
  "confidence": number between 0 and 1
}"#;

const SIMILARITY_INSTRUCTION: &str = "Compare the new text with the existing texts and calculate a similarity score between 0 and 1. \
Consider semantic similarity, not just exact matches. \
Return only the number representing the highest similarity score.";

const CORPUS_SEPARATOR: &str = "\n---\n";

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("valid code fence regex")
});

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub system_instruction: Content,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

pub fn analysis_request(content: &str) -> GenerateContentRequest {
    build_request(
        ANALYSIS_INSTRUCTION,
        format!("Content to analyze:\n{content}"),
        Some("application/json"),
        1024,
    )
}

pub fn similarity_request(content: &str, corpus: &[String]) -> GenerateContentRequest {
    build_request(
        SIMILARITY_INSTRUCTION,
        format!(
            "New text:\n{content}\n\nExisting texts:\n{}",
            corpus.join(CORPUS_SEPARATOR)
        ),
        None,
        16,
    )
}

fn build_request(
    instruction: &str,
    prompt: String,
    mime_type: Option<&str>,
    max_output_tokens: u32,
) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".into()),
            parts: vec![Part { text: Some(prompt) }],
        }],
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: Some(instruction.into()),
            }],
        },
        generation_config: GenerationConfig {
            temperature: 0.0,
            max_output_tokens,
            response_mime_type: mime_type.map(str::to_string),
        },
    }
}

/// Concatenated text parts of the first candidate, if there is any text.
pub fn extract_text(response: GenerateContentResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE.captures(text).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    flagged: bool,
    categories: ContentCategories,
    confidence: f64,
    #[serde(default)]
    reasons: Vec<String>,
}

pub fn parse_analysis(text: &str) -> Result<ContentAnalysis, AnalysisError> {
    let raw: RawAnalysis = serde_json::from_str(strip_code_fence(text))
        .map_err(|err| AnalysisError::Malformed(err.to_string()))?;

    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(AnalysisError::Malformed(format!(
            "confidence {} is outside [0, 1]",
            raw.confidence
        )));
    }

    Ok(ContentAnalysis {
        flagged: raw.flagged,
        categories: raw.categories,
        confidence: raw.confidence,
        reasons: raw.reasons,
    })
}

/// A reply that is not a plain number is an error, never a zero score.
pub fn parse_similarity(text: &str) -> Result<f64, SimilarityError> {
    let cleaned = strip_code_fence(text);
    let score = cleaned
        .parse::<f64>()
        .ok()
        .filter(|score| score.is_finite())
        .ok_or_else(|| SimilarityError::NonNumeric(cleaned.to_string()))?;

    if !(0.0..=1.0).contains(&score) {
        return Err(SimilarityError::OutOfRange(score));
    }
    Ok(score)
}
