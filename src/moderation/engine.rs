use std::sync::Arc;

use async_trait::async_trait;
use futures::TryFutureExt;

use crate::domain::{BlogStatus, Candidate, ContentAnalysis, ModerationDecision};

use super::{
    errors::{AnalysisError, ModerationError, SimilarityError},
    retry::{call_with_retry, RetryPolicy},
    settings::ModerationSettings,
};

pub const REASON_SPAM: &str = "Spam content detected";
pub const REASON_HATE: &str = "Hate speech detected";
pub const REASON_INAPPROPRIATE: &str = "Inappropriate content detected";
pub const REASON_VIOLENCE: &str = "Violent content detected";
pub const REASON_PLAGIARISM: &str = "High plagiarism score";

#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(&self, content: &str) -> Result<ContentAnalysis, AnalysisError>;
}

#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    /// Highest similarity in [0, 1] between the candidate and existing
    /// non-rejected content; `0.0` when there is nothing to compare against.
    async fn max_similarity(&self, candidate: &Candidate<'_>) -> Result<f64, SimilarityError>;
}

/// Turns analyzer and scorer output into a publish/reject decision.
///
/// The engine does no persistence of its own; callers store the decision and
/// dispatch notifications. It holds no mutable state and can be shared freely.
pub struct ModerationEngine {
    analyzer: Arc<dyn ContentAnalyzer>,
    scorer: Arc<dyn SimilarityScorer>,
    retry: RetryPolicy,
}

impl ModerationEngine {
    pub fn new(
        analyzer: Arc<dyn ContentAnalyzer>,
        scorer: Arc<dyn SimilarityScorer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            analyzer,
            scorer,
            retry,
        }
    }

    pub async fn evaluate(
        &self,
        candidate: &Candidate<'_>,
        settings: &ModerationSettings,
    ) -> Result<ModerationDecision, ModerationError> {
        if !settings.enabled {
            tracing::debug!(
                target: "engine",
                blog_id = candidate.blog_id,
                "auto-moderation disabled; skipping analysis"
            );
            return Ok(ModerationDecision::pending());
        }

        let analysis = call_with_retry(&self.retry, "analysis", || {
            self.analyzer.analyze(candidate.content)
        })
        .map_err(ModerationError::from);
        let similarity = call_with_retry(&self.retry, "similarity", || {
            self.scorer.max_similarity(candidate)
        })
        .map_err(ModerationError::from);

        let (analysis, similarity) = tokio::try_join!(analysis, similarity)?;
        let decision = decide(&analysis, similarity, settings);

        tracing::info!(
            target: "engine",
            blog_id = candidate.blog_id,
            status = %decision.status,
            similarity,
            confidence = analysis.confidence,
            reasons = decision.reasons.len(),
            "moderation pass complete"
        );
        Ok(decision)
    }
}

/// Pure decision rule. Reasons follow a fixed order (spam, hate,
/// inappropriate, violence, plagiarism); a similarity equal to the threshold
/// does not reject. Content is never auto-approved.
pub fn decide(
    analysis: &ContentAnalysis,
    similarity: f64,
    settings: &ModerationSettings,
) -> ModerationDecision {
    let categories = &analysis.categories;
    let rules = [
        (settings.auto_reject_spam, categories.spam, REASON_SPAM),
        (settings.auto_reject_hate, categories.hate, REASON_HATE),
        (
            settings.auto_reject_inappropriate,
            categories.inappropriate,
            REASON_INAPPROPRIATE,
        ),
        (
            settings.auto_reject_violence,
            categories.violence,
            REASON_VIOLENCE,
        ),
    ];

    let mut reasons: Vec<String> = rules
        .iter()
        .filter(|(enabled, detected, _)| *enabled && *detected)
        .map(|(_, _, reason)| reason.to_string())
        .collect();

    if similarity > settings.max_plagiarism_score {
        reasons.push(REASON_PLAGIARISM.to_string());
    }

    let status = if reasons.is_empty() {
        BlogStatus::Pending
    } else {
        BlogStatus::Rejected
    };
    ModerationDecision { status, reasons }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{ai::GeminiError, domain::ContentCategories};

    pub(crate) struct FakeAnalyzer {
        pub result: Result<ContentCategories, fn() -> AnalysisError>,
        pub calls: AtomicUsize,
    }

    impl FakeAnalyzer {
        pub fn returning(categories: ContentCategories) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(categories),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn failing(err: fn() -> AnalysisError) -> Arc<Self> {
            Arc::new(Self {
                result: Err(err),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ContentAnalyzer for FakeAnalyzer {
        async fn analyze(&self, _content: &str) -> Result<ContentAnalysis, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(categories) => Ok(ContentAnalysis {
                    flagged: categories.spam
                        || categories.hate
                        || categories.inappropriate
                        || categories.violence,
                    categories: *categories,
                    confidence: 0.9,
                    reasons: Vec::new(),
                }),
                Err(make) => Err(make()),
            }
        }
    }

    pub(crate) struct FakeScorer {
        pub result: Result<f64, fn() -> SimilarityError>,
        pub calls: AtomicUsize,
    }

    impl FakeScorer {
        pub fn returning(score: f64) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(score),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn failing(err: fn() -> SimilarityError) -> Arc<Self> {
            Arc::new(Self {
                result: Err(err),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SimilarityScorer for FakeScorer {
        async fn max_similarity(&self, _candidate: &Candidate<'_>) -> Result<f64, SimilarityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(score) => Ok(*score),
                Err(make) => Err(make()),
            }
        }
    }

    pub(crate) fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_secs(1),
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn scenario_settings() -> ModerationSettings {
        ModerationSettings {
            enabled: true,
            max_plagiarism_score: 0.8,
            auto_reject_spam: true,
            auto_reject_hate: false,
            auto_reject_inappropriate: false,
            auto_reject_violence: false,
            notify_moderators: false,
        }
    }

    fn analysis(categories: ContentCategories) -> ContentAnalysis {
        ContentAnalysis {
            flagged: true,
            categories,
            confidence: 0.7,
            reasons: Vec::new(),
        }
    }

    fn candidate() -> Candidate<'static> {
        Candidate {
            blog_id: Some(7),
            content: "A transcript of last week's podcast episode.",
        }
    }

    #[test]
    fn ignores_categories_whose_auto_reject_flag_is_off() {
        let categories = ContentCategories {
            spam: true,
            hate: true,
            ..Default::default()
        };
        let decision = decide(&analysis(categories), 0.5, &scenario_settings());
        assert_eq!(decision.status, BlogStatus::Rejected);
        assert_eq!(decision.reasons, vec![REASON_SPAM.to_string()]);
    }

    #[test]
    fn plagiarism_above_threshold_rejects() {
        let decision = decide(&analysis(ContentCategories::default()), 0.81, &scenario_settings());
        assert_eq!(decision.status, BlogStatus::Rejected);
        assert_eq!(decision.reasons, vec![REASON_PLAGIARISM.to_string()]);
    }

    #[test]
    fn similarity_equal_to_threshold_stays_pending() {
        let settings = scenario_settings();
        let at = decide(&analysis(ContentCategories::default()), 0.8, &settings);
        assert_eq!(at, ModerationDecision::pending());

        let above = decide(&analysis(ContentCategories::default()), 0.8 + 1e-9, &settings);
        assert_eq!(above.status, BlogStatus::Rejected);
    }

    #[test]
    fn reasons_follow_fixed_order_with_plagiarism_last() {
        let settings = ModerationSettings::default();
        let categories = ContentCategories {
            spam: true,
            hate: true,
            inappropriate: true,
            violence: true,
        };
        let decision = decide(&analysis(categories), 0.95, &settings);
        assert_eq!(
            decision.reasons,
            vec![
                REASON_SPAM,
                REASON_HATE,
                REASON_INAPPROPRIATE,
                REASON_VIOLENCE,
                REASON_PLAGIARISM
            ]
        );
        assert_eq!(
            decision.notes(),
            "Spam content detected, Hate speech detected, Inappropriate content detected, \
             Violent content detected, High plagiarism score"
        );
    }

    #[test]
    fn clean_content_is_never_auto_approved() {
        let decision = decide(&analysis(ContentCategories::default()), 0.0, &ModerationSettings::default());
        assert_eq!(decision.status, BlogStatus::Pending);
        assert!(decision.reasons.is_empty());
    }

    #[tokio::test]
    async fn disabled_settings_skip_both_calls() {
        let analyzer = FakeAnalyzer::returning(ContentCategories {
            spam: true,
            ..Default::default()
        });
        let scorer = FakeScorer::returning(1.0);
        let engine = ModerationEngine::new(analyzer.clone(), scorer.clone(), fast_retry());
        let settings = ModerationSettings {
            enabled: false,
            ..scenario_settings()
        };

        let decision = engine.evaluate(&candidate(), &settings).await.unwrap();
        assert_eq!(decision, ModerationDecision::pending());
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn evaluate_combines_both_signals() {
        let analyzer = FakeAnalyzer::returning(ContentCategories {
            spam: true,
            ..Default::default()
        });
        let scorer = FakeScorer::returning(0.9);
        let engine = ModerationEngine::new(analyzer, scorer, fast_retry());

        let decision = engine
            .evaluate(&candidate(), &scenario_settings())
            .await
            .unwrap();
        assert_eq!(
            decision.reasons,
            vec![REASON_SPAM.to_string(), REASON_PLAGIARISM.to_string()]
        );
    }

    #[tokio::test]
    async fn analyzer_failure_is_propagated() {
        let analyzer = FakeAnalyzer::failing(|| AnalysisError::Malformed("truncated".into()));
        let scorer = FakeScorer::returning(0.0);
        let engine = ModerationEngine::new(analyzer.clone(), scorer, fast_retry());

        let err = engine
            .evaluate(&candidate(), &scenario_settings())
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::Analysis(AnalysisError::Malformed(_))));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_scorer_failure_is_retried_before_failing() {
        let analyzer = FakeAnalyzer::returning(ContentCategories::default());
        let scorer = FakeScorer::failing(|| {
            SimilarityError::Upstream(GeminiError::Status {
                status: 503,
                message: "overloaded".into(),
            })
        });
        let engine = ModerationEngine::new(analyzer, scorer.clone(), fast_retry());

        let err = engine
            .evaluate(&candidate(), &scenario_settings())
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::Similarity(SimilarityError::Upstream(_))));
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 2);
    }
}
