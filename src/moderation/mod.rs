pub mod engine;
pub mod errors;
pub mod retry;
pub mod service;
pub mod settings;

pub use engine::{ContentAnalyzer, ModerationEngine, SimilarityScorer};
pub use errors::{AnalysisError, ModerationError, ServiceError, SimilarityError};
pub use retry::RetryPolicy;
pub use service::{
    AutoModerationOutcome, ModerationService, ModerationStore, ModeratorAlerts, Notification,
    MAX_AUTO_ATTEMPTS,
};
pub use settings::{ModerationSettings, SettingsBackend, SettingsRegistry};
