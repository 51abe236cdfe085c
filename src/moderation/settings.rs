use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::db::PersistenceError;

use super::errors::ServiceError;

/// Operator-tunable auto-moderation rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModerationSettings {
    pub enabled: bool,
    pub max_plagiarism_score: f64,
    pub auto_reject_spam: bool,
    pub auto_reject_hate: bool,
    pub auto_reject_inappropriate: bool,
    pub auto_reject_violence: bool,
    pub notify_moderators: bool,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_plagiarism_score: 0.8,
            auto_reject_spam: true,
            auto_reject_hate: true,
            auto_reject_inappropriate: true,
            auto_reject_violence: true,
            notify_moderators: true,
        }
    }
}

pub const SETTING_KEYS: [&str; 7] = [
    "enabled",
    "max_plagiarism_score",
    "auto_reject_spam",
    "auto_reject_hate",
    "auto_reject_inappropriate",
    "auto_reject_violence",
    "notify_moderators",
];

impl ModerationSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_plagiarism_score.is_finite()
            || !(0.0..=1.0).contains(&self.max_plagiarism_score)
        {
            return Err(format!(
                "max_plagiarism_score must be within [0, 1], got {}",
                self.max_plagiarism_score
            ));
        }
        Ok(())
    }

    /// Applies a single `key value` change as typed by an operator.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        if key == "max_plagiarism_score" {
            self.max_plagiarism_score = value
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("{value:?} is not a number"))?;
            return self.validate();
        }

        let flag = parse_flag(value)?;
        match key {
            "enabled" => self.enabled = flag,
            "auto_reject_spam" => self.auto_reject_spam = flag,
            "auto_reject_hate" => self.auto_reject_hate = flag,
            "auto_reject_inappropriate" => self.auto_reject_inappropriate = flag,
            "auto_reject_violence" => self.auto_reject_violence = flag,
            "notify_moderators" => self.notify_moderators = flag,
            other => {
                return Err(format!(
                    "unknown setting {other:?}; expected one of {}",
                    SETTING_KEYS.join(", ")
                ))
            }
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(format!("{other:?} is not a boolean (use on/off)")),
    }
}

#[async_trait]
pub trait SettingsBackend: Send + Sync {
    async fn load(&self) -> Result<Option<ModerationSettings>, PersistenceError>;
    async fn save(&self, settings: &ModerationSettings) -> Result<(), PersistenceError>;
}

/// Cached settings, written through to the backend. Concurrent writers are
/// not coordinated: the last successful save wins.
pub struct SettingsRegistry {
    current: RwLock<ModerationSettings>,
    backend: Arc<dyn SettingsBackend>,
}

impl SettingsRegistry {
    pub async fn load(backend: Arc<dyn SettingsBackend>) -> Result<Self, PersistenceError> {
        let current = match backend.load().await? {
            Some(settings) => settings,
            None => {
                let defaults = ModerationSettings::default();
                backend.save(&defaults).await?;
                tracing::info!(target: "settings", "stored default moderation settings");
                defaults
            }
        };
        Ok(Self {
            current: RwLock::new(current),
            backend,
        })
    }

    pub fn snapshot(&self) -> ModerationSettings {
        *self.current.read()
    }

    pub async fn update<F>(&self, change: F) -> Result<ModerationSettings, ServiceError>
    where
        F: FnOnce(&mut ModerationSettings) -> Result<(), String>,
    {
        let mut next = self.snapshot();
        change(&mut next).map_err(ServiceError::InvalidSettings)?;
        next.validate().map_err(ServiceError::InvalidSettings)?;

        self.backend.save(&next).await?;
        *self.current.write() = next;
        tracing::info!(target: "settings", settings = ?next, "moderation settings updated");
        Ok(next)
    }
}
