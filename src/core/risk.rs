//! Risk scoring of finished conversations.
//!
//! Scoring runs after a session ends, never on the live path. The model
//! behind [`RiskScorer`] is external; this module only maps scores to levels
//! and summarizes a session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::turn::{ConversationHistory, Role};

/// Scores above this are high risk.
pub const HIGH_RISK_THRESHOLD: f32 = 0.8;

/// Scores above this (and not high) are medium risk.
pub const MEDIUM_RISK_THRESHOLD: f32 = 0.4;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Scoring failed: {0}")]
    ScoringFailed(String),

    #[error("Score out of range: {0}")]
    InvalidScore(f32),
}

pub type RiskResult<T> = Result<T, RiskError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f32) -> Self {
        if score > HIGH_RISK_THRESHOLD {
            Self::High
        } else if score > MEDIUM_RISK_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scores one message's text in `0.0..=1.0`.
#[async_trait]
pub trait RiskScorer: Send + Sync {
    async fn score(&self, text: &str) -> RiskResult<f32>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: f32,
    pub risk_level: RiskLevel,
}

impl RiskAssessment {
    pub fn from_score(score: f32) -> RiskResult<Self> {
        if !(0.0..=1.0).contains(&score) {
            return Err(RiskError::InvalidScore(score));
        }
        Ok(Self {
            score,
            risk_level: RiskLevel::from_score(score),
        })
    }
}

/// Per-message assessments of the caller's entries in one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRiskSummary {
    pub assessments: Vec<RiskAssessment>,
    /// Highest score seen, 0 when nothing was scored
    pub max_score: f32,
    pub risk_level: RiskLevel,
    /// Messages whose scoring failed
    pub failed: usize,
}

/// Score every user entry of `history`.
///
/// A failing message is counted and skipped so one bad call does not lose
/// the whole summary.
pub async fn assess_history(
    scorer: &dyn RiskScorer,
    history: &ConversationHistory,
) -> SessionRiskSummary {
    let mut assessments = Vec::new();
    let mut failed = 0;
    for entry in history.by_role(Role::User) {
        match scorer
            .score(&entry.content)
            .await
            .and_then(RiskAssessment::from_score)
        {
            Ok(assessment) => assessments.push(assessment),
            Err(e) => {
                warn!("Risk scoring failed: {}", e);
                failed += 1;
            }
        }
    }

    let max_score = assessments.iter().map(|a| a.score).fold(0.0f32, f32::max);
    SessionRiskSummary {
        risk_level: RiskLevel::from_score(max_score),
        max_score,
        assessments,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::turn::ConversationEntry;

    #[test]
    fn test_thresholds_are_exclusive() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.4), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.41), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.8), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.81), RiskLevel::High);
        assert!(RiskAssessment::from_score(1.5).is_err());
    }

    struct KeywordScorer;

    #[async_trait]
    impl RiskScorer for KeywordScorer {
        async fn score(&self, text: &str) -> RiskResult<f32> {
            if text.contains("error") {
                Err(RiskError::ScoringFailed("model unavailable".to_string()))
            } else if text.contains("hopeless") {
                Ok(0.9)
            } else {
                Ok(0.1)
            }
        }
    }

    #[tokio::test]
    async fn test_assess_history_scores_user_entries_only() {
        let mut history = ConversationHistory::new();
        history.push(ConversationEntry::new(Role::Therapist, "You sound hopeless"));
        history.push(ConversationEntry::new(Role::User, "I feel fine"));
        history.push(ConversationEntry::new(Role::User, "Everything is hopeless"));
        history.push(ConversationEntry::new(Role::User, "trigger an error"));

        let summary = assess_history(&KeywordScorer, &history).await;
        assert_eq!(summary.assessments.len(), 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.risk_level, RiskLevel::High);
        assert!((summary.max_score - 0.9).abs() < 1e-6);

        let json = serde_json::to_value(&summary.assessments[1]).unwrap();
        assert_eq!(json["riskLevel"], "high");
    }
}
