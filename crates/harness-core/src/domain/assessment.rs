//! Quality assessments of capability responses.

use serde::{Deserialize, Serialize};

/// Score given to every dimension when an assessor cannot produce one.
pub const NEUTRAL_SCORE: f64 = 5.0;

/// Upper bound of every score.
pub const MAX_SCORE: f64 = 10.0;

/// Per-dimension scores, each in `[0, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DimensionScores {
    pub relevance: f64,
    pub accuracy: f64,
    pub completeness: f64,
    pub usability: f64,
    pub format: f64,
}

impl DimensionScores {
    pub fn uniform(score: f64) -> Self {
        let s = clamp_score(score);
        Self {
            relevance: s,
            accuracy: s,
            completeness: s,
            usability: s,
            format: s,
        }
    }

    /// Weighted overall score: relevance and accuracy 25% each,
    /// completeness and usability 20% each, format 10%.
    pub fn weighted_overall(&self) -> f64 {
        clamp_score(
            self.relevance * 0.25
                + self.accuracy * 0.25
                + self.completeness * 0.2
                + self.usability * 0.2
                + self.format * 0.1,
        )
    }

    /// Component-wise mean. `None` for an empty input.
    pub fn mean<'a>(scores: impl IntoIterator<Item = &'a DimensionScores>) -> Option<Self> {
        let mut sum = DimensionScores::default();
        let mut n = 0usize;
        for s in scores {
            sum.relevance += s.relevance;
            sum.accuracy += s.accuracy;
            sum.completeness += s.completeness;
            sum.usability += s.usability;
            sum.format += s.format;
            n += 1;
        }
        if n == 0 {
            return None;
        }
        let n = n as f64;
        Some(Self {
            relevance: sum.relevance / n,
            accuracy: sum.accuracy / n,
            completeness: sum.completeness / n,
            usability: sum.usability / n,
            format: sum.format / n,
        })
    }
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return NEUTRAL_SCORE;
    }
    score.clamp(0.0, MAX_SCORE)
}

/// Quality verdict for one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall_score: f64,
    pub dimensions: DimensionScores,
    pub explanation: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub is_error_response: bool,
}

impl QualityAssessment {
    /// Build an assessment whose overall score is the weighted dimension mean.
    pub fn from_dimensions(
        dimensions: DimensionScores,
        explanation: impl Into<String>,
        is_error_response: bool,
    ) -> Self {
        Self {
            overall_score: dimensions.weighted_overall(),
            dimensions,
            explanation: explanation.into(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            suggestions: Vec::new(),
            is_error_response,
        }
    }

    /// Mid-range stand-in used when an assessor fails.
    pub fn neutral(reason: impl Into<String>, is_error_response: bool) -> Self {
        Self::from_dimensions(
            DimensionScores::uniform(NEUTRAL_SCORE),
            reason,
            is_error_response,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_overall() {
        let d = DimensionScores {
            relevance: 8.0,
            accuracy: 8.0,
            completeness: 6.0,
            usability: 6.0,
            format: 10.0,
        };
        // 2.0 + 2.0 + 1.2 + 1.2 + 1.0
        assert!((d.weighted_overall() - 7.4).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_clamps() {
        assert_eq!(DimensionScores::uniform(42.0).format, MAX_SCORE);
        assert_eq!(DimensionScores::uniform(-1.0).relevance, 0.0);
        assert_eq!(clamp_score(f64::NAN), NEUTRAL_SCORE);
    }

    #[test]
    fn test_mean_of_empty_is_none() {
        assert!(DimensionScores::mean(std::iter::empty()).is_none());
    }

    #[test]
    fn test_mean_componentwise() {
        let a = DimensionScores::uniform(4.0);
        let b = DimensionScores::uniform(8.0);
        let m = DimensionScores::mean([&a, &b]).unwrap();
        assert_eq!(m, DimensionScores::uniform(6.0));
    }

    #[test]
    fn test_neutral_is_mid_range() {
        let n = QualityAssessment::neutral("assessor unavailable", true);
        assert_eq!(n.overall_score, NEUTRAL_SCORE);
        assert!(n.is_error_response);
    }
}
