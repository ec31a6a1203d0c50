//! Recall evaluation outcomes.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recall_queue::RecallType;

/// Letter grade returned by the evaluation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grade {
    /// F
    F,
    /// D
    D,
    /// C-
    CMinus,
    /// C
    C,
    /// C+
    CPlus,
    /// B-
    BMinus,
    /// B
    B,
    /// B+
    BPlus,
    /// A-
    AMinus,
    /// A
    A,
    /// A+
    APlus,
}

impl Grade {
    /// Grade points on the usual 4.3 scale.
    #[must_use]
    pub const fn points(self) -> f64 {
        match self {
            Self::F => 0.0,
            Self::D => 1.0,
            Self::CMinus => 1.7,
            Self::C => 2.0,
            Self::CPlus => 2.3,
            Self::BMinus => 2.7,
            Self::B => 3.0,
            Self::BPlus => 3.3,
            Self::AMinus => 3.7,
            Self::A => 4.0,
            Self::APlus => 4.3,
        }
    }

    /// The letter as written.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F => "F",
            Self::D => "D",
            Self::CMinus => "C-",
            Self::C => "C",
            Self::CPlus => "C+",
            Self::BMinus => "B-",
            Self::B => "B",
            Self::BPlus => "B+",
            Self::AMinus => "A-",
            Self::A => "A",
            Self::APlus => "A+",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a grade string is not a known letter grade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown letter grade '{0}'")]
pub struct UnknownGrade(pub String);

impl FromStr for Grade {
    type Err = UnknownGrade;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "F" => Ok(Self::F),
            "D" => Ok(Self::D),
            "C-" => Ok(Self::CMinus),
            "C" => Ok(Self::C),
            "C+" => Ok(Self::CPlus),
            "B-" => Ok(Self::BMinus),
            "B" => Ok(Self::B),
            "B+" => Ok(Self::BPlus),
            "A-" => Ok(Self::AMinus),
            "A" => Ok(Self::A),
            "A+" => Ok(Self::APlus),
            _ => Err(UnknownGrade(s.to_string())),
        }
    }
}

impl Serialize for Grade {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Grade {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<Self>().map_err(serde::de::Error::custom)
    }
}

/// Advisory reading of a mastery score. Never drives progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryBand {
    /// 0.9 and above.
    Excellent,
    /// 0.7 and above.
    Good,
    /// 0.3 and above.
    Partial,
    /// Below 0.3.
    Incorrect,
}

impl MasteryBand {
    /// Band for a score in [0, 1].
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Excellent
        } else if score >= 0.7 {
            Self::Good
        } else if score >= 0.3 {
            Self::Partial
        } else {
            Self::Incorrect
        }
    }
}

/// Append-only result of one recall evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    /// Lesson the attempt belongs to.
    pub lesson_id: String,
    /// Id of the node that was reconstructed.
    pub node_id: String,
    /// Position of that node.
    pub node_index: usize,
    /// Recall variant.
    pub recall_type: RecallType,
    /// Term answered, for partial recall.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    /// Context nodes shown during the attempt.
    #[serde(default)]
    pub hint_node_ids: Vec<String>,
    /// What the learner wrote.
    pub response: String,
    /// Score in [0, 1].
    pub score: f64,
    /// Letter grade.
    pub grade: Grade,
    /// Evaluator feedback.
    pub feedback: String,
    /// Cycle in which the attempt was made.
    pub cycle: usize,
    /// When the attempt was evaluated.
    pub attempted_at: DateTime<Utc>,
}

impl MasteryRecord {
    /// Advisory band of this record's score.
    #[must_use]
    pub fn band(&self) -> MasteryBand {
        MasteryBand::from_score(self.score)
    }
}
