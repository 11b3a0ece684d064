//! Priority tiers for scheduled tasks.

use serde::{Deserialize, Serialize};

/// Priority tier of a scheduled [`super::Task`].
///
/// Ordered ascending so `Priority::Critical > Priority::Background` holds
/// under the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Background,
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// WFQ weight used to compute virtual finish time.
    pub fn weight(self) -> f64 {
        match self {
            Priority::Critical => 100.0,
            Priority::High => 50.0,
            Priority::Normal => 25.0,
            Priority::Low => 10.0,
            Priority::Background => 5.0,
        }
    }

    /// One tier up, or `None` if already `Critical`.
    pub fn promote(self) -> Option<Priority> {
        match self {
            Priority::Background => Some(Priority::Low),
            Priority::Low => Some(Priority::Normal),
            Priority::Normal => Some(Priority::High),
            Priority::High => Some(Priority::Critical),
            Priority::Critical => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("unknown priority: {}", s)),
        }
    }
}

/// Infers a priority tier from a tool name, per the admission controller's
/// inference step. `parallel_count` is the fan-out width for parallel-run
/// tools, when known.
pub fn infer_priority(tool_name: &str, parallel_count: Option<u32>) -> Priority {
    match tool_name {
        "question" => Priority::Critical,
        "subagent_run_parallel" if parallel_count.unwrap_or(1) >= 2 => Priority::High,
        name if name.ends_with("_retry") => Priority::Low,
        name if name.starts_with("background_") => Priority::Background,
        _ => Priority::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_ascending() {
        assert!(Priority::Background < Priority::Low);
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn display_and_parse_round_trip() {
        for p in [
            Priority::Background,
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ] {
            assert_eq!(p.to_string().parse::<Priority>().unwrap(), p);
        }
        assert!("nonsense".parse::<Priority>().is_err());
    }

    #[test]
    fn promote_steps_one_tier_and_stops_at_critical() {
        assert_eq!(Priority::Background.promote(), Some(Priority::Low));
        assert_eq!(Priority::Critical.promote(), None);
    }

    #[test]
    fn serde_uses_lowercase() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
    }

    #[test]
    fn infer_priority_matches_known_patterns() {
        assert_eq!(infer_priority("question", None), Priority::Critical);
        assert_eq!(infer_priority("subagent_run_parallel", Some(4)), Priority::High);
        assert_eq!(infer_priority("subagent_run_parallel", Some(1)), Priority::Normal);
        assert_eq!(infer_priority("fetch_retry", None), Priority::Low);
        assert_eq!(infer_priority("background_cleanup", None), Priority::Background);
        assert_eq!(infer_priority("read_file", None), Priority::Normal);
    }
}
