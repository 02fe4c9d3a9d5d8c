//! Routing plan and request hints

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a routing rationale.
pub const MAX_RATIONALE_LEN: usize = 200;

/// The five retrieval strategies the supervisor routes between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "BM25")]
    Bm25,
    Compression,
    Ensemble,
    WebSearch,
    LogSearch,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Bm25,
        StrategyKind::Compression,
        StrategyKind::Ensemble,
        StrategyKind::WebSearch,
        StrategyKind::LogSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Bm25 => "BM25",
            StrategyKind::Compression => "Compression",
            StrategyKind::Ensemble => "Ensemble",
            StrategyKind::WebSearch => "WebSearch",
            StrategyKind::LogSearch => "LogSearch",
        }
    }

    /// Lowercase tag used in context sources and metric labels.
    pub fn tag(&self) -> &'static str {
        match self {
            StrategyKind::Bm25 => "bm25",
            StrategyKind::Compression => "compression",
            StrategyKind::Ensemble => "ensemble",
            StrategyKind::WebSearch => "web",
            StrategyKind::LogSearch => "logs",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bm25" => Ok(StrategyKind::Bm25),
            "compression" => Ok(StrategyKind::Compression),
            "ensemble" => Ok(StrategyKind::Ensemble),
            "websearch" | "web_search" => Ok(StrategyKind::WebSearch),
            "logsearch" | "log_search" => Ok(StrategyKind::LogSearch),
            _ => Err(()),
        }
    }
}

/// Caller-supplied routing hints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHints {
    #[serde(default)]
    pub user_can_wait: bool,
    #[serde(default)]
    pub production_incident: bool,
}

impl QueryHints {
    /// Urgency narrows routing toward low-latency strategies.
    pub fn urgent(&self) -> bool {
        self.production_incident
    }
}

/// The supervisor's routing decision, recreated per request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub strategy: StrategyKind,
    pub rationale: String,
    pub urgent: bool,
}

impl QueryPlan {
    /// Build a plan, truncating the rationale to its documented cap.
    pub fn new(strategy: StrategyKind, rationale: impl Into<String>, urgent: bool) -> Self {
        let mut rationale = rationale.into();
        if rationale.len() > MAX_RATIONALE_LEN {
            let mut cut = MAX_RATIONALE_LEN;
            while !rationale.is_char_boundary(cut) {
                cut -= 1;
            }
            rationale.truncate(cut);
        }
        Self {
            strategy,
            rationale,
            urgent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        assert_eq!(StrategyKind::Bm25.to_string(), "BM25");
        assert_eq!(StrategyKind::WebSearch.as_str(), "WebSearch");
        assert_eq!("bm25".parse::<StrategyKind>().unwrap(), StrategyKind::Bm25);
        assert_eq!(
            "log_search".parse::<StrategyKind>().unwrap(),
            StrategyKind::LogSearch
        );
        assert!("unknown".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_strategy_serde_round_trip() {
        let json = serde_json::to_string(&StrategyKind::Bm25).unwrap();
        assert_eq!(json, "\"BM25\"");
        let back: StrategyKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StrategyKind::Bm25);
    }

    #[test]
    fn test_rationale_truncated() {
        let plan = QueryPlan::new(StrategyKind::Ensemble, "x".repeat(500), false);
        assert!(plan.rationale.len() <= MAX_RATIONALE_LEN);
    }

    #[test]
    fn test_hints_urgency() {
        let hints = QueryHints {
            user_can_wait: false,
            production_incident: true,
        };
        assert!(hints.urgent());
        assert!(!QueryHints::default().urgent());
    }
}
