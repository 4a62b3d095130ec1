pub mod blacklist;
pub mod engine;
pub mod whitelist;

use serde::{Deserialize, Serialize};

pub use blacklist::RegexMatcher;
pub use engine::Analyzer;

/// One decoded request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub path: String,
    pub value: String,
}

/// Outcome of assessing a single parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterVerdict {
    pub path: String,
    pub value: String,
    /// Sum of the impacts of every distinct matching filter.
    pub impact: i64,
    pub matched_filters: Vec<i64>,
    /// Whitelist rules covering this path, recorded even without a match.
    pub covering_rules: Vec<i64>,
    pub whitelisted: bool,
    /// `impact >= threshold`, independent of whitelisting.
    pub critical_impact: bool,
    pub threat: bool,
}

impl ParameterVerdict {
    pub fn total_rules(&self) -> i64 {
        self.covering_rules.len() as i64
    }
}

/// Verdicts for a whole request plus the request-level decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub verdicts: Vec<ParameterVerdict>,
    pub learning: bool,
    pub attack: bool,
}

impl Assessment {
    pub fn threats(&self) -> usize {
        self.verdicts.iter().filter(|v| v.threat).count()
    }
}
