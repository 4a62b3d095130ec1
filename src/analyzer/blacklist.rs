use std::collections::HashSet;

use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::storage::BlacklistFilter;

/// Decides whether a filter matches a raw parameter value.
pub trait FilterMatcher: Send + Sync {
    fn is_match(&self, filter: &BlacklistFilter, value: &str) -> bool;
}

/// Matches filters as case-insensitive regular expressions.
///
/// Compiled expressions are cached per filter id and recompiled when the
/// stored rule text changes. A rule that does not compile never matches.
#[derive(Default)]
pub struct RegexMatcher {
    compiled: DashMap<i64, CompiledFilter>,
}

struct CompiledFilter {
    rule: String,
    regex: Option<Regex>,
}

impl RegexMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(filter: &BlacklistFilter) -> CompiledFilter {
        let regex = match RegexBuilder::new(&filter.rule).case_insensitive(true).build() {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Blacklist filter {} does not compile, ignoring it: {}", filter.id, e);
                None
            }
        };

        CompiledFilter {
            rule: filter.rule.clone(),
            regex,
        }
    }
}

impl FilterMatcher for RegexMatcher {
    fn is_match(&self, filter: &BlacklistFilter, value: &str) -> bool {
        if let Some(entry) = self.compiled.get(&filter.id) {
            if entry.rule == filter.rule {
                return entry.regex.as_ref().map_or(false, |r| r.is_match(value));
            }
        }

        let compiled = Self::compile(filter);
        let matched = compiled.regex.as_ref().map_or(false, |r| r.is_match(value));
        self.compiled.insert(filter.id, compiled);
        matched
    }
}

/// Blacklist outcome for one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlacklistResult {
    pub impact: i64,
    pub matched: Vec<i64>,
}

/// Score `value` against every filter. A filter contributes its impact at
/// most once, even if the filter list repeats it.
pub fn evaluate(matcher: &dyn FilterMatcher, filters: &[BlacklistFilter], value: &str) -> BlacklistResult {
    let mut seen = HashSet::new();
    let mut result = BlacklistResult::default();

    for filter in filters {
        if seen.contains(&filter.id) {
            continue;
        }
        if matcher.is_match(filter, value) {
            seen.insert(filter.id);
            result.impact = result.impact.saturating_add(filter.impact);
            result.matched.push(filter.id);
        }
    }

    result
}
