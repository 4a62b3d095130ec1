use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::Result as ShadowdResult;
use crate::observability::MetricsCollector;
use crate::profile::Profile;
use crate::storage::Database;
use super::{
    blacklist::{self, FilterMatcher},
    whitelist, Assessment, Parameter, ParameterVerdict,
};

/// Threat-assessment engine that combines blacklist impact with whitelist
/// overrides for every parameter of a request.
pub struct Analyzer {
    database: Arc<dyn Database>,
    matcher: Arc<dyn FilterMatcher>,
    metrics: Arc<MetricsCollector>,
}

impl Analyzer {
    pub fn new(
        database: Arc<dyn Database>,
        matcher: Arc<dyn FilterMatcher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            database,
            matcher,
            metrics,
        }
    }

    /// Assess all parameters of one request.
    ///
    /// Only the profile's own learning flag relaxes enforcement. Filter or
    /// rule lookup failures abort the whole assessment, so no partial
    /// verdicts ever leave this function.
    pub async fn assess(
        &self,
        profile: &Profile,
        caller: &str,
        parameters: &[Parameter],
    ) -> ShadowdResult<Assessment> {
        let started = Instant::now();
        let learning = profile.learning;

        if parameters.is_empty() {
            return Ok(Assessment {
                verdicts: Vec::new(),
                learning,
                attack: false,
            });
        }

        let filters = self.database.get_blacklist_filters().await?;
        let rules = self.database.get_whitelist_rules(profile.id, caller).await?;

        debug!(
            "Assessing {} parameters for profile {} with {} filters and {} whitelist rules",
            parameters.len(),
            profile.id,
            filters.len(),
            rules.len()
        );

        let verdicts: Vec<ParameterVerdict> = parameters
            .iter()
            .map(|parameter| {
                let blacklisted = blacklist::evaluate(self.matcher.as_ref(), &filters, &parameter.value);
                let covering_rules = whitelist::covering_rules(&rules, &parameter.path);

                let whitelisted = !covering_rules.is_empty();
                let critical_impact = blacklisted.impact >= profile.threshold;

                ParameterVerdict {
                    path: parameter.path.clone(),
                    value: parameter.value.clone(),
                    impact: blacklisted.impact,
                    matched_filters: blacklisted.matched,
                    covering_rules,
                    whitelisted,
                    critical_impact,
                    threat: critical_impact && !whitelisted,
                }
            })
            .collect();

        let assessment = Assessment {
            attack: !learning && verdicts.iter().any(|v| v.threat),
            verdicts,
            learning,
        };

        if assessment.threats() > 0 {
            warn!(
                "Profile {} caller {}: {} of {} parameters are threats{}",
                profile.id,
                caller,
                assessment.threats(),
                assessment.verdicts.len(),
                if learning { " (learning mode, not enforced)" } else { "" }
            );
        }

        self.metrics.record_assessment(&assessment, started.elapsed());
        Ok(assessment)
    }
}
