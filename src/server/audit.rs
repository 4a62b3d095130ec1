use tracing::debug;

use crate::analyzer::Assessment;
use crate::error::Result as ShadowdResult;
use crate::storage::{Database, NewParameter, NewRequest};

/// Persist the audit trail of one assessed request.
///
/// Writes happen strictly in dependency order: the request row, then each
/// parameter row with the request id, then that parameter's connectors.
/// A failure stops the sequence; rows already written stay in place.
pub async fn record(
    database: &dyn Database,
    request: &NewRequest,
    assessment: &Assessment,
) -> ShadowdResult<i64> {
    let request_id = database.save_request(request).await?;

    for verdict in &assessment.verdicts {
        let parameter_id = database
            .save_parameter(&NewParameter {
                request_id,
                path: verdict.path.clone(),
                value: verdict.value.clone(),
                total_rules: verdict.total_rules(),
                critical_impact: verdict.critical_impact,
                threat: verdict.threat,
            })
            .await?;

        for filter_id in &verdict.matched_filters {
            database.add_blacklist_connector(*filter_id, parameter_id).await?;
        }

        for rule_id in &verdict.covering_rules {
            database.add_whitelist_connector(*rule_id, parameter_id).await?;
        }
    }

    debug!(
        "Recorded request {} with {} parameters",
        request_id,
        assessment.verdicts.len()
    );
    Ok(request_id)
}
