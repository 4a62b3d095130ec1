// Persistence layer - ordered, identity-returning access to the backing store

pub mod sql;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result as ShadowdResult;
use crate::profile::Profile;

pub use sql::SqlDatabase;

/// Global blacklist filter. `rule` is handed to the matcher as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistFilter {
    pub id: i64,
    pub rule: String,
    pub impact: i64,
}

/// Whitelist rule scoped to a profile and caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistRule {
    pub id: i64,
    pub profile_id: i64,
    pub caller: String,
    /// Parameter path pattern, `*` matches any run of characters.
    pub path: String,
}

/// Audit row for one assessed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub profile_id: i64,
    pub caller: String,
    pub learning: bool,
    pub client_address: String,
}

/// Audit row for one parameter. `request_id` must already be assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParameter {
    pub request_id: i64,
    pub path: String,
    pub value: String,
    pub total_rules: i64,
    pub critical_impact: bool,
    pub threat: bool,
}

/// Data-access contract shared by every component.
///
/// Implementations serialize each individual query against their backing
/// connection. Callers are responsible for ordering a request's audit
/// trail: `save_request` before `save_parameter`, and `save_parameter`
/// before any connector referencing the returned id. Nothing is rolled
/// back if a later write in the sequence fails.
#[async_trait]
pub trait Database: Send + Sync {
    /// Profile registered for `server_address` with the given id.
    async fn get_profile(&self, server_address: &str, profile_id: i64) -> ShadowdResult<Profile>;

    async fn get_blacklist_filters(&self) -> ShadowdResult<Vec<BlacklistFilter>>;

    async fn get_whitelist_rules(&self, profile_id: i64, caller: &str) -> ShadowdResult<Vec<WhitelistRule>>;

    /// Returns the id of the new request row.
    async fn save_request(&self, request: &NewRequest) -> ShadowdResult<i64>;

    /// Returns the id of the new parameter row.
    async fn save_parameter(&self, parameter: &NewParameter) -> ShadowdResult<i64>;

    async fn add_blacklist_connector(&self, filter_id: i64, parameter_id: i64) -> ShadowdResult<()>;

    async fn add_whitelist_connector(&self, rule_id: i64, parameter_id: i64) -> ShadowdResult<()>;

    /// Release the backing connection. Later calls fail.
    async fn close(&self) -> ShadowdResult<()>;
}
