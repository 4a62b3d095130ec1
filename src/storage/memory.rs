// In-memory database, records every write in order

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BlacklistFilter, Database, NewParameter, NewRequest, WhitelistRule};
use crate::error::{Result as ShadowdResult, ShadowdError};
use crate::profile::Profile;

/// One entry of the write journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEvent {
    Request { id: i64 },
    Parameter { id: i64, request_id: i64 },
    BlacklistConnector { filter_id: i64, parameter_id: i64 },
    WhitelistConnector { rule_id: i64, parameter_id: i64 },
}

#[derive(Default)]
struct State {
    profiles: Vec<Profile>,
    filters: Vec<BlacklistFilter>,
    rules: Vec<WhitelistRule>,
    requests: Vec<(i64, NewRequest)>,
    parameters: Vec<(i64, NewParameter)>,
    journal: Vec<WriteEvent>,
    next_id: i64,
}

pub struct InMemoryDatabase {
    state: Mutex<State>,
    fail_rule_lookups: AtomicBool,
    fail_parameter_writes: AtomicBool,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_rule_lookups: AtomicBool::new(false),
            fail_parameter_writes: AtomicBool::new(false),
        }
    }

    pub fn add_profile(&self, profile: Profile) {
        self.state.lock().unwrap().profiles.push(profile);
    }

    pub fn add_filter(&self, filter: BlacklistFilter) {
        self.state.lock().unwrap().filters.push(filter);
    }

    pub fn add_rule(&self, rule: WhitelistRule) {
        self.state.lock().unwrap().rules.push(rule);
    }

    pub fn set_fail_rule_lookups(&self, fail: bool) {
        self.fail_rule_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_parameter_writes(&self, fail: bool) {
        self.fail_parameter_writes.store(fail, Ordering::SeqCst);
    }

    pub fn journal(&self) -> Vec<WriteEvent> {
        self.state.lock().unwrap().journal.clone()
    }

    pub fn requests(&self) -> Vec<(i64, NewRequest)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn parameters(&self) -> Vec<(i64, NewParameter)> {
        self.state.lock().unwrap().parameters.clone()
    }

    fn assign_id(state: &mut State) -> i64 {
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn get_profile(&self, server_address: &str, profile_id: i64) -> ShadowdResult<Profile> {
        let state = self.state.lock().unwrap();
        state
            .profiles
            .iter()
            .find(|p| p.id == profile_id && p.server_address == server_address)
            .cloned()
            .ok_or_else(|| ShadowdError::ProfileNotFound {
                server_address: server_address.to_string(),
                profile_id,
            })
    }

    async fn get_blacklist_filters(&self) -> ShadowdResult<Vec<BlacklistFilter>> {
        Ok(self.state.lock().unwrap().filters.clone())
    }

    async fn get_whitelist_rules(&self, profile_id: i64, caller: &str) -> ShadowdResult<Vec<WhitelistRule>> {
        if self.fail_rule_lookups.load(Ordering::SeqCst) {
            return Err(ShadowdError::Internal("whitelist lookup failed".to_string()));
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .rules
            .iter()
            .filter(|r| r.profile_id == profile_id && r.caller == caller)
            .cloned()
            .collect())
    }

    async fn save_request(&self, request: &NewRequest) -> ShadowdResult<i64> {
        let mut state = self.state.lock().unwrap();
        let id = Self::assign_id(&mut state);
        state.requests.push((id, request.clone()));
        state.journal.push(WriteEvent::Request { id });
        Ok(id)
    }

    async fn save_parameter(&self, parameter: &NewParameter) -> ShadowdResult<i64> {
        if self.fail_parameter_writes.load(Ordering::SeqCst) {
            return Err(ShadowdError::Internal("parameter insert failed".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        if !state.requests.iter().any(|(id, _)| *id == parameter.request_id) {
            return Err(ShadowdError::Internal(format!(
                "parameter references unknown request {}",
                parameter.request_id
            )));
        }

        let id = Self::assign_id(&mut state);
        state.parameters.push((id, parameter.clone()));
        state.journal.push(WriteEvent::Parameter {
            id,
            request_id: parameter.request_id,
        });
        Ok(id)
    }

    async fn add_blacklist_connector(&self, filter_id: i64, parameter_id: i64) -> ShadowdResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.parameters.iter().any(|(id, _)| *id == parameter_id) {
            return Err(ShadowdError::Internal(format!("unknown parameter {}", parameter_id)));
        }
        state.journal.push(WriteEvent::BlacklistConnector { filter_id, parameter_id });
        Ok(())
    }

    async fn add_whitelist_connector(&self, rule_id: i64, parameter_id: i64) -> ShadowdResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.parameters.iter().any(|(id, _)| *id == parameter_id) {
            return Err(ShadowdError::Internal(format!("unknown parameter {}", parameter_id)));
        }
        state.journal.push(WriteEvent::WhitelistConnector { rule_id, parameter_id });
        Ok(())
    }

    async fn close(&self) -> ShadowdResult<()> {
        Ok(())
    }
}
