// SQL backend - one shared connection, locked per query

use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Connection, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BlacklistFilter, Database, NewParameter, NewRequest, WhitelistRule};
use crate::config::{DatabaseConfig, DatabaseDriver};
use crate::error::{Result as ShadowdResult, ShadowdError};
use crate::profile::Profile;

/// Database backed by a single connection for the whole daemon.
///
/// The mutex is held for exactly one query. Concurrent sessions may
/// therefore interleave their audit rows, but every row references an id
/// that its own session already received.
pub struct SqlDatabase {
    driver: DatabaseDriver,
    connection: Mutex<Option<AnyConnection>>,
}

impl SqlDatabase {
    /// Open the connection. Failure here is fatal at startup.
    pub async fn connect(config: &DatabaseConfig) -> ShadowdResult<Self> {
        sqlx::any::install_default_drivers();

        let mut connection = AnyConnection::connect(&config.url()).await?;

        match config.driver {
            DatabaseDriver::Pgsql => {
                let statement = format!("SET client_encoding TO '{}'", config.encoding);
                sqlx::query(&statement).execute(&mut connection).await?;
            }
            DatabaseDriver::Mysql => {
                let statement = format!("SET NAMES '{}'", mysql_charset(&config.encoding));
                sqlx::query(&statement).execute(&mut connection).await?;
            }
            DatabaseDriver::Sqlite => {}
        }

        info!("Connected to {:?} database {}", config.driver, config.name);

        Ok(Self {
            driver: config.driver,
            connection: Mutex::new(Some(connection)),
        })
    }

    /// Rewrite `?` placeholders to the numbered form postgres expects.
    fn prepare(&self, sql: &str) -> String {
        if self.driver != DatabaseDriver::Pgsql {
            return sql.to_string();
        }

        let mut out = String::with_capacity(sql.len() + 8);
        let mut index = 0;
        for c in sql.chars() {
            if c == '?' {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            } else {
                out.push(c);
            }
        }
        out
    }

    fn closed() -> ShadowdError {
        ShadowdError::Internal("database connection is closed".to_string())
    }

    /// Run an insert and return the id of the new row.
    async fn insert(&self, sql: &str, binds: Vec<Bind<'_>>) -> ShadowdResult<i64> {
        let returning = self.driver != DatabaseDriver::Mysql;
        let statement = if returning {
            self.prepare(&format!("{} RETURNING id", sql))
        } else {
            self.prepare(sql)
        };

        let mut query = sqlx::query(&statement);
        for bind in binds {
            query = match bind {
                Bind::Int(v) => query.bind(v),
                Bind::Text(v) => query.bind(v),
            };
        }

        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or_else(Self::closed)?;

        if returning {
            let row = query.fetch_one(&mut *connection).await?;
            Ok(row.try_get::<i64, _>("id")?)
        } else {
            let result = query.execute(&mut *connection).await?;
            result
                .last_insert_id()
                .ok_or_else(|| ShadowdError::Internal("insert did not return an id".to_string()))
        }
    }

    async fn execute(&self, sql: &str, binds: Vec<Bind<'_>>) -> ShadowdResult<()> {
        let statement = self.prepare(sql);
        let mut query = sqlx::query(&statement);
        for bind in binds {
            query = match bind {
                Bind::Int(v) => query.bind(v),
                Bind::Text(v) => query.bind(v),
            };
        }

        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or_else(Self::closed)?;
        query.execute(&mut *connection).await?;
        Ok(())
    }

    async fn fetch_all(&self, sql: &str, binds: Vec<Bind<'_>>) -> ShadowdResult<Vec<AnyRow>> {
        let statement = self.prepare(sql);
        let mut query = sqlx::query(&statement);
        for bind in binds {
            query = match bind {
                Bind::Int(v) => query.bind(v),
                Bind::Text(v) => query.bind(v),
            };
        }

        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or_else(Self::closed)?;
        Ok(query.fetch_all(&mut *connection).await?)
    }

    #[cfg(test)]
    pub async fn apply_schema(&self, schema: &str) -> ShadowdResult<()> {
        for statement in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.execute(statement, Vec::new()).await?;
        }
        Ok(())
    }
}

enum Bind<'a> {
    Int(i64),
    Text(&'a str),
}

fn mysql_charset(encoding: &str) -> String {
    encoding.replace('-', "").to_lowercase()
}

fn flag(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

#[async_trait]
impl Database for SqlDatabase {
    async fn get_profile(&self, server_address: &str, profile_id: i64) -> ShadowdResult<Profile> {
        let rows = self
            .fetch_all(
                "SELECT id, server_address, learning, shared_secret, threshold \
                 FROM profiles WHERE server_address = ? AND id = ?",
                vec![Bind::Text(server_address), Bind::Int(profile_id)],
            )
            .await?;

        let row = rows.into_iter().next().ok_or_else(|| ShadowdError::ProfileNotFound {
            server_address: server_address.to_string(),
            profile_id,
        })?;

        Ok(Profile {
            server_address: row.try_get("server_address")?,
            id: row.try_get("id")?,
            learning: row.try_get::<i64, _>("learning")? != 0,
            shared_secret: row.try_get("shared_secret")?,
            threshold: row.try_get("threshold")?,
        })
    }

    async fn get_blacklist_filters(&self) -> ShadowdResult<Vec<BlacklistFilter>> {
        let rows = self
            .fetch_all("SELECT id, rule, impact FROM blacklist_filters", Vec::new())
            .await?;

        let filters = rows
            .iter()
            .map(|row| {
                Ok(BlacklistFilter {
                    id: row.try_get("id")?,
                    rule: row.try_get("rule")?,
                    impact: row.try_get("impact")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        debug!("Loaded {} blacklist filters", filters.len());
        Ok(filters)
    }

    async fn get_whitelist_rules(&self, profile_id: i64, caller: &str) -> ShadowdResult<Vec<WhitelistRule>> {
        let rows = self
            .fetch_all(
                "SELECT id, profile_id, caller, path FROM whitelist_rules \
                 WHERE profile_id = ? AND caller = ?",
                vec![Bind::Int(profile_id), Bind::Text(caller)],
            )
            .await?;

        let rules = rows
            .iter()
            .map(|row| {
                Ok(WhitelistRule {
                    id: row.try_get("id")?,
                    profile_id: row.try_get("profile_id")?,
                    caller: row.try_get("caller")?,
                    path: row.try_get("path")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(rules)
    }

    async fn save_request(&self, request: &NewRequest) -> ShadowdResult<i64> {
        self.insert(
            "INSERT INTO requests (profile_id, caller, learning, client_address) VALUES (?, ?, ?, ?)",
            vec![
                Bind::Int(request.profile_id),
                Bind::Text(&request.caller),
                Bind::Int(flag(request.learning)),
                Bind::Text(&request.client_address),
            ],
        )
        .await
    }

    async fn save_parameter(&self, parameter: &NewParameter) -> ShadowdResult<i64> {
        self.insert(
            "INSERT INTO parameters (request_id, path, value, total_rules, critical_impact, threat) \
             VALUES (?, ?, ?, ?, ?, ?)",
            vec![
                Bind::Int(parameter.request_id),
                Bind::Text(&parameter.path),
                Bind::Text(&parameter.value),
                Bind::Int(parameter.total_rules),
                Bind::Int(flag(parameter.critical_impact)),
                Bind::Int(flag(parameter.threat)),
            ],
        )
        .await
    }

    async fn add_blacklist_connector(&self, filter_id: i64, parameter_id: i64) -> ShadowdResult<()> {
        self.execute(
            "INSERT INTO blacklist_parameter_connectors (filter_id, parameter_id) VALUES (?, ?)",
            vec![Bind::Int(filter_id), Bind::Int(parameter_id)],
        )
        .await
    }

    async fn add_whitelist_connector(&self, rule_id: i64, parameter_id: i64) -> ShadowdResult<()> {
        self.execute(
            "INSERT INTO whitelist_parameter_connectors (rule_id, parameter_id) VALUES (?, ?)",
            vec![Bind::Int(rule_id), Bind::Int(parameter_id)],
        )
        .await
    }

    async fn close(&self) -> ShadowdResult<()> {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.close().await?;
            info!("Database connection closed");
        }
        Ok(())
    }
}
