use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result as ShadowdResult;
use crate::storage::Database;

/// Security policy of one monitored web origin.
///
/// Profiles are read-only projections of the `profiles` table and are
/// never mutated by the daemon, so they are cloned freely between tasks.
#[derive(Clone, PartialEq, Eq)]
pub struct Profile {
    pub server_address: String,
    pub id: i64,
    pub learning: bool,
    pub shared_secret: String,
    /// Aggregate blacklist impact at or above which a parameter is critical.
    pub threshold: i64,
}

// Keeps the shared secret out of logs.
impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("server_address", &self.server_address)
            .field("id", &self.id)
            .field("learning", &self.learning)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Resolves `(server address, profile id)` to a [`Profile`].
#[derive(Clone)]
pub struct ProfileStore {
    database: Arc<dyn Database>,
}

impl ProfileStore {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Single lookup against the persistence layer. The registered address
    /// has to match exactly, a miss rejects the current request.
    pub async fn get_profile(&self, server_address: &str, profile_id: i64) -> ShadowdResult<Profile> {
        let profile = self.database.get_profile(server_address, profile_id).await?;
        debug!("Resolved profile {} for server {}", profile.id, profile.server_address);
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShadowdError;
    use crate::storage::memory::InMemoryDatabase;

    fn profile(address: &str, id: i64) -> Profile {
        Profile {
            server_address: address.to_string(),
            id,
            learning: false,
            shared_secret: "k".to_string(),
            threshold: 5,
        }
    }

    #[tokio::test]
    async fn test_lookup_requires_matching_address() {
        let database = Arc::new(InMemoryDatabase::new());
        database.add_profile(profile("10.0.0.1", 1));
        database.add_profile(profile("10.0.0.2", 2));
        let store = ProfileStore::new(database);

        let found = store.get_profile("10.0.0.1", 1).await.unwrap();
        assert_eq!(found.id, 1);

        // Profile 2 exists, but belongs to another origin.
        let err = store.get_profile("10.0.0.1", 2).await.unwrap_err();
        assert!(matches!(err, ShadowdError::ProfileNotFound { profile_id: 2, .. }));
    }

    #[test]
    fn test_debug_hides_secret() {
        let mut p = profile("10.0.0.1", 1);
        p.shared_secret = "super-secret-key".to_string();
        let rendered = format!("{:?}", p);
        assert!(!rendered.contains("super-secret-key"));
        assert!(rendered.contains("10.0.0.1"));
    }
}
