//! Tracking which users are currently reachable and where.

use log::warn;
use uuid::Uuid;

use crate::cache::{keys, CacheError, RelationshipCache};

/// Reachability of a user.
///
/// An absent presence record is reported as [PresenceStatus::Offline]: a
/// user the registry has never seen is simply not reachable, that is not an
/// error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceStatus {
    /// The user has an active connection, messages are routed to the
    /// contained address
    Online(String),
    /// The user has no active connection
    Offline,
}

/// Registry of per-user presence records, backed by the cache tier.
///
/// Records are session-bound: they are written on login/connect, cleared on
/// logout/disconnect and guarded by a TTL against dead sessions.
#[derive(Clone)]
pub struct PresenceRegistry {
    cache: RelationshipCache,
}

impl PresenceRegistry {
    /// Construct the registry on top of the given cache handle
    pub fn new(cache: RelationshipCache) -> Self {
        Self { cache }
    }

    /// Mark a user online and record the address messages are routed to
    pub async fn set_online(&self, user: Uuid, address: &str) -> Result<(), CacheError> {
        let ttl = self.cache.presence_ttl();
        self.cache
            .hash_put(&keys::presence(user), "status", "online", ttl)
            .await?;
        self.cache.put_raw(&keys::route(user), address, ttl).await?;
        Ok(())
    }

    /// Mark a user offline and drop their routing entry
    pub async fn set_offline(&self, user: Uuid) -> Result<(), CacheError> {
        let ttl = self.cache.presence_ttl();
        self.cache
            .hash_put(&keys::presence(user), "status", "offline", ttl)
            .await?;
        self.cache.delete(&keys::route(user)).await?;
        Ok(())
    }

    /// Look up the reachability of a user
    pub async fn status(&self, user: Uuid) -> Result<PresenceStatus, CacheError> {
        let status = self.cache.hash_value(&keys::presence(user), "status").await?;
        let route = match status.as_deref() {
            Some("online") => self.cache.raw_value(&keys::route(user)).await?,
            _ => None,
        };
        Ok(resolve_status(status, route))
    }

    /// Like [Self::status], but degrades registry failures to offline for
    /// callers that only display the state
    pub async fn status_or_offline(&self, user: Uuid) -> PresenceStatus {
        match self.status(user).await {
            Ok(status) => status,
            Err(err) => {
                warn!("Presence lookup for {user} failed: {err}");
                PresenceStatus::Offline
            }
        }
    }
}

/// A user is only reachable with an `online` marker *and* a routing entry.
///
/// A dangling `online` without a route (the route expired first) must not
/// count as reachable, there is nowhere to deliver to.
fn resolve_status(status: Option<String>, route: Option<String>) -> PresenceStatus {
    match (status.as_deref(), route) {
        (Some("online"), Some(address)) => PresenceStatus::Online(address),
        _ => PresenceStatus::Offline,
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_status, PresenceStatus};

    #[test]
    fn absent_record_is_offline() {
        assert_eq!(resolve_status(None, None), PresenceStatus::Offline);
    }

    #[test]
    fn explicit_offline_is_offline() {
        assert_eq!(
            resolve_status(Some("offline".to_string()), None),
            PresenceStatus::Offline
        );
    }

    #[test]
    fn garbage_status_is_offline() {
        assert_eq!(
            resolve_status(Some("onlineish".to_string()), Some("node-1".to_string())),
            PresenceStatus::Offline
        );
    }

    #[test]
    fn online_without_route_is_offline() {
        assert_eq!(
            resolve_status(Some("online".to_string()), None),
            PresenceStatus::Offline
        );
    }

    #[test]
    fn online_with_route_is_reachable() {
        assert_eq!(
            resolve_status(Some("online".to_string()), Some("node-1".to_string())),
            PresenceStatus::Online("node-1".to_string())
        );
    }
}
