//! Serialized payloads stored in the relationship cache.
//!
//! Everything in here is reconstructible from the store; the cached copy is
//! only a faster view. The same types double as response items on the API.

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::GroupRole;

/// A pending friend request as seen by its target
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq, Eq)]
pub struct FriendRequestEntry {
    /// Identifier of the request
    pub uuid: Uuid,
    /// The requesting user
    pub from: Uuid,
    /// The user the request is aimed at
    pub to: Uuid,
    #[schema(example = "hi, it's me")]
    /// Message the requester attached
    pub message: String,
    /// When the request was created
    pub created_at: DateTime<Utc>,
}

/// One direction of a friendship
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq, Eq)]
pub struct FriendLinkEntry {
    /// The befriended user
    pub friend: Uuid,
    /// When the link was created
    pub created_at: DateTime<Utc>,
}

/// Group metadata
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq, Eq)]
pub struct GroupEntry {
    /// Identifier of the group
    pub uuid: Uuid,
    #[schema(example = "Herbert's group")]
    /// Name of the group
    pub name: String,
    /// The owner of the group
    pub owner: Uuid,
    /// When the group was created
    pub created_at: DateTime<Utc>,
}

/// A member of a group
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq, Eq)]
pub struct GroupMemberEntry {
    /// The account
    pub member: Uuid,
    /// The role of the member
    pub role: GroupRole,
    /// When the account joined
    pub joined_at: DateTime<Utc>,
}

/// A pending group join request as seen by the group's managers
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq, Eq)]
pub struct GroupJoinRequestEntry {
    /// Identifier of the request
    pub uuid: Uuid,
    /// The applying user
    pub applicant: Uuid,
    /// The group the applicant wants to join
    pub group: Uuid,
    #[schema(example = "let me in please")]
    /// Message the applicant attached
    pub message: String,
    /// When the request was created
    pub created_at: DateTime<Utc>,
}

/// A cached account profile
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq, Eq)]
pub struct AccountEntry {
    /// Identifier of the account
    pub uuid: Uuid,
    #[schema(example = "user123")]
    /// The username
    pub username: String,
    #[schema(example = "Herbert")]
    /// The display name
    pub display_name: String,
    /// Url of the avatar, if set
    pub avatar_url: Option<String>,
}

/// Serialize a cache payload.
///
/// Returns [None] on failure as a payload that can't be serialized can't be
/// cached either; the caller falls back to the store copy it already has.
pub fn encode<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!("Could not serialize cache payload: {err}");
            None
        }
    }
}

/// Deserialize a list of cache payloads, skipping entries that don't parse.
///
/// A corrupt entry is logged and dropped; the remaining entries are still
/// usable for display. Decisions are never made off this data.
pub fn decode_all<T: DeserializeOwned>(payloads: Vec<String>) -> Vec<T> {
    payloads
        .into_iter()
        .filter_map(|payload| match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("Dropping corrupt cache entry: {err}");
                None
            }
        })
        .collect()
}

/// Deserialize a single cache payload
pub fn decode<T: DeserializeOwned>(payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("Dropping corrupt cache entry: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;

    #[test]
    fn corrupt_entries_are_dropped_not_fatal() {
        let entry = FriendLinkEntry {
            friend: Uuid::new_v4(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let payloads = vec![
            encode(&entry).unwrap(),
            "{not json".to_string(),
            encode(&entry).unwrap(),
        ];

        let decoded: Vec<FriendLinkEntry> = decode_all(payloads);
        assert_eq!(decoded, vec![entry.clone(), entry]);
    }

    #[test]
    fn round_trip_preserves_identity() {
        let entry = FriendRequestEntry {
            uuid: Uuid::new_v4(),
            from: Uuid::new_v4(),
            to: Uuid::new_v4(),
            message: "hello".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let decoded: FriendRequestEntry = decode(&encode(&entry).unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }
}
