use async_trait::async_trait;
use dashmap::DashMap;
use poker_core::{Room, RoomPrivacy, UserId};

/// Verifies a bearer token presented at `room.join.v1` time and resolves it
/// to an authenticated user, if any. Production-grade OAuth/session
/// validation lives outside this crate; only a trait boundary is defined
/// here.
#[async_trait]
pub trait TokenValidator: Send + Sync + 'static {
    async fn validate(&self, token: &str) -> Option<UserId>;
}

/// Uploads rendered export artifacts and hands back a retrievable URL.
/// Production storage (S3, GCS, ...) lives outside this crate.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, String>;
}

/// Resolves whether a user may perform an action in a room, beyond the
/// room-local host/voter/observer role (org membership, plan limits, ...).
pub trait PermissionsResolver: Send + Sync + 'static {
    fn may_create_room(&self, user_id: Option<UserId>) -> bool;

    /// Whether `user_id` may join `room` given its privacy mode. Anonymous
    /// callers (`user_id = None`) are only ever eligible for public rooms.
    fn may_join_room(&self, user_id: Option<UserId>, room: &Room) -> bool;
}

/// Gates optional behavior (e.g. PDF export, timer rounds) behind a plan or
/// rollout flag.
pub trait FeatureGate: Send + Sync + 'static {
    fn pdf_export_enabled(&self, user_id: Option<UserId>) -> bool;
}

/// An in-memory token validator for tests: tokens are pre-registered and map
/// directly to a user id.
#[derive(Default)]
pub struct InMemoryTokenValidator {
    tokens: DashMap<String, UserId>,
}

impl InMemoryTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, user_id: UserId) {
        self.tokens.insert(token.into(), user_id);
    }
}

#[async_trait]
impl TokenValidator for InMemoryTokenValidator {
    async fn validate(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).map(|entry| *entry.value())
    }
}

/// An in-memory blob store for tests: bytes are kept in a map and handed
/// back behind a fake `memory://` URL.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.get(key).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, _content_type: &str, bytes: Vec<u8>) -> Result<String, String> {
        self.blobs.insert(key.to_string(), bytes);
        Ok(format!("memory://{key}"))
    }
}

/// Allows everyone to create rooms: the test/default permissions resolver.
pub struct AllowAllPermissions;

impl PermissionsResolver for AllowAllPermissions {
    fn may_create_room(&self, _user_id: Option<UserId>) -> bool {
        true
    }

    fn may_join_room(&self, _user_id: Option<UserId>, _room: &Room) -> bool {
        true
    }
}

/// Enforces only the privacy rule itself: public rooms admit anyone,
/// invite-only and org-restricted rooms require an authenticated user.
/// Org membership is not modeled at this layer (see spec's collaborator
/// boundary) so any authenticated user passes an org-restricted check here.
pub struct PrivacyOnlyPermissions;

impl PermissionsResolver for PrivacyOnlyPermissions {
    fn may_create_room(&self, _user_id: Option<UserId>) -> bool {
        true
    }

    fn may_join_room(&self, user_id: Option<UserId>, room: &Room) -> bool {
        match room.privacy {
            RoomPrivacy::Public => true,
            RoomPrivacy::InviteOnly | RoomPrivacy::OrgRestricted => user_id.is_some(),
        }
    }
}

/// Enables every feature: the test/default feature gate.
pub struct AllFeaturesEnabled;

impl FeatureGate for AllFeaturesEnabled {
    fn pdf_export_enabled(&self, _user_id: Option<UserId>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_token_validator_resolves_registered_tokens() {
        let validator = InMemoryTokenValidator::new();
        let user_id = UserId::new();
        validator.register("abc123", user_id);

        assert_eq!(validator.validate("abc123").await, Some(user_id));
        assert_eq!(validator.validate("nope").await, None);
    }

    #[tokio::test]
    async fn in_memory_blob_store_round_trips_bytes() {
        let store = InMemoryBlobStore::new();
        let url = store.put("reports/x.csv", "text/csv", b"a,b\n1,2".to_vec()).await.unwrap();

        assert_eq!(url, "memory://reports/x.csv");
        assert_eq!(store.get("reports/x.csv").unwrap(), b"a,b\n1,2");
    }

    fn sample_room(privacy: RoomPrivacy) -> Room {
        Room {
            id: poker_core::RoomId::generate(),
            title: "Sprint planning".to_string(),
            privacy,
            owner_user_id: None,
            org_id: None,
            config: Default::default(),
            created_at: chrono::Utc::now(),
            last_active_at: chrono::Utc::now(),
            soft_deleted_at: None,
        }
    }

    #[test]
    fn privacy_only_permissions_admits_anyone_to_public_rooms() {
        let resolver = PrivacyOnlyPermissions;
        let room = sample_room(RoomPrivacy::Public);

        assert!(resolver.may_join_room(None, &room));
        assert!(resolver.may_join_room(Some(UserId::new()), &room));
    }

    #[test]
    fn privacy_only_permissions_requires_auth_for_invite_only_rooms() {
        let resolver = PrivacyOnlyPermissions;
        let room = sample_room(RoomPrivacy::InviteOnly);

        assert!(!resolver.may_join_room(None, &room));
        assert!(resolver.may_join_room(Some(UserId::new()), &room));
    }
}
