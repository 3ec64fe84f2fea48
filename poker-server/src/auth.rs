use poker_collab::PokerContext;
use poker_core::UserId;

/// Resolves the `token` query parameter of a `GET /ws/room/{roomId}` request
/// to an identity.
///
/// An empty token is the anonymous sentinel and always resolves to `None`;
/// whether an anonymous caller may actually join a given room is decided
/// later against that room's `allowAnonymous` config and privacy mode. A
/// non-empty token that fails validation is a hard `UNAUTHENTICATED`.
pub enum TokenOutcome {
    Anonymous,
    User(UserId),
    Invalid,
}

pub async fn resolve_token(context: &PokerContext, token: &str) -> TokenOutcome {
    if token.is_empty() {
        return TokenOutcome::Anonymous;
    }

    match context.token_validator.validate(token).await {
        Some(user_id) => TokenOutcome::User(user_id),
        None => TokenOutcome::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use poker_collab::db::InMemoryAuthorityStore;
    use poker_collab::{AllFeaturesEnabled, AllowAllPermissions, InMemoryBlobStore, InMemoryTokenValidator};
    use poker_impls::InMemoryBus;

    use super::*;

    fn context_with(validator: InMemoryTokenValidator) -> PokerContext {
        PokerContext {
            store: Arc::new(InMemoryAuthorityStore::new()),
            bus: Arc::new(InMemoryBus::new()),
            token_validator: Arc::new(validator),
            blob_store: Arc::new(InMemoryBlobStore::new()),
            permissions: Arc::new(AllowAllPermissions),
            feature_gate: Arc::new(AllFeaturesEnabled),
        }
    }

    #[tokio::test]
    async fn empty_token_is_anonymous() {
        let context = context_with(InMemoryTokenValidator::new());
        assert!(matches!(resolve_token(&context, "").await, TokenOutcome::Anonymous));
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let context = context_with(InMemoryTokenValidator::new());
        assert!(matches!(resolve_token(&context, "nope").await, TokenOutcome::Invalid));
    }

    #[tokio::test]
    async fn registered_token_resolves_to_user() {
        let validator = InMemoryTokenValidator::new();
        let user_id = UserId::new();
        validator.register("abc", user_id);

        let context = context_with(validator);
        match resolve_token(&context, "abc").await {
            TokenOutcome::User(resolved) => assert_eq!(resolved, user_id),
            _ => panic!("expected a resolved user"),
        }
    }
}
