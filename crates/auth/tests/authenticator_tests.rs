use studycircle_auth::{AuthError, Authenticator};
use studycircle_config::{AuthConfig, DatabaseConfig};
use studycircle_database::initialize_database;

async fn test_authenticator(ttl_seconds: u64) -> Authenticator {
    let config = DatabaseConfig {
        url: "sqlite://:memory:".to_string(),
        max_connections: 1,
    };
    let pool = initialize_database(&config).await.unwrap();
    Authenticator::new(
        pool,
        AuthConfig {
            session_ttl_seconds: ttl_seconds,
        },
    )
}

#[tokio::test]
async fn issued_token_authenticates() {
    let auth = test_authenticator(3600).await;
    let user = auth
        .create_user(Some("ada@example.com"), Some("Ada"), None)
        .await
        .unwrap();

    let session = auth.issue_session(user.id).await.unwrap();
    let (identity, resolved) = auth.authenticate_token(&session.token).await.unwrap();

    assert_eq!(identity.id, user.id);
    assert_eq!(identity.public_id, user.public_id);
    assert_eq!(identity.display_label(), "Ada");
    assert_eq!(resolved.user_id, user.id);
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let auth = test_authenticator(3600).await;
    let err = auth.authenticate_token("no-such-token").await.unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));
}

#[tokio::test]
async fn expired_token_is_rejected_and_deleted() {
    let auth = test_authenticator(0).await;
    let user = auth.create_user(None, Some("Brief"), None).await.unwrap();
    let session = auth.issue_session(user.id).await.unwrap();

    let err = auth.authenticate_token(&session.token).await.unwrap_err();
    assert!(matches!(err, AuthError::SessionExpired));

    // The expired row is gone; the second attempt sees no session at all.
    let err = auth.authenticate_token(&session.token).await.unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));
}

#[tokio::test]
async fn identity_lookup_by_public_id() {
    let auth = test_authenticator(3600).await;
    let user = auth
        .create_user(None, Some("Grace"), Some("https://cdn.example/g.png"))
        .await
        .unwrap();

    let identity = auth
        .fetch_identity_by_public_id(&user.public_id)
        .await
        .unwrap();
    assert_eq!(identity.id, user.id);
    assert_eq!(identity.avatar_url.as_deref(), Some("https://cdn.example/g.png"));

    let err = auth
        .fetch_identity_by_public_id("missing")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound));
}
