use sqlx::SqlitePool;
use studycircle_chats::{
    ChatError, ConversationService, MembershipRepository, MembershipService, MessageService,
};
use studycircle_config::{ChatConfig, DatabaseConfig};
use studycircle_database::{
    initialize_database, GroupPrivacy, MemberRole, MemberStatus,
};

async fn test_pool() -> SqlitePool {
    let config = DatabaseConfig {
        url: "sqlite://:memory:".to_string(),
        max_connections: 1,
    };
    initialize_database(&config).await.unwrap()
}

async fn create_user(pool: &SqlitePool, name: &str) -> i64 {
    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        "INSERT INTO users (public_id, display_name, created_at, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(cuid2::create_id())
    .bind(name)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
    result.last_insert_rowid()
}

fn services(pool: &SqlitePool) -> (ConversationService, MembershipService, MessageService) {
    (
        ConversationService::new(pool.clone()),
        MembershipService::new(pool.clone()),
        MessageService::new(pool.clone(), ChatConfig::default()),
    )
}

// --- conversation lifecycle ---

#[tokio::test]
async fn group_creation_is_atomic_with_conversation_and_admin() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;

    let (group, conversation) = conversations
        .create_group("Linear Algebra", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();

    let owned = conversations
        .get_group_conversation(&group.public_id)
        .await
        .unwrap();
    assert_eq!(owned.id, conversation.id);

    let membership = memberships.get(&group.public_id, alice).await.unwrap().unwrap();
    assert_eq!(membership.role, MemberRole::Admin);
    assert_eq!(membership.status, MemberStatus::Active);
}

#[tokio::test]
async fn direct_conversation_is_unique_per_pair() {
    let pool = test_pool().await;
    let (conversations, _, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    conversations.create_direct(alice, bob).await.unwrap();

    // Argument order does not create a second conversation.
    let err = conversations.create_direct(bob, alice).await.unwrap_err();
    assert!(matches!(err, ChatError::Conflict { .. }));

    let err = conversations.create_direct(alice, alice).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation { .. }));
}

// --- message append & history ---

#[tokio::test]
async fn appended_message_is_immediately_listable() {
    let pool = test_pool().await;
    let (conversations, _, messages) = services(&pool);
    let alice = create_user(&pool, "Alice").await;

    let (_, conversation) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();

    let (_, appended) = messages
        .append(&conversation.public_id, alice, "hello there")
        .await
        .unwrap();

    // Persist-before-broadcast: the message is fetchable the moment
    // append returns.
    let page = messages
        .list_since(&conversation.public_id, alice, None, None)
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].public_id, appended.public_id);
    assert_eq!(page.messages[0].content, "hello there");
    assert!(page.messages[0].read_by.is_empty());
}

#[tokio::test]
async fn append_validates_content() {
    let pool = test_pool().await;
    let (conversations, _, _) = services(&pool);
    let messages = MessageService::new(
        pool.clone(),
        ChatConfig {
            max_message_length: 10,
            ..ChatConfig::default()
        },
    );
    let alice = create_user(&pool, "Alice").await;
    let (_, conversation) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();

    let err = messages
        .append(&conversation.public_id, alice, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation { .. }));

    let err = messages
        .append(&conversation.public_id, alice, "way too long for this")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation { .. }));

    let err = messages.append("no-such-convo", alice, "hi").await.unwrap_err();
    assert!(matches!(err, ChatError::ConversationNotFound { .. }));
}

#[tokio::test]
async fn non_members_cannot_send_and_membership_is_rechecked() {
    let pool = test_pool().await;
    let (conversations, memberships, messages) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, conversation) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();

    // Bob is not a member yet.
    let err = messages
        .append(&conversation.public_id, bob, "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::PermissionDenied { .. }));

    // Bob joins and can send.
    memberships.request_join(&group.public_id, bob).await.unwrap();
    messages
        .append(&conversation.public_id, bob, "hi")
        .await
        .unwrap();

    // Bob is removed; the very next send is denied even though an earlier
    // one succeeded on the same "connection".
    memberships.remove(&group.public_id, alice, bob).await.unwrap();
    let err = messages
        .append(&conversation.public_id, bob, "still here?")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::PermissionDenied { .. }));
}

#[tokio::test]
async fn cursor_pagination_has_no_gaps_or_duplicates() {
    let pool = test_pool().await;
    let (conversations, _, messages) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let (_, conversation) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();

    for i in 0..5 {
        messages
            .append(&conversation.public_id, alice, &format!("message {i}"))
            .await
            .unwrap();
    }

    let first = messages
        .list_since(&conversation.public_id, alice, None, Some(2))
        .await
        .unwrap();
    assert_eq!(first.messages.len(), 2);

    // A concurrent append between pages must not disturb the scan.
    messages
        .append(&conversation.public_id, alice, "message 5")
        .await
        .unwrap();

    let mut seen: Vec<String> = first.messages.iter().map(|m| m.content.clone()).collect();
    let mut cursor = first.next_cursor;
    while let Some(current) = cursor {
        let page = messages
            .list_since(&conversation.public_id, alice, Some(&current), Some(2))
            .await
            .unwrap();
        if page.messages.is_empty() {
            break;
        }
        seen.extend(page.messages.iter().map(|m| m.content.clone()));
        cursor = page.next_cursor;
    }

    let expected: Vec<String> = (0..6).map(|i| format!("message {i}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn reconnect_with_last_cursor_returns_exactly_missed_messages() {
    let pool = test_pool().await;
    let (conversations, memberships, messages) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, conversation) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    memberships.request_join(&group.public_id, bob).await.unwrap();

    messages.append(&conversation.public_id, alice, "seen").await.unwrap();
    let seen_page = messages
        .list_since(&conversation.public_id, bob, None, None)
        .await
        .unwrap();
    let last_cursor = seen_page.next_cursor.unwrap();

    // Messages sent while Bob is "disconnected".
    messages.append(&conversation.public_id, alice, "missed 1").await.unwrap();
    messages.append(&conversation.public_id, alice, "missed 2").await.unwrap();

    let backfill = messages
        .list_since(&conversation.public_id, bob, Some(&last_cursor), None)
        .await
        .unwrap();
    let contents: Vec<&str> = backfill.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["missed 1", "missed 2"]);
}

// --- read receipts ---

#[tokio::test]
async fn mark_read_is_idempotent() {
    let pool = test_pool().await;
    let (conversations, memberships, messages) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, conversation) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    memberships.request_join(&group.public_id, bob).await.unwrap();

    let (_, m1) = messages.append(&conversation.public_id, alice, "one").await.unwrap();
    let (_, m2) = messages.append(&conversation.public_id, alice, "two").await.unwrap();

    let ids = vec![m1.public_id.clone(), m2.public_id.clone()];
    let first = messages
        .mark_read(&conversation.public_id, bob, &ids)
        .await
        .unwrap();
    assert_eq!(first.updated, 2);

    let second = messages
        .mark_read(&conversation.public_id, bob, &ids)
        .await
        .unwrap();
    assert_eq!(second.updated, 0);

    // read_by reflects exactly one mark per message.
    let page = messages
        .list_since(&conversation.public_id, alice, None, None)
        .await
        .unwrap();
    for message in &page.messages {
        assert_eq!(message.read_by.len(), 1);
    }
}

#[tokio::test]
async fn mark_read_silently_ignores_unknown_and_foreign_ids() {
    let pool = test_pool().await;
    let (conversations, memberships, messages) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, conversation) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    memberships.request_join(&group.public_id, bob).await.unwrap();

    let (_, other_conversation) = conversations
        .create_group("Other", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    let (_, foreign) = messages
        .append(&other_conversation.public_id, alice, "elsewhere")
        .await
        .unwrap();

    let (_, m1) = messages.append(&conversation.public_id, alice, "one").await.unwrap();
    let (_, m2) = messages.append(&conversation.public_id, alice, "two").await.unwrap();

    let outcome = messages
        .mark_read(
            &conversation.public_id,
            bob,
            &[
                m1.public_id.clone(),
                m2.public_id.clone(),
                foreign.public_id.clone(),
                "does-not-exist".to_string(),
            ],
        )
        .await
        .unwrap();

    assert_eq!(outcome.updated, 2);
    assert!(outcome.message_ids.contains(&m1.public_id));
    assert!(outcome.message_ids.contains(&m2.public_id));
    assert!(!outcome.message_ids.contains(&foreign.public_id));
}

#[tokio::test]
async fn own_messages_are_not_marked() {
    let pool = test_pool().await;
    let (conversations, _, messages) = services(&pool);
    let alice = create_user(&pool, "Alice").await;

    let (_, conversation) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    let (_, own) = messages.append(&conversation.public_id, alice, "mine").await.unwrap();

    let outcome = messages
        .mark_read(&conversation.public_id, alice, &[own.public_id])
        .await
        .unwrap();
    assert_eq!(outcome.updated, 0);
    assert!(outcome.message_ids.is_empty());
}

// --- membership state machine ---

#[tokio::test]
async fn private_group_join_requires_approval() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, _) = conversations
        .create_group("Private", GroupPrivacy::Private, None, alice)
        .await
        .unwrap();

    let membership = memberships.request_join(&group.public_id, bob).await.unwrap();
    assert_eq!(membership.status, MemberStatus::Pending);

    let accepted = memberships
        .accept_request(&group.public_id, alice, bob)
        .await
        .unwrap();
    assert_eq!(accepted.status, MemberStatus::Active);
}

#[tokio::test]
async fn rejected_request_becomes_removed() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, _) = conversations
        .create_group("Private", GroupPrivacy::Private, None, alice)
        .await
        .unwrap();

    memberships.request_join(&group.public_id, bob).await.unwrap();
    memberships
        .reject_request(&group.public_id, alice, bob)
        .await
        .unwrap();

    let membership = memberships.get(&group.public_id, bob).await.unwrap().unwrap();
    assert_eq!(membership.status, MemberStatus::Removed);
    assert!(membership.left_at.is_some());
}

#[tokio::test]
async fn invite_only_group_requires_an_invite() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, _) = conversations
        .create_group("Secret", GroupPrivacy::InviteOnly, None, alice)
        .await
        .unwrap();

    let err = memberships.request_join(&group.public_id, bob).await.unwrap_err();
    assert!(matches!(err, ChatError::PermissionDenied { .. }));

    memberships.invite(&group.public_id, alice, bob).await.unwrap();
    let membership = memberships.request_join(&group.public_id, bob).await.unwrap();
    assert_eq!(membership.status, MemberStatus::Active);
}

#[tokio::test]
async fn plain_members_cannot_invite() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;
    let carol = create_user(&pool, "Carol").await;

    let (group, _) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    memberships.request_join(&group.public_id, bob).await.unwrap();

    // Bob is a plain member, not a moderator or admin.
    let err = memberships
        .invite(&group.public_id, bob, carol)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::PermissionDenied { .. }));

    // The membership set is unchanged: Carol has no record.
    assert!(memberships.get(&group.public_id, carol).await.unwrap().is_none());

    // A promoted moderator can invite.
    memberships
        .set_role(&group.public_id, alice, bob, MemberRole::Moderator)
        .await
        .unwrap();
    let invited = memberships.invite(&group.public_id, bob, carol).await.unwrap();
    assert_eq!(invited.status, MemberStatus::Invited);
    assert_eq!(invited.invited_by, Some(bob));
}

#[tokio::test]
async fn invite_conflicts_with_existing_member() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, _) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    memberships.request_join(&group.public_id, bob).await.unwrap();

    let err = memberships.invite(&group.public_id, alice, bob).await.unwrap_err();
    assert!(matches!(err, ChatError::Conflict { .. }));
}

#[tokio::test]
async fn declined_invite_becomes_removed() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, _) = conversations
        .create_group("Study", GroupPrivacy::InviteOnly, None, alice)
        .await
        .unwrap();
    memberships.invite(&group.public_id, alice, bob).await.unwrap();
    memberships.decline_invite(&group.public_id, bob).await.unwrap();

    let membership = memberships.get(&group.public_id, bob).await.unwrap().unwrap();
    assert_eq!(membership.status, MemberStatus::Removed);
}

#[tokio::test]
async fn full_group_rejects_joins() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, _) = conversations
        .create_group("Tiny", GroupPrivacy::Public, Some(1), alice)
        .await
        .unwrap();

    let err = memberships.request_join(&group.public_id, bob).await.unwrap_err();
    assert!(matches!(err, ChatError::Conflict { .. }));
}

#[tokio::test]
async fn member_can_rejoin_after_leaving() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, _) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    memberships.request_join(&group.public_id, bob).await.unwrap();
    memberships.leave(&group.public_id, bob).await.unwrap();

    let membership = memberships.get(&group.public_id, bob).await.unwrap().unwrap();
    assert_eq!(membership.status, MemberStatus::Left);

    let revived = memberships.request_join(&group.public_id, bob).await.unwrap();
    assert_eq!(revived.status, MemberStatus::Active);
    assert!(revived.left_at.is_none());
}

// --- last-admin invariant ---

#[tokio::test]
async fn last_admin_cannot_leave() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;

    let (group, _) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();

    let err = memberships.leave(&group.public_id, alice).await.unwrap_err();
    assert!(matches!(err, ChatError::InvariantViolation { .. }));

    // No partial effect: Alice is still the active admin.
    let membership = memberships.get(&group.public_id, alice).await.unwrap().unwrap();
    assert_eq!(membership.status, MemberStatus::Active);
    assert_eq!(membership.role, MemberRole::Admin);
}

#[tokio::test]
async fn last_admin_cannot_be_demoted_or_removed() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;

    let (group, _) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();

    let err = memberships
        .set_role(&group.public_id, alice, alice, MemberRole::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvariantViolation { .. }));

    let err = memberships.remove(&group.public_id, alice, alice).await.unwrap_err();
    assert!(matches!(err, ChatError::InvariantViolation { .. }));

    // The invariant holds after every failed attempt.
    let repo = MembershipRepository::new(pool.clone());
    assert_eq!(repo.active_admin_count(group.id).await.unwrap(), 1);
}

#[tokio::test]
async fn demotion_succeeds_once_a_second_admin_exists() {
    let pool = test_pool().await;
    let (conversations, memberships, _) = services(&pool);
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let (group, _) = conversations
        .create_group("Study", GroupPrivacy::Public, None, alice)
        .await
        .unwrap();
    memberships.request_join(&group.public_id, bob).await.unwrap();
    memberships
        .set_role(&group.public_id, alice, bob, MemberRole::Admin)
        .await
        .unwrap();

    // Two admins: demoting one passes the guard.
    let demoted = memberships
        .set_role(&group.public_id, alice, alice, MemberRole::Member)
        .await
        .unwrap();
    assert_eq!(demoted.role, MemberRole::Member);

    // Bob is now the sole admin; demoting him fails again.
    let err = memberships
        .set_role(&group.public_id, bob, bob, MemberRole::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvariantViolation { .. }));
}
