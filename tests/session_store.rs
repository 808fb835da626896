#![allow(clippy::unwrap_used, clippy::expect_used)]

use maxirent::auth::{
    IdentityService, MemorySlot, NewUser, PersistedSession, ProfileUpdate, Role, SessionError,
    SessionSlot, SessionStore, SessionTokens,
};
use maxirent::backend::MemoryBackend;
use std::{sync::Arc, time::Duration};

struct Harness {
    backend: MemoryBackend,
    slot: Arc<MemorySlot>,
    store: SessionStore,
}

fn harness_with(backend: MemoryBackend, tokens: Option<SessionTokens>, slot: MemorySlot) -> Harness {
    let slot = Arc::new(slot);
    let store = SessionStore::new(
        backend.connect(tokens),
        Arc::new(backend.clone()),
        slot.clone(),
    );
    Harness {
        backend,
        slot,
        store,
    }
}

fn demo() -> Harness {
    let backend = MemoryBackend::new();
    backend.seed_demo();
    harness_with(backend, None, MemorySlot::default())
}

fn new_user(username: &str, role: Role) -> NewUser {
    NewUser {
        email: format!("{username}@maxirent.com"),
        password: "nuevo123".to_string(),
        username: username.to_string(),
        full_name: "Pedro Ramírez".to_string(),
        phone: None,
        role,
        employee_id: Some("EMP-042".to_string()),
        specialization: Some("Frenos".to_string()),
    }
}

#[tokio::test]
async fn sign_in_with_email_establishes_session() {
    let h = demo();
    let identity = h
        .store
        .sign_in("admin@maxirent.com", "admin123")
        .await
        .expect("sign in");

    assert_eq!(identity.role, Role::Admin);
    assert_eq!(identity.email.as_deref(), Some("admin@maxirent.com"));

    let snapshot = h.store.snapshot();
    assert!(snapshot.is_authenticated());
    assert!(!snapshot.is_loading());
    assert!(h.store.tokens().is_some());

    let persisted = h.slot.load().expect("slot written");
    assert!(persisted.is_authenticated);
    assert_eq!(persisted.user.map(|user| user.id), Some(identity.id));
}

#[tokio::test]
async fn username_sign_in_retries_with_registered_email() {
    let h = demo();
    let identity = h
        .store
        .sign_in("jefetaller", "jefe123")
        .await
        .expect("username sign in");
    assert_eq!(identity.username, "jefetaller");
    assert_eq!(identity.role, Role::JefeTaller);
    assert_eq!(identity.email.as_deref(), Some("jefetaller@maxirent.com"));
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() {
    let h = demo();
    for identifier in ["admin@maxirent.com", "admin", "nobody"] {
        let result = h.store.sign_in(identifier, "wrong").await;
        assert!(matches!(result, Err(SessionError::InvalidCredentials)));
    }
    let snapshot = h.store.snapshot();
    assert!(!snapshot.is_authenticated());
    assert!(!snapshot.is_loading());
}

#[tokio::test]
async fn account_without_profile_cannot_sign_in() {
    let h = demo();
    h.backend
        .add_account("sinperfil@maxirent.com", None, "perfil123");

    let result = h.store.sign_in("sinperfil@maxirent.com", "perfil123").await;
    assert!(matches!(result, Err(SessionError::ProfileNotFound)));
    assert!(!h.store.snapshot().is_authenticated());
    assert!(h.store.tokens().is_none(), "identity session must be dropped");
    assert!(h.slot.load().is_none());
}

#[tokio::test]
async fn deactivated_profile_cannot_sign_in() {
    let h = demo();
    let id = h
        .backend
        .add_user("baja", "baja@maxirent.com", None, "baja123", Role::Mecanico);
    h.backend.set_active(id, false);

    let result = h.store.sign_in("baja@maxirent.com", "baja123").await;
    assert!(matches!(result, Err(SessionError::AccountDisabled)));
    assert!(!h.store.snapshot().is_authenticated());
}

#[tokio::test]
async fn phone_sign_in_round_trip() {
    let h = demo();
    h.store
        .sign_in_with_phone("5551000005")
        .await
        .expect("code sent");
    assert!(!h.store.snapshot().is_authenticated());
    assert!(!h.store.snapshot().is_loading());

    let code = h.backend.last_otp("+525551000005").expect("code issued");
    let identity = h
        .store
        .verify_otp("555 100 0005", &code)
        .await
        .expect("code accepted");
    assert_eq!(identity.role, Role::Mecanico);
    assert!(h.store.snapshot().is_authenticated());
}

#[tokio::test]
async fn wrong_otp_is_rejected() {
    let h = demo();
    h.store.sign_in_with_phone("+525551000004").await.expect("code sent");
    let code = h.backend.last_otp("+525551000004").expect("code issued");
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let result = h.store.verify_otp("+525551000004", wrong).await;
    assert!(matches!(result, Err(SessionError::InvalidOtp)));
    assert!(!h.store.snapshot().is_authenticated());
}

#[tokio::test]
async fn otp_for_phone_without_profile_fails() {
    let h = demo();
    h.backend
        .add_account("solotel@maxirent.com", Some("+525559990000"), "tel12345");

    h.store.sign_in_with_phone("5559990000").await.expect("code sent");
    let code = h.backend.last_otp("+525559990000").expect("code issued");
    let result = h.store.verify_otp("5559990000", &code).await;
    assert!(matches!(result, Err(SessionError::ProfileNotFound)));
    assert!(!h.store.snapshot().is_authenticated());
}

#[tokio::test]
async fn sign_out_clears_session_even_when_remote_call_fails() {
    let h = demo();
    h.store
        .sign_in("almacenista", "alma123")
        .await
        .expect("sign in");
    h.backend.set_sign_out_fails(true);

    h.store.sign_out().await;

    let snapshot = h.store.snapshot();
    assert!(!snapshot.is_authenticated());
    assert!(!snapshot.is_loading());
    assert!(h.slot.load().is_none());
}

#[tokio::test]
async fn initialize_resumes_existing_session() {
    let backend = MemoryBackend::new();
    let id = backend.add_user(
        "recepcion2",
        "recepcion2@maxirent.com",
        None,
        "recep456",
        Role::Recepcionista,
    );
    let tokens = backend.issue_session(id);
    let h = harness_with(backend, Some(tokens), MemorySlot::default());

    let user = h.store.initialize().await.expect("initialized");
    assert_eq!(user.map(|user| user.id), Some(id));
    assert!(h.store.has_role(&[Role::Recepcionista, Role::Admin]));
    assert!(!h.store.has_role(&[Role::Mecanico]));
    assert!(!h.store.snapshot().is_loading());
}

#[tokio::test]
async fn initialize_discards_unconfirmed_persisted_identity() {
    let backend = MemoryBackend::new();
    let id = backend.add_user("fantasma", "fantasma@maxirent.com", None, "fant123", Role::Admin);
    let stale = backend.profile(id).expect("profile");
    let h = harness_with(
        backend,
        None,
        MemorySlot::with(PersistedSession::new(Some(stale))),
    );

    assert!(h.store.snapshot().is_authenticated(), "restored from slot");

    let user = h.store.initialize().await.expect("initialized");
    assert!(user.is_none());
    assert!(!h.store.snapshot().is_authenticated());
    assert!(h.slot.load().is_none());
}

#[tokio::test]
async fn expired_access_token_is_renewed_on_initialize() {
    let backend = MemoryBackend::new();
    let id = backend.add_user("mecanico2", "mecanico2@maxirent.com", None, "meca456", Role::Mecanico);
    let tokens = backend.issue_session(id);
    backend.expire_access_tokens();
    let h = harness_with(backend, Some(tokens.clone()), MemorySlot::default());

    let user = h.store.initialize().await.expect("initialized");
    assert_eq!(user.map(|user| user.id), Some(id));
    let renewed = h.store.tokens().expect("renewed tokens");
    assert_ne!(renewed.access_token, tokens.access_token);
    assert_ne!(renewed.refresh_token, tokens.refresh_token);
}

#[tokio::test]
async fn stale_operation_does_not_overwrite_newer_result() {
    let h = demo();
    h.backend
        .set_current_user_delay(Some(Duration::from_millis(100)));

    let (stale, fresh) = tokio::join!(
        h.store.refresh_user(),
        h.store.sign_in("recepcionista", "recep123"),
    );

    assert!(matches!(stale, Err(SessionError::Superseded)));
    let fresh = fresh.expect("sign in");
    let snapshot = h.store.snapshot();
    assert_eq!(snapshot.user().map(|user| user.id), Some(fresh.id));
    assert!(!snapshot.is_loading());
}

#[tokio::test]
async fn side_effect_operations_do_not_discard_initialize() {
    let backend = MemoryBackend::new();
    backend.seed_demo();
    let id = backend.add_user("fantasma", "fantasma@maxirent.com", None, "fant123", Role::Admin);
    let restored = backend.profile(id).expect("profile");
    backend.set_current_user_delay(Some(Duration::from_millis(100)));
    let h = harness_with(
        backend,
        None,
        MemorySlot::with(PersistedSession::new(Some(restored))),
    );

    let (initialized, otp) = tokio::join!(
        h.store.initialize(),
        h.store.sign_in_with_phone("5551000001"),
    );

    assert_eq!(initialized, Ok(None));
    otp.expect("code sent");
    let snapshot = h.store.snapshot();
    assert!(!snapshot.is_authenticated());
    assert!(!snapshot.is_loading());
    assert!(!h.store.has_permission("users.create"));
    assert!(h.store.tokens().is_none());
    assert!(h.slot.load().is_none());
}

#[tokio::test]
async fn reset_request_does_not_discard_refresh() {
    let h = demo();
    h.store
        .sign_in("jefetaller", "jefe123")
        .await
        .expect("sign in");
    let id = h.store.snapshot().user().map(|user| user.id).expect("signed in");
    h.backend.set_active(id, false);
    h.backend
        .set_current_user_delay(Some(Duration::from_millis(100)));

    let (refreshed, reset) = tokio::join!(
        h.store.refresh_user(),
        h.store
            .reset_password("admin@maxirent.com", "https://taller.maxirent.com/reset-password"),
    );

    assert_eq!(refreshed, Ok(None));
    reset.expect("reset requested");
    assert!(!h.store.snapshot().is_authenticated());
    assert!(!h.store.snapshot().is_loading());
}

#[tokio::test]
async fn discarded_sign_in_keeps_no_tokens() {
    let h = demo();
    h.backend.set_profile_delay(Some(Duration::from_millis(100)));

    let (stale, newer) = tokio::join!(
        h.store.sign_in("admin", "admin123"),
        h.store.verify_otp("5551000002", "000000"),
    );

    assert!(matches!(stale, Err(SessionError::Superseded)));
    assert!(matches!(newer, Err(SessionError::InvalidOtp)));
    assert!(!h.store.snapshot().is_authenticated());
    assert!(!h.store.snapshot().is_loading());
    assert!(h.store.tokens().is_none());
}

#[tokio::test]
async fn deactivated_profile_update_signs_out() {
    let h = demo();
    let identity = h
        .store
        .sign_in("mecanico1", "meca123")
        .await
        .expect("sign in");
    h.backend.set_active(identity.id, false);

    let update = ProfileUpdate {
        full_name: Some("Mecánico Uno".to_string()),
        ..ProfileUpdate::default()
    };
    let result = h.store.update_profile(&update).await;

    assert!(matches!(result, Err(SessionError::AccountDisabled)));
    assert!(!h.store.snapshot().is_authenticated());
    assert!(h.store.tokens().is_none());
    assert!(h.slot.load().is_none());
}

#[tokio::test]
async fn watchers_observe_sign_in() {
    let h = demo();
    let mut watcher = h.store.subscribe();
    assert!(!watcher.snapshot().is_authenticated());

    h.store
        .sign_in("admin@maxirent.com", "admin123")
        .await
        .expect("sign in");

    let snapshot = watcher.changed().await.expect("store alive");
    assert!(snapshot.is_authenticated());
    assert!(!snapshot.is_loading());
}

#[tokio::test]
async fn permissions_follow_role() {
    let h = demo();
    h.store
        .sign_in("mecanico1", "meca123")
        .await
        .expect("sign in");
    assert!(!h.store.has_permission("users.create"));

    h.store.sign_out().await;
    assert!(!h.store.has_permission("users.create"));

    h.store.sign_in("admin", "admin123").await.expect("sign in");
    assert!(h.store.has_permission("users.create"));
    assert!(h.store.has_permission("anything.at_all"));
}

#[tokio::test]
async fn update_profile_reloads_identity() {
    let h = demo();
    let before = h
        .store
        .sign_in("recepcionista", "recep123")
        .await
        .expect("sign in");

    let update = ProfileUpdate {
        full_name: Some("Recepción Principal".to_string()),
        phone: Some("+525551234567".to_string()),
        ..ProfileUpdate::default()
    };
    let after = h.store.update_profile(&update).await.expect("updated");

    assert_eq!(after.id, before.id);
    assert_eq!(after.full_name, "Recepción Principal");
    assert_eq!(after.phone.as_deref(), Some("+525551234567"));
    assert_eq!(after.email, before.email);
    assert_eq!(
        h.store.snapshot().user().map(|user| user.full_name.clone()),
        Some("Recepción Principal".to_string())
    );
}

#[tokio::test]
async fn profile_changes_require_session() {
    let h = demo();
    let update = ProfileUpdate {
        full_name: Some("Nadie".to_string()),
        ..ProfileUpdate::default()
    };
    assert!(matches!(
        h.store.update_profile(&update).await,
        Err(SessionError::NotAuthenticated)
    ));
    assert!(matches!(
        h.store.change_password("secreto123").await,
        Err(SessionError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn change_password_updates_account() {
    let h = demo();
    let identity = h
        .store
        .sign_in("almacenista", "alma123")
        .await
        .expect("sign in");

    h.store
        .change_password("almacen2024")
        .await
        .expect("password changed");
    assert_eq!(
        h.backend.password_of(identity.id).as_deref(),
        Some("almacen2024")
    );
}

#[tokio::test]
async fn reset_password_sends_redirect() {
    let h = demo();
    h.store
        .reset_password(" jefetaller@maxirent.com ", "https://taller.maxirent.com/reset-password")
        .await
        .expect("reset requested");
    assert_eq!(
        h.backend.reset_requests(),
        vec![(
            "jefetaller@maxirent.com".to_string(),
            "https://taller.maxirent.com/reset-password".to_string()
        )]
    );
}

#[tokio::test]
async fn only_admins_create_users() {
    let h = demo();
    h.store
        .sign_in("mecanico1", "meca123")
        .await
        .expect("sign in");
    let result = h.store.create_user(&new_user("pedro", Role::Mecanico)).await;
    assert!(matches!(result, Err(SessionError::Forbidden)));

    h.store.sign_out().await;
    let admin = h
        .store
        .sign_in("admin", "admin123")
        .await
        .expect("sign in");
    let created = h
        .store
        .create_user(&new_user("pedro", Role::Mecanico))
        .await
        .expect("created");

    assert_eq!(created.username, "pedro");
    assert_eq!(created.role, Role::Mecanico);
    assert_eq!(created.created_by, Some(admin.id));
    assert_eq!(created.email.as_deref(), Some("pedro@maxirent.com"));
    assert!(created.is_active);

    // The admin stays signed in as themselves.
    assert_eq!(h.store.snapshot().user().map(|user| user.id), Some(admin.id));
}

#[tokio::test]
async fn unavailable_identity_service_maps_to_unavailable() {
    let h = demo();
    h.backend.set_identity_unavailable(true);
    let result = h.store.sign_in("admin@maxirent.com", "admin123").await;
    assert!(matches!(result, Err(SessionError::Unavailable)));
    assert!(!h.store.snapshot().is_loading());
}

#[tokio::test]
async fn initialize_twice_is_idempotent() {
    let backend = MemoryBackend::new();
    let id = backend.add_user("jefe2", "jefe2@maxirent.com", None, "jefe456", Role::JefeTaller);
    let tokens = backend.issue_session(id);
    let h = harness_with(backend, Some(tokens), MemorySlot::default());

    let first = h.store.initialize().await.expect("first");
    let after_first = h.store.snapshot();
    let second = h.store.initialize().await.expect("second");

    assert_eq!(first, second);
    assert_eq!(after_first, h.store.snapshot());

    let anonymous = demo();
    assert_eq!(anonymous.store.initialize().await, Ok(None));
    let after_first = anonymous.store.snapshot();
    assert_eq!(anonymous.store.initialize().await, Ok(None));
    assert_eq!(after_first, anonymous.store.snapshot());
}
