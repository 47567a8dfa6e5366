//! 设备绑定登录、限流与账户安全集成测试（内存存储）

use erp_access::{
    error::AppError,
    models::{
        audit::{AuthEventFilters, AuthEventType, EventStatus, RiskLevel},
        auth::LoginRequest,
    },
    repository::{AuditRepository, DeviceRepository, MemoryStore, UserRepository},
    services::{
        auth_service::{ClientContext, SessionContext},
        AccountService, AuditService, AuthService,
        AuthorizationService,
    },
};
use uuid::Uuid;

mod common;
use common::{
    core_manifest, create_user, make_super_admin, sync_all, test_auth_service, test_config,
    PASSWORD, SUPER_ADMIN_ROLE,
};

const CHROME_WINDOWS: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

fn client(ip: &str) -> ClientContext {
    ClientContext {
        ip: Some(ip.to_string()),
        user_agent: Some(CHROME_WINDOWS.to_string()),
        header_device_id: None,
    }
}

fn login_request(email: &str, password: &str, device_id: Option<&str>) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
        remember: false,
        device_id: device_id.map(str::to_string),
        device_name: None,
    }
}

fn setup() -> (MemoryStore, AuthService<MemoryStore>) {
    let store = MemoryStore::new();
    let auth = test_auth_service(store.clone(), &test_config());
    (store, auth)
}

async fn events_of(store: &MemoryStore, event_type: AuthEventType) -> usize {
    store
        .query_events(&AuthEventFilters {
            event_type: Some(event_type),
            ..Default::default()
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_first_login_registers_trusted_device() {
    let (store, auth) = setup();
    let user = create_user(&store, "user@example.com").await;
    let device_a = Uuid::new_v4().to_string();

    let response = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device_a)),
            &client("10.0.0.1"),
        )
        .await
        .unwrap();

    assert_eq!(response.token_type, "Bearer");
    assert!(response.device_token.is_some());
    assert_eq!(response.device.device_id, device_a);
    assert!(response.device.is_active);
    assert!(response.device.is_trusted);
    assert_eq!(response.device.browser.as_deref(), Some("Chrome"));
    assert_eq!(response.user.login_count, 1);

    let devices = store.devices_of_user(user.id).await.unwrap();
    assert_eq!(devices.len(), 1);
    // 只保存令牌摘要
    assert_ne!(
        Some(devices[0].device_token_hash.as_str()),
        response.device_token.as_deref()
    );

    assert_eq!(events_of(&store, AuthEventType::DeviceRegistered).await, 1);
    assert_eq!(events_of(&store, AuthEventType::LoginSuccess).await, 1);

    let (authenticated, session) = auth.authenticate(&response.access_token).await.unwrap();
    assert_eq!(authenticated.id, user.id);
    assert_eq!(session.device_id, device_a);
}

#[tokio::test]
async fn test_second_device_is_blocked_without_leaking_token() {
    let (store, auth) = setup();
    let user = create_user(&store, "user@example.com").await;
    let device_a = Uuid::new_v4().to_string();
    let device_b = Uuid::new_v4().to_string();

    let mut first = login_request("user@example.com", PASSWORD, Some(&device_a));
    first.device_name = Some("Office laptop".to_string());
    let first = auth.login(first, &client("10.0.0.1")).await.unwrap();
    let first_token = first.device_token.clone().unwrap();

    let result = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device_b)),
            &client("10.0.0.2"),
        )
        .await;

    let conflict = match result {
        Err(AppError::DeviceConflict(conflict)) => conflict,
        other => panic!("expected device conflict, got {:?}", other.map(|r| r.device)),
    };
    assert_eq!(conflict.conflicting_device.device_id, device_a);
    assert_eq!(
        conflict.conflicting_device.device_name.as_deref(),
        Some("Office laptop")
    );
    assert_eq!(conflict.conflicting_device.browser.as_deref(), Some("Chrome"));
    assert!(conflict.message.contains("Office laptop"));

    let serialized = serde_json::to_string(&conflict.conflicting_device).unwrap();
    assert!(!serialized.contains(&first_token));
    assert!(!serialized.contains("token"));

    // 被拒绝的设备没有落库
    assert_eq!(store.devices_of_user(user.id).await.unwrap().len(), 1);
    let blocked = store
        .query_events(&AuthEventFilters {
            event_type: Some(AuthEventType::LoginDeviceBlocked),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].risk_level, RiskLevel::High);
}

#[tokio::test]
async fn test_logout_frees_the_device_slot() {
    let (store, auth) = setup();
    create_user(&store, "user@example.com").await;
    let device_a = Uuid::new_v4().to_string();
    let device_b = Uuid::new_v4().to_string();

    let first = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device_a)),
            &client("10.0.0.1"),
        )
        .await
        .unwrap();
    let (_, session) = auth.authenticate(&first.access_token).await.unwrap();

    // 上报的设备与会话不一致时拒绝
    let mismatch = auth
        .logout(&session, Some(&device_b), &client("10.0.0.1"))
        .await;
    assert!(matches!(mismatch, Err(AppError::Validation(_))));

    auth.logout(&session, None, &client("10.0.0.1")).await.unwrap();
    assert!(matches!(
        auth.authenticate(&first.access_token).await,
        Err(AppError::Unauthorized)
    ));

    let second = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device_b)),
            &client("10.0.0.2"),
        )
        .await
        .unwrap();
    assert_eq!(second.device.device_id, device_b);
    // 一次被拒绝、一次成功
    assert_eq!(events_of(&store, AuthEventType::Logout).await, 2);
}

#[tokio::test]
async fn test_rejected_logout_is_audited() {
    let (store, auth) = setup();
    let user = create_user(&store, "user@example.com").await;
    let device_a = Uuid::new_v4().to_string();

    let first = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device_a)),
            &client("10.0.0.1"),
        )
        .await
        .unwrap();
    let (_, session) = auth.authenticate(&first.access_token).await.unwrap();
    let before = store
        .query_events(&AuthEventFilters::default())
        .await
        .unwrap()
        .len();

    let malformed = auth
        .logout(&session, Some("laptop"), &client("10.0.0.1"))
        .await;
    assert!(matches!(malformed, Err(AppError::Validation(_))));

    let other_device = Uuid::new_v4().to_string();
    let mismatch = auth
        .logout(&session, Some(&other_device), &client("10.0.0.1"))
        .await;
    assert!(matches!(mismatch, Err(AppError::Validation(_))));

    let unknown_session = SessionContext {
        user_id: user.id,
        session_id: Uuid::new_v4(),
        device_id: Uuid::new_v4().to_string(),
    };
    let missing = auth
        .logout(&unknown_session, None, &client("10.0.0.1"))
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    let events = store
        .query_events(&AuthEventFilters {
            event_type: Some(AuthEventType::Logout),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.status == EventStatus::Failed));
    assert!(events.iter().all(|e| e.user_id == Some(user.id)));

    let mut reasons: Vec<&str> = events
        .iter()
        .filter_map(|e| e.metadata["reason"].as_str())
        .collect();
    reasons.sort_unstable();
    assert_eq!(reasons, ["device_mismatch", "device_not_found", "invalid_device_id"]);

    let after = store
        .query_events(&AuthEventFilters::default())
        .await
        .unwrap()
        .len();
    assert_eq!(after, before + 3);

    // 会话仍然有效
    assert!(auth.authenticate(&first.access_token).await.is_ok());
}

#[tokio::test]
async fn test_relogin_on_same_device_replaces_session() {
    let (store, auth) = setup();
    let user = create_user(&store, "user@example.com").await;
    let device_a = Uuid::new_v4().to_string();

    let first = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device_a)),
            &client("10.0.0.1"),
        )
        .await
        .unwrap();
    let second = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device_a.to_uppercase())),
            &client("10.0.0.1"),
        )
        .await
        .unwrap();

    // 默认每次登录轮换设备令牌
    assert!(second.device_token.is_some());
    assert_ne!(second.device_token, first.device_token);
    assert_eq!(store.devices_of_user(user.id).await.unwrap().len(), 1);

    assert!(matches!(
        auth.authenticate(&first.access_token).await,
        Err(AppError::Unauthorized)
    ));
    assert!(auth.authenticate(&second.access_token).await.is_ok());
}

#[tokio::test]
async fn test_device_id_is_required() {
    let (store, auth) = setup();
    create_user(&store, "user@example.com").await;

    for device_id in [None, Some("not-a-uuid")] {
        let result = auth
            .login(
                login_request("user@example.com", PASSWORD, device_id),
                &client("10.0.0.1"),
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    // 也可以通过请求头提供
    let mut ctx = client("10.0.0.1");
    ctx.header_device_id = Some(Uuid::new_v4().to_string());
    assert!(auth
        .login(login_request("user@example.com", PASSWORD, None), &ctx)
        .await
        .is_ok());
    assert_eq!(events_of(&store, AuthEventType::LoginDeviceMissing).await, 2);
}

#[tokio::test]
async fn test_invalid_credentials_use_uniform_error() {
    let (store, auth) = setup();
    create_user(&store, "user@example.com").await;
    let device = Uuid::new_v4().to_string();

    let wrong_password = auth
        .login(
            login_request("user@example.com", "wrong-password", Some(&device)),
            &client("10.0.0.1"),
        )
        .await
        .unwrap_err();
    let unknown_email = auth
        .login(
            login_request("ghost@example.com", PASSWORD, Some(&device)),
            &client("10.0.0.1"),
        )
        .await
        .unwrap_err();

    assert!(matches!(wrong_password, AppError::InvalidCredentials));
    assert!(matches!(unknown_email, AppError::InvalidCredentials));
    assert_eq!(wrong_password.user_message(), unknown_email.user_message());
    assert_eq!(events_of(&store, AuthEventType::LoginFailed).await, 2);
}

#[tokio::test]
async fn test_rate_limit_is_per_ip() {
    let (store, auth) = setup();
    create_user(&store, "user@example.com").await;
    let device = Uuid::new_v4().to_string();

    for _ in 0..5 {
        let result = auth
            .login(
                login_request("user@example.com", "wrong-password", Some(&device)),
                &client("1.2.3.4"),
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidCredentials)));
    }

    // 第六次即使密码正确也被限流
    match auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device)),
            &client("1.2.3.4"),
        )
        .await
    {
        Err(AppError::RateLimited { retry_after_secs }) => {
            assert!(retry_after_secs >= 1 && retry_after_secs <= 60)
        }
        other => panic!("expected rate limit, got {:?}", other.map(|r| r.device)),
    }
    assert_eq!(events_of(&store, AuthEventType::LoginRateLimited).await, 1);

    // 其他 IP 不受影响
    let response = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&device)),
            &client("5.6.7.8"),
        )
        .await
        .unwrap();
    assert_eq!(response.device.device_id, device);
}

#[tokio::test]
async fn test_locked_account_cannot_login() {
    let (store, auth) = setup();
    let user = create_user(&store, "user@example.com").await;
    store
        .set_account_lock(user.id, Some("Suspicious activity"))
        .await
        .unwrap();

    let result = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&Uuid::new_v4().to_string())),
            &client("10.0.0.1"),
        )
        .await;
    match result {
        Err(AppError::AccountLocked(reason)) => assert_eq!(reason, "Suspicious activity"),
        other => panic!("expected locked account, got {:?}", other.map(|r| r.device)),
    }
    assert!(store.devices_of_user(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lock_and_unlock_accounts() {
    let (store, auth) = setup();
    sync_all(&store, &[core_manifest()]).await;
    let admin = create_user(&store, "admin@example.com").await;
    make_super_admin(&store, &admin).await;
    let user = create_user(&store, "user@example.com").await;

    let session = auth
        .login(
            login_request("user@example.com", PASSWORD, Some(&Uuid::new_v4().to_string())),
            &client("10.0.0.1"),
        )
        .await
        .unwrap();

    let engine = AuthorizationService::new(store.clone(), SUPER_ADMIN_ROLE);
    let accounts = AccountService::new(store.clone());

    // 普通用户没有锁定权限，也不能锁自己
    let user_authorizer = engine.authorizer(&user);
    assert!(matches!(
        accounts.lock(&user_authorizer, admin.id, "nope").await,
        Err(AppError::Forbidden)
    ));
    let admin_authorizer = engine.authorizer(&admin);
    assert!(matches!(
        accounts.lock(&admin_authorizer, admin.id, "self").await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        accounts.lock(&admin_authorizer, user.id, "   ").await,
        Err(AppError::Validation(_))
    ));

    let locked = accounts
        .lock(&admin_authorizer, user.id, "Left the company")
        .await
        .unwrap();
    assert!(locked.is_locked());
    assert!(matches!(
        auth.authenticate(&session.access_token).await,
        Err(AppError::Unauthorized)
    ));

    let unlocked = accounts.unlock(&admin_authorizer, user.id).await.unwrap();
    assert!(!unlocked.is_locked());
    assert_eq!(events_of(&store, AuthEventType::AccountLocked).await, 1);
    assert_eq!(events_of(&store, AuthEventType::AccountUnlocked).await, 1);
}

#[tokio::test]
async fn test_device_management() {
    let (store, auth) = setup();
    sync_all(&store, &[core_manifest()]).await;
    let owner = create_user(&store, "user@example.com").await;
    let other = create_user(&store, "other@example.com").await;
    let device_a = Uuid::new_v4().to_string();

    auth.login(
        login_request("user@example.com", PASSWORD, Some(&device_a)),
        &client("10.0.0.1"),
    )
    .await
    .unwrap();

    let engine = AuthorizationService::new(store.clone(), SUPER_ADMIN_ROLE);
    let accounts = AccountService::new(store.clone());

    let untrusted = accounts.set_trust(owner.id, &device_a, false).await.unwrap();
    assert!(!untrusted.is_trusted);

    // 他人无权停用
    assert!(matches!(
        accounts
            .deactivate_device(&engine.authorizer(&other), owner.id, &device_a)
            .await,
        Err(AppError::Forbidden)
    ));

    // 设备或用户不存在时同样是 Forbidden，不暴露存在性
    assert!(matches!(
        accounts
            .deactivate_device(&engine.authorizer(&other), owner.id, "missing")
            .await,
        Err(AppError::Forbidden)
    ));
    assert!(matches!(
        accounts
            .deactivate_device(&engine.authorizer(&other), Uuid::new_v4(), &device_a)
            .await,
        Err(AppError::Forbidden)
    ));

    // 本人可以
    let deactivated = accounts
        .deactivate_device(&engine.authorizer(&owner), owner.id, &device_a)
        .await
        .unwrap();
    assert!(!deactivated.is_active);
    let devices = accounts.my_devices(owner.id).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert!(!devices[0].is_active);

    assert!(matches!(
        accounts
            .deactivate_device(&engine.authorizer(&owner), owner.id, "missing")
            .await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(events_of(&store, AuthEventType::DeviceDeactivated).await, 1);
}

#[tokio::test]
async fn test_event_query_filters() {
    let (store, auth) = setup();
    let user = create_user(&store, "user@example.com").await;
    create_user(&store, "other@example.com").await;
    let device = Uuid::new_v4().to_string();

    auth.login(
        login_request("other@example.com", "wrong-password", Some(&device)),
        &client("10.0.0.1"),
    )
    .await
    .unwrap_err();
    auth.login(
        login_request("user@example.com", PASSWORD, Some(&device)),
        &client("10.0.0.1"),
    )
    .await
    .unwrap();

    let audit = AuditService::new(store.clone());
    let mine = audit
        .query(&AuthEventFilters {
            user_id: Some(user.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(mine.len(), 2);
    // 最新的在前
    assert_eq!(mine[0].event_type, AuthEventType::LoginSuccess);
    assert_eq!(mine[1].event_type, AuthEventType::DeviceRegistered);

    let limited = audit
        .query(&AuthEventFilters {
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let now = chrono::Utc::now();
    let inverted = audit
        .query(&AuthEventFilters {
            start_time: Some(now),
            end_time: Some(now - chrono::Duration::hours(1)),
            ..Default::default()
        })
        .await;
    assert!(matches!(inverted, Err(AppError::Validation(_))));
}
