//! HTTP API 集成测试（内存存储）

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use std::net::SocketAddr;
use erp_access::{
    models::role::{AccessScope, GrantAccessRequest, GrantSpec, GrantWriteMode},
    repository::MemoryStore,
    routes,
    services::AccessService,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

mod common;
use common::{
    component_ref, core_manifest, create_role_for, create_user, hrm_manifest, make_super_admin,
    sync_all, test_config, test_state, test_state_with, PASSWORD,
};

fn app(store: &MemoryStore) -> Router {
    routes::create_router(test_state(store.clone()))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn login_request(email: &str, password: &str, device_id: &str, peer: &str) -> Request<Body> {
    login_request_via(email, password, device_id, peer, None)
}

/// 指定连接对端和可选的 X-Forwarded-For 头
fn login_request_via(
    email: &str,
    password: &str,
    device_id: &str,
    peer: &str,
    forwarded_for: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) Firefox/121.0");
    if let Some(forwarded_for) = forwarded_for {
        builder = builder.header("x-forwarded-for", forwarded_for);
    }
    let mut request = builder
        .body(Body::from(
            json!({ "email": email, "password": password, "device_id": device_id }).to_string(),
        ))
        .unwrap();
    let peer: SocketAddr = format!("{}:40000", peer).parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn with_json(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// 登录并返回访问令牌
async fn login(app: &Router, email: &str) -> String {
    let device_id = Uuid::new_v4().to_string();
    let (status, body) = send(app, login_request(email, PASSWORD, &device_id, "10.1.1.1")).await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let store = MemoryStore::new();
    let (status, body) = send(
        &app(&store),
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert!(body["uptime_secs"].is_number());
}

#[tokio::test]
async fn test_readiness_reports_hierarchy_schema() {
    let store = MemoryStore::new();
    let app = app(&store);
    let ready = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

    let (status, body) = send(&app, ready()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["checks"][0]["name"], "hierarchy_schema");

    store.drop_table("sub_modules");
    let (status, body) = send(&app, ready()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
    assert!(body["checks"][0]["message"]
        .as_str()
        .unwrap()
        .contains("sub_modules"));
}

#[tokio::test]
async fn test_login_blocks_second_device() {
    let store = MemoryStore::new();
    create_user(&store, "user@example.com").await;
    let app = app(&store);
    let device_a = Uuid::new_v4().to_string();
    let device_b = Uuid::new_v4().to_string();

    let (status, first) = send(
        &app,
        login_request("user@example.com", PASSWORD, &device_a, "10.1.1.1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["token_type"], "Bearer");
    assert!(first["device_token"].is_string());
    assert!(first["csrf_token"].is_string());
    assert_eq!(first["device"]["is_active"], true);
    assert!(first["user"].get("password_hash").is_none());

    let (status, blocked) = send(
        &app,
        login_request("user@example.com", PASSWORD, &device_b, "10.1.1.2"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(blocked["error"]["blocked"], true);
    let conflicting = &blocked["error"]["conflicting_device"];
    assert_eq!(conflicting["device_id"], device_a.as_str());
    assert_eq!(conflicting["browser"], "Firefox");
    assert_eq!(conflicting["platform"], "macOS");
    assert!(conflicting["device_name"].is_string());

    let raw = blocked.to_string();
    assert!(!raw.contains("access_token"));
    assert!(!raw.contains("device_token"));
    assert!(!raw.contains(first["device_token"].as_str().unwrap()));
}

#[tokio::test]
async fn test_login_rate_limited_per_ip() {
    let store = MemoryStore::new();
    create_user(&store, "user@example.com").await;
    let app = app(&store);
    let device = Uuid::new_v4().to_string();

    for _ in 0..5 {
        let (status, body) = send(
            &app,
            login_request("user@example.com", "wrong-password", &device, "1.2.3.4"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body["error"]["message"],
            "These credentials do not match our records"
        );
    }

    let (status, body) = send(
        &app,
        login_request("user@example.com", PASSWORD, &device, "1.2.3.4"),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"]["retry_after"].as_u64().unwrap() >= 1);

    let (status, _) = send(
        &app,
        login_request("user@example.com", PASSWORD, &device, "9.9.9.9"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_header_does_not_bypass_rate_limit() {
    let store = MemoryStore::new();
    create_user(&store, "user@example.com").await;
    create_user(&store, "other@example.com").await;
    let app = app(&store);
    let device = Uuid::new_v4().to_string();

    // 未配置受信代理时，转发头被忽略，按连接对端计数
    for i in 0..5 {
        let forwarded = format!("6.6.6.{}", i);
        let (status, _) = send(
            &app,
            login_request_via("user@example.com", "wrong-password", &device, "1.2.3.4", Some(&forwarded)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _) = send(
        &app,
        login_request_via("user@example.com", "wrong-password", &device, "1.2.3.4", Some("6.6.6.99")),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // 其他客户端不受影响
    let other_device = Uuid::new_v4().to_string();
    let (status, body) = send(
        &app,
        login_request("other@example.com", PASSWORD, &other_device, "5.6.7.8"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[tokio::test]
async fn test_rate_limit_behind_trusted_proxy() {
    let store = MemoryStore::new();
    create_user(&store, "user@example.com").await;
    let mut config = test_config();
    config.security.trust_proxy = true;
    config.security.trusted_proxies = vec!["10.0.0.1".parse().unwrap()];
    let app = routes::create_router(test_state_with(store.clone(), config));
    let device = Uuid::new_v4().to_string();

    // 代理追加真实地址 198.51.100.4；左侧伪造的条目每次都不同
    for i in 0..5 {
        let forwarded = format!("6.6.6.{}, 198.51.100.4", i);
        let (status, _) = send(
            &app,
            login_request_via("user@example.com", "wrong-password", &device, "10.0.0.1", Some(&forwarded)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _) = send(
        &app,
        login_request_via("user@example.com", PASSWORD, &device, "10.0.0.1", Some("198.51.100.4")),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // 同一代理转发的另一个客户端
    let (status, body) = send(
        &app,
        login_request_via("user@example.com", PASSWORD, &device, "10.0.0.1", Some("203.0.113.9")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[tokio::test]
async fn test_authenticated_routes_require_session() {
    let store = MemoryStore::new();
    let app = app(&store);

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/api/v1/auth/me")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, get("/api/v1/auth/me", "not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_and_logout() {
    let store = MemoryStore::new();
    sync_all(&store, &[hrm_manifest()]).await;
    let user = create_user(&store, "user@example.com").await;
    create_role_for(&store, "Clerk", &user).await;
    let app = app(&store);
    let token = login(&app, "user@example.com").await;

    let (status, me) = send(&app, get("/api/v1/auth/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["email"], "user@example.com");
    assert_eq!(me["roles"], json!(["Clerk"]));

    let (status, devices) = send(&app, get("/api/v1/auth/devices", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(devices["devices"].as_array().unwrap().len(), 1);

    let logout = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/logout")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, logout).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out");

    let (status, _) = send(&app, get("/api/v1/auth/me", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_access_check_endpoint() {
    let store = MemoryStore::new();
    sync_all(&store, &[hrm_manifest()]).await;
    let user = create_user(&store, "manager@example.com").await;
    let manager = create_role_for(&store, "Manager", &user).await;
    let directory = component_ref(&store, "hrm.employees.employee-directory.view").await;
    AccessService::new(store.clone())
        .grant(
            manager.id,
            &GrantAccessRequest {
                grant: GrantSpec {
                    node: directory,
                    access_scope: AccessScope::Own,
                },
                mode: GrantWriteMode::Reject,
            },
        )
        .await
        .unwrap();

    let app = app(&store);
    let token = login(&app, "manager@example.com").await;
    let check = |body: Value| with_json("POST", "/api/v1/access/check", &token, body);

    let (status, body) = send(
        &app,
        check(json!({ "action": "hrm.employees.employee-directory.view" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    assert_eq!(body["decision"]["outcome"], "granted");
    assert_eq!(body["decision"]["level"], "component");
    assert_eq!(body["decision"]["access_scope"], "own");

    let (_, body) = send(
        &app,
        check(json!({
            "action": "hrm.employees.employee-directory.view",
            "record": { "owner_id": Uuid::new_v4() }
        })),
    )
    .await;
    assert_eq!(body["allowed"], false);

    let (_, body) = send(&app, check(json!({ "action": "hrm.payroll.payslips.view" }))).await;
    assert_eq!(body["allowed"], false);
    assert_eq!(body["decision"]["outcome"], "no_grant");

    let (_, body) = send(&app, check(json!({ "action": "hrm.nothing.here.view" }))).await;
    assert_eq!(body["decision"]["outcome"], "unknown_action");

    let (status, _) = send(&app, check(json!({ "action": "hrm.employees" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = send(&app, get("/api/v1/modules/accessible", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modules"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_endpoints_are_gated() {
    let store = MemoryStore::new();
    sync_all(&store, &[core_manifest(), hrm_manifest()]).await;
    create_user(&store, "user@example.com").await;
    let app = app(&store);
    let token = login(&app, "user@example.com").await;

    for uri in ["/api/v1/modules", "/api/v1/roles", "/api/v1/audit/auth-events"] {
        let (status, body) = send(&app, get(uri, &token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        assert_eq!(body["error"]["message"], "Access denied");
    }
}

#[tokio::test]
async fn test_role_and_grant_administration() {
    let store = MemoryStore::new();
    sync_all(&store, &[core_manifest(), hrm_manifest()]).await;
    let admin = create_user(&store, "admin@example.com").await;
    make_super_admin(&store, &admin).await;
    let clerk = create_user(&store, "clerk@example.com").await;
    let app = app(&store);
    let token = login(&app, "admin@example.com").await;

    let (status, body) = send(
        &app,
        with_json("POST", "/api/v1/roles", &token, json!({ "name": "Clerk" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = body["role"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        with_json(
            "POST",
            &format!("/api/v1/roles/{}/holders", role_id),
            &token,
            json!({ "holder_id": clerk.id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let directory = component_ref(&store, "hrm.employees.employee-directory.view").await;
    let grant_body = json!({
        "node": directory,
        "access_scope": "department"
    });
    let (status, body) = send(
        &app,
        with_json(
            "POST",
            &format!("/api/v1/roles/{}/access", role_id),
            &token,
            grant_body.clone(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let grant_id = body["grant"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        with_json(
            "POST",
            &format!("/api/v1/roles/{}/access", role_id),
            &token,
            grant_body,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("already has a grant"));

    let (status, body) = send(&app, get(&format!("/api/v1/roles/{}/access", role_id), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grants"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, get("/api/v1/modules", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modules"].as_array().unwrap().len(), 2);

    let revoke = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/access/{}", grant_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, revoke).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"]["id"], grant_id.as_str());

    let (status, body) = send(
        &app,
        get("/api/v1/audit/auth-events?event_type=login_success", &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_admin_locks_account_and_session_ends() {
    let store = MemoryStore::new();
    sync_all(&store, &[core_manifest()]).await;
    let admin = create_user(&store, "admin@example.com").await;
    make_super_admin(&store, &admin).await;
    let user = create_user(&store, "user@example.com").await;
    let app = app(&store);
    let admin_token = login(&app, "admin@example.com").await;
    let user_token = login(&app, "user@example.com").await;

    let (status, body) = send(
        &app,
        get(&format!("/api/v1/users/{}/devices", user.id), &admin_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["devices"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        with_json(
            "POST",
            &format!("/api/v1/users/{}/lock", user.id),
            &admin_token,
            json!({ "reason": "Compromised credentials" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["account_locked"], true);

    let (status, _) = send(&app, get("/api/v1/auth/me", &user_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        login_request("user@example.com", PASSWORD, &Uuid::new_v4().to_string(), "10.2.2.2"),
    )
    .await;
    assert_eq!(status, StatusCode::LOCKED);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Compromised credentials"));
}
