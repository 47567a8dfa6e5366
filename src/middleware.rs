//! HTTP 中间件
//! 应用状态、请求追踪、IP 白名单、客户端 IP 提取

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, Extensions, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::session::SessionService,
    config::{AppConfig, SecurityConfig},
    error::{AppError, AppResult},
    repository::Store,
    services::{
        AccessService, AccountService, AuditService, AuthService, AuthorizationService,
        LoginThrottle, RoleService,
    },
};

/// 应用状态
///
/// 所有服务共享同一个存储实现；handler 通过 `State<Arc<AppState<S>>>` 访问。
pub struct AppState<S> {
    pub config: AppConfig,
    pub store: S,
    /// 只有 PostgreSQL 存储才有连接池，就绪探针据此检查数据库
    pub db: Option<PgPool>,
    pub auth_service: Arc<AuthService<S>>,
    pub authorization: Arc<AuthorizationService<S>>,
    pub access_service: Arc<AccessService<S>>,
    pub role_service: Arc<RoleService<S>>,
    pub account_service: Arc<AccountService<S>>,
    pub audit_service: Arc<AuditService<S>>,
}

impl<S: Store> AppState<S> {
    pub fn new(config: AppConfig, store: S, db: Option<PgPool>) -> AppResult<Self> {
        let sessions = Arc::new(SessionService::from_config(&config.security)?);
        let throttle = Arc::new(LoginThrottle::new(
            config.security.login_max_attempts,
            config.security.login_decay_secs,
        ));

        Ok(Self {
            auth_service: Arc::new(AuthService::new(
                store.clone(),
                sessions,
                throttle,
                config.devices.clone(),
            )),
            authorization: Arc::new(AuthorizationService::new(
                store.clone(),
                config.authorization.super_admin_role.clone(),
            )),
            access_service: Arc::new(AccessService::new(store.clone())),
            role_service: Arc::new(RoleService::new(store.clone())),
            account_service: Arc::new(AccountService::new(store.clone())),
            audit_service: Arc::new(AuditService::new(store.clone())),
            config,
            store,
            db,
        })
    }

    /// 替换认证服务（测试中使用低成本的密码哈希参数）
    pub fn with_auth_service(mut self, auth_service: AuthService<S>) -> Self {
        self.auth_service = Arc::new(auth_service);
        self
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "UNKNOWN",
        };
        let status_class = match status {
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            _ => "5xx",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 客户端地址：连接对端，或受信代理转发过来的原始地址
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

impl<S: Store> FromRequestParts<Arc<AppState<S>>> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(
            peer_addr(&parts.extensions),
            &parts.headers,
            &state.config.security,
        )))
    }
}

/// IP 白名单中间件
pub async fn ip_whitelist_middleware<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(allowed_ips) = &state.config.security.allowed_ips {
        let client_ip = client_ip(
            peer_addr(req.extensions()),
            req.headers(),
            &state.config.security,
        );

        let allowed = client_ip.is_some_and(|ip| {
            let ip = ip.to_string();
            allowed_ips.iter().any(|a| *a == ip)
        });
        if !allowed {
            tracing::warn!(client_ip = ?client_ip, "IP not in whitelist");
            return Err(AppError::Forbidden);
        }

        tracing::debug!(client_ip = ?client_ip, "IP allowed by whitelist");
    }

    Ok(next.run(req).await)
}

/// 连接对端地址（`into_make_service_with_connect_info` 写入请求扩展）
fn peer_addr(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// 解析客户端 IP
///
/// 默认就是连接对端。只有开启 `trust_proxy` 且对端在 `trusted_proxies` 中时才读取
/// X-Forwarded-For，并从右往左取第一个不是受信代理的地址；
/// 左侧的条目由客户端自行填写，不予采信。
pub fn client_ip(
    peer: Option<IpAddr>,
    headers: &HeaderMap,
    security: &SecurityConfig,
) -> Option<IpAddr> {
    let peer = peer?;
    if !security.trust_proxy || !security.trusted_proxies.contains(&peer) {
        return Some(peer);
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    for hop in hops.iter().rev() {
        match hop.parse::<IpAddr>() {
            Ok(ip) if security.trusted_proxies.contains(&ip) => continue,
            Ok(ip) => return Some(ip),
            Err(_) => break,
        }
    }

    Some(peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_or_generate_trace_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "test-trace-123".parse().unwrap());

        let trace_id = extract_or_generate_trace_id(&headers);
        assert_eq!(trace_id, "test-trace-123");

        let headers = HeaderMap::new();
        let trace_id = extract_or_generate_trace_id(&headers);
        assert!(!trace_id.is_empty());
        assert_ne!(trace_id, "test-trace-123");
    }

    fn security(trust_proxy: bool, proxies: &[&str]) -> SecurityConfig {
        SecurityConfig {
            session_secret: secrecy::Secret::new("x".repeat(32)),
            session_ttl_secs: 3600,
            remember_session_ttl_secs: 3600,
            login_max_attempts: 5,
            login_decay_secs: 60,
            trust_proxy,
            trusted_proxies: proxies.iter().map(|p| p.parse().unwrap()).collect(),
            allowed_ips: None,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_client_ip_ignores_forwarded_header_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "6.6.6.6".parse().unwrap());

        let resolved = client_ip(Some(ip("203.0.113.7")), &headers, &security(false, &[]));
        assert_eq!(resolved, Some(ip("203.0.113.7")));
        assert_eq!(client_ip(None, &headers, &security(false, &[])), None);
    }

    #[test]
    fn test_client_ip_ignores_forwarded_header_from_untrusted_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "6.6.6.6".parse().unwrap());

        let resolved = client_ip(
            Some(ip("203.0.113.7")),
            &headers,
            &security(true, &["10.0.0.1"]),
        );
        assert_eq!(resolved, Some(ip("203.0.113.7")));
    }

    #[test]
    fn test_client_ip_takes_rightmost_untrusted_hop() {
        let mut headers = HeaderMap::new();
        // 客户端伪造的 6.6.6.6 在最左侧，代理追加了真实地址
        headers.insert(
            "x-forwarded-for",
            "6.6.6.6, 198.51.100.4, 10.0.0.2".parse().unwrap(),
        );

        let resolved = client_ip(
            Some(ip("10.0.0.1")),
            &headers,
            &security(true, &["10.0.0.1", "10.0.0.2"]),
        );
        assert_eq!(resolved, Some(ip("198.51.100.4")));
    }

    #[test]
    fn test_client_ip_falls_back_to_proxy_without_header() {
        let resolved = client_ip(
            Some(ip("10.0.0.1")),
            &HeaderMap::new(),
            &security(true, &["10.0.0.1"]),
        );
        assert_eq!(resolved, Some(ip("10.0.0.1")));
    }
}
