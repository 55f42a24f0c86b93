// SPDX-License-Identifier: AGPL-3.0-only
//! REST endpoints: login, logout, backend status and directory management.

use crate::lifecycle::Lifecycle;
use crate::metrics::{AuthTimer, metrics};
use crate::terminal::terminal_handler;
use crate::tokens::SessionTokens;
use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use warden_auth::error::LOGIN_FAILED_MESSAGE;
use warden_auth::{
    AccessKind, AccessRecord, AccessStatus, AuditSink, AuthBroker, AuthError, BackendKind, Identity,
};
use warden_relay::{TerminalRelay, TokenClaims};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<AuthBroker>,
    pub tokens: Arc<SessionTokens>,
    pub relay: Arc<TerminalRelay>,
    pub audit: Arc<dyn AuditSink>,
    pub lifecycle: Lifecycle,
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/services", get(services))
        .route("/api/auth/ldap/sync", post(directory_sync))
        .route("/api/auth/ldap/groups", get(directory_groups))
        .route("/api/terminal", get(terminal_handler))
        .with_state(state)
}

/// `{"error": message}` with the given status.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Remote address of the caller, `unknown` when the listener did not record it.
pub struct Peer(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Peer {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Peer(peer))
    }
}

/// A caller holding a valid bearer token.
pub struct Bearer {
    pub token: String,
    pub claims: TokenClaims,
}

impl FromRequestParts<AppState> for Bearer {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Authentication required"))?;
        let claims = state
            .tokens
            .claims(token)
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;
        Ok(Bearer {
            token: token.to_string(),
            claims,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub auth_method: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    id: i64,
    username: String,
    full_name: String,
    email: Option<String>,
    auth_method: BackendKind,
    group_id: Option<i64>,
}

impl From<&Identity> for UserView {
    fn from(identity: &Identity) -> Self {
        UserView {
            id: identity.user_id,
            username: identity.principal.clone(),
            full_name: identity.display_name.clone(),
            email: identity.email.clone(),
            auth_method: identity.origin,
            group_id: identity.group_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    expires_in: u64,
    user: UserView,
}

/// POST /api/auth/login
#[instrument(skip_all, fields(peer = %peer, user = %request.username))]
async fn login(State(state): State<AppState>, Peer(peer): Peer, Json(request): Json<LoginRequest>) -> Response {
    if !state.lifecycle.accepting() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Server is not accepting logins");
    }
    let kind = match request.auth_method.as_deref() {
        None | Some("") => BackendKind::Local,
        Some(raw) => match raw.parse::<BackendKind>() {
            Ok(kind) => kind,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
        },
    };
    if request.username.trim().is_empty() || request.password.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Username and password are required");
    }

    let timer = AuthTimer::new(kind.as_str());
    let result = state
        .broker
        .authenticate(request.username.trim(), &request.password, kind)
        .await;
    let verdict = match result {
        Ok(verdict) => verdict,
        Err(err) => {
            timer.finish("error");
            let status = match &err {
                AuthError::IdentityNotProvisioned { .. } => {
                    info!(backend = %kind, error = %err, "authenticated principal has no local account");
                    let details = format!("{} via {kind}: not provisioned", request.username);
                    audit(&state, login_record(AccessStatus::Failure, &peer, None, details)).await;
                    StatusCode::FORBIDDEN
                }
                AuthError::BackendUnavailable(_) => {
                    warn!(backend = %kind, error = %err, "authentication could not complete");
                    StatusCode::SERVICE_UNAVAILABLE
                }
                AuthError::Store(_) => {
                    warn!(backend = %kind, error = %err, "user store failed during login");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            return error_response(status, err.outward_message());
        }
    };

    let Some(identity) = verdict.identity.clone().filter(|_| verdict.authenticated) else {
        timer.finish("reject");
        let reason = verdict.reject_reason().map(|r| r.as_str()).unwrap_or("rejected");
        info!(backend = %kind, reason, "login rejected");
        let details = format!("{} via {kind}: {reason}", request.username);
        audit(&state, login_record(AccessStatus::Failure, &peer, None, details)).await;
        return error_response(StatusCode::UNAUTHORIZED, LOGIN_FAILED_MESSAGE);
    };
    timer.finish("accept");

    let claims = TokenClaims {
        user_id: identity.user_id,
        username: identity.principal.clone(),
        origin: identity.origin,
    };
    let token = match state.tokens.issue(claims) {
        Ok(token) => token,
        Err(err) => {
            warn!(error = %err, "failed to mint session token");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };
    audit(
        &state,
        login_record(AccessStatus::Success, &peer, Some(identity.user_id), format!("Logged in via {kind}")),
    )
    .await;
    info!(backend = %kind, user_id = identity.user_id, "login succeeded");
    Json(LoginResponse {
        token,
        expires_in: state.tokens.ttl().as_secs(),
        user: UserView::from(&identity),
    })
    .into_response()
}

fn login_record(status: AccessStatus, peer: &str, user_id: Option<i64>, details: String) -> AccessRecord {
    let record = AccessRecord::new(AccessKind::Login, status, peer).details(details);
    match user_id {
        Some(id) => record.user(id),
        None => record,
    }
}

async fn audit(state: &AppState, record: AccessRecord) {
    if let Err(err) = state.audit.record_access(record).await {
        warn!(error = %err, "failed to write access record");
    }
}

/// POST /api/auth/logout
async fn logout(State(state): State<AppState>, bearer: Bearer) -> StatusCode {
    state.tokens.revoke(&bearer.token);
    StatusCode::NO_CONTENT
}

/// GET /api/auth/services - independent status of each remote backend.
async fn services(State(state): State<AppState>, _bearer: Bearer) -> Response {
    let report = state.broker.check_all_statuses().await;
    metrics().record_status(&report);
    Json(report).into_response()
}

/// POST /api/auth/ldap/sync
async fn directory_sync(State(state): State<AppState>, Peer(peer): Peer, bearer: Bearer) -> Response {
    let record = AccessRecord::new(AccessKind::DirectorySync, AccessStatus::Success, peer).user(bearer.claims.user_id);
    match state.broker.sync_directory().await {
        Ok(report) => {
            info!(created = report.created, updated = report.updated, total = report.total, "directory sync finished");
            audit(
                &state,
                record.details(format!(
                    "created {}, updated {}, skipped {}, total {}",
                    report.created, report.updated, report.skipped, report.total
                )),
            )
            .await;
            Json(report).into_response()
        }
        Err(err) => {
            warn!(error = %err, "directory sync failed");
            let mut record = record.details(err.to_string());
            record.status = AccessStatus::Failure;
            audit(&state, record).await;
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Directory synchronization failed")
        }
    }
}

/// GET /api/auth/ldap/groups
async fn directory_groups(State(state): State<AppState>, _bearer: Bearer) -> Response {
    match state.broker.list_directory_groups().await {
        Ok(groups) => Json(groups).into_response(),
        Err(err) => {
            warn!(error = %err, "listing directory groups failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.outward_message())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::seed::DeviceTable;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;
    use warden_auth::memory::NewUser;
    use warden_auth::{BackendSettings, CredentialStore, DirectoryConnector, LdapConnector, MemoryStore};
    use warden_relay::{RelayDeps, RelaySettings, SharedCredential, SshConnector};

    pub(crate) struct TestApp {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
    }

    pub(crate) fn test_app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let credentials = CredentialStore::new(store.clone()).unwrap();
        for (name, active) in [("admin", true), ("disabled", false)] {
            store.insert_user(NewUser {
                username: name.into(),
                password_hash: credentials.hash_secret("admin123").unwrap(),
                full_name: Some("Administrator".into()),
                active,
                ..NewUser::default()
            });
        }
        let connector: Arc<dyn DirectoryConnector> = Arc::new(LdapConnector);
        let broker = Arc::new(AuthBroker::new(store.clone(), store.clone(), credentials, connector));
        let tokens = Arc::new(SessionTokens::new(Duration::from_secs(3600)));
        let relay = Arc::new(TerminalRelay::new(
            RelayDeps {
                tokens: tokens.clone(),
                users: store.clone(),
                devices: Arc::new(DeviceTable::default()),
                credentials: Arc::new(SharedCredential::new(None, "pw")),
                connector: Arc::new(SshConnector::new(Duration::from_secs(1), Duration::from_secs(30))),
                audit: store.clone(),
                accounting: broker.clone(),
            },
            RelaySettings::default(),
        ));
        let lifecycle = Lifecycle::new();
        lifecycle.serve();
        TestApp {
            state: AppState {
                broker,
                tokens,
                relay,
                audit: store.clone(),
                lifecycle,
            },
            store,
        }
    }

    async fn call(app: &TestApp, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = build_api_router(app.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn login_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authorized(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    // ==================== Login Tests ====================

    #[tokio::test]
    async fn local_login_mints_token() {
        let app = test_app();
        let (status, body) = call(&app, login_request(json!({"username": "admin", "password": "admin123"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["username"], "admin");
        assert_eq!(body["user"]["authMethod"], "local");
        assert_eq!(body["expiresIn"], 3600);
        let token = body["token"].as_str().unwrap();
        assert_eq!(app.state.tokens.claims(token).unwrap().username, "admin");

        let records = app.store.access_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, AccessKind::Login);
        assert_eq!(records[0].status, AccessStatus::Success);
    }

    #[tokio::test]
    async fn bad_password_and_inactive_user_look_the_same() {
        let app = test_app();
        let (status, wrong) = call(&app, login_request(json!({"username": "admin", "password": "nope"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, inactive) =
            call(&app, login_request(json!({"username": "disabled", "password": "admin123"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong, inactive);
        assert_eq!(wrong["error"], LOGIN_FAILED_MESSAGE);
        assert_eq!(app.store.access_records().len(), 2);
        assert!(app.state.tokens.is_empty());
    }

    #[tokio::test]
    async fn unknown_auth_method_is_bad_request() {
        let app = test_app();
        let (status, _) = call(
            &app,
            login_request(json!({"username": "admin", "password": "x", "authMethod": "kerberos"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unavailable_backend_is_not_a_failed_login() {
        let app = test_app();
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings: BackendSettings = [
            ("serverHost", "127.0.0.1".to_string()),
            ("serverPort", silent.local_addr().unwrap().port().to_string()),
            ("sharedSecret", "s3cret".to_string()),
            ("timeout", "200".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        app.store.set_settings("radius", settings);

        let (status, body) = call(
            &app,
            login_request(json!({"username": "admin", "password": "admin123", "authMethod": "radius"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Authentication service unavailable");
        assert!(app.store.access_records().is_empty());
    }

    #[tokio::test]
    async fn draining_server_refuses_logins() {
        let app = test_app();
        app.state.lifecycle.drain();
        let (status, _) = call(&app, login_request(json!({"username": "admin", "password": "admin123"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    // ==================== Bearer Tests ====================

    #[tokio::test]
    async fn services_requires_token() {
        let app = test_app();
        let request = Request::builder().uri("/api/auth/services").body(Body::empty()).unwrap();
        let (status, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, authorized("GET", "/api/auth/services", "forged")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn services_reports_each_backend() {
        let app = test_app();
        let token = app
            .state
            .tokens
            .issue(TokenClaims {
                user_id: 1,
                username: "admin".into(),
                origin: BackendKind::Local,
            })
            .unwrap();
        let (status, body) = call(&app, authorized("GET", "/api/auth/services", &token)).await;
        assert_eq!(status, StatusCode::OK);
        for backend in ["ldap", "tacacs", "radius"] {
            assert_eq!(body[backend]["status"], "offline", "{backend}");
        }
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let app = test_app();
        let token = app
            .state
            .tokens
            .issue(TokenClaims {
                user_id: 1,
                username: "admin".into(),
                origin: BackendKind::Local,
            })
            .unwrap();
        let (status, _) = call(&app, authorized("POST", "/api/auth/logout", &token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(app.state.tokens.claims(&token).is_none());
    }

    #[tokio::test]
    async fn unconfigured_directory_sync_fails_and_is_audited() {
        let app = test_app();
        let token = app
            .state
            .tokens
            .issue(TokenClaims {
                user_id: 1,
                username: "admin".into(),
                origin: BackendKind::Local,
            })
            .unwrap();
        let (status, _) = call(&app, authorized("POST", "/api/auth/ldap/sync", &token)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let records = app.store.access_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, AccessKind::DirectorySync);
        assert_eq!(records[0].status, AccessStatus::Failure);
    }
}
