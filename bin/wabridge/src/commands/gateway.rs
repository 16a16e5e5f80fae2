use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use wabridge_browser::{ChromeDriver, SystemProcesses};
use wabridge_core::{Config, Error, Paths};
use wabridge_whatsapp::{ContactResolution, WhatsAppService};

const BANNER: &str = "API Whatsapp 1.0.0";
const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[derive(Clone)]
struct GatewayState {
    service: Arc<WhatsAppService>,
    /// `None` when credentials are unconfigured; every request is then denied.
    credentials: Option<Arc<(String, String)>>,
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Constant-time string comparison to prevent timing attacks.
fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Splits an `Authorization: Basic ...` header into user and password.
fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?.trim();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

async fn auth_middleware(
    State(state): State<GatewayState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let supplied = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_auth);

    let authorized = match (&state.credentials, supplied) {
        (Some(expected), Some((user, pass))) => {
            // Evaluate both sides so the timing does not reveal which one failed.
            let user_ok = secure_eq(&user, &expected.0);
            let pass_ok = secure_eq(&pass, &expected.1);
            user_ok & pass_ok
        }
        _ => false,
    };

    if authorized {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"401\"")],
            "Authentication required.",
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// HTTP request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
#[serde(default)]
struct TokenRequest {
    token: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ContactRequest {
    token: String,
    contact_name: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct NewMessagesRequest {
    token: String,
    total_chats: usize,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct SendMessageRequest {
    token: String,
    chat_id: String,
    message: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct MessageQuery {
    token: String,
    chat_id: String,
    visible_name: String,
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

/// Maps a service failure to the endpoint's status and wording.
fn failure(err: Error, required: &str, failed: &str) -> Response {
    match err {
        Error::Validation(_) => message(StatusCode::BAD_REQUEST, required),
        Error::Auth(reason) => {
            warn!(reason = %reason, "Rejected token");
            message(StatusCode::UNAUTHORIZED, "Invalid token")
        }
        other => {
            error!(error = %other, "{}", failed);
            message(StatusCode::INTERNAL_SERVER_ERROR, failed)
        }
    }
}

fn body_or_default<T: Default>(body: Option<Json<T>>) -> T {
    body.map(|Json(b)| b).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_banner() -> &'static str {
    BANNER
}

async fn handle_qr_code(State(state): State<GatewayState>) -> Response {
    let pairing = match state.service.issue_pairing().await {
        Ok(pairing) => pairing,
        Err(e) => {
            error!(error = %e, "Failed to generate QR Code");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate QR Code").into_response();
        }
    };

    let token = match HeaderValue::from_str(&pairing.token) {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, "Session token is not a valid header value");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate QR Code").into_response();
        }
    };
    // The scan monitor keeps running detached from the response.
    drop(pairing.monitor);
    info!("QR code served; scan it within the pairing window");

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(SESSION_TOKEN_HEADER, token);
    (headers, pairing.image).into_response()
}

async fn handle_terminate(
    State(state): State<GatewayState>,
    body: Option<Json<TokenRequest>>,
) -> Response {
    let req = body_or_default(body);
    match state.service.terminate(&req.token).await {
        Ok(()) => message(StatusCode::OK, "Session terminated successfully"),
        Err(e) => failure(e, "Token is required", "Failed to terminate session"),
    }
}

async fn handle_contacts(
    State(state): State<GatewayState>,
    body: Option<Json<ContactRequest>>,
) -> Response {
    let req = body_or_default(body);
    match state
        .service
        .resolve_contact(&req.token, &req.contact_name)
        .await
    {
        Ok(ContactResolution::Found(chat_id)) => Json(Value::String(chat_id)).into_response(),
        Ok(ContactResolution::NotFound) => Json(Value::Bool(false)).into_response(),
        Err(e) => failure(e, "Token and contactName are required", "Failed to get contacts"),
    }
}

async fn handle_new_messages(
    State(state): State<GatewayState>,
    body: Option<Json<NewMessagesRequest>>,
) -> Response {
    let req = body_or_default(body);
    match state
        .service
        .list_recent_chats(&req.token, req.total_chats)
        .await
    {
        Ok(chats) => Json(chats).into_response(),
        Err(e) => failure(e, "Token and totalChats are required", "Failed to get new messages"),
    }
}

async fn handle_send_message(
    State(state): State<GatewayState>,
    body: Option<Json<SendMessageRequest>>,
) -> Response {
    let req = body_or_default(body);
    match state
        .service
        .send_message(&req.token, &req.chat_id, &req.message)
        .await
    {
        Ok(()) => message(StatusCode::OK, "Message sent successfully"),
        Err(e) => failure(
            e,
            "Token, chatId, and message are required",
            "Failed to send message",
        ),
    }
}

async fn handle_get_messages(
    State(state): State<GatewayState>,
    Query(query): Query<MessageQuery>,
) -> Response {
    match state
        .service
        .receive_messages(&query.token, &query.chat_id, &query.visible_name)
        .await
    {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(e) => failure(
            e,
            "Token, chatId and visibleName are required",
            "Failed to get messages",
        ),
    }
}

async fn handle_mapping(
    State(state): State<GatewayState>,
    body: Option<Json<TokenRequest>>,
) -> Response {
    let req = body_or_default(body);
    match state.service.run_mapping(&req.token).await {
        Ok(()) => message(
            StatusCode::OK,
            "Mapped contacts, groups, and phone numbers successfully",
        ),
        Err(e) => failure(
            e,
            "Token is required",
            "Failed to map contacts, groups, and phone numbers",
        ),
    }
}

fn build_router(state: GatewayState) -> Router {
    let api = Router::new()
        .route("/api/whatsapp", get(handle_banner))
        .route("/api/whatsapp/qr_code", get(handle_qr_code))
        .route("/api/whatsapp/terminate", post(handle_terminate))
        .route("/api/whatsapp/contacts", post(handle_contacts))
        .route("/api/whatsapp/new_messages", post(handle_new_messages))
        .route(
            "/api/whatsapp/message",
            post(handle_send_message).get(handle_get_messages),
        )
        .route("/api/whatsapp/mapping", post(handle_mapping))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    api.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn credentials(config: &Config) -> Option<Arc<(String, String)>> {
    let auth = &config.gateway.basic_auth;
    if auth.username.is_empty() || auth.password.is_empty() {
        None
    } else {
        Some(Arc::new((auth.username.clone(), auth.password.clone())))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn run(cli_host: Option<String>, cli_port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;

    let host = cli_host.unwrap_or_else(|| config.gateway.host.clone());
    let port = cli_port.unwrap_or(config.gateway.port);

    let credentials = credentials(&config);
    if credentials.is_none() {
        warn!("Basic auth credentials are not configured; every request will be rejected");
    }

    let driver = Arc::new(ChromeDriver::new(config.browser.clone(), paths.clone()));
    let service = Arc::new(WhatsAppService::new(
        config.whatsapp.clone(),
        &paths,
        driver,
        Arc::new(SystemProcesses),
    )?);
    service.restore().await?;

    let app = build_router(GatewayState {
        service: service.clone(),
        credentials,
    });

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = service.shutdown().await {
        warn!(error = %e, "Closing browser sessions failed");
    }
    info!("Gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tower::ServiceExt;
    use wabridge_browser::{BrowserDriver, BrowserHandle};
    use wabridge_core::WhatsAppConfig;

    struct NoBrowser;

    #[async_trait]
    impl BrowserDriver for NoBrowser {
        async fn launch(&self, _session: &str) -> wabridge_core::Result<Arc<dyn BrowserHandle>> {
            Err(Error::Launch("no browser available".to_string()))
        }
    }

    fn app(dir: &tempfile::TempDir, credentials: Option<(&str, &str)>) -> Router {
        let paths = Paths::with_base(dir.path().to_path_buf());
        let service = WhatsAppService::new(
            WhatsAppConfig::default(),
            &paths,
            Arc::new(NoBrowser),
            Arc::new(SystemProcesses),
        )
        .unwrap();
        build_router(GatewayState {
            service: Arc::new(service),
            credentials: credentials.map(|(u, p)| Arc::new((u.to_string(), p.to_string()))),
        })
    }

    fn basic(user: &str, pass: &str) -> String {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
        format!("Basic {}", encoded)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, basic("admin", "s3cret"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_secure_eq() {
        assert!(secure_eq("abc", "abc"));
        assert!(!secure_eq("abc", "abd"));
        assert!(!secure_eq("abc", "ab"));
    }

    #[test]
    fn test_parse_basic_auth() {
        assert_eq!(
            parse_basic_auth(&basic("admin", "pa:ss")),
            Some(("admin".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
    }

    #[tokio::test]
    async fn test_missing_credentials_are_challenged() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(
                Request::builder()
                    .uri("/api/whatsapp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"401\""
        );
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(
                Request::builder()
                    .uri("/api/whatsapp")
                    .header(header::AUTHORIZATION, basic("admin", "nope"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unconfigured_credentials_deny_everything() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(&dir, None)
            .oneshot(
                Request::builder()
                    .uri("/api/whatsapp")
                    .header(header::AUTHORIZATION, basic("", ""))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_banner() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(
                Request::builder()
                    .uri("/api/whatsapp")
                    .header(header::AUTHORIZATION, basic("admin", "s3cret"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], BANNER.as_bytes());
    }

    #[tokio::test]
    async fn test_missing_fields_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(post_json("/api/whatsapp/terminate", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["message"], "Token is required");

        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(post_json(
                "/api/whatsapp/message",
                json!({ "token": "abc", "chatId": "+55 11 98888-7777" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(post_json("/api/whatsapp/new_messages", json!({ "token": "abc" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await["message"],
            "Token and totalChats are required"
        );
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(post_json(
                "/api/whatsapp/contacts",
                json!({ "token": "ghost", "contactName": "Ana" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"], "Invalid token");

        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(
                Request::builder()
                    .uri("/api/whatsapp/message?token=ghost&chatId=x&visibleName=Me")
                    .header(header::AUTHORIZATION, basic("admin", "s3cret"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_qr_code_launch_failure_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(&dir, Some(("admin", "s3cret")))
            .oneshot(
                Request::builder()
                    .uri("/api/whatsapp/qr_code")
                    .header(header::AUTHORIZATION, basic("admin", "s3cret"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers().get(SESSION_TOKEN_HEADER).is_none());
    }
}
