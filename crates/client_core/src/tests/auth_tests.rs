use super::*;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::net::TcpListener;

fn token_for(user_id: &str, exp: i64) -> String {
    let claims = TokenClaims {
        sub: None,
        user_id: Some(UserId::new(user_id)),
        email: Some(format!("{user_id}@example.test")),
        role: Some("Customer".into()),
        exp: Some(exp),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"backend-only-secret"),
    )
    .expect("encode token")
}

#[derive(Clone)]
struct LoginState {
    body: Value,
}

async fn handle_login(
    State(state): State<LoginState>,
    Json(request): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if request["password"] == "hunter2" {
        (StatusCode::OK, Json(state.body))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Email or password is incorrect" })),
        )
    }
}

async fn spawn_login_server(body: Value) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let app = Router::new()
        .route("/api/Auth/login", post(handle_login))
        .with_state(LoginState { body });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}/api")
}

async fn auth_session(base: &str) -> (AuthSession, LocalStore, Arc<HttpTransport>) {
    let store = LocalStore::new("sqlite::memory:").await.expect("db");
    let http = Arc::new(HttpTransport::new(base, Duration::from_secs(5)).expect("transport"));
    (AuthSession::new(store.clone(), http.clone()), store, http)
}

#[test]
fn claims_are_read_without_the_signing_key() {
    let exp = Utc::now().timestamp() + 3600;
    let claims = decode_claims(&token_for("42", exp)).expect("claims");
    assert_eq!(claims.subject(), Some(&UserId::new("42")));
    assert_eq!(claims.email.as_deref(), Some("42@example.test"));
    assert_eq!(claims.exp, Some(exp));
    assert!(!is_token_expired(&token_for("42", exp)));
}

#[test]
fn expired_and_garbage_tokens_count_as_expired() {
    assert!(is_token_expired(&token_for("42", Utc::now().timestamp() - 60)));
    assert!(is_token_expired("not-a-jwt"));
    assert!(decode_claims("not-a-jwt").is_none());
}

#[test]
fn sub_claim_wins_over_user_id() {
    let claims = TokenClaims {
        sub: Some(UserId::new("sub-id")),
        user_id: Some(UserId::new("user-id")),
        ..TokenClaims::default()
    };
    assert_eq!(claims.subject(), Some(&UserId::new("sub-id")));
}

#[tokio::test]
async fn sign_in_stores_token_and_claims() {
    let token = token_for("7", Utc::now().timestamp() + 3600);
    let base = spawn_login_server(json!({ "token": token })).await;
    let (auth, store, http) = auth_session(&base).await;

    let claims = auth
        .sign_in(" renter@example.test ", "hunter2")
        .await
        .expect("sign in");

    assert_eq!(claims.subject(), Some(&UserId::new("7")));
    assert_eq!(store.auth_token().await.expect("token"), Some(token));
    let stored: TokenClaims = store
        .user_data()
        .await
        .expect("user data")
        .expect("present");
    assert_eq!(stored, claims);
    assert!(http.has_token().await);
    assert_eq!(
        auth.current_user_id().await.expect("current user"),
        Some(UserId::new("7"))
    );
}

#[tokio::test]
async fn bare_string_login_response_is_accepted() {
    let token = token_for("9", Utc::now().timestamp() + 3600);
    let base = spawn_login_server(Value::String(token.clone())).await;
    let (auth, store, _http) = auth_session(&base).await;

    auth.sign_in("renter@example.test", "hunter2")
        .await
        .expect("sign in");
    assert_eq!(store.auth_token().await.expect("token"), Some(token));
}

#[tokio::test]
async fn rejected_credentials_leave_nothing_stored() {
    let base = spawn_login_server(json!({ "token": "unused" })).await;
    let (auth, store, http) = auth_session(&base).await;

    let err = auth
        .sign_in("renter@example.test", "wrong")
        .await
        .expect_err("rejected");
    assert!(matches!(err, AuthError::Transport(_)));
    assert!(err.to_string().contains("Email or password is incorrect"));
    assert_eq!(store.auth_token().await.expect("token"), None);
    assert!(!http.has_token().await);

    assert!(matches!(
        auth.sign_in("  ", "hunter2").await,
        Err(AuthError::MissingCredentials)
    ));
}

#[tokio::test]
async fn empty_token_is_reported() {
    let base = spawn_login_server(json!({ "token": "" })).await;
    let (auth, store, _http) = auth_session(&base).await;

    assert!(matches!(
        auth.sign_in("renter@example.test", "hunter2").await,
        Err(AuthError::MissingToken)
    ));
    assert_eq!(store.auth_token().await.expect("token"), None);
}

#[tokio::test]
async fn restore_clears_an_expired_session() {
    let (auth, store, http) = auth_session("http://127.0.0.1:9/api").await;
    store
        .set_auth_token(&token_for("7", Utc::now().timestamp() - 10))
        .await
        .expect("seed token");

    assert_eq!(auth.restore().await.expect("restore"), None);
    assert_eq!(store.auth_token().await.expect("token"), None);
    assert!(!http.has_token().await);
}

#[tokio::test]
async fn restore_reuses_a_live_session_and_sign_out_forgets_it() {
    let (auth, store, http) = auth_session("http://127.0.0.1:9/api").await;
    store
        .set_auth_token(&token_for("7", Utc::now().timestamp() + 600))
        .await
        .expect("seed token");

    let claims = auth.restore().await.expect("restore").expect("session");
    assert_eq!(claims.subject(), Some(&UserId::new("7")));
    assert!(http.has_token().await);

    auth.sign_out().await.expect("sign out");
    assert_eq!(store.auth_token().await.expect("token"), None);
    assert!(!http.has_token().await);
    assert_eq!(auth.current_user_id().await.expect("current user"), None);
}
