//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use kwacha_core::ai::{AIClient, MockBackend};
use kwacha_core::db::Database;
use kwacha_core::MockPush;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "test-secret".to_string();
    config.firebase.credentials_path = None;
    config
}

struct TestApp {
    app: Router,
    db: Database,
    push: MockPush,
}

fn setup_with(config: Config, ai: Option<MockBackend>, push: bool) -> TestApp {
    let db = Database::in_memory().unwrap();
    let mock_push = MockPush::new();
    let generator = ai.map(|backend| {
        Arc::new(InsightGenerator::new(AIClient::Mock(backend))) as Arc<dyn InsightProvider>
    });
    let push_client = push.then(|| PushClient::Mock(mock_push.clone()));
    let state = AppState::with_services(db.clone(), config, generator, push_client);
    TestApp {
        app: create_router_with_state(Arc::new(state)),
        db,
        push: mock_push,
    }
}

fn setup_test_app() -> TestApp {
    setup_with(test_config(), Some(MockBackend::new()), true)
}

async fn get_body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// Register a device and return (user_id, token)
async fn register(app: &Router, device_id: &str) -> (i64, String) {
    let (status, json) = send(
        app,
        json_request(
            "POST",
            "/api/v1/register",
            None,
            json!({"device_id": device_id, "fcm_token": format!("fcm-{}", device_id), "operator": "MTN"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (
        json["user_id"].as_i64().unwrap(),
        json["token"].as_str().unwrap().to_string(),
    )
}

async fn give_consent(app: &Router, token: &str) {
    let (status, _) = send(
        app,
        json_request("PUT", "/api/v1/consent", Some(token), json!({"consent_given": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

fn txn(hash: i64, kind: &str, category: &str, amount: f64) -> Value {
    json!({
        "amount": amount,
        "type": kind,
        "category": category,
        "operator": "MTN",
        "sms_hash": hash,
        "date": Utc::now().timestamp_millis() - 60_000,
    })
}

async fn sync(app: &Router, token: &str, transactions: Vec<Value>) -> (StatusCode, Value) {
    send(
        app,
        json_request(
            "POST",
            "/api/v1/sync",
            Some(token),
            json!({"device_id": "ignored", "transactions": transactions}),
        ),
    )
    .await
}

// ========== Health ==========

#[tokio::test]
async fn test_health() {
    let t = setup_test_app();
    let response = t.app.clone().oneshot(get_request("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["ai_enabled"], true);
    assert_eq!(json["push_enabled"], true);
}

#[tokio::test]
async fn test_health_without_services() {
    let t = setup_with(test_config(), None, false);
    let (status, json) = send(&t.app, get_request("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ai_enabled"], false);
    assert_eq!(json["push_enabled"], false);
}

// ========== Registration & Auth ==========

#[tokio::test]
async fn test_register_new_and_returning_device() {
    let t = setup_test_app();

    let (status, first) = send(
        &t.app,
        json_request("POST", "/api/v1/register", None, json!({"device_id": "phone-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["is_new_user"], true);
    assert_eq!(first["expires_in"], 720 * 3600);
    assert!(!first["token"].as_str().unwrap().is_empty());

    let (_, second) = send(
        &t.app,
        json_request("POST", "/api/v1/register", None, json!({"device_id": "phone-1"})),
    )
    .await;
    assert_eq!(second["is_new_user"], false);
    assert_eq!(second["user_id"], first["user_id"]);
}

#[tokio::test]
async fn test_register_requires_device_id() {
    let t = setup_test_app();

    let (status, json) = send(
        &t.app,
        json_request("POST", "/api/v1/register", None, json!({"device_id": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "device_id is required");

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/register")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_device_routes_require_token() {
    let t = setup_test_app();

    let (status, json) = send(&t.app, get_request("/api/v1/transactions", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Authorization header required");

    let (status, json) = send(&t.app, get_request("/api/v1/transactions", Some("garbage"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid or expired token");
}

#[tokio::test]
async fn test_token_from_other_secret_rejected() {
    let t = setup_test_app();
    let mut other = test_config();
    other.auth.jwt_secret = "another-secret".to_string();
    let forged = issue_token_for_test(&other, 1);

    let (status, _) = send(&t.app, get_request("/api/v1/insights", Some(&forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

fn issue_token_for_test(config: &Config, user_id: i64) -> String {
    kwacha_core::issue_token(&config.auth, user_id, "phone", Utc::now())
        .unwrap()
        .token
}

// ========== Consent & Sync ==========

#[tokio::test]
async fn test_sync_requires_consent() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;

    let (status, json) = sync(&t.app, &token, vec![txn(1, "EXPENSE", "Food", 10.0)]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "User consent required before processing data");
}

#[tokio::test]
async fn test_consent_requires_flag() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;

    let (status, json) = send(
        &t.app,
        json_request("PUT", "/api/v1/consent", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "consent_given is required");
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;

    let batch = vec![
        txn(1, "EXPENSE", "Food", 50.0),
        txn(2, "INCOME", "Salary", 1000.0),
    ];
    let (status, json) = sync(&t.app, &token, batch.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Sync completed");
    assert_eq!(json["inserted"], 2);
    assert_eq!(json["skipped"], 0);
    assert_eq!(json["total"], 2);

    let (_, json) = sync(&t.app, &token, batch).await;
    assert_eq!(json["inserted"], 0);
    assert_eq!(json["skipped"], 2);

    let (_, json) = send(&t.app, get_request("/api/v1/transactions", Some(&token))).await;
    assert_eq!(json["transactions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_sync_skips_bad_type() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;

    let (status, json) = sync(
        &t.app,
        &token,
        vec![txn(1, "EXPENSE", "Food", 5.0), txn(2, "REFUND", "Other", 5.0)],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["inserted"], 1);
    assert_eq!(json["skipped"], 1);
}

#[tokio::test]
async fn test_transactions_are_per_user() {
    let t = setup_test_app();
    let (_, alice) = register(&t.app, "alice").await;
    let (_, bob) = register(&t.app, "bob").await;
    give_consent(&t.app, &alice).await;
    give_consent(&t.app, &bob).await;

    // Same sms_hash on two devices is two transactions
    sync(&t.app, &alice, vec![txn(7, "EXPENSE", "Food", 5.0)]).await;
    let (_, json) = sync(&t.app, &bob, vec![txn(7, "EXPENSE", "Food", 5.0)]).await;
    assert_eq!(json["inserted"], 1);

    let (_, json) = send(&t.app, get_request("/api/v1/transactions", Some(&bob))).await;
    let rows = json["transactions"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_transactions_pagination_clamped() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;
    let batch: Vec<Value> = (1..=5).map(|h| txn(h, "EXPENSE", "Food", h as f64)).collect();
    sync(&t.app, &token, batch).await;

    let (status, json) = send(
        &t.app,
        get_request("/api/v1/transactions?limit=1000&offset=-3", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["limit"], 100);
    assert_eq!(json["offset"], 0);
    assert_eq!(json["transactions"].as_array().unwrap().len(), 5);

    let (_, json) = send(
        &t.app,
        get_request("/api/v1/transactions?limit=2&offset=4", Some(&token)),
    )
    .await;
    assert_eq!(json["transactions"].as_array().unwrap().len(), 1);
}

// ========== Analytics ==========

#[tokio::test]
async fn test_analytics_summary() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;
    sync(
        &t.app,
        &token,
        vec![
            txn(1, "INCOME", "Salary", 1000.0),
            txn(2, "EXPENSE", "Food", 200.0),
            txn(3, "EXPENSE", "Transport", 50.0),
        ],
    )
    .await;

    let (status, json) = send(&t.app, get_request("/api/v1/analytics/summary", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["period"], "monthly");
    assert_eq!(json["total_income"], 1000.0);
    assert_eq!(json["total_expenses"], 250.0);
    assert_eq!(json["net_balance"], 750.0);
    assert_eq!(json["transaction_count"], 3);
    assert_eq!(json["by_category"]["Food"], 200.0);
}

#[tokio::test]
async fn test_analytics_invalid_period() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;

    let (status, _) = send(
        &t.app,
        get_request("/api/v1/analytics/summary?period=fortnight", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analytics_trends() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;
    sync(&t.app, &token, vec![txn(1, "EXPENSE", "Food", 20.0)]).await;

    let (status, json) = send(&t.app, get_request("/api/v1/analytics/trends", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["period"], "weekly");
    let trends = json["trends"].as_array().unwrap();
    assert!(!trends.is_empty());
    let total: f64 = trends.iter().map(|p| p["expenses"].as_f64().unwrap()).sum();
    assert_eq!(total, 20.0);
}

// ========== Insights ==========

#[tokio::test]
async fn test_generate_insights() {
    let t = setup_test_app();
    let (_, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;
    sync(
        &t.app,
        &token,
        vec![txn(1, "INCOME", "Salary", 500.0), txn(2, "EXPENSE", "Food", 120.0)],
    )
    .await;

    let (status, json) = send(
        &t.app,
        json_request("POST", "/api/v1/insights/generate", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["period"], "daily");
    assert_eq!(json["analyzed"], 2);
    assert_eq!(json["fallback"], false);
    let insights = json["insights"].as_array().unwrap();
    assert!(!insights.is_empty() && insights.len() <= 3);
    assert_eq!(insights[0]["title"], "Food is your top spend");

    let (_, json) = send(&t.app, get_request("/api/v1/insights", Some(&token))).await;
    assert_eq!(json["insights"].as_array().unwrap().len(), insights.len());
}

#[tokio::test]
async fn test_generate_insights_empty_window() {
    let ai = MockBackend::new();
    let t = setup_with(test_config(), Some(ai.clone()), false);
    let (_, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;

    let (status, json) = send(
        &t.app,
        json_request("POST", "/api/v1/insights/generate", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "No transactions to analyze");
    assert_eq!(json["insights"].as_array().unwrap().len(), 0);
    assert_eq!(ai.calls(), 0);
}

#[tokio::test]
async fn test_generate_insights_falls_back_on_ai_failure() {
    let t = setup_with(test_config(), Some(MockBackend::failing()), false);
    let (user_id, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;
    sync(
        &t.app,
        &token,
        vec![txn(1, "INCOME", "Salary", 500.0), txn(2, "EXPENSE", "Food", 100.0)],
    )
    .await;

    let (status, json) = send(
        &t.app,
        json_request("POST", "/api/v1/insights/generate", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fallback"], true);
    let titles: Vec<&str> = json["insights"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"📈 Positive Balance"));

    let stored = t.db.recent_insights(user_id, 10).unwrap();
    assert_eq!(stored.rows.len(), titles.len());
}

#[tokio::test]
async fn test_generate_insights_without_ai() {
    let t = setup_with(test_config(), None, false);
    let (_, token) = register(&t.app, "phone-1").await;

    let (status, _) = send(
        &t.app,
        json_request("POST", "/api/v1/insights/generate", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ========== Data deletion ==========

#[tokio::test]
async fn test_delete_data() {
    let t = setup_test_app();
    let (user_id, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;
    sync(&t.app, &token, vec![txn(1, "EXPENSE", "Food", 5.0)]).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/v1/data")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "All user data deleted");
    assert!(t.db.get_user(user_id).unwrap().is_none());

    // Registering again starts a fresh account
    let (_, json) = send(
        &t.app,
        json_request("POST", "/api/v1/register", None, json!({"device_id": "phone-1"})),
    )
    .await;
    assert_eq!(json["is_new_user"], true);
}

// ========== Rate limiting ==========

#[tokio::test]
async fn test_rate_limit() {
    let mut config = test_config();
    config.server.rate_limit_per_minute = 2;
    let t = setup_with(config, None, false);

    for _ in 0..2 {
        let (status, _) = send(&t.app, get_request("/api/v1/insights", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, json) = send(&t.app, get_request("/api/v1/insights", None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"], "Rate limit exceeded. Please try again later.");

    // Health and admin routes are not limited
    let (status, _) = send(&t.app, get_request("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
}

// ========== Admin ==========

fn admin_config() -> Config {
    let mut config = test_config();
    config.server.admin_api_keys = vec!["admin-key".to_string()];
    config
}

#[tokio::test]
async fn test_admin_requires_key_when_configured() {
    let t = setup_with(admin_config(), Some(MockBackend::new()), true);

    let (status, _) = send(&t.app, get_request("/admin/api/stats", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&t.app, get_request("/admin/api/stats", Some("wrong-key"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = send(&t.app, get_request("/admin/api/stats", Some("admin-key"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_users"], 0);
}

#[tokio::test]
async fn test_admin_device_token_is_not_admin_key() {
    let t = setup_with(admin_config(), None, false);
    let (_, token) = register(&t.app, "phone-1").await;

    let (status, _) = send(&t.app, get_request("/admin/api/users", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_listings() {
    let t = setup_test_app();
    let (user_id, token) = register(&t.app, "phone-1").await;
    register(&t.app, "phone-2").await;
    give_consent(&t.app, &token).await;
    sync(
        &t.app,
        &token,
        vec![txn(1, "EXPENSE", "Food", 10.0), txn(2, "EXPENSE", "Airtime", 3.0)],
    )
    .await;

    let (status, json) = send(&t.app, get_request("/admin/api/users", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);

    let (_, json) = send(&t.app, get_request("/admin/api/users?filter=synced", None)).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["items"][0]["transaction_count"], 2);

    let (status, _) = send(&t.app, get_request("/admin/api/users?filter=bogus", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, json) = send(
        &t.app,
        get_request(
            &format!("/admin/api/transactions?user_id={}&category=Food", user_id),
            None,
        ),
    )
    .await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["items"][0]["device_id"], "phone-1");

    let (status, _) = send(
        &t.app,
        get_request("/admin/api/transactions?date_from=yesterday", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&t.app, get_request("/admin/api/insights", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn test_admin_trigger_insights() {
    let mut config = test_config();
    config.scheduler.user_delay_ms = 0;
    let t = setup_with(config, Some(MockBackend::new()), true);
    let (user_id, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;
    sync(&t.app, &token, vec![txn(1, "EXPENSE", "Food", 80.0)]).await;

    let (status, json) = send(
        &t.app,
        json_request("POST", "/admin/api/trigger-insights", None, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["message"], "Analysis triggered for all users");

    // The sweep runs in the background
    tokio::time::timeout(Duration::from_secs(5), async {
        while t.push.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let sent = t.push.sent();
    assert_eq!(sent[0].token, "fcm-phone-1");
    assert_eq!(sent[0].title, "Food is your top spend");
    assert!(!t.db.recent_insights(user_id, 10).unwrap().rows.is_empty());
}

#[tokio::test]
async fn test_admin_trigger_rejected_while_sweep_runs() {
    let mut config = test_config();
    // The sweep sleeps after each user, keeping it in flight after the push
    config.scheduler.user_delay_ms = 300;
    let t = setup_with(config, Some(MockBackend::new()), true);
    let (_, token) = register(&t.app, "phone-1").await;
    give_consent(&t.app, &token).await;
    sync(&t.app, &token, vec![txn(1, "EXPENSE", "Food", 80.0)]).await;

    let trigger = || json_request("POST", "/admin/api/trigger-insights", None, json!({}));
    let (status, _) = send(&t.app, trigger()).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    tokio::time::timeout(Duration::from_secs(5), async {
        while t.push.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let (status, json) = send(&t.app, trigger()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "An insight sweep is already running");
    assert_eq!(t.push.sent().len(), 1);

    // Once the first sweep finishes a new one is accepted
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (status, _) = send(&t.app, trigger()).await;
            if status == StatusCode::ACCEPTED {
                break;
            }
            assert_eq!(status, StatusCode::CONFLICT);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_admin_trigger_without_ai() {
    let t = setup_with(test_config(), None, false);
    let request = Request::builder()
        .method("POST")
        .uri("/admin/api/trigger-insights")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_admin_broadcast() {
    let t = setup_test_app();
    let (_, a) = register(&t.app, "phone-1").await;
    register(&t.app, "phone-2").await;
    give_consent(&t.app, &a).await;

    let (status, json) = send(
        &t.app,
        json_request(
            "POST",
            "/admin/api/broadcast",
            None,
            json!({"title": "Hello", "body": "New feature", "target": "all"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["message"], "Broadcasting notification");
    assert_eq!(json["count"], 2);

    tokio::time::timeout(Duration::from_secs(5), async {
        while t.push.sent().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(t.push.sent().iter().all(|p| p.title == "Hello"));
}

#[tokio::test]
async fn test_admin_broadcast_validation() {
    let t = setup_test_app();

    // No registered devices yet
    let (status, json) = send(
        &t.app,
        json_request(
            "POST",
            "/admin/api/broadcast",
            None,
            json!({"title": "Hi", "body": "There"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No tokens found");

    let (status, _) = send(
        &t.app,
        json_request(
            "POST",
            "/admin/api/broadcast",
            None,
            json!({"title": "Hi", "body": "There", "target": "specific"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let later = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
    let (status, _) = send(
        &t.app,
        json_request(
            "POST",
            "/admin/api/broadcast",
            None,
            json!({"title": "Hi", "body": "There", "scheduled_for": later}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let no_push = setup_with(test_config(), None, false);
    let (status, _) = send(
        &no_push.app,
        json_request(
            "POST",
            "/admin/api/broadcast",
            None,
            json!({"title": "Hi", "body": "There"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_admin_notify() {
    let t = setup_test_app();

    let (status, json) = send(
        &t.app,
        json_request(
            "POST",
            "/admin/api/notify",
            None,
            json!({"token": "device-token", "title": "Ping", "body": "Test"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(t.push.sent()[0].token, "device-token");

    t.push.fail_token("bad-token");
    let (status, json) = send(
        &t.app,
        json_request(
            "POST",
            "/admin/api/notify",
            None,
            json!({"token": "bad-token", "title": "Ping", "body": "Test"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "Failed to send notification");
}

// ========== Helpers ==========

#[test]
fn test_parse_trusted_networks() {
    let nets = parse_trusted_networks("10.0.0.0/8, 192.168.1.1, not-an-ip, ::1");
    assert_eq!(nets.len(), 3);
    assert!(nets[0].contains(&"10.1.2.3".parse::<std::net::IpAddr>().unwrap()));
}

#[test]
fn test_client_ip_respects_trusted_proxies() {
    let proxy: SocketAddr = "10.0.0.5:4000".parse().unwrap();
    let direct: SocketAddr = "203.0.113.9:4000".parse().unwrap();
    let trusted = parse_trusted_networks("10.0.0.0/8");

    let request = Request::builder()
        .header("x-forwarded-for", "198.51.100.7, 10.0.0.5")
        .body(Body::empty())
        .unwrap();

    let via_proxy = get_client_ip(&request, Some(&ConnectInfo(proxy)), &trusted);
    assert_eq!(via_proxy, Some("198.51.100.7".parse().unwrap()));

    let spoofed = get_client_ip(&request, Some(&ConnectInfo(direct)), &trusted);
    assert_eq!(spoofed, Some("203.0.113.9".parse().unwrap()));

    assert_eq!(get_client_ip(&request, None, &trusted), None);
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["alpha".to_string(), "beta".to_string()];
    assert!(validate_api_key("beta", &keys));
    assert!(!validate_api_key("gamma", &keys));
    assert!(!validate_api_key("alph", &keys));
}
