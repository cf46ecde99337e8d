use api::{AppState, config::Config, create_router};
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::ServiceExt;

use api::db::schedules::{ScheduleInput, create_schedule};
use api::db::users::create_user;
use nightwatch_core::CronCache;
use nightwatch_core::models::Role;
use nightwatch_core::types::ScheduleId;

use axum::extract::ConnectInfo;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

fn test_state(pool: SqlitePool) -> AppState {
    AppState {
        pool,
        cron_cache: CronCache::new(),
        config: Arc::new(Config::for_tests()),
    }
}

fn request(method: &str, uri: impl AsRef<str>, body: Body) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri.as_ref())
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();

    req.extensions_mut().insert(ConnectInfo(SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        8080,
    )));
    req
}

fn authed_request(method: &str, uri: impl AsRef<str>, token: &str, body: Body) -> Request<Body> {
    let mut req = request(method, uri, body);
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    req
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Seed the May 2025 Friday patrol and a volunteer, returning a session token
async fn seed_and_login(pool: &SqlitePool, app: &axum::Router, phone: &str) -> (ScheduleId, String) {
    let schedule = create_schedule(
        pool,
        ScheduleInput {
            name: "Friday evening patrol".to_string(),
            cron_expr: "0 18 * * 5".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 5, 1),
            end_date: NaiveDate::from_ymd_opt(2025, 5, 31),
            duration_minutes: 120,
            timezone: "Africa/Johannesburg".to_string(),
        },
    )
    .await
    .unwrap();

    create_user(pool, phone, "Volunteer", Role::Owl).await.unwrap();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/auth/dev-login",
            Body::from(json!({"phone": phone}).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["token"].as_str().unwrap().to_string();

    (schedule.id, token)
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_register_verify_and_session(pool: SqlitePool) {
    let app = create_router(test_state(pool.clone()), "*");

    // Register a new phone
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/auth/register",
            Body::from(json!({"phone": "+27821234567", "name": "Thandi"}).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    // Response reveals nothing about whether the number was known
    assert!(body["message"].as_str().unwrap().contains("login code"));

    // An SMS outbox row was committed with the registration
    let sms_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE kind = 'sms'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(sms_count, 1);

    // Dev mode: any six digit code verifies
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/auth/verify",
            Body::from(json!({"phone": "+27821234567", "code": "000000"}).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    let token = body_json(response).await["token"].as_str().unwrap().to_string();

    // The token works as a bearer credential
    let response = app
        .clone()
        .oneshot(authed_request("GET", "/bookings/my", &token, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Without credentials the same endpoint is 401
    let response = app
        .clone()
        .oneshot(request("GET", "/bookings/my", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_malformed_phone_is_rejected(pool: SqlitePool) {
    let app = create_router(test_state(pool), "*");

    let response = app
        .oneshot(request(
            "POST",
            "/api/auth/register",
            Body::from(json!({"phone": "0821234567"}).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["validation_errors"][0]["field"], "phone");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_double_booking_conflict(pool: SqlitePool) {
    let app = create_router(test_state(pool.clone()), "*");
    let (schedule_id, alice) = seed_and_login(&pool, &app, "+27821230001").await;

    create_user(&pool, "+27821230002", "Bob", Role::Owl).await.unwrap();
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/auth/dev-login",
            Body::from(json!({"phone": "+27821230002"}).to_string()),
        ))
        .await
        .unwrap();
    let bob = body_json(response).await["token"].as_str().unwrap().to_string();

    // 2025-05-09T18:00:00+02:00
    let booking_body = json!({
        "schedule_id": schedule_id,
        "start_time": "2025-05-09T18:00:00+02:00",
    })
    .to_string();

    let response = app
        .clone()
        .oneshot(authed_request(
            "POST",
            "/bookings",
            &alice,
            Body::from(booking_body.clone()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["shift_start"], "2025-05-09T16:00:00Z");

    let response = app
        .clone()
        .oneshot(authed_request(
            "POST",
            "/bookings",
            &bob,
            Body::from(booking_body),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "RESOURCE_CONFLICT");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_misaligned_occurrence_is_flagged(pool: SqlitePool) {
    let app = create_router(test_state(pool.clone()), "*");
    let (schedule_id, token) = seed_and_login(&pool, &app, "+27821230001").await;

    // 2025-05-07 is a Wednesday
    let response = app
        .oneshot(authed_request(
            "POST",
            "/bookings",
            &token,
            Body::from(
                json!({
                    "schedule_id": schedule_id,
                    "start_time": "2025-05-07T18:00:00+02:00",
                })
                .to_string(),
            ),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["validation_errors"][0]["field"], "start_time");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_cancellation_window_refusal(pool: SqlitePool) {
    let app = create_router(test_state(pool.clone()), "*");
    let (schedule_id, token) = seed_and_login(&pool, &app, "+27821230001").await;

    let user_id: uuid::Uuid = sqlx::query_scalar("SELECT id FROM users")
        .fetch_one(&pool)
        .await
        .unwrap();

    // A booking starting within the two hour cancellation window
    let booking_id = uuid::Uuid::new_v4();
    let start = Utc::now() + Duration::hours(1);
    sqlx::query(
        r#"
        INSERT INTO bookings (id, user_id, schedule_id, shift_start, shift_end, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(booking_id)
    .bind(user_id)
    .bind(schedule_id)
    .bind(start)
    .bind(start + Duration::hours(2))
    .bind(Utc::now())
    .execute(&pool)
    .await
    .unwrap();

    let response = app
        .oneshot(authed_request(
            "DELETE",
            format!("/bookings/{booking_id}"),
            &token,
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_available_slots_listing(pool: SqlitePool) {
    let app = create_router(test_state(pool.clone()), "*");
    let (_, token) = seed_and_login(&pool, &app, "+27821230001").await;

    let uri = "/shifts/available?from=2025-05-01T00:00:00Z&to=2025-05-31T23:59:59Z&limit=50";
    let response = app
        .clone()
        .oneshot(request("GET", uri, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let slots = body_json(response).await;
    assert_eq!(slots.as_array().unwrap().len(), 5);

    // Book one and watch it drop out
    let response = app
        .clone()
        .oneshot(authed_request(
            "POST",
            "/bookings",
            &token,
            Body::from(
                json!({
                    "schedule_id": slots[0]["schedule_id"],
                    "start_time": slots[0]["start_time"],
                })
                .to_string(),
            ),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(request("GET", uri, Body::empty()))
        .await
        .unwrap();
    let slots_after = body_json(response).await;
    assert_eq!(slots_after.as_array().unwrap().len(), 4);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_admin_guard(pool: SqlitePool) {
    let app = create_router(test_state(pool.clone()), "*");
    let (_, owl_token) = seed_and_login(&pool, &app, "+27821230001").await;

    let response = app
        .clone()
        .oneshot(authed_request(
            "GET",
            "/api/admin/users",
            &owl_token,
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    create_user(&pool, "+27820000009", "Admin", Role::Admin)
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/auth/dev-login",
            Body::from(json!({"phone": "+27820000009"}).to_string()),
        ))
        .await
        .unwrap();
    let admin_token = body_json(response).await["token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(authed_request(
            "GET",
            "/api/admin/users",
            &admin_token,
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let users = body_json(response).await;
    assert_eq!(users.as_array().unwrap().len(), 2);

    // Admin mutations land in the audit trail
    let response = app
        .clone()
        .oneshot(authed_request(
            "POST",
            "/api/admin/schedules",
            &admin_token,
            Body::from(
                json!({
                    "name": "Midnight patrol",
                    "cron_expr": "0 0 * * 6",
                    "duration_minutes": 180,
                })
                .to_string(),
            ),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(authed_request(
            "GET",
            "/api/admin/audit-events?type=schedule.created",
            &admin_token,
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events = body_json(response).await;
    assert_eq!(events.as_array().unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_health_endpoint(pool: SqlitePool) {
    let app = create_router(test_state(pool), "*");

    let response = app
        .oneshot(request("GET", "/health", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}
