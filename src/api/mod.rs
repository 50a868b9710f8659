pub mod auth;
mod bookings;
mod buddies;
mod conversations;
mod destinations;
pub mod error;
pub mod metrics;
pub mod rate_limit;
mod reviews;
mod users;
pub mod validation;
mod ws;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public apart from logout and me)
    let auth_routes = Router::new()
        .route("/send-otp", post(auth::send_otp))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // API routes. Handlers that need a user take the `AuthUser` extractor.
    let api_routes = Router::new()
        // Buddies
        .route("/buddies", get(buddies::list_buddies))
        .route("/buddies/me", put(buddies::update_my_profile))
        .route("/buddies/:id", get(buddies::get_buddy))
        .route("/buddies/:id/availability", get(buddies::get_availability))
        .route("/buddies/:id/reviews", get(buddies::list_buddy_reviews))
        // Bookings
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/status", put(bookings::update_booking_status))
        .route("/bookings/:id/payment", put(bookings::update_payment_status))
        .route("/bookings/user/:user_id", get(bookings::list_user_bookings))
        // Reviews
        .route("/reviews", post(reviews::create_review))
        // Reference data
        .route("/destinations", get(destinations::list_destinations))
        .route("/destinations/:id", get(destinations::get_destination))
        .route("/activities", get(destinations::list_activities))
        // Conversations and messages
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/:id/messages",
            get(conversations::list_messages).post(conversations::post_message),
        )
        .route("/conversations/:id/read", put(conversations::mark_read))
        .route(
            "/messages/:id",
            put(conversations::edit_message).delete(conversations::delete_message),
        )
        .route("/messages/:id/reactions", post(conversations::react_to_message))
        // User administration
        .route("/users/:id/deactivate", put(users::deactivate_user))
        .route("/users/:id/activate", put(users::activate_user))
        // Chat socket (token via query param or cookie)
        .route("/ws", get(ws::chat_ws))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Browser clients send cookies, so configured origins get credentials.
/// With no origins configured any origin is allowed, without credentials.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_support::{insert_user, test_pool};
    use crate::db::{User, UserRole};
    use auth::{hash_token, issue_token, TokenKind};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn access_token(state: &AppState, user_id: &str) -> String {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&state.db)
            .await
            .unwrap();
        issue_token(&state.config.auth, &user, TokenKind::Access).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (pool, _dir) = test_pool().await;
        let app = create_router(Arc::new(AppState::new(Config::default(), pool)));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let (pool, _dir) = test_pool().await;
        let app = create_router(Arc::new(AppState::new(Config::default(), pool)));

        let response = app
            .oneshot(Request::get("/api/conversations").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_public_reference_data() {
        let (pool, _dir) = test_pool().await;
        let app = create_router(Arc::new(AppState::new(Config::default(), pool)));

        let response = app
            .oneshot(Request::get("/api/destinations/hanoi").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "Hanoi");
    }

    #[tokio::test]
    async fn test_otp_signup_then_me_with_cookie() {
        let (pool, _dir) = test_pool().await;
        let state = Arc::new(AppState::new(Config::default(), pool));
        state.kv.set_ex(
            "otp:lan@example.com".to_string(),
            hash_token("123456"),
            Duration::from_secs(300),
        );
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/verify-otp",
                None,
                json!({
                    "email": "Lan@Example.com",
                    "otp": "123456",
                    "name": "Lan",
                    "password": "correct-horse",
                    "role": "tour-guide",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or_default().to_string())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("accessToken=")));
        assert!(cookies.iter().any(|c| c.starts_with("refreshToken=")));

        let body = body_json(response).await;
        assert_eq!(body["user"]["role"], "tour-guide");

        // The code is single-use
        assert!(state.kv.get("otp:lan@example.com").is_none());

        let response = app
            .oneshot(
                Request::get("/api/auth/me")
                    .header(header::COOKIE, cookies.join("; "))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["email"], "lan@example.com");
    }

    #[tokio::test]
    async fn test_otp_is_discarded_after_repeated_wrong_codes() {
        let (pool, _dir) = test_pool().await;
        let state = Arc::new(AppState::new(Config::default(), pool));
        state.kv.set_ex(
            "otp:hoa@example.com".to_string(),
            hash_token("123456"),
            Duration::from_secs(300),
        );
        let app = create_router(state.clone());

        let signup = |otp: &str| {
            json_request(
                "POST",
                "/api/auth/verify-otp",
                None,
                json!({
                    "email": "hoa@example.com",
                    "otp": otp,
                    "name": "Hoa",
                    "password": "correct-horse",
                }),
            )
        };

        for _ in 0..state.config.otp.max_attempts {
            let response = app.clone().oneshot(signup("000000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert!(state.kv.get("otp:hoa@example.com").is_none());

        // The right code no longer works once the guesses ran out
        let response = app.oneshot(signup("123456")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_booking_conflict_and_transition_errors() {
        let (pool, _dir) = test_pool().await;
        let traveller = insert_user(&pool, "Lan", UserRole::Traveller).await;
        let other = insert_user(&pool, "Hoa", UserRole::Traveller).await;
        let buddy = insert_user(&pool, "Minh", UserRole::TourGuide).await;
        let state = Arc::new(AppState::new(Config::default(), pool));
        let app = create_router(state.clone());

        let traveller_token = access_token(&state, &traveller).await;
        let other_token = access_token(&state, &other).await;
        let buddy_token = access_token(&state, &buddy).await;

        let booking = |start_time: &str| {
            json!({
                "buddyId": buddy,
                "destinationId": "hanoi",
                "startDate": "2031-05-04",
                "startTime": start_time,
                "duration": 2,
                "numberOfPeople": 1,
            })
        };

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/bookings", Some(traveller_token.as_str()), booking("09:00")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "pending");
        let booking_id = created["id"].as_str().unwrap().to_string();

        // 10:00-12:00 overlaps 09:00-11:00
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/bookings", Some(other_token.as_str()), booking("10:00")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "conflict");

        // Travellers cannot confirm
        let status_uri = format!("/api/bookings/{}/status", booking_id);
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &status_uri,
                Some(traveller_token.as_str()),
                json!({"status": "confirmed"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // pending -> completed skips a step
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &status_uri,
                Some(buddy_token.as_str()),
                json!({"status": "completed"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_transition");

        let response = app
            .oneshot(json_request(
                "PUT",
                &status_uri,
                Some(buddy_token.as_str()),
                json!({"status": "confirmed"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "confirmed");
    }

    #[tokio::test]
    async fn test_availability_rejects_bad_date() {
        let (pool, _dir) = test_pool().await;
        let buddy = insert_user(&pool, "Minh", UserRole::TourGuide).await;
        let app = create_router(Arc::new(AppState::new(Config::default(), pool)));

        let response = app
            .oneshot(
                Request::get(format!("/api/buddies/{}/availability?date=04-05-2031", buddy))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "validation_error");
        assert!(body["details"]["date"].is_array());
    }
}
