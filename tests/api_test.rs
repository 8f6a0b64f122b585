use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use tripmatch::{auth::Identity, config::LimitsConfig, router, AppState, Database, TokenIssuer};

struct TestApp {
    _dir: TempDir,
    app: Router,
    tokens: TokenIssuer,
}

impl TestApp {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db_url = format!("sqlite://{}", dir.path().join("api.db").display());
        let db = Database::new(&db_url).await.unwrap();
        let tokens = TokenIssuer::new("api-test-secret", 1);
        let app = router(AppState::new(db, tokens.clone(), LimitsConfig::default()));
        Self {
            _dir: dir,
            app,
            tokens,
        }
    }

    fn token_for(&self, name: &str) -> (String, uuid::Uuid) {
        let identity = Identity {
            user_id: uuid::Uuid::new_v4(),
            display_name: Some(name.to_string()),
            is_admin: false,
        };
        (self.tokens.issue(&identity).unwrap(), identity.user_id)
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

fn trip_body() -> Value {
    json!({
        "route": {
            "from_country": "DE",
            "from_city": "Berlin",
            "to_country": "US",
            "to_city": "Boston"
        },
        "depart_on": "2026-12-01",
        "available_weight": 8.0,
        "reward_amount": 50.0,
        "item_type": "documents"
    })
}

fn parcel_body() -> Value {
    json!({
        "route": {
            "from_country": "DE",
            "from_city": "Berlin",
            "to_country": "US",
            "to_city": "Boston"
        },
        "deadline": "2026-12-10",
        "item_description": "Two paperbacks",
        "item_weight": 1.2,
        "budget_amount": 45.0
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_mutations_require_token() {
    let app = TestApp::new().await;
    let (status, body) = app.call(Method::POST, "/listings", None, Some(trip_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = app
        .call(Method::POST, "/listings", Some("not-a-jwt"), Some(trip_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_negotiation_over_http() {
    let app = TestApp::new().await;
    let (traveler, traveler_id) = app.token_for("Tess");
    let (sender, _) = app.token_for("Sam");

    let (status, listing) = app
        .call(Method::POST, "/listings", Some(&traveler), Some(trip_body()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(listing["owner_id"], traveler_id.to_string());
    let listing_id = listing["id"].as_str().unwrap().to_string();

    let (status, shipment) = app
        .call(Method::POST, "/shipments", Some(&sender), Some(parcel_body()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let shipment_id = shipment["id"].as_str().unwrap().to_string();

    let submission = json!({ "shipment_id": shipment_id, "offer_amount": 40.0 });
    let (status, outcome) = app
        .call(
            Method::POST,
            &format!("/listings/{}/requests", listing_id),
            Some(&sender),
            Some(submission.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["already"], false);
    assert_eq!(outcome["request"]["status"], "pending");
    let request_id = outcome["request"]["id"].as_str().unwrap().to_string();

    let (status, outcome) = app
        .call(
            Method::POST,
            &format!("/listings/{}/requests", listing_id),
            Some(&sender),
            Some(submission),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["already"], true);

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/requests/{}/accept", request_id),
            Some(&sender),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/listings/{}/messages", listing_id),
            Some(&sender),
            Some(json!({ "body": "hi" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "chat_locked");

    let (status, countered) = app
        .call(
            Method::POST,
            &format!("/requests/{}/counter", request_id),
            Some(&traveler),
            Some(json!({ "amount": 48.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(countered["status"], "counter_offer");

    let (status, accepted) = app
        .call(
            Method::POST,
            &format!("/requests/{}/accept-counter", request_id),
            Some(&sender),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["offer"]["amount"], 48.0);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/listings/{}/messages", listing_id),
            Some(&sender),
            Some(json!({ "body": "Thanks!" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, detail) = app
        .call(Method::GET, &format!("/listings/{}", listing_id), Some(&sender), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["listing"]["status"], "matched");
    assert_eq!(detail["my_request_status"], "accepted");
    assert_eq!(detail["chat"]["state"], "open");
    assert_eq!(detail["recent_messages"][0]["sender_name"], "Sam");

    let (status, body) = app
        .call(
            Method::PATCH,
            &format!("/shipments/{}", shipment_id),
            Some(&sender),
            Some(json!({ "item_weight": 3.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "shipment_locked");
}

#[tokio::test]
async fn test_locked_chat_read_is_not_an_error() {
    let app = TestApp::new().await;
    let (traveler, _) = app.token_for("Tess");
    let (_, listing) = app
        .call(Method::POST, "/listings", Some(&traveler), Some(trip_body()))
        .await;
    let listing_id = listing["id"].as_str().unwrap();

    let (status, conversation) = app
        .call(Method::GET, &format!("/listings/{}/messages", listing_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation["access"]["state"], "locked");
    assert_eq!(conversation["access"]["reason"], "sign_in");
    assert_eq!(conversation["messages"], json!([]));
}

#[tokio::test]
async fn test_error_codes_map_to_statuses() {
    let app = TestApp::new().await;
    let (traveler, _) = app.token_for("Tess");

    let (status, body) = app
        .call(
            Method::GET,
            &format!("/listings/{}", uuid::Uuid::new_v4()),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let mut bad = trip_body();
    bad["reward_amount"] = json!(0);
    let (status, body) = app
        .call(Method::POST, "/listings", Some(&traveler), Some(bad))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (_, listing) = app
        .call(Method::POST, "/listings", Some(&traveler), Some(trip_body()))
        .await;
    let listing_id = listing["id"].as_str().unwrap();
    let (status, body) = app
        .call(
            Method::POST,
            &format!("/listings/{}/status", listing_id),
            Some(&traveler),
            Some(json!({ "status": "delivered" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_status_transition");
}

#[tokio::test]
async fn test_reviews_and_user_rating() {
    let app = TestApp::new().await;
    let (traveler, traveler_id) = app.token_for("Tess");
    let (sender, _) = app.token_for("Sam");
    let (_, listing) = app
        .call(Method::POST, "/listings", Some(&traveler), Some(trip_body()))
        .await;
    let listing_id = listing["id"].as_str().unwrap();

    for rating in [4, 2] {
        let (status, review) = app
            .call(
                Method::POST,
                &format!("/listings/{}/reviews", listing_id),
                Some(&sender),
                Some(json!({ "rating": rating, "comment": "ok" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(review["reviewed_user_id"], traveler_id.to_string());
    }

    let (status, reviews) = app
        .call(Method::GET, &format!("/listings/{}/reviews", listing_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviews.as_array().map(Vec::len), Some(2));

    let (status, rating) = app
        .call(Method::GET, &format!("/users/{}/rating", traveler_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rating["count"], 2);
    assert_eq!(rating["average"], 3.0);
}

#[tokio::test]
async fn test_extractor_rejections_use_error_body() {
    let app = TestApp::new().await;
    let (traveler, _) = app.token_for("Tess");

    let (status, body) = app.call(Method::GET, "/listings/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].is_string());

    let (status, body) = app
        .call(Method::POST, "/listings", Some(&traveler), Some(json!({ "route": 5 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = app.call(Method::GET, "/listings?limit=abc", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}
