mod common;

use axum::{Json, Router, http::StatusCode, routing::get};
use common::{TestSetup, admin_token, empty_request, json_request, send, setup, user_token};
use ragdesk::usage::UsageClient;
use serde_json::json;
use std::time::Duration;

const ADMIN_ENDPOINTS: [&str; 4] = [
    "/api/admin/stats",
    "/api/admin/users",
    "/api/admin/user/00000000-0000-4000-8000-000000000001/details",
    "/api/admin/usage-cost",
];

async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_admin_endpoints_require_auth() {
    let test = setup().await;

    for uri in ADMIN_ENDPOINTS {
        let (status, _) = send(&test.app, empty_request("GET", uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
    }
}

#[tokio::test]
async fn test_admin_endpoints_require_admin_flag() {
    let test = setup().await;
    let token = user_token(&test.app, "plain@x.com").await;

    for uri in ADMIN_ENDPOINTS {
        let (status, body) = send(&test.app, empty_request("GET", uri, Some(&token))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        assert_eq!(body["error"], "Admin access required");
    }
}

#[tokio::test]
async fn test_stats_on_empty_tables() {
    let test = setup().await;
    let token = admin_token(&test).await;

    let (status, body) = send(&test.app, empty_request("GET", "/api/admin/stats", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["user_stats"]["total_users"], 1);
    assert_eq!(body["user_stats"]["active_users"], 1);
    assert_eq!(body["user_stats"]["verified_users"], 0);
    assert_eq!(body["chat_stats"]["total_conversations"], 0);
    assert_eq!(body["chat_stats"]["total_tokens"], 0);
    assert_eq!(body["memory_stats"]["short_term"]["total_stm"], 0);
    assert!(body["memory_stats"]["short_term"]["avg_importance"].is_null());
    assert_eq!(body["memory_stats"]["long_term"]["total_ltm"], 0);
    assert_eq!(body["memory_stats"]["long_term"]["preferences_count"], 0);
    assert_eq!(body["top_users"].as_array().unwrap().len(), 1);
    assert_eq!(body["top_users"][0]["chat_count"], 0);
    assert_eq!(body["top_users"][0]["tokens_used"], 0);
    assert!(body["top_users"][0]["last_activity"].is_null());
    assert_eq!(body["memory_categories"], json!([]));
}

#[tokio::test]
async fn test_stats_and_user_list_reflect_activity() {
    let test = setup().await;
    let admin = admin_token(&test).await;
    let token = user_token(&test.app, "active@x.com").await;

    let (status, _) = send(
        &test.app,
        json_request(
            "POST",
            "/api/chat/message",
            Some(&token),
            &json!({"message": "How many holidays do I get?"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Recording runs in the background.
    let mut stats = serde_json::Value::Null;
    for _ in 0..100 {
        let (_, body) = send(&test.app, empty_request("GET", "/api/admin/stats", Some(&admin))).await;
        if body["chat_stats"]["total_conversations"] == 1 {
            stats = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stats["chat_stats"]["total_conversations"], 1);
    assert_eq!(stats["chat_stats"]["users_with_chats"], 1);
    assert_eq!(stats["chat_stats"]["chats_today"], 1);
    assert_eq!(stats["chat_stats"]["total_tokens"], 42);
    assert_eq!(stats["memory_stats"]["short_term"]["total_stm"], 1);
    assert_eq!(stats["top_users"][0]["email"], "active@x.com");
    assert_eq!(stats["top_users"][0]["chat_count"], 1);

    let (status, body) = send(&test.app, empty_request("GET", "/api/admin/users", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    let users = body.as_array().unwrap();
    assert_eq!(users.len(), 2);
    let active = users.iter().find(|u| u["email"] == "active@x.com").unwrap();
    assert_eq!(active["chat_count"], 1);
    assert_eq!(active["stm_count"], 1);
    assert_eq!(active["ltm_count"], 0);
    assert!(active.get("password_hash").is_none());
}

#[tokio::test]
async fn test_user_details() {
    let test = setup().await;
    let admin = admin_token(&test).await;
    let token = user_token(&test.app, "detail@x.com").await;
    let user = test
        .db
        .users()
        .get_by_email("detail@x.com")
        .await
        .unwrap()
        .unwrap();

    let long_question = format!("Tell me about {}", "benefits ".repeat(30));
    let (status, _) = send(
        &test.app,
        json_request(
            "POST",
            "/api/chat/message",
            Some(&token),
            &json!({"message": long_question}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/api/admin/user/{}/details", user.id);
    let mut details = serde_json::Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&test.app, empty_request("GET", &uri, Some(&admin))).await;
        assert_eq!(status, StatusCode::OK);
        if !body["recent_chats"].as_array().unwrap().is_empty() {
            details = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(details["user"]["email"], "detail@x.com");
    let preview = details["recent_chats"][0]["user_input_preview"]
        .as_str()
        .unwrap();
    assert_eq!(preview.chars().count(), 100);
    assert_eq!(details["memory_info"]["short_term"]["count"], 1);
    assert_eq!(details["memory_info"]["long_term"]["count"], 0);
    assert!(details["memory_info"]["long_term"]["avg_importance"].is_null());
}

#[tokio::test]
async fn test_user_details_unknown_and_malformed_ids() {
    let test = setup().await;
    let admin = admin_token(&test).await;

    let (status, body) = send(
        &test.app,
        empty_request(
            "GET",
            "/api/admin/user/00000000-0000-4000-8000-000000000099/details",
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");

    let (status, _) = send(
        &test.app,
        empty_request("GET", "/api/admin/user/not-a-uuid/details", Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_usage_cost_without_admin_key() {
    let test = setup().await;
    let admin = admin_token(&test).await;

    let (status, body) = send(
        &test.app,
        empty_request("GET", "/api/admin/usage-cost", Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "ADMIN_KEY not configured");
}

#[tokio::test]
async fn test_usage_cost_report() {
    let stub = Router::new()
        .route(
            "/organization/usage/completions",
            get(|| async {
                Json(json!({
                    "data": [{"results": [{"input_tokens": 1200, "output_tokens": 300}]}],
                    "has_more": false,
                }))
            }),
        )
        .route(
            "/organization/costs",
            get(|| async {
                Json(json!({
                    "data": [{"results": [{"amount": {"value": 0.25, "currency": "usd"}}]}],
                    "has_more": false,
                }))
            }),
        );
    let base = spawn_stub(stub).await;
    let usage = UsageClient::new(base, Some("admin-key".to_string()), None).unwrap();
    let test = TestSetup::new().with_usage(usage).build().await;
    let admin = admin_token(&test).await;

    let (status, body) = send(
        &test.app,
        empty_request("GET", "/api/admin/usage-cost?days=30", Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_input_tokens"], 1200);
    assert_eq!(body["total_output_tokens"], 300);
    assert_eq!(body["total_tokens"], 1500);
    assert_eq!(body["total_cost_usd"], 0.25);
    assert_eq!(body["period_days"], 30);
    assert_eq!(body["start_date"].as_str().unwrap().len(), 10);

    let (status, _) = send(
        &test.app,
        empty_request("GET", "/api/admin/usage-cost?days=0", Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
