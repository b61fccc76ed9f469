//! Canvas, stats and admin endpoints scoped to a guild.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{build_test_app, expect, get, png_base64, post_json, send};

const BOT_OWNER: u64 = 999;

async fn generate(app: axum::Router, user_id: u64, guild_id: u64) {
    let body = json!({ "command": "text2img", "user_id": user_id, "guild_id": guild_id, "text": "a cat" });
    expect(post_json(app, "/api/v1/generations", body).await, StatusCode::CREATED).await;
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

#[tokio::test]
async fn canvas_start_edit_show() {
    let t = build_test_app().await;

    let missing = get(t.app(), "/api/v1/guilds/7/canvas").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let started = expect(
        post_json(
            t.app(),
            "/api/v1/guilds/7/canvas",
            json!({ "user_id": 1, "username": "alice", "text": "a castle" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(started["data"]["metadata"]["revision"], 0);
    assert_eq!(started["data"]["metadata"]["initial_prompt"], "a castle");

    let edited = expect(
        post_json(
            t.app(),
            "/api/v1/guilds/7/canvas/edits",
            json!({
                "user_id": 2,
                "username": "bob",
                "text": "a dragon",
                "mask_image": png_base64(64, 64, [255, 255, 255, 255]),
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(edited["data"]["metadata"]["revision"], 1);
    let filename = edited["data"]["generation"]["images"][0]["filename"]
        .as_str()
        .unwrap();
    assert!(filename.starts_with("canvas_edit_"), "{filename}");
    assert_eq!(edited["data"]["generation"]["command"], "canvas_edit");

    let shown = expect(get(t.app(), "/api/v1/guilds/7/canvas").await, StatusCode::OK).await;
    assert_eq!(shown["data"]["metadata"]["revision"], 1);
    assert_eq!(shown["data"]["metadata"]["history"][0]["user_id"], 2);
    assert!(!shown["data"]["image"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn canvas_edit_without_canvas_is_a_400() {
    let t = build_test_app().await;
    let json = expect(
        post_json(
            t.app(),
            "/api/v1/guilds/7/canvas/edits",
            json!({ "user_id": 2, "text": "a dragon", "mask_image": png_base64(64, 64, [255, 255, 255, 255]) }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(json["code"], "PARAMETER_ERROR");
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_and_leaderboard() {
    let t = build_test_app().await;
    generate(t.app(), 1, 100).await;
    generate(t.app(), 1, 100).await;
    generate(t.app(), 2, 100).await;

    let stats = expect(get(t.app(), "/api/v1/guilds/100/stats/1").await, StatusCode::OK).await;
    assert_eq!(stats["data"]["images"], 2);

    let nobody = expect(get(t.app(), "/api/v1/guilds/100/stats/3").await, StatusCode::OK).await;
    assert_eq!(nobody["data"]["images"], 0);
    assert!(nobody["data"]["last_generated"].is_null());

    let board = expect(
        get(t.app(), "/api/v1/guilds/100/leaderboard?top=1").await,
        StatusCode::OK,
    )
    .await;
    let board = board["data"].as_array().unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0]["user_id"], 1);

    let other_guild = expect(get(t.app(), "/api/v1/guilds/200/leaderboard").await, StatusCode::OK).await;
    assert!(other_guild["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn leaderboard_size_is_bounded() {
    let t = build_test_app().await;
    let response = get(t.app(), "/api/v1/guilds/100/leaderboard?top=0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = get(t.app(), "/api/v1/guilds/100/leaderboard?top=500").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_reset_requires_admin() {
    let t = build_test_app().await;
    generate(t.app(), 1, 100).await;
    generate(t.app(), 2, 100).await;

    let denied = send(
        t.app(),
        Method::POST,
        "/api/v1/guilds/100/stats/reset",
        Some(json!({ "user_id": 1 })),
        Some((1, "", false)),
    )
    .await;
    let json = expect(denied, StatusCode::FORBIDDEN).await;
    assert_eq!(json["code"], "FORBIDDEN");

    let one = send(
        t.app(),
        Method::POST,
        "/api/v1/guilds/100/stats/reset",
        Some(json!({ "user_id": 1 })),
        Some((5, "", true)),
    )
    .await;
    assert_eq!(expect(one, StatusCode::OK).await["data"]["removed"], 1);

    let all = send(
        t.app(),
        Method::POST,
        "/api/v1/guilds/100/stats/reset",
        Some(json!({})),
        Some((5, "", true)),
    )
    .await;
    assert_eq!(expect(all, StatusCode::OK).await["data"]["removed"], 1);
}

#[tokio::test]
async fn missing_actor_header_is_a_400() {
    let t = build_test_app().await;
    let response = send(
        t.app(),
        Method::POST,
        "/api/v1/guilds/100/stats/reset",
        Some(json!({})),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Admins
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bot_owner_bootstraps_then_loses_implicit_access() {
    let t = build_test_app().await;
    let owner = Some((BOT_OWNER, "", false));

    let added = send(t.app(), Method::PUT, "/api/v1/guilds/100/admins/7", None, owner).await;
    let json = expect(added, StatusCode::OK).await;
    assert_eq!(json["data"], json!({ "user_id": 7, "changed": true }));

    // The guild now has an admin set, so the bot owner is no longer implicit.
    let list = send(t.app(), Method::GET, "/api/v1/guilds/100/admins", None, owner).await;
    assert_eq!(list.status(), StatusCode::FORBIDDEN);

    let list = send(t.app(), Method::GET, "/api/v1/guilds/100/admins", None, Some((7, "", false))).await;
    assert_eq!(expect(list, StatusCode::OK).await["data"], json!([7]));

    // Admin sets are per guild.
    let elsewhere = send(t.app(), Method::GET, "/api/v1/guilds/200/admins", None, Some((7, "", false))).await;
    assert_eq!(elsewhere.status(), StatusCode::FORBIDDEN);

    let removed = send(
        t.app(),
        Method::DELETE,
        "/api/v1/guilds/100/admins/7",
        None,
        Some((7, "", false)),
    )
    .await;
    assert_eq!(expect(removed, StatusCode::OK).await["data"]["changed"], true);
    assert!(t.state.admins.admins(100).await.is_empty());
}

#[tokio::test]
async fn admin_role_grants_access_everywhere() {
    let t = common::build_test_app_with(&[("ADMIN_ROLE_ID", "55")]).await;
    let response = send(
        t.app(),
        Method::GET,
        "/api/v1/guilds/300/admins",
        None,
        Some((8, "12, 55", false)),
    )
    .await;
    assert_eq!(expect(response, StatusCode::OK).await["data"], json!([]));
}
