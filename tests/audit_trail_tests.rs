//! End-to-end tests for role gating and the change ledger.
//!
//! All tests here need a migrated Postgres instance and are `#[ignore]`d
//! by default. Point `TEST_DATABASE_URL` (or `DATABASE_URL`) at a
//! disposable database and run:
//!
//! ```bash
//! cargo test --test audit_trail_tests -- --ignored
//! ```

mod common;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use std::sync::Arc;

use common::{response_json, send, test_id, StaticDns, TestContext, TEST_PASSWORD};
use fleetkeeper_backend::models::user::UserRole;

// --- Fixture helpers ---

async fn create_server(ctx: &TestContext, token: &str, project: &str) -> i64 {
    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/servers",
        Some(token),
        Some(json!({
            "ip_address": "203.0.113.10",
            "ssh_password": "initial-pw",
            "project": project,
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    json["id"].as_i64().expect("server id")
}

async fn server_history(ctx: &TestContext, token: &str, id: i64) -> Vec<Value> {
    let response = send(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/servers/{id}/history"),
        Some(token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    match response_json(response).await {
        Value::Array(rows) => rows,
        other => panic!("expected an array, got {other}"),
    }
}

// --- Authentication ---

#[tokio::test]
#[ignore]
async fn test_login_round_trip() {
    let ctx = TestContext::new().await;
    let (user, _) = ctx.create_user(UserRole::Admin1L).await;

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": user.username, "password": TEST_PASSWORD })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let access_token = body["access_token"].as_str().expect("access token");
    assert!(!access_token.is_empty());
    assert_eq!(body["user"]["username"], json!(user.username));
    // The hash must never leave the server.
    assert!(body["user"].get("password_hash").is_none());

    let response = send(
        &ctx.app,
        Method::GET,
        "/api/v1/auth/check",
        Some(access_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["authenticated"], json!(true));
    assert_eq!(body["user"]["id"], json!(user.id));

    ctx.delete_user(user.id).await;
}

#[tokio::test]
#[ignore]
async fn test_login_rejects_wrong_password() {
    let ctx = TestContext::new().await;
    let (user, _) = ctx.create_user(UserRole::Admin1L).await;

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": user.username, "password": "wrong" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    ctx.delete_user(user.id).await;
}

#[tokio::test]
#[ignore]
async fn test_login_rejects_suspended_accounts() {
    let ctx = TestContext::new().await;
    let (user, token) = ctx.create_user(UserRole::Admin1L).await;

    sqlx::query("UPDATE users SET status = 'suspended' WHERE id = $1")
        .bind(user.id)
        .execute(&ctx.db)
        .await
        .expect("suspend user");

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": user.username, "password": TEST_PASSWORD })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Tokens issued before the suspension stop working too.
    let response = send(&ctx.app, Method::GET, "/api/v1/auth/check", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    ctx.delete_user(user.id).await;
}

// --- Ledger writes ---

#[tokio::test]
#[ignore]
async fn test_create_appends_a_single_ledger_row() {
    let ctx = TestContext::new().await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;

    let server_id = create_server(&ctx, &token, "ops").await;
    let rows = server_history(&ctx, &token, server_id).await;

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["action"], "CREATE");
    assert_eq!(row["entity_type"], "servers");
    assert_eq!(row["record_id"], json!(server_id));
    assert_eq!(row["changes"], json!({ "all": "created" }));
    assert_eq!(row["user_id"], json!(admin.id));
    assert_eq!(row["server_id"], json!(server_id));

    ctx.delete_server(server_id).await;
    ctx.delete_user(admin.id).await;
}

#[tokio::test]
#[ignore]
async fn test_noop_update_leaves_no_trace() {
    let ctx = TestContext::new().await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;
    let server_id = create_server(&ctx, &token, "ops").await;

    // Same values the row already has.
    let response = send(
        &ctx.app,
        Method::PUT,
        &format!("/api/v1/servers/{server_id}"),
        Some(&token),
        Some(json!({ "status": "running", "project": "ops" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    // Nothing changed, so nobody touched the row.
    assert!(body["updated_by"].is_null());

    let rows = server_history(&ctx, &token, server_id).await;
    assert_eq!(rows.len(), 1, "no-op must not append to the ledger");

    ctx.delete_server(server_id).await;
    ctx.delete_user(admin.id).await;
}

#[tokio::test]
#[ignore]
async fn test_update_records_old_and_new_values() {
    let ctx = TestContext::new().await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;
    let server_id = create_server(&ctx, &token, "ops").await;

    let response = send(
        &ctx.app,
        Method::PUT,
        &format!("/api/v1/servers/{server_id}"),
        Some(&token),
        Some(json!({ "project": "billing" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["project"], "billing");
    assert_eq!(body["updated_by"], json!(admin.id));

    let rows = server_history(&ctx, &token, server_id).await;
    assert_eq!(rows.len(), 2);
    // Newest first.
    let row = &rows[0];
    assert_eq!(row["action"], "UPDATE");
    assert_eq!(row["changes"]["project"]["old"], "ops");
    assert_eq!(row["changes"]["project"]["new"], "billing");

    ctx.delete_server(server_id).await;
    ctx.delete_user(admin.id).await;
}

#[tokio::test]
#[ignore]
async fn test_secret_change_is_redacted_in_the_ledger() {
    let ctx = TestContext::new().await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;
    let server_id = create_server(&ctx, &token, "ops").await;

    let response = send(
        &ctx.app,
        Method::PUT,
        &format!("/api/v1/servers/{server_id}"),
        Some(&token),
        Some(json!({ "ssh_password": "hunter2" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    // The new value is applied even though the ledger hides it.
    assert_eq!(body["ssh_password"], "hunter2");

    let rows = server_history(&ctx, &token, server_id).await;
    let row = &rows[0];
    assert_eq!(row["changes"]["ssh_password"]["old"], "[REDACTED]");
    assert_eq!(row["changes"]["ssh_password"]["new"], "[REDACTED]");

    ctx.delete_server(server_id).await;
    ctx.delete_user(admin.id).await;
}

// --- Role gating ---

#[tokio::test]
#[ignore]
async fn test_service_manager_reads_but_cannot_mutate_servers() {
    let ctx = TestContext::new().await;
    let (admin, admin_token) = ctx.create_user(UserRole::Admin2L).await;
    let (manager, manager_token) = ctx.create_user(UserRole::ServiceManager).await;
    let server_id = create_server(&ctx, &admin_token, "ops").await;

    let response = send(&ctx.app, Method::GET, "/api/v1/servers", Some(&manager_token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/servers",
        Some(&manager_token),
        Some(json!({ "ip_address": "203.0.113.11", "ssh_password": "pw" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &ctx.app,
        Method::PUT,
        &format!("/api/v1/servers/{server_id}"),
        Some(&manager_token),
        Some(json!({ "project": "billing" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["code"], "FORBIDDEN");

    ctx.delete_server(server_id).await;
    ctx.delete_user(manager.id).await;
    ctx.delete_user(admin.id).await;
}

#[tokio::test]
#[ignore]
async fn test_finance_gate_excludes_first_level_admins() {
    let ctx = TestContext::new().await;
    let (admin1, admin1_token) = ctx.create_user(UserRole::Admin1L).await;
    let (manager, manager_token) = ctx.create_user(UserRole::ServiceManager).await;

    // First-level admins handle servers but not money.
    let response = send(&ctx.app, Method::GET, "/api/v1/finance", Some(&admin1_token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Service managers do, despite ranking below them.
    let response = send(&ctx.app, Method::GET, "/api/v1/finance", Some(&manager_token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The ledger view runs on the ordinary rank ladder, so the
    // first-level admin can read it while the manager cannot.
    let response = send(
        &ctx.app,
        Method::GET,
        "/api/v1/finance/1/history",
        Some(&admin1_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &ctx.app,
        Method::GET,
        "/api/v1/finance/1/history",
        Some(&manager_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    ctx.delete_user(manager.id).await;
    ctx.delete_user(admin1.id).await;
}

#[tokio::test]
#[ignore]
async fn test_user_delete_protections() {
    let ctx = TestContext::new().await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;
    let (root, _) = ctx.create_user(UserRole::SuperAdmin).await;
    let (target, _) = ctx.create_user(UserRole::Admin1L).await;

    let response = send(
        &ctx.app,
        Method::DELETE,
        &format!("/api/v1/users/{}", root.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Cannot delete Super Admin");

    let response = send(
        &ctx.app,
        Method::DELETE,
        &format!("/api/v1/users/{}", admin.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Cannot delete yourself");

    let response = send(
        &ctx.app,
        Method::DELETE,
        &format!("/api/v1/users/{}", target.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM history WHERE entity_type = 'users' AND record_id = $1 AND action = 'DELETE'",
    )
    .bind(target.id)
    .fetch_optional(&ctx.db)
    .await
    .expect("ledger query");
    assert!(row.is_some(), "deletion must be recorded");

    ctx.delete_user(root.id).await;
    ctx.delete_user(admin.id).await;
}

// --- Referential checks ---

#[tokio::test]
#[ignore]
async fn test_server_creation_validates_group_assignment() {
    let ctx = TestContext::new().await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/servers",
        Some(&token),
        Some(json!({
            "ip_address": "203.0.113.12",
            "ssh_password": "pw",
            "group_id": i64::MAX,
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Group not found");

    // With a real group the assignment shows up in the group listing.
    let title = test_id();
    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/groups",
        Some(&token),
        Some(json!({ "title": title })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let group_id = response_json(response).await["id"].as_i64().expect("group id");

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/servers",
        Some(&token),
        Some(json!({
            "ip_address": "203.0.113.12",
            "ssh_password": "pw",
            "group_id": group_id,
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let server_id = response_json(response).await["id"].as_i64().expect("server id");

    let response = send(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/groups?search={title}"),
        Some(&token),
        None,
    )
    .await;
    let body = response_json(response).await;
    assert_eq!(body["items"][0]["assigned_servers"], json!(1));

    ctx.delete_server(server_id).await;
    ctx.delete_group(group_id).await;
    ctx.delete_user(admin.id).await;
}

// --- Domains ---

#[tokio::test]
#[ignore]
async fn test_domain_create_stores_resolved_records() {
    let ctx = TestContext::new().await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;
    let name = format!("{}.example", test_id());

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/domains",
        Some(&token),
        Some(json!({ "domain_name": name })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let domain_id = body["id"].as_i64().expect("domain id");
    // Record sets come from the resolver, never from the caller.
    assert_eq!(body["ns_records"], json!(["ns1.example-dns.net.", "ns2.example-dns.net."]));
    assert_eq!(body["a_records"], json!(["198.51.100.7"]));

    // Same name again is a conflict.
    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/domains",
        Some(&token),
        Some(json!({ "domain_name": name })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    sqlx::query("DELETE FROM domains WHERE id = $1")
        .bind(domain_id)
        .execute(&ctx.db)
        .await
        .expect("domain cleanup");
    ctx.delete_user(admin.id).await;
}

#[tokio::test]
#[ignore]
async fn test_domain_create_requires_second_level_admin() {
    let ctx = TestContext::new().await;
    let (manager, token) = ctx.create_user(UserRole::ServiceManager).await;
    let name = format!("{}.example", test_id());

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/domains",
        Some(&token),
        Some(json!({ "domain_name": name })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A rejection leaves nothing behind, in either table.
    let created: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM domains WHERE domain_name = $1)")
            .bind(&name)
            .fetch_one(&ctx.db)
            .await
            .expect("domain query");
    assert!(!created);
    let (ledger_rows,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM history WHERE user_id = $1")
            .bind(manager.id)
            .fetch_one(&ctx.db)
            .await
            .expect("ledger query");
    assert_eq!(ledger_rows, 0);

    ctx.delete_user(manager.id).await;
}

#[tokio::test]
#[ignore]
async fn test_total_dns_failure_still_creates_the_domain() {
    let ctx = TestContext::with_resolver(Arc::new(StaticDns::empty())).await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;
    let name = format!("{}.example", test_id());

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/domains",
        Some(&token),
        Some(json!({ "domain_name": name })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let domain_id = body["id"].as_i64().expect("domain id");
    assert_eq!(body["ns_records"], json!([]));
    assert_eq!(body["a_records"], json!([]));
    assert_eq!(body["aaaa_records"], json!([]));

    // The creation is still audited.
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM history WHERE entity_type = 'domains' AND record_id = $1 AND action = 'CREATE'",
    )
    .bind(domain_id)
    .fetch_optional(&ctx.db)
    .await
    .expect("ledger query");
    assert!(row.is_some());

    sqlx::query("DELETE FROM domains WHERE id = $1")
        .bind(domain_id)
        .execute(&ctx.db)
        .await
        .expect("domain cleanup");
    ctx.delete_user(admin.id).await;
}

// --- Settings ---

#[tokio::test]
#[ignore]
async fn test_settings_contact_change_mirrors_into_account() {
    let ctx = TestContext::new().await;
    let (user, token) = ctx.create_user(UserRole::Admin1L).await;
    let new_email = format!("{}@example.org", test_id());

    let response = send(
        &ctx.app,
        Method::PUT,
        "/api/v1/settings",
        Some(&token),
        Some(json!({ "email": new_email, "first_name": "Kim" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let settings_id = body["id"].as_i64().expect("settings id");
    assert_eq!(body["email"], json!(new_email));
    assert_eq!(body["first_name"], "Kim");

    // The account row follows the settings row.
    let (account_email,): (String,) = sqlx::query_as("SELECT email FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_one(&ctx.db)
        .await
        .expect("account query");
    assert_eq!(account_email, new_email);

    let row: Option<(Value,)> = sqlx::query_as(
        "SELECT changes FROM history WHERE entity_type = 'settings' AND record_id = $1 AND action = 'UPDATE'",
    )
    .bind(settings_id)
    .fetch_optional(&ctx.db)
    .await
    .expect("ledger query");
    let (changes,) = row.expect("settings change must be recorded");
    assert_eq!(changes["email"]["new"], json!(new_email));

    ctx.delete_user(user.id).await;
}

// --- History browsing ---

#[tokio::test]
#[ignore]
async fn test_history_browsing_filters_by_entity_and_actor() {
    let ctx = TestContext::new().await;
    let (admin, token) = ctx.create_user(UserRole::Admin2L).await;

    let response = send(
        &ctx.app,
        Method::POST,
        "/api/v1/groups",
        Some(&token),
        Some(json!({ "title": test_id() })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let group_id = response_json(response).await["id"].as_i64().expect("group id");

    let response = send(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/history?entity_type=groups&user_id={}", admin.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["total"], json!(1));
    let row = &body["items"][0];
    assert_eq!(row["record_id"], json!(group_id));
    assert_eq!(row["action"], "CREATE");
    assert_eq!(row["username"], json!(admin.username));

    ctx.delete_group(group_id).await;
    ctx.delete_user(admin.id).await;
}
