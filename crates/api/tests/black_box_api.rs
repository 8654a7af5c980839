use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let app = stockroom_api::app::build_app(jwt_secret.to_string()).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Wire-format claims (`iat`/`exp` unix seconds), minted locally because
/// token issuance is out of scope for the server.
#[derive(serde::Serialize)]
struct Claims {
    sub: Uuid,
    tenant_id: Uuid,
    roles: Vec<String>,
    iat: i64,
    exp: i64,
}

fn mint_jwt(jwt_secret: &str, tenant_id: Uuid, roles: &[&str]) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: Uuid::now_v7(),
        tenant_id,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now,
        exp: now + 600,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

/// Poll a GET endpoint until it returns 200 (commands are eventually
/// consistent with projections).
async fn get_eventually(client: &reqwest::Client, url: &str, token: &str) -> serde_json::Value {
    for _ in 0..50 {
        let res = client.get(url).bearer_auth(token).send().await.unwrap();
        if res.status() == StatusCode::OK {
            return res.json().await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("{url} did not become visible within timeout");
}

/// Poll a GET endpoint until `pred` holds on the 200 body.
async fn get_eventually_matching(
    client: &reqwest::Client,
    url: &str,
    token: &str,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    for _ in 0..50 {
        let res = client.get(url).bearer_auth(token).send().await.unwrap();
        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if pred(&body) {
                return body;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("{url} did not reach the expected state within timeout");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn("test-secret").await;
    let res = reqwest::Client::new()
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn("test-secret").await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tenant_context_is_derived_from_token() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let tenant_id = Uuid::now_v7();
    let token = mint_jwt(jwt_secret, tenant_id, &["admin"]);

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["tenant_id"].as_str().unwrap(), tenant_id.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "admin"));
}

#[tokio::test]
async fn product_lifecycle_create_update_soft_delete_restore() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let token = mint_jwt(jwt_secret, Uuid::now_v7(), &["admin"]);
    let client = reqwest::Client::new();

    // Create
    let res = client
        .post(format!("{}/products", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "sku": "widget-1", "name": "Widget", "description": "A widget" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    // SKU is normalized to uppercase.
    let product = get_eventually(&client, &format!("{}/products/{}", srv.base_url, id), &token).await;
    assert_eq!(product["sku"], "WIDGET-1");
    assert_eq!(product["name"], "Widget");

    // Update
    let res = client
        .put(format!("{}/products/{}", srv.base_url, id))
        .bearer_auth(&token)
        .json(&json!({ "sku": "widget-1", "name": "Widget Mk2", "description": "A widget" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Soft delete: hidden from the default list, visible with include_deleted.
    let res = client
        .delete(format!("{}/products/{}", srv.base_url, id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    get_eventually_matching(
        &client,
        &format!("{}/products", srv.base_url),
        &token,
        |body| body["items"].as_array().unwrap().is_empty(),
    )
    .await;

    let with_deleted = get_eventually_matching(
        &client,
        &format!("{}/products?include_deleted=true", srv.base_url),
        &token,
        |body| body["items"].as_array().unwrap().len() == 1,
    )
    .await;
    assert!(with_deleted["items"][0]["deleted_at"].is_string());

    // Restore brings it back.
    let res = client
        .post(format!("{}/products/{}/restore", srv.base_url, id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    get_eventually_matching(
        &client,
        &format!("{}/products", srv.base_url),
        &token,
        |body| body["items"].as_array().unwrap().len() == 1,
    )
    .await;
}

#[tokio::test]
async fn duplicate_product_sku_is_rejected() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let token = mint_jwt(jwt_secret, Uuid::now_v7(), &["admin"]);
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/products", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "sku": "DUP-1", "name": "First" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    // The uniqueness check runs against the catalog read model; wait until the
    // first product is projected.
    get_eventually_matching(
        &client,
        &format!("{}/products", srv.base_url),
        &token,
        |body| body["items"].as_array().unwrap().len() == 1,
    )
    .await;

    let res = client
        .post(format!("{}/products", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "sku": "dup-1", "name": "Second" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn restore_is_rejected_when_sku_was_reclaimed() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let token = mint_jwt(jwt_secret, Uuid::now_v7(), &["admin"]);
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/products", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "sku": "RACK-1", "name": "First" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let first_id = created["id"].as_str().unwrap().to_string();

    get_eventually(&client, &format!("{}/products/{}", srv.base_url, first_id), &token).await;

    // Soft delete frees the SKU for a new product.
    let res = client
        .delete(format!("{}/products/{}", srv.base_url, first_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    get_eventually_matching(
        &client,
        &format!("{}/products", srv.base_url),
        &token,
        |body| body["items"].as_array().unwrap().is_empty(),
    )
    .await;

    let res = client
        .post(format!("{}/products", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "sku": "RACK-1", "name": "Second" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    get_eventually_matching(
        &client,
        &format!("{}/products?include_deleted=true", srv.base_url),
        &token,
        |body| body["items"].as_array().unwrap().len() == 2,
    )
    .await;

    // Restoring the deleted product would put two live products on one SKU.
    let res = client
        .post(format!("{}/products/{}/restore", srv.base_url, first_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    let live = get_eventually(&client, &format!("{}/products", srv.base_url), &token).await;
    let holders = live["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["sku"] == "RACK-1")
        .count();
    assert_eq!(holders, 1);
}

#[tokio::test]
async fn commands_require_a_granted_permission() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    // The "user" role can read but holds no command grants.
    let token = mint_jwt(jwt_secret, Uuid::now_v7(), &["user"]);
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/products", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "sku": "NOPE-1", "name": "Nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(format!("{}/products", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

async fn create_product_with_variant(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
) -> (String, String) {
    let res = client
        .post(format!("{base_url}/products"))
        .bearer_auth(token)
        .json(&json!({ "sku": "SHIRT", "name": "Shirt" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let product_id = created["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{base_url}/products/{product_id}/variants"))
        .bearer_auth(token)
        .json(&json!({ "sku": "SHIRT-M", "name": "Shirt M" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let variant: serde_json::Value = res.json().await.unwrap();
    let variant_id = variant["variant_id"].as_str().unwrap().to_string();

    (product_id, variant_id)
}

#[tokio::test]
async fn stock_levels_move_only_on_submission() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let token = mint_jwt(jwt_secret, Uuid::now_v7(), &["admin"]);
    let client = reqwest::Client::new();

    let (_product_id, variant_id) =
        create_product_with_variant(&client, &srv.base_url, &token).await;

    // Variant seeds a zero level.
    get_eventually_matching(
        &client,
        &format!("{}/stock/levels", srv.base_url),
        &token,
        |body| {
            body["items"]
                .as_array()
                .unwrap()
                .iter()
                .any(|l| l["variant_id"] == variant_id.as_str() && l["quantity"] == 0)
        },
    )
    .await;

    // Open a stock-in draft; code carries the direction prefix and a per-day
    // sequence.
    let res = client
        .post(format!("{}/stock/records", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "direction": "in", "note": "initial intake" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let opened: serde_json::Value = res.json().await.unwrap();
    let record_id = opened["id"].as_str().unwrap().to_string();
    let code = opened["code"].as_str().unwrap();
    assert!(code.starts_with("SI-"));
    assert!(code.ends_with("-0001"));

    // Draft edits do not move levels.
    let res = client
        .put(format!("{}/stock/records/{}", srv.base_url, record_id))
        .bearer_auth(&token)
        .json(&json!({
            "note": "initial intake",
            "lines": [{ "variant_id": variant_id, "quantity": 25 }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    get_eventually_matching(
        &client,
        &format!("{}/stock/records/{}", srv.base_url, record_id),
        &token,
        |body| body["status"] == "draft" && body["lines"].as_array().unwrap().len() == 1,
    )
    .await;

    let levels = get_eventually(&client, &format!("{}/stock/levels", srv.base_url), &token).await;
    let level = levels["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|l| l["variant_id"] == variant_id.as_str())
        .unwrap();
    assert_eq!(level["quantity"], 0);

    // Submission applies the movement.
    let res = client
        .post(format!("{}/stock/records/{}/submit", srv.base_url, record_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    get_eventually_matching(
        &client,
        &format!("{}/stock/levels", srv.base_url),
        &token,
        |body| {
            body["items"]
                .as_array()
                .unwrap()
                .iter()
                .any(|l| l["variant_id"] == variant_id.as_str() && l["quantity"] == 25)
        },
    )
    .await;

    // Submitted records are immutable.
    let res = client
        .put(format!("{}/stock/records/{}", srv.base_url, record_id))
        .bearer_auth(&token)
        .json(&json!({
            "note": "too late",
            "lines": [{ "variant_id": variant_id, "quantity": 1 }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn stock_out_exceeding_on_hand_is_rejected() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let token = mint_jwt(jwt_secret, Uuid::now_v7(), &["admin"]);
    let client = reqwest::Client::new();

    let (_product_id, variant_id) =
        create_product_with_variant(&client, &srv.base_url, &token).await;

    // Nothing on hand yet; a stock-out of 40 must not submit.
    let res = client
        .post(format!("{}/stock/records", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "direction": "out", "note": "oversell" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let opened: serde_json::Value = res.json().await.unwrap();
    let record_id = opened["id"].as_str().unwrap().to_string();
    assert!(opened["code"].as_str().unwrap().starts_with("SO-"));

    let res = client
        .put(format!("{}/stock/records/{}", srv.base_url, record_id))
        .bearer_auth(&token)
        .json(&json!({
            "note": "oversell",
            "lines": [{ "variant_id": variant_id, "quantity": 40 }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // The availability check reads the records projection; wait for the draft
    // lines to land there first.
    get_eventually_matching(
        &client,
        &format!("{}/stock/records/{}", srv.base_url, record_id),
        &token,
        |body| body["lines"].as_array().unwrap().len() == 1,
    )
    .await;

    let res = client
        .post(format!("{}/stock/records/{}/submit", srv.base_url, record_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invariant_violation");
}

#[tokio::test]
async fn submitting_a_record_the_projection_has_not_seen_is_a_conflict() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let token = mint_jwt(jwt_secret, Uuid::now_v7(), &["admin"]);
    let client = reqwest::Client::new();

    // The availability check reads the records projection; an id it never
    // learns about must not submit.
    let res = client
        .post(format!(
            "{}/stock/records/{}/submit",
            srv.base_url,
            Uuid::now_v7()
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn admin_manages_users_and_roles() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let tenant_id = Uuid::now_v7();
    let admin_token = mint_jwt(jwt_secret, tenant_id, &["admin"]);
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/admin/users", srv.base_url))
        .bearer_auth(&admin_token)
        .json(&json!({
            "email": "Pat@Example.com",
            "display_name": "Pat",
            "initial_roles": ["warehouse"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let user_id = created["id"].as_str().unwrap().to_string();

    // Email is normalized on the way in.
    let user = get_eventually(
        &client,
        &format!("{}/admin/users/{}", srv.base_url, user_id),
        &admin_token,
    )
    .await;
    assert_eq!(user["email"], "pat@example.com");
    assert_eq!(user["status"], "Active");

    // Assign another role and inspect effective permissions.
    let res = client
        .post(format!("{}/admin/users/{}/roles", srv.base_url, user_id))
        .bearer_auth(&admin_token)
        .json(&json!({ "role": "manager" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    get_eventually_matching(
        &client,
        &format!("{}/admin/users/{}", srv.base_url, user_id),
        &admin_token,
        |body| body["roles"].as_array().unwrap().iter().any(|r| r == "manager"),
    )
    .await;

    let effective = get_eventually(
        &client,
        &format!("{}/admin/users/{}/permissions", srv.base_url, user_id),
        &admin_token,
    )
    .await;
    assert!(effective["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == "stock.records.submit"));

    // A non-admin without the management grant cannot create users.
    let warehouse_token = mint_jwt(jwt_secret, tenant_id, &["warehouse"]);
    let res = client
        .post(format!("{}/admin/users", srv.base_url))
        .bearer_auth(&warehouse_token)
        .json(&json!({ "email": "x@example.com", "display_name": "X" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn tenant_isolation_blocks_cross_tenant_reads_and_writes() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let token1 = mint_jwt(jwt_secret, Uuid::now_v7(), &["admin"]);
    let token2 = mint_jwt(jwt_secret, Uuid::now_v7(), &["admin"]);

    let client = reqwest::Client::new();

    // Tenant1 creates a product.
    let res = client
        .post(format!("{}/products", srv.base_url))
        .bearer_auth(&token1)
        .json(&json!({ "sku": "ISO-1", "name": "Isolated" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    get_eventually(&client, &format!("{}/products/{}", srv.base_url, id), &token1).await;

    // Tenant2 cannot read it (projection lookup is tenant-scoped).
    let res = client
        .get(format!("{}/products/{}", srv.base_url, id))
        .bearer_auth(&token2)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Tenant2 cannot mutate it either (dispatch happens under tenant2 context).
    let res = client
        .delete(format!("{}/products/{}", srv.base_url, id))
        .bearer_auth(&token2)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
