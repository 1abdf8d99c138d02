use std::sync::Arc;

use reqwest::StatusCode;

use pantry_api::app::{build_app, services};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Build app (same router as prod) over in-memory storage, on an ephemeral port.
        let app = build_app(Arc::new(services::in_memory_services()));
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

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn add_item(client: &reqwest::Client, srv: &TestServer, fields: &[(&str, &str)]) -> reqwest::Response {
    client
        .post(srv.url("/item/add"))
        .form(fields)
        .send()
        .await
        .unwrap()
}

async fn update(client: &reqwest::Client, srv: &TestServer, name: &str, action: &str) -> reqwest::Response {
    client
        .post(srv.url("/item/update"))
        .form(&[("itemName", name), ("action", action)])
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn rice_lifecycle_over_http() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = add_item(
        &client,
        &srv,
        &[
            ("itemName", "Rice"),
            ("itemQTY", "5"),
            ("minimumQTY", "2"),
            ("itemExpirationPeriod", "30"),
        ],
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    assert!(created["id"].as_i64().unwrap() > 0);

    let res = update(&client, &srv, "Rice", "+").await;
    assert_eq!(res.status(), StatusCode::OK);
    let snap: serde_json::Value = res.json().await.unwrap();
    assert_eq!(snap["itemQTY"], 6);

    for _ in 0..3 {
        let res = update(&client, &srv, "Rice", "-").await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = client
        .post(srv.url("/item/dispose"))
        .form(&[("itemName", "Rice")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let tossed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(tossed["itemQTY"], 2);
    assert_eq!(tossed["itemTotalTossed"], 1);

    let items: Vec<serde_json::Value> = client
        .get(srv.url("/items"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["itemName"], "Rice");
    assert_eq!(items[0]["itemQTY"], 2);
    assert_eq!(items[0]["itemUsedToDate"], 3);
    assert_eq!(items[0]["itemTypeName"], "");
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = update(&client, &srv, "Ghost", "-").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let fields = [
        ("itemName", "Salt"),
        ("itemQTY", "0"),
        ("minimumQTY", "1"),
        ("itemExpirationPeriod", "365"),
    ];
    assert_eq!(add_item(&client, &srv, &fields).await.status(), StatusCode::CREATED);
    assert_eq!(add_item(&client, &srv, &fields).await.status(), StatusCode::CONFLICT);

    let res = update(&client, &srv, "Salt", "-").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_stock");

    assert_eq!(update(&client, &srv, "Salt", "x").await.status(), StatusCode::BAD_REQUEST);

    let res = add_item(
        &client,
        &srv,
        &[
            ("itemName", "Pepper"),
            ("itemQTY", "lots"),
            ("minimumQTY", "1"),
            ("itemExpirationPeriod", "365"),
        ],
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = add_item(
        &client,
        &srv,
        &[
            ("itemName", "Pepper"),
            ("itemQTY", "1"),
            ("minimumQTY", "1"),
            ("itemExpirationPeriod", "365"),
            ("itemTypeID", "77"),
        ],
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = add_item(
        &client,
        &srv,
        &[
            ("itemName", "Pepper"),
            ("itemQTY", "1"),
            ("minimumQTY", "1"),
            ("itemExpirationPeriod", "1000000000000"),
        ],
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn lookups_feed_item_listing_filters() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/types"))
        .form(&[("name", "Canned")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let type_id = res.json::<serde_json::Value>().await.unwrap()["id"].to_string();

    let res = client
        .post(srv.url("/substitutions"))
        .form(&[("name", "Frozen peas")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let sub_id = res.json::<serde_json::Value>().await.unwrap()["id"].to_string();

    let res = add_item(
        &client,
        &srv,
        &[
            ("itemName", "Peas"),
            ("itemQTY", "1"),
            ("minimumQTY", "3"),
            ("itemExpirationPeriod", "400"),
            ("itemTypeID", type_id.as_str()),
            ("itemSubstitutionID", sub_id.as_str()),
        ],
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = add_item(
        &client,
        &srv,
        &[
            ("itemName", "Soap"),
            ("itemQTY", "4"),
            ("minimumQTY", "1"),
            ("itemExpirationPeriod", "900"),
        ],
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let types: Vec<serde_json::Value> = client
        .get(srv.url("/types"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0]["name"], "Canned");

    let canned: Vec<serde_json::Value> = client
        .get(srv.url("/items?type=Canned&under_minimum=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(canned.len(), 1);
    assert_eq!(canned[0]["itemName"], "Peas");
    assert_eq!(canned[0]["itemSubstitutionName"], "Frozen peas");

    let first: Vec<serde_json::Value> = client
        .get(srv.url("/items?limit=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["itemName"], "Peas");
}
