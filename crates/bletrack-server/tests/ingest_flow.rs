//! End-to-end test: a real listener, a real datastore, HTTP from a gateway.

use std::net::SocketAddr;
use std::path::Path;

use bletrack_core::{DeviceId, Ingestor, Settings, Storage, TagTable};
use bletrack_server::api::create_router;
use bletrack_server::state::AppState;
use serde_json::Value;
use reqwest::Client;
use tempfile::TempDir;
use tokio::net::TcpListener;

async fn spawn_server(datastore: &Path, tag_table: &Path) -> (SocketAddr, Storage) {
    let settings = Settings {
        datastore_path: datastore.to_path_buf(),
        tag_table_path: Some(tag_table.to_path_buf()),
        dedup_interval_seconds: 30,
        ..Settings::default()
    };

    let storage = Storage::initialize(&settings.datastore_path).unwrap();
    let tags = TagTable::load(settings.tag_table_path.as_deref()).unwrap();
    let ingestor = Ingestor::from_settings(&settings, tags, storage.clone());
    let timeout = settings.request_timeout();
    let app = create_router(AppState::new(ingestor, settings).shared(), timeout);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, storage)
}

/// Sends one request and returns the status code and JSON body.
async fn send(client: &Client, addr: SocketAddr, path: &str, body: Option<&str>) -> (u16, Value) {
    let url = format!("http://{addr}{path}");
    let request = match body {
        Some(body) => client
            .post(url)
            .header("content-type", "application/json")
            .body(body.to_string()),
        None => client.get(url),
    };

    let response = request.send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_gateway_reports_end_to_end() {
    let dir = TempDir::new().unwrap();
    let tag_table = dir.path().join("tags.toml");
    std::fs::write(
        &tag_table,
        r#"
        [[tags]]
        name = "WHEELCHAIR_A"
        device = "AA:BB:CC:DD:EE:01"
        kind = "equipment"

        [[tags]]
        name = "ACME_BEACON"
        prefix = "AC:23:3F"
        "#,
    )
    .unwrap();
    let (addr, storage) = spawn_server(&dir.path().join("data/sightings.db"), &tag_table).await;
    let client = Client::new();

    let (status, live) = send(&client, addr, "/api/live-open", None).await;
    assert_eq!(status, 200);
    assert_eq!(live["status"], "ok");

    let (status, first) = send(
        &client,
        addr,
        "/api/ingest",
        Some(r#"{"device_id": "aa:bb:cc:dd:ee:01", "rssi": -48}"#),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(first["status"], "stored");
    assert_eq!(first["tag"], "WHEELCHAIR_A");
    assert_eq!(first["tag_kind"], "equipment");

    let (status, repeat) = send(
        &client,
        addr,
        "/api/ingest",
        Some(r#"{"device_id": "AA:BB:CC:DD:EE:01", "rssi": -52}"#),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(repeat["status"], "deduplicated");

    let (status, rejected) = send(
        &client,
        addr,
        "/api/ingest",
        Some(r#"{"device_id": "AA:BB:CC:DD:EE:01", "rssi": -120}"#),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(rejected["error"], "invalid_rssi");

    let (status, batch) = send(
        &client,
        addr,
        "/api/ingest/batch",
        Some(
            r#"[
                {"mac": "AC:23:3F:00:00:09", "rssi": -77},
                {"rssi": -60}
            ]"#,
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(batch["stored"], 1);
    assert_eq!(batch["failed"], 1);
    assert_eq!(batch["results"][1]["error"], "missing_field");

    let beacon = DeviceId::parse("AC:23:3F:00:00:09").unwrap();
    let rows = storage.sightings_for(&beacon).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].sighting.tag.as_deref(), Some("ACME_BEACON"));
    assert_eq!(
        rows[0].sighting.raw_payload.as_deref(),
        Some(r#"{"mac": "AC:23:3F:00:00:09", "rssi": -77}"#)
    );
    assert_eq!(rows[0].sighting.gateway, Some("127.0.0.1".parse().unwrap()));

    let (status, health) = send(&client, addr, "/health", None).await;
    assert_eq!(status, 200);
    assert_eq!(health["stored_sightings"], 2);
    assert_eq!(health["tracked_devices"], 2);
}
