use std::io::Write;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;
use trailsync_catalog::kinds;
use trailsync_storage::Filter;
use trailsync_sync::{build_pipeline, run_kinds, TrailsyncConfig};

const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<datalist>
  <data id="11"/>
  <data id="12"/>
  <data id="13"/>
  <data id="11"/>
</datalist>"#;

fn tour(id: &str, length: &str, minutes: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<oois>
  <tour id="{id}">
    <title>Tour {id}</title>
    <length>{length}</length>
    <time min="{minutes}"/>
    <regions><region type="tourismarea" name="Allgäu"/></regions>
  </tour>
</oois>"#
    )
}

struct CatalogStub {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CatalogStub {
    fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start catalog stub");
        let base_url = format!("http://{}", server.server_addr());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let url = request.url().to_string();
            seen.lock().unwrap().push(url.clone());
            let path = url.split('?').next().unwrap_or(&url).to_string();
            let (status, body) = match path.as_str() {
                "/api/project/demo/filter/tour" => (200, LISTING.to_string()),
                "/api/project/demo/oois/11" => (200, tour("11", "1000", "30")),
                "/api/project/demo/oois/12" => (200, tour("12", "2500", "45")),
                "/api/project/demo/oois/13" => (500, "upstream error".to_string()),
                _ => (404, "not found".to_string()),
            };
            let response = tiny_http::Response::from_string(body).with_status_code(status);
            let _ = request.respond(response);
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.requests.lock().unwrap().clear();
    }
}

impl Drop for CatalogStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn config_file(base_url: &str, region: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "catalog:\n  base_url: {base_url}\n  project: demo\n  api_key: k3y\n  \
         region: '{region}'\n  timeout_secs: 5\n\
         store:\n  backend: memory\n  table_prefix: dev_\n\
         execution:\n  mode: immediate\n  concurrency: 2\n"
    )
    .unwrap();
    file
}

#[tokio::test]
async fn trail_run_against_the_catalog_is_idempotent() {
    let stub = CatalogStub::spawn();
    let file = config_file(&stub.base_url, "1022");
    let config = TrailsyncConfig::load(file.path()).unwrap();
    let pipeline = build_pipeline(&config).await.unwrap();
    let trail = kinds::trail();

    let first = pipeline.run_once(&trail).await.unwrap();
    assert_eq!(first.listed, 4);
    assert_eq!(first.inserted, 2);
    assert_eq!(first.failed, 1);
    assert_eq!(first.aggregate.count, 2);
    assert_eq!(first.aggregate.sum_distance_meters, 3500.0);
    assert_eq!(first.aggregate.sum_duration_minutes, 75);
    assert!(stub.requests()[0].ends_with("?key=k3y&area=1022"));

    let stats = pipeline.store().select("dev_DailyStats", &[]).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["region"], json!("1022"));
    assert_eq!(stats[0]["total_trails"], json!(2));
    assert_eq!(stats[0]["total_distance"], json!(3));
    assert_eq!(stats[0]["total_duration"], json!("1:15:00"));

    stub.clear();
    let second = pipeline.run_once(&trail).await.unwrap();
    assert_eq!((second.inserted, second.updated, second.skipped), (0, 0, 2));
    assert_eq!(second.aggregate, first.aggregate);
    assert_ne!(second.run_id, first.run_id);

    let fetched: Vec<String> = stub
        .requests()
        .into_iter()
        .filter(|url| url.contains("/oois/"))
        .collect();
    assert_eq!(fetched.len(), 1);
    assert!(fetched[0].starts_with("/api/project/demo/oois/13"));

    let stats = pipeline.store().select("dev_DailyStats", &[]).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["total_trails"], json!(2));

    let stored = pipeline
        .store()
        .select("dev_Trails", &[Filter::eq("trail_id", "12")])
        .await
        .unwrap();
    assert_eq!(stored[0]["region"], json!("1022"));
    assert_eq!(stored[0]["new"], json!(true));
}

#[tokio::test]
async fn a_failing_kind_stops_the_sequence() {
    let stub = CatalogStub::spawn();
    let file = config_file(&stub.base_url, "0");
    let config = TrailsyncConfig::load(file.path()).unwrap();
    let pipeline = build_pipeline(&config).await.unwrap();

    let err = run_kinds(&pipeline, &[kinds::trail(), kinds::event(), kinds::point_of_interest()])
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("sync run for event"));

    assert!(stub.requests()[0].ends_with("?key=k3y"));
    let stats = pipeline.store().select("dev_DailyStats", &[]).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["region"], json!("0"));
    assert!(stats[0].get("total_events").is_none());
}
