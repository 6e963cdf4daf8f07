//! Dispatcher placement and reconciliation tests against mocked crawl servers

use async_trait::async_trait;
use dirscout::config::CrawlServerEntry;
use dirscout::dispatcher::{CrawlServerClient, TaskDispatcher};
use dirscout::index::{IndexError, MetadataStore, SearchIndex, SqliteMetadata};
use dirscout::task::{Task, TaskResult};
use dirscout::DirscoutError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// In-test index that records calls and can fail on demand
#[derive(Default)]
struct RecordingIndex {
    deletes: Mutex<Vec<i64>>,
    imports: Mutex<Vec<(i64, Vec<u8>)>>,
    failing_deletes: AtomicUsize,
}

#[async_trait]
impl SearchIndex for RecordingIndex {
    async fn import(&self, website_id: i64, ndjson: &[u8]) -> Result<(), IndexError> {
        self.imports
            .lock()
            .unwrap()
            .push((website_id, ndjson.to_vec()));
        Ok(())
    }

    async fn delete_all(&self, website_id: i64) -> Result<(), IndexError> {
        if self.failing_deletes.load(Ordering::SeqCst) > 0 {
            self.failing_deletes.fetch_sub(1, Ordering::SeqCst);
            return Err(IndexError::Status(500));
        }
        self.deletes.lock().unwrap().push(website_id);
        Ok(())
    }
}

fn task(website_id: i64) -> Task {
    Task {
        website_id,
        url: format!("http://site{}.example/", website_id),
        priority: 1,
        callback_type: None,
        callback_args: None,
        upload_token: None,
    }
}

fn result(website_id: i64, status_code: &str, file_count: u64) -> TaskResult {
    TaskResult {
        website_id,
        status_code: status_code.to_string(),
        file_count,
        start_time: 100,
        end_time: 160,
    }
}

fn client_for(server: &MockServer, name: &str, slots: u32) -> Arc<CrawlServerClient> {
    Arc::new(
        CrawlServerClient::new(&CrawlServerEntry {
            name: name.to_string(),
            url: server.uri(),
            slots,
            token: format!("{}-token", name),
        })
        .unwrap(),
    )
}

async fn mock_tasks(server: &MockServer, route: &str, tasks: &[Task]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(tasks))
        .mount(server)
        .await;
}

fn temp_metadata() -> (tempfile::TempDir, Arc<SqliteMetadata>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteMetadata::new(&dir.path().join("meta.sqlite3")).unwrap());
    (dir, store)
}

fn dispatcher(
    servers: Vec<Arc<CrawlServerClient>>,
    index: Arc<RecordingIndex>,
    metadata: Arc<SqliteMetadata>,
) -> TaskDispatcher {
    let metadata: Arc<dyn MetadataStore> = metadata;
    TaskDispatcher::new(servers, index, metadata)
}

#[tokio::test]
async fn test_dispatch_picks_server_with_most_free_slots() {
    let alpha = MockServer::start().await;
    let beta = MockServer::start().await;

    // alpha: 5 slots, 3 busy. beta: 10 slots, 2 busy.
    mock_tasks(&alpha, "/task/", &[task(101), task(102)]).await;
    mock_tasks(&alpha, "/task/current", &[task(103)]).await;
    mock_tasks(&beta, "/task/", &[task(104)]).await;
    mock_tasks(&beta, "/task/current", &[task(105)]).await;

    Mock::given(method("POST"))
        .and(path("/task/put"))
        .and(header("authorization", "Bearer beta-token"))
        .and(body_string_contains("\"website_id\":1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&beta)
        .await;

    let (_dir, metadata) = temp_metadata();
    let dispatcher = dispatcher(
        vec![client_for(&alpha, "alpha", 5), client_for(&beta, "beta", 10)],
        Arc::new(RecordingIndex::default()),
        metadata,
    );

    let placed_on = dispatcher.dispatch_task(&task(1)).await.unwrap();
    assert_eq!(placed_on, "beta");
}

#[tokio::test]
async fn test_dispatch_refuses_website_already_in_flight() {
    let alpha = MockServer::start().await;
    mock_tasks(&alpha, "/task/", &[]).await;
    mock_tasks(&alpha, "/task/current", &[task(42)]).await;

    let (_dir, metadata) = temp_metadata();
    let dispatcher = dispatcher(
        vec![client_for(&alpha, "alpha", 5)],
        Arc::new(RecordingIndex::default()),
        metadata,
    );

    let outcome = dispatcher.dispatch_task(&task(42)).await;
    assert!(matches!(
        outcome,
        Err(DirscoutError::AlreadyInFlight { website_id: 42 })
    ));
}

#[tokio::test]
async fn test_dispatch_fails_when_no_server_is_reachable() {
    let entry = CrawlServerEntry {
        name: "ghost".to_string(),
        url: "http://127.0.0.1:1/".to_string(),
        slots: 5,
        token: "ghost-token".to_string(),
    };
    let (_dir, metadata) = temp_metadata();
    let dispatcher = dispatcher(
        vec![Arc::new(CrawlServerClient::new(&entry).unwrap())],
        Arc::new(RecordingIndex::default()),
        metadata,
    );

    let outcome = dispatcher.dispatch_task(&task(8)).await;
    assert!(matches!(
        outcome,
        Err(DirscoutError::NoServerAvailable { website_id: 8 })
    ));
}

#[tokio::test]
async fn test_reconcile_imports_and_frees_successful_results() {
    let server = MockServer::start().await;
    let ndjson = "{\"name\":\"a.txt\",\"path\":\"\",\"size\":1,\"mtime\":2}\n";

    Mock::given(method("GET"))
        .and(path("/task/completed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vec![result(7, "success", 1)]),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/task/completed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<TaskResult>::new()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file_list/7/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file_list/7/free"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let index = Arc::new(RecordingIndex::default());
    let (_dir, metadata) = temp_metadata();
    let dispatcher = dispatcher(
        vec![client_for(&server, "alpha", 5)],
        Arc::clone(&index),
        Arc::clone(&metadata),
    );

    dispatcher.reconcile_cycle().await.unwrap();

    assert_eq!(*index.deletes.lock().unwrap(), vec![7]);
    let imports = index.imports.lock().unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].0, 7);
    assert_eq!(imports[0].1, ndjson.as_bytes());
    assert!(metadata.last_modified(7).unwrap().is_some());
}

#[tokio::test]
async fn test_large_file_lists_are_imported_in_bounded_chunks() {
    let server = MockServer::start().await;

    // ~6.5 MB of NDJSON, well past the 5 MB chunk bound.
    let line = "{\"name\":\"archive.bin\",\"path\":\"pub/mirror\",\"size\":123456,\"mtime\":1500000000}\n";
    let body = line.repeat(80_000);

    Mock::given(method("GET"))
        .and(path("/task/completed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vec![result(13, "success", 80_000)]),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/task/completed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<TaskResult>::new()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file_list/13/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.clone(), "application/x-ndjson"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file_list/13/free"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let index = Arc::new(RecordingIndex::default());
    let (_dir, metadata) = temp_metadata();
    let dispatcher = dispatcher(
        vec![client_for(&server, "alpha", 5)],
        Arc::clone(&index),
        metadata,
    );

    dispatcher.reconcile_cycle().await.unwrap();

    let imports = index.imports.lock().unwrap();
    assert!(imports.len() >= 2, "expected multiple bounded chunks");
    let mut reassembled = Vec::new();
    for (website_id, chunk) in imports.iter() {
        assert_eq!(*website_id, 13);
        // Chunks stay bounded and split cleanly at line boundaries.
        assert!(chunk.len() <= 6 * 1024 * 1024);
        assert_eq!(chunk.last(), Some(&b'\n'));
        reassembled.extend_from_slice(chunk);
    }
    assert_eq!(reassembled, body.as_bytes());
}

#[tokio::test]
async fn test_reconcile_skips_import_for_failed_crawls() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/task/completed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vec![result(9, "timeout", 0)]),
        )
        .mount(&server)
        .await;
    // Failed crawls leave no buffer behind.
    Mock::given(method("GET"))
        .and(path("/file_list/9/free"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file_list/9/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&server)
        .await;

    let index = Arc::new(RecordingIndex::default());
    let (_dir, metadata) = temp_metadata();
    let dispatcher = dispatcher(
        vec![client_for(&server, "alpha", 5)],
        Arc::clone(&index),
        Arc::clone(&metadata),
    );

    dispatcher.reconcile_cycle().await.unwrap();

    assert_eq!(*index.deletes.lock().unwrap(), vec![9]);
    assert!(index.imports.lock().unwrap().is_empty());
    assert!(metadata.last_modified(9).unwrap().is_some());
}

#[tokio::test]
async fn test_claimed_result_survives_a_failing_cycle() {
    let server = MockServer::start().await;
    let ndjson = "{\"name\":\"b.txt\",\"path\":\"\",\"size\":3,\"mtime\":4}\n";

    // The result is handed out exactly once; losing it is not an option.
    Mock::given(method("GET"))
        .and(path("/task/completed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vec![result(11, "success", 1)]),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/task/completed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<TaskResult>::new()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file_list/11/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file_list/11/free"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let index = Arc::new(RecordingIndex::default());
    index.failing_deletes.store(1, Ordering::SeqCst);

    let (_dir, metadata) = temp_metadata();
    let dispatcher = dispatcher(
        vec![client_for(&server, "alpha", 5)],
        Arc::clone(&index),
        Arc::clone(&metadata),
    );

    // First cycle claims the result but fails at the index.
    dispatcher.reconcile_cycle().await.unwrap();
    assert!(index.imports.lock().unwrap().is_empty());
    assert!(metadata.last_modified(11).unwrap().is_none());

    // Second cycle retries the pending result and completes it.
    dispatcher.reconcile_cycle().await.unwrap();
    assert_eq!(index.imports.lock().unwrap().len(), 1);
    assert!(metadata.last_modified(11).unwrap().is_some());
}

#[tokio::test]
async fn test_redispatch_moves_drained_tasks() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/task/pop_all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![task(21)]))
        .expect(1)
        .mount(&server)
        .await;
    mock_tasks(&server, "/task/", &[]).await;
    mock_tasks(&server, "/task/current", &[]).await;
    Mock::given(method("POST"))
        .and(path("/task/put"))
        .and(body_string_contains("\"website_id\":21"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, metadata) = temp_metadata();
    let dispatcher = dispatcher(
        vec![client_for(&server, "alpha", 5)],
        Arc::new(RecordingIndex::default()),
        metadata,
    );

    let moved = dispatcher.redispatch_queued().await.unwrap();
    assert_eq!(moved, 1);
}
