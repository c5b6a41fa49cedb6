//! HttpEngine tests against a local mock HTTP server.
//!
//! The engine uses `reqwest::blocking`, which must not be created or dropped
//! inside an async context, so every engine call runs in `spawn_blocking`.

use std::time::Duration;

use std::sync::{Arc, Mutex};

use batchfetch::engine::{
    BatchTransfer, EngineCode, EngineError, HttpEngine, TransferEngine, TransferRequest,
    TransferSink,
};
use batchfetch::{DownloadUnit, DownloadUnits, Downloader, DownloaderConfig, MainLoop};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct VecSink {
    data: Vec<u8>,
    progress: Vec<(u64, u64)>,
    limit: Option<usize>,
}

impl VecSink {
    fn limited(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl TransferSink for VecSink {
    fn write(&mut self, data: &[u8]) -> usize {
        if let Some(limit) = self.limit {
            if self.data.len() + data.len() > limit {
                return 0;
            }
        }
        self.data.extend_from_slice(data);
        data.len()
    }

    fn progress(&mut self, total: u64, downloaded: u64) {
        self.progress.push((total, downloaded));
    }
}

/// Sink whose first write panics, taking its worker thread down.
struct PanickingSink;

impl TransferSink for PanickingSink {
    fn write(&mut self, _data: &[u8]) -> usize {
        panic!("sink failure");
    }

    fn progress(&mut self, _total: u64, _downloaded: u64) {}
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn serve(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_full_body() {
    let server = MockServer::start().await;
    let body = payload(150_000);
    serve(&server, "/big.bin", body.clone()).await;
    let url = format!("{}/big.bin", server.uri());

    let (result, sink) = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::new();
        let mut sink = VecSink::default();
        let request = TransferRequest::new(url, "big", CONNECT_TIMEOUT);
        let result = engine.perform_download(&request, &mut sink);
        (result, sink)
    })
    .await
    .unwrap();

    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(sink.data, body);
    assert_eq!(sink.progress.first(), Some(&(150_000, 0)));
    assert_eq!(sink.progress.last(), Some(&(150_000, 150_000)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_sends_range() {
    let server = MockServer::start().await;
    let body = payload(64);
    Mock::given(method("GET"))
        .and(path("/r.bin"))
        .and(header("range", "bytes=10-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 10-63/64")
                .set_body_bytes(body[10..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;
    let url = format!("{}/r.bin", server.uri());

    let (result, sink) = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::new();
        let mut sink = VecSink::default();
        let request = TransferRequest::new(url, "r", CONNECT_TIMEOUT).resuming_from(10);
        let result = engine.perform_download(&request, &mut sink);
        (result, sink)
    })
    .await
    .unwrap();

    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(sink.data, body[10..].to_vec());
    assert_eq!(sink.progress.first(), Some(&(64, 10)));
    assert_eq!(sink.progress.last(), Some(&(64, 64)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_range_ignored_is_error() {
    let server = MockServer::start().await;
    serve(&server, "/r.bin", payload(64)).await;
    let url = format!("{}/r.bin", server.uri());

    let result = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::new();
        let request = TransferRequest::new(url, "r", CONNECT_TIMEOUT).resuming_from(10);
        engine.perform_download(&request, &mut VecSink::default())
    })
    .await
    .unwrap();

    assert_eq!(result.unwrap_err().code, EngineCode::RangeIgnored.as_native());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_at_end_of_resource_completes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/f.bin"))
        .and(header("range", "bytes=64-"))
        .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */64"))
        .expect(1)
        .mount(&server)
        .await;
    let url = format!("{}/f.bin", server.uri());

    let (result, sink) = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::new();
        let mut sink = VecSink::default();
        let request = TransferRequest::new(url, "f", CONNECT_TIMEOUT).resuming_from(64);
        let result = engine.perform_download(&request, &mut sink);
        (result, sink)
    })
    .await
    .unwrap();

    assert!(result.is_ok(), "{:?}", result);
    assert!(sink.data.is_empty());
    assert_eq!(sink.progress, vec![(64, 64)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_beyond_end_of_resource() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/f.bin"))
        .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */64"))
        .mount(&server)
        .await;
    let url = format!("{}/f.bin", server.uri());

    let (result, sink) = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::new();
        let mut sink = VecSink::default();
        let request = TransferRequest::new(url, "f", CONNECT_TIMEOUT).resuming_from(80);
        let result = engine.perform_download(&request, &mut sink);
        (result, sink)
    })
    .await
    .unwrap();

    assert_eq!(result.unwrap_err().code, EngineCode::BadResume.as_native());
    assert!(sink.progress.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_retry_with_complete_temp_file() {
    let server = MockServer::start().await;
    let body = payload(64);
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("accept-ranges", "bytes"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/f.bin"))
        .and(header("range", "bytes=64-"))
        .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */64"))
        .mount(&server)
        .await;
    let url = format!("{}/f.bin", server.uri());

    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("f.bin");
    std::fs::write(temp.path().join("f.bin.temp"), &body).unwrap();

    let (errors, successes) = tokio::task::spawn_blocking({
        let dest = dest.clone();
        move || {
            let main_loop = MainLoop::new();
            let downloader = Downloader::http(Arc::new(main_loop.handle()), &DownloaderConfig::default());
            let errors = Arc::new(Mutex::new(Vec::new()));
            let successes = Arc::new(Mutex::new(Vec::new()));

            let sink = Arc::clone(&errors);
            downloader.set_error_handler(move |report| {
                sink.lock().unwrap().push((report.code(), report.message()));
            });
            let sink = Arc::clone(&successes);
            downloader.set_success_handler(move |_, _, id| {
                sink.lock().unwrap().push(id.to_string());
            });

            let units = DownloadUnits::try_from_units(vec![
                DownloadUnit::to_file(url, dest, "f").with_resume(true),
            ])
            .unwrap();
            downloader.batch_download_sync(&units, "retry").unwrap();

            drop(downloader);
            let errors = errors.lock().unwrap().clone();
            let successes = successes.lock().unwrap().clone();
            (errors, successes)
        }
    })
    .await
    .unwrap();

    assert!(errors.is_empty(), "{:?}", errors);
    assert_eq!(successes, vec!["retry".to_string()]);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!temp.path().join("f.bin.temp").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_http_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let url = format!("{}/missing", server.uri());

    let (result, last_error) = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::new();
        let request = TransferRequest::new(url, "m", CONNECT_TIMEOUT);
        let result = engine.perform_download(&request, &mut VecSink::default());
        (result, engine.last_error())
    })
    .await
    .unwrap();

    let err = result.unwrap_err();
    assert_eq!(err.code, EngineCode::HttpStatus.as_native());
    assert!(err.message.contains("404"));
    assert_eq!(last_error, err.message);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_short_sink_write_aborts() {
    let server = MockServer::start().await;
    serve(&server, "/big.bin", payload(4096)).await;
    let url = format!("{}/big.bin", server.uri());

    let (result, sink) = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::new();
        let mut sink = VecSink::limited(100);
        let request = TransferRequest::new(url, "big", CONNECT_TIMEOUT);
        let result = engine.perform_download(&request, &mut sink);
        (result, sink)
    })
    .await
    .unwrap();

    assert_eq!(result.unwrap_err().code, EngineCode::Write.as_native());
    assert!(sink.data.len() <= 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_error() {
    let result = tokio::task::spawn_blocking(|| {
        let engine = HttpEngine::new();
        let request = TransferRequest::new("http://127.0.0.1:1/nothing", "x", CONNECT_TIMEOUT);
        engine.perform_download(&request, &mut VecSink::default())
    })
    .await
    .unwrap();

    assert_eq!(result.unwrap_err().code, EngineCode::Connect.as_native());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_supports_resume_probe() {
    let ranged = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(header("range", "bytes=0-"))
        .respond_with(ResponseTemplate::new(206))
        .mount(&ranged)
        .await;

    let advertised = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("accept-ranges", "bytes"))
        .mount(&advertised)
        .await;

    let plain = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&plain)
        .await;

    let urls = [
        format!("{}/a", ranged.uri()),
        format!("{}/a", advertised.uri()),
        format!("{}/a", plain.uri()),
    ];

    let results = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::new();
        urls.iter()
            .map(|url| {
                engine.init(url);
                engine.supports_resume()
            })
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();

    assert_eq!(results, vec![true, true, false]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_with_unreachable_member() {
    let server = MockServer::start().await;
    let a = payload(70_000);
    let b = payload(300);
    serve(&server, "/a.bin", a.clone()).await;
    serve(&server, "/b.bin", b.clone()).await;
    let base = server.uri();

    let (sinks, multi_errors) = tokio::task::spawn_blocking(move || {
        let engine = HttpEngine::with_settings(Duration::from_secs(30), 2);
        let mut sinks: Vec<VecSink> = (0..3).map(|_| VecSink::default()).collect();
        let requests = [
            TransferRequest::new(format!("{}/a.bin", base), "A", CONNECT_TIMEOUT),
            TransferRequest::new(format!("{}/b.bin", base), "B", CONNECT_TIMEOUT),
            TransferRequest::new("http://127.0.0.1:1/c.bin", "C", CONNECT_TIMEOUT),
        ];

        let errors = std::sync::Mutex::new(Vec::new());
        {
            let transfers: Vec<BatchTransfer<'_>> = requests
                .iter()
                .zip(sinks.iter_mut())
                .map(|(request, sink)| BatchTransfer {
                    request: request.clone(),
                    sink,
                })
                .collect();
            engine.perform_batch_download(transfers, &|err: EngineError, id: &str| {
                errors.lock().unwrap().push((err.code, id.to_string()));
            });
        }
        (sinks, errors.into_inner().unwrap())
    })
    .await
    .unwrap();

    assert_eq!(sinks[0].data, a);
    assert_eq!(sinks[0].progress.last(), Some(&(70_000, 70_000)));
    assert_eq!(sinks[1].data, b);
    assert!(sinks[2].data.is_empty());
    assert!(sinks[2].progress.is_empty());
    // Per-transfer failures are not multiplexing failures.
    assert!(multi_errors.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_reports_transfers_stranded_by_worker_panic() {
    let server = MockServer::start().await;
    serve(&server, "/a.bin", payload(32)).await;
    serve(&server, "/b.bin", payload(32)).await;
    serve(&server, "/c.bin", payload(32)).await;
    let base = server.uri();

    let (errors, rest) = tokio::task::spawn_blocking(move || {
        // One worker: once it dies nothing else is left to drain the queue.
        let engine = HttpEngine::with_settings(Duration::from_secs(30), 1);
        let mut first = PanickingSink;
        let mut rest: Vec<VecSink> = (0..2).map(|_| VecSink::default()).collect();

        let mut transfers = vec![BatchTransfer {
            request: TransferRequest::new(format!("{}/a.bin", base), "A", CONNECT_TIMEOUT),
            sink: &mut first,
        }];
        for (id, sink) in ["B", "C"].into_iter().zip(rest.iter_mut()) {
            transfers.push(BatchTransfer {
                request: TransferRequest::new(
                    format!("{}/{}.bin", base, id.to_lowercase()),
                    id,
                    CONNECT_TIMEOUT,
                ),
                sink,
            });
        }

        let errors = Mutex::new(Vec::new());
        engine.perform_batch_download(transfers, &|err: EngineError, id: &str| {
            errors.lock().unwrap().push((err.code, id.to_string()));
        });
        (errors.into_inner().unwrap(), rest)
    })
    .await
    .unwrap();

    let panic_code = EngineCode::WorkerPanic.as_native();
    assert_eq!(
        errors,
        vec![
            (panic_code, "A".to_string()),
            (panic_code, "B".to_string()),
            (panic_code, "C".to_string()),
        ]
    );
    assert!(rest.iter().all(|sink| sink.data.is_empty()));
}
