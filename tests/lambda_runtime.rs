use gtfs_transformer::config::Config;
use gtfs_transformer::contract::{MockObjectStore, MockTransformer, StoreError};
use gtfs_transformer::lambda::{
    run_loop, runtime_base_url, ErrorReport, RuntimeClient, RuntimeError,
};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[test]
fn test_runtime_base_url_accepts_host_port_and_full_urls() {
    assert_eq!(
        runtime_base_url("127.0.0.1:9001"),
        "http://127.0.0.1:9001/2018-06-01/runtime"
    );
    assert_eq!(
        runtime_base_url("http://localhost:9001/"),
        "http://localhost:9001/2018-06-01/runtime"
    );
}

#[test]
fn test_error_report_uses_runtime_field_names() {
    let report = ErrorReport::new("Pipeline.download", "object not found");
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "errorMessage": "object not found",
            "errorType": "Pipeline.download"
        })
    );
}

/// One HTTP/1.1 request as seen by the fake runtime API.
#[derive(Debug)]
struct Request {
    line: String,
    head: String,
    body: String,
}

impl Request {
    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    }
}

async fn read_request(stream: &mut TcpStream) -> Request {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending body");
        buf.extend_from_slice(&chunk[..n]);
    }
    let line = head.lines().next().unwrap_or_default().to_string();
    let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();
    Request { line, head, body }
}

async fn reply(stream: &mut TcpStream, status: &str, extra_headers: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();
}

/// Hands out one invocation, accepts its result, then fails the next poll
/// so `run_loop` returns.
async fn serve_single_invocation(
    listener: TcpListener,
    request_id: &'static str,
    event: &'static str,
) -> Vec<Request> {
    let mut seen = Vec::new();

    let (mut stream, _) = listener.accept().await.unwrap();
    seen.push(read_request(&mut stream).await);
    let headers = format!(
        "Lambda-Runtime-Aws-Request-Id: {request_id}\r\nContent-Type: application/json\r\n"
    );
    reply(&mut stream, "200 OK", &headers, event).await;

    let (mut stream, _) = listener.accept().await.unwrap();
    seen.push(read_request(&mut stream).await);
    reply(&mut stream, "202 Accepted", "", "").await;

    let (mut stream, _) = listener.accept().await.unwrap();
    seen.push(read_request(&mut stream).await);
    reply(&mut stream, "500 Internal Server Error", "", "").await;

    seen
}

const FEED_EVENT: &str = r#"{"Records":[{"eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"feeds"},"object":{"key":"feed.zip"}}}]}"#;

fn missing_object_store() -> MockObjectStore {
    let mut store = MockObjectStore::new();
    store.expect_get_object().times(1).returning(|bucket, key, _| {
        Err(StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    });
    store.expect_put_object().never();
    store
}

async fn run_single_failing_invocation(fail_on_error: bool) -> Vec<Request> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_single_invocation(listener, "req-7", FEED_EVENT));

    let work = tempdir().unwrap();
    let mut config = Config::default();
    config.fail_on_error = fail_on_error;
    config.workspace.root = work.path().to_path_buf();
    let store = missing_object_store();
    let mut transformer = MockTransformer::new();
    transformer.expect_transform().never();

    let client = RuntimeClient::new(&addr.to_string()).unwrap();
    let err = run_loop(&client, &config, &store, &transformer)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Status { status: 500, .. }), "got: {err}");

    server.await.unwrap()
}

#[tokio::test]
async fn test_run_loop_posts_invocation_error_when_failures_are_surfaced() {
    let seen = run_single_failing_invocation(true).await;

    assert_eq!(seen[0].line, "GET /2018-06-01/runtime/invocation/next HTTP/1.1");
    assert_eq!(
        seen[1].line,
        "POST /2018-06-01/runtime/invocation/req-7/error HTTP/1.1"
    );
    assert_eq!(
        seen[1].header("Lambda-Runtime-Function-Error-Type").as_deref(),
        Some("Unhandled")
    );
    let report: serde_json::Value = serde_json::from_str(&seen[1].body).unwrap();
    assert_eq!(report["errorType"], "Pipeline.download");
    assert!(report["errorMessage"]
        .as_str()
        .unwrap()
        .contains("s3://feeds/feed.zip"));
    assert_eq!(seen[2].line, "GET /2018-06-01/runtime/invocation/next HTTP/1.1");
}

#[tokio::test]
async fn test_run_loop_answers_done_when_failures_are_swallowed() {
    let seen = run_single_failing_invocation(false).await;

    assert_eq!(
        seen[1].line,
        "POST /2018-06-01/runtime/invocation/req-7/response HTTP/1.1"
    );
    assert_eq!(seen[1].header("Lambda-Runtime-Function-Error-Type"), None);
    assert_eq!(seen[1].body, "\"Done\"");
}

#[tokio::test]
async fn test_init_failure_is_posted_to_init_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        reply(&mut stream, "202 Accepted", "", "").await;
        request
    });

    let client = RuntimeClient::new(&addr.to_string()).unwrap();
    client
        .report_init_failure(
            "Runtime.StoreError",
            &"access key id and secret access key must be set together",
        )
        .await;

    let request = server.await.unwrap();
    assert_eq!(request.line, "POST /2018-06-01/runtime/init/error HTTP/1.1");
    let report: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(report["errorType"], "Runtime.StoreError");
}

#[tokio::test]
async fn test_client_fetches_invocation_and_posts_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut seen = Vec::new();

        let (mut stream, _) = listener.accept().await.unwrap();
        seen.push(read_request(&mut stream).await);
        reply(
            &mut stream,
            "200 OK",
            "Lambda-Runtime-Aws-Request-Id: req-42\r\nContent-Type: application/json\r\n",
            r#"{"Records":[]}"#,
        )
        .await;

        let (mut stream, _) = listener.accept().await.unwrap();
        seen.push(read_request(&mut stream).await);
        reply(&mut stream, "202 Accepted", "", "").await;

        seen
    });

    let client = RuntimeClient::new(&addr.to_string()).unwrap();
    let invocation = client.next_invocation().await.expect("next invocation");
    assert_eq!(invocation.request_id, "req-42");
    assert_eq!(invocation.payload, br#"{"Records":[]}"#);

    client
        .send_response(&invocation.request_id, "Done")
        .await
        .expect("response accepted");

    let seen = server.await.unwrap();
    assert_eq!(seen[0].line, "GET /2018-06-01/runtime/invocation/next HTTP/1.1");
    assert_eq!(
        seen[1].line,
        "POST /2018-06-01/runtime/invocation/req-42/response HTTP/1.1"
    );
    assert_eq!(seen[1].body, "\"Done\"");
}
