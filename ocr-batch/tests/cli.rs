use assert_cmd::Command;
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, Uri};
use axum::{Json, Router};
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs::{self, write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;

const PROXY_VARS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "ALL_PROXY",
    "all_proxy",
];

/// Writes a config pointing the provider at `endpoint` with fast retries.
fn write_config(dir: &Path, input_dir: &Path, endpoint: &str) -> std::path::PathBuf {
    let path = dir.join("config.yaml");
    let yaml = format!(
        "input_dir: {input}\noutput:\n  json_dir: {out}/json\n  markdown_dir: {out}/markdown\nprovider:\n  model_id: us.amazon.nova-lite-v1:0\n  endpoint: {endpoint}\n  request_timeout_secs: 5\ndispatch:\n  max_concurrent: 2\n  max_retries: 2\n  base_delay_ms: 1\n  max_delay_ms: 5\n",
        input = input_dir.display(),
        out = dir.join("out").display(),
    );
    write(&path, yaml).expect("Writing temp config failed");
    path
}

fn input_with(names: &[&str]) -> TempDir {
    let dir = tempdir().unwrap();
    for name in names {
        write(dir.path().join(name), b"%PDF-1.4 fake").unwrap();
    }
    dir
}

fn ocr_batch(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ocr-batch").expect("Binary exists");
    cmd.current_dir(workdir);
    for var in PROXY_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// One request as the fake provider saw it.
struct SeenRequest {
    path: String,
    authorization: Option<String>,
    body: Value,
}

/// Answers every request with the same JSON reply and records what it received.
#[derive(Clone)]
struct FakeProvider {
    reply: Arc<Value>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

async fn answer(
    State(fake): State<FakeProvider>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    fake.seen.lock().unwrap().push(SeenRequest {
        path: uri.path().to_string(),
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    Json(fake.reply.as_ref().clone())
}

async fn serve_fake_provider(reply: Value) -> (String, FakeProvider) {
    let fake = FakeProvider {
        reply: Arc::new(reply),
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new().fallback(answer).with_state(fake.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), fake)
}

#[test]
fn run_fails_without_api_key() {
    let work = tempdir().unwrap();
    let input = input_with(&["a.pdf"]);
    let config = write_config(work.path(), input.path(), "http://127.0.0.1:9");

    ocr_batch(work.path())
        .arg("run")
        .arg("--config")
        .arg(&config)
        .env_remove("AWS_BEARER_TOKEN_BEDROCK")
        .assert()
        .failure()
        .stderr(predicate::str::contains("AWS_BEARER_TOKEN_BEDROCK"));
}

#[test]
fn run_fails_for_missing_input_directory() {
    let work = tempdir().unwrap();
    let config = write_config(work.path(), &work.path().join("absent"), "http://127.0.0.1:9");

    ocr_batch(work.path())
        .arg("run")
        .arg("--config")
        .arg(&config)
        .env("AWS_BEARER_TOKEN_BEDROCK", "test-key")
        .assert()
        .failure()
        .stderr(predicate::str::contains("input directory not found"));
}

#[test]
fn list_prints_qualifying_files() {
    let work = tempdir().unwrap();
    let input = input_with(&["a.pdf", "b.PNG", "c.txt"]);

    ocr_batch(work.path())
        .arg("list")
        .arg("--input-dir")
        .arg(input.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("a.pdf")
                .and(predicate::str::contains("b.PNG"))
                .and(predicate::str::contains("c.txt").not())
                .and(predicate::str::contains("2 file(s) would be processed")),
        );
}

#[test]
fn run_completes_with_failed_files_when_provider_is_unreachable() {
    let work = tempdir().unwrap();
    let input = input_with(&["a.pdf"]);
    let config = write_config(work.path(), input.path(), "http://127.0.0.1:9");

    ocr_batch(work.path())
        .arg("run")
        .arg("--config")
        .arg(&config)
        .env("AWS_BEARER_TOKEN_BEDROCK", "test-key")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("0 succeeded, 1 failed, 1 total")
                .and(predicate::str::contains("FAILED a.pdf")),
        );

    assert!(!work.path().join("out/json/a_ocr.json").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_writes_artifacts_for_each_file() {
    let work = tempdir().unwrap();
    let input = input_with(&["invoice.pdf", "letter.pdf"]);
    let reply = json!({
        "output": { "message": { "role": "assistant", "content": [
            { "text": "<page number=\"1\">Hello page one</page>" }
        ]}},
        "usage": { "inputTokens": 321, "outputTokens": 12, "totalTokens": 333 },
        "stopReason": "end_turn"
    });
    let (endpoint, fake) = serve_fake_provider(reply).await;
    let config = write_config(work.path(), input.path(), &endpoint);

    let workdir = work.path().to_path_buf();
    tokio::task::spawn_blocking(move || {
        ocr_batch(&workdir)
            .arg("run")
            .arg("--config")
            .arg(&config)
            .env("AWS_BEARER_TOKEN_BEDROCK", "test-key")
            .assert()
            .success()
            .stdout(predicate::str::contains("2 succeeded, 0 failed, 2 total"));
    })
    .await
    .expect("binary run");

    {
        let seen = fake.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for request in seen.iter() {
            assert!(request.path.starts_with("/model/"));
            assert!(request.path.ends_with("/converse"));
            assert_eq!(request.authorization.as_deref(), Some("Bearer test-key"));
            assert!(request.body.get("inferenceConfig").is_some());
        }
    }

    for name in ["invoice", "letter"] {
        let json: Value = serde_json::from_str(
            &fs::read_to_string(work.path().join(format!("out/json/{name}_ocr.json"))).unwrap(),
        )
        .unwrap();
        assert_eq!(json["fileName"], format!("{name}.pdf"));
        assert_eq!(json["inputTokens"], 321);
        assert_eq!(json["pages"][0]["content"], "Hello page one");
        assert_eq!(json["modelUsed"], "us.amazon.nova-lite-v1:0");

        let md =
            fs::read_to_string(work.path().join(format!("out/markdown/{name}_ocr.md"))).unwrap();
        assert!(md.contains(&format!("# OCR Results for {name}.pdf")));
        assert!(md.contains("### Page 1"));
    }
}

use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use ocr_batch::cli::{run, Cli, Commands};

    let input = tempdir().unwrap();
    let cli = Cli {
        command: Commands::List {
            input_dir: input.path().to_path_buf(),
        },
    };

    run(cli).await.expect("listing an empty directory succeeds");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
