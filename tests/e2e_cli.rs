use std::fs;
use std::io::Write;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::Router;
use serde_json::{json, Value};
use serial_test::serial;

#[derive(Debug, Clone)]
struct SeenRequest {
    method: Method,
    uri: String,
    body: Value,
}

#[derive(Clone)]
struct BackendState {
    status: StatusCode,
    reply: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

/// Canned VM backend running on its own thread and runtime, so the CLI under
/// test talks to it over a real socket.
struct MockBackend {
    url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockBackend {
    fn start(status: StatusCode, reply: Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind mock backend");
        listener
            .set_nonblocking(true)
            .expect("failed to make mock listener non-blocking");
        let addr = listener
            .local_addr()
            .expect("failed to resolve mock backend addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = BackendState {
            status,
            reply: reply.to_string(),
            seen: seen.clone(),
        };

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build mock backend runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)
                    .expect("failed to adopt mock listener");
                let app = Router::new().fallback(record).with_state(state);
                let _ = axum::serve(listener, app).await;
            });
        });

        Self {
            url: format!("http://{addr}"),
            seen,
        }
    }

    fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().expect("mock backend poisoned").clone()
    }
}

async fn record(
    State(state): State<BackendState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> (StatusCode, [(&'static str, &'static str); 1], String) {
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state
        .seen
        .lock()
        .expect("mock backend poisoned")
        .push(SeenRequest {
            method,
            uri: uri.to_string(),
            body,
        });
    (
        state.status,
        [("content-type", "application/json")],
        state.reply.clone(),
    )
}

struct TestEnv {
    home: PathBuf,
    api_url: String,
}

static COMMAND_SEQ: AtomicU64 = AtomicU64::new(0);

impl TestEnv {
    fn new(prefix: &str, backend: &MockBackend) -> Self {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock failure")
            .as_nanos();
        let home = std::env::temp_dir().join(format!("vmdeck-e2e-{prefix}-{nonce}"));
        fs::create_dir_all(&home).expect("failed to create temporary home");

        Self {
            home,
            api_url: backend.url.clone(),
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        self.run_with_input(args, None)
    }

    fn run_with_input(&self, args: &[&str], input: Option<&str>) -> Output {
        let bin = env!("CARGO_BIN_EXE_vmdeck");
        let command_id = COMMAND_SEQ.fetch_add(1, Ordering::Relaxed);
        let stdout_path = self.home.join(format!("cmd-{command_id}.stdout.log"));
        let stderr_path = self.home.join(format!("cmd-{command_id}.stderr.log"));
        let stdout_file = fs::File::create(&stdout_path).expect("failed to create stdout capture");
        let stderr_file = fs::File::create(&stderr_path).expect("failed to create stderr capture");

        let mut command = Command::new(bin);
        command
            .args(args)
            .env("VMDECK_HOME", &self.home)
            .env("VMDECK_API_URL", &self.api_url)
            .env_remove("VMDECK_NODE")
            .env("NO_PROXY", "127.0.0.1,localhost")
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        let mut child = command.spawn().expect("failed to spawn vmdeck command");
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(input) = input {
                stdin
                    .write_all(input.as_bytes())
                    .expect("failed to feed vmdeck stdin");
            }
        }

        let timeout = Duration::from_secs(30);
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => {
                    let status = child.wait().expect("failed to wait for vmdeck command");
                    return read_command_output(status, &stdout_path, &stderr_path);
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let status = child
                            .wait()
                            .expect("failed to wait for timed out vmdeck command");
                        let output = read_command_output(status, &stdout_path, &stderr_path);
                        panic!(
                            "vmdeck command timed out after {:?}: {:?}\nstdout:\n{}\nstderr:\n{}",
                            timeout,
                            args,
                            String::from_utf8_lossy(&output.stdout),
                            String::from_utf8_lossy(&output.stderr)
                        );
                    }
                    sleep(Duration::from_millis(50));
                }
                Err(err) => {
                    panic!("failed while waiting for vmdeck command {:?}: {err}", args);
                }
            }
        }
    }
}

fn read_command_output(status: ExitStatus, stdout_path: &Path, stderr_path: &Path) -> Output {
    let stdout = fs::read(stdout_path).expect("failed to read captured stdout");
    let stderr = fs::read(stderr_path).expect("failed to read captured stderr");
    let _ = fs::remove_file(stdout_path);
    let _ = fs::remove_file(stderr_path);

    Output {
        status,
        stdout,
        stderr,
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.home);
    }
}

fn output_contains(output: &Output, needle: &str) -> bool {
    String::from_utf8_lossy(&output.stdout).contains(needle)
        || String::from_utf8_lossy(&output.stderr).contains(needle)
}

fn describe(output: &Output) -> String {
    format!(
        "status: {:?}\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
#[serial]
fn e2e_start_posts_node_and_reports_success() {
    let backend = MockBackend::start(StatusCode::OK, json!({"success": true}));
    let env = TestEnv::new("start", &backend);

    let output = env.run(&["start", "101", "--node", "pve1"]);

    assert!(output.status.success(), "{}", describe(&output));
    assert!(output_contains(&output, "VM started successfully"));
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].uri, "/api/vms/101/start");
    assert_eq!(requests[0].body, json!({"node": "pve1"}));
}

#[test]
#[serial]
fn e2e_stop_failure_exits_non_zero_with_backend_error() {
    let backend = MockBackend::start(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"success": false, "error": "VM is locked"}),
    );
    let env = TestEnv::new("stop-fail", &backend);

    let output = env.run(&["stop", "101", "--node", "pve1"]);

    assert!(!output.status.success(), "{}", describe(&output));
    assert!(
        output_contains(&output, "Failed to stop VM: VM is locked"),
        "{}",
        describe(&output)
    );
    assert_eq!(backend.requests()[0].uri, "/api/vms/101/stop");
}

#[test]
#[serial]
fn e2e_delete_with_yes_skips_prompt() {
    let backend = MockBackend::start(StatusCode::OK, json!({"success": true}));
    let env = TestEnv::new("delete-yes", &backend);

    let output = env.run(&["rm", "101", "--node", "pve1", "--yes"]);

    assert!(output.status.success(), "{}", describe(&output));
    assert!(output_contains(&output, "VM deleted successfully"));
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::DELETE);
    assert_eq!(requests[0].uri, "/api/vms/101");
    assert_eq!(requests[0].body, json!({"node": "pve1"}));
}

#[test]
#[serial]
fn e2e_declined_delete_sends_nothing() {
    let backend = MockBackend::start(StatusCode::OK, json!({"success": true}));
    let env = TestEnv::new("delete-no", &backend);

    let output = env.run_with_input(&["delete", "101", "--node", "pve1"], Some("n\n"));

    assert!(output.status.success(), "{}", describe(&output));
    assert!(output_contains(&output, "This action cannot be undone."));
    assert!(output_contains(&output, "Delete cancelled."));
    assert!(backend.requests().is_empty());
}

#[test]
#[serial]
fn e2e_list_prints_table_sorted_by_id() {
    let backend = MockBackend::start(
        StatusCode::OK,
        json!({"vms": [
            {"vmid": 110, "name": "db", "status": "stopped", "node": "pve1", "cpu": 0, "mem": 0, "maxmem": 0},
            {"vmid": "9", "name": "web", "status": "running", "node": "pve1", "cpu": "0.25", "mem": 536870912, "maxmem": 1073741824}
        ]}),
    );
    let env = TestEnv::new("list", &backend);

    let output = env.run(&["ls", "--node", "pve1"]);

    assert!(output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let web = stdout.find("web").expect("web row present");
    let db = stdout.find("db").expect("db row present");
    assert!(web < db, "rows should be sorted by numeric id:\n{stdout}");
    assert!(stdout.contains("25.0"));
    assert!(stdout.contains("50.0"));
    assert!(stdout.contains("512"));
    assert_eq!(backend.requests()[0].uri, "/api/vms?node=pve1");
}

#[test]
#[serial]
fn e2e_list_surfaces_backend_error() {
    let backend = MockBackend::start(StatusCode::UNAUTHORIZED, json!({"error": "bad token"}));
    let env = TestEnv::new("list-fail", &backend);

    let output = env.run(&["list"]);

    assert!(!output.status.success(), "{}", describe(&output));
    assert!(
        output_contains(&output, "backend returned 401: bad token"),
        "{}",
        describe(&output)
    );
}

#[test]
#[serial]
fn e2e_nodes_lists_node_names() {
    let backend = MockBackend::start(
        StatusCode::OK,
        json!({"nodes": [
            {"node": "pve2", "status": "online", "cpu": 0.5, "mem": 1, "maxmem": 4, "uptime": 120},
            {"node": "pve1", "status": "offline"}
        ]}),
    );
    let env = TestEnv::new("nodes", &backend);

    let output = env.run(&["nodes"]);

    assert!(output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.find("pve1").expect("pve1 row present");
    let second = stdout.find("pve2").expect("pve2 row present");
    assert!(first < second, "nodes should be sorted by name:\n{stdout}");
    assert!(stdout.contains("50.0"));
    assert!(stdout.contains("2m 00s"));
    assert_eq!(backend.requests()[0].uri, "/api/nodes");
}

#[test]
#[serial]
fn e2e_empty_node_is_rejected_before_any_request() {
    let backend = MockBackend::start(StatusCode::OK, json!({"success": true}));
    let env = TestEnv::new("empty-node", &backend);

    let output = env.run(&["start", "101", "--node", ""]);

    assert!(!output.status.success(), "{}", describe(&output));
    assert!(output_contains(&output, "must not be empty"), "{}", describe(&output));
    assert!(backend.requests().is_empty());
}
