//! HTTP boundary to the virtualization backend.
//!
//! Action endpoints answer with `{"success": bool, "error": "..."}` for both
//! good and bad outcomes, often with a 4xx/5xx status. The status code is
//! therefore ignored for actions: the body is decoded once into an
//! [`ActionOutcome`] and only send or decode failures surface as errors.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::VmdeckError;
use crate::gauges::parse_number;

/// A VM as addressed by the backend: its id plus the node that hosts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRef {
    pub vm_id: String,
    pub node: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmAction {
    Start,
    Stop,
    Delete,
}

impl VmAction {
    pub fn method(self) -> Method {
        match self {
            Self::Start | Self::Stop => Method::POST,
            Self::Delete => Method::DELETE,
        }
    }

    /// Request path relative to the backend origin.
    pub fn path(self, vm_id: &str) -> String {
        match self.suffix() {
            Some(suffix) => format!("/api/vms/{vm_id}/{suffix}"),
            None => format!("/api/vms/{vm_id}"),
        }
    }

    fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Start => Some("start"),
            Self::Stop => Some("stop"),
            Self::Delete => None,
        }
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
        };
        f.write_str(value)
    }
}

/// Decoded result of an action call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure { error: Option<String> },
}

impl ActionOutcome {
    /// Interprets a response body the way a loosely typed client would: any
    /// truthy `success` is a success, anything else (including a body that is
    /// not an object) is a failure carrying whatever `error` text is present.
    pub fn from_body(body: &Value) -> Self {
        if body.get("success").is_some_and(is_truthy) {
            return Self::Success;
        }

        let error = body.get("error").and_then(|value| match value {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            other if is_truthy(other) => Some(other.to_string()),
            _ => None,
        });
        Self::Failure { error }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Serialize)]
struct NodeBody<'a> {
    node: &'a str,
}

/// One entry of `GET /api/vms`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VmSummary {
    #[serde(deserialize_with = "id_string")]
    pub vmid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cpu: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub mem: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub maxmem: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct VmListResponse {
    #[serde(default)]
    vms: Vec<VmSummary>,
}

/// One entry of `GET /api/nodes`, as the hypervisor reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeSummary {
    pub node: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cpu: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub mem: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub maxmem: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub uptime: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeListResponse {
    #[serde(default)]
    nodes: Vec<NodeSummary>,
}

/// Live usage of one VM from `GET /api/vms/{id}/resources?node=`.
///
/// Units are the backend's: CPU in percent, memory in MiB, disk in GiB,
/// uptime in seconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VmResources {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cpu_usage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub memory_usage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub disk_usage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub uptime: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    resources: VmResources,
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected vmid as string or number, got {other}"
        ))),
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_number))
}

#[async_trait]
pub trait VmApi: Send + Sync {
    async fn perform(&self, action: VmAction, target: &VmRef)
        -> Result<ActionOutcome, VmdeckError>;
    async fn list_vms(&self, node: Option<&str>) -> Result<Vec<VmSummary>, VmdeckError>;
    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, VmdeckError>;
    async fn vm_resources(&self, target: &VmRef) -> Result<VmResources, VmdeckError>;
}

pub struct HttpVmApi {
    http: Client,
    base: Url,
}

impl HttpVmApi {
    pub fn new(base: Url) -> Self {
        Self {
            http: Client::new(),
            base,
        }
    }

    /// Read endpoints report failure through the status code, with the
    /// reason in the body's `error` field when there is one.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, VmdeckError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(VmdeckError::Backend {
                status: status.as_u16(),
                message,
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, VmdeckError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| VmdeckError::UnusableApiUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl VmApi for HttpVmApi {
    async fn perform(
        &self,
        action: VmAction,
        target: &VmRef,
    ) -> Result<ActionOutcome, VmdeckError> {
        let mut segments = vec!["api", "vms", target.vm_id.as_str()];
        segments.extend(action.suffix());
        let url = self.endpoint(&segments)?;
        debug!(
            %action,
            node = %target.node,
            path = %action.path(&target.vm_id),
            "sending VM action"
        );

        let response = self
            .http
            .request(action.method(), url)
            .json(&NodeBody { node: &target.node })
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes)?;
        let outcome = ActionOutcome::from_body(&body);

        match &outcome {
            ActionOutcome::Success => {
                info!(%action, vm_id = %target.vm_id, node = %target.node, "VM action accepted")
            }
            ActionOutcome::Failure { error } => warn!(
                %action,
                vm_id = %target.vm_id,
                node = %target.node,
                status = status.as_u16(),
                error = error.as_deref().unwrap_or("-"),
                "VM action rejected"
            ),
        }
        Ok(outcome)
    }

    async fn list_vms(&self, node: Option<&str>) -> Result<Vec<VmSummary>, VmdeckError> {
        let mut url = self.endpoint(&["api", "vms"])?;
        if let Some(node) = node {
            url.query_pairs_mut().append_pair("node", node);
        }
        debug!(%url, "listing VMs");

        let listing: VmListResponse = self.get_json(url).await?;
        Ok(listing.vms)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, VmdeckError> {
        let url = self.endpoint(&["api", "nodes"])?;
        debug!(%url, "listing nodes");

        let listing: NodeListResponse = self.get_json(url).await?;
        Ok(listing.nodes)
    }

    async fn vm_resources(&self, target: &VmRef) -> Result<VmResources, VmdeckError> {
        let mut url = self.endpoint(&["api", "vms", target.vm_id.as_str(), "resources"])?;
        url.query_pairs_mut().append_pair("node", &target.node);
        debug!(%url, "fetching VM resources");

        let reply: ResourcesResponse = self.get_json(url).await?;
        Ok(reply.resources)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{Method, StatusCode, Uri};
    use axum::Router;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use super::{ActionOutcome, HttpVmApi, VmAction, VmApi, VmRef};
    use crate::config::parse_api_url;
    use crate::errors::VmdeckError;

    #[derive(Debug, Clone)]
    pub(crate) struct RecordedRequest {
        pub(crate) method: Method,
        pub(crate) uri: String,
        pub(crate) body: Value,
    }

    #[derive(Clone)]
    struct MockState {
        status: StatusCode,
        reply: String,
        seen: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    async fn record(
        State(state): State<MockState>,
        method: Method,
        uri: Uri,
        body: Bytes,
    ) -> (StatusCode, String) {
        let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
        state
            .seen
            .lock()
            .expect("mock state poisoned")
            .push(RecordedRequest {
                method,
                uri: uri.to_string(),
                body,
            });
        (state.status, state.reply.clone())
    }

    /// Serves `reply` with `status` for every request and records what came in.
    pub(crate) async fn spawn_backend(
        status: StatusCode,
        reply: &str,
    ) -> (String, Arc<Mutex<Vec<RecordedRequest>>>) {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock backend");
        let addr = listener.local_addr().expect("failed to resolve mock addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            status,
            reply: reply.to_string(),
            seen: seen.clone(),
        };
        let app = Router::new().fallback(record).with_state(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), seen)
    }

    fn api_for(url: &str) -> HttpVmApi {
        HttpVmApi::new(parse_api_url(url).expect("valid mock url"))
    }

    fn target() -> VmRef {
        VmRef {
            vm_id: "101".to_string(),
            node: "pve1".to_string(),
        }
    }

    #[test]
    fn action_paths_and_methods_match_backend_routes() {
        assert_eq!(VmAction::Start.path("7"), "/api/vms/7/start");
        assert_eq!(VmAction::Stop.path("7"), "/api/vms/7/stop");
        assert_eq!(VmAction::Delete.path("7"), "/api/vms/7");
        assert_eq!(VmAction::Start.method(), reqwest::Method::POST);
        assert_eq!(VmAction::Stop.method(), reqwest::Method::POST);
        assert_eq!(VmAction::Delete.method(), reqwest::Method::DELETE);
    }

    #[test]
    fn outcome_treats_truthy_success_as_success() {
        assert_eq!(
            ActionOutcome::from_body(&json!({"success": true})),
            ActionOutcome::Success
        );
        assert_eq!(
            ActionOutcome::from_body(&json!({"success": 1})),
            ActionOutcome::Success
        );
        assert_eq!(
            ActionOutcome::from_body(&json!({"success": 0, "error": "nope"})),
            ActionOutcome::Failure {
                error: Some("nope".to_string())
            }
        );
    }

    #[test]
    fn outcome_drops_empty_or_missing_error_text() {
        assert_eq!(
            ActionOutcome::from_body(&json!({"success": false})),
            ActionOutcome::Failure { error: None }
        );
        assert_eq!(
            ActionOutcome::from_body(&json!({"error": ""})),
            ActionOutcome::Failure { error: None }
        );
        assert_eq!(
            ActionOutcome::from_body(&json!([1, 2, 3])),
            ActionOutcome::Failure { error: None }
        );
    }

    #[tokio::test]
    async fn start_posts_node_body_to_start_route() {
        let (url, seen) = spawn_backend(StatusCode::OK, r#"{"success": true}"#).await;

        let outcome = api_for(&url)
            .perform(VmAction::Start, &target())
            .await
            .expect("start should reach mock backend");

        assert_eq!(outcome, ActionOutcome::Success);
        let seen = seen.lock().expect("mock state poisoned");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].uri, "/api/vms/101/start");
        assert_eq!(seen[0].body, json!({"node": "pve1"}));
    }

    #[tokio::test]
    async fn delete_sends_node_body_with_delete_method() {
        let (url, seen) = spawn_backend(StatusCode::OK, r#"{"success": true}"#).await;

        api_for(&url)
            .perform(VmAction::Delete, &target())
            .await
            .expect("delete should reach mock backend");

        let seen = seen.lock().expect("mock state poisoned");
        assert_eq!(seen[0].method, Method::DELETE);
        assert_eq!(seen[0].uri, "/api/vms/101");
        assert_eq!(seen[0].body, json!({"node": "pve1"}));
    }

    #[tokio::test]
    async fn server_error_with_json_body_is_an_application_failure() {
        let (url, _) = spawn_backend(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error": "Failed to stop VM"}"#,
        )
        .await;

        let outcome = api_for(&url)
            .perform(VmAction::Stop, &target())
            .await
            .expect("a JSON error body is not a transport failure");

        assert_eq!(
            outcome,
            ActionOutcome::Failure {
                error: Some("Failed to stop VM".to_string())
            }
        );
    }

    #[tokio::test]
    async fn non_json_body_is_a_decode_error() {
        let (url, _) = spawn_backend(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").await;

        let err = api_for(&url)
            .perform(VmAction::Start, &target())
            .await
            .expect_err("html body should not decode");

        assert!(matches!(err, VmdeckError::Decode(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind probe listener");
        let addr = listener.local_addr().expect("failed to resolve probe addr");
        drop(listener);

        let err = api_for(&format!("http://{addr}"))
            .perform(VmAction::Start, &target())
            .await
            .expect_err("closed port should refuse the connection");

        assert!(matches!(err, VmdeckError::Transport(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn list_vms_accepts_loose_numbers_and_node_filter() {
        let (url, seen) = spawn_backend(
            StatusCode::OK,
            r#"{"vms": [
                {"vmid": 101, "name": "web", "status": "running", "node": "pve1",
                 "cpu": 0.25, "mem": "512", "maxmem": 1024},
                {"vmid": "102", "status": "stopped", "cpu": null, "mem": "n/a"}
            ]}"#,
        )
        .await;

        let vms = api_for(&url)
            .list_vms(Some("pve1"))
            .await
            .expect("list should decode");

        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0].vmid, "101");
        assert_eq!(vms[0].cpu, Some(0.25));
        assert_eq!(vms[0].mem, Some(512.0));
        assert_eq!(vms[1].vmid, "102");
        assert_eq!(vms[1].cpu, None);
        assert_eq!(vms[1].mem, None);
        assert_eq!(vms[1].name, None);

        let seen = seen.lock().expect("mock state poisoned");
        assert_eq!(seen[0].method, Method::GET);
        assert_eq!(seen[0].uri, "/api/vms?node=pve1");
    }

    #[tokio::test]
    async fn list_vms_surfaces_backend_error_message() {
        let (url, _) = spawn_backend(StatusCode::UNAUTHORIZED, r#"{"error": "login required"}"#)
            .await;

        let err = api_for(&url)
            .list_vms(None)
            .await
            .expect_err("401 should be an error for listings");

        assert_eq!(err.to_string(), "backend returned 401: login required");
    }

    #[tokio::test]
    async fn list_nodes_reads_node_names_and_loose_usage() {
        let (url, seen) = spawn_backend(
            StatusCode::OK,
            r#"{"nodes": [
                {"node": "pve1", "status": "online", "cpu": "0.1", "mem": 100, "maxmem": 400},
                {"node": "pve2", "status": "offline"}
            ]}"#,
        )
        .await;

        let nodes = api_for(&url)
            .list_nodes()
            .await
            .expect("nodes should decode");

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node, "pve1");
        assert_eq!(nodes[0].cpu, Some(0.1));
        assert_eq!(nodes[1].status.as_deref(), Some("offline"));
        assert_eq!(nodes[1].maxmem, None);
        assert_eq!(seen.lock().expect("mock state poisoned")[0].uri, "/api/nodes");
    }

    #[tokio::test]
    async fn vm_resources_queries_with_node_and_decodes_units() {
        let (url, seen) = spawn_backend(
            StatusCode::OK,
            r#"{"resources": {"cpu_usage": 12.5, "memory_usage": 512, "disk_usage": "3.5", "uptime": 3600}}"#,
        )
        .await;

        let resources = api_for(&url)
            .vm_resources(&target())
            .await
            .expect("resources should decode");

        assert_eq!(resources.cpu_usage, Some(12.5));
        assert_eq!(resources.memory_usage, Some(512.0));
        assert_eq!(resources.disk_usage, Some(3.5));
        assert_eq!(resources.uptime, Some(3600.0));
        let seen = seen.lock().expect("mock state poisoned");
        assert_eq!(seen[0].method, Method::GET);
        assert_eq!(seen[0].uri, "/api/vms/101/resources?node=pve1");
    }

    #[tokio::test]
    async fn vm_resources_failure_carries_backend_reason() {
        let (url, _) = spawn_backend(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error": "Failed to get VM resources"}"#,
        )
        .await;

        let err = api_for(&url)
            .vm_resources(&target())
            .await
            .expect_err("500 should be an error for resources");

        assert_eq!(
            err.to_string(),
            "backend returned 500: Failed to get VM resources"
        );
    }
}
