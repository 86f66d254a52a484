//! In-process fakes of the ITSM and Postmark APIs for tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, options, post},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::client::{ItsmClient, RetryPolicy, StaticTokenSource, TENANT_HEADER};
use crate::downloader::PAGE_SIZE;

/// One request seen by the fake.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub tenant: Option<String>,
    pub bookmark: Option<String>,
}

#[derive(Default)]
struct Inner {
    channels: Vec<(String, String)>,
    collections: HashMap<(String, String), Vec<Value>>,
    failing: HashSet<String>,
    requests: Vec<Recorded>,
    emails: Vec<Value>,
}

/// Fake ITSM + Postmark backend. Query collections page by an offset
/// bookmark, [`PAGE_SIZE`] results per page.
#[derive(Clone, Default)]
pub struct FakeItsm {
    inner: Arc<Mutex<Inner>>,
}

impl FakeItsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, id: &str, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .channels
            .push((id.to_string(), name.to_string()));
    }

    pub fn add_user(&self, channel: &str, uuid: &str, name: &str, email: &str) {
        self.push(
            "users",
            channel,
            json!({
                "uuid": uuid,
                "full_name": name,
                "email": email,
                "type": "agent",
                "org_display_name": "Field Ops",
            }),
        );
    }

    pub fn add_incident(&self, channel: &str, number: &str, assigned_to: &str) {
        self.push("incidents", channel, ticket(number, assigned_to));
    }

    pub fn add_request(&self, channel: &str, number: &str, assigned_to: &str) {
        self.push("requests", channel, ticket(number, assigned_to));
    }

    /// Every later call to `path` answers 500 (or 422 for the mail batch).
    pub fn fail(&self, path: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing
            .insert(path.to_string());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// Every message posted to the mail batch endpoint, in order.
    pub fn emails(&self) -> Vec<Value> {
        self.inner.lock().unwrap().emails.clone()
    }

    fn push(&self, collection: &str, channel: &str, doc: Value) {
        self.inner
            .lock()
            .unwrap()
            .collections
            .entry((collection.to_string(), channel.to_string()))
            .or_default()
            .push(doc);
    }

    fn record(&self, method: &str, path: &str, headers: &HeaderMap, bookmark: Option<String>) {
        let tenant = headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.inner.lock().unwrap().requests.push(Recorded {
            method: method.to_string(),
            path: path.to_string(),
            tenant,
            bookmark,
        });
    }

    fn is_failing(&self, path: &str) -> bool {
        self.inner.lock().unwrap().failing.contains(path)
    }

    pub async fn spawn(&self) -> TestServer {
        let router = Router::new()
            .route("/channels", get(list_channels))
            .route("/email/batch", post(send_batch))
            .route("/:collection", options(query_collection))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        TestServer {
            base_url: format!("http://{addr}"),
            handle,
        }
    }
}

fn ticket(number: &str, assigned_to: &str) -> Value {
    json!({
        "number": number,
        "short_description": format!("{number} needs attention"),
        "state_id": 2,
        "location": "Prague",
        "created_at": "2024-03-01T08:30:00Z",
        "assigned_to": assigned_to,
    })
}

async fn list_channels(State(fake): State<FakeItsm>, headers: HeaderMap) -> Response {
    fake.record("GET", "/channels", &headers, None);
    if fake.is_failing("/channels") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "channels down").into_response();
    }
    let spaces: Vec<Value> = fake
        .inner
        .lock()
        .unwrap()
        .channels
        .iter()
        .map(|(id, name)| json!({"space": id, "name": name}))
        .collect();
    Json(json!({ "spaces": spaces })).into_response()
}

async fn query_collection(
    State(fake): State<FakeItsm>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let path = format!("/{collection}");
    let bookmark = body["bookmark"].as_str().unwrap_or_default().to_string();
    fake.record("OPTIONS", &path, &headers, Some(bookmark.clone()));
    if fake.is_failing(&path) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "query failed").into_response();
    }

    let channel = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let offset: usize = bookmark.parse().unwrap_or(0);
    let docs = fake
        .inner
        .lock()
        .unwrap()
        .collections
        .get(&(collection, channel))
        .cloned()
        .unwrap_or_default();
    let page: Vec<Value> = docs.into_iter().skip(offset).take(PAGE_SIZE).collect();
    let next = (offset + page.len()).to_string();
    Json(json!({ "bookmark": next, "result": page })).into_response()
}

async fn send_batch(
    State(fake): State<FakeItsm>,
    headers: HeaderMap,
    Json(messages): Json<Vec<Value>>,
) -> Response {
    fake.record("POST", "/email/batch", &headers, None);
    if fake.is_failing("/email/batch") {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"ErrorCode": 300, "Message": "Invalid email request"})),
        )
            .into_response();
    }

    let replies: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            json!({
                "To": m["To"],
                "SubmittedAt": "2024-03-01T08:30:00Z",
                "MessageID": format!("msg-{i}"),
                "ErrorCode": 0,
                "Message": "OK",
            })
        })
        .collect();
    fake.inner.lock().unwrap().emails.extend(messages);
    Json(replies).into_response()
}

pub struct TestServer {
    pub base_url: String,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5), 2)
}

pub fn client(server: &TestServer, path: &str) -> ItsmClient {
    ItsmClient::new(
        server.url(path),
        fast_policy(),
        Duration::from_secs(5),
        Arc::new(StaticTokenSource::new(Some(SecretString::from("test-token")))),
    )
    .unwrap()
}

/// Fresh directory under the system temp dir.
pub fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("itsm-reporting-{label}-{}", uuid::Uuid::now_v7()))
}
