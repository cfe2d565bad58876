//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::adapters::{AdapterError, SourceAdapter, SourceType};

type RequestLog = Arc<Mutex<Vec<(Method, String)>>>;

#[derive(Clone)]
struct FileState {
    files: Arc<HashMap<String, String>>,
    requests: RequestLog,
}

/// In-process HTTP server that serves fixed bodies by (percent-encoded) path
/// and records every request it sees.
pub struct StaticServer {
    base: Url,
    requests: RequestLog,
}

impl StaticServer {
    pub async fn spawn(files: &[(&str, &str)]) -> Self {
        let state = FileState {
            files: Arc::new(
                files
                    .iter()
                    .map(|(path, body)| (path.to_string(), body.to_string()))
                    .collect(),
            ),
            requests: Arc::default(),
        };
        let requests = state.requests.clone();

        let app = axum::Router::new().fallback(serve_file).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });

        Self {
            base: Url::parse(&format!("http://{addr}/")).unwrap(),
            requests,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve_file(State(state): State<FileState>, method: Method, uri: Uri) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push((method, uri.path().to_string()));
    match state.files.get(uri.path()) {
        Some(body) => (StatusCode::OK, body.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// A loopback URL nothing is listening on.
pub fn closed_port_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{addr}/")).unwrap()
}

/// What a [`ScriptedAdapter`] load does.
#[derive(Debug, Clone)]
pub enum Load {
    Ok(String),
    Err(AdapterError),
    Hang,
}

/// What a [`ScriptedAdapter`] probe does.
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    Healthy,
    Unhealthy,
    Panics,
    Hangs,
}

/// Adapter with canned behaviour that counts how often it is called.
pub struct ScriptedAdapter {
    source: SourceType,
    load: Mutex<Load>,
    probe: Mutex<Probe>,
    delay: Option<Duration>,
    loads: AtomicUsize,
    probes: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(source: SourceType, load: Load, probe: Probe) -> Arc<Self> {
        Arc::new(Self {
            source,
            load: Mutex::new(load),
            probe: Mutex::new(probe),
            delay: None,
            loads: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn ok(source: SourceType, body: &str) -> Arc<Self> {
        Self::new(source, Load::Ok(body.to_string()), Probe::Healthy)
    }

    pub fn failing(source: SourceType) -> Arc<Self> {
        Self::new(
            source,
            Load::Err(AdapterError::Fetch {
                cohort: "any".to_string(),
                status: Some(503),
                reason: "Service Unavailable".to_string(),
            }),
            Probe::Healthy,
        )
    }

    pub fn slow(source: SourceType, body: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            load: Mutex::new(Load::Ok(body.to_string())),
            probe: Mutex::new(Probe::Healthy),
            delay: Some(delay),
            loads: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn set_load(&self, load: Load) {
        *self.load.lock().unwrap() = load;
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source_type(&self) -> SourceType {
        self.source
    }

    async fn load_cohort_data(&self, _cohort: &str) -> Result<String, AdapterError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let load = self.load.lock().unwrap().clone();
        match load {
            Load::Ok(body) => Ok(body),
            Load::Err(e) => Err(e),
            Load::Hang => std::future::pending().await,
        }
    }

    async fn validate_connection(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let probe = *self.probe.lock().unwrap();
        match probe {
            Probe::Healthy => true,
            Probe::Unhealthy => false,
            Probe::Panics => panic!("probe blew up"),
            Probe::Hangs => std::future::pending().await,
        }
    }
}
