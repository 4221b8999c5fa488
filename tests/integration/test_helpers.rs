//! Shared fixtures: a scripted process host and a minimal HTTP stub.

#![allow(dead_code)] // not every test file uses every helper

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use maestro_term::host::{AliveProcess, HostFuture, ProcessHost, SpawnSpec};
use maestro_term::models::session::Session;
use maestro_term::persistence::store::StateStore;
use maestro_term::registry::{self, RegistryEvent, RegistryHandle, RegistrySettings};
use maestro_term::AppError;
use tokio_util::sync::CancellationToken;

/// Everything the fake host records about how it was driven.
#[derive(Default)]
pub struct FakeHostState {
    next_id: u64,
    pub alive: Vec<AliveProcess>,
    pub created: Vec<SpawnSpec>,
    pub writes: Vec<(String, Vec<u8>)>,
    pub close_calls: Vec<String>,
    pub detach_calls: Vec<String>,
    pub resize_calls: Vec<(String, u16, u16)>,
    pub fail_close: HashSet<String>,
    pub fail_creates: usize,
}

/// Scripted in-memory process host.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<FakeHostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alive(alive: Vec<AliveProcess>) -> Self {
        let host = Self::new();
        host.state().alive = alive;
        host
    }

    pub fn state(&self) -> MutexGuard<'_, FakeHostState> {
        self.state.lock().expect("fake host state")
    }

    pub fn as_dyn(&self) -> Arc<dyn ProcessHost> {
        Arc::new(self.clone())
    }
}

impl ProcessHost for FakeHost {
    fn create(&self, spec: SpawnSpec) -> HostFuture<'_, String> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock().expect("fake host state");
            if state.fail_creates > 0 {
                state.fail_creates -= 1;
                return Err(AppError::Host("scripted create failure".into()));
            }
            state.next_id += 1;
            let id = (state.next_id + 100).to_string();
            state.alive.push(AliveProcess {
                id: id.clone(),
                cwd: spec.cwd.clone(),
                command: spec.command.clone(),
            });
            state.created.push(spec);
            Ok(id)
        })
    }

    fn write(&self, id: &str, data: &[u8]) -> HostFuture<'_, ()> {
        let state = Arc::clone(&self.state);
        let id = id.to_owned();
        let data = data.to_vec();
        Box::pin(async move {
            state.lock().expect("fake host state").writes.push((id, data));
            Ok(())
        })
    }

    fn resize(&self, id: &str, cols: u16, rows: u16) -> HostFuture<'_, ()> {
        let state = Arc::clone(&self.state);
        let id = id.to_owned();
        Box::pin(async move {
            state
                .lock()
                .expect("fake host state")
                .resize_calls
                .push((id, cols, rows));
            Ok(())
        })
    }

    fn close(&self, id: &str) -> HostFuture<'_, ()> {
        let state = Arc::clone(&self.state);
        let id = id.to_owned();
        Box::pin(async move {
            let mut state = state.lock().expect("fake host state");
            state.close_calls.push(id.clone());
            if state.fail_close.contains(&id) {
                return Err(AppError::Host("scripted close failure".into()));
            }
            state.alive.retain(|p| p.id != id);
            Ok(())
        })
    }

    fn detach(&self, id: &str) -> HostFuture<'_, ()> {
        let state = Arc::clone(&self.state);
        let id = id.to_owned();
        Box::pin(async move {
            state.lock().expect("fake host state").detach_calls.push(id);
            Ok(())
        })
    }

    fn list_alive(&self) -> HostFuture<'_, Vec<AliveProcess>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move { Ok(state.lock().expect("fake host state").alive.clone()) })
    }
}

/// Registry settings tightened for fast tests.
pub fn fast_settings() -> RegistrySettings {
    RegistrySettings {
        resize_suppress: Duration::from_millis(150),
        default_idle: Duration::from_millis(80),
        save_debounce: Duration::from_millis(300),
        layout_debounce: Duration::from_millis(100),
        closing_guard_ttl: Duration::from_secs(30),
    }
}

pub struct TestRegistry {
    pub handle: RegistryHandle,
    pub events: tokio::sync::mpsc::Receiver<RegistryEvent>,
    pub store: Arc<StateStore>,
    pub cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

/// Spawn a registry over the given host with test timings.
pub fn spawn_registry(host: Arc<dyn ProcessHost>, settings: RegistrySettings) -> TestRegistry {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = StateStore::new(dir.path()).expect("store");
    let cancel = CancellationToken::new();
    let (handle, events, _task) = registry::spawn(host, Arc::clone(&store), settings, cancel.clone());
    TestRegistry {
        handle,
        events,
        store,
        cancel,
        _dir: dir,
    }
}

/// A hydrated registry (saves enabled) over the given host.
pub async fn hydrated_registry(host: Arc<dyn ProcessHost>) -> TestRegistry {
    let test = spawn_registry(host, fast_settings());
    test.handle.mark_hydrated().await.expect("hydrate");
    test
}

/// Session fixture with a fixed backend id.
pub fn session(id: &str, name: &str) -> Session {
    Session::new(id.into(), "proj".into(), name.into())
}

/// Session fixture running a recognized agent.
pub fn agent_session(id: &str, name: &str) -> Session {
    let mut session = session(id, name);
    session.launch_command = Some("claude".into());
    session.effect_id = Some("claude".into());
    session
}

/// One request the stub server saw.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Minimal HTTP/1.1 stub good enough for reqwest round trips.
pub struct StubServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubServer {
    /// Start the stub; `respond` maps (method, path) to (status, JSON body).
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
        let seen = Arc::clone(&requests);
        let respond = Arc::new(respond);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let seen = Arc::clone(&seen);
                let respond = Arc::clone(&respond);
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut socket).await else {
                        return;
                    };
                    let (status, body) = respond(&request.method, &request.path);
                    seen.lock().expect("requests").push(request);
                    let response = format!(
                        "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len(),
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests").clone()
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_owned();
    let path = parts.next()?.to_owned();

    let content_length = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .next()
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
