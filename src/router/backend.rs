//! Backend router: one warm session per project key
//!
//! The router owns every backend session. Selecting a key spawns its
//! backend on first use and performs the `initialize` handshake; switching
//! keys leaves other sessions running so switching back is free. A session
//! whose process died is replaced the next time its key is selected or
//! a call is dispatched to it.

use crate::lsp::error::LspError;
use crate::lsp::session::{ClientSession, SessionEvent, SessionOptions};
use crate::router::key::ProjectKey;
use crate::router::recipes::SpawnRecipe;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("No active backend selected")]
    NoActiveBackend,

    #[error("No spawn recipe for language '{0}'")]
    NoRecipe(String),

    #[error(transparent)]
    Lsp(#[from] LspError),
}

/// Starts a session for a key
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    async fn launch(
        &self,
        key: &ProjectKey,
        options: SessionOptions,
    ) -> Result<(ClientSession, mpsc::UnboundedReceiver<SessionEvent>), RouterError>;
}

/// Launches backends as child processes described by a spawn recipe
pub struct ProcessLauncher {
    recipes: Arc<dyn SpawnRecipe>,
}

impl ProcessLauncher {
    pub fn new(recipes: Arc<dyn SpawnRecipe>) -> Self {
        Self { recipes }
    }
}

#[async_trait]
impl BackendLauncher for ProcessLauncher {
    async fn launch(
        &self,
        key: &ProjectKey,
        options: SessionOptions,
    ) -> Result<(ClientSession, mpsc::UnboundedReceiver<SessionEvent>), RouterError> {
        let descriptor = self
            .recipes
            .descriptor(key)
            .ok_or_else(|| RouterError::NoRecipe(key.language().to_string()))?;

        info!(
            "Spawning backend for {}: {} {}",
            key,
            descriptor.program,
            descriptor.args.join(" ")
        );
        Ok(ClientSession::spawn(descriptor, options).await?)
    }
}

/// A session event tagged with the key of the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct RouterEvent {
    pub key: ProjectKey,
    /// Launch number of the producing session; a relaunch under the same
    /// key gets a new one
    pub launch: u64,
    pub event: SessionEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The key was already active and its session is alive
    AlreadyActive,
    /// A warm session existed for the key
    Reused,
    /// A new backend was launched
    Spawned,
}

/// A call forwarded to the active backend
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCall {
    Request {
        method: String,
        params: Option<Value>,
        context: Option<PathBuf>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Where a dispatched call went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub key: ProjectKey,
    pub launch: u64,
    /// Backend request id; `None` for notifications
    pub id: Option<u64>,
    /// The session had exited and was launched again for this call
    pub relaunched: bool,
}

/// The selected session and the launch it belongs to
#[derive(Clone)]
pub struct ActiveSession {
    pub key: ProjectKey,
    pub launch: u64,
    pub session: Arc<ClientSession>,
}

struct Launched {
    launch: u64,
    session: Arc<ClientSession>,
}

pub struct BackendRouter {
    launcher: Arc<dyn BackendLauncher>,
    options: SessionOptions,
    sessions: Mutex<HashMap<ProjectKey, Launched>>,
    active: StdMutex<Option<ProjectKey>>,
    events: mpsc::UnboundedSender<RouterEvent>,
    next_launch: AtomicU64,
}

impl BackendRouter {
    /// Create a router; every session event arrives on the returned receiver
    pub fn new(
        launcher: Arc<dyn BackendLauncher>,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let router = Self {
            launcher,
            options,
            sessions: Mutex::new(HashMap::new()),
            active: StdMutex::new(None),
            events,
            next_launch: AtomicU64::new(1),
        };
        (router, receiver)
    }

    pub fn active_key(&self) -> Option<ProjectKey> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_active(&self, key: Option<ProjectKey>) {
        *self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = key;
    }

    /// Make `key` the active backend, launching it if needed
    pub async fn select(&self, key: &ProjectKey) -> Result<SelectOutcome, RouterError> {
        // Held across the launch so concurrent selects of one key spawn once
        let mut sessions = self.sessions.lock().await;

        let live = sessions
            .get(key)
            .is_some_and(|launched| !launched.session.is_exited());

        let outcome = if live {
            if self.active_key().as_ref() == Some(key) {
                SelectOutcome::AlreadyActive
            } else {
                SelectOutcome::Reused
            }
        } else {
            if sessions.remove(key).is_some() {
                info!("Backend for {} has exited, respawning", key);
            }
            let launched = self.launch(key).await?;
            sessions.insert(key.clone(), launched);
            SelectOutcome::Spawned
        };

        if outcome != SelectOutcome::AlreadyActive {
            info!("Selected backend {} ({:?})", key, outcome);
        }
        self.set_active(Some(key.clone()));
        Ok(outcome)
    }

    async fn launch(&self, key: &ProjectKey) -> Result<Launched, RouterError> {
        let options = self.options.clone().with_label(key.to_string());
        let (session, events) = self.launcher.launch(key, options.clone()).await?;

        let output = key.output_directory();
        let compile_commands_dir = (!output.as_os_str().is_empty()).then_some(output);
        session.initialize(&options.initialize_request(key.workspace(), compile_commands_dir))?;

        let launch = self.next_launch.fetch_add(1, Ordering::Relaxed);
        self.forward_events(key.clone(), launch, events);
        Ok(Launched {
            launch,
            session: Arc::new(session),
        })
    }

    fn forward_events(
        &self,
        key: ProjectKey,
        launch: u64,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let sink = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let exited = matches!(event, SessionEvent::Exited { .. });
                if sink
                    .send(RouterEvent {
                        key: key.clone(),
                        launch,
                        event,
                    })
                    .is_err()
                {
                    debug!("Router event receiver dropped, stop forwarding {}", key);
                    break;
                }
                if exited {
                    break;
                }
            }
        });
    }

    /// Forward a call to the active backend, relaunching it first if it
    /// has exited since it was selected
    pub async fn dispatch(&self, call: OutboundCall) -> Result<Dispatched, RouterError> {
        let (active, relaunched) = self.live_session().await?;
        let ActiveSession {
            key,
            launch,
            session,
        } = active;

        let id = match call {
            OutboundCall::Request {
                method,
                params,
                context,
            } => Some(session.request(&method, params, context)?),
            OutboundCall::Notification { method, params } => {
                session.notify(&method, params)?;
                None
            }
        };
        Ok(Dispatched {
            key,
            launch,
            id,
            relaunched,
        })
    }

    /// The active session, relaunched if its process has exited
    pub async fn active_session(&self) -> Result<ActiveSession, RouterError> {
        Ok(self.live_session().await?.0)
    }

    async fn live_session(&self) -> Result<(ActiveSession, bool), RouterError> {
        let key = self.active_key().ok_or(RouterError::NoActiveBackend)?;
        // Same lock as select, so a dead session is relaunched once
        let mut sessions = self.sessions.lock().await;
        let exited = match sessions.get(&key) {
            None => return Err(RouterError::NoActiveBackend),
            Some(launched) => launched.session.is_exited(),
        };

        if exited {
            sessions.remove(&key);
            info!("Backend for {} has exited, respawning", key);
            let launched = self.launch(&key).await?;
            sessions.insert(key.clone(), launched);
        }

        let launched = sessions.get(&key).ok_or(RouterError::NoActiveBackend)?;
        let active = ActiveSession {
            launch: launched.launch,
            session: Arc::clone(&launched.session),
            key,
        };
        Ok((active, exited))
    }

    /// The session of `key`, provided it is still the given launch
    pub async fn launched_session(&self, key: &ProjectKey, launch: u64) -> Option<Arc<ClientSession>> {
        self.sessions
            .lock()
            .await
            .get(key)
            .filter(|launched| launched.launch == launch)
            .map(|launched| Arc::clone(&launched.session))
    }

    pub async fn session(&self, key: &ProjectKey) -> Option<Arc<ClientSession>> {
        self.sessions
            .lock()
            .await
            .get(key)
            .map(|launched| Arc::clone(&launched.session))
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Shut down and forget the backend for `key`
    pub async fn close(&self, key: &ProjectKey) -> bool {
        let Some(launched) = self.sessions.lock().await.remove(key) else {
            return false;
        };
        if self.active_key().as_ref() == Some(key) {
            self.set_active(None);
        }
        Self::shutdown_session(key, &launched.session);
        true
    }

    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        self.set_active(None);
        for (key, launched) in sessions {
            Self::shutdown_session(&key, &launched.session);
        }
    }

    fn shutdown_session(key: &ProjectKey, session: &ClientSession) {
        if session.is_exited() {
            return;
        }
        info!("Shutting down backend {}", key);
        if let Err(e) = session.shutdown().and_then(|_| session.exit()) {
            warn!("Failed to shut down backend {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::process::ProcessDescriptor;
    use crate::lsp::types::DecodedResult;
    use crate::router::recipes::{RecipeBook, RecipeConfig};
    use crate::test_utils::stub::StubLauncher;
    use serde_json::json;
    use std::time::Duration;

    fn router() -> (
        BackendRouter,
        mpsc::UnboundedReceiver<RouterEvent>,
        Arc<StubLauncher>,
    ) {
        let launcher = Arc::new(StubLauncher::default());
        let (router, events) = BackendRouter::new(launcher.clone(), SessionOptions::default());
        (router, events, launcher)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<RouterEvent>) -> RouterEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for router event")
            .expect("router event channel closed")
    }

    #[tokio::test]
    async fn test_switching_keys_keeps_sessions_warm() {
        let (router, _events, launcher) = router();
        let a = ProjectKey::new("cpp", "/work/a", "/work/a/build");
        let b = ProjectKey::new("python", "/work/b", "");

        assert_eq!(router.select(&a).await.unwrap(), SelectOutcome::Spawned);
        assert_eq!(router.select(&b).await.unwrap(), SelectOutcome::Spawned);
        assert_eq!(router.select(&a).await.unwrap(), SelectOutcome::Reused);
        assert_eq!(router.select(&a).await.unwrap(), SelectOutcome::AlreadyActive);

        assert_eq!(launcher.launches(&a), 1);
        assert_eq!(launcher.launches(&b), 1);
        assert_eq!(router.session_count().await, 2);
        assert_eq!(router.active_key(), Some(a));
    }

    #[tokio::test]
    async fn test_concurrent_selects_spawn_once() {
        let (router, _events, launcher) = router();
        let router = Arc::new(router);
        let key = ProjectKey::new("cpp", "/work/a", "");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let router = Arc::clone(&router);
                let key = key.clone();
                tokio::spawn(async move { router.select(&key).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(launcher.launches(&key), 1);
    }

    #[tokio::test]
    async fn test_dispatch_without_selection_fails() {
        let (router, _events, _launcher) = router();
        let call = OutboundCall::Notification {
            method: "textDocument/didSave".to_string(),
            params: None,
        };
        assert!(matches!(
            router.dispatch(call).await,
            Err(RouterError::NoActiveBackend)
        ));
    }

    #[tokio::test]
    async fn test_spawn_sends_initialize_with_key_paths() {
        let (router, _events, launcher) = router();
        let key = ProjectKey::new("cpp", "/work/a", "/work/a/build");
        router.select(&key).await.unwrap();

        let mut backend = launcher.backend(&key).await;
        let initialize = backend.recv_method("initialize").await;
        assert_eq!(initialize["params"]["rootUri"], "file:///work/a");
        assert_eq!(
            initialize["params"]["initializationOptions"]["compilationDatabasePath"],
            "/work/a/build"
        );
    }

    #[tokio::test]
    async fn test_dispatch_reaches_active_backend_only() {
        let (router, mut events, launcher) = router();
        let a = ProjectKey::new("cpp", "/work/a", "");
        let b = ProjectKey::new("java", "/work/b", "");
        router.select(&a).await.unwrap();
        router.select(&b).await.unwrap();

        let mut backend_a = launcher.backend(&a).await;
        let mut backend_b = launcher.backend(&b).await;
        backend_a.complete_handshake(json!({})).await;
        backend_b.complete_handshake(json!({})).await;
        for _ in 0..2 {
            assert!(matches!(
                next_event(&mut events).await.event,
                SessionEvent::Result { result: DecodedResult::Initialize(_), .. }
            ));
        }

        let dispatched = router
            .dispatch(OutboundCall::Request {
                method: "textDocument/hover".to_string(),
                params: Some(json!({
                    "textDocument": {"uri": "file:///work/b/A.java"},
                    "position": {"line": 1, "character": 2}
                })),
                context: Some(PathBuf::from("/work/b/A.java")),
            })
            .await
            .unwrap();
        assert_eq!(dispatched.key, b);

        let request = backend_b.recv().await;
        assert_eq!(request["method"], "textDocument/hover");
        assert_eq!(request["id"], json!(dispatched.id.unwrap()));
        backend_b.respond(&request["id"], json!({"contents": "class A"})).await;

        let event = next_event(&mut events).await;
        assert_eq!(event.key, b);
        assert!(matches!(
            event.event,
            SessionEvent::Result { result: DecodedResult::Hover(Some(_)), .. }
        ));

        assert!(
            tokio::time::timeout(Duration::from_millis(100), backend_a.recv_method("textDocument/hover"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_exited_backend_is_respawned_on_next_select() {
        let (router, mut events, launcher) = router();
        let a = ProjectKey::new("cpp", "/work/a", "");
        let b = ProjectKey::new("python", "/work/b", "");
        router.select(&a).await.unwrap();

        launcher.backend(&a).await.hang_up().await;
        loop {
            let event = next_event(&mut events).await;
            assert_eq!(event.key, a);
            if matches!(event.event, SessionEvent::Exited { .. }) {
                break;
            }
        }

        router.select(&b).await.unwrap();
        assert_eq!(router.select(&a).await.unwrap(), SelectOutcome::Spawned);
        assert_eq!(launcher.launches(&a), 2);
        assert_eq!(router.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_dispatch_relaunches_exited_active_backend() {
        let (router, mut events, launcher) = router();
        let key = ProjectKey::new("cpp", "/work/a", "/work/a/build");
        router.select(&key).await.unwrap();

        launcher.backend(&key).await.hang_up().await;
        loop {
            if matches!(next_event(&mut events).await.event, SessionEvent::Exited { .. }) {
                break;
            }
        }

        let dispatched = router
            .dispatch(OutboundCall::Request {
                method: "textDocument/hover".to_string(),
                params: Some(json!({
                    "textDocument": {"uri": "file:///work/a/main.cpp"},
                    "position": {"line": 0, "character": 4}
                })),
                context: Some(PathBuf::from("/work/a/main.cpp")),
            })
            .await
            .unwrap();
        assert_eq!(dispatched.key, key);
        assert!(dispatched.relaunched);
        assert_eq!(launcher.launches(&key), 2);
        assert_eq!(router.active_key(), Some(key.clone()));

        let mut backend = launcher.backend(&key).await;
        let initialize = backend.recv_method("initialize").await;
        assert_eq!(
            initialize["params"]["initializationOptions"]["compilationDatabasePath"],
            "/work/a/build"
        );
        backend
            .respond(&initialize["id"], json!({"capabilities": {"hoverProvider": true}}))
            .await;

        let request = backend.recv_method("textDocument/hover").await;
        assert_eq!(request["id"], json!(dispatched.id.unwrap()));
        backend.respond(&request["id"], json!({"contents": "int x"})).await;

        loop {
            let event = next_event(&mut events).await;
            assert_eq!(event.launch, dispatched.launch);
            if let SessionEvent::Result { id, result, .. } = event.event {
                if matches!(result, DecodedResult::Hover(Some(_))) {
                    assert_eq!(Some(id), dispatched.id);
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_close_shuts_backend_down() {
        let (router, _events, launcher) = router();
        let key = ProjectKey::new("cpp", "/work/a", "");
        router.select(&key).await.unwrap();

        assert!(router.close(&key).await);
        assert_eq!(router.active_key(), None);
        assert!(!router.close(&key).await);

        let mut backend = launcher.backend(&key).await;
        backend.recv_method("shutdown").await;
        backend.recv_method("exit").await;
    }

    #[tokio::test]
    async fn test_unknown_language_has_no_recipe() {
        let launcher = Arc::new(ProcessLauncher::new(Arc::new(RecipeBook::new(
            RecipeConfig::default(),
        ))));
        let (router, _events) = BackendRouter::new(launcher, SessionOptions::default());

        let result = router.select(&ProjectKey::new("cobol", "/work/c", "")).await;
        assert!(matches!(result, Err(RouterError::NoRecipe(language)) if language == "cobol"));
        assert_eq!(router.active_key(), None);
        assert_eq!(router.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_process_launcher_reports_spawn_failure() {
        let recipe = |_key: &ProjectKey| Some(ProcessDescriptor::new("/nonexistent/lsp-server"));
        let launcher = Arc::new(ProcessLauncher::new(Arc::new(recipe)));
        let (router, _events) = BackendRouter::new(launcher, SessionOptions::default());

        let result = router.select(&ProjectKey::new("cpp", "/work/a", "")).await;
        assert!(matches!(result, Err(RouterError::Lsp(LspError::Process(_)))));
    }

    #[cfg(feature = "backend-integration-tests")]
    #[tokio::test]
    async fn test_real_clangd_definition() {
        use lsp_types::{GotoDefinitionResponse, Position};
        use std::fs;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let build = root.join("build");
        fs::create_dir(&build).unwrap();
        let source = root.join("main.cpp");
        let text = "int answer() { return 42; }\nint main() { return answer(); }\n";
        fs::write(&source, text).unwrap();
        let database = json!([{
            "directory": root.display().to_string(),
            "file": source.display().to_string(),
            "arguments": ["c++", "-c", source.display().to_string()]
        }]);
        fs::write(build.join("compile_commands.json"), database.to_string()).unwrap();

        let config = RecipeConfig {
            clangd_path: crate::test_utils::get_test_clangd_path(),
            ..RecipeConfig::default()
        };
        let launcher = Arc::new(ProcessLauncher::new(Arc::new(RecipeBook::new(config))));
        let (router, mut events) = BackendRouter::new(launcher, SessionOptions::default());
        let key = ProjectKey::new("cpp", &root, &build);

        router.select(&key).await.unwrap();
        let session = router.session(&key).await.unwrap();
        session.wait_initialized().await.unwrap();
        session.did_open(&source, text).unwrap();
        let id = session.definition(&source, Position::new(1, 21)).unwrap();

        loop {
            let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
                .await
                .expect("clangd did not answer")
                .expect("router event channel closed");
            if let SessionEvent::Result {
                id: got,
                result: DecodedResult::Definition(definition),
                ..
            } = event.event
            {
                assert_eq!(got, id);
                let line = match definition {
                    Some(GotoDefinitionResponse::Scalar(location)) => location.range.start.line,
                    Some(GotoDefinitionResponse::Array(locations)) => locations[0].range.start.line,
                    Some(GotoDefinitionResponse::Link(links)) => {
                        links[0].target_selection_range.start.line
                    }
                    None => panic!("clangd found no definition"),
                };
                assert_eq!(line, 0);
                break;
            }
        }

        router.close_all().await;
    }
}
