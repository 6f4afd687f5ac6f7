//! Listener supervisor.
//!
//! # Responsibilities
//! - Bind every listener of the live snapshot
//! - Reconcile the bound set when the snapshot changes
//! - Drain all listeners on shutdown

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::config::ConfigStore;
use crate::dispatch::Dispatcher;
use crate::http::{AppState, FrontDoor};
use crate::observability::RequestCounters;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener '{name}': invalid bind address '{address}'")]
    InvalidAddress { name: String, address: String },

    #[error("listener '{name}': failed to bind {address}: {source}")]
    Bind {
        name: String,
        address: String,
        #[source]
        source: std::io::Error,
    },
}

struct RunningListener {
    bind_address: String,
    local_addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl RunningListener {
    async fn stop(self, name: &str, grace: Duration) {
        let _ = self.stop.send(());
        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(listener = name, error = %e, "Listener exited with error"),
            Ok(Err(e)) => tracing::error!(listener = name, error = %e, "Listener task failed"),
            Err(_) => tracing::warn!(listener = name, "Listener did not drain before deadline"),
        }
    }
}

/// The set of bound listeners, kept in step with the live snapshot.
pub struct ListenerSet {
    store: Arc<ConfigStore>,
    dispatcher: Dispatcher,
    counters: Arc<RequestCounters>,
    running: HashMap<String, RunningListener>,
    grace: Duration,
}

impl ListenerSet {
    pub fn new(
        store: Arc<ConfigStore>,
        dispatcher: Dispatcher,
        counters: Arc<RequestCounters>,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            counters,
            running: HashMap::new(),
            grace,
        }
    }

    /// Bind every listener of the current snapshot. Any failure is returned
    /// and nothing is left running.
    pub async fn start(&mut self) -> Result<(), ListenerError> {
        let snapshot = self.store.snapshot();
        for listener in &snapshot.config.listeners {
            let name = listener.effective_name().to_string();
            if let Err(e) = self.bind(&name, &listener.bind_address).await {
                self.stop_all().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Bring the bound set in line with the current snapshot.
    ///
    /// Returns the bind failures; the listeners that did bind keep serving.
    pub async fn reconcile(&mut self) -> Vec<ListenerError> {
        let snapshot = self.store.snapshot();
        let wanted: HashMap<String, String> = snapshot
            .config
            .listeners
            .iter()
            .map(|l| (l.effective_name().to_string(), l.bind_address.clone()))
            .collect();

        let stale: Vec<String> = self
            .running
            .iter()
            .filter(|(name, running)| wanted.get(*name) != Some(&running.bind_address))
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            if let Some(running) = self.running.remove(&name) {
                tracing::info!(listener = %name, address = %running.local_addr, "Stopping listener");
                running.stop(&name, self.grace).await;
            }
        }

        let mut errors = Vec::new();
        for (name, address) in &wanted {
            if self.running.contains_key(name) {
                continue;
            }
            if let Err(e) = self.bind(name, address).await {
                tracing::error!(error = %e, "Failed to start listener");
                errors.push(e);
            }
        }
        errors
    }

    async fn bind(&mut self, name: &str, address: &str) -> Result<(), ListenerError> {
        let addr: SocketAddr = address.parse().map_err(|_| ListenerError::InvalidAddress {
            name: name.to_string(),
            address: address.to_string(),
        })?;
        let socket = TcpListener::bind(addr).await.map_err(|source| ListenerError::Bind {
            name: name.to_string(),
            address: address.to_string(),
            source,
        })?;
        let local_addr = socket.local_addr().map_err(|source| ListenerError::Bind {
            name: name.to_string(),
            address: address.to_string(),
            source,
        })?;

        let state = AppState::new(
            name,
            Arc::clone(&self.store),
            self.dispatcher.clone(),
            Arc::clone(&self.counters),
        );
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(FrontDoor::new(state).run(socket, async move {
            let _ = stopped.await;
        }));

        tracing::info!(listener = name, address = %local_addr, "Listener bound");
        self.running.insert(
            name.to_string(),
            RunningListener {
                bind_address: address.to_string(),
                local_addr,
                stop,
                handle,
            },
        );
        Ok(())
    }

    /// Actual address of a bound listener (resolves port 0).
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.running.get(name).map(|r| r.local_addr)
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Follow snapshot swaps until shutdown, then drain every listener.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut versions = self.store.subscribe();

        loop {
            tokio::select! {
                changed = versions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let version = *versions.borrow_and_update();
                    tracing::debug!(version, "Snapshot changed, reconciling listeners");
                    self.reconcile().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Listener set received shutdown signal, draining");
                    break;
                }
            }
        }

        self.stop_all().await;
    }

    async fn stop_all(&mut self) {
        let grace = self.grace;
        let stops = self
            .running
            .drain()
            .map(|(name, running)| async move { running.stop(&name, grace).await });
        futures_util::future::join_all(stops).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TimeoutConfig;
    use std::io::Write;

    fn document(listeners: &[(&str, &str)]) -> String {
        let mut yaml = String::from("listeners:\n");
        for (name, address) in listeners {
            yaml.push_str(&format!(
                "  - name: {name}\n    bindAddress: \"{address}\"\n    routes:\n      - {{ name: r-{name}, pathPrefix: /api, backends: [b] }}\n"
            ));
        }
        yaml.push_str("backends:\n  - { name: b, protocol: openai, baseUrl: \"http://127.0.0.1:9\" }\n");
        yaml
    }

    fn set_for(store: &Arc<ConfigStore>) -> ListenerSet {
        ListenerSet::new(
            Arc::clone(store),
            Dispatcher::new(&TimeoutConfig::default()).unwrap(),
            Arc::new(RequestCounters::new()),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_start_binds_every_listener() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "{}", document(&[("a", "127.0.0.1:0"), ("b", "127.0.0.1:0")])).unwrap();
        let store = Arc::new(ConfigStore::from_path(file.path()).unwrap());

        let mut set = set_for(&store);
        set.start().await.unwrap();
        assert_eq!(set.len(), 2);
        let addr = set.local_addr("a").unwrap();
        assert_ne!(addr.port(), 0);

        let response = reqwest::get(format!("http://{}/nowhere", addr)).await.unwrap();
        assert_eq!(response.status(), 404);
        set.stop_all().await;
    }

    #[tokio::test]
    async fn test_reconcile_follows_reload() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "{}", document(&[("a", "127.0.0.1:0")])).unwrap();
        let store = Arc::new(ConfigStore::from_path(file.path()).unwrap());

        let mut set = set_for(&store);
        set.start().await.unwrap();
        let first = set.local_addr("a").unwrap();

        std::fs::write(file.path(), document(&[("b", "127.0.0.1:0")])).unwrap();
        store.reload().await.unwrap();
        let errors = set.reconcile().await;

        assert!(errors.is_empty());
        assert!(set.local_addr("a").is_none());
        assert!(set.local_addr("b").is_some());
        assert!(reqwest::get(format!("http://{}/", first)).await.is_err());
        set.stop_all().await;
    }

    #[tokio::test]
    async fn test_start_fails_when_address_taken() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "{}", document(&[("a", "127.0.0.1:0"), ("b", address.as_str())])).unwrap();
        let store = Arc::new(ConfigStore::from_path(file.path()).unwrap());

        let mut set = set_for(&store);
        let err = set.start().await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { ref name, .. } if name == "b"), "{err}");
        assert!(set.is_empty());
    }
}
