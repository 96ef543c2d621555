// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` wires a dispatcher and a connection manager to either the
//! in-memory collaborators or a temp SQLite database, and connects mock
//! devices with [`TestHarness::connect`].

use std::sync::Arc;
use std::time::Instant;

use parley_broker::SqliteBroker;
use parley_config::model::{BrokerConfig, ServerConfig, StorageConfig};
use parley_core::{
    Broker, ContentInterceptor, IdGenerator, MessageStore, ParleyError, PluginAdapter,
    SessionStore,
};
use parley_gateway::{
    AcceptAll, ConnectionHandle, ConnectionManager, ConnectionSettings, ConnectionState, Dispatcher,
    GatewaySettings, GatewayState, HealthState, HmacTokenResolver,
};
use parley_storage::SqliteStorage;
use tempfile::TempDir;

use crate::ids::SequenceIdGenerator;
use crate::memory_broker::MemoryBroker;
use crate::memory_store::MemoryStore;
use crate::mock_transport::{MockClient, MockTransport};

/// Secret the harness signs tokens with.
pub const TEST_SECRET: &str = "parley-test-secret";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    ids: Arc<dyn IdGenerator>,
    interceptor: Arc<dyn ContentInterceptor>,
    settings: ConnectionSettings,
    broker_config: BrokerConfig,
    sqlite: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            ids: Arc::new(SequenceIdGenerator::default()),
            interceptor: Arc::new(AcceptAll),
            settings: ConnectionSettings::default(),
            broker_config: BrokerConfig::default(),
            sqlite: false,
        }
    }

    /// Use a specific id generator instead of a 1, 2, 3, ... sequence.
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn ContentInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn with_settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Device classes the broker serves, the first being the default.
    pub fn with_device_classes(mut self, classes: &[&str]) -> Self {
        self.broker_config.device_classes = classes.iter().map(|c| c.to_string()).collect();
        if let Some(first) = classes.first() {
            self.broker_config.default_device_class = first.to_string();
        }
        self
    }

    /// Back the harness with SQLite in a temp directory instead of memory.
    pub fn with_sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    /// Build the test harness.
    pub async fn build(self) -> Result<TestHarness, ParleyError> {
        let backend = if self.sqlite {
            let dir = tempfile::tempdir().map_err(|e| ParleyError::Storage {
                source: Box::new(e),
            })?;
            let storage = Arc::new(SqliteStorage::new(StorageConfig {
                database_path: dir.path().join("parley.db").to_string_lossy().into_owned(),
                ..StorageConfig::default()
            }));
            storage.initialize().await?;
            let broker =
                Arc::new(SqliteBroker::open(storage.database()?, self.broker_config.clone()).await?);
            Backend::Sqlite {
                storage,
                broker,
                _dir: dir,
            }
        } else {
            Backend::Memory {
                store: MemoryStore::new(),
                broker: MemoryBroker::new(&self.broker_config.default_device_class),
            }
        };

        let (messages, sessions, broker) = backend.collaborators();
        let dispatcher = Dispatcher::new(
            messages.clone(),
            sessions.clone(),
            broker.clone(),
            self.ids.clone(),
            self.interceptor.clone(),
        );
        let connections = ConnectionManager::new(dispatcher, broker.clone(), self.settings);

        Ok(TestHarness {
            connections,
            messages,
            sessions,
            broker,
            identity: Arc::new(HmacTokenResolver::new(Some(TEST_SECRET))),
            ids: self.ids,
            interceptor: self.interceptor,
            broker_config: self.broker_config,
            backend,
        })
    }
}

enum Backend {
    Memory {
        store: MemoryStore,
        broker: MemoryBroker,
    },
    Sqlite {
        storage: Arc<SqliteStorage>,
        broker: Arc<SqliteBroker>,
        _dir: TempDir,
    },
}

impl Backend {
    fn collaborators(
        &self,
    ) -> (
        Arc<dyn MessageStore>,
        Arc<dyn SessionStore>,
        Arc<dyn Broker>,
    ) {
        match self {
            Backend::Memory { store, broker } => (
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(broker.clone()),
            ),
            Backend::Sqlite {
                storage, broker, ..
            } => (storage.clone(), storage.clone(), broker.clone()),
        }
    }

    fn components(&self) -> Vec<Arc<dyn PluginAdapter>> {
        match self {
            Backend::Memory { store, broker } => {
                vec![Arc::new(store.clone()), Arc::new(broker.clone())]
            }
            Backend::Sqlite {
                storage, broker, ..
            } => vec![storage.clone(), broker.clone()],
        }
    }
}

/// A complete messaging core with mock devices for integration testing.
pub struct TestHarness {
    connections: ConnectionManager,
    messages: Arc<dyn MessageStore>,
    sessions: Arc<dyn SessionStore>,
    broker: Arc<dyn Broker>,
    identity: Arc<HmacTokenResolver>,
    ids: Arc<dyn IdGenerator>,
    interceptor: Arc<dyn ContentInterceptor>,
    broker_config: BrokerConfig,
    backend: Backend,
}

impl TestHarness {
    /// Create a builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Connect a device of `user_id` over a default mock transport.
    pub fn connect(&self, user_id: i64, device_class: &str) -> (ConnectionHandle, MockClient) {
        self.connect_with(MockTransport::new(), user_id, device_class)
    }

    /// Connect a device of `user_id` over a configured mock transport.
    pub fn connect_with(
        &self,
        transport: MockTransport,
        user_id: i64,
        device_class: &str,
    ) -> (ConnectionHandle, MockClient) {
        let (sink, stream, client) = transport.build();
        let handle = self.connections.connect(sink, stream, user_id, device_class);
        (handle, client)
    }

    /// Connect a device and wait until its broker consumer is attached, so
    /// anything published afterwards reaches it.
    pub async fn connect_ready(&self, user_id: i64, device_class: &str) -> (ConnectionHandle, MockClient) {
        self.connect_ready_with(MockTransport::new(), user_id, device_class)
            .await
    }

    pub async fn connect_ready_with(
        &self,
        transport: MockTransport,
        user_id: i64,
        device_class: &str,
    ) -> (ConnectionHandle, MockClient) {
        let (handle, client) = self.connect_with(transport, user_id, device_class);
        let mut state = handle.watch_state();
        let _ = state
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await;
        (handle, client)
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.connections.dispatcher()
    }

    pub fn messages(&self) -> &Arc<dyn MessageStore> {
        &self.messages
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// The in-memory store, when not backed by SQLite.
    pub fn memory_store(&self) -> Option<&MemoryStore> {
        match &self.backend {
            Backend::Memory { store, .. } => Some(store),
            Backend::Sqlite { .. } => None,
        }
    }

    /// The in-memory broker, when not backed by SQLite.
    pub fn memory_broker(&self) -> Option<&MemoryBroker> {
        match &self.backend {
            Backend::Memory { broker, .. } => Some(broker),
            Backend::Sqlite { .. } => None,
        }
    }

    /// The SQLite broker, when backed by SQLite.
    pub fn sqlite_broker(&self) -> Option<&Arc<SqliteBroker>> {
        match &self.backend {
            Backend::Sqlite { broker, .. } => Some(broker),
            Backend::Memory { .. } => None,
        }
    }

    /// A valid bearer token for `user_id`.
    pub fn token(&self, user_id: i64) -> String {
        self.identity
            .issue(user_id)
            .expect("harness resolver has a secret")
    }

    /// Gateway state for driving the HTTP router in-process.
    pub fn gateway_state(&self) -> GatewayState {
        GatewayState {
            connections: self.connections.clone(),
            identity: self.identity.clone(),
            messages: self.messages.clone(),
            sessions: self.sessions.clone(),
            settings: Arc::new(GatewaySettings::new(
                &ServerConfig::default(),
                &self.broker_config,
            )),
            health: HealthState {
                start_time: Instant::now(),
                components: self.backend.components(),
            },
        }
    }

    /// Simulate a process crash and restart of the broker: every delivery
    /// claimed but not acked becomes pending again. Live connections are
    /// not touched.
    pub async fn crash_broker(&mut self) -> Result<(), ParleyError> {
        match &mut self.backend {
            Backend::Memory { broker, .. } => {
                broker.recover().await;
            }
            Backend::Sqlite {
                storage, broker, ..
            } => {
                let reopened =
                    Arc::new(SqliteBroker::open(storage.database()?, self.broker_config.clone()).await?);
                *broker = reopened;
            }
        }
        let (_, _, broker) = self.backend.collaborators();
        let dispatcher = Dispatcher::new(
            self.messages.clone(),
            self.sessions.clone(),
            broker.clone(),
            self.ids.clone(),
            self.interceptor.clone(),
        );
        self.connections =
            ConnectionManager::new(dispatcher, broker.clone(), self.connections.settings().clone());
        self.broker = broker;
        Ok(())
    }
}
