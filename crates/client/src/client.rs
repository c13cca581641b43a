// Client facade: the state container shared by every consumer of one service link.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use annolab_common::protocol::outbound::ClientRequest;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::connection::{
    Connection, ConnectionError, ConnectionManager, ConnectionSettings, ConnectionStatus, Connector,
    SendReceipt, WsConnector,
};
use crate::export::ExportSink;
use crate::listeners::{ListenerRegistry, Subscription};
use crate::notify::Notifier;
use crate::protocol::Reconciler;
use crate::store::{DocumentHandle, DocumentStore};
use crate::username::{HttpUsernameResolver, UsernameResolver};

struct ClientInner<C: Connector> {
    config: ClientConfig,
    store: DocumentStore,
    registry: ListenerRegistry,
    notifier: Notifier,
    connection: ConnectionManager<C>,
    /// Shared with the reconciler for username lookups.
    session: Arc<RwLock<Option<String>>>,
}

/// Handle to one annotation client. Clones share all state.
///
/// Construct once at startup and pass clones to every consumer.
pub struct AnnoClient<C: Connector = WsConnector> {
    inner: Arc<ClientInner<C>>,
}

impl<C: Connector> Clone for AnnoClient<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// Non-owning handle, for callbacks stored inside the client's own registry.
pub struct WeakAnnoClient<C: Connector = WsConnector> {
    inner: Weak<ClientInner<C>>,
}

impl<C: Connector> Clone for WeakAnnoClient<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<C: Connector> WeakAnnoClient<C> {
    pub fn upgrade(&self) -> Option<AnnoClient<C>> {
        self.inner.upgrade().map(|inner| AnnoClient { inner })
    }
}

impl AnnoClient<WsConnector> {
    /// Client over the WebSocket transport with HTTP username lookups.
    pub fn new(config: ClientConfig) -> Self {
        ClientBuilder::new(config).build()
    }
}

impl<C: Connector> AnnoClient<C> {
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.inner.connection
    }

    pub fn document(&self, cas_id: &str) -> Option<DocumentHandle> {
        self.inner.store.get(cas_id)
    }

    /// User name from configuration, used to derive the user's view.
    pub fn user_name(&self) -> Option<&str> {
        self.inner.config.user.user_name.as_deref()
    }

    pub fn subscribe(
        &self,
        message_type: &str,
        group: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.registry.subscribe(message_type, group, callback)
    }

    pub fn set_session(&self, token: impl Into<String>) {
        let token = token.into();
        self.inner.connection.set_session(token.clone());
        *self.inner.session.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub async fn connect(&self) -> Result<Connection<C>, ConnectionError> {
        self.inner.connection.connect().await
    }

    pub async fn ready(&self) {
        self.inner.connection.ready().await;
    }

    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.connection.watch_status()
    }

    /// Send `request` once a session is ready (see [`ConnectionManager::submit`]).
    pub fn submit(&self, request: ClientRequest) -> SendReceipt {
        self.inner.connection.submit(&request)
    }

    pub fn downgrade(&self) -> WeakAnnoClient<C> {
        WeakAnnoClient { inner: Arc::downgrade(&self.inner) }
    }
}

/// Assembles an [`AnnoClient`], with the transport and username service
/// replaceable for tests.
pub struct ClientBuilder<C: Connector = WsConnector> {
    config: ClientConfig,
    connector: C,
    resolver: Option<Arc<dyn UsernameResolver>>,
    notifier: Option<Notifier>,
}

impl ClientBuilder<WsConnector> {
    pub fn new(config: ClientConfig) -> Self {
        Self { config, connector: WsConnector, resolver: None, notifier: None }
    }
}

impl<C: Connector> ClientBuilder<C> {
    pub fn connector<D: Connector>(self, connector: D) -> ClientBuilder<D> {
        ClientBuilder {
            config: self.config,
            connector,
            resolver: self.resolver,
            notifier: self.notifier,
        }
    }

    pub fn resolver(mut self, resolver: impl UsernameResolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> AnnoClient<C> {
        let config = self.config;
        let store = DocumentStore::new();
        let registry = ListenerRegistry::new();
        let notifier = self.notifier.unwrap_or_default();
        let session = Arc::new(RwLock::new(config.user.session.clone()));
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(HttpUsernameResolver::new()));

        let reconciler = Reconciler {
            store: store.clone(),
            registry: registry.clone(),
            notifier: notifier.clone(),
            resolver,
            session: session.clone(),
            export: ExportSink::new(config.export_dir()),
            perspective: config.perspective.clone(),
            private_session: config.private_session,
        };
        let connection = ConnectionManager::new(
            self.connector,
            ConnectionSettings {
                url: config.service_url.clone(),
                heartbeat_interval: config.heartbeat_interval(),
            },
            registry.clone(),
            notifier.clone(),
            Arc::new(reconciler),
        );
        if let Some(token) = &config.user.session {
            connection.set_session(token.clone());
        }

        AnnoClient {
            inner: Arc::new(ClientInner { config, store, registry, notifier, connection, session }),
        }
    }
}
