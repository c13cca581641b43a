// annolab-client: connection, document store, protocol and edit queue for the annotation service

pub mod client;
pub mod config;
pub mod connection;
pub mod document;
pub mod export;
pub mod flows;
pub mod listeners;
pub mod notify;
pub mod protocol;
pub mod queue;
pub mod store;
pub mod username;

pub use client::{AnnoClient, ClientBuilder, WeakAnnoClient};
pub use config::ClientConfig;
pub use connection::{
    Connection, ConnectionError, ConnectionManager, ConnectionStatus, Connector, Frame, SendReceipt,
    TransportEvent, TransportLink, WsConnector,
};
pub use document::Document;
pub use listeners::{ListenerRegistry, Subscription, DEFAULT_GROUP};
pub use notify::{Notification, NotificationLevel, Notifier};
pub use queue::FlushOutcome;
pub use store::{DocumentHandle, DocumentStore};
