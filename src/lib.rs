pub mod client;
pub mod config;
pub mod contacts;
pub mod cookies;
pub mod error;
pub mod event_bus;
pub mod http;
pub mod login;
pub mod protocol;
pub mod qrcode;
pub mod schedule;
pub mod send;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use client::{Client, ClientBuilder, ClientContext};
pub use config::ClientConfig;
pub use contacts::{ContactDirectory, ContactHook, NoContacts};
pub use error::{CacheError, ClientError};
pub use event_bus::{EventBus, EventHandler};
pub use qrcode::{DefaultUuidProcessor, UuidProcessor};
pub use session::{Session, SessionManager};
pub use sync::SyncEngine;
pub use types::{Event, EventPayload, InboundMessage, LoginStatus, MessageKind, SessionState};
