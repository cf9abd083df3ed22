use crate::config::ClientConfig;
use crate::contacts::{ContactDirectory, ContactHook};
use crate::error::{ClientError, Result};
use crate::event_bus::{EventBus, EventHandler};
use crate::http::{HttpClient, UreqHttpClient};
use crate::qrcode::{DefaultUuidProcessor, UuidProcessor};
use crate::send;
use crate::session::SessionManager;
use crate::store::SessionStore;
use crate::transport::Transport;
use crate::types::{Contact, Event, SessionState};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What every component is built from. Cloning is cheap; all clones share
/// the same transport, cookie jar, store and bus.
#[derive(Clone)]
pub struct ClientContext {
    pub config: Arc<ClientConfig>,
    pub transport: Transport,
    pub store: Arc<SessionStore>,
    pub bus: EventBus,
}

impl ClientContext {
    /// Creates the storage root and starts the event bus. Must be called
    /// from within a tokio runtime.
    pub async fn new(config: ClientConfig, http: Arc<dyn HttpClient>) -> Result<Self> {
        let transport = Transport::new(http, config.user_agent.clone(), config.request_timeout);
        let store = Arc::new(SessionStore::new(config.storage_dir.clone()).await?);
        let bus = EventBus::new(config.event_queue_capacity);
        Ok(Self {
            config: Arc::new(config),
            transport,
            store,
            bus,
        })
    }
}

type Subscription = (String, Arc<dyn EventHandler>);

pub struct ClientBuilder {
    config: ClientConfig,
    http: Option<Arc<dyn HttpClient>>,
    presenter: Option<Arc<dyn UuidProcessor>>,
    contact_hook: Option<Arc<dyn ContactHook>>,
    subscriptions: Vec<Subscription>,
}

impl ClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: None,
            presenter: None,
            contact_hook: None,
            subscriptions: Vec::new(),
        }
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Replaces the default presenter, which writes `qrcode.png` into the
    /// storage directory.
    pub fn with_presenter(mut self, presenter: Arc<dyn UuidProcessor>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Replaces the built-in [`ContactDirectory`].
    pub fn with_contact_hook(mut self, hook: Arc<dyn ContactHook>) -> Self {
        self.contact_hook = Some(hook);
        self
    }

    /// Subscribes `handler` to `path` before anything is published.
    pub fn on<F>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscriptions.push((path.into(), Arc::new(handler)));
        self
    }

    pub async fn build(self) -> Result<Client> {
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(UreqHttpClient::new(self.config.request_timeout)) as Arc<dyn HttpClient>);
        let ctx = ClientContext::new(self.config, http).await?;

        for (path, handler) in self.subscriptions {
            ctx.bus.subscribe_handler(path, handler);
        }

        let presenter = self.presenter.unwrap_or_else(|| {
            Arc::new(DefaultUuidProcessor::new(
                ctx.transport.clone(),
                ctx.config.login_host.clone(),
            )) as Arc<dyn UuidProcessor>
        });

        let (contact_hook, directory) = match self.contact_hook {
            Some(hook) => (hook, None),
            None => {
                let directory = Arc::new(ContactDirectory::new(ctx.transport.clone(), ctx.store.clone()));
                if let Err(e) = directory.load_cached().await {
                    warn!(target: "Contacts", "Ignoring unreadable contact cache: {e}");
                }
                (directory.clone() as Arc<dyn ContactHook>, Some(directory))
            }
        };

        let manager = Arc::new(SessionManager::new(ctx.clone(), presenter, contact_hook));
        let (shutdown, _) = watch::channel(false);
        Ok(Client {
            ctx,
            manager,
            contacts: directory,
            shutdown,
        })
    }
}

/// A web messaging client: one supervised session, its sync loop, and the
/// event bus applications subscribe to.
pub struct Client {
    ctx: ClientContext,
    manager: Arc<SessionManager>,
    contacts: Option<Arc<ContactDirectory>>,
    shutdown: watch::Sender<bool>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Starts the supervised session. The task ends with `Ok` after
    /// [`Client::shutdown`] and with an error only if the presenter fails.
    pub fn run(&self) -> JoinHandle<Result<()>> {
        let manager = self.manager.clone();
        let shutdown = self.shutdown.subscribe();
        info!(target: "Session", "Starting client, storage at {}", self.ctx.config.storage_dir.display());
        tokio::spawn(async move { manager.supervise(shutdown).await })
    }

    /// Stops the supervisor, the sync loop, every timer and the dispatcher.
    pub fn shutdown(&self) {
        info!(target: "Session", "Shutting down client");
        self.shutdown.send_replace(true);
        self.ctx.bus.close();
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn subscribe<F>(&self, path: impl Into<String>, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ctx.bus.subscribe(path, handler);
    }

    pub async fn publish(&self, event: Event) -> Result<()> {
        self.ctx.bus.publish(event).await
    }

    pub fn add_timer(&self, interval: Duration) -> JoinHandle<()> {
        self.ctx.bus.add_recurring_timer(interval)
    }

    pub fn add_daily_timing(&self, time_of_day: &str) -> Result<JoinHandle<()>> {
        self.ctx.bus.add_daily_timing(time_of_day)
    }

    pub fn state(&self) -> SessionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.manager.watch_state()
    }

    pub fn backoff_attempts(&self) -> u32 {
        self.manager.backoff_attempts()
    }

    /// The logged-in account, once a session is up.
    pub async fn me(&self) -> Option<Contact> {
        self.manager.session().await.map(|s| s.me)
    }

    /// The built-in contact directory, unless a custom hook replaced it.
    pub fn contacts(&self) -> Option<Arc<ContactDirectory>> {
        self.contacts.clone()
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        let session = self.manager.session().await.ok_or(ClientError::NotLoggedIn)?;
        send::send_text(&self.ctx.transport, &session, to, text).await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.ctx.bus.is_closed() {
            self.shutdown();
        }
    }
}
