use crate::client::ClientContext;
use crate::contacts::ContactHook;
use crate::error::{CacheError, ClientError, Result};
use crate::login::{self, InitOutcome};
use crate::protocol::ConfirmStatus;
use crate::qrcode::UuidProcessor;
use crate::sync::SyncEngine;
use crate::types::credentials::generate_device_id;
use crate::types::{Contact, Credentials, Event, LoginStatus, SessionState, SyncCursor};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};

/// One authenticated session: where to talk to, as whom, and how far the
/// inbound stream has been consumed.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub base_url: String,
    pub credentials: Credentials,
    pub cursor: SyncCursor,
    /// The logged-in account as reported by init.
    pub me: Contact,
}

/// The live session, readable by anyone holding the client. Written by the
/// session manager on login and by the sync engine on cursor replacement.
pub type SharedSession = Arc<RwLock<Option<Session>>>;

/// Capped exponential backoff: no wait before the first attempt, then
/// `initial`, doubling per consecutive failure up to `max`.
pub fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    initial.checked_mul(factor).unwrap_or(max).min(max)
}

/// Drives login, restore and re-login. Owns the session state machine.
pub struct SessionManager {
    ctx: ClientContext,
    presenter: Arc<dyn UuidProcessor>,
    contacts: Arc<dyn ContactHook>,
    device_id: String,
    session: SharedSession,
    state: watch::Sender<SessionState>,
    backoff_attempts: AtomicU32,
    /// A challenge is on screen and the presenter has not been told how it ended.
    presenting: AtomicBool,
}

impl SessionManager {
    pub fn new(ctx: ClientContext, presenter: Arc<dyn UuidProcessor>, contacts: Arc<dyn ContactHook>) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            ctx,
            presenter,
            contacts,
            device_id: generate_device_id(),
            session: Arc::new(RwLock::new(None)),
            state,
            backoff_attempts: AtomicU32::new(0),
            presenting: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Consecutive failed attempts since the last successful login.
    pub fn backoff_attempts(&self) -> u32 {
        self.backoff_attempts.load(Ordering::SeqCst)
    }

    pub fn shared_session(&self) -> SharedSession {
        self.session.clone()
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    fn set_state(&self, state: SessionState) {
        debug!(target: "Session", "State -> {state}");
        self.state.send_replace(state);
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.ctx.config.backoff_initial, self.ctx.config.backoff_max, attempt)
    }

    /// Brings up a session: resumes the cached one if the backend still
    /// accepts it, otherwise runs the interactive handshake. Publishes one
    /// success login event when the session is ready.
    pub async fn begin(&self) -> Result<()> {
        self.ctx.transport.cookies().clear();
        *self.session.write().await = None;

        match self.restore().await {
            Ok(()) => {
                info!(target: "Session", "Resumed cached session");
                self.mark_ready().await;
                Ok(())
            }
            Err(e) => {
                debug!(target: "Session", "No usable cached session ({e}), starting handshake");
                self.interactive().await
            }
        }
    }

    async fn restore(&self) -> Result<()> {
        let cached = match self.ctx.store.load().await {
            Ok(cached) => cached,
            Err(CacheError::Missing) => return Err(CacheError::Missing.into()),
            Err(e) => {
                warn!(target: "Session", "Discarding unreadable session cache: {e}");
                self.discard_cookies().await;
                return Err(e.into());
            }
        };

        self.set_state(SessionState::Authenticating);
        self.ctx.transport.cookies().restore(cached.cookies);
        let mut credentials = cached.credentials;
        if credentials.device_id.is_empty() {
            credentials.device_id = self.device_id.clone();
        }

        match login::init(&self.ctx, &cached.base_url, &mut credentials).await {
            Ok(outcome) => {
                self.install(cached.base_url, credentials, outcome).await;
                Ok(())
            }
            Err(e) => {
                warn!(target: "Session", "Cached session rejected: {e}");
                self.discard_cookies().await;
                Err(e)
            }
        }
    }

    async fn discard_cookies(&self) {
        if let Err(e) = self.ctx.store.delete_cookies().await {
            warn!(target: "Session", "Could not delete cookie cache: {e}");
        }
        self.ctx.transport.cookies().clear();
    }

    async fn interactive(&self) -> Result<()> {
        self.set_state(SessionState::HandshakeStarted);
        let uuid = login::fetch_uuid(&self.ctx).await?;

        self.set_state(SessionState::AwaitingScan);
        info!(target: "Session/Login", "Waiting for challenge {uuid} to be scanned");
        self.presenter
            .process_uuid(&uuid, &self.ctx.config.storage_dir)
            .await
            .map_err(|e| match e {
                ClientError::Presenter(_) => e,
                other => ClientError::Presenter(other.to_string()),
            })?;
        self.presenting.store(true, Ordering::SeqCst);

        match self.complete_handshake(&uuid).await {
            Ok(()) => {
                self.mark_ready().await;
                self.presenting.store(false, Ordering::SeqCst);
                self.presenter.uuid_did_confirm(None).await;
                Ok(())
            }
            Err(e) => {
                self.presenting.store(false, Ordering::SeqCst);
                self.presenter.uuid_did_confirm(Some(&e)).await;
                Err(e)
            }
        }
    }

    async fn complete_handshake(&self, uuid: &str) -> Result<()> {
        let redirect = login::wait_confirm(&self.ctx, uuid, self.ctx.config.confirm_poll_limit, |status| {
            let already_scanned = self.state.borrow().clone() == SessionState::Scanned;
            match status {
                ConfirmStatus::Scanned if !already_scanned => {
                    info!(target: "Session/Login", "Challenge scanned, waiting for confirmation");
                    self.set_state(SessionState::Scanned);
                }
                ConfirmStatus::Confirmed { .. } => {
                    info!(target: "Session/Login", "Login confirmed");
                    self.set_state(SessionState::Confirmed);
                }
                _ => {}
            }
        })
        .await?;

        self.set_state(SessionState::Authenticating);
        let (base_url, mut credentials) = login::redirect_login(&self.ctx, &redirect, &self.device_id).await?;
        self.persist(&base_url, &credentials).await;

        let outcome = login::init(&self.ctx, &base_url, &mut credentials).await?;
        self.install(base_url, credentials, outcome).await;
        Ok(())
    }

    /// Stores the initialized session and writes it to the cache.
    async fn install(&self, base_url: String, credentials: Credentials, outcome: InitOutcome) {
        self.persist(&base_url, &credentials).await;
        *self.session.write().await = Some(Session {
            base_url,
            credentials,
            cursor: outcome.cursor,
            me: outcome.me,
        });
        self.set_state(SessionState::Initialized);
    }

    async fn persist(&self, base_url: &str, credentials: &Credentials) {
        let cookies = self.ctx.transport.cookies().snapshot();
        if let Err(e) = self.ctx.store.save_cookies(&cookies).await {
            warn!(target: "Session", "Could not write cookie cache: {e}");
        }
        if let Err(e) = self.ctx.store.save_base_info(base_url, credentials).await {
            warn!(target: "Session", "Could not write base-info cache: {e}");
        }
    }

    async fn mark_ready(&self) {
        self.set_state(SessionState::Ready);
        info!(target: "Session", "Session ready");
        self.publish(LoginStatus::Success).await;
    }

    async fn publish(&self, status: LoginStatus) {
        if let Err(e) = self.ctx.bus.publish(Event::login(status)).await {
            debug!(target: "Session", "Login event not delivered: {e}");
        }
    }

    async fn fail(&self, err: &ClientError) {
        self.set_state(SessionState::Failed(err.to_string()));
        self.publish(LoginStatus::Failure {
            reason: err.to_string(),
        })
        .await;
    }

    /// Keeps a session alive until `shutdown` turns true. Every failure,
    /// including the sync engine stopping, publishes a failure event and
    /// starts over after a backoff. Returns an error only when the
    /// presenter cannot show a challenge.
    pub async fn supervise(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(target: "Session", "Session supervisor started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let attempt = self.backoff_attempts();
            let delay = self.next_delay(attempt);
            if !delay.is_zero() {
                info!(target: "Session", "Retrying login in {delay:?} (attempt {attempt})");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let begun = tokio::select! {
                _ = shutdown.changed() => {
                    if self.presenting.swap(false, Ordering::SeqCst) {
                        self.presenter.uuid_did_confirm(Some(&ClientError::Shutdown)).await;
                    }
                    break;
                }
                result = self.begin() => result,
            };

            let failure = match begun {
                Err(e) if e.is_fatal() => {
                    error!(target: "Session", "Giving up: {e}");
                    self.fail(&e).await;
                    return Err(e);
                }
                Err(e) => e,
                Ok(()) => {
                    self.backoff_attempts.store(0, Ordering::SeqCst);
                    match self.run_ready(&shutdown).await {
                        Ok(()) => break,
                        Err(e) => e,
                    }
                }
            };

            error!(target: "Session", "Session attempt failed: {failure}");
            self.fail(&failure).await;
            self.backoff_attempts.fetch_add(1, Ordering::SeqCst);
        }
        info!(target: "Session", "Session supervisor stopped");
        Ok(())
    }

    /// Post-login work: contact refresh, then the sync loop until it stops.
    async fn run_ready(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let session = self
            .session()
            .await
            .ok_or_else(|| ClientError::Decode("session vanished after login".into()))?;

        if let Err(e) = self.contacts.refresh(&session).await {
            warn!(target: "Session", "Contact refresh failed: {e}");
        }

        let mut engine = SyncEngine::new(
            self.ctx.clone(),
            session,
            self.session.clone(),
            self.contacts.clone(),
        );
        engine.run(shutdown.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::NoContacts;
    use crate::test_utils::{MockHttpClient, RecordingPresenter, context_with, fixtures};
    use std::sync::Mutex;

    fn manager(ctx: &ClientContext, presenter: &Arc<RecordingPresenter>) -> SessionManager {
        SessionManager::new(ctx.clone(), presenter.clone(), Arc::new(NoContacts))
    }

    fn script_login(mock: &MockHttpClient, waits: usize) {
        mock.respond("jslogin", fixtures::challenge("abc123"));
        for _ in 0..waits {
            mock.respond("mmwebwx-bin/login", fixtures::confirm("408"));
        }
        mock.respond("mmwebwx-bin/login", fixtures::confirmed(fixtures::REDIRECT));
        mock.respond("webwxnewloginpage", fixtures::login_xml(0));
        mock.respond("webwxinit", fixtures::init(0));
    }

    fn login_log(ctx: &ClientContext) -> Arc<Mutex<Vec<LoginStatus>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        ctx.bus.subscribe(crate::types::events::LOGIN_PATH, move |event: &Event| {
            if let Some(status) = event.as_login() {
                sink.lock().unwrap().push(status.clone());
            }
            Ok(())
        });
        log
    }

    #[test]
    fn backoff_is_capped_exponential() {
        let (initial, max) = (Duration::from_secs(5), Duration::from_secs(300));
        assert_eq!(backoff_delay(initial, max, 0), Duration::ZERO);
        assert_eq!(backoff_delay(initial, max, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(initial, max, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(initial, max, 4), Duration::from_secs(40));
        assert_eq!(backoff_delay(initial, max, 7), Duration::from_secs(300));
        assert_eq!(backoff_delay(initial, max, 60), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn handshake_presents_token_and_follows_redirect() {
        let mock = Arc::new(MockHttpClient::new());
        script_login(&mock, 3);
        let (ctx, _dir) = context_with(mock.clone()).await;
        let presenter = Arc::new(RecordingPresenter::default());
        let logins = login_log(&ctx);
        let manager = manager(&ctx, &presenter);

        manager.begin().await.unwrap();
        ctx.bus.flush().await.unwrap();

        assert_eq!(presenter.presented(), vec!["abc123".to_string()]);
        assert_eq!(presenter.confirmations(), vec![None]);
        assert_eq!(manager.state(), SessionState::Ready);
        assert_eq!(*logins.lock().unwrap(), vec![LoginStatus::Success]);

        let redirects: Vec<String> = mock
            .requests()
            .into_iter()
            .filter(|r| r.url.contains("webwxnewloginpage"))
            .map(|r| r.url)
            .collect();
        assert_eq!(redirects, vec![format!("{}&fun=new", fixtures::REDIRECT)]);

        let session = manager.session().await.unwrap();
        assert_eq!(session.base_url, fixtures::BASE_URL);
        assert_eq!(session.credentials.session_key, "@crypt_k2");
        assert_eq!(session.me.user_name, "@me");
        assert_eq!(session.credentials.device_id.len(), 16);
    }

    #[tokio::test]
    async fn unconfirmed_challenge_never_reaches_ready() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond("jslogin", fixtures::challenge("abc123"));
        mock.respond_always("mmwebwx-bin/login", fixtures::confirm("408"));
        let (ctx, _dir) = context_with(mock.clone()).await;
        let presenter = Arc::new(RecordingPresenter::default());
        let logins = login_log(&ctx);
        let manager = manager(&ctx, &presenter);

        let err = manager.begin().await.unwrap_err();
        ctx.bus.flush().await.unwrap();

        assert!(matches!(err, ClientError::Protocol { code: 408, .. }));
        assert_ne!(manager.state(), SessionState::Ready);
        assert!(manager.session().await.is_none());
        assert_eq!(mock.count("mmwebwx-bin/login"), 30);
        assert_eq!(mock.count("webwxnewloginpage"), 0);
        assert_eq!(mock.count("synccheck"), 0);
        assert!(logins.lock().unwrap().is_empty());
        assert_eq!(presenter.confirmations().len(), 1);
        assert!(presenter.confirmations()[0].is_some());
    }

    #[tokio::test]
    async fn cached_session_resumes_without_handshake() {
        let mock = Arc::new(MockHttpClient::new());
        script_login(&mock, 0);
        let (ctx, _dir) = context_with(mock.clone()).await;
        let presenter = Arc::new(RecordingPresenter::default());
        manager(&ctx, &presenter).begin().await.unwrap();

        let resumed_mock = Arc::new(MockHttpClient::new());
        resumed_mock.respond("webwxinit", fixtures::init(0));
        let resumed_ctx = ClientContext::new((*ctx.config).clone(), resumed_mock.clone())
            .await
            .unwrap();
        let resumed_presenter = Arc::new(RecordingPresenter::default());
        let resumed = manager(&resumed_ctx, &resumed_presenter);

        resumed.begin().await.unwrap();
        assert_eq!(resumed.state(), SessionState::Ready);
        assert!(resumed_presenter.presented().is_empty());
        assert_eq!(resumed_mock.count("jslogin"), 0);

        let init = &resumed_mock.requests()[0];
        assert_eq!(init.header("Cookie"), Some("wxsid=sid1; wxuin=1001"));
        let session = resumed.session().await.unwrap();
        assert_eq!(session.credentials.session_id, "sid1");
        assert_eq!(session.cursor.to_string(), "1_100|2_200");
    }

    #[tokio::test]
    async fn rejected_cache_falls_back_to_handshake() {
        let mock = Arc::new(MockHttpClient::new());
        script_login(&mock, 0);
        let (ctx, dir) = context_with(mock.clone()).await;
        let presenter = Arc::new(RecordingPresenter::default());
        manager(&ctx, &presenter).begin().await.unwrap();

        let second = Arc::new(MockHttpClient::new());
        second.respond("webwxinit", fixtures::init(1101));
        script_login(&second, 0);
        let second_ctx = ClientContext::new((*ctx.config).clone(), second.clone())
            .await
            .unwrap();
        let second_presenter = Arc::new(RecordingPresenter::default());
        let fallback = manager(&second_ctx, &second_presenter);

        fallback.begin().await.unwrap();
        assert_eq!(second_presenter.presented(), vec!["abc123".to_string()]);
        assert_eq!(second.count("webwxinit"), 2);
        // The rejected cookies were dropped before the handshake started.
        assert_eq!(second.requests()[1].header("Cookie"), None);
        assert!(dir.path().join(crate::store::COOKIE_CACHE_FILE).exists());
    }

    #[tokio::test]
    async fn supervisor_retries_then_restarts_after_sync_failure() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_error("jslogin", "connection reset");
        script_login(&mock, 1);
        mock.respond("synccheck", fixtures::sync_check("1101", "0"));
        mock.respond_always("webwxinit", fixtures::init(0));
        mock.respond_always_after(
            "synccheck",
            Duration::from_millis(20),
            fixtures::sync_check("0", "0"),
        );
        let (ctx, _dir) = context_with(mock.clone()).await;
        let presenter = Arc::new(RecordingPresenter::default());
        let logins = login_log(&ctx);
        let manager = Arc::new(manager(&ctx, &presenter));

        let (stop, stop_rx) = watch::channel(false);
        let supervisor = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.supervise(stop_rx).await })
        };

        let wait = async {
            loop {
                ctx.bus.flush().await.unwrap();
                if logins.lock().unwrap().len() >= 4 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait).await.unwrap();

        let seen = logins.lock().unwrap().clone();
        assert!(matches!(seen[0], LoginStatus::Failure { .. }));
        assert_eq!(seen[1], LoginStatus::Success);
        assert!(matches!(seen[2], LoginStatus::Failure { .. }));
        assert_eq!(seen[3], LoginStatus::Success);
        assert_eq!(manager.backoff_attempts(), 0);
        // The restart resumed the cached session instead of presenting again.
        assert_eq!(presenter.presented().len(), 1);

        stop.send(true).unwrap();
        supervisor.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_mid_handshake_tells_the_presenter() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond("jslogin", fixtures::challenge("abc123"));
        mock.respond_always_after(
            "mmwebwx-bin/login",
            Duration::from_secs(30),
            fixtures::confirm("408"),
        );
        let (ctx, _dir) = context_with(mock.clone()).await;
        let presenter = Arc::new(RecordingPresenter::default());
        let manager = Arc::new(manager(&ctx, &presenter));

        let (stop, stop_rx) = watch::channel(false);
        let supervisor = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.supervise(stop_rx).await })
        };
        tokio::time::timeout(Duration::from_secs(2), async {
            while mock.count("mmwebwx-bin/login") == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), supervisor)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            presenter.confirmations(),
            vec![Some(ClientError::Shutdown.to_string())]
        );
    }

    #[tokio::test]
    async fn presenter_failure_stops_the_supervisor() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond("jslogin", fixtures::challenge("abc123"));
        let (ctx, _dir) = context_with(mock.clone()).await;
        let presenter = Arc::new(RecordingPresenter::failing("no display"));
        let logins = login_log(&ctx);
        let manager = manager(&ctx, &presenter);

        let (_stop, stop_rx) = watch::channel(false);
        let err = manager.supervise(stop_rx).await.unwrap_err();
        ctx.bus.flush().await.unwrap();

        assert!(err.is_fatal());
        assert!(manager.state().is_failed());
        assert_eq!(logins.lock().unwrap().len(), 1);
        assert_eq!(mock.count("mmwebwx-bin/login"), 0);
    }
}
