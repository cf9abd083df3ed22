use crate::client::ClientContext;
use crate::contacts::ContactHook;
use crate::error::{ClientError, Result};
use crate::protocol::{self, BaseResponse, SyncCheck};
use crate::session::{Session, SharedSession};
use crate::types::{BaseRequest, Contact, ContactChange, Event, InboundMessage, RawMessage, SyncCursor};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Serialize)]
struct SyncRequest {
    #[serde(rename = "BaseRequest")]
    base_request: BaseRequest,
    #[serde(rename = "SyncKey")]
    sync_key: SyncCursor,
    rr: i64,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SyncResponse {
    base_response: BaseResponse,
    add_msg_list: Vec<RawMessage>,
    mod_contact_list: Vec<Contact>,
    del_contact_list: Vec<Contact>,
    sync_key: SyncCursor,
}

/// Long-polls the backend for one session and turns what it hands out into
/// events. Runs until shutdown or the first unrecoverable error.
pub struct SyncEngine {
    ctx: ClientContext,
    session: Session,
    shared: SharedSession,
    contacts: Arc<dyn ContactHook>,
    hosts: Vec<String>,
    host_index: usize,
    host_failures: u32,
    cookie_generation: u64,
}

impl SyncEngine {
    pub fn new(ctx: ClientContext, session: Session, shared: SharedSession, contacts: Arc<dyn ContactHook>) -> Self {
        let hosts = if ctx.config.sync_hosts.is_empty() {
            protocol::sync_hosts_for(&session.base_url)
        } else {
            ctx.config.sync_hosts.clone()
        };
        let cookie_generation = ctx.transport.cookies().generation();
        Self {
            ctx,
            session,
            shared,
            contacts,
            hosts,
            host_index: 0,
            host_failures: 0,
            cookie_generation,
        }
    }

    pub fn cursor(&self) -> &SyncCursor {
        &self.session.cursor
    }

    pub fn current_host(&self) -> Option<&str> {
        self.hosts.get(self.host_index).map(String::as_str)
    }

    /// Polls until `shutdown` turns true (`Ok`) or something goes wrong that
    /// only a fresh session can fix (`Err`).
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(ClientError::Transport(format!(
                "no sync host for {}",
                self.session.base_url
            )));
        }
        info!(target: "Sync", "Sync started on {}", self.hosts[self.host_index]);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let host = self.hosts[self.host_index].clone();
            let checked = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.check(&host) => result,
            };

            match checked {
                Ok(check) => {
                    self.host_failures = 0;
                    self.handle(check).await?;
                }
                Err(e) if e.is_transport() => self.host_failed(&host, e)?,
                Err(e) => return Err(e),
            }

            let pause = self.ctx.config.sync_min_interval;
            if !pause.is_zero() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        info!(target: "Sync", "Sync stopped");
        Ok(())
    }

    async fn check(&self, host: &str) -> Result<SyncCheck> {
        let url = protocol::sync_check_url(host, &self.session.credentials, &self.session.cursor);
        let body = self
            .ctx
            .transport
            .get_text(&url, self.ctx.config.sync_check_timeout)
            .await?;
        protocol::parse_sync_check(&body)
    }

    fn host_failed(&mut self, host: &str, err: ClientError) -> Result<()> {
        self.host_failures += 1;
        let threshold = self.ctx.config.host_failure_threshold.max(1);
        warn!(
            target: "Sync",
            "Sync check on {host} failed ({}/{threshold}): {err}",
            self.host_failures
        );
        if self.host_failures < threshold {
            return Ok(());
        }

        self.host_failures = 0;
        self.host_index += 1;
        match self.hosts.get(self.host_index) {
            Some(next) => {
                warn!(target: "Sync", "Switching sync host {host} -> {next}");
                Ok(())
            }
            None => Err(ClientError::Transport(format!(
                "all {} sync hosts failed, last error: {err}",
                self.hosts.len()
            ))),
        }
    }

    async fn handle(&mut self, check: SyncCheck) -> Result<()> {
        if check.retcode != 0 {
            // 1100, 1101 and 1102 mean the session ended on another device.
            return Err(ClientError::protocol(
                check.retcode,
                "sync check rejected the session",
            ));
        }
        if check.selector.is_idle() {
            return Ok(());
        }
        debug!(target: "Sync", "Selector {:?}", check.selector);

        let response = self.fetch().await?;
        self.replace_cursor(response.sync_key).await;
        self.persist_cookies().await;

        let self_id = self.session.me.user_name.clone();
        for raw in response.add_msg_list {
            let message = InboundMessage::from_raw(raw, &self_id);
            debug!(
                target: "Sync",
                "Message {} from {} ({:?})",
                message.message_id,
                message.from_id,
                message.kind
            );
            self.ctx.bus.publish(Event::message(message)).await?;
        }

        let deleted: Vec<String> = response
            .del_contact_list
            .into_iter()
            .map(|c| c.user_name)
            .collect();
        let modified = response.mod_contact_list;
        if check.selector.has_contact_change() || !modified.is_empty() || !deleted.is_empty() {
            let hooked = if modified.is_empty() && deleted.is_empty() {
                self.contacts.refresh(&self.session).await
            } else {
                self.contacts
                    .apply_change(&self.session, &modified, &deleted)
                    .await
            };
            if let Err(e) = hooked {
                warn!(target: "Sync", "Contact update failed: {e}");
            }
            let change = ContactChange {
                modified: modified.into_iter().map(|c| c.user_name).collect(),
                deleted,
            };
            self.ctx.bus.publish(Event::contact_change(change)).await?;
        }
        Ok(())
    }

    async fn fetch(&self) -> Result<SyncResponse> {
        let url = protocol::sync_url(&self.session.base_url, &self.session.credentials);
        let request = SyncRequest {
            base_request: self.session.credentials.base_request(),
            sync_key: self.session.cursor.clone(),
            rr: !protocol::unix_now(),
        };
        let response: SyncResponse = self.ctx.transport.post_json(&url, &request).await?;
        response.base_response.check("sync")?;
        Ok(response)
    }

    async fn replace_cursor(&mut self, cursor: SyncCursor) {
        debug!(target: "Sync", "Cursor {} -> {cursor}", self.session.cursor);
        self.session.cursor = cursor;
        if let Some(live) = self.shared.write().await.as_mut() {
            live.cursor = self.session.cursor.clone();
        }
    }

    async fn persist_cookies(&mut self) {
        let jar = self.ctx.transport.cookies();
        let generation = jar.generation();
        if generation == self.cookie_generation {
            return;
        }
        self.cookie_generation = generation;
        if let Err(e) = self.ctx.store.save_cookies(&jar.snapshot()).await {
            warn!(target: "Sync", "Could not write cookie cache: {e}");
        }
    }
}
