use crate::error::Result;
use crate::protocol::{self, BaseResponse};
use crate::session::Session;
use crate::store::SessionStore;
use crate::transport::Transport;
use crate::types::Contact;
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;

/// Contact management the session and sync layers call into.
#[async_trait]
pub trait ContactHook: Send + Sync {
    /// Fetches the full contact list. Runs once each time a session
    /// becomes ready.
    async fn refresh(&self, session: &Session) -> Result<()>;

    /// Applies contacts reported as modified or deleted by a sync round.
    /// Falls back to a full refresh.
    async fn apply_change(&self, session: &Session, modified: &[Contact], deleted: &[String]) -> Result<()> {
        let _ = (modified, deleted);
        self.refresh(session).await
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ContactPage {
    base_response: BaseResponse,
    member_list: Vec<Contact>,
    seq: i64,
}

/// In-memory contact directory keyed by user name, mirrored to
/// `contact-cache.json`.
pub struct ContactDirectory {
    transport: Transport,
    store: Arc<SessionStore>,
    contacts: DashMap<String, Contact>,
}

impl ContactDirectory {
    pub fn new(transport: Transport, store: Arc<SessionStore>) -> Self {
        Self {
            transport,
            store,
            contacts: DashMap::new(),
        }
    }

    /// Fills the directory from the contact cache, if there is one.
    pub async fn load_cached(&self) -> Result<usize> {
        let cached = self.store.load_contacts().await?;
        let count = cached.len();
        for contact in cached {
            self.contacts.insert(contact.user_name.clone(), contact);
        }
        debug!(target: "Contacts", "Loaded {count} cached contacts");
        Ok(count)
    }

    async fn fetch_all(&self, session: &Session) -> Result<Vec<Contact>> {
        let mut all = Vec::new();
        let mut seq = 0;
        loop {
            let url = protocol::contact_url(&session.base_url, &session.credentials, seq);
            let page: ContactPage = self.transport.get_json(&url).await?;
            page.base_response.check("get contacts")?;
            debug!(target: "Contacts", "Fetched {} contacts (seq {seq} -> {})", page.member_list.len(), page.seq);
            all.extend(page.member_list);
            if page.seq == 0 || page.seq == seq {
                break;
            }
            seq = page.seq;
        }
        Ok(all)
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save_contacts(&self.all()).await {
            warn!(target: "Contacts", "Could not write contact cache: {e}");
        }
    }

    pub fn get(&self, user_name: &str) -> Option<Contact> {
        self.contacts.get(user_name).map(|c| c.value().clone())
    }

    /// Contacts whose remark or nick name equals `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<Contact> {
        let mut found: Vec<Contact> = self
            .contacts
            .iter()
            .filter(|c| c.remark_name == name || c.nick_name == name)
            .map(|c| c.value().clone())
            .collect();
        found.sort_by(|a, b| a.user_name.cmp(&b.user_name));
        found
    }

    pub fn groups(&self) -> Vec<Contact> {
        let mut groups: Vec<Contact> = self
            .contacts
            .iter()
            .filter(|c| c.is_group())
            .map(|c| c.value().clone())
            .collect();
        groups.sort_by(|a, b| a.user_name.cmp(&b.user_name));
        groups
    }

    pub fn all(&self) -> Vec<Contact> {
        let mut all: Vec<Contact> = self.contacts.iter().map(|c| c.value().clone()).collect();
        all.sort_by(|a, b| a.user_name.cmp(&b.user_name));
        all
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[async_trait]
impl ContactHook for ContactDirectory {
    async fn refresh(&self, session: &Session) -> Result<()> {
        let fetched = self.fetch_all(session).await?;
        self.contacts.clear();
        for contact in fetched {
            self.contacts.insert(contact.user_name.clone(), contact);
        }
        info!(target: "Contacts", "Contact list refreshed: {} entries", self.contacts.len());
        self.persist().await;
        Ok(())
    }

    async fn apply_change(&self, _session: &Session, modified: &[Contact], deleted: &[String]) -> Result<()> {
        for contact in modified {
            self.contacts.insert(contact.user_name.clone(), contact.clone());
        }
        for user_name in deleted {
            self.contacts.remove(user_name);
        }
        debug!(target: "Contacts", "Applied {} modified, {} deleted contacts", modified.len(), deleted.len());
        self.persist().await;
        Ok(())
    }
}

/// Hook for clients that do not track contacts.
pub struct NoContacts;

#[async_trait]
impl ContactHook for NoContacts {
    async fn refresh(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    async fn apply_change(&self, _session: &Session, _modified: &[Contact], _deleted: &[String]) -> Result<()> {
        Ok(())
    }
}
