use crate::cookies::CookieRecord;
use crate::error::CacheError;
use crate::types::{BaseRequest, Contact, Credentials};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const COOKIE_CACHE_FILE: &str = "cookie-cache.json";
pub const BASE_INFO_CACHE_FILE: &str = "basic-info-cache.json";
pub const CONTACT_CACHE_FILE: &str = "contact-cache.json";

type Result<T> = std::result::Result<T, CacheError>;

/// On-disk shape of the base-info cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseInfo {
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(rename = "passTicket")]
    pub pass_ticket: String,
    #[serde(rename = "baseRequest")]
    pub base_request: BaseRequest,
}

/// Everything needed to resume a session without a new handshake.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub base_url: String,
    pub credentials: Credentials,
    pub cookies: Vec<CookieRecord>,
}

/// Three independent JSON documents under one storage root.
pub struct SessionStore {
    base_path: PathBuf,
}

impl SessionStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, file: &str) -> PathBuf {
        self.base_path.join(file)
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| CacheError::Corrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;
        fs::write(path, data).await.map_err(CacheError::Io)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Reads both session documents. A missing file is `Missing`; a file
    /// that parses but cannot be used is `Corrupt`.
    pub async fn load(&self) -> Result<PersistedSession> {
        let cookies: Vec<CookieRecord> = self
            .read_json(&self.path_for(COOKIE_CACHE_FILE))
            .await?
            .ok_or(CacheError::Missing)?;
        let info: BaseInfo = self
            .read_json(&self.path_for(BASE_INFO_CACHE_FILE))
            .await?
            .ok_or(CacheError::Missing)?;

        if cookies.is_empty() {
            return Err(CacheError::Corrupt("cookie cache is empty".into()));
        }
        if info.base_url.is_empty() {
            return Err(CacheError::Corrupt("empty base URL".into()));
        }
        let credentials = Credentials::from_cached(&info.base_request, &info.pass_ticket);
        if !credentials.is_resumable() {
            return Err(CacheError::Corrupt("cached credentials are incomplete".into()));
        }
        debug!(target: "Store", "Loaded cached session for {} ({} cookies)", info.base_url, cookies.len());
        Ok(PersistedSession {
            base_url: info.base_url,
            credentials,
            cookies,
        })
    }

    pub async fn save_cookies(&self, cookies: &[CookieRecord]) -> Result<()> {
        debug!(target: "Store", "Writing {} cookies", cookies.len());
        self.write_json(&self.path_for(COOKIE_CACHE_FILE), cookies).await
    }

    pub async fn save_base_info(&self, base_url: &str, credentials: &Credentials) -> Result<()> {
        let info = BaseInfo {
            base_url: base_url.to_string(),
            pass_ticket: credentials.pass_ticket.clone(),
            base_request: credentials.base_request(),
        };
        self.write_json(&self.path_for(BASE_INFO_CACHE_FILE), &info).await
    }

    pub async fn delete_cookies(&self) -> Result<()> {
        info!(target: "Store", "Deleting cookie cache");
        self.remove(&self.path_for(COOKIE_CACHE_FILE)).await
    }

    /// Removes every cached document.
    pub async fn clear(&self) -> Result<()> {
        self.remove(&self.path_for(COOKIE_CACHE_FILE)).await?;
        self.remove(&self.path_for(BASE_INFO_CACHE_FILE)).await?;
        self.remove(&self.path_for(CONTACT_CACHE_FILE)).await
    }

    pub async fn save_contacts(&self, contacts: &[Contact]) -> Result<()> {
        self.write_json(&self.path_for(CONTACT_CACHE_FILE), contacts).await
    }

    pub async fn load_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self
            .read_json(&self.path_for(CONTACT_CACHE_FILE))
            .await?
            .unwrap_or_default())
    }
}
