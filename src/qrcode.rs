use crate::error::ClientError;
use crate::protocol;
use crate::transport::Transport;
use async_trait::async_trait;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const QRCODE_FILE: &str = "qrcode.png";

/// Shows the login challenge to a human and hears how it ended.
#[async_trait]
pub trait UuidProcessor: Send + Sync {
    /// Presents the challenge token. An error here is fatal: the client
    /// stops instead of retrying.
    async fn process_uuid(&self, uuid: &str, storage_dir: &Path) -> Result<(), ClientError>;

    /// Called once per presented challenge: `None` when the session became
    /// ready, the error otherwise.
    async fn uuid_did_confirm(&self, error: Option<&ClientError>);
}

/// Downloads the QR image for the challenge into the storage root and logs
/// where it is. The file is removed once the outcome is known.
pub struct DefaultUuidProcessor {
    transport: Transport,
    login_host: String,
    written: Mutex<Option<PathBuf>>,
}

impl DefaultUuidProcessor {
    pub fn new(transport: Transport, login_host: impl Into<String>) -> Self {
        Self {
            transport,
            login_host: login_host.into(),
            written: Mutex::new(None),
        }
    }

    fn take_written(&self) -> Option<PathBuf> {
        match self.written.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl UuidProcessor for DefaultUuidProcessor {
    async fn process_uuid(&self, uuid: &str, storage_dir: &Path) -> Result<(), ClientError> {
        let url = protocol::qrcode_url(&self.login_host, uuid);
        let response = self
            .transport
            .post_form(&url, &[("t", "webwx".to_string())])
            .await
            .map_err(|e| ClientError::Presenter(format!("could not fetch QR image: {e}")))?;
        if response.body.is_empty() {
            return Err(ClientError::Presenter("empty QR image".into()));
        }

        let path = storage_dir.join(QRCODE_FILE);
        tokio::fs::write(&path, &response.body)
            .await
            .map_err(|e| ClientError::Presenter(format!("could not write {}: {e}", path.display())))?;
        info!(target: "Session/Login", "Scan the QR code at {} to log in", path.display());

        match self.written.lock() {
            Ok(mut guard) => *guard = Some(path),
            Err(poisoned) => *poisoned.into_inner() = Some(path),
        }
        Ok(())
    }

    async fn uuid_did_confirm(&self, error: Option<&ClientError>) {
        if let Some(err) = error {
            warn!(target: "Session/Login", "Login attempt failed after presenting QR code: {err}");
        }
        if let Some(path) = self.take_written() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(target: "Session/Login", "Could not remove {}: {e}", path.display());
            }
        }
    }
}
