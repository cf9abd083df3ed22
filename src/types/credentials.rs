use rand::Rng;
use serde::{Deserialize, Serialize};

/// Authentication material for one session. Written by the session
/// manager only; everyone else reads snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub device_id: String,
    pub session_id: String,
    pub session_key: String,
    pub pass_ticket: String,
    pub user_id: i64,
    /// Result code of the login that produced these credentials; 0 means valid.
    pub ret_code: i64,
    pub ret_message: String,
}

impl Credentials {
    pub fn with_device_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            // Nothing has been validated yet.
            ret_code: 1,
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.ret_code == 0
    }

    /// Enough material to attempt a resumed session.
    pub fn is_resumable(&self) -> bool {
        !self.session_id.is_empty() && self.user_id != 0
    }

    pub fn base_request(&self) -> BaseRequest {
        BaseRequest {
            uin: self.user_id,
            sid: self.session_id.clone(),
            skey: self.session_key.clone(),
            device_id: self.device_id.clone(),
        }
    }

    /// Rebuilds credentials from the cached base request and pass ticket.
    pub fn from_cached(base: &BaseRequest, pass_ticket: &str) -> Self {
        Self {
            device_id: base.device_id.clone(),
            session_id: base.sid.clone(),
            session_key: base.skey.clone(),
            pass_ticket: pass_ticket.to_string(),
            user_id: base.uin,
            ret_code: 0,
            ret_message: String::new(),
        }
    }
}

/// The `BaseRequest` object carried by every JSON call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRequest {
    #[serde(rename = "Uin")]
    pub uin: i64,
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Skey")]
    pub skey: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
}

/// Device identifiers are `e` followed by 15 random digits.
pub fn generate_device_id() -> String {
    let mut rng = rand::rng();
    let digits: String = (0..15)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect();
    format!("e{digits}")
}
