//! Wire contracts of the web backend: endpoint URLs and the text, script
//! and XML response formats that are not JSON.

use crate::error::{ClientError, Result};
use crate::types::{Credentials, SyncCursor};
use serde::Deserialize;

pub const CONFIRM_WAITING: &str = "408";
pub const CONFIRM_SCANNED: &str = "201";
pub const CONFIRM_OK: &str = "200";

/// Returns the text between the first `prefix` and the next `suffix`.
pub fn search<'a>(source: &'a str, prefix: &str, suffix: &str) -> Result<&'a str> {
    let start = source
        .find(prefix)
        .ok_or_else(|| ClientError::Decode(format!("can't find [{prefix}] in [{source}]")))?
        + prefix.len();
    let len = source[start..]
        .find(suffix)
        .ok_or_else(|| ClientError::Decode(format!("can't find [{suffix}] in [{source}]")))?;
    Ok(&source[start..start + len])
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn unix_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Extracts the challenge token from the `jslogin` script body.
pub fn parse_challenge(body: &str) -> Result<String> {
    let code = search(body, "window.QRLogin.code = ", ";")?.trim();
    if code != CONFIRM_OK {
        return Err(ClientError::protocol(
            code.parse().unwrap_or(-1),
            format!("challenge request rejected: {body}"),
        ));
    }
    let uuid = search(body, "window.QRLogin.uuid = \"", "\";")?;
    if uuid.is_empty() {
        return Err(ClientError::Decode("empty challenge token".into()));
    }
    Ok(uuid.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmStatus {
    /// The server held the poll and nothing happened yet.
    Waiting,
    /// The code was scanned; the user still has to confirm on the phone.
    Scanned,
    /// Confirmed. Holds the redirect target, ready to be requested.
    Confirmed { redirect_uri: String },
    Rejected { code: String },
}

/// Parses a poll-confirm response (`window.code=...;`).
pub fn parse_confirm(body: &str) -> Result<ConfirmStatus> {
    let code = search(body, "window.code=", ";")?.trim();
    Ok(match code {
        CONFIRM_WAITING => ConfirmStatus::Waiting,
        CONFIRM_SCANNED => ConfirmStatus::Scanned,
        CONFIRM_OK => {
            let redirect = search(body, "window.redirect_uri=\"", "\";")?;
            ConfirmStatus::Confirmed {
                redirect_uri: format!("{redirect}&fun=new"),
            }
        }
        other => ConfirmStatus::Rejected {
            code: other.to_string(),
        },
    })
}

fn xml_field(body: &str, tag: &str) -> Option<String> {
    let raw = search(body, &format!("<{tag}>"), &format!("</{tag}>")).ok()?;
    let value = raw
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
        .unwrap_or(raw);
    Some(value.trim().to_string())
}

/// Decodes the redirect-login XML document into fresh credentials. The
/// device id is not part of the document and is left empty.
pub fn parse_login_xml(body: &str) -> Result<Credentials> {
    let ret = xml_field(body, "ret")
        .ok_or_else(|| ClientError::Decode(format!("login response without <ret>: {body}")))?;
    let ret_code = ret
        .parse::<i64>()
        .map_err(|_| ClientError::Decode(format!("non-numeric <ret>: {ret}")))?;
    let user_id = match xml_field(body, "wxuin") {
        Some(uin) if !uin.is_empty() => uin
            .parse::<i64>()
            .map_err(|_| ClientError::Decode(format!("non-numeric <wxuin>: {uin}")))?,
        _ => 0,
    };
    Ok(Credentials {
        device_id: String::new(),
        session_id: xml_field(body, "wxsid").unwrap_or_default(),
        session_key: xml_field(body, "skey").unwrap_or_default(),
        pass_ticket: xml_field(body, "pass_ticket").unwrap_or_default(),
        user_id,
        ret_code,
        ret_message: xml_field(body, "message").unwrap_or_default(),
    })
}

/// Base URL for the session: scheme, host and the redirect target's path
/// up to (not including) its last segment.
pub fn base_url_from(redirect_uri: &str) -> Result<String> {
    let uri: http::Uri = redirect_uri
        .parse()
        .map_err(|e| ClientError::Decode(format!("bad redirect uri {redirect_uri}: {e}")))?;
    let scheme = uri.scheme_str().unwrap_or("https");
    let authority = uri
        .authority()
        .ok_or_else(|| ClientError::Decode(format!("redirect uri without host: {redirect_uri}")))?;
    let path = uri.path();
    let dir = match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    };
    Ok(format!("{scheme}://{authority}{dir}"))
}

pub fn host_of(url: &str) -> Option<String> {
    url.parse::<http::Uri>().ok()?.host().map(str::to_string)
}

/// Default long-poll hosts for a session base URL.
pub fn sync_hosts_for(base_url: &str) -> Vec<String> {
    match host_of(base_url) {
        Some(host) => vec![format!("webpush.{host}"), format!("webpush2.{host}")],
        None => Vec::new(),
    }
}

/// `BaseResponse` carried by every JSON reply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BaseResponse {
    pub ret: i64,
    pub err_msg: String,
}

impl BaseResponse {
    pub fn check(&self, call: &str) -> Result<()> {
        if self.ret == 0 {
            Ok(())
        } else {
            Err(ClientError::protocol(
                self.ret,
                format!("{call} failed: {}", self.err_msg),
            ))
        }
    }
}

/// What the long-poll check says is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Idle,
    NewMessage,
    ContactChanged,
    MessageAndContact,
    /// The user opened or left a chat on the phone.
    PhoneActivity,
    Other(i64),
}

impl Selector {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Selector::Idle,
            2 => Selector::NewMessage,
            4 => Selector::ContactChanged,
            6 => Selector::MessageAndContact,
            7 => Selector::PhoneActivity,
            other => Selector::Other(other),
        }
    }

    pub fn is_idle(self) -> bool {
        self == Selector::Idle
    }

    pub fn has_contact_change(self) -> bool {
        matches!(self, Selector::ContactChanged | Selector::MessageAndContact)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCheck {
    pub retcode: i64,
    pub selector: Selector,
}

/// Parses `window.synccheck={retcode:"0",selector:"2"}`.
pub fn parse_sync_check(body: &str) -> Result<SyncCheck> {
    let field = |name: &str| -> Result<i64> {
        let raw = search(body, &format!("{name}:\""), "\"")?;
        raw.parse::<i64>()
            .map_err(|_| ClientError::Decode(format!("non-numeric {name}: {raw}")))
    };
    Ok(SyncCheck {
        retcode: field("retcode")?,
        selector: Selector::from_code(field("selector")?),
    })
}

fn enc(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

pub fn challenge_url(login_host: &str) -> String {
    format!("{login_host}/jslogin")
}

pub fn confirm_url(login_host: &str, uuid: &str, tip: u8) -> String {
    format!(
        "{login_host}/cgi-bin/mmwebwx-bin/login?tip={tip}&uuid={}&_={}",
        enc(uuid),
        unix_now()
    )
}

pub fn qrcode_url(login_host: &str, uuid: &str) -> String {
    format!("{login_host}/qrcode/{}", enc(uuid))
}

pub fn init_url(base_url: &str, credentials: &Credentials) -> String {
    format!(
        "{base_url}/webwxinit?pass_ticket={}&skey={}&r={}",
        credentials.pass_ticket,
        enc(&credentials.session_key),
        unix_now()
    )
}

pub fn sync_check_url(host: &str, credentials: &Credentials, cursor: &SyncCursor) -> String {
    let now = unix_now_millis();
    format!(
        "https://{host}/cgi-bin/mmwebwx-bin/synccheck?r={now}&skey={}&sid={}&uin={}&deviceid={}&synckey={}&_={now}",
        enc(&credentials.session_key),
        enc(&credentials.session_id),
        credentials.user_id,
        enc(&credentials.device_id),
        enc(&cursor.to_string()),
    )
}

pub fn sync_url(base_url: &str, credentials: &Credentials) -> String {
    format!(
        "{base_url}/webwxsync?sid={}&skey={}&pass_ticket={}",
        enc(&credentials.session_id),
        enc(&credentials.session_key),
        credentials.pass_ticket
    )
}

pub fn contact_url(base_url: &str, credentials: &Credentials, seq: i64) -> String {
    format!(
        "{base_url}/webwxgetcontact?pass_ticket={}&skey={}&r={}&seq={seq}",
        credentials.pass_ticket,
        enc(&credentials.session_key),
        unix_now()
    )
}

pub fn send_url(base_url: &str, credentials: &Credentials) -> String {
    format!(
        "{base_url}/webwxsendmsg?pass_ticket={}",
        credentials.pass_ticket
    )
}

/// Replaces `<span class="emoji emoji1f604"></span>` markup with the
/// character it stands for. Unknown code points are left untouched.
pub fn replace_emoji(content: &str) -> String {
    const OPEN: &str = "<span class=\"emoji emoji";
    const CLOSE: &str = "\"></span>";

    if !content.contains(OPEN) {
        return content.to_string();
    }
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let replaced = after.find(CLOSE).and_then(|end| {
            let hex = &after[..end];
            let valid = (1..=6).contains(&hex.len()) && hex.chars().all(|c| c.is_ascii_hexdigit());
            valid
                .then(|| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32))
                .flatten()
                .map(|c| (c, end + CLOSE.len()))
        });
        match replaced {
            Some((c, consumed)) => {
                out.push(c);
                rest = &after[consumed..];
            }
            None => {
                out.push_str(OPEN);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
