use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// One stored cookie. Serialized with the same field names the cookie cache
/// file has always used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

fn root_path() -> String {
    "/".to_string()
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: root_path(),
            expires: None,
            secure: false,
            http_only: false,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        let domain_ok = self.domain.is_empty()
            || host.eq_ignore_ascii_case(&self.domain)
            || host
                .to_ascii_lowercase()
                .ends_with(&format!(".{}", self.domain.to_ascii_lowercase()));
        domain_ok && path.starts_with(&self.path)
    }
}

/// Parses one `Set-Cookie` header value. Cookies without a `Domain`
/// attribute are bound to `request_host`.
pub fn parse_set_cookie(header: &str, request_host: &str) -> Option<CookieRecord> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = CookieRecord::new(name, value.trim().trim_matches('"'), request_host);
    let mut max_age: Option<i64> = None;

    for attr in parts {
        let attr = attr.trim();
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr, ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "expires" => cookie.expires = parse_cookie_date(val),
            "max-age" => max_age = val.parse().ok(),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            _ => {}
        }
    }

    // Max-Age wins over Expires.
    if let Some(secs) = max_age {
        cookie.expires = Some(Utc::now() + Duration::seconds(secs));
    }
    Some(cookie)
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    // Servers send both "Mon, 20 Oct 2026 08:00:00 GMT" and the older
    // "Mon, 20-Oct-2026 08:00:00 GMT".
    let normalised = value.replace('-', " ");
    DateTime::parse_from_rfc2822(&normalised)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Splits a URL into (host, path) for cookie matching.
pub(crate) fn host_and_path(url: &str) -> Option<(String, String)> {
    let uri: http::Uri = url.parse().ok()?;
    let host = uri.host()?.to_ascii_lowercase();
    let path = match uri.path() {
        "" => "/".to_string(),
        p => p.to_string(),
    };
    Some((host, path))
}

/// Cookie store shared by every request of a session. Calls may run
/// concurrently (the long poll overlaps with sends), so all access goes
/// through the concurrent map; `generation` changes whenever content does.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: DashMap<(String, String, String), CookieRecord>,
    generation: AtomicU64,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cookie: CookieRecord) {
        let key = (
            cookie.domain.clone(),
            cookie.path.clone(),
            cookie.name.clone(),
        );
        if cookie.is_expired(Utc::now()) {
            self.cookies.remove(&key);
        } else {
            self.cookies.insert(key, cookie);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Records every `Set-Cookie` header of a response received from `url`.
    pub fn store_from_headers<'a>(&self, url: &str, set_cookies: impl Iterator<Item = &'a str>) {
        let Some((host, _)) = host_and_path(url) else {
            return;
        };
        for header in set_cookies {
            match parse_set_cookie(header, &host) {
                Some(cookie) => {
                    debug!(target: "Transport", "Storing cookie {} for {}", cookie.name, cookie.domain);
                    self.insert(cookie);
                }
                None => debug!(target: "Transport", "Ignoring malformed Set-Cookie header"),
            }
        }
    }

    /// Value for the `Cookie` request header, if any cookie applies to `url`.
    pub fn header_for(&self, url: &str) -> Option<String> {
        let (host, path) = host_and_path(url)?;
        let now = Utc::now();
        let mut matching: Vec<CookieRecord> = self
            .cookies
            .iter()
            .filter(|c| !c.is_expired(now) && c.matches(&host, &path))
            .map(|c| c.value().clone())
            .collect();
        if matching.is_empty() {
            return None;
        }
        // Longer paths first, as browsers do.
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(a.name.cmp(&b.name)));
        Some(
            matching
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// First value stored under `name`, regardless of domain.
    pub fn value(&self, name: &str) -> Option<String> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.clone())
    }

    /// Stable, sorted copy of all live cookies.
    pub fn snapshot(&self) -> Vec<CookieRecord> {
        let now = Utc::now();
        let mut all: Vec<CookieRecord> = self
            .cookies
            .iter()
            .filter(|c| !c.is_expired(now))
            .map(|c| c.value().clone())
            .collect();
        all.sort_by(|a, b| {
            (a.domain.as_str(), a.path.as_str(), a.name.as_str())
                .cmp(&(b.domain.as_str(), b.path.as_str(), b.name.as_str()))
        });
        all
    }

    pub fn restore(&self, cookies: Vec<CookieRecord>) {
        for cookie in cookies {
            self.insert(cookie);
        }
    }

    pub fn clear(&self) {
        self.cookies.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
