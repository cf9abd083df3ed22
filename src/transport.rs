use crate::cookies::CookieJar;
use crate::error::{ClientError, Result};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// HTTP access shared by every component of a client: one connection
/// pool, one cookie jar, fixed per-call timeouts. Holds no protocol state.
#[derive(Clone)]
pub struct Transport {
    http: Arc<dyn HttpClient>,
    jar: Arc<CookieJar>,
    user_agent: String,
    request_timeout: Duration,
}

impl Transport {
    pub fn new(http: Arc<dyn HttpClient>, user_agent: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            http,
            jar: Arc::new(CookieJar::new()),
            user_agent: user_agent.into(),
            request_timeout,
        }
    }

    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Sends `request` with the jar's cookies attached, records any cookies
    /// the response sets, and fails on timeout or a non-2xx status.
    pub async fn execute(&self, mut request: HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        if request.header("User-Agent").is_none() {
            request = request.with_header("User-Agent", self.user_agent.clone());
        }
        if let Some(cookie) = self.jar.header_for(&request.url) {
            request = request.with_header("Cookie", cookie);
        }

        let url = request.url.clone();
        debug!(target: "Transport", "{} {}", request.method, url);

        let response = match tokio::time::timeout(timeout, self.http.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ClientError::Transport(format!("{url}: {e}"))),
            Err(_) => return Err(ClientError::Timeout(url)),
        };

        self.jar
            .store_from_headers(&url, response.header_values("Set-Cookie"));

        if !(200..300).contains(&response.status_code) {
            return Err(ClientError::Transport(format!(
                "{url}: unexpected HTTP status {}",
                response.status_code
            )));
        }
        Ok(response)
    }

    pub async fn get_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let response = self.execute(HttpRequest::get(url), timeout).await?;
        Ok(response.body_string())
    }

    pub async fn post_form(&self, url: &str, params: &[(&str, String)]) -> Result<HttpResponse> {
        let body = encode_form(params);
        let request = HttpRequest::post(url)
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(body.into_bytes());
        self.execute(request, self.request_timeout).await
    }

    pub async fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let response = self.execute(HttpRequest::get(url), self.request_timeout).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(&self, url: &str, body: &B) -> Result<R> {
        let payload = serde_json::to_vec(body)?;
        let request = HttpRequest::post(url)
            .with_header("Content-Type", "application/json; charset=UTF-8")
            .with_body(payload);
        let response = self.execute(request, self.request_timeout).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

pub(crate) fn encode_form(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
