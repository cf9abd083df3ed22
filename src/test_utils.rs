use crate::client::ClientContext;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::qrcode::UuidProcessor;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Config with short backoff and a fake login host rooted at `dir`.
pub fn test_config(dir: &Path) -> ClientConfig {
    ClientConfig::default()
        .with_storage_dir(dir)
        .with_login_host("https://login.test")
        .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
}

/// A context over `mock` with its own throwaway storage root.
pub async fn context_with(mock: Arc<MockHttpClient>) -> (ClientContext, TempDir) {
    let dir = TempDir::new().expect("temp dir should be created");
    let ctx = ClientContext::new(test_config(dir.path()), mock)
        .await
        .expect("context should initialize");
    (ctx, dir)
}

#[derive(Clone)]
enum Scripted {
    Response(Option<Duration>, HttpResponse),
    Error(String),
}

/// Answers requests by URL fragment. Each fragment has a queue of scripted
/// replies consumed in order, plus an optional reply used once the queue is
/// empty. Every request is recorded.
#[derive(Default)]
pub struct MockHttpClient {
    routes: Mutex<Vec<(String, VecDeque<Scripted>)>>,
    sticky: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, fragment: &str, item: Scripted) {
        let mut routes = self.routes.lock().unwrap();
        match routes.iter_mut().find(|(f, _)| f == fragment) {
            Some((_, queue)) => queue.push_back(item),
            None => routes.push((fragment.to_string(), VecDeque::from([item]))),
        }
    }

    pub fn respond(&self, fragment: &str, response: HttpResponse) {
        self.push(fragment, Scripted::Response(None, response));
    }

    pub fn respond_after(&self, fragment: &str, delay: Duration, response: HttpResponse) {
        self.push(fragment, Scripted::Response(Some(delay), response));
    }

    pub fn respond_error(&self, fragment: &str, message: &str) {
        self.push(fragment, Scripted::Error(message.to_string()));
    }

    /// Reply used for `fragment` whenever its queue is empty.
    pub fn respond_always(&self, fragment: &str, response: HttpResponse) {
        self.sticky
            .lock()
            .unwrap()
            .insert(fragment.to_string(), Scripted::Response(None, response));
    }

    /// Like `respond_always`, holding each reply for `delay` the way the
    /// long poll does.
    pub fn respond_always_after(&self, fragment: &str, delay: Duration, response: HttpResponse) {
        self.sticky
            .lock()
            .unwrap()
            .insert(fragment.to_string(), Scripted::Response(Some(delay), response));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    fn next_for(&self, url: &str) -> Option<Scripted> {
        {
            let mut routes = self.routes.lock().unwrap();
            for (fragment, queue) in routes.iter_mut() {
                if url.contains(fragment.as_str()) {
                    if let Some(item) = queue.pop_front() {
                        return Some(item);
                    }
                }
            }
        }
        let sticky = self.sticky.lock().unwrap();
        sticky
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, item)| item.clone())
    }
}

#[async_trait::async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        match self.next_for(&url) {
            Some(Scripted::Response(delay, response)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            }
            Some(Scripted::Error(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no scripted response for {url}")),
        }
    }
}

/// Presenter that records what it was asked to show.
#[derive(Default)]
pub struct RecordingPresenter {
    pub presented: Mutex<Vec<String>>,
    pub confirmations: Mutex<Vec<Option<String>>>,
    pub fail_with: Option<String>,
}

impl RecordingPresenter {
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().unwrap().clone()
    }

    pub fn confirmations(&self) -> Vec<Option<String>> {
        self.confirmations.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl UuidProcessor for RecordingPresenter {
    async fn process_uuid(&self, uuid: &str, _storage_dir: &Path) -> Result<(), ClientError> {
        self.presented.lock().unwrap().push(uuid.to_string());
        match &self.fail_with {
            Some(reason) => Err(ClientError::Presenter(reason.clone())),
            None => Ok(()),
        }
    }

    async fn uuid_did_confirm(&self, error: Option<&ClientError>) {
        self.confirmations
            .lock()
            .unwrap()
            .push(error.map(|e| e.to_string()));
    }
}

/// Canned backend bodies.
pub mod fixtures {
    use crate::http::HttpResponse;

    pub const REDIRECT: &str = "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=t1&uuid=abc123&lang=zh_CN&scan=1";
    pub const BASE_URL: &str = "https://wx.qq.com/cgi-bin/mmwebwx-bin";

    pub fn challenge(uuid: &str) -> HttpResponse {
        HttpResponse::ok(format!(
            "window.QRLogin.code = 200; window.QRLogin.uuid = \"{uuid}\";"
        ))
    }

    pub fn confirm(code: &str) -> HttpResponse {
        HttpResponse::ok(format!("window.code={code};"))
    }

    pub fn confirmed(redirect: &str) -> HttpResponse {
        HttpResponse::ok(format!(
            "window.code=200;\nwindow.redirect_uri=\"{redirect}\";"
        ))
    }

    pub fn login_xml(ret: i64) -> HttpResponse {
        HttpResponse::ok(format!(
            "<error><ret>{ret}</ret><message></message><skey>@crypt_k1</skey>\
             <wxsid>sid1</wxsid><wxuin>1001</wxuin><pass_ticket>pt1</pass_ticket>\
             <isgrayscale>1</isgrayscale></error>"
        ))
        .with_header("Set-Cookie", "wxuin=1001; Domain=qq.com; Path=/")
        .with_header("Set-Cookie", "wxsid=sid1; Domain=qq.com; Path=/")
    }

    pub fn init(ret: i64) -> HttpResponse {
        HttpResponse::ok(
            serde_json::json!({
                "BaseResponse": {"Ret": ret, "ErrMsg": ""},
                "User": {"Uin": 1001, "UserName": "@me", "NickName": "Me"},
                "Skey": "@crypt_k2",
                "SyncKey": {"Count": 2, "List": [{"Key": 1, "Val": 100}, {"Key": 2, "Val": 200}]}
            })
            .to_string(),
        )
    }

    pub fn sync_check(retcode: &str, selector: &str) -> HttpResponse {
        HttpResponse::ok(format!(
            "window.synccheck={{retcode:\"{retcode}\",selector:\"{selector}\"}}"
        ))
    }

    pub fn sync(messages: serde_json::Value, cursor: serde_json::Value) -> HttpResponse {
        HttpResponse::ok(
            serde_json::json!({
                "BaseResponse": {"Ret": 0, "ErrMsg": ""},
                "AddMsgCount": messages.as_array().map(|m| m.len()).unwrap_or(0),
                "AddMsgList": messages,
                "ModContactCount": 0,
                "ModContactList": [],
                "DelContactCount": 0,
                "DelContactList": [],
                "SyncKey": cursor
            })
            .to_string(),
        )
    }

    pub fn text_message(from: &str, to: &str, content: &str) -> serde_json::Value {
        serde_json::json!({
            "MsgId": "m1",
            "FromUserName": from,
            "ToUserName": to,
            "MsgType": 1,
            "Content": content,
            "CreateTime": 1_700_000_000
        })
    }
}
