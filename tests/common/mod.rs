#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use webot::http::{HttpClient, HttpRequest, HttpResponse};
use webot::{ClientConfig, ClientError, UuidProcessor};

pub const REDIRECT: &str = "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=t1&uuid=abc123&lang=zh_CN&scan=1";

pub fn config(dir: &Path) -> ClientConfig {
    ClientConfig::default()
        .with_storage_dir(dir)
        .with_login_host("https://login.test")
        .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
}

/// Replays scripted responses per URL fragment; once a fragment's script is
/// used up its last entry keeps answering.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<Vec<(String, VecDeque<(Duration, HttpResponse)>)>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, fragment: &str, response: HttpResponse) -> &Self {
        self.script_after(fragment, Duration::ZERO, response)
    }

    pub fn script_after(&self, fragment: &str, delay: Duration, response: HttpResponse) -> &Self {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.iter_mut().find(|(f, _)| f == fragment) {
            Some((_, queue)) => queue.push_back((delay, response)),
            None => scripts.push((fragment.to_string(), VecDeque::from([(delay, response)]))),
        }
        self
    }

    pub fn requests_to(&self, fragment: &str) -> Vec<HttpRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .cloned()
            .collect()
    }

    fn next(&self, url: &str) -> Option<(Duration, HttpResponse)> {
        let mut scripts = self.scripts.lock().unwrap();
        let (_, queue) = scripts.iter_mut().find(|(f, _)| url.contains(f.as_str()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        let url = request.url.clone();
        self.seen.lock().unwrap().push(request);
        let (delay, response) = self
            .next(&url)
            .ok_or_else(|| anyhow::anyhow!("nothing scripted for {url}"))?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }
}

/// Presenter that only remembers the tokens it was shown.
#[derive(Default)]
pub struct TokenLog {
    pub tokens: Mutex<Vec<String>>,
    pub outcomes: Mutex<Vec<bool>>,
}

#[async_trait]
impl UuidProcessor for TokenLog {
    async fn process_uuid(&self, uuid: &str, _storage_dir: &Path) -> Result<(), ClientError> {
        self.tokens.lock().unwrap().push(uuid.to_string());
        Ok(())
    }

    async fn uuid_did_confirm(&self, error: Option<&ClientError>) {
        self.outcomes.lock().unwrap().push(error.is_none());
    }
}

pub fn challenge() -> HttpResponse {
    HttpResponse::ok("window.QRLogin.code = 200; window.QRLogin.uuid = \"abc123\";")
}

pub fn scanned() -> HttpResponse {
    HttpResponse::ok("window.code=201;")
}

pub fn confirmed() -> HttpResponse {
    HttpResponse::ok(format!("window.code=200;\nwindow.redirect_uri=\"{REDIRECT}\";"))
}

pub fn login_xml() -> HttpResponse {
    HttpResponse::ok(
        "<error><ret>0</ret><message></message><skey>@crypt_k1</skey>\
         <wxsid>sid1</wxsid><wxuin>1001</wxuin><pass_ticket>pt1</pass_ticket></error>",
    )
    .with_header("Set-Cookie", "wxuin=1001; Domain=qq.com; Path=/")
    .with_header("Set-Cookie", "wxsid=sid1; Domain=qq.com; Path=/")
}

pub fn init() -> HttpResponse {
    HttpResponse::ok(
        serde_json::json!({
            "BaseResponse": {"Ret": 0, "ErrMsg": ""},
            "User": {"Uin": 1001, "UserName": "@me", "NickName": "Me"},
            "Skey": "@crypt_k2",
            "SyncKey": {"Count": 1, "List": [{"Key": 1, "Val": 100}]}
        })
        .to_string(),
    )
}

pub fn contacts() -> HttpResponse {
    HttpResponse::ok(
        serde_json::json!({
            "BaseResponse": {"Ret": 0, "ErrMsg": ""},
            "MemberCount": 2,
            "MemberList": [
                {"UserName": "@peer", "NickName": "Peer"},
                {"UserName": "@@room", "NickName": "Room"}
            ],
            "Seq": 0
        })
        .to_string(),
    )
}

pub fn sync_check(selector: &str) -> HttpResponse {
    HttpResponse::ok(format!(
        "window.synccheck={{retcode:\"0\",selector:\"{selector}\"}}"
    ))
}

pub fn sync_with(messages: serde_json::Value) -> HttpResponse {
    HttpResponse::ok(
        serde_json::json!({
            "BaseResponse": {"Ret": 0, "ErrMsg": ""},
            "AddMsgList": messages,
            "ModContactList": [],
            "DelContactList": [],
            "SyncKey": {"Count": 1, "List": [{"Key": 1, "Val": 101}]}
        })
        .to_string(),
    )
}

pub fn sent(id: &str) -> HttpResponse {
    HttpResponse::ok(format!(
        r#"{{"BaseResponse":{{"Ret":0,"ErrMsg":""}},"MsgID":"{id}","LocalID":"1"}}"#
    ))
}
