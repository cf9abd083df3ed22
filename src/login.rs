//! The network steps of the interactive handshake and of session
//! initialization. Sequencing and state live in [`crate::session`].

use crate::client::ClientContext;
use crate::error::{ClientError, Result};
use crate::protocol::{self, BaseResponse, ConfirmStatus};
use crate::types::{BaseRequest, Contact, Credentials, SyncCursor};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Requests a fresh challenge token.
pub async fn fetch_uuid(ctx: &ClientContext) -> Result<String> {
    let url = protocol::challenge_url(&ctx.config.login_host);
    let params = [
        ("appid", ctx.config.app_id.clone()),
        ("fun", "new".to_string()),
        ("lang", ctx.config.lang.clone()),
        ("_", protocol::unix_now_millis().to_string()),
    ];
    let response = ctx.transport.post_form(&url, &params).await?;
    let uuid = protocol::parse_challenge(&response.body_string())?;
    debug!(target: "Session/Login", "Got challenge token {uuid}");
    Ok(uuid)
}

/// Polls until the challenge is confirmed and returns the redirect target.
/// `on_status` sees every poll result. Gives up after `limit` polls.
pub async fn wait_confirm<F>(ctx: &ClientContext, uuid: &str, limit: Option<u32>, mut on_status: F) -> Result<String>
where
    F: FnMut(&ConfirmStatus),
{
    let mut polls: u32 = 0;
    let mut tip = 1;
    loop {
        if limit.is_some_and(|max| polls >= max) {
            return Err(ClientError::protocol(
                408,
                format!("challenge not confirmed after {polls} polls"),
            ));
        }
        polls += 1;

        let url = protocol::confirm_url(&ctx.config.login_host, uuid, tip);
        let body = ctx
            .transport
            .get_text(&url, ctx.transport.request_timeout())
            .await?;
        let status = protocol::parse_confirm(&body)?;
        on_status(&status);

        match status {
            ConfirmStatus::Waiting | ConfirmStatus::Scanned => {}
            ConfirmStatus::Confirmed { redirect_uri } => return Ok(redirect_uri),
            ConfirmStatus::Rejected { code } => {
                return Err(ClientError::protocol(
                    code.parse().unwrap_or(-1),
                    format!("challenge rejected with code {code}"),
                ));
            }
        }
        tip = 0;
    }
}

/// Follows the redirect target and decodes the credentials it returns.
/// Yields the session base URL together with the credentials.
pub async fn redirect_login(ctx: &ClientContext, redirect_uri: &str, device_id: &str) -> Result<(String, Credentials)> {
    let body = ctx
        .transport
        .get_text(redirect_uri, ctx.transport.request_timeout())
        .await?;
    let mut credentials = protocol::parse_login_xml(&body)?;
    if !credentials.is_valid() {
        return Err(ClientError::protocol(
            credentials.ret_code,
            format!("redirect login rejected: {}", credentials.ret_message),
        ));
    }
    credentials.device_id = device_id.to_string();
    let base_url = protocol::base_url_from(redirect_uri)?;
    info!(target: "Session/Login", "Logged in as uin {}, base URL {base_url}", credentials.user_id);
    Ok((base_url, credentials))
}

#[derive(Serialize)]
struct InitRequest {
    #[serde(rename = "BaseRequest")]
    base_request: BaseRequest,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InitResponse {
    base_response: BaseResponse,
    user: Contact,
    skey: String,
    sync_key: SyncCursor,
}

pub struct InitOutcome {
    pub me: Contact,
    pub cursor: SyncCursor,
}

/// Runs the init call. A refreshed session key in the reply replaces the
/// one in `credentials`.
pub async fn init(ctx: &ClientContext, base_url: &str, credentials: &mut Credentials) -> Result<InitOutcome> {
    let url = protocol::init_url(base_url, credentials);
    let request = InitRequest {
        base_request: credentials.base_request(),
    };
    let response: InitResponse = ctx.transport.post_json(&url, &request).await?;
    response.base_response.check("init")?;

    if !response.skey.is_empty() {
        credentials.session_key = response.skey;
    }
    debug!(
        target: "Session/Login",
        "Init done for {}, cursor {}",
        response.user.user_name,
        response.sync_key
    );
    Ok(InitOutcome {
        me: response.user,
        cursor: response.sync_key,
    })
}
