use crate::error::{ClientError, Result};
use crate::protocol::{self, BaseResponse};
use crate::session::Session;
use crate::transport::Transport;
use crate::types::BaseRequest;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct OutboundText<'a> {
    #[serde(rename = "Type")]
    kind: i64,
    content: &'a str,
    from_user_name: &'a str,
    to_user_name: &'a str,
    #[serde(rename = "LocalID")]
    local_id: &'a str,
    client_msg_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendRequest<'a> {
    base_request: BaseRequest,
    msg: OutboundText<'a>,
    scene: i64,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SendResponse {
    base_response: BaseResponse,
    #[serde(rename = "MsgID")]
    msg_id: String,
}

/// Client-side message id: the current time in milliseconds followed by
/// four random digits.
pub fn local_message_id() -> String {
    let suffix = rand::rng().random_range(0..10_000u32);
    format!("{}{suffix:04}", protocol::unix_now_millis())
}

/// Sends a text message to `to` (a user or group name) and returns the
/// server-assigned message id.
pub async fn send_text(transport: &Transport, session: &Session, to: &str, text: &str) -> Result<String> {
    if to.is_empty() {
        return Err(ClientError::Decode("empty recipient".into()));
    }
    let local_id = local_message_id();
    let request = SendRequest {
        base_request: session.credentials.base_request(),
        msg: OutboundText {
            kind: 1,
            content: text,
            from_user_name: &session.me.user_name,
            to_user_name: to,
            local_id: &local_id,
            client_msg_id: &local_id,
        },
        scene: 0,
    };
    let url = protocol::send_url(&session.base_url, &session.credentials);
    let response: SendResponse = transport.post_json(&url, &request).await?;
    response.base_response.check("send message")?;
    debug!(target: "Session", "Sent message {} to {to}", response.msg_id);
    Ok(response.msg_id)
}
