use serde::{Deserialize, Serialize};

/// A contact, group or official account as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Contact {
    pub uin: i64,
    pub user_name: String,
    pub nick_name: String,
    pub remark_name: String,
    pub head_img_url: String,
    pub contact_flag: i64,
    pub verify_flag: i64,
    pub member_count: i64,
    pub star_friend: i64,
    pub sex: i64,
    pub signature: String,
    #[serde(rename = "PYQuanPin")]
    pub py_quan_pin: String,
    #[serde(rename = "RemarkPYQuanPin")]
    pub remark_py_quan_pin: String,
}

impl Contact {
    pub fn is_group(&self) -> bool {
        self.user_name.starts_with("@@")
    }

    /// Official accounts carry bit 8 in `VerifyFlag`.
    pub fn is_official(&self) -> bool {
        self.verify_flag & 8 != 0
    }

    pub fn display_name(&self) -> &str {
        if self.remark_name.is_empty() {
            &self.nick_name
        } else {
            &self.remark_name
        }
    }
}

/// Contact changes reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactChange {
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}
