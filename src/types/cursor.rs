use serde::{Deserialize, Serialize};
use std::fmt;

/// The server's opaque record of what this client has already consumed:
/// an ordered list of integer key/value pairs. It is only ever replaced as
/// a whole with the value the server sends back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireCursor", into = "WireCursor")]
pub struct SyncCursor {
    pairs: Vec<(i64, i64)>,
}

impl SyncCursor {
    pub fn new(pairs: Vec<(i64, i64)>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(i64, i64)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// `key_value` pairs joined by `|`, the form the sync-check endpoint takes.
impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{key}_{value}")?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireCursor {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    list: Vec<WirePair>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WirePair {
    key: i64,
    val: i64,
}

impl From<WireCursor> for SyncCursor {
    fn from(wire: WireCursor) -> Self {
        Self {
            pairs: wire.list.into_iter().map(|p| (p.key, p.val)).collect(),
        }
    }
}

impl From<SyncCursor> for WireCursor {
    fn from(cursor: SyncCursor) -> Self {
        Self {
            count: cursor.pairs.len(),
            list: cursor
                .pairs
                .into_iter()
                .map(|(key, val)| WirePair { key, val })
                .collect(),
        }
    }
}
