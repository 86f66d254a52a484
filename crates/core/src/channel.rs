//! ITSM channels (tenant spaces).

use serde::{Deserialize, Serialize};

/// A tenant/workspace of the ITSM service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub name: String,
}

impl Channel {
    pub fn new(channel_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            name: name.into(),
        }
    }
}
