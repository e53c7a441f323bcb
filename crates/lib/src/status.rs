//! Connectivity status: the client's current belief about reachability of the prediction API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

impl ConnectivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityStatus::Idle => "idle",
            ConnectivityStatus::Connecting => "connecting",
            ConnectivityStatus::Connected => "connected",
            ConnectivityStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
