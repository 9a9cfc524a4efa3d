//! JSON control endpoints served next to the job routes.

use crate::orchestrator::SessionSnapshot;
use serde::{Deserialize, Serialize};

/// Backend of `POST /install_url` and `GET /status`.
pub trait InstallApi: Send + Sync {
    /// Starts a background install of `url`. Fails fast when busy.
    fn install_url(&self, url: &str, use_disk_cache: bool) -> Result<(), String>;

    /// Snapshot of the active session, if any.
    fn session(&self) -> Option<SessionSnapshot>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallUrlRequest {
    pub url: String,
    #[serde(default)]
    pub use_disk_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiReply {
    pub result: ApiResult,
}

impl From<Result<(), String>> for ApiReply {
    fn from(outcome: Result<(), String>) -> Self {
        let result = match outcome {
            Ok(()) => ApiResult {
                success: true,
                error: None,
            },
            Err(e) => ApiResult {
                success: false,
                error: Some(e),
            },
        };
        Self { result }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReply {
    pub activity: Option<String>,
    pub jobs: usize,
    pub session: Option<SessionSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_shapes() {
        let ok = serde_json::to_string(&ApiReply::from(Ok(()))).unwrap();
        assert_eq!(ok, r#"{"result":{"success":true}}"#);
        let failed = serde_json::to_string(&ApiReply::from(Err("activity in progress".into()))).unwrap();
        assert_eq!(
            failed,
            r#"{"result":{"success":false,"error":"activity in progress"}}"#
        );
    }

    #[test]
    fn request_defaults_disk_cache_off() {
        let req: InstallUrlRequest = serde_json::from_str(r#"{"url":"http://h/a.pkg"}"#).unwrap();
        assert_eq!(req.url, "http://h/a.pkg");
        assert!(!req.use_disk_cache);
    }
}
