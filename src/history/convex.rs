use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{clamp_limit, HistoryStore, PersistenceError};
use crate::model::{AnalysisHistoryItem, AnalysisResult};

const SAVE_FUNCTION: &str = "history:saveForUser";
const LIST_FUNCTION: &str = "history:listForUser";

#[derive(Clone, Debug)]
pub struct ConvexConfig {
    pub url: String,
    pub admin_key: String,
    pub timeout_ms: u64,
}

/// Hosted history table reached through the Convex HTTP function API.  The
/// deployment exposes `history:saveForUser` (mutation) and
/// `history:listForUser` (query over the `by_user_createdAt` index).
pub struct ConvexHistoryStore {
    cfg: ConvexConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct FunctionCall<'a> {
    path: &'a str,
    args: serde_json::Value,
    format: &'static str,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum FunctionResult {
    Success {
        value: serde_json::Value,
    },
    Error {
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

impl ConvexHistoryStore {
    pub fn new(cfg: ConvexConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self { cfg, client })
    }

    async fn call(
        &self,
        kind: &str,
        path: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, PersistenceError> {
        let url = format!("{}/api/{}", self.cfg.url.trim_end_matches('/'), kind);
        let resp = self
            .client
            .post(&url)
            .header("authorization", format!("Convex {}", self.cfg.admin_key))
            .json(&FunctionCall {
                path,
                args,
                format: "json",
            })
            .send()
            .await
            .map_err(|err| PersistenceError::Transport(err.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| PersistenceError::Transport(err.to_string()))?;
        // Function-level errors come back as JSON even on 4xx/5xx.
        match serde_json::from_str::<FunctionResult>(&text) {
            Ok(FunctionResult::Error { error_message }) => {
                Err(PersistenceError::Rejected(error_message))
            }
            _ if !status.is_success() => Err(PersistenceError::Rejected(format!(
                "HTTP {} from {}",
                status.as_u16(),
                path
            ))),
            Ok(FunctionResult::Success { value }) => Ok(value),
            Err(err) => Err(PersistenceError::Malformed(err.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for ConvexHistoryStore {
    fn kind(&self) -> &str {
        "convex"
    }

    async fn save(
        &self,
        user_id: &str,
        file_names: &[String],
        analysis: &AnalysisResult,
    ) -> Result<String, PersistenceError> {
        let args = json!({
            "userId": user_id,
            "fileNames": file_names,
            "analysis": analysis,
        });
        let value = self.call("mutation", SAVE_FUNCTION, args).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PersistenceError::Malformed("mutation did not return a row id".into()))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<AnalysisHistoryItem>, PersistenceError> {
        let args = json!({ "userId": user_id, "limit": clamp_limit(limit) });
        let value = self.call("query", LIST_FUNCTION, args).await?;
        serde_json::from_value(value).map_err(|err| PersistenceError::Malformed(err.to_string()))
    }
}
