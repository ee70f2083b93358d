use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use indexflow_core::{IndexEngineConfig, SchedulerError, SchedulerResult};
use indexflow_domain::{IndexDestination, IndexDocument, IndexingClient};

/// HTTP索引引擎客户端
///
/// 把一批文档以JSON整体提交到目标库的写入端点。
pub struct HttpIndexingClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpIndexingClient {
    pub fn new(config: &IndexEngineConfig) -> SchedulerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|err| SchedulerError::IndexEngine(format!("创建HTTP客户端失败: {err}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl IndexingClient for HttpIndexingClient {
    async fn flush(
        &self,
        destination: &IndexDestination,
        documents: &[IndexDocument],
    ) -> SchedulerResult<()> {
        let url = format!(
            "{}/databases/{}/documents",
            self.base_url, destination.database
        );
        let body = json!({
            "priority": destination.priority,
            "params": destination.params,
            "documents": documents,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| SchedulerError::IndexEngine(format!("提交请求失败: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchedulerError::IndexEngine(format!(
                "索引引擎返回 {status} [库:{}]",
                destination.database
            )));
        }
        debug!(
            "已提交 {} 个文档 [库:{}, 状态:{}]",
            documents.len(),
            destination.database,
            status
        );
        Ok(())
    }
}
