use super::{ApiError, LogApi, LogFilePage, LogPortion, PortionRequest};
use crate::config::types::ApiConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

/// `LogApi` over a JSON gateway that fronts the managed-database log API.
///
/// Routes:
/// - `GET /instances`
/// - `GET /instances/{id}/logfiles?since=&token=`
/// - `GET /instances/{id}/logfiles/portion?file=&marker=&lines=`
///
/// Failures carry a `{"code": .., "message": ..}` body which is classified
/// with [`ApiError::from_service`].
#[derive(Debug, Clone)]
pub struct HttpLogApi {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InstancesResponse {
    instances: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpLogApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &text));
        }

        Ok(response.json().await?)
    }
}

fn error_from_response(status: StatusCode, body: &str) -> ApiError {
    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        return ApiError::from_service(&err.code, &err.message);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(body.to_string()),
        StatusCode::NOT_FOUND => ApiError::FileNotFound(body.to_string()),
        _ => ApiError::Service {
            code: status.as_u16().to_string(),
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl LogApi for HttpLogApi {
    async fn list_instances(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/instances", self.base_url);
        let response: InstancesResponse = self.get_json(&url, &[]).await?;
        Ok(response.instances)
    }

    async fn list_log_files(
        &self,
        instance: &str,
        since_epoch_ms: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<LogFilePage, ApiError> {
        let url = format!("{}/instances/{}/logfiles", self.base_url, instance);

        let mut query = Vec::new();
        if let Some(since) = since_epoch_ms {
            query.push(("since", since.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("token", token.to_string()));
        }

        self.get_json(&url, &query).await
    }

    async fn fetch_portion(&self, request: &PortionRequest<'_>) -> Result<LogPortion, ApiError> {
        let url = format!(
            "{}/instances/{}/logfiles/portion",
            self.base_url, request.instance
        );

        let mut query = vec![("file", request.file_name.to_string())];
        if let Some(marker) = request.marker {
            query.push(("marker", marker.to_string()));
        }
        if let Some(lines) = request.max_lines {
            query.push(("lines", lines.to_string()));
        }

        self.get_json(&url, &query).await
    }
}
