//! HTTP/JSON client for the execution service

use super::{
    DeviceInfo, ExecutionService, StartedTest, TestRecord, TestStatusReport, TestSummary,
    TransportError,
};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    device_id: &'a str,
    serial_no: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Execution service reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpExecutionService {
    base_url: Url,
    client: Client,
}

impl HttpExecutionService {
    /// Create a client for the service rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url =
            Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self { base_url, client })
    }

    /// Service base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build an endpoint URL; segments are percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Error for a non-success response; prefers the service's own message
fn status_error(code: u16, body: &str) -> TransportError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("Request failed with status code {code}"));

    TransportError::Status { code, message }
}

#[async_trait]
impl ExecutionService for HttpExecutionService {
    async fn start_test(&self, device_id: &str, serial_no: u64) -> Result<StartedTest, TransportError> {
        let url = self.endpoint(&["start"]);
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(&StartRequest { device_id, serial_no })
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn get_status(&self, test_id: &str) -> Result<TestStatusReport, TransportError> {
        let url = self.endpoint(&["status", test_id]);
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    async fn list_recent(&self, device_id: &str, limit: usize) -> Result<Vec<TestSummary>, TransportError> {
        let url = self.endpoint(&["tests", "device", device_id]);
        debug!("GET {} limit={}", url, limit);

        let response = self
            .client
            .get(url)
            .query(&[("limit", limit)])
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        let url = self.endpoint(&["devices"]);
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    async fn get_test(&self, test_id: &str) -> Result<TestRecord, TransportError> {
        let url = self.endpoint(&["tests", test_id]);
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(base: &str) -> HttpExecutionService {
        HttpExecutionService::new(base, Duration::from_secs(15)).unwrap()
    }

    #[test]
    fn test_endpoints() {
        let svc = service("http://station.local:8080/api");
        assert_eq!(svc.endpoint(&["start"]).as_str(), "http://station.local:8080/api/start");
        assert_eq!(
            svc.endpoint(&["status", "T1"]).as_str(),
            "http://station.local:8080/api/status/T1"
        );

        let trailing = service("http://station.local:8080/api/");
        assert_eq!(
            trailing.endpoint(&["tests", "device", "ESP32-001"]).as_str(),
            "http://station.local:8080/api/tests/device/ESP32-001"
        );
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let svc = service("http://station.local/api");
        assert_eq!(
            svc.endpoint(&["tests", "a/b c"]).as_str(),
            "http://station.local/api/tests/a%2Fb%20c"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpExecutionService::new("not a url", Duration::from_secs(1)),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpExecutionService::new("mailto:ops@example.com", Duration::from_secs(1)),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_status_error_message() {
        let err = status_error(409, r#"{"message":"Device ESP32-001 is busy"}"#);
        assert_eq!(err.to_string(), "Device ESP32-001 is busy");
        assert_eq!(
            err,
            TransportError::Status {
                code: 409,
                message: "Device ESP32-001 is busy".to_string()
            }
        );

        let err = status_error(502, "<html>Bad Gateway</html>");
        assert_eq!(err.to_string(), "Request failed with status code 502");
    }

    #[test]
    fn test_start_request_body() {
        let body = serde_json::to_value(StartRequest {
            device_id: "ESP32-001",
            serial_no: 124,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"deviceId": "ESP32-001", "serialNo": 124}));
    }
}
