use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::FetchError;

/// HTTP GET seen from the pipeline: a URL and a timeout in, a body or a
/// `FetchError` out. Anything other than `200 OK` counts as a failure.
pub trait Transport: Send + Sync + 'static {
    fn get_text(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, FetchError>> + Send;

    fn get_bytes(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str, timeout: Duration) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

impl Transport for HttpTransport {
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self.send(url, timeout).await?;
        response.text().await.map_err(|e| classify(e, timeout))
    }

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let response = self.send(url, timeout).await?;
        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;
        Ok(body.to_vec())
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Http(err)
    }
}
