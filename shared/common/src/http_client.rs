use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum HttpClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request returned {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    pub async fn get<T>(&self, url: &str) -> Result<T, HttpClientError>
    where
        T: for<'de> Deserialize<'de>,
    {
        into_json(self.client.get(url).send().await?).await
    }

    pub async fn post<T, U>(&self, url: &str, body: &T) -> Result<U, HttpClientError>
    where
        T: Serialize,
        U: for<'de> Deserialize<'de>,
    {
        into_json(self.client.post(url).json(body).send().await?).await
    }

    pub async fn put<T, U>(&self, url: &str, body: &T) -> Result<U, HttpClientError>
    where
        T: Serialize,
        U: for<'de> Deserialize<'de>,
    {
        into_json(self.client.put(url).json(body).send().await?).await
    }

    pub async fn delete(&self, url: &str) -> Result<(), HttpClientError> {
        let response = self.client.delete(url).send().await?;
        check_status(response).await.map(|_| ())
    }
}

async fn into_json<T>(response: reqwest::Response) -> Result<T, HttpClientError>
where
    T: for<'de> Deserialize<'de>,
{
    let response = check_status(response).await?;
    Ok(response.json::<T>().await?)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HttpClientError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(HttpClientError::Status { status, body })
}
