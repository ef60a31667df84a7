//! Prometheus HTTP 클라이언트
//!
//! Connection pooling, 타임아웃, 재시도를 지원하는 비동기 HTTP 클라이언트입니다.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, instrument, warn};
use url::Url;

use super::parser::{parse_query_response, parse_series_response};
use super::{Sample, Series, SeriesStore, StoreResult};
use crate::error::StoreError;

const SERIES_PATH: &str = "api/v1/series";
const QUERY_PATH: &str = "api/v1/query";

/// Prometheus HTTP 클라이언트
#[derive(Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
    timeout_ms: u64,
    auth: Option<(String, String)>,
    retry: RetryConfig,
}

/// 재시도 설정
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 초기 지연 시간
    pub initial_delay: Duration,
    /// 최대 지연 시간
    pub max_delay: Duration,
    /// 지연 시간 증가 배수
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 재시도 없음
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

impl PrometheusClient {
    /// 새 클라이언트 생성
    ///
    /// # Arguments
    /// * `base_url` - Prometheus URL (예: "http://localhost:9090")
    /// * `timeout_ms` - 요청 타임아웃 (밀리초)
    ///
    /// # Example
    /// ```ignore
    /// let client = PrometheusClient::new("http://localhost:9090", 5000)?;
    /// ```
    pub fn new(base_url: &str, timeout_ms: u64) -> StoreResult<Self> {
        // join()이 마지막 경로 세그먼트를 대체하지 않도록 '/'로 끝나게 맞춤
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|e| StoreError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(StoreError::HttpClientInit)?;

        Ok(Self {
            client,
            base_url,
            timeout_ms,
            auth: None,
            retry: RetryConfig::default(),
        })
    }

    /// Basic Auth 설정
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some((username.to_string(), password.to_string()));
        self
    }

    /// 재시도 설정 변경
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Prometheus 기본 URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// 단일 GET 요청 (재시도 없음)
    async fn get(&self, path: &str, param: (&str, &str)) -> StoreResult<String> {
        let url = self.base_url.join(path).map_err(|e| StoreError::InvalidUrl {
            url: format!("{}{}", self.base_url, path),
            reason: e.to_string(),
        })?;

        let mut req = self.client.get(url).query(&[param]);

        if let Some((username, password)) = &self.auth {
            req = req.basic_auth(username, Some(password));
        }

        let response = req.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(StoreError::HttpResponse)?;

        // Prometheus는 쿼리 오류 시 4xx와 함께 에러 봉투를 반환함
        if !status.is_success() && !(status.is_client_error() && body.contains("\"status\"")) {
            return Err(StoreError::HttpStatus(status.as_u16()));
        }

        Ok(body)
    }

    fn map_send_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(Some(self.timeout_ms))
        } else {
            StoreError::from(err)
        }
    }

    /// 재시도 로직이 포함된 GET 요청
    async fn get_with_retry(&self, path: &str, param: (&str, &str)) -> StoreResult<String> {
        let config = &self.retry;
        let mut delay = config.initial_delay;
        let mut attempt = 0;

        loop {
            match self.get(path, param).await {
                Ok(body) => return Ok(body),
                Err(e) if !e.is_retryable() || attempt >= config.max_retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        Duration::from_secs_f64(delay.as_secs_f64() * config.multiplier),
                        config.max_delay,
                    );
                }
            }
        }
    }
}

#[async_trait]
impl SeriesStore for PrometheusClient {
    #[instrument(skip(self), fields(selector = %selector))]
    async fn series(&self, selector: &str) -> StoreResult<Vec<Series>> {
        debug!("Sending series request");
        let body = self.get_with_retry(SERIES_PATH, ("match[]", selector)).await?;
        let series = parse_series_response(&body)?;
        debug!(count = series.len(), "Series request completed");
        Ok(series)
    }

    #[instrument(skip(self), fields(query = %query))]
    async fn query(&self, query: &str) -> StoreResult<Vec<Sample>> {
        debug!("Sending instant query");
        let body = self.get_with_retry(QUERY_PATH, ("query", query)).await?;
        parse_query_response(&body)
    }
}
