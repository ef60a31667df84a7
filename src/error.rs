//! Error types for rProm-Adapter
//!
//! This module defines the error types used throughout the application.
//! Rule compilation errors are fatal and abort a configuration load;
//! mapping errors are per-series or per-request and never abort discovery.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::rules::GroupResource;

/// Rule 컴파일 에러 (설정 로드 시점, 치명적)
#[derive(Error, Debug)]
pub enum RuleError {
    /// `is`/`isNot` 둘 다 설정되었거나 둘 다 비어있음
    #[error("Invalid series filter: {0}")]
    InvalidFilter(String),

    /// 정규식 패턴 컴파일 실패
    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// 시리즈 셀렉터 파싱 실패
    #[error("Invalid series selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// 템플릿 문법 오류
    #[error("Invalid template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// 서로 다른 라벨이 같은 group-resource로 매핑됨
    #[error("Overrides '{first}' and '{second}' both map to {resource}")]
    DuplicateOverride {
        first: String,
        second: String,
        resource: GroupResource,
    },

    /// constantName 사용 시 셀렉터가 단일 메트릭 패밀리로 고정되지 않음
    #[error("constantName '{name}' requires a selector pinned to one metric family, got '{selector}'")]
    AmbiguousConstantName { name: String, selector: String },

    /// constantName과 prefix/suffix 동시 사용
    #[error("constantName '{name}' cannot be combined with prefix or suffix")]
    ConflictingNaming { name: String },

    /// 두 규칙이 같은 시리즈에 매칭됨
    #[error("Rules {first} and {second} match the same series ({reason})")]
    Conflict {
        first: usize,
        second: usize,
        reason: String,
    },

    /// 규칙 컴파일 실패 (인덱스 포함)
    #[error("Failed to compile rule at index {index}: {source}")]
    RuleCompileFailed {
        index: usize,
        #[source]
        source: Box<RuleError>,
    },
}

/// Result type for rule compilation
pub type RuleResult<T> = Result<T, RuleError>;

/// 이름/리소스 매핑 에러 (런타임, 시리즈 단위)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// 메트릭명에 prefix/suffix가 없음
    #[error("Metric name '{name}' does not carry prefix '{prefix}' and suffix '{suffix}'")]
    NameMismatch {
        name: String,
        prefix: String,
        suffix: String,
    },

    /// constantName 규칙에서 API 이름만으로 원래 시리즈를 알 수 없음
    #[error("Metric '{name}' is a constant name and cannot be mapped back to a series by name alone")]
    AmbiguousReverseMapping { name: String },

    /// 리소스를 라벨로 변환할 수 없음
    #[error("Resource {resource} has no label mapping (no override and no template)")]
    ReverseMappingUnsupported { resource: GroupResource },
}

/// Store 모듈 에러 타입
#[derive(Error, Debug)]
pub enum StoreError {
    /// HTTP 클라이언트 초기화 실패
    #[error("Failed to initialize HTTP client: {0}")]
    HttpClientInit(#[source] reqwest::Error),

    /// 잘못된 URL
    #[error("Invalid store URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// HTTP 요청 실패
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[source] reqwest::Error),

    /// HTTP 응답 읽기 실패
    #[error("Failed to read HTTP response: {0}")]
    HttpResponse(#[source] reqwest::Error),

    /// HTTP 상태 코드 에러
    #[error("HTTP error status: {0}")]
    HttpStatus(u16),

    /// JSON 파싱 에러
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// Prometheus 에러 응답
    #[error("Prometheus error ({error_type}): {message}")]
    Upstream { error_type: String, message: String },

    /// 타임아웃
    #[error("Request timed out{}", .0.map(|ms| format!(" after {}ms", ms)).unwrap_or_default())]
    Timeout(Option<u64>),

    /// 연결 실패
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

impl StoreError {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::HttpRequest(_)
                | StoreError::HttpResponse(_)
                | StoreError::Timeout(..)
                | StoreError::ConnectionFailed(_)
                | StoreError::HttpStatus(500..=599)
        )
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(None)
        } else if err.is_connect() {
            StoreError::ConnectionFailed(err.to_string())
        } else if err.is_request() {
            StoreError::HttpRequest(err)
        } else {
            StoreError::HttpResponse(err)
        }
    }
}

/// Errors returned by the custom metrics API surface
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No catalog entry for the requested metric
    #[error("Metric '{metric}' is not available for {resource}")]
    MetricNotFound {
        resource: GroupResource,
        metric: String,
    },

    /// The described object does not exist
    #[error("{resource} '{name}' not found")]
    ResourceNotFound {
        resource: GroupResource,
        name: String,
    },

    /// The query ran but returned no sample for the object
    #[error("No data for metric '{metric}' on {resource} '{name}'")]
    NoData {
        resource: GroupResource,
        name: String,
        metric: String,
    },

    /// Malformed label selector in a list request
    #[error("Invalid label selector '{0}'")]
    InvalidLabelSelector(String),

    /// Listing by label selector needs a resource lister
    #[error("Label selector queries require a resource lister")]
    SelectorUnsupported,

    /// Store query failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Resource listing failed
    #[error("Resource lister error: {0}")]
    Resources(String),

    /// Name or resource mapping failed
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
}

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Rule compilation error
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Custom metrics API error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Unknown path or missing resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, public_message, log_message) = match self {
            AppError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                e.to_string(),
            ),
            AppError::Rule(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Rule error".to_string(),
                e.to_string(),
            ),
            AppError::Provider(e) => {
                let status = match &e {
                    ProviderError::MetricNotFound { .. }
                    | ProviderError::ResourceNotFound { .. }
                    | ProviderError::NoData { .. } => StatusCode::NOT_FOUND,
                    ProviderError::SelectorUnsupported => StatusCode::NOT_IMPLEMENTED,
                    ProviderError::Mapping(_) | ProviderError::InvalidLabelSelector(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    ProviderError::Store(_) | ProviderError::Resources(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                };
                let message = e.to_string();
                (status, message.clone(), message)
            }
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e.clone(), e),
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
                e,
            ),
        };

        tracing::error!(status = %status, error = %log_message, "Request failed");

        (status, public_message).into_response()
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;
