//! 메트릭 저장소 (Prometheus) 연동 모듈
//!
//! 시리즈 셀렉터 조회와 인스턴트 쿼리 실행을 위한 인터페이스와
//! Prometheus HTTP API 클라이언트를 제공합니다.
//!
//! # Example
//!
//! ```ignore
//! use rprom_adapter::store::{PrometheusClient, SeriesStore};
//!
//! let client = PrometheusClient::new("http://localhost:9090", 5000)?;
//! let series = client.series(r#"up{job="api"}"#).await?;
//! ```

mod client;
mod parser;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use client::{PrometheusClient, RetryConfig};
pub use parser::{parse_query_response, parse_series_response};

use crate::error::StoreError;

/// Store 작업 결과 타입
pub type StoreResult<T> = Result<T, StoreError>;

/// 라벨 집합 (정렬된 맵)
pub type Labels = BTreeMap<String, String>;

/// 메트릭명과 라벨 집합으로 식별되는 시리즈
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Series {
    /// 메트릭명 (`__name__`)
    pub name: String,
    /// `__name__`을 제외한 라벨
    pub labels: Labels,
}

impl Series {
    /// 새 시리즈 생성
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

/// 쿼리 결과 샘플
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// 결과 라벨
    pub labels: Labels,
    /// 샘플 값
    pub value: f64,
    /// 타임스탬프 (Unix epoch, 초)
    pub timestamp: f64,
}

/// 시리즈 조회 및 쿼리 실행 인터페이스
///
/// 취소와 타임아웃은 구현체의 책임입니다.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// 셀렉터에 매칭되는 시리즈 목록 조회
    async fn series(&self, selector: &str) -> StoreResult<Vec<Series>>;

    /// 인스턴트 쿼리 실행
    async fn query(&self, query: &str) -> StoreResult<Vec<Sample>>;
}
