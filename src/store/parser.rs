//! Prometheus HTTP API 응답 파서
//!
//! `/api/v1/series`, `/api/v1/query` 응답을 내부 데이터 구조로 변환합니다.

use serde::Deserialize;
use serde_json::Value;

use super::{Labels, Sample, Series, StoreResult};
use crate::error::StoreError;
use crate::rules::selector::METRIC_NAME_LABEL;

/// 공통 응답 봉투
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    error_type: Option<String>,
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> StoreResult<T> {
        if self.status != "success" {
            return Err(StoreError::Upstream {
                error_type: self.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: self.error.unwrap_or_default(),
            });
        }
        self.data
            .ok_or_else(|| StoreError::JsonParse("missing 'data' field".to_string()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: Value,
}

#[derive(Deserialize)]
struct VectorItem {
    metric: Labels,
    #[serde(default)]
    value: Option<(f64, String)>,
    #[serde(default)]
    values: Option<Vec<(f64, String)>>,
}

/// 시리즈 응답 파싱
pub fn parse_series_response(json: &str) -> StoreResult<Vec<Series>> {
    let envelope: Envelope<Vec<Labels>> =
        serde_json::from_str(json).map_err(|e| StoreError::JsonParse(e.to_string()))?;

    let mut series = Vec::new();
    for mut labels in envelope.into_data()? {
        match labels.remove(METRIC_NAME_LABEL) {
            Some(name) => series.push(Series { name, labels }),
            None => tracing::debug!(labels = ?labels, "Skipping series without a metric name"),
        }
    }
    Ok(series)
}

/// 인스턴트 쿼리 응답 파싱
///
/// vector, scalar, matrix (마지막 샘플) 결과 타입을 지원합니다.
pub fn parse_query_response(json: &str) -> StoreResult<Vec<Sample>> {
    let envelope: Envelope<QueryData> =
        serde_json::from_str(json).map_err(|e| StoreError::JsonParse(e.to_string()))?;
    let data = envelope.into_data()?;

    match data.result_type.as_str() {
        "vector" | "matrix" => {
            let items: Vec<VectorItem> = serde_json::from_value(data.result)
                .map_err(|e| StoreError::JsonParse(e.to_string()))?;
            items
                .into_iter()
                .filter_map(|item| {
                    let point = item.value.or_else(|| item.values.and_then(|v| v.into_iter().last()));
                    point.map(|p| (item.metric, p))
                })
                .map(|(labels, (timestamp, value))| {
                    Ok(Sample {
                        labels,
                        value: parse_value(&value)?,
                        timestamp,
                    })
                })
                .collect()
        }
        "scalar" => {
            let (timestamp, value): (f64, String) = serde_json::from_value(data.result)
                .map_err(|e| StoreError::JsonParse(e.to_string()))?;
            Ok(vec![Sample {
                labels: Labels::new(),
                value: parse_value(&value)?,
                timestamp,
            }])
        }
        other => Err(StoreError::JsonParse(format!(
            "unsupported result type '{}'",
            other
        ))),
    }
}

/// 샘플 값 파싱 ("NaN", "+Inf" 포함)
fn parse_value(raw: &str) -> StoreResult<f64> {
    raw.parse::<f64>()
        .map_err(|_| StoreError::JsonParse(format!("invalid sample value '{}'", raw)))
}
