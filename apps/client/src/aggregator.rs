//! Multi-source submissions: several optional named files in one request,
//! one combined response read back per slot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::codec::{build_upload_form, AllowList, UploadCandidate};
use crate::errors::{ClientError, ValidationError};
use crate::service::{Endpoint, ServiceRequest};
use crate::shaping::{
    to_cross_tab_rows, trend_from_chart_records, triples_from_matrix_rows, CrossTabMatrix,
    TrendSeries,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiSourceFlow {
    /// Predicted results checked against a ground-truth file.
    Comparison,
    /// Up to four graduating years side by side.
    MultiYear,
}

impl MultiSourceFlow {
    pub fn slots(&self) -> &'static [&'static str] {
        match self {
            MultiSourceFlow::Comparison => &["predicted_file", "truth_file"],
            MultiSourceFlow::MultiYear => &["year1", "year2", "year3", "year4"],
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        match self {
            MultiSourceFlow::Comparison => Endpoint::BatchCompare,
            MultiSourceFlow::MultiYear => Endpoint::MultiYear,
        }
    }

    pub fn allow_list(&self) -> AllowList {
        match self {
            MultiSourceFlow::Comparison => AllowList::ExcelOrCsv,
            MultiSourceFlow::MultiYear => AllowList::Excel,
        }
    }
}

/// A validated multi-file request, remembering which slots were filled.
#[derive(Debug, Clone)]
pub struct MultiSourceRequest {
    pub flow: MultiSourceFlow,
    pub submitted: Vec<&'static str>,
    pub request: ServiceRequest,
}

/// Packs the flow's slots into one request.
///
/// `candidates` is matched to the flow's slots by position; missing trailing
/// entries count as empty. With every slot empty this fails with
/// `InsufficientInput` and nothing is sent.
pub fn collect(
    flow: MultiSourceFlow,
    candidates: Vec<Option<UploadCandidate>>,
) -> Result<MultiSourceRequest, ValidationError> {
    let mut candidates = candidates.into_iter();
    let slots: Vec<(&'static str, Option<UploadCandidate>)> = flow
        .slots()
        .iter()
        .map(|slot| (*slot, candidates.next().flatten()))
        .collect();

    let submitted: Vec<&'static str> = slots
        .iter()
        .filter(|(_, c)| c.is_some())
        .map(|(slot, _)| *slot)
        .collect();
    if submitted.is_empty() {
        return Err(ValidationError::InsufficientInput {
            slots: flow.slots().iter().map(|s| s.to_string()).collect(),
        });
    }
    debug!("{:?} submission with slots {:?}", flow, submitted);

    let form = build_upload_form(slots);
    Ok(MultiSourceRequest {
        flow,
        submitted,
        request: ServiceRequest::multipart(flow.endpoint(), form),
    })
}

#[derive(Debug, Deserialize)]
struct ComparisonBody {
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    correct: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    truth_column: Option<String>,
    #[serde(default)]
    matrix_data: Vec<Value>,
}

/// Comparison outcome. Accuracy figures are the service's own; `matrix` is re-shaped locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub accuracy: Option<f64>,
    pub correct: Option<u64>,
    pub total: Option<u64>,
    /// Whichever column the service picked as ground truth, shown as-is.
    pub truth_column: Option<String>,
    pub matrix: CrossTabMatrix,
}

pub fn interpret_comparison(body: Value) -> Result<ComparisonReport, ClientError> {
    let body: ComparisonBody = serde_json::from_value(body)
        .map_err(|e| ClientError::Decode(format!("comparison response: {e}")))?;
    let matrix = to_cross_tab_rows(&triples_from_matrix_rows(&body.matrix_data));
    Ok(ComparisonReport {
        accuracy: body.accuracy,
        correct: body.correct,
        total: body.total,
        truth_column: body.truth_column,
        matrix,
    })
}

/// Reads `chart_data` back onto the slots that were actually submitted.
pub fn interpret_multi_year(body: &Value, submitted: &[&str]) -> Result<TrendSeries, ClientError> {
    let records = body
        .get("chart_data")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::Decode("multi-year response has no chart_data".to_string()))?;
    Ok(trend_from_chart_records(records, submitted))
}
