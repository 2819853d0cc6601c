//! One session's worth of sections, each with its own request slot.
//!
//! A section's error or success never touches another section's state.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::aggregator::{
    collect, interpret_comparison, interpret_multi_year, ComparisonReport, MultiSourceFlow,
};
use crate::chat::ChatSession;
use crate::codec::{build_upload_form, DownloadDir, UploadCandidate};
use crate::errors::{ClientError, ValidationError};
use crate::lifecycle::{RequestSlot, RequestState, RetainPolicy};
use crate::prediction::{
    BatchPredictResponse, IndividualPrediction, ScoreInputs, ScoreReport, StudentProfile,
};
use crate::service::{Endpoint, PredictionTransport, ServiceRequest};
use crate::shaping::{to_legend_series, LegendSeries, TrendSeries};

/// Outcome of a batch prediction: where the result file went, plus its distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub saved_to: PathBuf,
    pub distribution: LegendSeries,
}

/// Multi-year outcome, tagged with the slots that were actually submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendOutcome {
    pub submitted: Vec<String>,
    pub series: TrendSeries,
}

pub struct PredictorSession {
    transport: Arc<dyn PredictionTransport>,
    downloads: DownloadDir,
    pub health: RequestSlot<Value>,
    pub score: RequestSlot<ScoreReport>,
    pub batch: RequestSlot<BatchOutcome>,
    pub compare: RequestSlot<ComparisonReport>,
    pub trend: RequestSlot<TrendOutcome>,
    pub individual: RequestSlot<IndividualPrediction>,
    pub chat: ChatSession,
}

impl PredictorSession {
    pub fn new(transport: Arc<dyn PredictionTransport>, downloads: DownloadDir) -> Self {
        Self {
            chat: ChatSession::new(transport.clone()),
            transport,
            downloads,
            health: RequestSlot::new("health"),
            score: RequestSlot::with_policy("score", RetainPolicy::KeepUntilSettled),
            batch: RequestSlot::new("batch"),
            compare: RequestSlot::new("compare"),
            trend: RequestSlot::new("trend"),
            individual: RequestSlot::with_policy("individual", RetainPolicy::KeepUntilSettled),
        }
    }

    pub async fn check_health(&self) -> RequestState<Value> {
        let request = ServiceRequest::get(Endpoint::Health);
        self.health.submit(self.transport.send(&request)).await
    }

    pub async fn compute_score(&self, inputs: &ScoreInputs) -> RequestState<ScoreReport> {
        if let Err(e) = inputs.validate() {
            return self.score.reject(e.into());
        }
        self.score
            .submit(async {
                let request = ServiceRequest::json(Endpoint::ComputeScore, encode(inputs)?);
                let body = self.transport.send(&request).await?;
                decode(body, "score")
            })
            .await
    }

    /// Uploads one spreadsheet, saves the returned predictions file and shapes the distribution.
    ///
    /// The file is written only if this submission is still the latest one when
    /// its response arrives.
    pub async fn predict_batch(
        &self,
        candidate: Option<UploadCandidate>,
    ) -> RequestState<BatchOutcome> {
        let request = match collect_single(candidate) {
            Ok(request) => request,
            Err(e) => return self.batch.reject(e),
        };

        let ticket = self.batch.begin();
        let response = match self.transport.send(&request).await {
            Ok(body) => decode::<BatchPredictResponse>(body, "batch"),
            Err(e) => Err(e),
        };
        if !self.batch.is_current(ticket) {
            warn!("[batch] superseded response dropped, result file not saved");
            return self.batch.state();
        }

        let outcome = response.and_then(|response| {
            let saved_to = self.downloads.save(&response.file)?;
            info!("Batch predictions saved to {}", saved_to.display());
            Ok(BatchOutcome {
                saved_to,
                distribution: to_legend_series(&response.distribution),
            })
        });
        self.batch.settle(ticket, outcome);
        self.batch.state()
    }

    pub async fn compare(
        &self,
        predicted: Option<UploadCandidate>,
        truth: Option<UploadCandidate>,
    ) -> RequestState<ComparisonReport> {
        let collected = match collect(MultiSourceFlow::Comparison, vec![predicted, truth]) {
            Ok(collected) => collected,
            Err(e) => return self.compare.reject(e.into()),
        };
        self.compare
            .submit(async {
                let body = self.transport.send(&collected.request).await?;
                interpret_comparison(body)
            })
            .await
    }

    /// `years` pairs positionally with year1..year4.
    pub async fn multi_year(&self, years: Vec<Option<UploadCandidate>>) -> RequestState<TrendOutcome> {
        let collected = match collect(MultiSourceFlow::MultiYear, years) {
            Ok(collected) => collected,
            Err(e) => return self.trend.reject(e.into()),
        };
        self.trend
            .submit(async {
                let body = self.transport.send(&collected.request).await?;
                let series = interpret_multi_year(&body, &collected.submitted)?;
                Ok(TrendOutcome {
                    submitted: collected.submitted.iter().map(|s| s.to_string()).collect(),
                    series,
                })
            })
            .await
    }

    /// Predicts one profile; a success also refreshes the chat's derived context.
    pub async fn predict_individual(
        &self,
        profile: &StudentProfile,
    ) -> RequestState<IndividualPrediction> {
        if let Err(e) = profile.validate() {
            return self.individual.reject(e.into());
        }
        let state = self
            .individual
            .submit(async {
                let request = ServiceRequest::json(Endpoint::IndividualPredict, encode(profile)?);
                let body = self.transport.send(&request).await?;
                decode(body, "individual prediction")
            })
            .await;
        if let RequestState::Succeeded(prediction) = &state {
            self.chat.observe_prediction(prediction);
        }
        state
    }
}

fn collect_single(candidate: Option<UploadCandidate>) -> Result<ServiceRequest, ClientError> {
    let form = build_upload_form([("file", candidate)]);
    if form.is_empty() {
        return Err(ValidationError::InsufficientInput {
            slots: vec!["file".to_string()],
        }
        .into());
    }
    Ok(ServiceRequest::multipart(Endpoint::BatchPredict, form))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|e| ClientError::Decode(format!("request body: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(body: Value, what: &str) -> Result<T, ClientError> {
    serde_json::from_value(body).map_err(|e| ClientError::Decode(format!("{what} response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    use crate::codec::{validate, AllowList};
    use crate::testing::{GatedTransport, ScriptedTransport};

    fn session_with(transport: Arc<dyn PredictionTransport>) -> (PredictorSession, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = PredictorSession::new(transport, DownloadDir::new(dir.path()));
        (session, dir)
    }

    fn sheet(name: &str) -> Option<UploadCandidate> {
        Some(validate(name, Bytes::from_static(b"sheet"), AllowList::ExcelOrCsv).expect("valid"))
    }

    #[tokio::test]
    async fn test_zero_files_never_reach_the_network() {
        let transport = ScriptedTransport::new(vec![]);
        let (session, _dir) = session_with(transport.clone());

        let trend = session.multi_year(vec![None, None, None, None]).await;
        let compare = session.compare(None, None).await;
        let batch = session.predict_batch(None).await;

        assert!(trend.error().is_some());
        assert!(compare.error().is_some());
        assert!(batch.error().is_some());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_saves_file_and_shapes_distribution() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "success": true,
            "file_base64": "cmVzdWx0cw==",
            "filename": "career_predictions.xlsx",
            "distribution": {"Placement": 8, "Higher Studies": 3, "Startup": 1}
        }))]);
        let (session, dir) = session_with(transport.clone());

        let state = session.predict_batch(sheet("students.xlsx")).await;

        let outcome = state.value().expect("succeeded");
        assert_eq!(outcome.saved_to, dir.path().join("career_predictions.xlsx"));
        assert_eq!(std::fs::read(&outcome.saved_to).expect("read"), b"results");
        let labels: Vec<_> = outcome
            .distribution
            .entries()
            .iter()
            .map(|e| e.label.as_str())
            .collect();
        assert_eq!(labels, ["Placement", "Higher Studies", "Startup"]);
        assert_eq!(transport.calls()[0].slots, vec!["file"]);
    }

    #[tokio::test]
    async fn test_batch_without_success_flag_fails_and_saves_nothing() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"file_base64": "aGk="}))]);
        let (session, dir) = session_with(transport);

        let state = session.predict_batch(sheet("students.xlsx")).await;

        assert!(state.error().is_some());
        assert_eq!(std::fs::read_dir(dir.path()).expect("list").count(), 0);
    }

    #[tokio::test]
    async fn test_section_errors_are_independent() {
        let transport = ScriptedTransport::new(vec![
            Ok(json!({"prediction": "Placement", "confidence": 0.7})),
            Ok(json!({"error": "Could not find a truth column"})),
        ]);
        let (session, _dir) = session_with(transport);

        session.predict_individual(&StudentProfile::default()).await;
        let compare = session.compare(sheet("pred.xlsx"), sheet("truth.csv")).await;

        assert_eq!(compare.error(), Some("Could not find a truth column"));
        assert_eq!(
            session.individual.state().value().and_then(|p| p.headline()),
            Some("Placement")
        );
    }

    #[tokio::test]
    async fn test_individual_success_feeds_chat_context() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "profile_name": "Research Oriented",
            "suggested_roles": ["Data Analyst", "Research Intern"]
        }))]);
        let (session, _dir) = session_with(transport);

        session.predict_individual(&StudentProfile::default()).await;

        let context = session.chat.context();
        assert_eq!(context.profile_name.as_deref(), Some("Research Oriented"));
        assert_eq!(context.roles.as_deref(), Some("Data Analyst, Research Intern"));
    }

    #[tokio::test]
    async fn test_invalid_profile_is_rejected_locally() {
        let transport = ScriptedTransport::new(vec![]);
        let (session, _dir) = session_with(transport.clone());
        let profile = StudentProfile {
            cgpa: 11.0,
            ..StudentProfile::default()
        };

        let state = session.predict_individual(&profile).await;

        assert_eq!(state.error(), Some("cgpa must be between 0 and 10"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_score_request_carries_inputs() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "total_score": 8.6,
            "max_score": 10,
            "level": "excellent",
            "feedback": "Excellent Profile!",
            "breakdown": {
                "cgpa_points": 1.8,
                "internship_points": 4.0,
                "research_points": 1.0,
                "cert_points": 1.8
            }
        }))]);
        let (session, _dir) = session_with(transport.clone());

        let inputs = ScoreInputs {
            cgpa: 9.0,
            paid_internships: 2,
            ..ScoreInputs::default()
        };
        let state = session.compute_score(&inputs).await;

        assert_eq!(state.value().map(|r| r.total_score), Some(8.6));
        let sent = transport.calls()[0].json.clone().expect("json body");
        assert_eq!(sent["cgpa"], 9.0);
        assert_eq!(sent["paid_internships"], 2);
    }

    #[tokio::test]
    async fn test_multi_year_reports_submitted_slots() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "success": true,
            "chart_data": [
                {"name": "Placement", "year2": 30, "year3": 22},
                {"name": "Startup", "year3": 4}
            ]
        }))]);
        let (session, _dir) = session_with(transport.clone());

        let state = session
            .multi_year(vec![None, sheet("2022.xlsx"), sheet("2023.xlsx"), None])
            .await;

        let outcome = state.value().expect("succeeded");
        assert_eq!(outcome.submitted, vec!["year2", "year3"]);
        assert_eq!(outcome.series.rows[1].value("year2"), Some(0.0));
        let call = &transport.calls()[0];
        assert_eq!(call.endpoint, Endpoint::MultiYear);
        assert_eq!(call.slots, vec!["year2", "year3"]);
    }

    #[tokio::test]
    async fn test_malformed_score_body_shows_generic_message() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"total_score": 5.0}))]);
        let (session, _dir) = session_with(transport);

        let state = session.compute_score(&ScoreInputs::default()).await;

        assert_eq!(state.error(), Some(crate::errors::GENERIC_FAILURE_MESSAGE));
        assert_eq!(state.failure().map(|f| f.code), Some("DECODE_ERROR"));
    }

    #[tokio::test]
    async fn test_superseded_batch_leaves_no_file_behind() {
        let (transport, mut gates) = GatedTransport::new(2);
        let (session, dir) = session_with(transport);
        let second_gate = gates.pop().expect("gate");
        let first_gate = gates.pop().expect("gate");

        let first = session.predict_batch(sheet("old.xlsx"));
        let second = session.predict_batch(sheet("new.xlsx"));
        let arrivals = async move {
            second_gate
                .send(json!({"success": true, "file_base64": "bmV3", "filename": "new.xlsx"}))
                .ok();
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            first_gate
                .send(json!({"success": true, "file_base64": "b2xk", "filename": "old.xlsx"}))
                .ok();
        };

        tokio::join!(first, second, arrivals);

        let mut saved: Vec<_> = std::fs::read_dir(dir.path())
            .expect("list")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        saved.sort();
        assert_eq!(saved, vec!["new.xlsx"]);
        assert_eq!(
            session.batch.state().value().map(|o| o.saved_to.clone()),
            Some(dir.path().join("new.xlsx"))
        );
    }

    #[tokio::test]
    async fn test_second_submission_wins_when_first_arrives_last() {
        let (transport, mut gates) = GatedTransport::new(2);
        let (session, _dir) = session_with(transport);
        let second_gate = gates.pop().expect("gate");
        let first_gate = gates.pop().expect("gate");

        let first = session.compare(sheet("old.xlsx"), sheet("truth.xlsx"));
        let second = session.compare(sheet("new.xlsx"), sheet("truth.xlsx"));
        let arrivals = async move {
            second_gate
                .send(json!({"success": true, "truth_column": "new", "matrix_data": []}))
                .ok();
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            first_gate
                .send(json!({"success": true, "truth_column": "old", "matrix_data": []}))
                .ok();
        };

        let (_, _, _) = tokio::join!(first, second, arrivals);

        let state = session.compare.state();
        assert_eq!(
            state.value().and_then(|r| r.truth_column.as_deref()),
            Some("new")
        );
    }
}
