//! Request and response bodies exchanged with the prediction service.

use serde::{Deserialize, Serialize};

use crate::codec::EncodedFilePayload;
use crate::errors::ValidationError;
use crate::shaping::{to_legend_series, LegendEntry, LegendSeries, ProbabilityDistribution};

// ────────────────────────────────────────────────────────────────────────────
// Academic Performance Index calculator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreInputs {
    pub cgpa: f64,
    pub paid_internships: u32,
    pub unpaid_internships: u32,
    pub research_papers: u32,
    pub certificates: u32,
}

impl Default for ScoreInputs {
    fn default() -> Self {
        Self {
            cgpa: 7.5,
            paid_internships: 1,
            unpaid_internships: 0,
            research_papers: 2,
            certificates: 5,
        }
    }
}

impl ScoreInputs {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("cgpa", self.cgpa, 0.0, 10.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreLevel {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub cgpa_points: f64,
    pub internship_points: f64,
    pub research_points: f64,
    pub cert_points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreReport {
    pub total_score: f64,
    pub max_score: f64,
    pub level: ScoreLevel,
    pub feedback: String,
    pub breakdown: ScoreBreakdown,
}

impl ScoreReport {
    /// Breakdown as a pie-chart series, always in the same four-slice order.
    pub fn breakdown_series(&self) -> LegendSeries {
        let b = &self.breakdown;
        LegendSeries(
            [
                ("CGPA", b.cgpa_points),
                ("Internships", b.internship_points),
                ("Research", b.research_points),
                ("Certifications", b.cert_points),
            ]
            .into_iter()
            .map(|(label, value)| LegendEntry {
                label: label.to_string(),
                value,
            })
            .collect(),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Individual prediction
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum YesNo {
    Yes,
    No,
}

/// One student's form data, sent as JSON to the individual prediction endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StudentProfile {
    pub name: String,
    pub usn: String,
    pub gender: String,
    pub age: u32,
    pub cgpa: f64,
    pub branch: String,
    pub backlogs: u32,
    pub internships: u32,
    pub internship_type: String,
    pub research_papers: u32,
    pub projects: u32,
    pub certifications: u32,
    /// 1..=5
    pub technical_skills: u32,
    pub hackathons: u32,
    /// 1..=5
    pub soft_skills: u32,
    pub cocurricular_activities: YesNo,
    pub leadership_roles: YesNo,
    pub entrepreneur_cell: YesNo,
    pub family_business: YesNo,
}

impl Default for StudentProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            usn: String::new(),
            gender: "MALE".to_string(),
            age: 21,
            cgpa: 7.5,
            branch: "CSE".to_string(),
            backlogs: 0,
            internships: 1,
            internship_type: "Corporate".to_string(),
            research_papers: 0,
            projects: 2,
            certifications: 3,
            technical_skills: 3,
            hackathons: 0,
            soft_skills: 3,
            cocurricular_activities: YesNo::Yes,
            leadership_roles: YesNo::No,
            entrepreneur_cell: YesNo::No,
            family_business: YesNo::No,
        }
    }
}

impl StudentProfile {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("age", self.age as f64, 17.0, 30.0)?;
        check_range("cgpa", self.cgpa, 0.0, 10.0)?;
        check_range("technical_skills", self.technical_skills as f64, 1.0, 5.0)?;
        check_range("soft_skills", self.soft_skills as f64, 1.0, 5.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Individual prediction result. Older service builds answer with `prediction`,
/// newer cluster-based ones with `profile_name`; everything else is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IndividualPrediction {
    #[serde(default)]
    pub prediction: Option<String>,
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub probabilities: Option<ProbabilityDistribution>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub feature_importance: Option<Vec<FeatureImportance>>,
    #[serde(default)]
    pub roadmap: Option<Vec<String>>,
    #[serde(default)]
    pub suggested_roles: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
}

impl IndividualPrediction {
    pub fn headline(&self) -> Option<&str> {
        self.profile_name
            .as_deref()
            .or(self.prediction.as_deref())
    }

    pub fn probability_series(&self) -> LegendSeries {
        self.probabilities
            .as_ref()
            .map(to_legend_series)
            .unwrap_or_default()
    }

    /// The first `n` factors in the order the service ranked them.
    pub fn top_factors(&self, n: usize) -> LegendSeries {
        LegendSeries(
            self.feature_importance
                .iter()
                .flatten()
                .take(n)
                .map(|f| LegendEntry {
                    label: f.feature.clone(),
                    value: f.importance,
                })
                .collect(),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Batch prediction
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BatchPredictResponse {
    #[serde(flatten)]
    pub file: EncodedFilePayload,
    #[serde(default)]
    pub distribution: ProbabilityDistribution,
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min,
            max,
        })
    }
}
