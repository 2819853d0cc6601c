//! Result shaping: turns service payloads into chart-ready labeled records.
//!
//! Every function here is pure. Row, column and series order always follows
//! first-seen order in the input, never the iteration order of a map, so the
//! same input renders the same chart every time.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Ordered category -> probability (or count) mapping, keyed by unique labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbabilityDistribution {
    entries: Vec<(String, f64)>,
}

impl ProbabilityDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `label`. An overwrite keeps the label's original position.
    pub fn insert(&mut self, label: impl Into<String>, value: f64) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), *v))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L: Into<String>> FromIterator<(L, f64)> for ProbabilityDistribution {
    fn from_iter<I: IntoIterator<Item = (L, f64)>>(iter: I) -> Self {
        let mut dist = ProbabilityDistribution::new();
        for (label, value) in iter {
            dist.insert(label, value);
        }
        dist
    }
}

impl<'de> Deserialize<'de> for ProbabilityDistribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DistributionVisitor;

        impl<'de> Visitor<'de> for DistributionVisitor {
            type Value = ProbabilityDistribution;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category label to number")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut dist = ProbabilityDistribution::new();
                while let Some((label, value)) = map.next_entry::<String, f64>()? {
                    dist.insert(label, value);
                }
                Ok(dist)
            }
        }

        deserializer.deserialize_map(DistributionVisitor)
    }
}

impl Serialize for ProbabilityDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, value) in &self.entries {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Legend series
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    #[serde(rename = "name")]
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LegendSeries(pub Vec<LegendEntry>);

impl LegendSeries {
    pub fn entries(&self) -> &[LegendEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scales every value from a 0..1 fraction to a percentage.
    /// Apply once, to the whole series, never per entry.
    pub fn to_percent(&self) -> LegendSeries {
        LegendSeries(
            self.0
                .iter()
                .map(|e| LegendEntry {
                    label: e.label.clone(),
                    value: e.value * 100.0,
                })
                .collect(),
        )
    }
}

/// One legend entry per category, in the distribution's own order. Values are passed through.
pub fn to_legend_series(distribution: &ProbabilityDistribution) -> LegendSeries {
    LegendSeries(
        distribution
            .iter()
            .map(|(label, value)| LegendEntry {
                label: label.to_string(),
                value,
            })
            .collect(),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Cross tabulation
// ────────────────────────────────────────────────────────────────────────────

/// One (actual, predicted) observation. A missing count means a single record.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CrossTabTriple {
    pub actual: String,
    pub predicted: String,
    #[serde(default = "single_record")]
    pub count: u64,
}

fn single_record() -> u64 {
    1
}

impl CrossTabTriple {
    pub fn new(actual: impl Into<String>, predicted: impl Into<String>, count: u64) -> Self {
        Self {
            actual: actual.into(),
            predicted: predicted.into(),
            count,
        }
    }
}

/// A row of the cross tab. `cells` always covers every column of the matrix, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossTabRow {
    pub row_label: String,
    pub cells: Vec<(String, u64)>,
}

impl CrossTabRow {
    pub fn cell(&self, column: &str) -> Option<u64> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| *v)
    }

    pub fn total(&self) -> u64 {
        self.cells.iter().map(|(_, v)| v).sum()
    }
}

impl Serialize for CrossTabRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len() + 1))?;
        map.serialize_entry("name", &self.row_label)?;
        for (column, count) in &self.cells {
            map.serialize_entry(column, count)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrossTabMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<CrossTabRow>,
}

impl CrossTabMatrix {
    pub fn total(&self) -> u64 {
        self.rows.iter().map(CrossTabRow::total).sum()
    }

    /// Sum of the cells where actual and predicted labels agree.
    pub fn diagonal_total(&self) -> u64 {
        self.rows
            .iter()
            .filter_map(|row| row.cell(&row.row_label))
            .sum()
    }

    /// Fraction of matching records, or None for an empty matrix.
    pub fn accuracy(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.diagonal_total() as f64 / total as f64),
        }
    }
}

/// Groups triples by `actual` and accumulates counts per `predicted` label.
/// Every row carries every predicted label seen anywhere in the input, zero-filled.
pub fn to_cross_tab_rows(triples: &[CrossTabTriple]) -> CrossTabMatrix {
    let mut columns: Vec<String> = Vec::new();
    let mut column_index: HashMap<&str, usize> = HashMap::new();
    for triple in triples {
        if !column_index.contains_key(triple.predicted.as_str()) {
            column_index.insert(triple.predicted.as_str(), columns.len());
            columns.push(triple.predicted.clone());
        }
    }

    let mut row_labels: Vec<&str> = Vec::new();
    let mut row_index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<Vec<u64>> = Vec::new();
    for triple in triples {
        let row = *row_index.entry(triple.actual.as_str()).or_insert_with(|| {
            row_labels.push(triple.actual.as_str());
            counts.push(vec![0; columns.len()]);
            counts.len() - 1
        });
        counts[row][column_index[triple.predicted.as_str()]] += triple.count;
    }

    let rows = row_labels
        .into_iter()
        .zip(counts)
        .map(|(label, row_counts)| CrossTabRow {
            row_label: label.to_string(),
            cells: columns.iter().cloned().zip(row_counts).collect(),
        })
        .collect();

    CrossTabMatrix { columns, rows }
}

/// Flattens the service's `matrix_data` rows back into triples.
///
/// Each row names its actual label under `actual` (or `name`); every other
/// numeric field is a predicted label with its count. Non-numeric fields are ignored.
pub fn triples_from_matrix_rows(rows: &[Value]) -> Vec<CrossTabTriple> {
    let mut triples = Vec::new();
    for row in rows {
        let Some(object) = row.as_object() else {
            continue;
        };
        let label_key = if object.contains_key("actual") {
            "actual"
        } else {
            "name"
        };
        let Some(actual) = object.get(label_key).and_then(Value::as_str) else {
            continue;
        };
        for (predicted, value) in object {
            if predicted == label_key {
                continue;
            }
            if let Some(count) = value.as_u64() {
                triples.push(CrossTabTriple::new(actual, predicted.as_str(), count));
            }
        }
    }
    triples
}

// ────────────────────────────────────────────────────────────────────────────
// Trend series
// ────────────────────────────────────────────────────────────────────────────

/// One category bucket; `values` holds one entry per present series, in series order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendRow {
    pub bucket_label: String,
    pub values: Vec<(String, f64)>,
}

impl TrendRow {
    pub fn value(&self, series: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(s, _)| s == series)
            .map(|(_, v)| *v)
    }
}

impl Serialize for TrendRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("name", &self.bucket_label)?;
        for (series, value) in &self.values {
            map.serialize_entry(series, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendSeries {
    /// Only series that actually had input. An absent year has no key at all.
    pub series_keys: Vec<String>,
    pub rows: Vec<TrendRow>,
}

/// Builds one row per category seen in any present year.
///
/// `per_year[i]` pairs with `labels[i]`. A present year missing a category
/// reports 0 for it; an absent year contributes no series key.
pub fn to_trend_rows(
    per_year: &[Option<ProbabilityDistribution>],
    labels: &[&str],
) -> TrendSeries {
    let present: Vec<(&str, &ProbabilityDistribution)> = per_year
        .iter()
        .zip(labels)
        .filter_map(|(dist, label)| dist.as_ref().map(|d| (*label, d)))
        .collect();

    let mut buckets: Vec<&str> = Vec::new();
    for (_, dist) in &present {
        for label in dist.labels() {
            if !buckets.contains(&label) {
                buckets.push(label);
            }
        }
    }

    let rows = buckets
        .into_iter()
        .map(|bucket| TrendRow {
            bucket_label: bucket.to_string(),
            values: present
                .iter()
                .map(|(series, dist)| (series.to_string(), dist.get(bucket).unwrap_or(0.0)))
                .collect(),
        })
        .collect();

    TrendSeries {
        series_keys: present.iter().map(|(s, _)| s.to_string()).collect(),
        rows,
    }
}

/// Reads the service's `chart_data` records (`{name, year1?, ..}`) into per-slot
/// distributions, keeping only the submitted slots, then shapes them like `to_trend_rows`.
pub fn trend_from_chart_records(records: &[Value], submitted: &[&str]) -> TrendSeries {
    let mut per_slot = vec![ProbabilityDistribution::new(); submitted.len()];

    for record in records {
        let Some(bucket) = record.get("name").and_then(Value::as_str) else {
            continue;
        };
        for (slot, dist) in submitted.iter().zip(per_slot.iter_mut()) {
            let value = record.get(*slot).and_then(Value::as_f64).unwrap_or(0.0);
            dist.insert(bucket, value);
        }
    }

    let per_slot: Vec<_> = per_slot.into_iter().map(Some).collect();
    to_trend_rows(&per_slot, submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dist(pairs: &[(&str, f64)]) -> ProbabilityDistribution {
        pairs.iter().map(|(l, v)| (*l, *v)).collect()
    }

    #[test]
    fn test_distribution_deserialize_keeps_document_order() {
        let d: ProbabilityDistribution =
            serde_json::from_str(r#"{"Startup": 0.1, "Higher Studies": 0.3, "Placement": 0.6}"#)
                .expect("parses");
        let labels: Vec<_> = d.labels().collect();
        assert_eq!(labels, vec!["Startup", "Higher Studies", "Placement"]);
    }

    #[test]
    fn test_legend_series_preserves_order_and_count() {
        let d = dist(&[("Placement", 0.6), ("Higher Studies", 0.3), ("Startup", 0.1)]);
        let series = to_legend_series(&d);

        assert_eq!(series.len(), d.len());
        for (entry, (label, value)) in series.entries().iter().zip(d.iter()) {
            assert_eq!(entry.label, label);
            assert_eq!(entry.value, value);
        }
    }

    #[test]
    fn test_legend_series_is_idempotent() {
        let d = dist(&[("B", 2.0), ("A", 1.0)]);
        assert_eq!(to_legend_series(&d), to_legend_series(&d));
    }

    #[test]
    fn test_to_percent_scales_whole_series() {
        let d = dist(&[("Placement", 0.25), ("Startup", 0.75)]);
        let pct = to_legend_series(&d).to_percent();
        assert_eq!(pct.entries()[0].value, 25.0);
        assert_eq!(pct.entries()[1].value, 75.0);
    }

    #[test]
    fn test_legend_serializes_as_name_value_records() {
        let series = to_legend_series(&dist(&[("Placement", 3.0)]));
        assert_eq!(
            serde_json::to_value(&series).expect("serializes"),
            json!([{"name": "Placement", "value": 3.0}])
        );
    }

    #[test]
    fn test_cross_tab_example() {
        let triples = vec![
            CrossTabTriple::new("Placement", "Placement", 40),
            CrossTabTriple::new("Placement", "Startup", 10),
            CrossTabTriple::new("Startup", "Startup", 25),
        ];
        let matrix = to_cross_tab_rows(&triples);

        assert_eq!(matrix.columns, vec!["Placement", "Startup"]);
        assert_eq!(
            serde_json::to_value(&matrix.rows).expect("serializes"),
            json!([
                {"name": "Placement", "Placement": 40, "Startup": 10},
                {"name": "Startup", "Placement": 0, "Startup": 25}
            ])
        );
        assert_eq!(matrix.diagonal_total(), 65);
        assert_eq!(matrix.total(), 75);
        let accuracy = matrix.accuracy().expect("non-empty");
        assert!((accuracy - 65.0 / 75.0).abs() < 1e-12);
    }

    #[test]
    fn test_cross_tab_columns_uniform_and_sum_matches_records() {
        let labels = ["A", "B", "C", "D"];
        let triples: Vec<CrossTabTriple> = (0..37)
            .map(|i| CrossTabTriple {
                actual: labels[i % 3].to_string(),
                predicted: labels[(i * 7 + 1) % 4].to_string(),
                count: 1,
            })
            .collect();
        let matrix = to_cross_tab_rows(&triples);

        for row in &matrix.rows {
            let cols: Vec<_> = row.cells.iter().map(|(c, _)| c.clone()).collect();
            assert_eq!(cols, matrix.columns);
        }
        assert_eq!(matrix.total(), triples.len() as u64);
    }

    #[test]
    fn test_cross_tab_triple_count_defaults_to_one() {
        let triples: Vec<CrossTabTriple> = serde_json::from_value(json!([
            {"actual": "Placement", "predicted": "Startup"},
            {"actual": "Placement", "predicted": "Startup"}
        ]))
        .expect("parses");
        let matrix = to_cross_tab_rows(&triples);
        assert_eq!(matrix.rows[0].cell("Startup"), Some(2));
    }

    #[test]
    fn test_cross_tab_empty_input() {
        let matrix = to_cross_tab_rows(&[]);
        assert!(matrix.rows.is_empty());
        assert_eq!(matrix.accuracy(), None);
    }

    #[test]
    fn test_matrix_rows_are_flattened_and_zero_filled() {
        let rows = vec![
            json!({"name": "Placement", "Placement": 40, "Startup": 10}),
            json!({"name": "Startup", "Startup": 25}),
        ];
        let matrix = to_cross_tab_rows(&triples_from_matrix_rows(&rows));
        assert_eq!(matrix.rows[1].cell("Placement"), Some(0));
        assert_eq!(matrix.rows[1].cell("Startup"), Some(25));
    }

    #[test]
    fn test_matrix_rows_accept_actual_key() {
        let rows = vec![json!({"actual": "Dev", "Dev": 2, "QA": 1, "note": "x"})];
        let triples = triples_from_matrix_rows(&rows);
        assert_eq!(
            triples,
            vec![
                CrossTabTriple::new("Dev", "Dev", 2),
                CrossTabTriple::new("Dev", "QA", 1),
            ]
        );
    }

    #[test]
    fn test_trend_rows_union_and_zero_fill() {
        let per_year = vec![
            Some(dist(&[("Placement", 40.0), ("Startup", 5.0)])),
            None,
            Some(dist(&[("Placement", 30.0), ("Higher Studies", 12.0)])),
            None,
        ];
        let series = to_trend_rows(&per_year, &["year1", "year2", "year3", "year4"]);

        assert_eq!(series.series_keys, vec!["year1", "year3"]);
        let buckets: Vec<_> = series.rows.iter().map(|r| r.bucket_label.as_str()).collect();
        assert_eq!(buckets, vec!["Placement", "Startup", "Higher Studies"]);

        let startup = &series.rows[1];
        assert_eq!(startup.value("year1"), Some(5.0));
        assert_eq!(startup.value("year3"), Some(0.0));
        assert_eq!(startup.value("year2"), None);

        assert_eq!(
            serde_json::to_value(&series.rows[2]).expect("serializes"),
            json!({"name": "Higher Studies", "year1": 0.0, "year3": 12.0})
        );
    }

    #[test]
    fn test_trend_rows_with_every_subset() {
        let all = ["year1", "year2", "year3", "year4"];
        let inputs = [
            dist(&[("A", 1.0)]),
            dist(&[("B", 2.0)]),
            dist(&[("A", 3.0), ("C", 4.0)]),
            dist(&[("D", 5.0)]),
        ];
        for mask in 1u8..16 {
            let per_year: Vec<_> = (0..4)
                .map(|i| (mask & (1 << i) != 0).then(|| inputs[i].clone()))
                .collect();
            let series = to_trend_rows(&per_year, &all);

            for (i, year) in all.iter().enumerate() {
                let present = mask & (1 << i) != 0;
                assert_eq!(series.series_keys.contains(&year.to_string()), present);
                for row in &series.rows {
                    assert_eq!(row.value(year).is_some(), present);
                }
                if present {
                    for label in inputs[i].labels() {
                        assert!(series.rows.iter().any(|r| r.bucket_label == label));
                    }
                }
            }
        }
    }

    #[test]
    fn test_trend_from_chart_records_filters_to_submitted_slots() {
        let records = vec![
            json!({"name": "Placement", "year1": 40, "year2": 0, "year4": 12}),
            json!({"name": "Startup", "year4": 3}),
        ];
        let series = trend_from_chart_records(&records, &["year1", "year4"]);

        assert_eq!(series.series_keys, vec!["year1", "year4"]);
        assert_eq!(series.rows[1].value("year1"), Some(0.0));
        assert_eq!(series.rows[1].value("year4"), Some(3.0));
        assert_eq!(series.rows[0].value("year2"), None);
    }
}
