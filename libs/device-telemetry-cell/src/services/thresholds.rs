use serde::{Deserialize, Serialize};

use crate::models::{CanonicalReading, Severity, ThresholdBreach};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdRule {
    pub reading_type: String,
    pub comparison: Comparison,
    pub limit: f64,
    pub severity: Severity,
    pub message: String,
    pub action_required: String,
}

impl ThresholdRule {
    pub fn new(
        reading_type: &str,
        comparison: Comparison,
        limit: f64,
        severity: Severity,
        message: &str,
        action_required: &str,
    ) -> Self {
        Self {
            reading_type: reading_type.to_string(),
            comparison,
            limit,
            severity,
            message: message.to_string(),
            action_required: action_required.to_string(),
        }
    }

    fn matches(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::Above => value > self.limit,
            Comparison::Below => value < self.limit,
        }
    }
}

/// Ordered clinical thresholds; the first rule matching a reading wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdTable {
    rules: Vec<ThresholdRule>,
}

impl ThresholdTable {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    pub fn evaluate(&self, reading: &CanonicalReading) -> Option<ThresholdBreach> {
        let value = reading.value.as_f64()?;

        self.rules
            .iter()
            .filter(|rule| rule.reading_type == reading.reading_type)
            .find(|rule| rule.matches(value))
            .map(|rule| ThresholdBreach {
                reading_type: reading.reading_type.clone(),
                severity: rule.severity,
                message: rule.message.clone(),
                action_required: rule.action_required.clone(),
            })
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        use Comparison::*;
        use Severity::*;

        Self::new(vec![
            ThresholdRule::new(
                "systolic_bp",
                Above,
                180.0,
                Critical,
                "hypertensive crisis",
                "Immediate clinical review; consider emergency referral",
            ),
            ThresholdRule::new(
                "systolic_bp",
                Above,
                140.0,
                Warning,
                "elevated BP",
                "Recheck blood pressure before the end of the visit",
            ),
            ThresholdRule::new(
                "oxygen_saturation",
                Below,
                90.0,
                Critical,
                "severe hypoxemia",
                "Immediate clinical review; assess need for supplemental oxygen",
            ),
            ThresholdRule::new(
                "oxygen_saturation",
                Below,
                95.0,
                Warning,
                "mild hypoxemia",
                "Recheck saturation and monitor",
            ),
            ThresholdRule::new("heart_rate", Above, 100.0, Warning, "tachycardia", "Review heart rate trend"),
            ThresholdRule::new("heart_rate", Below, 60.0, Warning, "bradycardia", "Review heart rate trend"),
        ])
    }
}
