//! Per-reading air quality classification
//!
//! `ReadingClassifier` is the seam for downstream classifiers. The bundled
//! `ThresholdClassifier` maps PM2.5 values onto three bands.

use crate::pipeline::config::PipelineConfig;
use crate::pipeline::types::Reading;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AirQualityLabel {
    Green,
    Yellow,
    Red,
}

impl AirQualityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AirQualityLabel::Green => "GREEN",
            AirQualityLabel::Yellow => "YELLOW",
            AirQualityLabel::Red => "RED",
        }
    }
}

impl fmt::Display for AirQualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown air quality label '{0}'")]
pub struct UnknownLabel(String);

impl FromStr for AirQualityLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GREEN" => Ok(AirQualityLabel::Green),
            "YELLOW" => Ok(AirQualityLabel::Yellow),
            "RED" => Ok(AirQualityLabel::Red),
            _ => Err(UnknownLabel(s.to_string())),
        }
    }
}

/// Classifies a single reading value
pub trait ReadingClassifier: Send + Sync {
    fn classify(&self, value: f64) -> AirQualityLabel;

    /// Classifier name for logging
    fn name(&self) -> &'static str;
}

/// Fixed PM2.5 bands: GREEN below `yellow_from`, RED from `red_from` up
#[derive(Debug, Clone, Copy)]
pub struct ThresholdClassifier {
    pub yellow_from: f64,
    pub red_from: f64,
}

impl ThresholdClassifier {
    pub fn new(yellow_from: f64, red_from: f64) -> Self {
        Self {
            yellow_from,
            red_from: red_from.max(yellow_from),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.classify_yellow_from, config.classify_red_from)
    }
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self::new(36.0, 54.0)
    }
}

impl ReadingClassifier for ThresholdClassifier {
    fn classify(&self, value: f64) -> AirQualityLabel {
        if value >= self.red_from {
            AirQualityLabel::Red
        } else if value >= self.yellow_from {
            AirQualityLabel::Yellow
        } else {
            AirQualityLabel::Green
        }
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassifiedReading {
    pub ts: i64,
    pub value: f64,
    pub label: AirQualityLabel,
}

/// Per-label counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationSummary {
    pub green: usize,
    pub yellow: usize,
    pub red: usize,
}

impl ClassificationSummary {
    pub fn record(&mut self, label: AirQualityLabel) {
        match label {
            AirQualityLabel::Green => self.green += 1,
            AirQualityLabel::Yellow => self.yellow += 1,
            AirQualityLabel::Red => self.red += 1,
        }
    }

    pub fn count(&self, label: AirQualityLabel) -> usize {
        match label {
            AirQualityLabel::Green => self.green,
            AirQualityLabel::Yellow => self.yellow,
            AirQualityLabel::Red => self.red,
        }
    }

    pub fn total(&self) -> usize {
        self.green + self.yellow + self.red
    }
}

/// Classify every reading in order
pub fn classify_all(
    classifier: &dyn ReadingClassifier,
    readings: &[Reading],
) -> (Vec<ClassifiedReading>, ClassificationSummary) {
    let mut summary = ClassificationSummary::default();
    let classified = readings
        .iter()
        .map(|reading| {
            let label = classifier.classify(reading.value);
            summary.record(label);
            ClassifiedReading {
                ts: reading.timestamp,
                value: reading.value,
                label,
            }
        })
        .collect();

    (classified, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_bands() {
        let classifier = ThresholdClassifier::default();

        assert_eq!(classifier.classify(0.0), AirQualityLabel::Green);
        assert_eq!(classifier.classify(35.9), AirQualityLabel::Green);
        assert_eq!(classifier.classify(36.0), AirQualityLabel::Yellow);
        assert_eq!(classifier.classify(53.99), AirQualityLabel::Yellow);
        assert_eq!(classifier.classify(54.0), AirQualityLabel::Red);
        assert_eq!(classifier.classify(300.0), AirQualityLabel::Red);
    }

    #[test]
    fn test_classify_all_counts() {
        let readings: Vec<Reading> = [5.0, 40.0, 80.0, 12.0, 60.0]
            .iter()
            .enumerate()
            .map(|(i, v)| Reading::new(1_700_000_000 + i as i64, *v))
            .collect();

        let (classified, summary) = classify_all(&ThresholdClassifier::default(), &readings);

        assert_eq!(classified.len(), 5);
        assert_eq!(classified[1].label, AirQualityLabel::Yellow);
        assert_eq!(summary, ClassificationSummary { green: 2, yellow: 1, red: 2 });
        assert_eq!(summary.total(), readings.len());
        assert_eq!(summary.count(AirQualityLabel::Red), 2);
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("green".parse::<AirQualityLabel>().unwrap(), AirQualityLabel::Green);
        assert_eq!(" RED ".parse::<AirQualityLabel>().unwrap(), AirQualityLabel::Red);
        assert!("purple".parse::<AirQualityLabel>().is_err());
        assert_eq!(serde_json::to_string(&AirQualityLabel::Yellow).unwrap(), "\"YELLOW\"");
    }

    #[test]
    fn test_inverted_bands_collapse() {
        let classifier = ThresholdClassifier::new(50.0, 20.0);
        assert_eq!(classifier.classify(30.0), AirQualityLabel::Green);
        assert_eq!(classifier.classify(50.0), AirQualityLabel::Red);
    }
}
