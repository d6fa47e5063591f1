//! Class labels and prediction result formatting.

use crate::constants::{NUM_CLASSES, probability};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Wildfire image category.
///
/// Declaration order is the model's output order and the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassLabel {
    /// Visible flames.
    #[serde(rename = "Fire")]
    Fire,
    /// Neither flames nor smoke.
    #[serde(rename = "No Fire")]
    NoFire,
    /// Smoke without visible flames.
    #[serde(rename = "Smoke")]
    Smoke,
    /// Flames and smoke together.
    #[serde(rename = "SmokeFire")]
    SmokeFire,
}

impl ClassLabel {
    /// All labels in model output order.
    pub const ALL: [Self; NUM_CLASSES] = [Self::Fire, Self::NoFire, Self::Smoke, Self::SmokeFire];

    /// Wire name of the label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fire => "Fire",
            Self::NoFire => "No Fire",
            Self::Smoke => "Smoke",
            Self::SmokeFire => "SmokeFire",
        }
    }
}

impl std::fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability assigned to one class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    /// Class this entry describes.
    pub class_name: ClassLabel,
    /// Probability in `[0, 1]`.
    pub probability: f32,
}

/// Body of a successful prediction response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// One entry per class, most likely first.
    pub results: Vec<PredictionResult>,
}

impl From<[PredictionResult; NUM_CLASSES]> for PredictionResponse {
    fn from(results: [PredictionResult; NUM_CLASSES]) -> Self {
        Self {
            results: results.to_vec(),
        }
    }
}

/// Map raw class probabilities onto labels, most likely first.
///
/// Values are clamped into `[0, 1]`. Equal probabilities keep label order,
/// so the output is fully determined by the input.
pub fn format_predictions(probabilities: [f32; NUM_CLASSES]) -> [PredictionResult; NUM_CLASSES] {
    let mut results = ClassLabel::ALL.map(|label| PredictionResult {
        class_name: label,
        probability: 0.0,
    });
    for (result, p) in results.iter_mut().zip(probabilities) {
        result.probability = p.clamp(probability::MIN, probability::MAX);
    }

    // Stable sort preserves label order among ties.
    results.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(Ordering::Equal)
    });
    results
}

/// Label with the highest probability.
pub fn top_class(results: &[PredictionResult]) -> Option<ClassLabel> {
    results.first().map(|r| r.class_name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sorted_descending() {
        let results = format_predictions([0.1, 0.6, 0.05, 0.25]);
        let labels: Vec<_> = results.iter().map(|r| r.class_name).collect();
        assert_eq!(
            labels,
            vec![
                ClassLabel::NoFire,
                ClassLabel::SmokeFire,
                ClassLabel::Fire,
                ClassLabel::Smoke
            ]
        );
    }

    #[test]
    fn test_ties_follow_label_order() {
        let results = format_predictions([0.25, 0.25, 0.25, 0.25]);
        let labels: Vec<_> = results.iter().map(|r| r.class_name).collect();
        assert_eq!(labels, ClassLabel::ALL.to_vec());
    }

    #[test]
    fn test_numerical_noise_is_clamped() {
        let results = format_predictions([1.000_000_1, -1e-7, 0.0, 0.0]);
        assert_eq!(results[0].class_name, ClassLabel::Fire);
        assert_eq!(results[0].probability, 1.0);
        assert!(results.iter().all(|r| r.probability >= 0.0));
    }

    #[test]
    fn test_serializes_wire_names() {
        let response = PredictionResponse {
            results: format_predictions([0.0, 1.0, 0.0, 0.0]).to_vec(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.starts_with(r#"{"results":[{"className":"No Fire","probability":1.0}"#));
        assert!(json.contains(r#""className":"SmokeFire""#));
    }

    #[test]
    fn test_top_class() {
        let results = format_predictions([0.1, 0.1, 0.7, 0.1]);
        assert_eq!(top_class(&results), Some(ClassLabel::Smoke));
        assert_eq!(top_class(&[]), None);
    }

    proptest! {
        #[test]
        fn prop_one_entry_per_label(p in prop::array::uniform4(-0.5f32..1.5)) {
            let results = format_predictions(p);
            let mut labels: Vec<_> = results.iter().map(|r| r.class_name).collect();
            labels.sort();
            prop_assert_eq!(labels, ClassLabel::ALL.to_vec());
        }

        #[test]
        fn prop_probabilities_in_range(p in prop::array::uniform4(-10.0f32..10.0)) {
            for r in format_predictions(p) {
                prop_assert!((0.0..=1.0).contains(&r.probability));
            }
        }

        #[test]
        fn prop_sorted_descending(p in prop::array::uniform4(0.0f32..1.0)) {
            let results = format_predictions(p);
            for pair in results.windows(2) {
                prop_assert!(pair[0].probability >= pair[1].probability);
            }
        }

        #[test]
        fn prop_deterministic(p in prop::array::uniform4(0.0f32..1.0)) {
            let a = serde_json::to_string(&format_predictions(p).to_vec()).unwrap();
            let b = serde_json::to_string(&format_predictions(p).to_vec()).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
