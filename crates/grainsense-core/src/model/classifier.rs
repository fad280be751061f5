//! Species classifiers: multinomial logistic regression and a soft-voting
//! ensemble over logistic members.

use serde::{Deserialize, Serialize};

use super::{SpeciesClassifier, check_finite};
use crate::error::ModelError;

/// Linear classifier producing class probabilities.
///
/// With more than two classes, `coef` holds one row per class and the
/// probabilities are a softmax of the logits. A two-class model may carry a
/// single row, in which case the logit belongs to the second class and the
/// probabilities come from a sigmoid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub classes: Vec<String>,
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
}

impl LogisticRegression {
    fn is_binary(&self) -> bool {
        self.classes.len() == 2 && self.coef.len() == 1
    }

    pub fn validate(&self, name: &str) -> Result<(), ModelError> {
        validate_classes(name, &self.classes)?;
        let rows = if self.is_binary() { 1 } else { self.classes.len() };
        if self.coef.len() != rows {
            return Err(ModelError::DimensionMismatch {
                component: format!("{name}.coef"),
                expected: rows,
                actual: self.coef.len(),
            });
        }
        if self.intercept.len() != rows {
            return Err(ModelError::DimensionMismatch {
                component: format!("{name}.intercept"),
                expected: rows,
                actual: self.intercept.len(),
            });
        }
        let features = self.coef[0].len();
        if features == 0 {
            return Err(ModelError::InvalidParameter(format!(
                "{name}.coef has no features"
            )));
        }
        for (k, row) in self.coef.iter().enumerate() {
            if row.len() != features {
                return Err(ModelError::DimensionMismatch {
                    component: format!("{name}.coef[{k}]"),
                    expected: features,
                    actual: row.len(),
                });
            }
            check_finite(&format!("{name}.coef[{k}]"), row)?;
        }
        check_finite(&format!("{name}.intercept"), &self.intercept)
    }

    fn logits(&self, features: &[f64]) -> Vec<f64> {
        self.coef
            .iter()
            .zip(&self.intercept)
            .map(|(row, b)| row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }
}

impl SpeciesClassifier for LogisticRegression {
    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn input_dim(&self) -> usize {
        self.coef.first().map_or(0, Vec::len)
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        let logits = self.logits(features);
        if self.is_binary() {
            let p = sigmoid(logits[0]);
            return vec![1.0 - p, p];
        }
        softmax(&logits)
    }
}

/// Weighted average of member probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftVotingClassifier {
    pub classes: Vec<String>,
    pub members: Vec<LogisticRegression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
}

impl SoftVotingClassifier {
    pub fn validate(&self) -> Result<(), ModelError> {
        validate_classes("classifier", &self.classes)?;
        if self.members.is_empty() {
            return Err(ModelError::InvalidParameter(
                "classifier.members is empty".to_string(),
            ));
        }
        let features = self.members[0].input_dim();
        for (i, member) in self.members.iter().enumerate() {
            let name = format!("classifier.members[{i}]");
            member.validate(&name)?;
            if member.classes != self.classes {
                return Err(ModelError::ColumnMismatch(format!(
                    "{name} class order differs from the ensemble"
                )));
            }
            if member.input_dim() != features {
                return Err(ModelError::DimensionMismatch {
                    component: name,
                    expected: features,
                    actual: member.input_dim(),
                });
            }
        }
        if let Some(weights) = &self.weights {
            if weights.len() != self.members.len() {
                return Err(ModelError::DimensionMismatch {
                    component: "classifier.weights".to_string(),
                    expected: self.members.len(),
                    actual: weights.len(),
                });
            }
            check_finite("classifier.weights", weights)?;
            if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
                return Err(ModelError::InvalidParameter(
                    "classifier.weights must be non-negative with a positive sum".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl SpeciesClassifier for SoftVotingClassifier {
    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn input_dim(&self) -> usize {
        self.members.first().map_or(0, SpeciesClassifier::input_dim)
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        let mut acc = vec![0.0; self.classes.len()];
        let mut total_weight = 0.0;
        for (i, member) in self.members.iter().enumerate() {
            let weight = self.weights.as_ref().map_or(1.0, |w| w[i]);
            for (slot, p) in acc.iter_mut().zip(member.predict_proba(features)) {
                *slot += weight * p;
            }
            total_weight += weight;
        }
        acc.iter().map(|p| p / total_weight).collect()
    }
}

/// Serialized classifier variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierSpec {
    Logistic(LogisticRegression),
    SoftVoting(SoftVotingClassifier),
}

impl ClassifierSpec {
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Self::Logistic(model) => model.validate("classifier"),
            Self::SoftVoting(model) => model.validate(),
        }
    }

    #[must_use]
    pub fn into_boxed(self) -> Box<dyn SpeciesClassifier> {
        match self {
            Self::Logistic(model) => Box::new(model),
            Self::SoftVoting(model) => Box::new(model),
        }
    }
}

fn validate_classes(name: &str, classes: &[String]) -> Result<(), ModelError> {
    if classes.len() < 2 {
        return Err(ModelError::InvalidParameter(format!(
            "{name}.classes needs at least two species"
        )));
    }
    let mut seen = std::collections::HashSet::new();
    for class in classes {
        if !seen.insert(class.as_str()) {
            return Err(ModelError::InvalidParameter(format!(
                "{name}.classes lists `{class}` twice"
            )));
        }
    }
    Ok(())
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn three_way() -> LogisticRegression {
        LogisticRegression {
            classes: classes(&["milho", "soja", "trigo"]),
            coef: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, -1.0]],
            intercept: vec![0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn multinomial_probabilities_sum_to_one() {
        let model = three_way();
        model.validate("classifier").unwrap();
        let p = model.predict_proba(&[2.0, 0.5]);
        assert_eq!(p.len(), 3);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[0] > p[1] && p[1] > p[2]);
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let p = softmax(&[1000.0, 999.0]);
        assert!(p.iter().all(|v| v.is_finite()));
        assert!(p[0] > p[1]);
    }

    #[test]
    fn binary_single_row_uses_sigmoid() {
        let model = LogisticRegression {
            classes: classes(&["feijao", "soja"]),
            coef: vec![vec![1.0]],
            intercept: vec![0.0],
        };
        model.validate("classifier").unwrap();
        let p = model.predict_proba(&[0.0]);
        assert!((p[0] - 0.5).abs() < 1e-12 && (p[1] - 0.5).abs() < 1e-12);
        let p = model.predict_proba(&[10.0]);
        assert!(p[1] > 0.99);
    }

    #[test]
    fn validation_rejects_duplicate_classes() {
        let mut model = three_way();
        model.classes[2] = "milho".to_string();
        assert!(matches!(
            model.validate("classifier"),
            Err(ModelError::InvalidParameter(_))
        ));
    }

    #[test]
    fn validation_rejects_row_count_mismatch() {
        let mut model = three_way();
        model.intercept.pop();
        assert!(matches!(
            model.validate("classifier"),
            Err(ModelError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn soft_voting_averages_with_weights() {
        let a = LogisticRegression {
            classes: classes(&["milho", "soja"]),
            coef: vec![vec![0.0], vec![0.0]],
            intercept: vec![10.0, -10.0],
        };
        let b = LogisticRegression {
            classes: classes(&["milho", "soja"]),
            coef: vec![vec![0.0], vec![0.0]],
            intercept: vec![-10.0, 10.0],
        };
        let ensemble = SoftVotingClassifier {
            classes: classes(&["milho", "soja"]),
            members: vec![a, b],
            weights: Some(vec![3.0, 1.0]),
        };
        ensemble.validate().unwrap();
        let p = ensemble.predict_proba(&[0.0]);
        assert!((p[0] - 0.75).abs() < 1e-6, "{p:?}");
        assert!((p[1] - 0.25).abs() < 1e-6, "{p:?}");
    }

    #[test]
    fn soft_voting_requires_shared_class_order() {
        let mut member = three_way();
        member.classes.swap(0, 1);
        let ensemble = SoftVotingClassifier {
            classes: classes(&["milho", "soja", "trigo"]),
            members: vec![three_way(), member],
            weights: None,
        };
        assert!(matches!(
            ensemble.validate(),
            Err(ModelError::ColumnMismatch(_))
        ));
    }

    #[test]
    fn classifier_spec_is_tagged_by_kind() {
        let json = r#"{
            "kind": "logistic",
            "classes": ["milho", "soja"],
            "coef": [[1.0], [-1.0]],
            "intercept": [0.0, 0.0]
        }"#;
        let spec: ClassifierSpec = serde_json::from_str(json).unwrap();
        assert!(matches!(spec, ClassifierSpec::Logistic(_)));
        spec.validate().unwrap();
        let boxed = spec.into_boxed();
        assert_eq!(boxed.input_dim(), 1);
        assert_eq!(boxed.classes().len(), 2);
    }
}
