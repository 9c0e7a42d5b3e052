use serde::{Deserialize, Serialize};

use crate::common::error::CacheError;
use crate::Map;

/// Declared namespace selector, as delivered by the external store. The
/// serialized form distinguishes an absent selector from an empty one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: Map<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Compiled form of an optional [`LabelSelector`]. An absent selector matches
/// nothing, an empty one matches everything.
#[derive(Debug, Clone)]
pub enum NamespaceSelector {
    Nothing,
    Everything,
    Matching(Vec<Requirement>),
}

#[derive(Debug, Clone)]
pub struct Requirement {
    key: String,
    operator: SelectorOperator,
    values: Vec<String>,
}

impl Requirement {
    fn new(
        key: String,
        operator: SelectorOperator,
        values: Vec<String>,
    ) -> Result<Requirement, CacheError> {
        match operator {
            SelectorOperator::In | SelectorOperator::NotIn if values.is_empty() => {
                Err(CacheError::InvalidSelector(format!(
                    "operator {operator:?} on key {key} requires at least one value"
                )))
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist if !values.is_empty() => {
                Err(CacheError::InvalidSelector(format!(
                    "operator {operator:?} on key {key} must not carry values"
                )))
            }
            _ => Ok(Requirement {
                key,
                operator,
                values,
            }),
        }
    }

    fn matches(&self, labels: &Map<String, String>) -> bool {
        match self.operator {
            SelectorOperator::In => labels
                .get(&self.key)
                .is_some_and(|value| self.values.contains(value)),
            SelectorOperator::NotIn => labels
                .get(&self.key)
                .map_or(true, |value| !self.values.contains(value)),
            SelectorOperator::Exists => labels.contains_key(&self.key),
            SelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl NamespaceSelector {
    pub fn compile(selector: Option<&LabelSelector>) -> Result<NamespaceSelector, CacheError> {
        let Some(selector) = selector else {
            return Ok(NamespaceSelector::Nothing);
        };
        if selector.match_labels.is_empty() && selector.match_expressions.is_empty() {
            return Ok(NamespaceSelector::Everything);
        }
        let mut requirements = Vec::with_capacity(
            selector.match_labels.len() + selector.match_expressions.len(),
        );
        for (key, value) in &selector.match_labels {
            requirements.push(Requirement::new(
                key.clone(),
                SelectorOperator::In,
                vec![value.clone()],
            )?);
        }
        for expression in &selector.match_expressions {
            requirements.push(Requirement::new(
                expression.key.clone(),
                expression.operator,
                expression.values.clone(),
            )?);
        }
        Ok(NamespaceSelector::Matching(requirements))
    }

    pub fn matches(&self, labels: &Map<String, String>) -> bool {
        match self {
            NamespaceSelector::Nothing => false,
            NamespaceSelector::Everything => true,
            NamespaceSelector::Matching(requirements) => requirements
                .iter()
                .all(|requirement| requirement.matches(labels)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_absent_selector_matches_nothing() {
        let selector = NamespaceSelector::compile(None).unwrap();
        assert!(!selector.matches(&labels(&[])));
        assert!(!selector.matches(&labels(&[("dep", "eng")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = NamespaceSelector::compile(Some(&LabelSelector::default())).unwrap();
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("dep", "eng")])));
    }

    #[test]
    fn test_match_labels() {
        let declared = LabelSelector {
            match_labels: labels(&[("dep", "eng")]),
            match_expressions: Vec::new(),
        };
        let selector = NamespaceSelector::compile(Some(&declared)).unwrap();
        assert!(selector.matches(&labels(&[("dep", "eng"), ("team", "batch")])));
        assert!(!selector.matches(&labels(&[("dep", "sales")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_match_expressions() {
        let declared = LabelSelector {
            match_labels: Map::default(),
            match_expressions: vec![
                LabelSelectorRequirement {
                    key: "dep".to_string(),
                    operator: SelectorOperator::In,
                    values: vec!["eng".to_string(), "research".to_string()],
                },
                LabelSelectorRequirement {
                    key: "deprecated".to_string(),
                    operator: SelectorOperator::DoesNotExist,
                    values: Vec::new(),
                },
            ],
        };
        let selector = NamespaceSelector::compile(Some(&declared)).unwrap();
        assert!(selector.matches(&labels(&[("dep", "eng")])));
        assert!(!selector.matches(&labels(&[("dep", "eng"), ("deprecated", "true")])));
        assert!(!selector.matches(&labels(&[("dep", "sales")])));
    }

    #[test]
    fn test_not_in_matches_missing_key() {
        let declared = LabelSelector {
            match_labels: Map::default(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "dep".to_string(),
                operator: SelectorOperator::NotIn,
                values: vec!["sales".to_string()],
            }],
        };
        let selector = NamespaceSelector::compile(Some(&declared)).unwrap();
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("dep", "eng")])));
        assert!(!selector.matches(&labels(&[("dep", "sales")])));
    }

    #[test]
    fn test_rejects_invalid_requirements() {
        let declared = LabelSelector {
            match_labels: Map::default(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "dep".to_string(),
                operator: SelectorOperator::In,
                values: Vec::new(),
            }],
        };
        let error = NamespaceSelector::compile(Some(&declared)).unwrap_err();
        assert!(matches!(error, CacheError::InvalidSelector(_)));
    }
}
