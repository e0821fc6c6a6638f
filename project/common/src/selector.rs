//! Label selectors as carried by workload controllers.
//!
//! A [`LabelSelector`] is the structured form found in a ReplicaSet spec. The
//! API server expects the flattened query form (`app=consul,tier in (a,b)`),
//! which [`LabelSelector::to_query_string`] produces.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    #[serde(rename = "matchLabels", default)]
    pub match_labels: HashMap<String, String>,
    #[serde(rename = "matchExpressions", default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("operator {operator:?} on key {key:?} requires at least one value")]
    MissingValues {
        key: String,
        operator: LabelSelectorOperator,
    },
    #[error("operator {operator:?} on key {key:?} does not accept values")]
    UnexpectedValues {
        key: String,
        operator: LabelSelectorOperator,
    },
    #[error("unknown selector operator {0:?}")]
    UnknownOperator(String),
    #[error("label key must not be empty")]
    EmptyKey,
}

impl TryFrom<&str> for LabelSelectorOperator {
    type Error = SelectorError;

    fn try_from(op: &str) -> Result<Self, Self::Error> {
        match op {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            other => Err(SelectorError::UnknownOperator(other.to_string())),
        }
    }
}

impl LabelSelector {
    /// A selector without any requirement selects every object.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn validate(&self) -> Result<(), SelectorError> {
        if self.match_labels.keys().any(|k| k.is_empty()) {
            return Err(SelectorError::EmptyKey);
        }
        for expr in self.match_expressions.iter() {
            if expr.key.is_empty() {
                return Err(SelectorError::EmptyKey);
            }
            match expr.operator {
                LabelSelectorOperator::In | LabelSelectorOperator::NotIn => {
                    if expr.values.is_empty() {
                        return Err(SelectorError::MissingValues {
                            key: expr.key.clone(),
                            operator: expr.operator,
                        });
                    }
                }
                LabelSelectorOperator::Exists | LabelSelectorOperator::DoesNotExist => {
                    if !expr.values.is_empty() {
                        return Err(SelectorError::UnexpectedValues {
                            key: expr.key.clone(),
                            operator: expr.operator,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Render the selector in the query form understood by the API server's
    /// `labelSelector` list parameter. Requirements are ordered by key so the
    /// output is stable.
    pub fn to_query_string(&self) -> Result<String, SelectorError> {
        self.validate()?;

        let mut requirements: Vec<(String, String)> = self
            .match_labels
            .iter()
            .map(|(k, v)| (k.clone(), format!("{k}={v}")))
            .collect();

        for expr in self.match_expressions.iter() {
            let mut values = expr.values.clone();
            values.sort();
            let rendered = match expr.operator {
                LabelSelectorOperator::In => format!("{} in ({})", expr.key, values.join(",")),
                LabelSelectorOperator::NotIn => {
                    format!("{} notin ({})", expr.key, values.join(","))
                }
                LabelSelectorOperator::Exists => expr.key.clone(),
                LabelSelectorOperator::DoesNotExist => format!("!{}", expr.key),
            };
            requirements.push((expr.key.clone(), rendered));
        }

        requirements.sort();
        Ok(requirements
            .into_iter()
            .map(|(_, r)| r)
            .collect::<Vec<_>>()
            .join(","))
    }

    /// Match selector against a label set: supports MatchLabels and MatchExpressions.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        for (k, v) in self.match_labels.iter() {
            match labels.get(k) {
                Some(val) if val == v => (),
                _ => return false,
            }
        }

        for expr in self.match_expressions.iter() {
            match &expr.operator {
                LabelSelectorOperator::In => match labels.get(&expr.key) {
                    Some(v) if expr.values.contains(v) => (),
                    _ => return false,
                },
                LabelSelectorOperator::NotIn => {
                    if let Some(v) = labels.get(&expr.key)
                        && expr.values.contains(v)
                    {
                        return false;
                    }
                }
                LabelSelectorOperator::Exists => {
                    if !labels.contains_key(&expr.key) {
                        return false;
                    }
                }
                LabelSelectorOperator::DoesNotExist => {
                    if labels.contains_key(&expr.key) {
                        return false;
                    }
                }
            }
        }

        true
    }
}
