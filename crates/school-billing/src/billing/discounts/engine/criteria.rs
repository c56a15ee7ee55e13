use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::super::domain::{CriterionType, DiscountPolicy};
use super::super::eligibility::EligibilityContext;
use super::config::EngineConfig;

/// Decoded eligibility rule; one variant per criterion type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    Always,
    SiblingCount(SiblingThreshold),
    StaffChild,
    Religion(ReligionMatch),
}

/// `None` defers to [`EngineConfig::default_min_siblings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingThreshold {
    pub min_children: Option<u32>,
}

/// Ids win over names, names over the baptized flag. Names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReligionMatch {
    pub religion_ids: Vec<String>,
    pub religion_names: Vec<String>,
    pub is_baptized: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CriterionError {
    #[error("unrecognized criterion type '{0}'")]
    UnknownType(String),
    #[error("malformed {criterion} config: {message}")]
    MalformedConfig {
        criterion: &'static str,
        message: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SiblingConfig {
    #[serde(default, alias = "min")]
    min_children: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReligionConfig {
    #[serde(default)]
    religion_id: Option<String>,
    #[serde(default)]
    religion_ids: Vec<String>,
    #[serde(default)]
    religion_name: Option<String>,
    #[serde(default)]
    religion_names: Vec<String>,
    #[serde(default)]
    is_baptized: Option<bool>,
}

impl Criterion {
    pub fn for_policy(policy: &DiscountPolicy) -> Result<Self, CriterionError> {
        Self::decode(&policy.criterion_type, policy.criterion_config.as_ref())
    }

    pub fn decode(criterion_type: &str, config: Option<&Value>) -> Result<Self, CriterionError> {
        let kind = CriterionType::parse(criterion_type)
            .ok_or_else(|| CriterionError::UnknownType(criterion_type.to_string()))?;

        match kind {
            CriterionType::Always => Ok(Criterion::Always),
            CriterionType::StaffChild => Ok(Criterion::StaffChild),
            CriterionType::SiblingCount => {
                let parsed: SiblingConfig = parse_config(kind, config)?;
                let min_children = match parsed.min_children {
                    None => None,
                    Some(value) if value >= 1 && value <= u32::MAX as i64 => Some(value as u32),
                    Some(value) => {
                        return Err(CriterionError::MalformedConfig {
                            criterion: kind.as_str(),
                            message: format!("minChildren must be a positive integer, got {value}"),
                        })
                    }
                };
                Ok(Criterion::SiblingCount(SiblingThreshold { min_children }))
            }
            CriterionType::Religion => {
                let parsed: ReligionConfig = parse_config(kind, config)?;
                let religion_ids = parsed
                    .religion_id
                    .into_iter()
                    .chain(parsed.religion_ids)
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect();
                let religion_names = parsed
                    .religion_name
                    .into_iter()
                    .chain(parsed.religion_names)
                    .map(|name| name.trim().to_lowercase())
                    .filter(|name| !name.is_empty())
                    .collect();
                Ok(Criterion::Religion(ReligionMatch {
                    religion_ids,
                    religion_names,
                    is_baptized: parsed.is_baptized,
                }))
            }
        }
    }

    pub fn matches(&self, context: &EligibilityContext, config: &EngineConfig) -> bool {
        match self {
            Criterion::Always => true,
            Criterion::SiblingCount(threshold) => {
                let min = threshold
                    .min_children
                    .unwrap_or(config.default_min_siblings);
                context.sibling_count >= min
            }
            Criterion::StaffChild => context.is_staff_child,
            Criterion::Religion(rule) => rule.matches(context),
        }
    }
}

impl ReligionMatch {
    fn matches(&self, context: &EligibilityContext) -> bool {
        if !self.religion_ids.is_empty() {
            return context
                .religion_id
                .as_ref()
                .map_or(false, |id| self.religion_ids.iter().any(|wanted| wanted == id));
        }
        if !self.religion_names.is_empty() {
            let recorded = context
                .religion_name
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            return self.religion_names.iter().any(|wanted| *wanted == recorded);
        }
        match self.is_baptized {
            Some(expected) => context.is_baptized == expected,
            None => false,
        }
    }
}

fn parse_config<T: DeserializeOwned>(
    kind: CriterionType,
    config: Option<&Value>,
) -> Result<T, CriterionError> {
    let value = match config {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value @ Value::Object(_)) => value.clone(),
        Some(other) => {
            return Err(CriterionError::MalformedConfig {
                criterion: kind.as_str(),
                message: format!("expected an object, got {other}"),
            })
        }
    };

    serde_json::from_value(value).map_err(|err| CriterionError::MalformedConfig {
        criterion: kind.as_str(),
        message: err.to_string(),
    })
}
