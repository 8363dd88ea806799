use crate::fs::Entry;
use serde::{Deserialize, Serialize};

/// What part of an entry a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    FileType,
    NamePattern,
    Date,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub condition_type: ConditionType,
    pub value: String,
    pub operator: ConditionOperator,
}

/// A named, reusable composite filter with its own destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub conditions: Vec<RuleCondition>,
    pub logical_operator: LogicalOperator,
    pub destination: String,
    pub preset: bool,
}

impl Rule {
    pub fn new(name: &str, conditions: Vec<RuleCondition>, logical_operator: LogicalOperator, destination: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            conditions,
            logical_operator,
            destination: destination.to_string(),
            preset: false,
        }
    }
}

/// Evaluate a rule against an entry. Pure, no I/O.
///
/// An empty condition list never matches, and an operator a condition's
/// value type does not support yields `false` rather than an error, so
/// one malformed rule cannot abort a batch.
pub fn rule_matches(entry: &Entry, rule: &Rule) -> bool {
    if rule.conditions.is_empty() {
        return false;
    }
    match rule.logical_operator {
        LogicalOperator::And => rule.conditions.iter().all(|c| condition_matches(entry, c)),
        LogicalOperator::Or => rule.conditions.iter().any(|c| condition_matches(entry, c)),
    }
}

fn condition_matches(entry: &Entry, condition: &RuleCondition) -> bool {
    match condition.condition_type {
        ConditionType::FileType => string_op(
            &entry.extension,
            &condition.value.to_lowercase(),
            condition.operator,
        ),
        ConditionType::NamePattern => string_op(
            &entry.name.to_lowercase(),
            &condition.value.to_lowercase(),
            condition.operator,
        ),
        ConditionType::Date => numeric_op(entry.modified, &condition.value, condition.operator),
        ConditionType::Size => numeric_op(entry.size as i64, &condition.value, condition.operator),
    }
}

fn string_op(subject: &str, value: &str, operator: ConditionOperator) -> bool {
    match operator {
        ConditionOperator::Equals => subject == value,
        ConditionOperator::Contains => subject.contains(value),
        ConditionOperator::StartsWith => subject.starts_with(value),
        ConditionOperator::EndsWith => subject.ends_with(value),
        // Numeric comparisons are not defined for strings
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => false,
    }
}

fn numeric_op(subject: i64, value: &str, operator: ConditionOperator) -> bool {
    let Ok(value) = value.trim().parse::<i64>() else {
        return false;
    };
    match operator {
        ConditionOperator::Equals => subject == value,
        ConditionOperator::GreaterThan => subject > value,
        ConditionOperator::LessThan => subject < value,
        _ => false,
    }
}

/// The fixed preset set, seeded into the rules table once when it is
/// empty. Each preset is an OR over FILE_TYPE-equals conditions.
static PRESETS: &[(&str, &str, &[&str])] = &[
    (
        "Music",
        "~/Music",
        &["mp3", "wav", "flac", "ogg", "m4a", "aac"],
    ),
    (
        "Images",
        "~/Pictures",
        &["jpg", "jpeg", "png", "gif", "bmp", "webp", "heic"],
    ),
    (
        "Documents",
        "~/Documents",
        &["pdf", "doc", "docx", "txt", "odt", "xls", "xlsx", "ppt", "pptx"],
    ),
    ("Archives", "~/Archives", &["zip", "rar", "7z", "tar", "gz"]),
];

pub fn preset_rules() -> Vec<Rule> {
    PRESETS
        .iter()
        .map(|(name, destination, extensions)| {
            let conditions = extensions
                .iter()
                .map(|ext| RuleCondition {
                    condition_type: ConditionType::FileType,
                    value: ext.to_string(),
                    operator: ConditionOperator::Equals,
                })
                .collect();
            let mut rule = Rule::new(name, conditions, LogicalOperator::Or, destination);
            rule.preset = true;
            rule
        })
        .collect()
}
