// 🏷️ Automation Rules - Rules as Data
// Condition/action rules that categorise and tag operations.
//
// Rules run in ascending priority order. The first enabled rule whose
// conditions ALL match supplies the updates; later rules are not consulted.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::db::{Operation, ReconciliationStatus};

/// Tolerance for EQUALS on amounts
const AMOUNT_EPSILON: f64 = 0.005;

// ============================================================================
// CONDITIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionField {
    Label,
    Amount,
    Source,
    HorseId,
    Tag,
    Payee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Equals,
    /// Case-insensitive substring
    Contains,
    /// Inclusive numeric range `value..=value_to`
    Between,
    GreaterThan,
    LessThan,
}

/// Rule values come from forms as either numbers or strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    Text(String),
}

impl ConditionValue {
    pub fn as_text(&self) -> String {
        match self {
            ConditionValue::Number(n) => n.to_string(),
            ConditionValue::Text(s) => s.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConditionValue::Number(n) => Some(*n),
            ConditionValue::Text(s) => s.trim().replace(',', ".").parse().ok(),
        }
    }
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        ConditionValue::Text(value.to_string())
    }
}

impl From<f64> for ConditionValue {
    fn from(value: f64) -> Self {
        ConditionValue::Number(value)
    }
}

/// Case folding shared by text conditions and tag de-duplication
fn fold_case(text: &str) -> String {
    text.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub field: ConditionField,

    #[serde(alias = "op")]
    pub operator: ConditionOperator,

    pub value: ConditionValue,

    /// Upper bound for BETWEEN
    #[serde(default)]
    pub value_to: Option<ConditionValue>,
}

impl RuleCondition {
    pub fn new(field: ConditionField, operator: ConditionOperator, value: impl Into<ConditionValue>) -> Self {
        RuleCondition {
            field,
            operator,
            value: value.into(),
            value_to: None,
        }
    }

    pub fn between(field: ConditionField, low: f64, high: f64) -> Self {
        RuleCondition {
            field,
            operator: ConditionOperator::Between,
            value: ConditionValue::Number(low),
            value_to: Some(ConditionValue::Number(high)),
        }
    }

    /// Unsupported field/operator combinations simply do not match.
    pub fn matches(&self, op: &Operation) -> bool {
        match self.field {
            ConditionField::Amount => self.matches_number(op.amount),
            ConditionField::Label => self.matches_text(&op.label),
            ConditionField::Source => self.matches_text(op.source.as_str()),
            ConditionField::HorseId => op.horse_id.as_deref().is_some_and(|h| self.matches_text(h)),
            ConditionField::Payee => op.payee.as_deref().is_some_and(|p| self.matches_text(p)),
            ConditionField::Tag => op.tags.iter().any(|t| self.matches_text(t)),
        }
    }

    fn matches_text(&self, text: &str) -> bool {
        let expected = fold_case(&self.value.as_text());
        let actual = fold_case(text);

        match self.operator {
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::Contains => actual.contains(&expected),
            _ => false,
        }
    }

    fn matches_number(&self, amount: f64) -> bool {
        let Some(value) = self.value.as_number() else {
            return false;
        };

        match self.operator {
            ConditionOperator::Equals => (amount - value).abs() < AMOUNT_EPSILON,
            ConditionOperator::GreaterThan => amount > value,
            ConditionOperator::LessThan => amount < value,
            ConditionOperator::Between => match self.value_to.as_ref().and_then(|v| v.as_number()) {
                Some(high) => amount >= value && amount <= high,
                None => false,
            },
            ConditionOperator::Contains => false,
        }
    }
}

// ============================================================================
// ACTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    SetCategory {
        #[serde(rename = "categoryId")]
        category_id: String,
        #[serde(rename = "subcategoryId", default)]
        subcategory_id: Option<String>,
    },
    SetHorse {
        #[serde(rename = "horseId")]
        horse_id: String,
    },
    AddTag {
        tag: String,
    },
    SetPayee {
        payee: String,
    },
    MarkReconciled,
    Exclude,
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRule {
    #[serde(default = "default_rule_id")]
    pub id: String,

    pub name: String,

    /// Lower runs first
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub conditions: Vec<RuleCondition>,

    #[serde(default)]
    pub actions: Vec<RuleAction>,
}

fn default_rule_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_enabled() -> bool {
    true
}

impl AutomationRule {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        AutomationRule {
            id: default_rule_id(),
            name: name.into(),
            priority,
            enabled: true,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn when(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn then(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    /// AND over all conditions. A rule without conditions never matches.
    pub fn matches(&self, op: &Operation) -> bool {
        self.enabled && !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(op))
    }
}

// ============================================================================
// UPDATES
// ============================================================================

/// Field updates produced by a matching rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub horse_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee: Option<String>,

    /// Full tag list after the rule's ADD_TAG actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconciliationStatus>,

    /// Rule that produced the updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl OperationUpdates {
    pub fn is_empty(&self) -> bool {
        self.category_id.is_none()
            && self.subcategory_id.is_none()
            && self.horse_id.is_none()
            && self.payee.is_none()
            && self.tags.is_none()
            && self.reconciliation.is_none()
    }

    fn from_rule(rule: &AutomationRule, op: &Operation) -> Self {
        let mut updates = OperationUpdates {
            rule_id: Some(rule.id.clone()),
            ..Default::default()
        };

        for action in &rule.actions {
            match action {
                RuleAction::SetCategory {
                    category_id,
                    subcategory_id,
                } => {
                    updates.category_id = Some(category_id.clone());
                    updates.subcategory_id = subcategory_id.clone();
                }
                RuleAction::SetHorse { horse_id } => updates.horse_id = Some(horse_id.clone()),
                RuleAction::SetPayee { payee } => updates.payee = Some(payee.clone()),
                RuleAction::AddTag { tag } => {
                    let tags = updates.tags.get_or_insert_with(|| op.tags.clone());
                    if !tags.iter().any(|t| fold_case(t) == fold_case(tag)) {
                        tags.push(tag.clone());
                    }
                }
                RuleAction::MarkReconciled => {
                    updates.reconciliation = Some(ReconciliationStatus::Reconciled)
                }
                RuleAction::Exclude => updates.reconciliation = Some(ReconciliationStatus::Excluded),
            }
        }

        updates
    }

    pub fn apply_to(&self, op: &mut Operation) {
        if let Some(category_id) = &self.category_id {
            op.category_id = Some(category_id.clone());
            op.subcategory_id = self.subcategory_id.clone();
        }
        if let Some(horse_id) = &self.horse_id {
            op.horse_id = Some(horse_id.clone());
        }
        if let Some(payee) = &self.payee {
            op.payee = Some(payee.clone());
        }
        if let Some(tags) = &self.tags {
            op.tags = tags.clone();
        }
        if let Some(reconciliation) = self.reconciliation {
            op.reconciliation = reconciliation;
        }
        if !self.is_empty() {
            op.touch();
        }
    }
}

/// Updates from the first rule (ascending priority) matching `op`.
/// Empty updates when nothing matches.
pub fn apply_automation_rules(op: &Operation, rules: &[AutomationRule]) -> OperationUpdates {
    let mut ordered: Vec<&AutomationRule> = rules.iter().collect();
    // Stable: equal priorities keep list order
    ordered.sort_by_key(|r| r.priority);

    ordered
        .into_iter()
        .find(|rule| rule.matches(op))
        .map(|rule| {
            debug!(rule = %rule.name, label = %op.label, "automation rule matched");
            OperationUpdates::from_rule(rule, op)
        })
        .unwrap_or_default()
}

// ============================================================================
// RULE ENGINE
// ============================================================================

/// Rule set kept sorted by priority
#[derive(Debug, Clone, Default)]
pub struct AutomationEngine {
    rules: Vec<AutomationRule>,
}

impl AutomationEngine {
    pub fn new() -> Self {
        AutomationEngine { rules: Vec::new() }
    }

    /// Load rules from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<AutomationRule> =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        Ok(AutomationEngine::from_rules(rules))
    }

    pub fn from_rules(mut rules: Vec<AutomationRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        AutomationEngine { rules }
    }

    pub fn add_rule(&mut self, rule: AutomationRule) {
        self.rules.push(rule);
        self.rules.sort_by_key(|r| r.priority);
    }

    pub fn evaluate(&self, op: &Operation) -> OperationUpdates {
        apply_automation_rules(op, &self.rules)
    }

    /// Apply the matching rule in place. Returns true when something changed.
    pub fn apply(&self, op: &mut Operation) -> bool {
        let updates = self.evaluate(op);
        updates.apply_to(op);
        !updates.is_empty()
    }

    pub fn rules(&self) -> &[AutomationRule] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
