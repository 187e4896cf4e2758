// Stable Ledger - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod error;
pub mod config;
pub mod db;
pub mod entities;
pub mod budget;          // Envelopes, balances, totals, burn rate
pub mod automation;      // Automation rules on operations
pub mod recurrence;      // RRULE build / parse / expand
pub mod health;
pub mod training;
pub mod recommendations; // Action cards
pub mod store;

// Re-export commonly used types
pub use error::{LedgerError, LedgerResult};
pub use config::AppConfig;
pub use db::{
    Operation, OperationType, OperationSource, ReconciliationStatus, Event, InsertSummary,
    load_csv, load_csv_reader, open_database, setup_database, insert_operations,
    update_operation, delete_operation, get_all_operations, get_operation, count_operations,
    insert_event, get_events_for_entity,
};
pub use entities::{
    Account, AccountKind,
    BudgetCategory, CategoryKind, CategoryRegistry, Subcategory,
    Horse,
};
pub use budget::{
    Envelope, EnvelopeConsumption, EnvelopeStatus, GroupTotal, BurnRate,
    calculate_envelope_consumption, calculate_monthly_consumption, calculate_account_balance,
    totals_by_category, totals_by_horse, calculate_burn_rate,
};
pub use automation::{
    AutomationRule, AutomationEngine, RuleCondition, RuleAction,
    ConditionField, ConditionOperator, ConditionValue, OperationUpdates,
    apply_automation_rules,
};
pub use recurrence::{
    Frequency, RecurrenceRule,
    build_rrule, parse_rrule, expand_rule, expand_occurrences, describe_rule,
};
pub use health::{HealthCategory, HealthEvent, HealthRecurrence, HealthStatus, Priority, RecurrenceUnit};
pub use training::{Intensity, SessionStatus, TrainingOccurrence, TrainingSeries, TrainingSession};
pub use recommendations::{
    ActionCard, CardKind, GroundCondition, WeatherSnapshot,
    RecommendationContext, RecommendationEngine, generate_recommendations,
};
pub use store::{AccountBalance, EnvelopeReport, StableData, StableState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
