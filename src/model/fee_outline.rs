use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;

/// Largest accepted gap between a declared total and the sum of its parts.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeeComponentName {
    Tuition,
    Admission,
    Library,
    Laboratory,
    Sports,
    Transport,
    Examination,
    Computer,
    Development,
    Miscellaneous,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeeComponent {
    #[schema(example = "tuition")]
    pub name: FeeComponentName,
    #[schema(example = 8000.0)]
    pub amount: f64,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Installment {
    #[schema(example = 1)]
    pub installment_number: u32,
    #[schema(example = 4000.0)]
    pub amount: f64,
    #[schema(example = "2024-04-10", value_type = String, format = "date")]
    pub due_date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConcessionName {
    Sibling,
    Merit,
    StaffWard,
    FinancialAid,
    EarlyPayment,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Concession {
    pub name: ConcessionName,
    pub discount_type: DiscountType,
    #[schema(example = 10.0)]
    pub discount_value: f64,
    #[serde(default)]
    pub max_amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LateFeeType {
    Fixed,
    Percentage,
    PerDay,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LateFeeStructure {
    pub enabled: bool,
    #[schema(example = 7)]
    pub grace_period_days: u32,
    pub fee_type: LateFeeType,
    #[schema(example = 50.0)]
    pub amount: f64,
    #[serde(default)]
    pub max_amount: Option<f64>,
}

impl Default for LateFeeStructure {
    fn default() -> Self {
        Self {
            enabled: false,
            grace_period_days: 0,
            fee_type: LateFeeType::Fixed,
            amount: 0.0,
            max_amount: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Everything about an outline that is validated before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeeOutlineDraft {
    #[schema(example = "Standard Fee 2024-25")]
    pub name: String,
    #[schema(example = 7)]
    pub class_id: u64,
    #[schema(example = "2024-2025")]
    pub academic_year: String,
    #[schema(example = 8500.0)]
    pub total_amount: f64,
    pub components: Vec<FeeComponent>,
    #[serde(default)]
    pub installments: Vec<Installment>,
    #[serde(default)]
    pub concession_types: Vec<Concession>,
    #[serde(default)]
    pub late_fee_structure: LateFeeStructure,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
}

/// Partial update. Absent fields keep their stored value.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct FeeOutlinePatch {
    pub name: Option<String>,
    pub class_id: Option<u64>,
    pub academic_year: Option<String>,
    pub total_amount: Option<f64>,
    pub components: Option<Vec<FeeComponent>>,
    pub installments: Option<Vec<Installment>>,
    pub concession_types: Option<Vec<Concession>>,
    pub late_fee_structure: Option<LateFeeStructure>,
    pub is_active: Option<bool>,
    pub is_default: Option<bool>,
}

impl FeeOutlinePatch {
    pub fn apply(self, mut draft: FeeOutlineDraft) -> FeeOutlineDraft {
        if let Some(v) = self.name {
            draft.name = v;
        }
        if let Some(v) = self.class_id {
            draft.class_id = v;
        }
        if let Some(v) = self.academic_year {
            draft.academic_year = v;
        }
        if let Some(v) = self.total_amount {
            draft.total_amount = v;
        }
        if let Some(v) = self.components {
            draft.components = v;
        }
        if let Some(v) = self.installments {
            draft.installments = v;
        }
        if let Some(v) = self.concession_types {
            draft.concession_types = v;
        }
        if let Some(v) = self.late_fee_structure {
            draft.late_fee_structure = v;
        }
        if let Some(v) = self.is_active {
            draft.is_active = v;
        }
        if let Some(v) = self.is_default {
            draft.is_default = v;
        }
        draft
    }
}

/// Fields a copy may take instead of the source's.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DuplicateOverrides {
    #[schema(example = "Standard Fee 2025-26")]
    pub name: Option<String>,
    pub class_id: Option<u64>,
    #[schema(example = "2025-2026")]
    pub academic_year: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FeeOutline {
    pub id: u64,
    #[serde(flatten)]
    pub draft: FeeOutlineDraft,
    #[schema(nullable = true)]
    pub class_name: Option<String>,
    pub created_by: u64,
    pub last_modified_by: Option<u64>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub struct FeeOutlineRow {
    pub id: u64,
    pub name: String,
    pub class_id: u64,
    pub class_name: Option<String>,
    pub academic_year: String,
    pub total_amount: f64,
    pub components: Json<Vec<FeeComponent>>,
    pub installments: Json<Vec<Installment>>,
    pub concession_types: Json<Vec<Concession>>,
    pub late_fee_structure: Json<LateFeeStructure>,
    pub is_active: bool,
    pub is_default: bool,
    pub created_by: u64,
    pub last_modified_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FeeOutlineRow> for FeeOutline {
    fn from(row: FeeOutlineRow) -> Self {
        FeeOutline {
            id: row.id,
            draft: FeeOutlineDraft {
                name: row.name,
                class_id: row.class_id,
                academic_year: row.academic_year,
                total_amount: row.total_amount,
                components: row.components.0,
                installments: row.installments.0,
                concession_types: row.concession_types.0,
                late_fee_structure: row.late_fee_structure.0,
                is_active: row.is_active,
                is_default: row.is_default,
            },
            class_name: row.class_name,
            created_by: row.created_by,
            last_modified_by: row.last_modified_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn off_by_more_than_tolerance(sum: f64, total: f64) -> bool {
    // Epsilon absorbs binary rounding of cent values.
    (sum - total).abs() > AMOUNT_TOLERANCE + 1e-9
}

fn amount_mismatch(what: &str, sum: f64, total: f64) -> AppError {
    AppError::validation(format!(
        "Amount mismatch: {} total {:.2} does not equal total amount {:.2}",
        what, sum, total
    ))
}

/// Checks every outline invariant that does not need the store.
pub fn validate(draft: &FeeOutlineDraft) -> Result<(), AppError> {
    if draft.name.trim().is_empty() {
        return Err(AppError::validation("name is required"));
    }
    if draft.academic_year.trim().is_empty() {
        return Err(AppError::validation("academic_year is required"));
    }
    if !draft.total_amount.is_finite() || draft.total_amount < 0.0 {
        return Err(AppError::validation("total_amount must be a non-negative number"));
    }
    if draft.components.is_empty() {
        return Err(AppError::validation("at least one fee component is required"));
    }
    if draft.components.iter().any(|c| !c.amount.is_finite() || c.amount < 0.0) {
        return Err(AppError::validation("component amounts must be non-negative"));
    }

    let components_total: f64 = draft.components.iter().map(|c| c.amount).sum();
    if off_by_more_than_tolerance(components_total, draft.total_amount) {
        return Err(amount_mismatch("components", components_total, draft.total_amount));
    }

    if !draft.installments.is_empty() {
        if draft.installments.iter().any(|i| !i.amount.is_finite() || i.amount < 0.0) {
            return Err(AppError::validation("installment amounts must be non-negative"));
        }
        let mut numbers: Vec<u32> = draft.installments.iter().map(|i| i.installment_number).collect();
        numbers.sort_unstable();
        if numbers.windows(2).any(|w| w[0] == w[1]) {
            return Err(AppError::validation("installment numbers must be unique"));
        }

        let installments_total: f64 = draft.installments.iter().map(|i| i.amount).sum();
        if off_by_more_than_tolerance(installments_total, draft.total_amount) {
            return Err(amount_mismatch("installments", installments_total, draft.total_amount));
        }
    }

    for concession in &draft.concession_types {
        if concession.discount_value < 0.0 || concession.max_amount.is_some_and(|m| m < 0.0) {
            return Err(AppError::validation("concession values must be non-negative"));
        }
        if concession.discount_type == DiscountType::Percentage && concession.discount_value > 100.0 {
            return Err(AppError::validation("percentage concession cannot exceed 100"));
        }
    }

    let late = &draft.late_fee_structure;
    if late.amount < 0.0 || late.max_amount.is_some_and(|m| m < 0.0) {
        return Err(AppError::validation("late fee values must be non-negative"));
    }

    Ok(())
}

/// Builds the draft for a copy of `source`. A copy is never the default.
pub fn duplicate_draft(source: &FeeOutline, overrides: DuplicateOverrides) -> FeeOutlineDraft {
    let mut draft = source.draft.clone();
    draft.name = overrides
        .name
        .unwrap_or_else(|| format!("{} (Copy)", source.draft.name));
    if let Some(class_id) = overrides.class_id {
        draft.class_id = class_id;
    }
    if let Some(year) = overrides.academic_year {
        draft.academic_year = year;
    }
    draft.is_default = false;
    draft
}
