use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use derive_more::{Add, AddAssign};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum Month {
    January = 1,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl Month {
    pub fn from_number(n: u8) -> Option<Self> {
        Month::iter().find(|m| *m as u8 == n)
    }
}

/// Display label for a 1-based month number, e.g. `1` -> `January`.
pub fn month_label(n: u8) -> String {
    Month::from_number(n)
        .map(|m| m.to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Add, AddAssign, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Allowances {
    /// Dearness allowance
    pub da: f64,
    /// House rent allowance
    pub hra: f64,
    /// Travel allowance
    pub ta: f64,
    pub medical: f64,
    pub performance: f64,
    pub overtime: f64,
    pub bonus: f64,
    pub other: f64,
}

impl Allowances {
    fn values(&self) -> [f64; 8] {
        [
            self.da,
            self.hra,
            self.ta,
            self.medical,
            self.performance,
            self.overtime,
            self.bonus,
            self.other,
        ]
    }

    pub fn total(&self) -> f64 {
        self.values().iter().sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Add, AddAssign, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Deductions {
    pub tax: f64,
    /// Provident fund
    pub pf: f64,
    /// Employee state insurance
    pub esi: f64,
    pub loan: f64,
    pub advance: f64,
    pub other: f64,
}

impl Deductions {
    fn values(&self) -> [f64; 6] {
        [self.tax, self.pf, self.esi, self.loan, self.advance, self.other]
    }

    pub fn total(&self) -> f64 {
        self.values().iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct SalaryTotals {
    pub gross_salary: f64,
    pub total_deductions: f64,
    pub net_salary: f64,
}

/// Derives gross, deductions and net pay. The only source of these values.
pub fn compute_totals(basic_salary: f64, allowances: &Allowances, deductions: &Deductions) -> SalaryTotals {
    let gross_salary = basic_salary + allowances.total();
    let total_deductions = deductions.total();
    SalaryTotals {
        gross_salary,
        total_deductions,
        net_salary: gross_salary - total_deductions,
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SalaryStatus {
    #[default]
    Pending,
    Approved,
    Paid,
    Hold,
    Cancelled,
}

impl SalaryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SalaryStatus::Paid | SalaryStatus::Cancelled)
    }

    pub fn can_move_to(self, next: SalaryStatus) -> bool {
        use SalaryStatus::*;
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Approved)
                | (Approved, Paid)
                | (Pending, Hold)
                | (Approved, Hold)
                | (Hold, Pending)
                | (Hold, Approved)
                | (_, Cancelled)
        )
    }

    pub fn check_transition(self, next: SalaryStatus) -> Result<(), AppError> {
        if self.can_move_to(next) {
            Ok(())
        } else {
            Err(AppError::validation(format!(
                "Cannot change salary status from {} to {}",
                self, next
            )))
        }
    }

    /// Checks a status request that may also carry remarks. `Ok(false)` means
    /// there is nothing to write.
    pub fn check_change(self, next: SalaryStatus, has_remarks: bool) -> Result<bool, AppError> {
        if self.is_terminal() && has_remarks {
            return Err(AppError::validation(format!(
                "Salary record is {}, remarks can no longer be changed",
                self
            )));
        }
        if self == next && !has_remarks {
            return Ok(false);
        }
        self.check_transition(next)?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SalaryInput {
    #[schema(example = 12)]
    pub employee_id: u64,
    /// Month number, 1 = January
    #[schema(example = 1)]
    pub month: u8,
    #[schema(example = 2024)]
    pub year: i32,
    #[schema(example = 50000.0)]
    pub basic_salary: f64,
    #[serde(default)]
    pub allowances: Allowances,
    #[serde(default)]
    pub deductions: Deductions,
    #[serde(default)]
    pub working_days: u32,
    #[serde(default)]
    pub present_days: u32,
    #[serde(default)]
    pub leaves: u32,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SalaryPatch {
    pub month: Option<u8>,
    pub year: Option<i32>,
    pub basic_salary: Option<f64>,
    pub allowances: Option<Allowances>,
    pub deductions: Option<Deductions>,
    pub working_days: Option<u32>,
    pub present_days: Option<u32>,
    pub leaves: Option<u32>,
    pub remarks: Option<String>,
}

impl SalaryPatch {
    pub fn apply(self, mut input: SalaryInput) -> SalaryInput {
        if let Some(v) = self.month {
            input.month = v;
        }
        if let Some(v) = self.year {
            input.year = v;
        }
        if let Some(v) = self.basic_salary {
            input.basic_salary = v;
        }
        if let Some(v) = self.allowances {
            input.allowances = v;
        }
        if let Some(v) = self.deductions {
            input.deductions = v;
        }
        if let Some(v) = self.working_days {
            input.working_days = v;
        }
        if let Some(v) = self.present_days {
            input.present_days = v;
        }
        if let Some(v) = self.leaves {
            input.leaves = v;
        }
        if self.remarks.is_some() {
            input.remarks = self.remarks;
        }
        input
    }
}

fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

pub fn validate(input: &SalaryInput) -> Result<(), AppError> {
    if Month::from_number(input.month).is_none() {
        return Err(AppError::validation("month must be between 1 and 12"));
    }
    if !(2000..=2100).contains(&input.year) {
        return Err(AppError::validation("year must be between 2000 and 2100"));
    }
    if !non_negative(input.basic_salary) {
        return Err(AppError::validation("basic_salary must be a non-negative number"));
    }
    if !input.allowances.values().into_iter().all(non_negative) {
        return Err(AppError::validation("allowances must be non-negative"));
    }
    if !input.deductions.values().into_iter().all(non_negative) {
        return Err(AppError::validation("deductions must be non-negative"));
    }
    if input.present_days > input.working_days {
        return Err(AppError::validation("present_days cannot exceed working_days"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SalaryRecord {
    pub id: u64,
    pub employee_id: u64,
    #[schema(nullable = true)]
    pub employee_name: Option<String>,
    pub month: u8,
    #[schema(example = "January")]
    pub month_label: String,
    pub year: i32,
    pub basic_salary: f64,
    pub allowances: Allowances,
    pub deductions: Deductions,
    pub gross_salary: f64,
    pub total_deductions: f64,
    pub net_salary: f64,
    pub working_days: u32,
    pub present_days: u32,
    pub leaves: u32,
    pub status: SalaryStatus,
    #[schema(value_type = Option<String>, format = "date")]
    pub paid_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub processed_by: u64,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl SalaryRecord {
    pub fn to_input(&self) -> SalaryInput {
        SalaryInput {
            employee_id: self.employee_id,
            month: self.month,
            year: self.year,
            basic_salary: self.basic_salary,
            allowances: self.allowances,
            deductions: self.deductions,
            working_days: self.working_days,
            present_days: self.present_days,
            leaves: self.leaves,
            remarks: self.remarks.clone(),
        }
    }
}

#[derive(sqlx::FromRow)]
pub struct SalaryRow {
    pub id: u64,
    pub employee_id: u64,
    pub employee_name: Option<String>,
    pub month: u8,
    pub year: i32,
    pub basic_salary: f64,
    pub allowances: Json<Allowances>,
    pub deductions: Json<Deductions>,
    pub gross_salary: f64,
    pub total_deductions: f64,
    pub net_salary: f64,
    pub working_days: u32,
    pub present_days: u32,
    pub leaves: u32,
    pub status: String,
    pub paid_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub processed_by: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SalaryRow> for SalaryRecord {
    type Error = AppError;

    fn try_from(row: SalaryRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<SalaryStatus>().map_err(|_| {
            tracing::error!(salary_id = row.id, status = %row.status, "Unknown salary status in store");
            AppError::ServerFault
        })?;

        Ok(SalaryRecord {
            id: row.id,
            employee_id: row.employee_id,
            employee_name: row.employee_name,
            month: row.month,
            month_label: month_label(row.month),
            year: row.year,
            basic_salary: row.basic_salary,
            allowances: row.allowances.0,
            deductions: row.deductions.0,
            gross_salary: row.gross_salary,
            total_deductions: row.total_deductions,
            net_salary: row.net_salary,
            working_days: row.working_days,
            present_days: row.present_days,
            leaves: row.leaves,
            status,
            paid_date: row.paid_date,
            remarks: row.remarks,
            processed_by: row.processed_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ComponentTotals {
    pub basic_salary: f64,
    pub allowances: Allowances,
    pub deductions: Deductions,
    pub gross_salary: f64,
    pub total_deductions: f64,
    pub net_salary: f64,
}

impl ComponentTotals {
    fn add(&mut self, record: &SalaryRecord) {
        self.basic_salary += record.basic_salary;
        self.allowances += record.allowances;
        self.deductions += record.deductions;
        self.gross_salary += record.gross_salary;
        self.total_deductions += record.total_deductions;
        self.net_salary += record.net_salary;
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
    pub total_net_salary: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayrollReport {
    pub month: u8,
    pub month_label: String,
    pub year: i32,
    pub total_staff: usize,
    pub total_records: usize,
    pub totals: ComponentTotals,
    pub status_breakdown: Vec<StatusCount>,
}

/// Aggregates one pay period. An empty period is reported as [`AppError::NoData`].
pub fn payroll_report(month: u8, year: i32, records: &[SalaryRecord]) -> Result<PayrollReport, AppError> {
    if records.is_empty() {
        return Err(AppError::NoData(format!(
            "No salary records found for {} {}",
            month_label(month),
            year
        )));
    }

    let mut totals = ComponentTotals::default();
    let mut staff = std::collections::BTreeSet::new();
    let mut by_status: BTreeMap<String, (i64, f64)> = BTreeMap::new();

    for record in records {
        totals.add(record);
        staff.insert(record.employee_id);
        let entry = by_status.entry(record.status.to_string()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += record.net_salary;
    }

    Ok(PayrollReport {
        month,
        month_label: month_label(month),
        year,
        total_staff: staff.len(),
        total_records: records.len(),
        totals,
        status_breakdown: by_status
            .into_iter()
            .map(|(status, (count, total_net_salary))| StatusCount {
                status,
                count,
                total_net_salary,
            })
            .collect(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct YearlySummary {
    pub year: i32,
    pub total_basic: f64,
    pub total_allowances: f64,
    pub total_deductions: f64,
    pub total_overtime: f64,
    pub total_bonus: f64,
    pub total_gross: f64,
    pub total_net: f64,
    pub months_paid: u32,
    pub records: u32,
}

/// Per-year totals for one employee's history, newest year first.
pub fn yearly_summaries(records: &[SalaryRecord]) -> Vec<YearlySummary> {
    let mut years: BTreeMap<i32, YearlySummary> = BTreeMap::new();

    for r in records {
        let s = years.entry(r.year).or_insert_with(|| YearlySummary {
            year: r.year,
            ..Default::default()
        });
        s.total_basic += r.basic_salary;
        s.total_allowances += r.allowances.total();
        s.total_deductions += r.total_deductions;
        s.total_overtime += r.allowances.overtime;
        s.total_bonus += r.allowances.bonus;
        s.total_gross += r.gross_salary;
        s.total_net += r.net_salary;
        s.records += 1;
        if r.status == SalaryStatus::Paid {
            s.months_paid += 1;
        }
    }

    years.into_values().rev().collect()
}

#[derive(Debug, sqlx::FromRow)]
pub struct TrendRow {
    pub year: i32,
    pub month: u8,
    pub total_net_salary: Option<f64>,
    pub staff_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrendPoint {
    pub year: i32,
    pub month: u8,
    pub month_label: String,
    pub total_net_salary: f64,
    pub staff_count: i64,
}

impl From<TrendRow> for TrendPoint {
    fn from(row: TrendRow) -> Self {
        TrendPoint {
            year: row.year,
            month: row.month,
            month_label: month_label(row.month),
            total_net_salary: row.total_net_salary.unwrap_or(0.0),
            staff_count: row.staff_count,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SalaryStats {
    pub total_records: i64,
    pub total_staff: i64,
    pub status_distribution: Vec<StatusCount>,
    pub monthly_trend: Vec<TrendPoint>,
}

/// Linear month index (`year * 12 + month`) below which a period falls out
/// of the trailing twelve-month window ending at `today`.
pub fn trend_cutoff(today: NaiveDate) -> i64 {
    today.year() as i64 * 12 + today.month() as i64 - 12
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(employee_id: u64, year: i32, month: u8, status: SalaryStatus) -> SalaryRecord {
        let allowances = Allowances {
            hra: 5000.0,
            overtime: 200.0,
            ..Default::default()
        };
        let deductions = Deductions {
            tax: 2000.0,
            ..Default::default()
        };
        let totals = compute_totals(50000.0, &allowances, &deductions);
        SalaryRecord {
            id: employee_id * 100 + month as u64,
            employee_id,
            employee_name: None,
            month,
            month_label: month_label(month),
            year,
            basic_salary: 50000.0,
            allowances,
            deductions,
            gross_salary: totals.gross_salary,
            total_deductions: totals.total_deductions,
            net_salary: totals.net_salary,
            working_days: 22,
            present_days: 21,
            leaves: 1,
            status,
            paid_date: None,
            remarks: None,
            processed_by: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn input() -> SalaryInput {
        SalaryInput {
            employee_id: 1,
            month: 1,
            year: 2024,
            basic_salary: 50000.0,
            allowances: Allowances {
                hra: 5000.0,
                ..Default::default()
            },
            deductions: Deductions {
                tax: 2000.0,
                ..Default::default()
            },
            working_days: 22,
            present_days: 22,
            leaves: 0,
            remarks: None,
        }
    }

    #[test]
    fn computes_gross_and_net() {
        let i = input();
        let totals = compute_totals(i.basic_salary, &i.allowances, &i.deductions);
        assert_eq!(totals.gross_salary, 55000.0);
        assert_eq!(totals.total_deductions, 2000.0);
        assert_eq!(totals.net_salary, 53000.0);
    }

    #[test]
    fn client_totals_are_not_part_of_input() {
        let parsed: SalaryInput = serde_json::from_str(
            r#"{"employee_id":1,"month":1,"year":2024,"basic_salary":100.0,
                "allowances":{"hra":10.0},"net_salary":999999.0}"#,
        )
        .unwrap();
        let totals = compute_totals(parsed.basic_salary, &parsed.allowances, &parsed.deductions);
        assert_eq!(totals.net_salary, 110.0);
    }

    #[test]
    fn unknown_allowance_keys_are_rejected() {
        let err = serde_json::from_str::<Allowances>(r#"{"hra":10.0,"food":5.0}"#);
        assert!(err.is_err());
        let err = serde_json::from_str::<Deductions>(r#"{"tax":10.0,"fine":5.0}"#);
        assert!(err.is_err());
    }

    #[test]
    fn month_labels() {
        assert_eq!(month_label(1), "January");
        assert_eq!(month_label(12), "December");
        assert_eq!(month_label(13), "");
        assert_eq!(Month::from_number(0), None);
    }

    #[test]
    fn validation_rules() {
        assert!(validate(&input()).is_ok());

        let mut bad = input();
        bad.month = 13;
        assert!(validate(&bad).is_err());

        let mut bad = input();
        bad.deductions.loan = -1.0;
        assert!(validate(&bad).is_err());

        let mut bad = input();
        bad.present_days = 30;
        assert!(validate(&bad).is_err());
    }

    #[test]
    fn status_transitions() {
        use SalaryStatus::*;
        assert!(Pending.can_move_to(Approved));
        assert!(Approved.can_move_to(Paid));
        assert!(!Pending.can_move_to(Paid));
        assert!(!Paid.can_move_to(Cancelled));
        assert!(!Cancelled.can_move_to(Pending));
        assert!(Hold.can_move_to(Cancelled));
        assert!(Approved.can_move_to(Approved));
        assert!(Pending.check_transition(Paid).is_err());
    }

    #[test]
    fn final_records_keep_their_remarks() {
        use SalaryStatus::*;
        assert!(matches!(Paid.check_change(Paid, true), Err(AppError::ValidationFailed(_))));
        assert!(matches!(Cancelled.check_change(Cancelled, true), Err(AppError::ValidationFailed(_))));
        assert!(matches!(Paid.check_change(Paid, false), Ok(false)));
        assert!(matches!(Pending.check_change(Pending, true), Ok(true)));
        assert!(matches!(Pending.check_change(Approved, false), Ok(true)));
        assert!(Pending.check_change(Paid, false).is_err());
    }

    #[test]
    fn empty_period_is_no_data() {
        match payroll_report(1, 2024, &[]) {
            Err(AppError::NoData(msg)) => assert!(msg.contains("January 2024")),
            other => panic!("expected NoData, got {:?}", other),
        }
    }

    #[test]
    fn payroll_report_sums_components() {
        let records = vec![
            record(1, 2024, 1, SalaryStatus::Paid),
            record(2, 2024, 1, SalaryStatus::Pending),
            record(3, 2024, 1, SalaryStatus::Paid),
        ];
        let report = payroll_report(1, 2024, &records).unwrap();
        assert_eq!(report.total_staff, 3);
        assert_eq!(report.totals.basic_salary, 150000.0);
        assert_eq!(report.totals.allowances.hra, 15000.0);
        assert_eq!(report.totals.deductions.tax, 6000.0);
        assert_eq!(report.totals.net_salary, 3.0 * 53200.0);

        let paid = report
            .status_breakdown
            .iter()
            .find(|s| s.status == "paid")
            .unwrap();
        assert_eq!(paid.count, 2);
    }

    #[test]
    fn yearly_summaries_group_newest_first() {
        let records = vec![
            record(1, 2023, 12, SalaryStatus::Paid),
            record(1, 2024, 1, SalaryStatus::Paid),
            record(1, 2024, 2, SalaryStatus::Approved),
        ];
        let summaries = yearly_summaries(&records);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].year, 2024);
        assert_eq!(summaries[0].records, 2);
        assert_eq!(summaries[0].months_paid, 1);
        assert_eq!(summaries[0].total_overtime, 400.0);
        assert_eq!(summaries[1].year, 2023);
        assert_eq!(summaries[1].total_net, 53200.0);
    }

    #[test]
    fn trend_window_covers_twelve_months() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let cutoff = trend_cutoff(today);
        // April 2023 is inside, March 2023 is not.
        assert!(2023 * 12 + 4 > cutoff);
        assert!(2023 * 12 + 3 <= cutoff);
    }
}
