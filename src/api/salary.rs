use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use sqlx::types::Json;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::error::{AppError, db_fault, is_unique_violation};
use crate::model::role::Role;
use crate::model::salary::{
    self, Month, PayrollReport, SalaryInput, SalaryPatch, SalaryRecord, SalaryRow, SalaryStats,
    SalaryStatus, StatusCount, TrendPoint, TrendRow, YearlySummary,
};
use crate::utils::filter::Filters;
use crate::utils::pagination::{Page, SalaryList};

const SELECT_SALARY: &str = r#"
    SELECT
        s.id, s.employee_id, u.full_name AS employee_name, s.month, s.year, s.basic_salary,
        s.allowances, s.deductions, s.gross_salary, s.total_deductions, s.net_salary,
        s.working_days, s.present_days, s.leaves, s.status, s.paid_date, s.remarks,
        s.processed_by, s.created_at, s.updated_at
    FROM salary_records s
    LEFT JOIN users u ON u.id = s.employee_id
"#;

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct SalaryFilter {
    pub employee_id: Option<u64>,
    /// Month number, 1 = January
    pub month: Option<u8>,
    pub year: Option<i32>,
    pub status: Option<SalaryStatus>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct PeriodQuery {
    /// Month number, 1 = January
    pub month: u8,
    pub year: i32,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct HistoryQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusUpdate {
    pub status: SalaryStatus,
    pub remarks: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SalaryHistory {
    pub employee_id: u64,
    pub records: Vec<SalaryRecord>,
    pub yearly_summary: Vec<YearlySummary>,
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    status: String,
    count: i64,
    total_net_salary: Option<f64>,
}

fn to_records(rows: Vec<SalaryRow>) -> Result<Vec<SalaryRecord>, AppError> {
    rows.into_iter().map(SalaryRecord::try_from).collect()
}

async fn fetch_salary(pool: &MySqlPool, id: u64) -> Result<SalaryRecord, AppError> {
    let sql = format!("{} WHERE s.id = ?", SELECT_SALARY);
    let row = sqlx::query_as::<_, SalaryRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_fault("Failed to fetch salary record"))?
        .ok_or_else(|| AppError::not_found(format!("Salary record {} not found", id)))?;

    SalaryRecord::try_from(row)
}

/// Salaries are only recorded for school employees.
async fn require_employee_user(pool: &MySqlPool, employee_id: u64) -> Result<(), AppError> {
    let role_id = sqlx::query_scalar::<_, u8>("SELECT role_id FROM users WHERE id = ?")
        .bind(employee_id)
        .fetch_optional(pool)
        .await
        .map_err(db_fault("Failed to look up employee"))?;

    match role_id.and_then(Role::from_id) {
        Some(role) if role.is_employee() => Ok(()),
        _ => Err(AppError::not_found(format!("Employee {} not found", employee_id))),
    }
}

fn duplicate_period(input: &SalaryInput) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        if is_unique_violation(&e) {
            AppError::DuplicateRecord(format!(
                "Salary record already exists for employee {} for {} {}",
                input.employee_id,
                salary::month_label(input.month),
                input.year
            ))
        } else {
            error!(error = %e, employee_id = input.employee_id, "Failed to save salary record");
            AppError::ServerFault
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/salaries",
    request_body = SalaryInput,
    responses(
        (status = 201, description = "Salary record created with computed totals", body = SalaryRecord),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "Record already exists for this employee and period"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn create_salary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<SalaryInput>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let input = payload.into_inner();
    salary::validate(&input)?;
    require_employee_user(pool.get_ref(), input.employee_id).await?;

    let totals = salary::compute_totals(input.basic_salary, &input.allowances, &input.deductions);

    let result = sqlx::query(
        r#"
        INSERT INTO salary_records
            (employee_id, month, year, basic_salary, allowances, deductions, gross_salary,
             total_deductions, net_salary, working_days, present_days, leaves, status, remarks,
             processed_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(input.employee_id)
    .bind(input.month)
    .bind(input.year)
    .bind(input.basic_salary)
    .bind(Json(&input.allowances))
    .bind(Json(&input.deductions))
    .bind(totals.gross_salary)
    .bind(totals.total_deductions)
    .bind(totals.net_salary)
    .bind(input.working_days)
    .bind(input.present_days)
    .bind(input.leaves)
    .bind(SalaryStatus::Pending.as_ref())
    .bind(&input.remarks)
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await
    .map_err(duplicate_period(&input))?;

    let id = result.last_insert_id();
    info!(salary_id = id, employee_id = input.employee_id, net = totals.net_salary, "Salary record created");

    let record = fetch_salary(pool.get_ref(), id).await?;
    Ok(HttpResponse::Created().json(record))
}

#[utoipa::path(
    get,
    path = "/api/v1/salaries/{id}",
    params(("id" = u64, Path, description = "Salary record ID")),
    responses(
        (status = 200, body = SalaryRecord),
        (status = 404, description = "Salary record not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn get_salary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let record = fetch_salary(pool.get_ref(), path.into_inner()).await?;

    // Employees may read their own payslips.
    if record.employee_id != auth.user_id {
        auth.require_accounts()?;
    }

    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    get,
    path = "/api/v1/salaries",
    params(SalaryFilter),
    responses((status = 200, description = "Paginated salary records", body = SalaryList)),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn list_salaries(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<SalaryFilter>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let page = Page::from_query(query.page, query.limit);

    let mut filters = Filters::new();
    if let Some(employee_id) = query.employee_id {
        filters.push("s.employee_id = ?", employee_id);
    }
    if let Some(month) = query.month {
        filters.push("s.month = ?", month);
    }
    if let Some(year) = query.year {
        filters.push("s.year = ?", year);
    }
    if let Some(status) = query.status {
        filters.push("s.status = ?", status.as_ref());
    }
    let where_sql = filters.where_sql();

    let count_sql = format!("SELECT COUNT(*) FROM salary_records s{}", where_sql);
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await
        .map_err(db_fault("Failed to count salary records"))?;

    let data_sql = format!(
        "{}{} ORDER BY s.year DESC, s.month DESC, s.id DESC LIMIT ? OFFSET ?",
        SELECT_SALARY, where_sql
    );
    let rows = filters
        .bind_as(sqlx::query_as::<_, SalaryRow>(&data_sql))
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch salary records"))?;

    Ok(HttpResponse::Ok().json(page.wrap(to_records(rows)?, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/salaries/employee/{employee_id}/history",
    params(
        ("employee_id" = u64, Path, description = "Employee user ID"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "Salary history with per-year totals", body = SalaryHistory),
        (status = 403, description = "Not your history")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn salary_history(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<HistoryQuery>,
) -> actix_web::Result<impl Responder> {
    let employee_id = path.into_inner();
    if employee_id != auth.user_id {
        auth.require_accounts()?;
    }

    let mut filters = Filters::new();
    filters.push("s.employee_id = ?", employee_id);
    if let Some(year) = query.year {
        filters.push("s.year = ?", year);
    }

    let sql = format!(
        "{}{} ORDER BY s.year DESC, s.month DESC",
        SELECT_SALARY,
        filters.where_sql()
    );
    let rows = filters
        .bind_as(sqlx::query_as::<_, SalaryRow>(&sql))
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch salary history"))?;

    let records = to_records(rows)?;
    let yearly_summary = salary::yearly_summaries(&records);

    Ok(HttpResponse::Ok().json(SalaryHistory {
        employee_id,
        records,
        yearly_summary,
    }))
}

#[utoipa::path(
    put,
    path = "/api/v1/salaries/{id}",
    params(("id" = u64, Path, description = "Salary record ID")),
    request_body = SalaryPatch,
    responses(
        (status = 200, description = "Salary record updated, totals recomputed", body = SalaryRecord),
        (status = 400, description = "Validation failed or record is closed"),
        (status = 404, description = "Salary record not found"),
        (status = 409, description = "Another record exists for the new period")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn update_salary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<SalaryPatch>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let id = path.into_inner();
    let current = fetch_salary(pool.get_ref(), id).await?;
    if current.status.is_terminal() {
        return Err(AppError::validation(format!(
            "Salary record {} is {} and can no longer be edited",
            id, current.status
        ))
        .into());
    }

    let input = payload.into_inner().apply(current.to_input());
    salary::validate(&input)?;
    let totals = salary::compute_totals(input.basic_salary, &input.allowances, &input.deductions);

    sqlx::query(
        r#"
        UPDATE salary_records
        SET month = ?, year = ?, basic_salary = ?, allowances = ?, deductions = ?,
            gross_salary = ?, total_deductions = ?, net_salary = ?, working_days = ?,
            present_days = ?, leaves = ?, remarks = ?, processed_by = ?
        WHERE id = ?
        "#,
    )
    .bind(input.month)
    .bind(input.year)
    .bind(input.basic_salary)
    .bind(Json(&input.allowances))
    .bind(Json(&input.deductions))
    .bind(totals.gross_salary)
    .bind(totals.total_deductions)
    .bind(totals.net_salary)
    .bind(input.working_days)
    .bind(input.present_days)
    .bind(input.leaves)
    .bind(&input.remarks)
    .bind(auth.user_id)
    .bind(id)
    .execute(pool.get_ref())
    .await
    .map_err(duplicate_period(&input))?;

    info!(salary_id = id, net = totals.net_salary, "Salary record updated");

    let record = fetch_salary(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    patch,
    path = "/api/v1/salaries/{id}/status",
    params(("id" = u64, Path, description = "Salary record ID")),
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Status changed", body = SalaryRecord),
        (status = 400, description = "Transition not allowed"),
        (status = 404, description = "Salary record not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn update_salary_status(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<StatusUpdate>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let id = path.into_inner();
    let StatusUpdate { status, remarks } = payload.into_inner();
    let current = fetch_salary(pool.get_ref(), id).await?;

    if !current.status.check_change(status, remarks.is_some())? {
        return Ok(HttpResponse::Ok().json(current));
    }

    let paid_date = match status {
        SalaryStatus::Paid => current.paid_date.or_else(|| Some(Utc::now().date_naive())),
        _ => current.paid_date,
    };

    sqlx::query(
        r#"
        UPDATE salary_records
        SET status = ?, paid_date = ?, remarks = COALESCE(?, remarks), processed_by = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_ref())
    .bind(paid_date)
    .bind(&remarks)
    .bind(auth.user_id)
    .bind(id)
    .execute(pool.get_ref())
    .await
    .map_err(db_fault("Failed to update salary status"))?;

    info!(salary_id = id, from = %current.status, to = %status, "Salary status changed");

    let record = fetch_salary(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    delete,
    path = "/api/v1/salaries/{id}",
    params(("id" = u64, Path, description = "Salary record ID")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Salary record not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn delete_salary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let id = path.into_inner();
    let result = sqlx::query("DELETE FROM salary_records WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map_err(db_fault("Failed to delete salary record"))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("Salary record {} not found", id)).into());
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/salaries/report",
    params(PeriodQuery),
    responses(
        (status = 200, description = "Totals for the pay period", body = PayrollReport),
        (status = 400, description = "Invalid month"),
        (status = 404, description = "No records for the period")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn payroll_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PeriodQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let PeriodQuery { month, year } = query.into_inner();
    if Month::from_number(month).is_none() {
        return Err(AppError::validation("month must be between 1 and 12").into());
    }

    let sql = format!("{} WHERE s.month = ? AND s.year = ? ORDER BY s.employee_id", SELECT_SALARY);
    let rows = sqlx::query_as::<_, SalaryRow>(&sql)
        .bind(month)
        .bind(year)
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch payroll period"))?;

    let report = salary::payroll_report(month, year, &to_records(rows)?)?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    get,
    path = "/api/v1/salaries/stats",
    responses((status = 200, description = "Salary dashboard statistics", body = SalaryStats)),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn salary_stats(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;
    let pool = pool.get_ref();

    let total_records = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM salary_records")
        .fetch_one(pool)
        .await
        .map_err(db_fault("Failed to count salary records"))?;

    let total_staff =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT employee_id) FROM salary_records")
            .fetch_one(pool)
            .await
            .map_err(db_fault("Failed to count salaried staff"))?;

    let status_distribution: Vec<StatusCount> = sqlx::query_as::<_, StatusRow>(
        r#"
        SELECT status, COUNT(*) AS count, CAST(SUM(net_salary) AS DOUBLE) AS total_net_salary
        FROM salary_records
        GROUP BY status
        ORDER BY status
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(db_fault("Failed to fetch salary status distribution"))?
    .into_iter()
    .map(|r| StatusCount {
        status: r.status,
        count: r.count,
        total_net_salary: r.total_net_salary.unwrap_or(0.0),
    })
    .collect();

    let cutoff = salary::trend_cutoff(Utc::now().date_naive());
    let monthly_trend: Vec<TrendPoint> = sqlx::query_as::<_, TrendRow>(
        r#"
        SELECT year, month, CAST(SUM(net_salary) AS DOUBLE) AS total_net_salary,
               COUNT(DISTINCT employee_id) AS staff_count
        FROM salary_records
        WHERE year * 12 + month > ?
        GROUP BY year, month
        ORDER BY year DESC, month DESC
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .map_err(db_fault("Failed to fetch salary trend"))?
    .into_iter()
    .map(TrendPoint::from)
    .collect();

    Ok(HttpResponse::Ok().json(SalaryStats {
        total_records,
        total_staff,
        status_distribution,
        monthly_trend,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::api_routes;
    use crate::test_support::{bearer, migrated_pool, seed_user, state, store_app};
    use actix_web::{App, http::StatusCode, test};

    macro_rules! app {
        () => {{
            let s = state();
            test::init_service(
                App::new()
                    .app_data(s.config.clone())
                    .app_data(s.pool.clone())
                    .app_data(s.notifier.clone())
                    .configure(api_routes),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn invalid_month_is_rejected_before_the_store() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/salaries")
            .insert_header(bearer(Role::Admin, None))
            .set_json(json!({
                "employee_id": 1,
                "month": 13,
                "year": 2024,
                "basic_salary": 50000.0
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_failed");
    }

    #[actix_web::test]
    async fn unknown_allowance_key_is_a_bad_request() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/salaries")
            .insert_header(bearer(Role::Staff, None))
            .set_json(json!({
                "employee_id": 1,
                "month": 1,
                "year": 2024,
                "basic_salary": 50000.0,
                "allowances": {"hra": 5000.0, "food": 100.0}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_failed");
        assert!(body["message"].as_str().unwrap_or_default().contains("food"));
    }

    #[actix_web::test]
    async fn malformed_body_uses_the_error_envelope() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/salaries")
            .insert_header(bearer(Role::Staff, None))
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{\"employee_id\": ")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_failed");
    }

    #[actix_web::test]
    async fn non_numeric_id_uses_the_error_envelope() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/salaries/abc")
            .insert_header(bearer(Role::Staff, None))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_failed");
    }

    #[actix_web::test]
    async fn teachers_cannot_create_salaries() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/salaries")
            .insert_header(bearer(Role::Teacher, None))
            .set_json(json!({
                "employee_id": 1,
                "month": 1,
                "year": 2024,
                "basic_salary": 50000.0
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn report_rejects_month_out_of_range() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/salaries/report?month=0&year=2024")
            .insert_header(bearer(Role::Admin, None))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn others_history_requires_accounts_role() {
        let app = app!();
        // Test tokens belong to user 99.
        let req = test::TestRequest::get()
            .uri("/salaries/employee/12/history")
            .insert_header(bearer(Role::Teacher, None))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn only_admins_delete_salaries() {
        let app = app!();
        let req = test::TestRequest::delete()
            .uri("/salaries/5")
            .insert_header(bearer(Role::Staff, None))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    fn january(employee_id: u64) -> serde_json::Value {
        json!({
            "employee_id": employee_id,
            "month": 1,
            "year": 2024,
            "basic_salary": 50000.0,
            "allowances": {"hra": 10000.0, "da": 5000.0},
            "deductions": {"tax": 5000.0, "pf": 6000.0}
        })
    }

    #[actix_web::test]
    #[ignore = "requires DATABASE_URL pointing at a MySQL server"]
    async fn second_record_for_the_same_period_is_a_duplicate() {
        let pool = migrated_pool().await;
        let employee_id = seed_user(&pool, Role::Teacher, None).await;
        let app = store_app!(pool);

        let req = test::TestRequest::post()
            .uri("/salaries")
            .insert_header(bearer(Role::Staff, None))
            .set_json(january(employee_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["gross_salary"], 65000.0);
        assert_eq!(body["net_salary"], 54000.0);

        let req = test::TestRequest::post()
            .uri("/salaries")
            .insert_header(bearer(Role::Staff, None))
            .set_json(january(employee_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "duplicate_record");
    }

    #[actix_web::test]
    #[ignore = "requires DATABASE_URL pointing at a MySQL server"]
    async fn paid_records_refuse_new_remarks() {
        let pool = migrated_pool().await;
        let employee_id = seed_user(&pool, Role::Staff, None).await;
        let app = store_app!(pool);

        let req = test::TestRequest::post()
            .uri("/salaries")
            .insert_header(bearer(Role::Admin, None))
            .set_json(january(employee_id))
            .to_request();
        let created: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let id = created["id"].as_u64().unwrap();

        for status in ["approved", "paid"] {
            let req = test::TestRequest::patch()
                .uri(&format!("/salaries/{}/status", id))
                .insert_header(bearer(Role::Admin, None))
                .set_json(json!({"status": status}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = test::TestRequest::patch()
            .uri(&format!("/salaries/{}/status", id))
            .insert_header(bearer(Role::Admin, None))
            .set_json(json!({"status": "paid", "remarks": "rewritten"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let remarks: Option<String> =
            sqlx::query_scalar("SELECT remarks FROM salary_records WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(remarks, None);
    }
}
