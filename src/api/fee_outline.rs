use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use sqlx::types::Json;
use tracing::{debug, error, info};
use utoipa::{IntoParams, ToSchema};

use crate::api::school_class::require_class;
use crate::auth::auth::AuthUser;
use crate::error::{AppError, db_fault, is_unique_violation};
use crate::model::fee_outline::{
    self, DuplicateOverrides, FeeOutline, FeeOutlineDraft, FeeOutlinePatch, FeeOutlineRow,
};
use crate::utils::filter::Filters;
use crate::utils::pagination::{FeeOutlineList, Page};

const SELECT_OUTLINE: &str = r#"
    SELECT
        f.id, f.name, f.class_id, c.name AS class_name, f.academic_year, f.total_amount,
        f.components, f.installments, f.concession_types, f.late_fee_structure,
        f.is_active, f.is_default, f.created_by, f.last_modified_by, f.created_at, f.updated_at
    FROM fee_outlines f
    LEFT JOIN classes c ON c.id = f.class_id
"#;

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct FeeOutlineFilter {
    /// Filter by academic year, e.g. 2024-2025
    pub academic_year: Option<String>,
    /// Filter by class
    pub class_id: Option<u64>,
    /// Filter by active flag
    pub is_active: Option<bool>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct AcademicYearQuery {
    /// Restrict to one academic year
    pub academic_year: Option<String>,
}

async fn fetch_outline(pool: &MySqlPool, id: u64) -> Result<FeeOutline, AppError> {
    let sql = format!("{} WHERE f.id = ?", SELECT_OUTLINE);
    let row = sqlx::query_as::<_, FeeOutlineRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_fault("Failed to fetch fee outline"))?;

    row.map(FeeOutline::from)
        .ok_or_else(|| AppError::not_found(format!("Fee outline {} not found", id)))
}

fn default_conflict(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::Conflict(
            "Another default fee outline already exists for this class and academic year"
                .to_string(),
        )
    } else {
        error!(error = %e, "Failed to save fee outline");
        AppError::ServerFault
    }
}

/// Writes an outline. When it is the default, every other default of the same
/// (class, academic year) is demoted first, inside the same transaction.
async fn save_outline(
    pool: &MySqlPool,
    id: Option<u64>,
    draft: &FeeOutlineDraft,
    actor: u64,
) -> Result<u64, AppError> {
    let mut tx = pool.begin().await.map_err(db_fault("Failed to open transaction"))?;

    if draft.is_default {
        let demoted = sqlx::query(
            r#"
            UPDATE fee_outlines
            SET is_default = FALSE
            WHERE class_id = ? AND academic_year = ? AND is_default = TRUE AND id <> ?
            "#,
        )
        .bind(draft.class_id)
        .bind(&draft.academic_year)
        .bind(id.unwrap_or(0))
        .execute(&mut *tx)
        .await
        .map_err(db_fault("Failed to demote previous default fee outline"))?;

        debug!(
            class_id = draft.class_id,
            academic_year = %draft.academic_year,
            demoted = demoted.rows_affected(),
            "Demoted previous default fee outlines"
        );
    }

    let saved_id = match id {
        None => sqlx::query(
            r#"
            INSERT INTO fee_outlines
                (name, class_id, academic_year, total_amount, components, installments,
                 concession_types, late_fee_structure, is_active, is_default, created_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(draft.name.trim())
        .bind(draft.class_id)
        .bind(&draft.academic_year)
        .bind(draft.total_amount)
        .bind(Json(&draft.components))
        .bind(Json(&draft.installments))
        .bind(Json(&draft.concession_types))
        .bind(Json(&draft.late_fee_structure))
        .bind(draft.is_active)
        .bind(draft.is_default)
        .bind(actor)
        .execute(&mut *tx)
        .await
        .map_err(default_conflict)?
        .last_insert_id(),
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE fee_outlines
                SET name = ?, class_id = ?, academic_year = ?, total_amount = ?,
                    components = ?, installments = ?, concession_types = ?,
                    late_fee_structure = ?, is_active = ?, is_default = ?, last_modified_by = ?
                WHERE id = ?
                "#,
            )
            .bind(draft.name.trim())
            .bind(draft.class_id)
            .bind(&draft.academic_year)
            .bind(draft.total_amount)
            .bind(Json(&draft.components))
            .bind(Json(&draft.installments))
            .bind(Json(&draft.concession_types))
            .bind(Json(&draft.late_fee_structure))
            .bind(draft.is_active)
            .bind(draft.is_default)
            .bind(actor)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(default_conflict)?;
            id
        }
    };

    tx.commit().await.map_err(default_conflict)?;
    Ok(saved_id)
}

#[utoipa::path(
    post,
    path = "/api/v1/fee-outlines",
    request_body = FeeOutlineDraft,
    responses(
        (status = 201, description = "Fee outline created", body = FeeOutline),
        (status = 400, description = "Validation failed, e.g. amount mismatch"),
        (status = 404, description = "Class not found"),
        (status = 409, description = "Concurrent default for the same class and year"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Fee Outline"
)]
pub async fn create_fee_outline(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<FeeOutlineDraft>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let draft = payload.into_inner();
    fee_outline::validate(&draft)?;
    require_class(pool.get_ref(), draft.class_id).await?;

    let id = save_outline(pool.get_ref(), None, &draft, auth.user_id).await?;
    info!(fee_outline_id = id, is_default = draft.is_default, "Fee outline created");

    let outline = fetch_outline(pool.get_ref(), id).await?;
    Ok(HttpResponse::Created().json(outline))
}

#[utoipa::path(
    get,
    path = "/api/v1/fee-outlines/{id}",
    params(("id" = u64, Path, description = "Fee outline ID")),
    responses(
        (status = 200, body = FeeOutline),
        (status = 404, description = "Fee outline not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Fee Outline"
)]
pub async fn get_fee_outline(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let outline = fetch_outline(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(outline))
}

#[utoipa::path(
    get,
    path = "/api/v1/fee-outlines",
    params(FeeOutlineFilter),
    responses((status = 200, description = "Paginated fee outlines", body = FeeOutlineList)),
    security(("bearer_auth" = [])),
    tag = "Fee Outline"
)]
pub async fn list_fee_outlines(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<FeeOutlineFilter>,
) -> actix_web::Result<impl Responder> {
    let page = Page::from_query(query.page, query.limit);

    let mut filters = Filters::new();
    if let Some(year) = query.academic_year.as_deref() {
        filters.push("f.academic_year = ?", year);
    }
    if let Some(class_id) = query.class_id {
        filters.push("f.class_id = ?", class_id);
    }
    if let Some(active) = query.is_active {
        filters.push("f.is_active = ?", active);
    }
    let where_sql = filters.where_sql();

    let count_sql = format!("SELECT COUNT(*) FROM fee_outlines f{}", where_sql);
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await
        .map_err(db_fault("Failed to count fee outlines"))?;

    let data_sql = format!(
        "{}{} ORDER BY f.created_at DESC, f.id DESC LIMIT ? OFFSET ?",
        SELECT_OUTLINE, where_sql
    );
    let rows = filters
        .bind_as(sqlx::query_as::<_, FeeOutlineRow>(&data_sql))
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch fee outlines"))?;

    let data: Vec<FeeOutline> = rows.into_iter().map(FeeOutline::from).collect();
    Ok(HttpResponse::Ok().json(page.wrap(data, total)))
}

#[utoipa::path(
    put,
    path = "/api/v1/fee-outlines/{id}",
    params(("id" = u64, Path, description = "Fee outline ID")),
    request_body = FeeOutlinePatch,
    responses(
        (status = 200, description = "Fee outline updated", body = FeeOutline),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Fee outline or class not found"),
        (status = 409, description = "Concurrent default for the same class and year")
    ),
    security(("bearer_auth" = [])),
    tag = "Fee Outline"
)]
pub async fn update_fee_outline(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<FeeOutlinePatch>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let id = path.into_inner();
    let current = fetch_outline(pool.get_ref(), id).await?;
    let class_changed = payload.class_id.is_some_and(|c| c != current.draft.class_id);

    let draft = payload.into_inner().apply(current.draft);
    fee_outline::validate(&draft)?;
    if class_changed {
        require_class(pool.get_ref(), draft.class_id).await?;
    }

    save_outline(pool.get_ref(), Some(id), &draft, auth.user_id).await?;
    info!(fee_outline_id = id, "Fee outline updated");

    let outline = fetch_outline(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(outline))
}

#[utoipa::path(
    delete,
    path = "/api/v1/fee-outlines/{id}",
    params(("id" = u64, Path, description = "Fee outline ID")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Fee outline not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Fee Outline"
)]
pub async fn delete_fee_outline(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let id = path.into_inner();
    let result = sqlx::query("DELETE FROM fee_outlines WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map_err(db_fault("Failed to delete fee outline"))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("Fee outline {} not found", id)).into());
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/fee-outlines/class/{class_id}",
    params(
        ("class_id" = u64, Path, description = "Class ID"),
        AcademicYearQuery
    ),
    responses(
        (status = 200, description = "Outlines of the class, default first", body = [FeeOutline]),
        (status = 404, description = "Class not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Fee Outline"
)]
pub async fn list_by_class(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<AcademicYearQuery>,
) -> actix_web::Result<impl Responder> {
    let class_id = path.into_inner();
    require_class(pool.get_ref(), class_id).await?;

    let mut filters = Filters::new();
    filters.push("f.class_id = ?", class_id);
    if let Some(year) = query.academic_year.as_deref() {
        filters.push("f.academic_year = ?", year);
    }

    let sql = format!(
        "{}{} ORDER BY f.is_default DESC, f.created_at DESC, f.id DESC",
        SELECT_OUTLINE,
        filters.where_sql()
    );
    let rows = filters
        .bind_as(sqlx::query_as::<_, FeeOutlineRow>(&sql))
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch class fee outlines"))?;

    let data: Vec<FeeOutline> = rows.into_iter().map(FeeOutline::from).collect();
    Ok(HttpResponse::Ok().json(data))
}

#[utoipa::path(
    get,
    path = "/api/v1/fee-outlines/class/{class_id}/default",
    params(
        ("class_id" = u64, Path, description = "Class ID"),
        AcademicYearQuery
    ),
    responses(
        (status = 200, body = FeeOutline),
        (status = 404, description = "No default fee outline")
    ),
    security(("bearer_auth" = [])),
    tag = "Fee Outline"
)]
pub async fn get_default(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<AcademicYearQuery>,
) -> actix_web::Result<impl Responder> {
    let class_id = path.into_inner();

    let mut filters = Filters::new();
    filters.push("f.class_id = ?", class_id);
    filters.push_raw("f.is_default = TRUE");
    if let Some(year) = query.academic_year.as_deref() {
        filters.push("f.academic_year = ?", year);
    }

    // Without a year, the most recent year's default wins.
    let sql = format!(
        "{}{} ORDER BY f.academic_year DESC LIMIT 1",
        SELECT_OUTLINE,
        filters.where_sql()
    );
    let row = filters
        .bind_as(sqlx::query_as::<_, FeeOutlineRow>(&sql))
        .fetch_optional(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch default fee outline"))?;

    match row {
        Some(row) => Ok(HttpResponse::Ok().json(FeeOutline::from(row))),
        None => Err(AppError::not_found(format!(
            "No default fee outline for class {}",
            class_id
        ))
        .into()),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/fee-outlines/{id}/duplicate",
    params(("id" = u64, Path, description = "Source fee outline ID")),
    request_body = DuplicateOverrides,
    responses(
        (status = 201, description = "Copy created, never default", body = FeeOutline),
        (status = 404, description = "Source outline or class not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Fee Outline"
)]
pub async fn duplicate_fee_outline(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<DuplicateOverrides>>,
) -> actix_web::Result<impl Responder> {
    auth.require_accounts()?;

    let source_id = path.into_inner();
    let source = fetch_outline(pool.get_ref(), source_id).await?;
    let overrides = payload.map(|p| p.into_inner()).unwrap_or_default();

    let draft = fee_outline::duplicate_draft(&source, overrides);
    fee_outline::validate(&draft)?;
    if draft.class_id != source.draft.class_id {
        require_class(pool.get_ref(), draft.class_id).await?;
    }

    let id = save_outline(pool.get_ref(), None, &draft, auth.user_id).await?;
    info!(fee_outline_id = id, source_id, "Fee outline duplicated");

    let outline = fetch_outline(pool.get_ref(), id).await?;
    Ok(HttpResponse::Created().json(outline))
}
