use actix_web::{HttpResponse, Responder, web};
use sqlx::MySqlPool;

use crate::auth::auth::AuthUser;
use crate::error::{AppError, db_fault};
use crate::model::school_class::SchoolClass;

pub async fn class_exists(pool: &MySqlPool, class_id: u64) -> Result<bool, AppError> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM classes WHERE id = ? LIMIT 1)")
        .bind(class_id)
        .fetch_one(pool)
        .await
        .map_err(db_fault("Failed to check class"))
}

/// Fails with `NotFound` when the class does not exist.
pub async fn require_class(pool: &MySqlPool, class_id: u64) -> Result<(), AppError> {
    if class_exists(pool, class_id).await? {
        Ok(())
    } else {
        Err(AppError::not_found(format!("Class {} not found", class_id)))
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/classes",
    responses(
        (status = 200, description = "All classes", body = [SchoolClass]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Class"
)]
pub async fn list_classes(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> actix_web::Result<impl Responder> {
    let classes = sqlx::query_as::<_, SchoolClass>(
        "SELECT id, name, section FROM classes ORDER BY name, section",
    )
    .fetch_all(pool.get_ref())
    .await
    .map_err(db_fault("Failed to fetch classes"))?;

    Ok(HttpResponse::Ok().json(classes))
}
