use std::collections::HashSet;

use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use sqlx::types::Json;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::error::{AppError, db_fault};
use crate::model::announcement::{
    self, Announcement, AnnouncementDraft, AnnouncementPatch, AnnouncementRow, AnnouncementStatus,
    Audience, CreateAnnouncement, Priority, ReadStats,
};
use crate::model::role::Role;
use crate::model::user::{User, Viewer};
use crate::utils::audience_cache;
use crate::utils::filter::Filters;
use crate::utils::notifier::{AnnouncementNotice, Notifier, spawn_dispatch};
use crate::utils::pagination::{AnnouncementList, Page, PageQuery};

const SELECT_ANNOUNCEMENT: &str = r#"
    SELECT
        a.id, a.title, a.content, a.publish_date, a.expiry_date, a.target_audience,
        a.target_classes, a.target_individuals, a.priority, a.status, a.is_pinned,
        a.send_notification, a.created_by, u.full_name AS created_by_name, a.views,
        (SELECT COUNT(*) FROM announcement_reads r WHERE r.announcement_id = a.id) AS read_count,
        a.created_at, a.updated_at
    FROM announcements a
    LEFT JOIN users u ON u.id = a.created_by
"#;

/// Status as `derive_status` would report it at `NOW()`. Stored statuses are
/// only rewritten on save, so filters go through this instead of `a.status`.
macro_rules! derived_status {
    () => {
        "(CASE \
            WHEN a.status IN ('archived', 'expired') THEN a.status \
            WHEN a.expiry_date IS NOT NULL AND a.expiry_date < NOW() THEN 'expired' \
            WHEN a.status = 'draft' AND a.publish_date <= NOW() THEN 'published' \
            ELSE a.status END)"
    };
}

const STATUS_IS: &str = concat!(derived_status!(), " = ?");

/// Published, started and not expired.
const IS_LIVE: &str = concat!(
    derived_status!(),
    " = 'published' AND a.publish_date <= NOW()"
);

const ORDER_FOR_LISTING: &str =
    " ORDER BY FIELD(a.priority, 'urgent', 'high', 'medium', 'low'), a.created_at DESC, a.id DESC";

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct AnnouncementFilter {
    pub status: Option<AnnouncementStatus>,
    pub priority: Option<Priority>,
    pub target_audience: Option<Audience>,
    /// Only published announcements that have started and not expired
    pub active_only: Option<bool>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub limit: Option<u32>,
}

async fn fetch_announcement(pool: &MySqlPool, id: u64) -> Result<Announcement, AppError> {
    let sql = format!("{} WHERE a.id = ?", SELECT_ANNOUNCEMENT);
    let row = sqlx::query_as::<_, AnnouncementRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_fault("Failed to fetch announcement"))?
        .ok_or_else(|| AppError::not_found(format!("Announcement {} not found", id)))?;

    let mut item = Announcement::try_from(row)?;
    item.refresh_status(Utc::now());
    Ok(item)
}

fn to_announcements(rows: Vec<AnnouncementRow>) -> Result<Vec<Announcement>, AppError> {
    let now = Utc::now();
    rows.into_iter()
        .map(|row| {
            let mut item = Announcement::try_from(row)?;
            item.refresh_status(now);
            Ok(item)
        })
        .collect()
}

/// Class membership is read from the store so that moves between classes take
/// effect before the caller's token is refreshed.
async fn load_viewer(pool: &MySqlPool, auth: &AuthUser) -> Result<Viewer, AppError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, full_name, role_id, class_id, is_active FROM users WHERE id = ?",
    )
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await
    .map_err(db_fault("Failed to load viewer"))?;

    Ok(match user {
        Some(u) => Viewer {
            user_id: u.id,
            role: Role::from_id(u.role_id).unwrap_or(auth.role),
            class_id: u.class_id,
        },
        None => auth.viewer(),
    })
}

/// Creator or admin.
fn require_owner(auth: &AuthUser, item: &Announcement) -> actix_web::Result<()> {
    if item.created_by == auth.user_id {
        Ok(())
    } else {
        auth.require_admin()
    }
}

fn notify(notifier: &Notifier, id: u64, draft: &AnnouncementDraft) {
    spawn_dispatch(
        notifier,
        AnnouncementNotice {
            announcement_id: id,
            title: draft.title.clone(),
            audience: draft.target_audience,
            target_classes: draft.target_classes.clone(),
            target_individuals: draft.target_individuals.clone(),
        },
    );
}

#[utoipa::path(
    post,
    path = "/api/v1/announcements",
    request_body = CreateAnnouncement,
    responses(
        (status = 201, description = "Announcement created", body = Announcement),
        (status = 400, description = "Validation failed, e.g. class audience without classes"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn create_announcement(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    notifier: web::Data<Notifier>,
    payload: web::Json<CreateAnnouncement>,
) -> actix_web::Result<impl Responder> {
    auth.require_employee()?;

    let now = Utc::now();
    let draft = announcement::prepare(payload.into_inner().into_draft(now), now)?;

    let result = sqlx::query(
        r#"
        INSERT INTO announcements
            (title, content, publish_date, expiry_date, target_audience, target_classes,
             target_individuals, priority, status, is_pinned, send_notification, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(draft.title.trim())
    .bind(&draft.content)
    .bind(draft.publish_date)
    .bind(draft.expiry_date)
    .bind(draft.target_audience.as_ref())
    .bind(Json(&draft.target_classes))
    .bind(Json(&draft.target_individuals))
    .bind(draft.priority.as_ref())
    .bind(draft.status.as_ref())
    .bind(draft.is_pinned)
    .bind(draft.send_notification)
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await
    .map_err(db_fault("Failed to create announcement"))?;

    let id = result.last_insert_id();
    info!(announcement_id = id, audience = %draft.target_audience, status = %draft.status, "Announcement created");

    if draft.send_notification && draft.status == AnnouncementStatus::Published {
        notify(notifier.get_ref(), id, &draft);
    }

    let item = fetch_announcement(pool.get_ref(), id).await?;
    Ok(HttpResponse::Created().json(item))
}

#[utoipa::path(
    get,
    path = "/api/v1/announcements/{id}",
    params(("id" = u64, Path, description = "Announcement ID")),
    responses(
        (status = 200, body = Announcement),
        (status = 404, description = "Announcement not found or not addressed to the caller")
    ),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn get_announcement(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    let mut item = fetch_announcement(pool.get_ref(), id).await?;

    if !auth.role.is_employee() {
        let viewer = load_viewer(pool.get_ref(), &auth).await?;
        if !item.resolves_audience(&viewer) || !item.is_active_for(Utc::now()) {
            return Err(AppError::not_found(format!("Announcement {} not found", id)).into());
        }
    }

    sqlx::query("UPDATE announcements SET views = views + 1 WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map_err(db_fault("Failed to count announcement view"))?;
    item.views += 1;

    Ok(HttpResponse::Ok().json(item))
}

#[utoipa::path(
    get,
    path = "/api/v1/announcements",
    params(AnnouncementFilter),
    responses((status = 200, description = "Paginated announcements", body = AnnouncementList)),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn list_announcements(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AnnouncementFilter>,
) -> actix_web::Result<impl Responder> {
    auth.require_employee()?;

    let page = Page::from_query(query.page, query.limit);

    let mut filters = Filters::new();
    if let Some(status) = query.status {
        filters.push(STATUS_IS, status.as_ref());
    }
    if let Some(priority) = query.priority {
        filters.push("a.priority = ?", priority.as_ref());
    }
    if let Some(audience) = query.target_audience {
        filters.push("a.target_audience = ?", audience.as_ref());
    }
    if query.active_only.unwrap_or(false) {
        filters.push_raw(IS_LIVE);
    }
    let where_sql = filters.where_sql();

    let count_sql = format!("SELECT COUNT(*) FROM announcements a{}", where_sql);
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await
        .map_err(db_fault("Failed to count announcements"))?;

    let data_sql = format!(
        "{}{}{} LIMIT ? OFFSET ?",
        SELECT_ANNOUNCEMENT, where_sql, ORDER_FOR_LISTING
    );
    let rows = filters
        .bind_as(sqlx::query_as::<_, AnnouncementRow>(&data_sql))
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch announcements"))?;

    Ok(HttpResponse::Ok().json(page.wrap(to_announcements(rows)?, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/announcements/me",
    params(PageQuery),
    responses((status = 200, description = "Active announcements addressed to the caller", body = AnnouncementList)),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn list_for_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PageQuery>,
) -> actix_web::Result<impl Responder> {
    let page = Page::from(query.into_inner());
    let viewer = load_viewer(pool.get_ref(), &auth).await?;

    let sql = format!("{} WHERE {}{}", SELECT_ANNOUNCEMENT, IS_LIVE, ORDER_FOR_LISTING);
    let rows = sqlx::query_as::<_, AnnouncementRow>(&sql)
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch active announcements"))?;

    let read: HashSet<u64> =
        sqlx::query_scalar::<_, u64>("SELECT announcement_id FROM announcement_reads WHERE user_id = ?")
            .bind(viewer.user_id)
            .fetch_all(pool.get_ref())
            .await
            .map_err(db_fault("Failed to fetch read receipts"))?
            .into_iter()
            .collect();

    let now = Utc::now();
    let mut visible: Vec<Announcement> = to_announcements(rows)?
        .into_iter()
        .filter(|a| a.is_active_for(now) && a.resolves_audience(&viewer))
        .map(|mut a| {
            a.is_read = Some(read.contains(&a.id));
            a
        })
        .collect();
    announcement::sort_for_listing(&mut visible);

    debug!(user_id = viewer.user_id, visible = visible.len(), "Resolved announcements for user");

    let total = visible.len() as i64;
    Ok(HttpResponse::Ok().json(page.wrap(page.slice(visible), total)))
}

#[utoipa::path(
    put,
    path = "/api/v1/announcements/{id}",
    params(("id" = u64, Path, description = "Announcement ID")),
    request_body = AnnouncementPatch,
    responses(
        (status = 200, description = "Announcement updated", body = Announcement),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Only the author or an admin may edit"),
        (status = 404, description = "Announcement not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn update_announcement(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    notifier: web::Data<Notifier>,
    path: web::Path<u64>,
    payload: web::Json<AnnouncementPatch>,
) -> actix_web::Result<impl Responder> {
    auth.require_employee()?;

    let id = path.into_inner();
    let current = fetch_announcement(pool.get_ref(), id).await?;
    require_owner(&auth, &current)?;

    let was_published = current.draft.status == AnnouncementStatus::Published;
    let draft = announcement::prepare(payload.into_inner().apply(current.draft), Utc::now())?;

    sqlx::query(
        r#"
        UPDATE announcements
        SET title = ?, content = ?, publish_date = ?, expiry_date = ?, target_audience = ?,
            target_classes = ?, target_individuals = ?, priority = ?, status = ?,
            is_pinned = ?, send_notification = ?
        WHERE id = ?
        "#,
    )
    .bind(draft.title.trim())
    .bind(&draft.content)
    .bind(draft.publish_date)
    .bind(draft.expiry_date)
    .bind(draft.target_audience.as_ref())
    .bind(Json(&draft.target_classes))
    .bind(Json(&draft.target_individuals))
    .bind(draft.priority.as_ref())
    .bind(draft.status.as_ref())
    .bind(draft.is_pinned)
    .bind(draft.send_notification)
    .bind(id)
    .execute(pool.get_ref())
    .await
    .map_err(db_fault("Failed to update announcement"))?;

    info!(announcement_id = id, status = %draft.status, "Announcement updated");

    if draft.send_notification && !was_published && draft.status == AnnouncementStatus::Published {
        notify(notifier.get_ref(), id, &draft);
    }

    let item = fetch_announcement(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(item))
}

#[utoipa::path(
    delete,
    path = "/api/v1/announcements/{id}",
    params(("id" = u64, Path, description = "Announcement ID")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 403, description = "Only the author or an admin may delete"),
        (status = 404, description = "Announcement not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn delete_announcement(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_employee()?;

    let id = path.into_inner();
    let current = fetch_announcement(pool.get_ref(), id).await?;
    require_owner(&auth, &current)?;

    // Read receipts go with it (ON DELETE CASCADE).
    sqlx::query("DELETE FROM announcements WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map_err(db_fault("Failed to delete announcement"))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}

#[utoipa::path(
    patch,
    path = "/api/v1/announcements/{id}/pin",
    params(("id" = u64, Path, description = "Announcement ID")),
    responses(
        (status = 200, description = "Pin flag flipped", body = Announcement),
        (status = 403, description = "Only the author or an admin may pin"),
        (status = 404, description = "Announcement not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn toggle_pin(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_employee()?;

    let id = path.into_inner();
    let current = fetch_announcement(pool.get_ref(), id).await?;
    require_owner(&auth, &current)?;

    sqlx::query("UPDATE announcements SET is_pinned = NOT is_pinned WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map_err(db_fault("Failed to toggle pin"))?;

    let item = fetch_announcement(pool.get_ref(), id).await?;
    info!(announcement_id = id, pinned = item.draft.is_pinned, "Announcement pin toggled");
    Ok(HttpResponse::Ok().json(item))
}

#[utoipa::path(
    post,
    path = "/api/v1/announcements/{id}/read",
    params(("id" = u64, Path, description = "Announcement ID")),
    responses(
        (status = 200, description = "Marked as read, repeated calls are harmless"),
        (status = 404, description = "Announcement not found or not addressed to the caller")
    ),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn mark_read(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    let item = fetch_announcement(pool.get_ref(), id).await?;
    let viewer = load_viewer(pool.get_ref(), &auth).await?;

    let visible = auth.role.is_employee() || item.is_active_for(Utc::now());
    if !visible || !item.resolves_audience(&viewer) {
        return Err(AppError::not_found(format!("Announcement {} not found", id)).into());
    }

    let inserted = sqlx::query(
        "INSERT IGNORE INTO announcement_reads (announcement_id, user_id) VALUES (?, ?)",
    )
    .bind(id)
    .bind(viewer.user_id)
    .execute(pool.get_ref())
    .await
    .map_err(db_fault("Failed to record read receipt"))?
    .rows_affected();

    debug!(announcement_id = id, user_id = viewer.user_id, first_read = inserted > 0, "Read receipt");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Marked as read",
        "announcement_id": id
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/announcements/{id}/stats",
    params(("id" = u64, Path, description = "Announcement ID")),
    responses(
        (status = 200, description = "Read statistics", body = ReadStats),
        (status = 404, description = "Announcement not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Announcement"
)]
pub async fn read_stats(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_employee()?;

    let id = path.into_inner();
    let item = fetch_announcement(pool.get_ref(), id).await?;
    let d = &item.draft;

    let total_target_users = audience_cache::target_user_count(
        pool.get_ref(),
        d.target_audience,
        &d.target_classes,
        &d.target_individuals,
    )
    .await
    .map_err(db_fault("Failed to count target users"))?;

    Ok(HttpResponse::Ok().json(ReadStats {
        announcement_id: id,
        target_audience: d.target_audience,
        total_target_users,
        read_count: item.read_count,
        read_percentage: announcement::read_percentage(item.read_count, total_target_users),
    }))
}
