use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::error::{AppError, db_fault};
use crate::model::message::{Message, MessageRow, MessageType, SendMessage};
use crate::model::role::Role;
use crate::model::user::User;
use crate::utils::filter::Filters;
use crate::utils::pagination::{MessageList, Page, PageQuery};

const SELECT_MESSAGE: &str = r#"
    SELECT
        m.id, m.sender_id, u.full_name AS sender_name, m.receiver_id, m.message_type,
        m.subject, m.content, m.fee_amount, m.fee_type, m.due_date, m.remaining_amount,
        m.is_read, m.read_at, m.priority, m.created_at
    FROM messages m
    LEFT JOIN users u ON u.id = m.sender_id
"#;

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct InboxFilter {
    pub message_type: Option<MessageType>,
    pub is_read: Option<bool>,
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    /// Items per page
    pub limit: Option<u32>,
}

fn to_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>, AppError> {
    rows.into_iter().map(Message::try_from).collect()
}

async fn fetch_message(pool: &MySqlPool, id: u64) -> Result<Message, AppError> {
    let sql = format!("{} WHERE m.id = ?", SELECT_MESSAGE);
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_fault("Failed to fetch message"))?
        .ok_or_else(|| AppError::not_found(format!("Message {} not found", id)))?;

    Message::try_from(row)
}

/// Messages go to active students only.
async fn require_student(pool: &MySqlPool, receiver_id: u64) -> Result<User, AppError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, full_name, role_id, class_id, is_active FROM users WHERE id = ?",
    )
    .bind(receiver_id)
    .fetch_optional(pool)
    .await
    .map_err(db_fault("Failed to look up receiver"))?;

    match user {
        Some(u) if u.is_active && Role::from_id(u.role_id) == Some(Role::Student) => Ok(u),
        _ => Err(AppError::not_found(format!("Student {} not found", receiver_id))),
    }
}

/// NotFound unless the message is addressed to `receiver_id` and not deleted.
async fn owned_message(pool: &MySqlPool, id: u64, receiver_id: u64) -> Result<(), AppError> {
    let found = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM messages WHERE id = ? AND receiver_id = ? AND is_deleted = FALSE",
    )
    .bind(id)
    .bind(receiver_id)
    .fetch_optional(pool)
    .await
    .map_err(db_fault("Failed to look up message"))?;

    found
        .map(|_| ())
        .ok_or_else(|| AppError::not_found(format!("Message {} not found", id)))
}

#[utoipa::path(
    post,
    path = "/api/v1/messages",
    request_body = SendMessage,
    responses(
        (status = 201, description = "Message sent", body = Message),
        (status = 400, description = "Validation failed, e.g. fee reminder without amount"),
        (status = 404, description = "Receiver is not an active student"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Message"
)]
pub async fn send_message(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<SendMessage>,
) -> actix_web::Result<impl Responder> {
    auth.require_employee()?;

    let msg = payload.into_inner().normalize()?;
    let receiver = require_student(pool.get_ref(), msg.receiver_id).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO messages
            (sender_id, receiver_id, message_type, subject, content, fee_amount, fee_type,
             due_date, remaining_amount, priority)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(auth.user_id)
    .bind(receiver.id)
    .bind(msg.message_type.as_ref())
    .bind(msg.subject.trim())
    .bind(&msg.content)
    .bind(msg.fee_amount)
    .bind(&msg.fee_type)
    .bind(msg.due_date)
    .bind(msg.remaining_amount)
    .bind(msg.priority.as_ref())
    .execute(pool.get_ref())
    .await
    .map_err(db_fault("Failed to send message"))?;

    let id = result.last_insert_id();
    info!(
        message_id = id,
        sender_id = auth.user_id,
        receiver_id = receiver.id,
        message_type = %msg.message_type,
        "Message sent"
    );

    let message = fetch_message(pool.get_ref(), id).await?;
    Ok(HttpResponse::Created().json(message))
}

#[utoipa::path(
    get,
    path = "/api/v1/messages",
    params(InboxFilter),
    responses((status = 200, description = "Caller's inbox, newest first", body = MessageList)),
    security(("bearer_auth" = [])),
    tag = "Message"
)]
pub async fn list_inbox(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<InboxFilter>,
) -> actix_web::Result<impl Responder> {
    let page = Page::from_query(query.page, query.limit);

    let mut filters = Filters::new();
    filters.push("m.receiver_id = ?", auth.user_id);
    filters.push_raw("m.is_deleted = FALSE");
    if let Some(kind) = query.message_type {
        filters.push("m.message_type = ?", kind.as_ref());
    }
    if let Some(is_read) = query.is_read {
        filters.push("m.is_read = ?", is_read);
    }
    let where_sql = filters.where_sql();

    let count_sql = format!("SELECT COUNT(*) FROM messages m{}", where_sql);
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await
        .map_err(db_fault("Failed to count messages"))?;

    let data_sql = format!(
        "{}{} ORDER BY m.created_at DESC, m.id DESC LIMIT ? OFFSET ?",
        SELECT_MESSAGE, where_sql
    );
    let rows = filters
        .bind_as(sqlx::query_as::<_, MessageRow>(&data_sql))
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch messages"))?;

    Ok(HttpResponse::Ok().json(page.wrap(to_messages(rows)?, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/messages/sent",
    params(PageQuery),
    responses((status = 200, description = "Messages sent by the caller", body = MessageList)),
    security(("bearer_auth" = [])),
    tag = "Message"
)]
pub async fn list_sent(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PageQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_employee()?;
    let page = Page::from(query.into_inner());

    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE sender_id = ?")
        .bind(auth.user_id)
        .fetch_one(pool.get_ref())
        .await
        .map_err(db_fault("Failed to count sent messages"))?;

    let sql = format!(
        "{} WHERE m.sender_id = ? ORDER BY m.created_at DESC, m.id DESC LIMIT ? OFFSET ?",
        SELECT_MESSAGE
    );
    let rows = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(auth.user_id)
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await
        .map_err(db_fault("Failed to fetch sent messages"))?;

    Ok(HttpResponse::Ok().json(page.wrap(to_messages(rows)?, total)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/messages/{id}/read",
    params(("id" = u64, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Marked as read", body = Message),
        (status = 404, description = "Not addressed to the caller or deleted")
    ),
    security(("bearer_auth" = [])),
    tag = "Message"
)]
pub async fn mark_read(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    owned_message(pool.get_ref(), id, auth.user_id).await?;

    sqlx::query(
        "UPDATE messages SET is_read = TRUE, read_at = COALESCE(read_at, NOW()) WHERE id = ?",
    )
    .bind(id)
    .execute(pool.get_ref())
    .await
    .map_err(db_fault("Failed to mark message read"))?;

    let message = fetch_message(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(message))
}

#[utoipa::path(
    delete,
    path = "/api/v1/messages/{id}",
    params(("id" = u64, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Removed from the inbox"),
        (status = 404, description = "Not addressed to the caller or already deleted")
    ),
    security(("bearer_auth" = [])),
    tag = "Message"
)]
pub async fn delete_message(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    owned_message(pool.get_ref(), id, auth.user_id).await?;

    sqlx::query("UPDATE messages SET is_deleted = TRUE WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map_err(db_fault("Failed to delete message"))?;

    info!(message_id = id, receiver_id = auth.user_id, "Message deleted by receiver");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/messages/unread-count",
    responses((status = 200, description = "Number of unread messages", example = json!({"unread_count": 3}))),
    security(("bearer_auth" = [])),
    tag = "Message"
)]
pub async fn unread_count(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> actix_web::Result<impl Responder> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM messages WHERE receiver_id = ? AND is_read = FALSE AND is_deleted = FALSE",
    )
    .bind(auth.user_id)
    .fetch_one(pool.get_ref())
    .await
    .map_err(db_fault("Failed to count unread messages"))?;

    Ok(HttpResponse::Ok().json(json!({ "unread_count": count })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::api_routes;
    use crate::test_support::{
        bearer, bearer_for, migrated_pool, seed_class, seed_user, state, store_app,
    };
    use actix_web::{App, http::StatusCode, test};

    macro_rules! app {
        () => {{
            let s = state();
            test::init_service(
                App::new()
                    .app_data(s.config.clone())
                    .app_data(s.pool.clone())
                    .configure(api_routes),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn fee_reminder_needs_an_amount() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/messages")
            .insert_header(bearer(Role::Staff, None))
            .set_json(json!({
                "receiver_id": 42,
                "message_type": "fee_reminder",
                "subject": "Fee due",
                "content": "Please pay the April installment."
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["message"].as_str().unwrap().contains("fee_amount"));
    }

    #[actix_web::test]
    async fn students_cannot_send() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/messages")
            .insert_header(bearer(Role::Student, Some(2)))
            .set_json(json!({
                "receiver_id": 42,
                "subject": "Hi",
                "content": "Hello"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn sent_box_is_for_staff() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/messages/sent")
            .insert_header(bearer(Role::Parent, None))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn inbox_requires_a_token() {
        let app = app!();
        let req = test::TestRequest::get().uri("/messages/unread-count").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    #[ignore = "requires DATABASE_URL pointing at a MySQL server"]
    async fn only_the_receiver_reads_or_deletes() {
        let pool = migrated_pool().await;
        let class_id = seed_class(&pool).await;
        let staff = seed_user(&pool, Role::Staff, None).await;
        let receiver = seed_user(&pool, Role::Student, Some(class_id)).await;
        let other = seed_user(&pool, Role::Student, Some(class_id)).await;
        let app = store_app!(pool);

        let req = test::TestRequest::post()
            .uri("/messages")
            .insert_header(bearer_for(staff, Role::Staff, None))
            .set_json(json!({
                "receiver_id": receiver,
                "message_type": "fee_reminder",
                "subject": "Fee due",
                "content": "Please pay the April installment.",
                "fee_amount": 4000.0
            }))
            .to_request();
        let sent: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let id = sent["id"].as_u64().unwrap();

        let outsider = bearer_for(other, Role::Student, Some(class_id));
        for req in [
            test::TestRequest::patch().uri(&format!("/messages/{}/read", id)),
            test::TestRequest::delete().uri(&format!("/messages/{}", id)),
        ] {
            let resp = test::call_service(&app, req.insert_header(outsider.clone()).to_request()).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }

        let owner = bearer_for(receiver, Role::Student, Some(class_id));
        for _ in 0..2 {
            let req = test::TestRequest::patch()
                .uri(&format!("/messages/{}/read", id))
                .insert_header(owner.clone())
                .to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["is_read"], true);
        }
    }

    #[actix_web::test]
    #[ignore = "requires DATABASE_URL pointing at a MySQL server"]
    async fn unread_count_skips_deleted_messages() {
        let pool = migrated_pool().await;
        let class_id = seed_class(&pool).await;
        let staff = seed_user(&pool, Role::Staff, None).await;
        let receiver = seed_user(&pool, Role::Student, Some(class_id)).await;
        let app = store_app!(pool);

        let mut ids = Vec::new();
        for subject in ["Trip", "Library"] {
            let req = test::TestRequest::post()
                .uri("/messages")
                .insert_header(bearer_for(staff, Role::Staff, None))
                .set_json(json!({
                    "receiver_id": receiver,
                    "subject": subject,
                    "content": "See the notice board."
                }))
                .to_request();
            let sent: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            ids.push(sent["id"].as_u64().unwrap());
        }

        let owner = bearer_for(receiver, Role::Student, Some(class_id));
        let req = test::TestRequest::delete()
            .uri(&format!("/messages/{}", ids[0]))
            .insert_header(owner.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri("/messages/unread-count")
            .insert_header(owner.clone())
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["unread_count"], 1);

        let req = test::TestRequest::delete()
            .uri(&format!("/messages/{}", ids[0]))
            .insert_header(owner)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
