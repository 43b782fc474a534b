use crate::{
    api::school_class::class_exists,
    auth::{
        auth::AuthUser,
        jwt::{TokenSubject, generate_access_token, generate_refresh_token, verify_token},
        password::{hash_password, verify_password},
    },
    config::Config,
    error::is_unique_violation,
    model::role::Role,
    models::{LoginReqDto, TokenType, UserReq, UserSql},
    utils::audience_cache,
};
use actix_web::{HttpRequest, HttpResponse, Responder, ResponseError, get, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};

/// Inserts a new user. Duplicate usernames surface as 409.
async fn insert_user(user: &UserReq, role: Role, pool: &MySqlPool) -> Result<u64, HttpResponse> {
    let hashed = hash_password(&user.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        HttpResponse::InternalServerError().json(json!({
            "error": "Failed to register user"
        }))
    })?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, password, full_name, role_id, class_id)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.username.trim().to_lowercase())
    .bind(hashed)
    .bind(user.full_name.trim())
    .bind(role.id())
    .bind(user.class_id)
    .execute(pool)
    .await;

    match result {
        Ok(done) => {
            // audience sizes changed
            audience_cache::invalidate();
            Ok(done.last_insert_id())
        }
        Err(e) => {
            if is_unique_violation(&e) {
                return Err(HttpResponse::Conflict().json(json!({
                    "error": "Username already exists"
                })));
            }

            error!(error = %e, "Failed to insert user");
            Err(HttpResponse::InternalServerError().json(json!({
                "error": "Failed to register user"
            })))
        }
    }
}

/// Checks the registration payload. Returns the parsed role.
///
/// Self-registration is open to students and parents only. Employee and admin
/// accounts are created by an admin.
fn validate_registration(user: &UserReq, by_admin: bool) -> Result<Role, &'static str> {
    if user.username.trim().is_empty() || user.password.is_empty() {
        return Err("Username and password must not be empty");
    }
    if user.full_name.trim().is_empty() {
        return Err("Full name must not be empty");
    }
    let role = Role::from_id(user.role_id).ok_or("Unknown role")?;
    if !by_admin && !matches!(role, Role::Student | Role::Parent) {
        return Err("Only students and parents can self-register");
    }
    if role == Role::Student && user.class_id.is_none() {
        return Err("Students must be assigned to a class");
    }
    if role != Role::Student && user.class_id.is_some() {
        return Err("Only students belong to a class");
    }
    Ok(role)
}

/// Public registration handler
pub async fn register(user: web::Json<UserReq>, pool: web::Data<MySqlPool>) -> impl Responder {
    register_user(&user, pool.get_ref(), false).await
}

/// Account creation by an admin, any role.
pub async fn create_user(
    auth: AuthUser,
    user: web::Json<UserReq>,
    pool: web::Data<MySqlPool>,
) -> impl Responder {
    if let Err(e) = auth.require_admin() {
        return e.error_response();
    }
    info!(admin_id = auth.user_id, role_id = user.role_id, "Admin creating user");
    register_user(&user, pool.get_ref(), true).await
}

async fn register_user(user: &UserReq, pool: &MySqlPool, by_admin: bool) -> HttpResponse {
    let role = match validate_registration(user, by_admin) {
        Ok(role) => role,
        Err(msg) => return HttpResponse::BadRequest().json(json!({ "error": msg })),
    };

    if let Some(class_id) = user.class_id {
        match class_exists(pool, class_id).await {
            Ok(true) => {}
            Ok(false) => {
                return HttpResponse::NotFound().json(json!({ "error": "Class not found" }));
            }
            Err(e) => return e.error_response(),
        }
    }

    match insert_user(user, role, pool).await {
        Ok(id) => HttpResponse::Created().json(json!({
            "message": "User registered successfully",
            "id": id
        })),
        Err(err_resp) => err_resp,
    }
}

#[derive(Serialize, Deserialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
}

async fn store_refresh_token(
    pool: &MySqlPool,
    user_id: u64,
    jti: &str,
    exp: usize,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user_id)
    .bind(jti)
    .bind(exp as i64)
    .execute(pool)
    .await
    .map(|_| ())
}

#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    info!("Login request received");

    if user.username.trim().is_empty() || user.password.is_empty() {
        info!("Validation failed: empty username or password");
        return HttpResponse::BadRequest().body("Username or password required");
    }

    debug!("Fetching user from database");

    let db_user = match sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, username, password, role_id, class_id
        FROM users
        WHERE username = ? AND is_active = TRUE
        "#,
    )
    .bind(user.username.trim().to_lowercase())
    .fetch_optional(pool.get_ref())
    .await
    {
        Ok(Some(user)) => {
            debug!(user_id = user.id, "User found");
            user
        }
        Ok(None) => {
            info!("Invalid credentials: user not found");
            return HttpResponse::Unauthorized().body("Invalid credentials");
        }
        Err(e) => {
            error!(error = %e, "Database error while fetching user");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return HttpResponse::Unauthorized().body("Invalid credentials");
    }

    let subject = TokenSubject {
        user_id: db_user.id,
        username: db_user.username.clone(),
        role: db_user.role_id,
        class_id: db_user.class_id,
    };

    let tokens = generate_access_token(&subject, &config.jwt_secret, config.access_token_ttl)
        .and_then(|access| {
            generate_refresh_token(&subject, &config.jwt_secret, config.refresh_token_ttl)
                .map(|(refresh, claims)| (access, refresh, claims))
        });

    let (access_token, refresh_token, refresh_claims) = match tokens {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "Failed to sign tokens");
            return HttpResponse::InternalServerError().finish();
        }
    };

    debug!(user_id = db_user.id, jti = %refresh_claims.jti, "Storing refresh token");

    if let Err(e) = store_refresh_token(
        pool.get_ref(),
        db_user.id,
        &refresh_claims.jti,
        refresh_claims.exp,
    )
    .await
    {
        error!(error = %e, "Failed to store refresh token");
        return HttpResponse::InternalServerError().finish();
    }

    // non-fatal
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!("Login successful");

    HttpResponse::Ok().json(LoginResponse {
        access_token,
        refresh_token,
    })
}

#[get("/me")]
pub async fn me(auth: AuthUser) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "user_id": auth.user_id,
        "username": auth.username,
        "role": auth.role,
        "class_id": auth.class_id
    }))
}

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

#[derive(sqlx::FromRow)]
struct RefreshRecord {
    id: u64,
    user_id: u64,
    revoked: bool,
}

pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let Some(token) = bearer(&req) else {
        return HttpResponse::Unauthorized().body("No token");
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::Unauthorized().finish(),
    };

    let record = sqlx::query_as::<_, RefreshRecord>(
        r#"
        SELECT id, user_id, revoked
        FROM refresh_tokens
        WHERE jti = ?
        "#,
    )
    .bind(&claims.jti)
    .fetch_optional(pool.get_ref())
    .await;

    let record = match record {
        Ok(Some(r)) if !r.revoked => r,
        Ok(_) => return HttpResponse::Unauthorized().finish(),
        Err(e) => {
            error!(error = %e, "Failed to look up refresh token");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let subject = TokenSubject {
        user_id: claims.user_id,
        username: claims.sub.clone(),
        role: claims.role,
        class_id: claims.class_id,
    };

    let (new_refresh_token, new_claims) =
        match generate_refresh_token(&subject, &config.jwt_secret, config.refresh_token_ttl) {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "Failed to sign refresh token");
                return HttpResponse::InternalServerError().finish();
            }
        };

    let access_token =
        match generate_access_token(&subject, &config.jwt_secret, config.access_token_ttl) {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "Failed to sign access token");
                return HttpResponse::InternalServerError().finish();
            }
        };

    // Rotate: revoke the old token and store the new one together.
    let rotated: Result<(), sqlx::Error> = async {
        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
            .bind(record.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, jti, expires_at)
            VALUES (?, ?, FROM_UNIXTIME(?))
            "#,
        )
        .bind(record.user_id)
        .bind(&new_claims.jti)
        .bind(new_claims.exp as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }
    .await;

    if let Err(e) = rotated {
        error!(error = %e, "Failed to rotate refresh token");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok().json(LoginResponse {
        access_token,
        refresh_token: new_refresh_token,
    })
}

pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let Some(token) = bearer(&req) else {
        return HttpResponse::NoContent().finish();
    };

    // only refresh tokens can logout
    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    // idempotent
    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(role_id: u8, class_id: Option<u64>) -> UserReq {
        UserReq {
            username: "asha".to_string(),
            password: "pw".to_string(),
            full_name: "Asha Rao".to_string(),
            role_id,
            class_id,
        }
    }

    #[test]
    fn students_need_a_class() {
        assert_eq!(
            validate_registration(&request(Role::Student.id(), None), false),
            Err("Students must be assigned to a class")
        );
        assert_eq!(
            validate_registration(&request(Role::Student.id(), Some(3)), false),
            Ok(Role::Student)
        );
        assert_eq!(
            validate_registration(&request(Role::Parent.id(), None), false),
            Ok(Role::Parent)
        );
    }

    #[test]
    fn employees_cannot_self_register() {
        for role in [Role::Admin, Role::Teacher, Role::Staff] {
            assert_eq!(
                validate_registration(&request(role.id(), None), false),
                Err("Only students and parents can self-register")
            );
        }
    }

    #[test]
    fn admins_create_employee_accounts() {
        assert_eq!(
            validate_registration(&request(Role::Staff.id(), None), true),
            Ok(Role::Staff)
        );
        assert!(validate_registration(&request(Role::Teacher.id(), Some(3)), true).is_err());
        assert_eq!(
            validate_registration(&request(Role::Teacher.id(), None), true),
            Ok(Role::Teacher)
        );
    }

    #[test]
    fn unknown_roles_are_refused() {
        assert_eq!(
            validate_registration(&request(9, None), true),
            Err("Unknown role")
        );
    }

    #[actix_web::test]
    async fn public_registration_refuses_staff_accounts() {
        use actix_web::{App, http::StatusCode, test};

        let s = crate::test_support::state();
        let app = test::init_service(
            App::new()
                .app_data(s.pool.clone())
                .route("/auth/register", web::post().to(register)),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({
                "username": "mallory",
                "password": "pw",
                "full_name": "Mallory",
                "role_id": Role::Staff.id()
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn only_admins_create_users() {
        use crate::routes::api_routes;
        use crate::test_support::bearer;
        use actix_web::{App, http::StatusCode, test};

        let s = crate::test_support::state();
        let app = test::init_service(
            App::new()
                .app_data(s.config.clone())
                .app_data(s.pool.clone())
                .app_data(s.notifier.clone())
                .configure(api_routes),
        )
        .await;
        let body = json!({
            "username": "new.teacher",
            "password": "pw",
            "full_name": "New Teacher",
            "role_id": Role::Teacher.id()
        });

        let req = test::TestRequest::post()
            .uri("/users")
            .insert_header(bearer(Role::Staff, None))
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/users")
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
