//! Helpers for handler tests.
//!
//! `state` and `bearer` serve tests that finish before the store is touched.
//! The seeding helpers serve the `#[ignore]`d store-backed tests, which run
//! against `DATABASE_URL` with `cargo test -- --ignored`.

use std::sync::Arc;

use actix_web::web::Data;

use crate::auth::jwt::{TokenSubject, generate_access_token};
use crate::config::Config;
use crate::db::{init_db, lazy_pool};
use crate::model::role::Role;
use crate::utils::notifier::{LogDispatcher, Notifier};

pub struct TestState {
    pub config: Data<Config>,
    pub pool: Data<sqlx::MySqlPool>,
    pub notifier: Data<Notifier>,
}

pub fn state() -> TestState {
    let config = Config::for_tests();
    let pool = lazy_pool(&config.database_url);
    let notifier: Notifier = Arc::new(LogDispatcher);
    TestState {
        config: Data::new(config),
        pool: Data::new(pool),
        notifier: Data::new(notifier),
    }
}

pub fn bearer(role: Role, class_id: Option<u64>) -> (&'static str, String) {
    bearer_for(99, role, class_id)
}

pub fn bearer_for(user_id: u64, role: Role, class_id: Option<u64>) -> (&'static str, String) {
    let config = Config::for_tests();
    let subject = TokenSubject {
        user_id,
        username: format!("{}-user", role),
        role: role.id(),
        class_id,
    };
    let token = generate_access_token(&subject, &config.jwt_secret, 300).unwrap();
    ("Authorization", format!("Bearer {}", token))
}

/// Pool on `DATABASE_URL` with the schema applied. The migrator holds a
/// MySQL lock, so parallel tests can call this safely.
pub async fn migrated_pool() -> sqlx::MySqlPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = init_db(&url).await.expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("apply migrations");
    pool
}

/// Tests share one database, so every seeded name is unique.
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

pub async fn seed_class(pool: &sqlx::MySqlPool) -> u64 {
    sqlx::query("INSERT INTO classes (name, section) VALUES (?, NULL)")
        .bind(unique("class"))
        .execute(pool)
        .await
        .expect("seed class")
        .last_insert_id()
}

pub async fn seed_user(pool: &sqlx::MySqlPool, role: Role, class_id: Option<u64>) -> u64 {
    let username = unique(&role.to_string().to_lowercase());
    sqlx::query(
        "INSERT INTO users (username, password, full_name, role_id, class_id) VALUES (?, 'x', ?, ?, ?)",
    )
    .bind(&username)
    .bind(&username)
    .bind(role.id())
    .bind(class_id)
    .execute(pool)
    .await
    .expect("seed user")
    .last_insert_id()
}

/// Service over `api_routes` backed by a real pool.
macro_rules! store_app {
    ($pool:expr) => {{
        let s = $crate::test_support::state();
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(s.config.clone())
                .app_data(actix_web::web::Data::new($pool.clone()))
                .app_data(s.notifier.clone())
                .configure($crate::routes::api_routes),
        )
        .await
    }};
}
pub(crate) use store_app;
