use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

pub async fn init_db(database_url: &str) -> Result<MySqlPool, sqlx::Error> {
    MySqlPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Pool that connects on first use. Lets handler tests run without a server
/// as long as the request is rejected before touching the store.
#[cfg(test)]
pub fn lazy_pool(database_url: &str) -> MySqlPool {
    MySqlPoolOptions::new()
        .connect_lazy(database_url)
        .expect("valid test database url")
}
