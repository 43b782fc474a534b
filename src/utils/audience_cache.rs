use anyhow::Result;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::time::Duration;

use crate::model::{announcement::Audience, role::Role};

/// Number of active users behind an audience key, e.g. `role:students` or `class:3,5`.
/// Entries expire after five minutes and are dropped on registration.
pub static AUDIENCE_CACHE: Lazy<Cache<String, i64>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(10_000)
        .time_to_live(Duration::from_secs(300))
        .build()
});

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Cache key for an audience. `None` when the size is known without the store.
pub fn audience_key(audience: Audience, classes: &[u64]) -> Option<String> {
    match audience {
        Audience::All => Some("all".to_string()),
        Audience::Students | Audience::Teachers | Audience::Staff => {
            Some(format!("role:{}", audience))
        }
        Audience::Class => {
            let ids: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
            Some(format!("class:{}", ids.join(",")))
        }
        Audience::Individual => None,
    }
}

async fn count_from_store(
    pool: &MySqlPool,
    audience: Audience,
    classes: &[u64],
) -> Result<i64, sqlx::Error> {
    match audience {
        Audience::All => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
                .fetch_one(pool)
                .await
        }
        Audience::Class => {
            if classes.is_empty() {
                return Ok(0);
            }
            let sql = format!(
                "SELECT COUNT(*) FROM users WHERE is_active = TRUE AND role_id = ? AND class_id IN ({})",
                placeholders(classes.len())
            );
            let mut q = sqlx::query_scalar::<_, i64>(&sql).bind(Role::Student.id());
            for class_id in classes {
                q = q.bind(*class_id);
            }
            q.fetch_one(pool).await
        }
        label => {
            let roles = Role::members_of(label);
            if roles.is_empty() {
                return Ok(0);
            }
            let sql = format!(
                "SELECT COUNT(*) FROM users WHERE is_active = TRUE AND role_id IN ({})",
                placeholders(roles.len())
            );
            let mut q = sqlx::query_scalar::<_, i64>(&sql);
            for role in roles {
                q = q.bind(role.id());
            }
            q.fetch_one(pool).await
        }
    }
}

/// Number of users an announcement is addressed to.
pub async fn target_user_count(
    pool: &MySqlPool,
    audience: Audience,
    classes: &[u64],
    individuals: &[u64],
) -> Result<i64, sqlx::Error> {
    let Some(key) = audience_key(audience, classes) else {
        return Ok(individuals.len() as i64);
    };

    if let Some(count) = AUDIENCE_CACHE.get(&key).await {
        return Ok(count);
    }

    let count = count_from_store(pool, audience, classes).await?;
    AUDIENCE_CACHE.insert(key, count).await;
    Ok(count)
}

/// Drop every cached size, e.g. after a user registers.
pub fn invalidate() {
    AUDIENCE_CACHE.invalidate_all();
}

/// Pre-load the sizes of the fixed audiences.
pub async fn warmup_audience_cache(pool: &MySqlPool) -> Result<()> {
    let fixed = [
        Audience::All,
        Audience::Students,
        Audience::Teachers,
        Audience::Staff,
    ];

    for audience in fixed {
        let count = target_user_count(pool, audience, &[], &[]).await?;
        log::info!("Audience cache warmup: {} -> {} users", audience, count);
    }

    Ok(())
}
