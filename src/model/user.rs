use serde::{Deserialize, Serialize};

use crate::model::role::Role;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub full_name: String,
    pub role_id: u8,
    pub class_id: Option<u64>,
    pub is_active: bool,
}

/// The parts of a user that decide which announcements they can see.
#[derive(Debug, Clone, Copy)]
pub struct Viewer {
    pub user_id: u64,
    pub role: Role,
    pub class_id: Option<u64>,
}
