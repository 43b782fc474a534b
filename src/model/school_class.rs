use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct SchoolClass {
    #[schema(example = 7)]
    pub id: u64,
    #[schema(example = "Grade 5")]
    pub name: String,
    #[schema(example = "A", nullable = true)]
    pub section: Option<String>,
}
