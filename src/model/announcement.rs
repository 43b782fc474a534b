use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::model::user::Viewer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Audience {
    All,
    Students,
    Teachers,
    Staff,
    Class,
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Listing rank, lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AnnouncementStatus {
    Draft,
    #[default]
    #[serde(alias = "active")]
    #[strum(to_string = "published", serialize = "active")]
    Published,
    Expired,
    Archived,
}

/// Status an announcement should carry at `now`.
///
/// Archived is never changed. Expiry wins over publishing.
pub fn derive_status(
    status: AnnouncementStatus,
    publish_date: DateTime<Utc>,
    expiry_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AnnouncementStatus {
    match status {
        AnnouncementStatus::Archived | AnnouncementStatus::Expired => status,
        _ if expiry_date.is_some_and(|e| now > e) => AnnouncementStatus::Expired,
        AnnouncementStatus::Draft if publish_date <= now => AnnouncementStatus::Published,
        _ => status,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnnouncementDraft {
    #[schema(example = "Sports day")]
    pub title: String,
    #[schema(example = "Sports day is on Friday, classes end at noon.")]
    pub content: String,
    #[schema(value_type = String, format = "date-time")]
    pub publish_date: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub expiry_date: Option<DateTime<Utc>>,
    pub target_audience: Audience,
    pub target_classes: Vec<u64>,
    pub target_individuals: Vec<u64>,
    pub priority: Priority,
    pub status: AnnouncementStatus,
    pub is_pinned: bool,
    pub send_notification: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAnnouncement {
    pub title: String,
    pub content: String,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub publish_date: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default = "default_audience")]
    pub target_audience: Audience,
    #[serde(default)]
    pub target_classes: Vec<u64>,
    #[serde(default)]
    pub target_individuals: Vec<u64>,
    #[serde(default)]
    pub priority: Priority,
    pub status: Option<AnnouncementStatus>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub send_notification: bool,
}

fn default_audience() -> Audience {
    Audience::All
}

impl CreateAnnouncement {
    pub fn into_draft(self, now: DateTime<Utc>) -> AnnouncementDraft {
        AnnouncementDraft {
            title: self.title,
            content: self.content,
            publish_date: self.publish_date.unwrap_or(now),
            expiry_date: self.expiry_date,
            target_audience: self.target_audience,
            target_classes: self.target_classes,
            target_individuals: self.target_individuals,
            priority: self.priority,
            status: self.status.unwrap_or_default(),
            is_pinned: self.is_pinned,
            send_notification: self.send_notification,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AnnouncementPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub publish_date: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub expiry_date: Option<DateTime<Utc>>,
    pub target_audience: Option<Audience>,
    pub target_classes: Option<Vec<u64>>,
    pub target_individuals: Option<Vec<u64>>,
    pub priority: Option<Priority>,
    pub status: Option<AnnouncementStatus>,
    pub is_pinned: Option<bool>,
    pub send_notification: Option<bool>,
}

impl AnnouncementPatch {
    pub fn apply(self, mut draft: AnnouncementDraft) -> AnnouncementDraft {
        if let Some(v) = self.title {
            draft.title = v;
        }
        if let Some(v) = self.content {
            draft.content = v;
        }
        if let Some(v) = self.publish_date {
            draft.publish_date = v;
        }
        if self.expiry_date.is_some() {
            draft.expiry_date = self.expiry_date;
        }
        if let Some(v) = self.target_audience {
            draft.target_audience = v;
        }
        if let Some(v) = self.target_classes {
            draft.target_classes = v;
        }
        if let Some(v) = self.target_individuals {
            draft.target_individuals = v;
        }
        if let Some(v) = self.priority {
            draft.priority = v;
        }
        if let Some(v) = self.status {
            draft.status = v;
        }
        if let Some(v) = self.is_pinned {
            draft.is_pinned = v;
        }
        if let Some(v) = self.send_notification {
            draft.send_notification = v;
        }
        draft
    }
}

/// Validates the draft and brings it into its stored shape: targets that do
/// not belong to the audience are dropped and the status is derived at `now`.
pub fn prepare(mut draft: AnnouncementDraft, now: DateTime<Utc>) -> Result<AnnouncementDraft, AppError> {
    if draft.title.trim().is_empty() {
        return Err(AppError::validation("title is required"));
    }
    if draft.content.trim().is_empty() {
        return Err(AppError::validation("content is required"));
    }

    match draft.target_audience {
        Audience::Class => {
            if draft.target_classes.is_empty() {
                return Err(AppError::validation(
                    "target_classes is required when target_audience is class",
                ));
            }
            draft.target_individuals.clear();
        }
        Audience::Individual => {
            if draft.target_individuals.is_empty() {
                return Err(AppError::validation(
                    "target_individuals is required when target_audience is individual",
                ));
            }
            draft.target_classes.clear();
        }
        _ => {
            draft.target_classes.clear();
            draft.target_individuals.clear();
        }
    }
    draft.target_classes.sort_unstable();
    draft.target_classes.dedup();
    draft.target_individuals.sort_unstable();
    draft.target_individuals.dedup();

    if draft.expiry_date.is_some_and(|e| e <= draft.publish_date) {
        return Err(AppError::validation("expiry_date must be after publish_date"));
    }

    draft.status = derive_status(draft.status, draft.publish_date, draft.expiry_date, now);
    Ok(draft)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Announcement {
    pub id: u64,
    #[serde(flatten)]
    pub draft: AnnouncementDraft,
    pub created_by: u64,
    #[schema(nullable = true)]
    pub created_by_name: Option<String>,
    pub views: u32,
    pub read_count: i64,
    /// Set when the announcement is listed for a specific reader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl Announcement {
    /// True when `viewer` is addressed by this announcement.
    pub fn resolves_audience(&self, viewer: &Viewer) -> bool {
        let d = &self.draft;
        match d.target_audience {
            Audience::All => true,
            Audience::Class => viewer
                .class_id
                .is_some_and(|class_id| d.target_classes.contains(&class_id)),
            Audience::Individual => d.target_individuals.contains(&viewer.user_id),
            label => viewer.role.audience() == Some(label),
        }
    }

    pub fn is_active_for(&self, now: DateTime<Utc>) -> bool {
        self.draft.status == AnnouncementStatus::Published
            && self.draft.publish_date <= now
            && self.draft.expiry_date.is_none_or(|e| e > now)
    }

    /// Re-derives the status at `now` without touching the store.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) {
        let d = &mut self.draft;
        d.status = derive_status(d.status, d.publish_date, d.expiry_date, now);
    }
}

/// Priority rank first, then newest first.
pub fn sort_for_listing(items: &mut [Announcement]) {
    items.sort_by(|a, b| {
        a.draft
            .priority
            .rank()
            .cmp(&b.draft.priority.rank())
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

#[derive(sqlx::FromRow)]
pub struct AnnouncementRow {
    pub id: u64,
    pub title: String,
    pub content: String,
    pub publish_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub target_audience: String,
    pub target_classes: Json<Vec<u64>>,
    pub target_individuals: Json<Vec<u64>>,
    pub priority: String,
    pub status: String,
    pub is_pinned: bool,
    pub send_notification: bool,
    pub created_by: u64,
    pub created_by_name: Option<String>,
    pub views: u32,
    pub read_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AnnouncementRow> for Announcement {
    type Error = AppError;

    fn try_from(row: AnnouncementRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &'static str| {
            tracing::error!(announcement_id = row.id, field, "Unknown enum value in store");
            AppError::ServerFault
        };
        let target_audience = row.target_audience.parse().map_err(|_| corrupt("target_audience"))?;
        let priority = row.priority.parse().map_err(|_| corrupt("priority"))?;
        let status = row.status.parse().map_err(|_| corrupt("status"))?;

        Ok(Announcement {
            id: row.id,
            draft: AnnouncementDraft {
                title: row.title,
                content: row.content,
                publish_date: row.publish_date,
                expiry_date: row.expiry_date,
                target_audience,
                target_classes: row.target_classes.0,
                target_individuals: row.target_individuals.0,
                priority,
                status,
                is_pinned: row.is_pinned,
                send_notification: row.send_notification,
            },
            created_by: row.created_by,
            created_by_name: row.created_by_name,
            views: row.views,
            read_count: row.read_count,
            is_read: None,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadStats {
    pub announcement_id: u64,
    pub target_audience: Audience,
    pub total_target_users: i64,
    pub read_count: i64,
    #[schema(example = 42.86)]
    pub read_percentage: f64,
}

/// `read / total * 100` to two decimals, `0` when nobody is targeted.
pub fn read_percentage(read_count: i64, total_target_users: i64) -> f64 {
    if total_target_users <= 0 {
        return 0.0;
    }
    let pct = read_count as f64 / total_target_users as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use chrono::Duration;

    fn draft(audience: Audience) -> AnnouncementDraft {
        AnnouncementDraft {
            title: "Sports day".to_string(),
            content: "Friday".to_string(),
            publish_date: Utc::now() - Duration::hours(1),
            expiry_date: None,
            target_audience: audience,
            target_classes: vec![],
            target_individuals: vec![],
            priority: Priority::Medium,
            status: AnnouncementStatus::Published,
            is_pinned: false,
            send_notification: false,
        }
    }

    fn announcement(id: u64, d: AnnouncementDraft) -> Announcement {
        Announcement {
            id,
            draft: d,
            created_by: 1,
            created_by_name: None,
            views: 0,
            read_count: 0,
            is_read: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn viewer(user_id: u64, role: Role, class_id: Option<u64>) -> Viewer {
        Viewer {
            user_id,
            role,
            class_id,
        }
    }

    #[test]
    fn class_audience_needs_classes() {
        let err = prepare(draft(Audience::Class), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)));

        let mut d = draft(Audience::Class);
        d.target_classes = vec![3, 3, 1];
        d.target_individuals = vec![9];
        let d = prepare(d, Utc::now()).unwrap();
        assert_eq!(d.target_classes, vec![1, 3]);
        assert!(d.target_individuals.is_empty());
    }

    #[test]
    fn individual_audience_needs_individuals() {
        assert!(prepare(draft(Audience::Individual), Utc::now()).is_err());

        let mut d = draft(Audience::All);
        d.target_classes = vec![1];
        let d = prepare(d, Utc::now()).unwrap();
        assert!(d.target_classes.is_empty());
    }

    #[test]
    fn expiry_must_follow_publish() {
        let mut d = draft(Audience::All);
        d.expiry_date = Some(d.publish_date - Duration::minutes(5));
        assert!(prepare(d, Utc::now()).is_err());
    }

    #[test]
    fn status_derivation() {
        let now = Utc::now();
        let past = now - Duration::days(1);
        let future = now + Duration::days(1);

        assert_eq!(
            derive_status(AnnouncementStatus::Draft, past, None, now),
            AnnouncementStatus::Published
        );
        assert_eq!(
            derive_status(AnnouncementStatus::Draft, future, None, now),
            AnnouncementStatus::Draft
        );
        assert_eq!(
            derive_status(AnnouncementStatus::Published, past - Duration::days(1), Some(past), now),
            AnnouncementStatus::Expired
        );
        assert_eq!(
            derive_status(AnnouncementStatus::Archived, past, Some(past), now),
            AnnouncementStatus::Archived
        );
    }

    #[test]
    fn active_alias_parses_as_published() {
        let s: AnnouncementStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(s, AnnouncementStatus::Published);
        assert_eq!("active".parse::<AnnouncementStatus>().unwrap(), AnnouncementStatus::Published);
        assert_eq!(AnnouncementStatus::Published.to_string(), "published");
    }

    #[test]
    fn audience_resolution() {
        let all = announcement(1, draft(Audience::All));
        let students = announcement(2, draft(Audience::Students));
        let staff = announcement(3, draft(Audience::Staff));
        let mut class = draft(Audience::Class);
        class.target_classes = vec![5];
        let class = announcement(4, class);
        let mut individual = draft(Audience::Individual);
        individual.target_individuals = vec![42];
        let individual = announcement(5, individual);

        let student = viewer(42, Role::Student, Some(5));
        let other_student = viewer(43, Role::Student, Some(6));
        let teacher = viewer(7, Role::Teacher, None);
        let admin = viewer(1, Role::Admin, None);
        let parent = viewer(8, Role::Parent, None);

        assert!(all.resolves_audience(&parent));
        assert!(students.resolves_audience(&student));
        assert!(!students.resolves_audience(&teacher));
        assert!(staff.resolves_audience(&admin));
        assert!(!staff.resolves_audience(&teacher));
        assert!(class.resolves_audience(&student));
        assert!(!class.resolves_audience(&other_student));
        assert!(!class.resolves_audience(&teacher));
        assert!(individual.resolves_audience(&student));
        assert!(!individual.resolves_audience(&other_student));
    }

    #[test]
    fn activity_window() {
        let now = Utc::now();
        let mut a = announcement(1, draft(Audience::All));
        assert!(a.is_active_for(now));

        a.draft.expiry_date = Some(now - Duration::minutes(1));
        assert!(!a.is_active_for(now));

        a.draft.expiry_date = Some(now + Duration::minutes(1));
        a.draft.status = AnnouncementStatus::Draft;
        assert!(!a.is_active_for(now));
    }

    #[test]
    fn scheduled_announcements_are_not_active_yet() {
        let now = Utc::now();
        let mut a = announcement(1, draft(Audience::All));
        a.draft.publish_date = now + Duration::hours(2);
        assert!(!a.is_active_for(now));
        assert!(a.is_active_for(now + Duration::hours(3)));
    }

    #[test]
    fn draft_goes_live_once_its_publish_date_passes() {
        let now = Utc::now();
        let mut a = announcement(1, draft(Audience::All));
        a.draft.status = AnnouncementStatus::Draft;
        a.draft.publish_date = now - Duration::minutes(1);
        assert!(!a.is_active_for(now));

        a.refresh_status(now);
        assert_eq!(a.draft.status, AnnouncementStatus::Published);
        assert!(a.is_active_for(now));
    }

    #[test]
    fn refresh_expires_stale_announcements() {
        let now = Utc::now();
        let mut a = announcement(1, draft(Audience::All));
        a.draft.expiry_date = Some(now - Duration::minutes(1));
        a.refresh_status(now);
        assert_eq!(a.draft.status, AnnouncementStatus::Expired);
    }

    #[test]
    fn listing_order_is_priority_then_recency() {
        let now = Utc::now();
        let mut low = announcement(1, draft(Audience::All));
        low.draft.priority = Priority::Low;
        low.created_at = now;
        let mut urgent_old = announcement(2, draft(Audience::All));
        urgent_old.draft.priority = Priority::Urgent;
        urgent_old.created_at = now - Duration::days(2);
        let mut urgent_new = announcement(3, draft(Audience::All));
        urgent_new.draft.priority = Priority::Urgent;
        urgent_new.created_at = now - Duration::days(1);
        let mut high = announcement(4, draft(Audience::All));
        high.draft.priority = Priority::High;

        let mut items = vec![low, urgent_old, high, urgent_new];
        sort_for_listing(&mut items);
        let ids: Vec<u64> = items.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }

    #[test]
    fn read_percentage_rounds_and_handles_zero() {
        assert_eq!(read_percentage(0, 0), 0.0);
        assert_eq!(read_percentage(5, 0), 0.0);
        assert_eq!(read_percentage(1, 3), 33.33);
        assert_eq!(read_percentage(3, 7), 42.86);
        assert_eq!(read_percentage(4, 4), 100.0);
    }

    #[test]
    fn patch_overrides_only_given_fields() {
        let base = draft(Audience::All);
        let patched = AnnouncementPatch {
            priority: Some(Priority::Urgent),
            ..Default::default()
        }
        .apply(base.clone());
        assert_eq!(patched.priority, Priority::Urgent);
        assert_eq!(patched.title, base.title);
    }
}
