use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageType {
    FeeReminder,
    #[default]
    General,
    Notification,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessage {
    #[schema(example = 42)]
    pub receiver_id: u64,
    #[serde(default)]
    pub message_type: MessageType,
    #[schema(example = "Fee reminder for April")]
    pub subject: String,
    #[schema(example = "Your second installment is due on 10 April.")]
    pub content: String,
    #[schema(example = 4000.0)]
    pub fee_amount: Option<f64>,
    #[schema(example = "tuition")]
    pub fee_type: Option<String>,
    #[schema(value_type = Option<String>, format = "date")]
    pub due_date: Option<NaiveDate>,
    pub remaining_amount: Option<f64>,
    #[serde(default)]
    pub priority: MessagePriority,
}

impl SendMessage {
    /// Validates the message and drops fee details from non-fee messages.
    pub fn normalize(mut self) -> Result<Self, AppError> {
        if self.subject.trim().is_empty() {
            return Err(AppError::validation("subject is required"));
        }
        if self.content.trim().is_empty() {
            return Err(AppError::validation("content is required"));
        }

        if self.message_type == MessageType::FeeReminder {
            match self.fee_amount {
                Some(amount) if amount.is_finite() && amount >= 0.0 => {}
                Some(_) => return Err(AppError::validation("fee_amount must be non-negative")),
                None => {
                    return Err(AppError::validation(
                        "fee_amount is required for fee reminders",
                    ));
                }
            }
            if self.remaining_amount.is_some_and(|r| !r.is_finite() || r < 0.0) {
                return Err(AppError::validation("remaining_amount must be non-negative"));
            }
        } else {
            self.fee_amount = None;
            self.fee_type = None;
            self.due_date = None;
            self.remaining_amount = None;
        }

        Ok(self)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRow {
    pub id: u64,
    pub sender_id: u64,
    pub sender_name: Option<String>,
    pub receiver_id: u64,
    pub message_type: String,
    pub subject: String,
    pub content: String,
    pub fee_amount: Option<f64>,
    pub fee_type: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub remaining_amount: Option<f64>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub priority: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Message {
    pub id: u64,
    pub sender_id: u64,
    #[schema(nullable = true)]
    pub sender_name: Option<String>,
    pub receiver_id: u64,
    pub message_type: MessageType,
    pub subject: String,
    pub content: String,
    pub fee_amount: Option<f64>,
    pub fee_type: Option<String>,
    #[schema(value_type = Option<String>, format = "date")]
    pub due_date: Option<NaiveDate>,
    pub remaining_amount: Option<f64>,
    pub is_read: bool,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub read_at: Option<DateTime<Utc>>,
    pub priority: MessagePriority,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let message_type = row.message_type.parse().map_err(|_| {
            tracing::error!(message_id = row.id, value = %row.message_type, "Unknown message type in store");
            AppError::ServerFault
        })?;
        let priority = row.priority.parse().map_err(|_| {
            tracing::error!(message_id = row.id, value = %row.priority, "Unknown message priority in store");
            AppError::ServerFault
        })?;

        Ok(Message {
            id: row.id,
            sender_id: row.sender_id,
            sender_name: row.sender_name,
            receiver_id: row.receiver_id,
            message_type,
            subject: row.subject,
            content: row.content,
            fee_amount: row.fee_amount,
            fee_type: row.fee_type,
            due_date: row.due_date,
            remaining_amount: row.remaining_amount,
            is_read: row.is_read,
            read_at: row.read_at,
            priority,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: MessageType) -> SendMessage {
        SendMessage {
            receiver_id: 42,
            message_type: kind,
            subject: "April fees".to_string(),
            content: "Please pay".to_string(),
            fee_amount: Some(4000.0),
            fee_type: Some("tuition".to_string()),
            due_date: NaiveDate::from_ymd_opt(2024, 4, 10),
            remaining_amount: Some(4000.0),
            priority: MessagePriority::High,
        }
    }

    #[test]
    fn fee_reminder_keeps_fee_details() {
        let m = message(MessageType::FeeReminder).normalize().unwrap();
        assert_eq!(m.fee_amount, Some(4000.0));
        assert!(m.due_date.is_some());
    }

    #[test]
    fn fee_reminder_requires_amount() {
        let mut m = message(MessageType::FeeReminder);
        m.fee_amount = None;
        assert!(matches!(m.normalize(), Err(AppError::ValidationFailed(_))));

        let mut m = message(MessageType::FeeReminder);
        m.fee_amount = Some(-1.0);
        assert!(m.normalize().is_err());
    }

    #[test]
    fn other_types_drop_fee_details() {
        let m = message(MessageType::General).normalize().unwrap();
        assert_eq!(m.fee_amount, None);
        assert_eq!(m.fee_type, None);
        assert_eq!(m.due_date, None);
        assert_eq!(m.remaining_amount, None);
    }

    #[test]
    fn blank_subject_is_rejected() {
        let mut m = message(MessageType::Urgent);
        m.subject = " ".to_string();
        assert!(m.normalize().is_err());
    }

    #[test]
    fn type_names_are_snake_case() {
        assert_eq!(MessageType::FeeReminder.as_ref(), "fee_reminder");
        assert_eq!("fee_reminder".parse::<MessageType>().unwrap(), MessageType::FeeReminder);
        let parsed: MessageType = serde_json::from_str("\"notification\"").unwrap();
        assert_eq!(parsed, MessageType::Notification);
    }
}
