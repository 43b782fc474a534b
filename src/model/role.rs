use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::announcement::Audience;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin = 1,
    Teacher = 2,
    Staff = 3,
    Student = 4,
    Parent = 5,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Teacher),
            3 => Some(Role::Staff),
            4 => Some(Role::Student),
            5 => Some(Role::Parent),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Audience label an announcement uses to address this role.
    ///
    /// Parents have no role label and only see `all` announcements.
    pub fn audience(self) -> Option<Audience> {
        match self {
            Role::Student => Some(Audience::Students),
            Role::Teacher => Some(Audience::Teachers),
            Role::Staff | Role::Admin => Some(Audience::Staff),
            Role::Parent => None,
        }
    }

    /// Roles that belong to a role-label audience. Inverse of [`Role::audience`].
    pub fn members_of(audience: Audience) -> &'static [Role] {
        match audience {
            Audience::Students => &[Role::Student],
            Audience::Teachers => &[Role::Teacher],
            Audience::Staff => &[Role::Staff, Role::Admin],
            _ => &[],
        }
    }

    pub fn is_employee(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher | Role::Staff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for role in [Role::Admin, Role::Teacher, Role::Staff, Role::Student, Role::Parent] {
            assert_eq!(Role::from_id(role.id()), Some(role));
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(6), None);
    }

    #[test]
    fn audience_table_is_consistent_with_members() {
        for role in [Role::Admin, Role::Teacher, Role::Staff, Role::Student] {
            let audience = role.audience().unwrap();
            assert!(Role::members_of(audience).contains(&role));
        }
        assert_eq!(Role::Parent.audience(), None);
        assert!(Role::members_of(Audience::All).is_empty());
    }

    #[test]
    fn only_staff_roles_draw_salary() {
        assert!(Role::Teacher.is_employee());
        assert!(!Role::Student.is_employee());
        assert!(!Role::Parent.is_employee());
    }
}
