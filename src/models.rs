use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access role attached to every user record. Routes carry an allow-list of
/// roles; `admin` additionally bypasses ownership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    Admin,
    Faculty,
    Student,
    Office,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Faculty => "faculty",
            Role::Student => "student",
            Role::Office => "office",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "group_status", rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Inactive,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Active => "active",
            GroupStatus::Inactive => "inactive",
        }
    }
}

/// Lifecycle state of an invitation: `pending -> accepted | rejected`,
/// where accepted and rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "invitation_status", rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl InvitationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Career {
    pub id: i32,
    pub name: String,
    pub code: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub first_names: String,
    pub last_names: String,
    pub email: String,
    pub role: Role,
    pub career_id: Option<i32>,
    pub level: Option<i32>,
    pub mobile_phone: Option<String>,
    pub home_phone: Option<String>,
    pub id_card: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_names, self.last_names)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Group {
    pub id: i32,
    pub name: String,
    pub creator_id: i32,
    pub description: Option<String>,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
}

/// Links one user to one group; a user appears at most once per group.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Membership {
    pub id: i32,
    pub group_id: i32,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
}

/// An offer, sent by an existing user to an email address, to join a group.
/// The receiver is not necessarily a registered user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: i32,
    pub group_id: i32,
    pub sender_id: i32,
    pub receiver: String,
    pub status: InvitationStatus,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Faculty).unwrap(), "\"faculty\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"student\"").unwrap(),
            Role::Student
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!InvitationStatus::Pending.is_terminal());
        assert!(InvitationStatus::Accepted.is_terminal());
        assert!(InvitationStatus::Rejected.is_terminal());
    }
}
