//! Persistence seam. Handlers talk to `dyn Store`; the Postgres
//! implementation backs deployments and the in-memory one backs tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Career, Group, GroupStatus, Invitation, InvitationStatus, Membership, Role, User,
};
use crate::pagination::Slice;

pub use memory::MemStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Natural-key collision; the payload names the offending field.
    #[error("unique constraint violated on {0}")]
    UniqueViolation(String),

    /// Referenced or referencing rows prevent the mutation.
    #[error("foreign key constraint violated on {0}")]
    ForeignKeyViolation(String),

    #[error("database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub first_names: String,
    pub last_names: String,
    pub email: String,
    pub role: Option<Role>,
    pub career_id: Option<i32>,
    pub level: Option<i32>,
    pub mobile_phone: Option<String>,
    pub home_phone: Option<String>,
    pub id_card: Option<String>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub first_names: Option<String>,
    pub last_names: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub career_id: Option<i32>,
    pub level: Option<i32>,
    pub mobile_phone: Option<String>,
    pub home_phone: Option<String>,
    pub id_card: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub career_id: Option<i32>,
    pub search: Option<String>,
}

/// Rows that block user deletion.
#[derive(Debug, Clone, Copy)]
pub struct UserDependents {
    pub memberships: i64,
    pub sent_invitations: i64,
    pub created_groups: i64,
}

impl UserDependents {
    pub fn any(&self) -> bool {
        self.memberships > 0 || self.sent_invitations > 0 || self.created_groups > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewCareer {
    pub name: String,
    pub code: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CareerPatch {
    pub name: Option<String>,
    pub code: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CareerFilter {
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub creator_id: i32,
    pub description: Option<String>,
    pub status: Option<GroupStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<GroupStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub status: Option<GroupStatus>,
    pub creator_id: Option<i32>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemberFilter {
    pub group_id: Option<i32>,
    pub user_id: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct NewInvitation {
    pub group_id: i32,
    pub sender_id: i32,
    pub receiver: String,
}

#[derive(Debug, Clone, Default)]
pub struct InvitationFilter {
    pub status: Option<InvitationStatus>,
    pub group_id: Option<i32>,
    pub sender_id: Option<i32>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Users
    async fn list_users(
        &self,
        filter: &UserFilter,
        slice: &Slice,
    ) -> Result<(Vec<User>, i64), StoreError>;
    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn create_user(&self, new: &NewUser) -> Result<User, StoreError>;
    async fn update_user(&self, id: i32, patch: &UserPatch) -> Result<User, StoreError>;
    async fn delete_user(&self, id: i32) -> Result<(), StoreError>;
    async fn user_dependents(&self, id: i32) -> Result<UserDependents, StoreError>;

    // Careers
    async fn list_careers(
        &self,
        filter: &CareerFilter,
        slice: &Slice,
    ) -> Result<(Vec<Career>, i64), StoreError>;
    async fn find_career(&self, id: i32) -> Result<Option<Career>, StoreError>;
    async fn find_career_by_code(&self, code: i64) -> Result<Option<Career>, StoreError>;
    async fn create_career(&self, new: &NewCareer) -> Result<Career, StoreError>;
    async fn update_career(&self, id: i32, patch: &CareerPatch) -> Result<Career, StoreError>;
    async fn delete_career(&self, id: i32) -> Result<(), StoreError>;
    async fn career_user_count(&self, id: i32) -> Result<i64, StoreError>;

    // Groups
    async fn list_groups(
        &self,
        filter: &GroupFilter,
        slice: &Slice,
    ) -> Result<(Vec<Group>, i64), StoreError>;
    async fn find_group(&self, id: i32) -> Result<Option<Group>, StoreError>;
    async fn create_group(&self, new: &NewGroup) -> Result<Group, StoreError>;
    async fn update_group(&self, id: i32, patch: &GroupPatch) -> Result<Group, StoreError>;
    async fn delete_group(&self, id: i32) -> Result<(), StoreError>;
    async fn group_member_count(&self, id: i32) -> Result<i64, StoreError>;

    // Memberships
    async fn list_members(
        &self,
        filter: &MemberFilter,
        slice: &Slice,
    ) -> Result<(Vec<Membership>, i64), StoreError>;
    async fn find_member(&self, id: i32) -> Result<Option<Membership>, StoreError>;
    async fn find_membership(
        &self,
        group_id: i32,
        user_id: i32,
    ) -> Result<Option<Membership>, StoreError>;
    async fn create_member(&self, group_id: i32, user_id: i32) -> Result<Membership, StoreError>;
    async fn delete_member(&self, id: i32) -> Result<(), StoreError>;

    // Invitations
    async fn list_invitations(
        &self,
        filter: &InvitationFilter,
        slice: &Slice,
    ) -> Result<(Vec<Invitation>, i64), StoreError>;
    async fn find_invitation(&self, id: i32) -> Result<Option<Invitation>, StoreError>;
    async fn find_pending_invitation(
        &self,
        group_id: i32,
        receiver: &str,
    ) -> Result<Option<Invitation>, StoreError>;
    async fn create_invitation(&self, new: &NewInvitation) -> Result<Invitation, StoreError>;
    async fn set_invitation_status(
        &self,
        id: i32,
        status: InvitationStatus,
    ) -> Result<Invitation, StoreError>;
    /// Mark the invitation accepted and ensure a (group, sender) membership
    /// exists, as one atomic unit.
    async fn accept_invitation(&self, id: i32) -> Result<Invitation, StoreError>;
    async fn delete_invitation(&self, id: i32) -> Result<(), StoreError>;
}
