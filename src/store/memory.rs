//! In-memory `Store` used by the test suites and handy for local runs
//! without a database. Mirrors the relational constraints the Postgres
//! schema enforces (unique email, unique career code, unique (group, user)
//! membership, foreign keys on delete).

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{
    Career, Group, GroupStatus, Invitation, InvitationStatus, Membership, Role, User,
};
use crate::pagination::Slice;

use super::{
    CareerFilter, CareerPatch, GroupFilter, GroupPatch, InvitationFilter, MemberFilter, NewCareer,
    NewGroup, NewInvitation, NewUser, Store, StoreError, UserDependents, UserFilter, UserPatch,
};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    careers: Vec<Career>,
    groups: Vec<Group>,
    members: Vec<Membership>,
    invitations: Vec<Invitation>,
    next_user_id: i32,
    next_career_id: i32,
    next_group_id: i32,
    next_member_id: i32,
    next_invitation_id: i32,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn page<T: Clone>(rows: Vec<T>, slice: &Slice) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let out = rows
        .into_iter()
        .skip(slice.offset as usize)
        .take(slice.limit as usize)
        .collect();
    (out, total)
}

fn sort_users(rows: &mut [User], slice: &Slice) {
    match slice.order_by {
        "last_names" => rows.sort_by(|a, b| a.last_names.cmp(&b.last_names)),
        "email" => rows.sort_by(|a, b| a.email.cmp(&b.email)),
        "role" => rows.sort_by(|a, b| a.role.as_str().cmp(b.role.as_str())),
        "created_at" => rows.sort_by_key(|u| u.created_at),
        _ => rows.sort_by(|a, b| a.first_names.cmp(&b.first_names)),
    }
    if slice.descending {
        rows.reverse();
    }
}

fn sort_careers(rows: &mut [Career], slice: &Slice) {
    match slice.order_by {
        "code" => rows.sort_by_key(|c| c.code),
        "created_at" => rows.sort_by_key(|c| c.created_at),
        _ => rows.sort_by(|a, b| a.name.cmp(&b.name)),
    }
    if slice.descending {
        rows.reverse();
    }
}

fn sort_groups(rows: &mut [Group], slice: &Slice) {
    match slice.order_by {
        "status" => rows.sort_by(|a, b| a.status.as_str().cmp(b.status.as_str())),
        "created_at" => rows.sort_by_key(|g| g.created_at),
        _ => rows.sort_by(|a, b| a.name.cmp(&b.name)),
    }
    if slice.descending {
        rows.reverse();
    }
}

fn sort_members(rows: &mut [Membership], slice: &Slice) {
    match slice.order_by {
        "id" => rows.sort_by_key(|m| m.id),
        // id breaks ties between rows created in the same instant
        _ => rows.sort_by_key(|m| (m.created_at, m.id)),
    }
    if slice.descending {
        rows.reverse();
    }
}

fn sort_invitations(rows: &mut [Invitation], slice: &Slice) {
    match slice.order_by {
        "status" => rows.sort_by(|a, b| a.status.as_str().cmp(b.status.as_str())),
        "group_id" => rows.sort_by_key(|i| i.group_id),
        "sender_id" => rows.sort_by_key(|i| i.sender_id),
        _ => rows.sort_by_key(|i| i.sent_at),
    }
    if slice.descending {
        rows.reverse();
    }
}

#[async_trait]
impl Store for MemStore {
    async fn list_users(
        &self,
        filter: &UserFilter,
        slice: &Slice,
    ) -> Result<(Vec<User>, i64), StoreError> {
        let inner = self.lock();
        let mut rows: Vec<User> = inner
            .users
            .iter()
            .filter(|u| filter.role.map_or(true, |r| u.role == r))
            .filter(|u| filter.career_id.map_or(true, |c| u.career_id == Some(c)))
            .filter(|u| {
                filter.search.as_deref().map_or(true, |s| {
                    contains_ci(&u.first_names, s)
                        || contains_ci(&u.last_names, s)
                        || contains_ci(&u.email, s)
                })
            })
            .cloned()
            .collect();
        sort_users(&mut rows, slice);
        Ok(page(rows, slice))
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_user(&self, new: &NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock();
        if inner.users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::UniqueViolation("email".into()));
        }
        if let Some(career_id) = new.career_id {
            if !inner.careers.iter().any(|c| c.id == career_id) {
                return Err(StoreError::ForeignKeyViolation("career_id".into()));
            }
        }
        inner.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id: inner.next_user_id,
            first_names: new.first_names.clone(),
            last_names: new.last_names.clone(),
            email: new.email.clone(),
            role: new.role.unwrap_or(Role::Student),
            career_id: new.career_id,
            level: new.level,
            mobile_phone: new.mobile_phone.clone(),
            home_phone: new.home_phone.clone(),
            id_card: new.id_card.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: i32, patch: &UserPatch) -> Result<User, StoreError> {
        let mut inner = self.lock();
        if let Some(email) = &patch.email {
            if inner.users.iter().any(|u| u.email == *email && u.id != id) {
                return Err(StoreError::UniqueViolation("email".into()));
            }
        }
        if let Some(career_id) = patch.career_id {
            if !inner.careers.iter().any(|c| c.id == career_id) {
                return Err(StoreError::ForeignKeyViolation("career_id".into()));
            }
        }
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(v) = &patch.first_names {
            user.first_names = v.clone();
        }
        if let Some(v) = &patch.last_names {
            user.last_names = v.clone();
        }
        if let Some(v) = &patch.email {
            user.email = v.clone();
        }
        if let Some(v) = patch.role {
            user.role = v;
        }
        if let Some(v) = patch.career_id {
            user.career_id = Some(v);
        }
        if let Some(v) = patch.level {
            user.level = Some(v);
        }
        if let Some(v) = &patch.mobile_phone {
            user.mobile_phone = Some(v.clone());
        }
        if let Some(v) = &patch.home_phone {
            user.home_phone = Some(v.clone());
        }
        if let Some(v) = &patch.id_card {
            user.id_card = Some(v.clone());
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, id: i32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.users.iter().any(|u| u.id == id) {
            return Err(StoreError::NotFound);
        }
        if inner.members.iter().any(|m| m.user_id == id)
            || inner.invitations.iter().any(|i| i.sender_id == id)
            || inner.groups.iter().any(|g| g.creator_id == id)
        {
            return Err(StoreError::ForeignKeyViolation("user_id".into()));
        }
        inner.users.retain(|u| u.id != id);
        Ok(())
    }

    async fn user_dependents(&self, id: i32) -> Result<UserDependents, StoreError> {
        let inner = self.lock();
        Ok(UserDependents {
            memberships: inner.members.iter().filter(|m| m.user_id == id).count() as i64,
            sent_invitations: inner
                .invitations
                .iter()
                .filter(|i| i.sender_id == id)
                .count() as i64,
            created_groups: inner
                .groups
                .iter()
                .filter(|g| g.creator_id == id)
                .count() as i64,
        })
    }

    async fn list_careers(
        &self,
        filter: &CareerFilter,
        slice: &Slice,
    ) -> Result<(Vec<Career>, i64), StoreError> {
        let inner = self.lock();
        let mut rows: Vec<Career> = inner
            .careers
            .iter()
            .filter(|c| {
                filter.search.as_deref().map_or(true, |s| {
                    contains_ci(&c.name, s)
                        || c.description.as_deref().map_or(false, |d| contains_ci(d, s))
                })
            })
            .cloned()
            .collect();
        sort_careers(&mut rows, slice);
        Ok(page(rows, slice))
    }

    async fn find_career(&self, id: i32) -> Result<Option<Career>, StoreError> {
        Ok(self.lock().careers.iter().find(|c| c.id == id).cloned())
    }

    async fn find_career_by_code(&self, code: i64) -> Result<Option<Career>, StoreError> {
        Ok(self
            .lock()
            .careers
            .iter()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn create_career(&self, new: &NewCareer) -> Result<Career, StoreError> {
        let mut inner = self.lock();
        if inner.careers.iter().any(|c| c.code == new.code) {
            return Err(StoreError::UniqueViolation("code".into()));
        }
        inner.next_career_id += 1;
        let career = Career {
            id: inner.next_career_id,
            name: new.name.clone(),
            code: new.code,
            description: new.description.clone(),
            created_at: Utc::now(),
        };
        inner.careers.push(career.clone());
        Ok(career)
    }

    async fn update_career(&self, id: i32, patch: &CareerPatch) -> Result<Career, StoreError> {
        let mut inner = self.lock();
        if let Some(code) = patch.code {
            if inner.careers.iter().any(|c| c.code == code && c.id != id) {
                return Err(StoreError::UniqueViolation("code".into()));
            }
        }
        let career = inner
            .careers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(v) = &patch.name {
            career.name = v.clone();
        }
        if let Some(v) = patch.code {
            career.code = v;
        }
        if let Some(v) = &patch.description {
            career.description = Some(v.clone());
        }
        Ok(career.clone())
    }

    async fn delete_career(&self, id: i32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.careers.iter().any(|c| c.id == id) {
            return Err(StoreError::NotFound);
        }
        if inner.users.iter().any(|u| u.career_id == Some(id)) {
            return Err(StoreError::ForeignKeyViolation("career_id".into()));
        }
        inner.careers.retain(|c| c.id != id);
        Ok(())
    }

    async fn career_user_count(&self, id: i32) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .users
            .iter()
            .filter(|u| u.career_id == Some(id))
            .count() as i64)
    }

    async fn list_groups(
        &self,
        filter: &GroupFilter,
        slice: &Slice,
    ) -> Result<(Vec<Group>, i64), StoreError> {
        let inner = self.lock();
        let mut rows: Vec<Group> = inner
            .groups
            .iter()
            .filter(|g| filter.status.map_or(true, |s| g.status == s))
            .filter(|g| filter.creator_id.map_or(true, |c| g.creator_id == c))
            .filter(|g| {
                filter.search.as_deref().map_or(true, |s| {
                    contains_ci(&g.name, s)
                        || g.description.as_deref().map_or(false, |d| contains_ci(d, s))
                })
            })
            .cloned()
            .collect();
        sort_groups(&mut rows, slice);
        Ok(page(rows, slice))
    }

    async fn find_group(&self, id: i32) -> Result<Option<Group>, StoreError> {
        Ok(self.lock().groups.iter().find(|g| g.id == id).cloned())
    }

    async fn create_group(&self, new: &NewGroup) -> Result<Group, StoreError> {
        let mut inner = self.lock();
        if !inner.users.iter().any(|u| u.id == new.creator_id) {
            return Err(StoreError::ForeignKeyViolation("creator_id".into()));
        }
        inner.next_group_id += 1;
        let group = Group {
            id: inner.next_group_id,
            name: new.name.clone(),
            creator_id: new.creator_id,
            description: new.description.clone(),
            status: new.status.unwrap_or(GroupStatus::Active),
            created_at: Utc::now(),
        };
        inner.groups.push(group.clone());
        Ok(group)
    }

    async fn update_group(&self, id: i32, patch: &GroupPatch) -> Result<Group, StoreError> {
        let mut inner = self.lock();
        let group = inner
            .groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(v) = &patch.name {
            group.name = v.clone();
        }
        if let Some(v) = &patch.description {
            group.description = Some(v.clone());
        }
        if let Some(v) = patch.status {
            group.status = v;
        }
        Ok(group.clone())
    }

    async fn delete_group(&self, id: i32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.groups.iter().any(|g| g.id == id) {
            return Err(StoreError::NotFound);
        }
        if inner.members.iter().any(|m| m.group_id == id)
            || inner.invitations.iter().any(|i| i.group_id == id)
        {
            return Err(StoreError::ForeignKeyViolation("group_id".into()));
        }
        inner.groups.retain(|g| g.id != id);
        Ok(())
    }

    async fn group_member_count(&self, id: i32) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|m| m.group_id == id)
            .count() as i64)
    }

    async fn list_members(
        &self,
        filter: &MemberFilter,
        slice: &Slice,
    ) -> Result<(Vec<Membership>, i64), StoreError> {
        let inner = self.lock();
        let mut rows: Vec<Membership> = inner
            .members
            .iter()
            .filter(|m| filter.group_id.map_or(true, |g| m.group_id == g))
            .filter(|m| filter.user_id.map_or(true, |u| m.user_id == u))
            .cloned()
            .collect();
        sort_members(&mut rows, slice);
        Ok(page(rows, slice))
    }

    async fn find_member(&self, id: i32) -> Result<Option<Membership>, StoreError> {
        Ok(self.lock().members.iter().find(|m| m.id == id).cloned())
    }

    async fn find_membership(
        &self,
        group_id: i32,
        user_id: i32,
    ) -> Result<Option<Membership>, StoreError> {
        Ok(self
            .lock()
            .members
            .iter()
            .find(|m| m.group_id == group_id && m.user_id == user_id)
            .cloned())
    }

    async fn create_member(&self, group_id: i32, user_id: i32) -> Result<Membership, StoreError> {
        let mut inner = self.lock();
        if !inner.groups.iter().any(|g| g.id == group_id) {
            return Err(StoreError::ForeignKeyViolation("group_id".into()));
        }
        if !inner.users.iter().any(|u| u.id == user_id) {
            return Err(StoreError::ForeignKeyViolation("user_id".into()));
        }
        if inner
            .members
            .iter()
            .any(|m| m.group_id == group_id && m.user_id == user_id)
        {
            return Err(StoreError::UniqueViolation("group membership".into()));
        }
        inner.next_member_id += 1;
        let member = Membership {
            id: inner.next_member_id,
            group_id,
            user_id,
            created_at: Utc::now(),
        };
        inner.members.push(member.clone());
        Ok(member)
    }

    async fn delete_member(&self, id: i32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.members.iter().any(|m| m.id == id) {
            return Err(StoreError::NotFound);
        }
        inner.members.retain(|m| m.id != id);
        Ok(())
    }

    async fn list_invitations(
        &self,
        filter: &InvitationFilter,
        slice: &Slice,
    ) -> Result<(Vec<Invitation>, i64), StoreError> {
        let inner = self.lock();
        let mut rows: Vec<Invitation> = inner
            .invitations
            .iter()
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .filter(|i| filter.group_id.map_or(true, |g| i.group_id == g))
            .filter(|i| filter.sender_id.map_or(true, |s| i.sender_id == s))
            .cloned()
            .collect();
        sort_invitations(&mut rows, slice);
        Ok(page(rows, slice))
    }

    async fn find_invitation(&self, id: i32) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .lock()
            .invitations
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn find_pending_invitation(
        &self,
        group_id: i32,
        receiver: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .lock()
            .invitations
            .iter()
            .find(|i| {
                i.group_id == group_id
                    && i.receiver == receiver
                    && i.status == InvitationStatus::Pending
            })
            .cloned())
    }

    async fn create_invitation(&self, new: &NewInvitation) -> Result<Invitation, StoreError> {
        let mut inner = self.lock();
        if !inner.groups.iter().any(|g| g.id == new.group_id) {
            return Err(StoreError::ForeignKeyViolation("group_id".into()));
        }
        if !inner.users.iter().any(|u| u.id == new.sender_id) {
            return Err(StoreError::ForeignKeyViolation("sender_id".into()));
        }
        inner.next_invitation_id += 1;
        let invitation = Invitation {
            id: inner.next_invitation_id,
            group_id: new.group_id,
            sender_id: new.sender_id,
            receiver: new.receiver.clone(),
            status: InvitationStatus::Pending,
            sent_at: Utc::now(),
        };
        inner.invitations.push(invitation.clone());
        Ok(invitation)
    }

    async fn set_invitation_status(
        &self,
        id: i32,
        status: InvitationStatus,
    ) -> Result<Invitation, StoreError> {
        let mut inner = self.lock();
        let invitation = inner
            .invitations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(StoreError::NotFound)?;
        invitation.status = status;
        Ok(invitation.clone())
    }

    async fn accept_invitation(&self, id: i32) -> Result<Invitation, StoreError> {
        let mut inner = self.lock();
        let invitation = {
            let inv = inner
                .invitations
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or(StoreError::NotFound)?;
            inv.status = InvitationStatus::Accepted;
            inv.clone()
        };
        let already_member = inner
            .members
            .iter()
            .any(|m| m.group_id == invitation.group_id && m.user_id == invitation.sender_id);
        if !already_member {
            inner.next_member_id += 1;
            let member = Membership {
                id: inner.next_member_id,
                group_id: invitation.group_id,
                user_id: invitation.sender_id,
                created_at: Utc::now(),
            };
            inner.members.push(member);
        }
        Ok(invitation)
    }

    async fn delete_invitation(&self, id: i32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.invitations.iter().any(|i| i.id == id) {
            return Err(StoreError::NotFound);
        }
        inner.invitations.retain(|i| i.id != id);
        Ok(())
    }
}
