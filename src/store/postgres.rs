use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::config;
use crate::models::{Career, Group, Invitation, InvitationStatus, Membership, User};
use crate::pagination::Slice;

use super::{
    CareerFilter, CareerPatch, GroupFilter, GroupPatch, InvitationFilter, MemberFilter, NewCareer,
    NewGroup, NewInvitation, NewUser, Store, StoreError, UserDependents, UserFilter, UserPatch,
};

/// Postgres-backed store. One handle per process, constructed at startup and
/// passed to the router state.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let db = &config::config().database;
        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .acquire_timeout(Duration::from_secs(db.connection_timeout_secs))
            .connect(database_url)
            .await
            .map_err(map_err)?;
        info!("connected to database");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => {
                StoreError::UniqueViolation(db.constraint().unwrap_or("unique key").to_string())
            }
            Some("23503") => {
                StoreError::ForeignKeyViolation(db.constraint().unwrap_or("foreign key").to_string())
            }
            _ => StoreError::Database(err.to_string()),
        },
        _ => StoreError::Database(err.to_string()),
    }
}

fn push_order_and_page(qb: &mut QueryBuilder<'_, Postgres>, slice: &Slice) {
    // order_by comes from a handler allow-list, never from raw client input
    qb.push(" ORDER BY ")
        .push(slice.order_by)
        .push(if slice.descending { " DESC" } else { " ASC" })
        .push(" LIMIT ")
        .push_bind(i64::from(slice.limit))
        .push(" OFFSET ")
        .push_bind(slice.offset);
}

fn push_user_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    let mut sep = " WHERE ";
    if let Some(role) = filter.role {
        qb.push(sep).push("role = ").push_bind(role);
        sep = " AND ";
    }
    if let Some(career_id) = filter.career_id {
        qb.push(sep).push("career_id = ").push_bind(career_id);
        sep = " AND ";
    }
    if let Some(search) = &filter.search {
        let like = format!("%{}%", search);
        qb.push(sep)
            .push("(first_names ILIKE ")
            .push_bind(like.clone())
            .push(" OR last_names ILIKE ")
            .push_bind(like.clone())
            .push(" OR email ILIKE ")
            .push_bind(like)
            .push(")");
    }
}

fn push_career_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &CareerFilter) {
    if let Some(search) = &filter.search {
        let like = format!("%{}%", search);
        qb.push(" WHERE (name ILIKE ")
            .push_bind(like.clone())
            .push(" OR description ILIKE ")
            .push_bind(like)
            .push(")");
    }
}

fn push_group_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &GroupFilter) {
    let mut sep = " WHERE ";
    if let Some(status) = filter.status {
        qb.push(sep).push("status = ").push_bind(status);
        sep = " AND ";
    }
    if let Some(creator_id) = filter.creator_id {
        qb.push(sep).push("creator_id = ").push_bind(creator_id);
        sep = " AND ";
    }
    if let Some(search) = &filter.search {
        let like = format!("%{}%", search);
        qb.push(sep)
            .push("(name ILIKE ")
            .push_bind(like.clone())
            .push(" OR description ILIKE ")
            .push_bind(like)
            .push(")");
    }
}

fn push_member_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &MemberFilter) {
    let mut sep = " WHERE ";
    if let Some(group_id) = filter.group_id {
        qb.push(sep).push("group_id = ").push_bind(group_id);
        sep = " AND ";
    }
    if let Some(user_id) = filter.user_id {
        qb.push(sep).push("user_id = ").push_bind(user_id);
    }
}

fn push_invitation_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &InvitationFilter) {
    let mut sep = " WHERE ";
    if let Some(status) = filter.status {
        qb.push(sep).push("status = ").push_bind(status);
        sep = " AND ";
    }
    if let Some(group_id) = filter.group_id {
        qb.push(sep).push("group_id = ").push_bind(group_id);
        sep = " AND ";
    }
    if let Some(sender_id) = filter.sender_id {
        qb.push(sep).push("sender_id = ").push_bind(sender_id);
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_users(
        &self,
        filter: &UserFilter,
        slice: &Slice,
    ) -> Result<(Vec<User>, i64), StoreError> {
        let mut qb = QueryBuilder::new("SELECT * FROM users");
        push_user_filter(&mut qb, filter);
        push_order_and_page(&mut qb, slice);
        let rows = qb
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
        push_user_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok((rows, total))
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn create_user(&self, new: &NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users
               (first_names, last_names, email, role, career_id, level,
                mobile_phone, home_phone, id_card)
             VALUES ($1, $2, $3, COALESCE($4, 'student'), $5, $6, $7, $8, $9)
             RETURNING *",
        )
        .bind(&new.first_names)
        .bind(&new.last_names)
        .bind(&new.email)
        .bind(new.role)
        .bind(new.career_id)
        .bind(new.level)
        .bind(&new.mobile_phone)
        .bind(&new.home_phone)
        .bind(&new.id_card)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn update_user(&self, id: i32, patch: &UserPatch) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET
               first_names = COALESCE($2, first_names),
               last_names = COALESCE($3, last_names),
               email = COALESCE($4, email),
               role = COALESCE($5, role),
               career_id = COALESCE($6, career_id),
               level = COALESCE($7, level),
               mobile_phone = COALESCE($8, mobile_phone),
               home_phone = COALESCE($9, home_phone),
               id_card = COALESCE($10, id_card),
               updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&patch.first_names)
        .bind(&patch.last_names)
        .bind(&patch.email)
        .bind(patch.role)
        .bind(patch.career_id)
        .bind(patch.level)
        .bind(&patch.mobile_phone)
        .bind(&patch.home_phone)
        .bind(&patch.id_card)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)
    }

    async fn delete_user(&self, id: i32) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn user_dependents(&self, id: i32) -> Result<UserDependents, StoreError> {
        let memberships: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM members WHERE user_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
        let sent_invitations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM invitations WHERE sender_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
        let created_groups: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM groups WHERE creator_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(UserDependents {
            memberships,
            sent_invitations,
            created_groups,
        })
    }

    async fn list_careers(
        &self,
        filter: &CareerFilter,
        slice: &Slice,
    ) -> Result<(Vec<Career>, i64), StoreError> {
        let mut qb = QueryBuilder::new("SELECT * FROM careers");
        push_career_filter(&mut qb, filter);
        push_order_and_page(&mut qb, slice);
        let rows = qb
            .build_query_as::<Career>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM careers");
        push_career_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok((rows, total))
    }

    async fn find_career(&self, id: i32) -> Result<Option<Career>, StoreError> {
        sqlx::query_as::<_, Career>("SELECT * FROM careers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_career_by_code(&self, code: i64) -> Result<Option<Career>, StoreError> {
        sqlx::query_as::<_, Career>("SELECT * FROM careers WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn create_career(&self, new: &NewCareer) -> Result<Career, StoreError> {
        sqlx::query_as::<_, Career>(
            "INSERT INTO careers (name, code, description) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&new.name)
        .bind(new.code)
        .bind(&new.description)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn update_career(&self, id: i32, patch: &CareerPatch) -> Result<Career, StoreError> {
        sqlx::query_as::<_, Career>(
            "UPDATE careers SET
               name = COALESCE($2, name),
               code = COALESCE($3, code),
               description = COALESCE($4, description)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&patch.name)
        .bind(patch.code)
        .bind(&patch.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)
    }

    async fn delete_career(&self, id: i32) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM careers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn career_user_count(&self, id: i32) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE career_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn list_groups(
        &self,
        filter: &GroupFilter,
        slice: &Slice,
    ) -> Result<(Vec<Group>, i64), StoreError> {
        let mut qb = QueryBuilder::new("SELECT * FROM groups");
        push_group_filter(&mut qb, filter);
        push_order_and_page(&mut qb, slice);
        let rows = qb
            .build_query_as::<Group>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM groups");
        push_group_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok((rows, total))
    }

    async fn find_group(&self, id: i32) -> Result<Option<Group>, StoreError> {
        sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn create_group(&self, new: &NewGroup) -> Result<Group, StoreError> {
        sqlx::query_as::<_, Group>(
            "INSERT INTO groups (name, creator_id, description, status)
             VALUES ($1, $2, $3, COALESCE($4, 'active'))
             RETURNING *",
        )
        .bind(&new.name)
        .bind(new.creator_id)
        .bind(&new.description)
        .bind(new.status)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn update_group(&self, id: i32, patch: &GroupPatch) -> Result<Group, StoreError> {
        sqlx::query_as::<_, Group>(
            "UPDATE groups SET
               name = COALESCE($2, name),
               description = COALESCE($3, description),
               status = COALESCE($4, status)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(patch.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)
    }

    async fn delete_group(&self, id: i32) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn group_member_count(&self, id: i32) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM members WHERE group_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn list_members(
        &self,
        filter: &MemberFilter,
        slice: &Slice,
    ) -> Result<(Vec<Membership>, i64), StoreError> {
        let mut qb = QueryBuilder::new("SELECT * FROM members");
        push_member_filter(&mut qb, filter);
        push_order_and_page(&mut qb, slice);
        let rows = qb
            .build_query_as::<Membership>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM members");
        push_member_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok((rows, total))
    }

    async fn find_member(&self, id: i32) -> Result<Option<Membership>, StoreError> {
        sqlx::query_as::<_, Membership>("SELECT * FROM members WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_membership(
        &self,
        group_id: i32,
        user_id: i32,
    ) -> Result<Option<Membership>, StoreError> {
        sqlx::query_as::<_, Membership>(
            "SELECT * FROM members WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn create_member(&self, group_id: i32, user_id: i32) -> Result<Membership, StoreError> {
        sqlx::query_as::<_, Membership>(
            "INSERT INTO members (group_id, user_id) VALUES ($1, $2) RETURNING *",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn delete_member(&self, id: i32) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM members WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_invitations(
        &self,
        filter: &InvitationFilter,
        slice: &Slice,
    ) -> Result<(Vec<Invitation>, i64), StoreError> {
        let mut qb = QueryBuilder::new("SELECT * FROM invitations");
        push_invitation_filter(&mut qb, filter);
        push_order_and_page(&mut qb, slice);
        let rows = qb
            .build_query_as::<Invitation>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM invitations");
        push_invitation_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok((rows, total))
    }

    async fn find_invitation(&self, id: i32) -> Result<Option<Invitation>, StoreError> {
        sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_pending_invitation(
        &self,
        group_id: i32,
        receiver: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations
             WHERE group_id = $1 AND receiver = $2 AND status = 'pending'",
        )
        .bind(group_id)
        .bind(receiver)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn create_invitation(&self, new: &NewInvitation) -> Result<Invitation, StoreError> {
        sqlx::query_as::<_, Invitation>(
            "INSERT INTO invitations (group_id, sender_id, receiver)
             VALUES ($1, $2, $3)
             RETURNING *",
        )
        .bind(new.group_id)
        .bind(new.sender_id)
        .bind(&new.receiver)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn set_invitation_status(
        &self,
        id: i32,
        status: InvitationStatus,
    ) -> Result<Invitation, StoreError> {
        sqlx::query_as::<_, Invitation>(
            "UPDATE invitations SET status = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)
    }

    async fn accept_invitation(&self, id: i32) -> Result<Invitation, StoreError> {
        // Acceptance and membership creation commit or roll back together
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let invitation = sqlx::query_as::<_, Invitation>(
            "UPDATE invitations SET status = 'accepted' WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)?;

        sqlx::query(
            "INSERT INTO members (group_id, user_id) VALUES ($1, $2)
             ON CONFLICT (group_id, user_id) DO NOTHING",
        )
        .bind(invitation.group_id)
        .bind(invitation.sender_id)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(invitation)
    }

    async fn delete_invitation(&self, id: i32) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM invitations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
