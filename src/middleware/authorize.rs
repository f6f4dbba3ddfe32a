use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::models::Role;

/// Role allow-list check. Callers outside the list get 403.
pub fn require_role(auth: &AuthUser, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&auth.role) {
        return Ok(());
    }
    Err(ApiError::forbidden(
        "You do not have permission to perform this action",
    ))
}

/// Ownership check used by the invitation lifecycle: the sender may act on
/// their own invitation, admins may act on any.
pub fn require_sender_or_admin(auth: &AuthUser, sender_id: i32) -> Result<(), ApiError> {
    if auth.role.is_admin() || auth.id == sender_id {
        return Ok(());
    }
    Err(ApiError::forbidden(
        "You do not have permission to access this resource",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn caller(id: i32, role: Role) -> AuthUser {
        AuthUser {
            id,
            email: "caller@uml.edu.ni".into(),
            role,
            name: "Caller".into(),
        }
    }

    #[test]
    fn role_allow_list() {
        let faculty = caller(1, Role::Faculty);
        assert!(require_role(&faculty, &[Role::Admin, Role::Faculty]).is_ok());

        let student = caller(2, Role::Student);
        let err = require_role(&student, &[Role::Admin, Role::Faculty]).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn sender_or_admin() {
        assert!(require_sender_or_admin(&caller(5, Role::Student), 5).is_ok());
        assert!(require_sender_or_admin(&caller(1, Role::Admin), 5).is_ok());
        assert!(require_sender_or_admin(&caller(2, Role::Student), 5).is_err());
    }
}
