/*!
 * # Role-Based Access Control
 *
 * The authentication layer in front of the engines resolves the caller to an
 * [`Actor`]: an opaque user id plus a role claim. Credentials are never
 * re-verified here; the engines only gate MANAGER/ADMIN operations on the
 * role that was handed to them.
 */

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ServiceError;

/// Role claim supplied by the auth collaborator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Role {
    User,
    Manager,
    Admin,
}

impl Role {
    /// Managers and admins operate the back office.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Authenticated caller of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn user(user_id: i64) -> Self {
        Self::new(user_id, Role::User)
    }

    pub fn manager(user_id: i64) -> Self {
        Self::new(user_id, Role::Manager)
    }

    pub fn admin(user_id: i64) -> Self {
        Self::new(user_id, Role::Admin)
    }

    /// Rejects the call with `Forbidden` unless the actor is MANAGER or ADMIN.
    pub fn require_staff(&self, action: &str) -> Result<(), ServiceError> {
        if self.role.is_staff() {
            return Ok(());
        }
        warn!(user_id = self.user_id, role = %self.role, action, "staff-only action denied");
        Err(ServiceError::Forbidden(format!(
            "{} requires MANAGER or ADMIN role",
            action
        )))
    }

    /// Rejects the call with `Forbidden` unless the actor is ADMIN.
    pub fn require_admin(&self, action: &str) -> Result<(), ServiceError> {
        if self.role.is_admin() {
            return Ok(());
        }
        warn!(user_id = self.user_id, role = %self.role, action, "admin-only action denied");
        Err(ServiceError::Forbidden(format!("{} requires ADMIN role", action)))
    }

    /// Staff may act on anyone's resources; users only on their own.
    pub fn require_owner_or_staff(&self, owner_id: i64, action: &str) -> Result<(), ServiceError> {
        if self.role.is_staff() || self.user_id == owner_id {
            return Ok(());
        }
        warn!(
            user_id = self.user_id,
            owner_id, action, "action on another user's resource denied"
        );
        Err(ServiceError::Forbidden(format!(
            "{} is not allowed on another user's order",
            action
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::str::FromStr;

    #[test]
    fn roles_parse_from_claims() {
        assert_eq!(Role::from_str("ADMIN").unwrap(), Role::Admin);
        assert_eq!(Role::from_str("manager").unwrap(), Role::Manager);
        assert!(Role::from_str("superuser").is_err());
        assert_eq!(Role::User.to_string(), "USER");
    }

    #[test]
    fn staff_gate() {
        assert!(Actor::manager(1).require_staff("refund").is_ok());
        assert!(Actor::admin(1).require_staff("refund").is_ok());
        assert_matches!(
            Actor::user(1).require_staff("refund"),
            Err(ServiceError::Forbidden(_))
        );
    }

    #[test]
    fn admin_gate() {
        assert!(Actor::admin(1).require_admin("override").is_ok());
        assert_matches!(
            Actor::manager(1).require_admin("override"),
            Err(ServiceError::Forbidden(_))
        );
    }

    #[test]
    fn ownership_gate() {
        assert!(Actor::user(5).require_owner_or_staff(5, "cancel").is_ok());
        assert!(Actor::manager(9).require_owner_or_staff(5, "cancel").is_ok());
        assert_matches!(
            Actor::user(6).require_owner_or_staff(5, "cancel"),
            Err(ServiceError::Forbidden(_))
        );
    }
}
