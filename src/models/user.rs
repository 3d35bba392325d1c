//! User model
//!
//! Users are students, instructors, or administrators. The role decides
//! which parts of the platform a user may manage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new User. The password must already be hashed.
    pub fn new(username: String, email: String, password_hash: String, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username,
            email,
            password_hash,
            display_name: None,
            bio: None,
            role,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the user is an administrator
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Check if the user may author courses (instructors and admins)
    pub fn is_instructor(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::Instructor)
    }

    /// Admins manage everything; everyone else only what they own.
    pub fn can_manage(&self, owner_id: i64) -> bool {
        self.is_admin() || self.id == owner_id
    }

    /// Check if the user is banned
    pub fn is_banned(&self) -> bool {
        self.status == UserStatus::Banned
    }

    /// Name printed on certificates and shown to other users
    pub fn public_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Full access to all features
    Admin,
    /// Can author and sell courses
    Instructor,
    /// Can enroll in courses
    #[default]
    Student,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Instructor => write!(f, "instructor"),
            UserRole::Student => write!(f, "student"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "instructor" => Ok(UserRole::Instructor),
            "student" => Ok(UserRole::Student),
            _ => Err(anyhow::anyhow!("Invalid user role: {}", s)),
        }
    }
}

/// Account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    /// Cannot log in
    Banned,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Banned => write!(f, "banned"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            _ => Err(anyhow::anyhow!("Invalid user status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, role: UserRole) -> User {
        let mut user = User::new(
            format!("user{}", id),
            format!("user{}@example.com", id),
            "hash".to_string(),
            role,
        );
        user.id = id;
        user
    }

    #[test]
    fn test_user_new_defaults() {
        let user = User::new(
            "ada".to_string(),
            "ada@example.com".to_string(),
            "hash".to_string(),
            UserRole::Student,
        );

        assert_eq!(user.id, 0);
        assert_eq!(user.status, UserStatus::Active);
        assert!(user.display_name.is_none());
    }

    #[test]
    fn test_role_checks() {
        assert!(user(1, UserRole::Admin).is_admin());
        assert!(user(1, UserRole::Admin).is_instructor());
        assert!(user(1, UserRole::Instructor).is_instructor());
        assert!(!user(1, UserRole::Instructor).is_admin());
        assert!(!user(1, UserRole::Student).is_instructor());
    }

    #[test]
    fn test_can_manage() {
        let admin = user(1, UserRole::Admin);
        let prof = user(2, UserRole::Instructor);

        assert!(admin.can_manage(2));
        assert!(admin.can_manage(999));
        assert!(prof.can_manage(2));
        assert!(!prof.can_manage(1));
    }

    #[test]
    fn test_public_name_prefers_display_name() {
        let mut u = user(3, UserRole::Student);
        assert_eq!(u.public_name(), "user3");

        u.display_name = Some("   ".to_string());
        assert_eq!(u.public_name(), "user3");

        u.display_name = Some("Grace Hopper".to_string());
        assert_eq!(u.public_name(), "Grace Hopper");
    }

    #[test]
    fn test_role_round_trip_and_default() {
        assert_eq!(UserRole::from_str("INSTRUCTOR").unwrap(), UserRole::Instructor);
        assert_eq!(UserRole::Student.to_string(), "student");
        assert!(UserRole::from_str("prof").is_err());
        assert_eq!(UserRole::default(), UserRole::Student);
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(user(1, UserRole::Student)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "student");
    }
}
