//! User service
//!
//! Registration, login and sessions, profile edits, and the admin-side
//! user management (roles and bans).
//!
//! The first account ever registered becomes the admin. Later accounts
//! register as students or instructors; admin cannot be self-requested.

use crate::config::AuthConfig;
use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{ListParams, PagedResult, Session, User, UserRole, UserStatus};
use crate::services::password::{check_password_policy, hash_password, verify_password};
use crate::services::rate_limiter::LoginRateLimiter;
use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Authentication failed (invalid credentials or banned account)
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found")]
    NotFound,

    #[error("Too many failed login attempts, try again later")]
    RateLimited,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for user registration
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    /// `student` (default) or `instructor`
    #[serde(default)]
    pub role: Option<UserRole>,
}

impl RegisterInput {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// Input for user login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileInput {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

/// A logged-in session together with its user
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub session: Session,
    pub user: User,
}

/// User service for managing users and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    rate_limiter: Arc<LoginRateLimiter>,
    session_days: i64,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        auth: &AuthConfig,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            rate_limiter: Arc::new(LoginRateLimiter::new(
                auth.max_login_attempts,
                auth.lockout_minutes,
            )),
            session_days: auth.session_days.max(1),
        }
    }

    /// The limiter shared with the HTTP layer for per-IP throttling
    pub fn rate_limiter(&self) -> Arc<LoginRateLimiter> {
        self.rate_limiter.clone()
    }

    /// Register a new user.
    ///
    /// # Errors
    ///
    /// - `ValidationError` for malformed input or a requested admin role
    /// - `UserExists` if the username or email is taken
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_string();
        validate_username(&username)?;
        validate_email(&email)?;
        if let Some(reason) = check_password_policy(&input.password) {
            return Err(UserServiceError::ValidationError(reason));
        }

        let requested = input.role.unwrap_or_default();
        if requested == UserRole::Admin {
            return Err(UserServiceError::ValidationError(
                "Admin role cannot be requested at registration".to_string(),
            ));
        }

        if self
            .user_repo
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Username '{}' is already taken",
                username
            )));
        }

        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Email '{}' is already registered",
                email
            )));
        }

        let first = self.user_repo.count().await.context("Failed to count users")? == 0;
        let role = if first { UserRole::Admin } else { requested };

        let password_hash = hash_password(&input.password)?;
        let user = self
            .user_repo
            .create(&User::new(username, email, password_hash, role))
            .await
            .context("Failed to create user")?;

        tracing::info!(user_id = user.id, role = %user.role, "User registered");
        Ok(user)
    }

    /// Check credentials and open a new session.
    ///
    /// Failed attempts count against the username; once the limit is hit,
    /// further attempts fail with `RateLimited` until the window passes.
    pub async fn login(&self, input: LoginInput) -> Result<AuthSession, UserServiceError> {
        let key = input.username_or_email.trim();

        if self.rate_limiter.is_username_limited(key).await {
            tracing::warn!(username = key, "Login blocked by rate limit");
            return Err(UserServiceError::RateLimited);
        }

        let user = match self.find_user_by_username_or_email(key).await? {
            Some(user) => user,
            None => {
                self.rate_limiter.record_failed_attempt(key).await;
                return Err(invalid_credentials());
            }
        };

        if !verify_password(&input.password, &user.password_hash)? {
            self.rate_limiter.record_failed_attempt(key).await;
            return Err(invalid_credentials());
        }

        if user.is_banned() {
            return Err(UserServiceError::AuthenticationError(
                "This account has been banned".to_string(),
            ));
        }

        self.rate_limiter.clear_username_attempts(key).await;
        let session = self.create_session(user.id).await?;
        Ok(AuthSession { session, user })
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// Returns `None` for unknown or expired tokens and for banned users.
    /// Expired sessions are deleted on sight.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let session = match self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        {
            Some(session) => session,
            None => return Ok(None),
        };

        if session.is_expired() {
            self.session_repo
                .delete(token)
                .await
                .context("Failed to delete expired session")?;
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;

        Ok(user.filter(|u| !u.is_banned()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<User, UserServiceError> {
        self.user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user")?
            .ok_or(UserServiceError::NotFound)
    }

    pub async fn update_profile(
        &self,
        user_id: i64,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        let mut user = self.get_by_id(user_id).await?;

        if let Some(display_name) = input.display_name {
            let display_name = display_name.trim().to_string();
            if display_name.chars().count() > 64 {
                return Err(UserServiceError::ValidationError(
                    "Display name must be at most 64 characters".to_string(),
                ));
            }
            user.display_name = (!display_name.is_empty()).then_some(display_name);
        }
        if let Some(bio) = input.bio {
            if bio.chars().count() > 2000 {
                return Err(UserServiceError::ValidationError(
                    "Bio must be at most 2000 characters".to_string(),
                ));
            }
            user.bio = (!bio.trim().is_empty()).then_some(bio);
        }

        user.updated_at = Utc::now();
        Ok(self.user_repo.update(&user).await.context("Failed to update user")?)
    }

    /// Change the password and end every other session of the user.
    pub async fn change_password(
        &self,
        user_id: i64,
        current_session: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), UserServiceError> {
        let mut user = self.get_by_id(user_id).await?;

        if !verify_password(current_password, &user.password_hash)? {
            return Err(UserServiceError::AuthenticationError(
                "Current password is incorrect".to_string(),
            ));
        }
        if let Some(reason) = check_password_policy(new_password) {
            return Err(UserServiceError::ValidationError(reason));
        }

        user.password_hash = hash_password(new_password)?;
        user.updated_at = Utc::now();
        self.user_repo.update(&user).await.context("Failed to update password")?;

        let ended = self
            .session_repo
            .delete_others(user_id, current_session)
            .await
            .context("Failed to end other sessions")?;
        tracing::info!(user_id, sessions_ended = ended, "Password changed");
        Ok(())
    }

    pub async fn list_users(
        &self,
        params: &ListParams,
        role: Option<UserRole>,
    ) -> Result<PagedResult<User>, UserServiceError> {
        let (users, total) = self
            .user_repo
            .list(params.page as i64, params.limit(), role)
            .await
            .context("Failed to list users")?;
        Ok(PagedResult::new(users, total, params))
    }

    /// Change another user's role. Admins cannot change their own role.
    pub async fn set_role(
        &self,
        actor_id: i64,
        user_id: i64,
        role: UserRole,
    ) -> Result<User, UserServiceError> {
        if actor_id == user_id {
            return Err(UserServiceError::PermissionDenied(
                "You cannot change your own role".to_string(),
            ));
        }
        let mut user = self.get_by_id(user_id).await?;
        user.role = role;
        user.updated_at = Utc::now();
        let user = self.user_repo.update(&user).await.context("Failed to update role")?;
        tracing::info!(user_id, role = %user.role, "User role changed");
        Ok(user)
    }

    /// Ban or reinstate a user. Banning ends all of the user's sessions.
    pub async fn set_status(
        &self,
        actor_id: i64,
        user_id: i64,
        status: UserStatus,
    ) -> Result<User, UserServiceError> {
        if actor_id == user_id {
            return Err(UserServiceError::PermissionDenied(
                "You cannot change your own status".to_string(),
            ));
        }
        let mut user = self.get_by_id(user_id).await?;
        user.status = status;
        user.updated_at = Utc::now();
        let user = self.user_repo.update(&user).await.context("Failed to update status")?;

        if user.is_banned() {
            self.session_repo
                .delete_by_user(user_id)
                .await
                .context("Failed to end sessions of banned user")?;
        }
        tracing::info!(user_id, status = %user.status, "User status changed");
        Ok(user)
    }

    pub async fn count_by_role(&self) -> Result<Vec<(UserRole, i64)>, UserServiceError> {
        Ok(self
            .user_repo
            .count_by_role()
            .await
            .context("Failed to count users")?)
    }

    /// Remove expired sessions and stale rate-limit entries
    pub async fn cleanup_expired(&self) -> Result<u64, UserServiceError> {
        let removed = self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?;
        self.rate_limiter.cleanup().await;
        Ok(removed)
    }

    async fn find_user_by_username_or_email(
        &self,
        key: &str,
    ) -> Result<Option<User>, UserServiceError> {
        let user = if key.contains('@') {
            self.user_repo.get_by_email(key).await
        } else {
            self.user_repo.get_by_username(key).await
        }
        .context("Failed to look up user")?;
        Ok(user)
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let session = Session::new(Uuid::new_v4().to_string(), user_id, self.session_days);
        Ok(self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?)
    }
}

fn invalid_credentials() -> UserServiceError {
    UserServiceError::AuthenticationError("Invalid username or password".to_string())
}

fn validate_username(username: &str) -> Result<(), UserServiceError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(UserServiceError::ValidationError(
            "Username must be 3 to 32 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(UserServiceError::ValidationError(
            "Username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), UserServiceError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(()),
        _ => Err(UserServiceError::ValidationError("Invalid email address".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_db;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};

    async fn setup_service() -> UserService {
        let db = setup_db().await;
        UserService::new(
            SqlxUserRepository::boxed(db.clone()),
            SqlxSessionRepository::boxed(db),
            &AuthConfig {
                session_days: 7,
                max_login_attempts: 3,
                lockout_minutes: 15,
            },
        )
    }

    async fn register(service: &UserService, name: &str) -> User {
        service
            .register(RegisterInput::new(name, format!("{}@example.com", name), "password123"))
            .await
            .expect("Failed to register")
    }

    #[tokio::test]
    async fn test_first_user_becomes_admin() {
        let service = setup_service().await;
        let admin = register(&service, "admin").await;
        assert_eq!(admin.role, UserRole::Admin);

        let student = register(&service, "student").await;
        assert_eq!(student.role, UserRole::Student);

        let prof = service
            .register(
                RegisterInput::new("prof", "prof@example.com", "password123")
                    .with_role(UserRole::Instructor),
            )
            .await
            .unwrap();
        assert_eq!(prof.role, UserRole::Instructor);
    }

    #[tokio::test]
    async fn test_register_rejects_admin_request_and_bad_input() {
        let service = setup_service().await;
        register(&service, "admin").await;

        let result = service
            .register(RegisterInput::new("mallory", "m@example.com", "password123").with_role(UserRole::Admin))
            .await;
        assert!(matches!(result, Err(UserServiceError::ValidationError(_))));

        let cases = [
            RegisterInput::new("", "a@example.com", "password123"),
            RegisterInput::new("bob", "not-an-email", "password123"),
            RegisterInput::new("bob", "bob@example.com", "short"),
            RegisterInput::new("b o b", "bob@example.com", "password123"),
        ];
        for input in cases {
            assert!(matches!(
                service.register(input).await,
                Err(UserServiceError::ValidationError(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_register_duplicates() {
        let service = setup_service().await;
        register(&service, "alice").await;

        let same_name = service
            .register(RegisterInput::new("alice", "other@example.com", "password123"))
            .await;
        assert!(matches!(same_name, Err(UserServiceError::UserExists(_))));

        let same_email = service
            .register(RegisterInput::new("alice2", "ALICE@example.com", "password123"))
            .await;
        assert!(matches!(same_email, Err(UserServiceError::UserExists(_))));
    }

    #[tokio::test]
    async fn test_login_and_validate_session() {
        let service = setup_service().await;
        let alice = register(&service, "alice").await;

        let auth = service.login(LoginInput::new("alice", "password123")).await.unwrap();
        assert_eq!(auth.user.id, alice.id);

        let by_email = service
            .login(LoginInput::new("alice@example.com", "password123"))
            .await
            .unwrap();
        assert_ne!(auth.session.id, by_email.session.id);

        let user = service.validate_session(&auth.session.id).await.unwrap();
        assert_eq!(user.map(|u| u.id), Some(alice.id));

        service.logout(&auth.session.id).await.unwrap();
        assert!(service.validate_session(&auth.session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_rate_limited_after_failures() {
        let service = setup_service().await;
        register(&service, "alice").await;

        for _ in 0..3 {
            let result = service.login(LoginInput::new("alice", "wrong-password")).await;
            assert!(matches!(result, Err(UserServiceError::AuthenticationError(_))));
        }

        // Even the right password is refused while locked out
        let result = service.login(LoginInput::new("alice", "password123")).await;
        assert!(matches!(result, Err(UserServiceError::RateLimited)));
    }

    #[tokio::test]
    async fn test_ban_ends_sessions_and_blocks_login() {
        let service = setup_service().await;
        let admin = register(&service, "admin").await;
        let bob = register(&service, "bob").await;

        let auth = service.login(LoginInput::new("bob", "password123")).await.unwrap();
        service.set_status(admin.id, bob.id, UserStatus::Banned).await.unwrap();

        assert!(service.validate_session(&auth.session.id).await.unwrap().is_none());
        let result = service.login(LoginInput::new("bob", "password123")).await;
        assert!(matches!(result, Err(UserServiceError::AuthenticationError(_))));

        let own = service.set_status(admin.id, admin.id, UserStatus::Banned).await;
        assert!(matches!(own, Err(UserServiceError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_change_password_ends_other_sessions() {
        let service = setup_service().await;
        let alice = register(&service, "alice").await;
        let first = service.login(LoginInput::new("alice", "password123")).await.unwrap();
        let second = service.login(LoginInput::new("alice", "password123")).await.unwrap();

        let wrong = service
            .change_password(alice.id, &first.session.id, "nope-nope", "newpassword1")
            .await;
        assert!(matches!(wrong, Err(UserServiceError::AuthenticationError(_))));

        service
            .change_password(alice.id, &first.session.id, "password123", "newpassword1")
            .await
            .unwrap();

        assert!(service.validate_session(&first.session.id).await.unwrap().is_some());
        assert!(service.validate_session(&second.session.id).await.unwrap().is_none());
        assert!(service.login(LoginInput::new("alice", "newpassword1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_profile_and_roles() {
        let service = setup_service().await;
        let admin = register(&service, "admin").await;
        let bob = register(&service, "bob").await;

        let updated = service
            .update_profile(
                bob.id,
                UpdateProfileInput {
                    display_name: Some("Bob B.".to_string()),
                    bio: Some("Learning Rust".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.public_name(), "Bob B.");

        let promoted = service.set_role(admin.id, bob.id, UserRole::Instructor).await.unwrap();
        assert!(promoted.is_instructor());

        let page = service
            .list_users(&ListParams::new(1, 10), Some(UserRole::Instructor))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, bob.id);
    }
}
