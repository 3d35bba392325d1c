//! Rate limiter for login attempts
//!
//! Two sliding windows:
//! - failed logins per username (configurable, 5 per 15 minutes by default)
//! - login requests per client IP (10 per minute)

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::RwLock;

const IP_REQUESTS_PER_MINUTE: usize = 10;

/// Login rate limiter
pub struct LoginRateLimiter {
    max_attempts: usize,
    lockout: Duration,
    /// Failed login attempts by lowercased username
    username_attempts: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
    /// Login requests by IP address
    ip_attempts: RwLock<HashMap<IpAddr, Vec<DateTime<Utc>>>>,
}

impl LoginRateLimiter {
    /// `max_attempts` failed logins within `lockout_minutes` lock the username
    pub fn new(max_attempts: usize, lockout_minutes: i64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout: Duration::minutes(lockout_minutes.max(1)),
            username_attempts: RwLock::new(HashMap::new()),
            ip_attempts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_username_limited(&self, username: &str) -> bool {
        let cutoff = Utc::now() - self.lockout;
        let mut attempts = self.username_attempts.write().await;

        match attempts.get_mut(&username.to_lowercase()) {
            Some(times) => {
                times.retain(|time| *time > cutoff);
                times.len() >= self.max_attempts
            }
            None => false,
        }
    }

    pub async fn record_failed_attempt(&self, username: &str) {
        let mut attempts = self.username_attempts.write().await;
        attempts
            .entry(username.to_lowercase())
            .or_default()
            .push(Utc::now());
    }

    /// Forget failed attempts after a successful login
    pub async fn clear_username_attempts(&self, username: &str) {
        self.username_attempts
            .write()
            .await
            .remove(&username.to_lowercase());
    }

    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        let cutoff = Utc::now() - Duration::minutes(1);
        let mut attempts = self.ip_attempts.write().await;

        match attempts.get_mut(&ip) {
            Some(times) => {
                times.retain(|time| *time > cutoff);
                times.len() >= IP_REQUESTS_PER_MINUTE
            }
            None => false,
        }
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.ip_attempts
            .write()
            .await
            .entry(ip)
            .or_default()
            .push(Utc::now());
    }

    /// Drop expired entries. Called by the periodic cleanup task.
    pub async fn cleanup(&self) {
        let now = Utc::now();
        let username_cutoff = now - self.lockout;
        let ip_cutoff = now - Duration::minutes(1);

        self.username_attempts.write().await.retain(|_, times| {
            times.retain(|time| *time > username_cutoff);
            !times.is_empty()
        });

        self.ip_attempts.write().await.retain(|_, times| {
            times.retain(|time| *time > ip_cutoff);
            !times.is_empty()
        });
    }

    #[cfg(test)]
    async fn tracked_usernames(&self) -> usize {
        self.username_attempts.read().await.len()
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(5, 15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_username_limit_reached_after_max_attempts() {
        let limiter = LoginRateLimiter::new(3, 15);

        for _ in 0..2 {
            limiter.record_failed_attempt("student").await;
        }
        assert!(!limiter.is_username_limited("student").await);

        limiter.record_failed_attempt("student").await;
        assert!(limiter.is_username_limited("student").await);

        limiter.clear_username_attempts("student").await;
        assert!(!limiter.is_username_limited("student").await);
    }

    #[tokio::test]
    async fn test_username_is_case_insensitive() {
        let limiter = LoginRateLimiter::new(2, 15);
        limiter.record_failed_attempt("Alice").await;
        limiter.record_failed_attempt("ALICE").await;
        assert!(limiter.is_username_limited("alice").await);
    }

    #[tokio::test]
    async fn test_ip_limit() {
        let limiter = LoginRateLimiter::default();
        let ip: IpAddr = "10.0.0.7".parse().unwrap();

        for _ in 0..IP_REQUESTS_PER_MINUTE - 1 {
            limiter.record_ip_request(ip).await;
        }
        assert!(!limiter.is_ip_limited(ip).await);

        limiter.record_ip_request(ip).await;
        assert!(limiter.is_ip_limited(ip).await);

        let other: IpAddr = "10.0.0.8".parse().unwrap();
        assert!(!limiter.is_ip_limited(other).await);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_attempts() {
        let limiter = LoginRateLimiter::default();
        limiter.record_failed_attempt("bob").await;
        limiter.cleanup().await;
        assert_eq!(limiter.tracked_usernames().await, 1);
    }
}
