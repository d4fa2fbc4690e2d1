//! Per-connection identity and the auth state machine.
//!
//! A session is Anonymous until it either picks an ephemeral nick (`/nick`)
//! or logs into an account (`/login`, `/register`). The two are mutually
//! exclusive: logging in clears the nick, and nick changes are rejected
//! while authenticated.

use thiserror::Error;

/// Maximum length of an ephemeral nickname; longer input is truncated.
pub const MAX_NICK_LEN: usize = 32;

/// Names that can never be used as a nick or account name.
pub const BANNED_NAMES: &[&str] = &["admin", "root", "system", "moderator", "server"];

/// User-correctable identity/auth failures. Replied to the issuing session
/// only, never broadcast and never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unknown user.")]
    UnknownUser,
    #[error("Invalid password.")]
    BadPassword,
    #[error("Username already exists.")]
    NameTaken,
    #[error("This name is prohibited. Choose another.")]
    NameForbidden,
    #[error("User already logged in elsewhere.")]
    AlreadyOnline,
    #[error("You're logged in; to set a separate nick, logout first.")]
    AlreadyAuthenticated,
    #[error("Not logged in.")]
    NotAuthenticated,
}

/// Display-name and auth state for one live connection. Owned exclusively by
/// the connection's task; the registry holds only published name snapshots.
#[derive(Debug)]
pub struct Identity {
    id: u64,
    nick: Option<String>,
    auth_user: Option<String>,
    /// Pre-rendered ASCII avatar, prefixed to this sender's chat lines.
    pub avatar: Option<String>,
}

impl Identity {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            nick: None,
            auth_user: None,
            avatar: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Authenticated username if logged in, else the chosen nick, else
    /// `User{id}`. Never empty.
    pub fn display_name(&self) -> String {
        if let Some(ref user) = self.auth_user {
            user.clone()
        } else if let Some(ref nick) = self.nick {
            nick.clone()
        } else {
            format!("User{}", self.id)
        }
    }

    pub fn auth_user(&self) -> Option<&str> {
        self.auth_user.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_user.is_some()
    }

    /// Set an ephemeral nick. Returns (old, new) display names for the
    /// rename announcement.
    pub fn set_nick(&mut self, name: &str) -> Result<(String, String), AuthError> {
        let name: String = name.trim().chars().take(MAX_NICK_LEN).collect();
        if name.is_empty() || is_banned_name(&name) {
            return Err(AuthError::NameForbidden);
        }
        if self.auth_user.is_some() {
            return Err(AuthError::AlreadyAuthenticated);
        }
        let old = self.display_name();
        self.nick = Some(name);
        Ok((old, self.display_name()))
    }

    /// Transition to Authenticated after the password store accepted the
    /// credentials. Clears any ephemeral nick.
    pub fn log_in(&mut self, username: &str) {
        self.auth_user = Some(username.to_string());
        self.nick = None;
    }

    /// Return to Anonymous (not to any prior nick). Yields the username that
    /// logged out, for the departure-of-name announcement.
    pub fn log_out(&mut self) -> Result<String, AuthError> {
        let user = self.auth_user.take().ok_or(AuthError::NotAuthenticated)?;
        self.nick = None;
        Ok(user)
    }
}

/// Case-insensitive membership in the banned-name set.
pub fn is_banned_name(name: &str) -> bool {
    BANNED_NAMES.iter().any(|b| b.eq_ignore_ascii_case(name))
}
