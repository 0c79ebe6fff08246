/// Auth provider seam. The store consumes a normalized identity and
/// never implements authentication itself.
use crate::directory::Directory;
use crate::error::{Result, StoreError};
use crate::identity::UserKey;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub trait AuthProvider: Send + Sync {
    /// Validate credentials and return the caller's normalized identity.
    fn sign_in(&self, credentials: &Credentials) -> Result<UserKey>;
    fn current_user(&self) -> Option<UserKey>;
    fn sign_out(&self);
}

/// Directory-backed provider for local deployments and tests: sign-in
/// succeeds for any registered user. Real credential checking belongs
/// to an external identity service behind this trait.
pub struct LocalAuth {
    directory: Directory,
    current: Mutex<Option<UserKey>>,
}

impl LocalAuth {
    pub fn new(directory: Directory) -> Self {
        Self {
            directory,
            current: Mutex::new(None),
        }
    }
}

impl AuthProvider for LocalAuth {
    fn sign_in(&self, credentials: &Credentials) -> Result<UserKey> {
        let key = UserKey::normalize(&credentials.email);
        if !self.directory.user_exists(&key)? {
            return Err(StoreError::UserNotFound(key.to_string()));
        }
        *self.current.lock().expect("auth lock poisoned") = Some(key.clone());
        Ok(key)
    }

    fn current_user(&self) -> Option<UserKey> {
        self.current.lock().expect("auth lock poisoned").clone()
    }

    fn sign_out(&self) {
        *self.current.lock().expect("auth lock poisoned") = None;
    }
}
