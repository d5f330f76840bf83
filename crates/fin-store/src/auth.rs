//! Current-user identity, which gates whether user-scoped queries exist.

use parking_lot::RwLock;

use crate::query::{paths::UserScope, types::Target};

/// Supplies the signed-in user id, if any.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// An identity that is set and cleared explicitly.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    uid: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn new(uid: Option<String>) -> Self {
        Self {
            uid: RwLock::new(uid),
        }
    }

    pub fn sign_in(&self, uid: impl Into<String>) {
        *self.uid.write() = Some(uid.into());
    }

    pub fn sign_out(&self) {
        *self.uid.write() = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.uid.read().clone()
    }
}

impl<Q> Target<Q> {
    /// [`Target::for_user`] with the id taken from `identity`.
    pub fn for_identity(
        identity: &dyn IdentityProvider,
        build: impl FnOnce(&UserScope) -> Q,
    ) -> Self {
        let uid = identity.current_user();
        Self::for_user(uid.as_deref(), build)
    }
}
