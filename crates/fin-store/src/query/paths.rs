//! Per-user document layout.
//!
//! Every user owns `users/{uid}` plus a fixed set of sub-collections under it.

use crate::error::StoreError;
use crate::types::{check_segment, CollectionPath, DocPath};

use super::types::{CollectionQuery, DocumentRef, Target};

/// Root collection holding one profile document per user.
pub const USERS: &str = "users";

/// Sub-collections stored under each user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserCollection {
    Transactions,
    Budgets,
    SavingGoals,
    Alerts,
    Challenges,
}

impl UserCollection {
    pub const ALL: [UserCollection; 5] = [
        Self::Transactions,
        Self::Budgets,
        Self::SavingGoals,
        Self::Alerts,
        Self::Challenges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Budgets => "budgets",
            Self::SavingGoals => "savingGoals",
            Self::Alerts => "alerts",
            Self::Challenges => "challenges",
        }
    }
}

/// Validated path builder for one user's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserScope {
    profile: DocPath,
}

impl UserScope {
    pub fn new(uid: &str) -> Result<Self, StoreError> {
        check_segment(uid)?;
        Ok(Self {
            profile: DocPath::new(format!("{USERS}/{uid}"))?,
        })
    }

    pub fn uid(&self) -> &str {
        self.profile.id()
    }

    /// `users/{uid}`
    pub fn profile(&self) -> DocumentRef {
        DocumentRef::new(self.profile.clone())
    }

    /// `users/{uid}/{collection}`
    pub fn collection_path(&self, collection: UserCollection) -> CollectionPath {
        self.profile.sub_collection(collection.as_str())
    }

    /// Unfiltered query over one of the user's sub-collections.
    pub fn collection(&self, collection: UserCollection) -> CollectionQuery {
        CollectionQuery::new(self.collection_path(collection))
    }

    /// `users/{uid}/{collection}/{id}`
    pub fn item(&self, collection: UserCollection, id: &str) -> Result<DocumentRef, StoreError> {
        Ok(DocumentRef::new(self.collection_path(collection).doc(id)?))
    }
}

impl<Q> Target<Q> {
    /// Build a query for the signed-in user, or `Unavailable` when no usable
    /// user id is present.
    pub fn for_user(uid: Option<&str>, build: impl FnOnce(&UserScope) -> Q) -> Self {
        let Some(uid) = uid else {
            return Self::Unavailable;
        };
        match UserScope::new(uid) {
            Ok(scope) => Self::Ready(build(&scope)),
            Err(e) => {
                tracing::warn!(uid, error = %e, "ignoring unusable user id");
                Self::Unavailable
            }
        }
    }
}
