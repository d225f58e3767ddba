//! User store port: the resources automations and directory sync mutate.

use std::future::Future;
use std::sync::Arc;

use keyward_domain::error::KeywardError;
use keyward_domain::user::User;

/// Persistence for [`User`]s.
pub trait UserStore {
    fn create(&self, user: User) -> impl Future<Output = Result<User, KeywardError>> + Send;

    fn get_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<User>, KeywardError>> + Send;

    fn get_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<User>, KeywardError>> + Send;

    /// Replace the stored user with the same id and bump its version.
    ///
    /// Fails with [`KeywardError::Conflict`] when the stored version is not
    /// `user.version`, and with [`KeywardError::NotFound`] when no user has
    /// that id.
    fn update(&self, user: User) -> impl Future<Output = Result<User, KeywardError>> + Send;

    /// Returns `false` if no user existed.
    fn delete(&self, id: &str) -> impl Future<Output = Result<bool, KeywardError>> + Send;

    /// Up to `limit` users ordered by id, starting after the id `after`.
    fn list_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<User>, KeywardError>> + Send;
}

impl<T: UserStore + Send + Sync> UserStore for Arc<T> {
    fn create(&self, user: User) -> impl Future<Output = Result<User, KeywardError>> + Send {
        (**self).create(user)
    }

    fn get_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<User>, KeywardError>> + Send {
        (**self).get_by_id(id)
    }

    fn get_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<User>, KeywardError>> + Send {
        (**self).get_by_username(username)
    }

    fn update(&self, user: User) -> impl Future<Output = Result<User, KeywardError>> + Send {
        (**self).update(user)
    }

    fn delete(&self, id: &str) -> impl Future<Output = Result<bool, KeywardError>> + Send {
        (**self).delete(id)
    }

    fn list_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<User>, KeywardError>> + Send {
        (**self).list_page(after, limit)
    }
}
