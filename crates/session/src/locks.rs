//! Per-user mutual exclusion.
//!
//! A fixed array of async mutexes, indexed by a hash of the user id. Two
//! operations on the same user always land on the same stripe and run one
//! after the other; operations on different users usually proceed in
//! parallel, and occasionally share a stripe.

use std::{collections::hash_map::RandomState, hash::BuildHasher};

use tokenward_storage::UserId;
use tokio::sync::{Mutex, MutexGuard};

/// Striped per-user locks.
#[derive(Debug)]
pub(crate) struct UserLocks {
    stripes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl UserLocks {
    /// Creates `stripes` locks (at least one).
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn stripe_index(&self, user_id: &UserId) -> usize {
        let hash = self.hasher.hash_one(user_id.as_str());
        (hash % self.stripes.len() as u64) as usize
    }

    /// Waits for exclusive access to `user_id`'s stripe.
    ///
    /// The guard must not be held while acquiring another user's lock.
    pub(crate) async fn lock(&self, user_id: &UserId) -> MutexGuard<'_, ()> {
        let index = self.stripe_index(user_id);
        self.stripes[index].lock().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[test]
    fn test_same_user_same_stripe() {
        let locks = UserLocks::new(16);
        let user = UserId::from("u-1");
        assert_eq!(locks.stripe_index(&user), locks.stripe_index(&UserId::from("u-1")));
        assert!(locks.stripe_index(&user) < 16);
    }

    #[test]
    fn test_zero_stripes_clamped() {
        let locks = UserLocks::new(0);
        assert_eq!(locks.stripes.len(), 1);
        assert_eq!(locks.stripe_index(&UserId::from("anyone")), 0);
    }

    #[tokio::test]
    async fn test_same_user_is_serialized() {
        let locks = Arc::new(UserLocks::new(4));
        let user = UserId::from("u-1");

        let guard = locks.lock(&user).await;
        let contender = {
            let locks = Arc::clone(&locks);
            let user = user.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&user).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
