//! Idempotent create-or-reuse.
//!
//! [`upsert`] is the single place that decides between creating a resource
//! and reusing an existing one. Callers pass a lookup and a constructor; the
//! lookup runs first and creation only happens when it returns nothing.
//!
//! Runs are sequential, so a name looked up as absent is created exactly once
//! per run. Nothing guards against two processes racing on the same name.

use crate::directory::DirectoryError;
use crate::error::{ProvisionError, ProvisionResult};
use log::{debug, warn};
use std::future::Future;

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted<T> {
    Created(T),
    Reused(T),
}

impl<T> Upserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Upserted::Created(value) | Upserted::Reused(value) => value,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Upserted::Created(value) | Upserted::Reused(value) => value,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Upserted::Created(_))
    }

    pub fn outcome(&self) -> crate::report::Outcome {
        match self {
            Upserted::Created(_) => crate::report::Outcome::Created,
            Upserted::Reused(_) => crate::report::Outcome::Reused,
        }
    }
}

/// Look up `name`; create it only if the lookup finds nothing.
///
/// When the lookup returns several matches the first is reused and the
/// duplicates are logged, since names are expected to be unique.
pub async fn upsert<T, L, C, F>(
    kind: &str,
    name: &str,
    lookup: L,
    create: C,
) -> ProvisionResult<Upserted<T>>
where
    L: Future<Output = Result<Vec<T>, DirectoryError>>,
    C: FnOnce() -> F,
    F: Future<Output = Result<T, DirectoryError>>,
{
    debug!("Looking up {} '{}'", kind, name);
    let mut existing = lookup
        .await
        .map_err(|e| ProvisionError::remote(format!("look up {} '{}'", kind, name), e))?;

    if !existing.is_empty() {
        if existing.len() > 1 {
            warn!(
                "{} {} resources are named '{}'; reusing the first",
                existing.len(),
                kind,
                name
            );
        }
        return Ok(Upserted::Reused(existing.swap_remove(0)));
    }

    let created = create()
        .await
        .map_err(|e| ProvisionError::remote(format!("create {} '{}'", kind, name), e))?;
    Ok(Upserted::Created(created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryProvider, InMemoryDirectory, NewGroup};

    async fn upsert_group(
        directory: &InMemoryDirectory,
        name: &str,
    ) -> ProvisionResult<Upserted<crate::directory::GroupRecord>> {
        upsert(
            "group",
            name,
            directory.find_groups_by_name(name),
            || directory.create_group(NewGroup::new(name, "", false)),
        )
        .await
    }

    #[tokio::test]
    async fn test_second_upsert_reuses() {
        let directory = InMemoryDirectory::new();

        let first = upsert_group(&directory, "SG-a").await.unwrap();
        let second = upsert_group(&directory, "SG-a").await.unwrap();

        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.get().id, second.get().id);
        assert_eq!(directory.stats().await.groups, 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_creates_nothing() {
        let directory = InMemoryDirectory::new();
        directory.fail_on("SG-down").await;

        let err = upsert_group(&directory, "SG-down").await.unwrap_err();
        assert!(matches!(err, ProvisionError::RemoteCallFailed { .. }));
        assert_eq!(directory.stats().await.groups, 0);
    }

    #[tokio::test]
    async fn test_duplicates_reuse_first() {
        let directory = InMemoryDirectory::new();
        let a = directory
            .create_group(NewGroup::new("SG-dup", "", false))
            .await
            .unwrap();
        directory
            .create_group(NewGroup::new("SG-dup", "", false))
            .await
            .unwrap();

        let result = upsert_group(&directory, "SG-dup").await.unwrap();
        assert_eq!(result, Upserted::Reused(a));
    }

    proptest::proptest! {
        #[test]
        fn repeated_upserts_create_once(name in "SG-[A-Za-z0-9-]{1,24}", runs in 2usize..5) {
            tokio_test::block_on(async {
                let directory = InMemoryDirectory::new();
                let first = upsert_group(&directory, &name).await.unwrap();
                for _ in 1..runs {
                    let again = upsert_group(&directory, &name).await.unwrap();
                    assert!(!again.was_created());
                    assert_eq!(again.get().id, first.get().id);
                }
                assert_eq!(directory.stats().await.groups, 1);
            });
        }
    }
}
