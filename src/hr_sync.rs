//! HR-driven onboarding and offboarding.
//!
//! The HR export is a CSV of worker records. Workers whose hire date falls
//! inside the onboarding window get a disabled account created ahead of their
//! start date; workers whose termination date has passed get their account
//! disabled once the operator confirms. Accounts are never deleted.

use crate::confirm::ConfirmationProvider;
use crate::directory::{DirectoryProvider, NewUser, UserRecord};
use crate::error::{ProvisionError, ProvisionResult};
use crate::report::Outcome;
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

/// One row of the HR export.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerRecord {
    pub employee_id: String,
    pub user_principal_name: String,
    pub display_name: String,
    pub hire_date: NaiveDate,
    pub termination_date: Option<NaiveDate>,
}

/// What the sync should do for a worker on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrAction {
    Onboard,
    Offboard,
    None,
}

impl WorkerRecord {
    /// Decide the action for `today`. Termination wins over hiring.
    pub fn action(&self, today: NaiveDate, window_days: u32) -> HrAction {
        if self.termination_date.is_some_and(|d| d <= today) {
            return HrAction::Offboard;
        }
        // A window past the last representable date is open-ended.
        let in_window = today
            .checked_add_signed(Duration::days(i64::from(window_days)))
            .is_none_or(|end| self.hire_date <= end);
        if self.hire_date >= today && in_window {
            return HrAction::Onboard;
        }
        HrAction::None
    }
}

pub fn parse_workers_csv<R: Read>(input: R) -> ProvisionResult<Vec<WorkerRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    let mut workers = Vec::new();
    for (index, row) in reader.deserialize::<WorkerRecord>().enumerate() {
        let worker = row.map_err(|e| ProvisionError::InvalidInput {
            message: format!("HR export line {}: {}", index + 2, e),
        })?;
        workers.push(worker);
    }
    Ok(workers)
}

pub fn read_workers_csv(path: &Path) -> ProvisionResult<Vec<WorkerRecord>> {
    let file = std::fs::File::open(path)?;
    parse_workers_csv(file)
}

/// Result of syncing one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedWorker {
    pub user: Option<UserRecord>,
    pub outcome: Outcome,
    pub detail: String,
}

/// Create a disabled account for a worker about to start.
pub async fn onboard<D: DirectoryProvider>(
    directory: &D,
    worker: &WorkerRecord,
) -> ProvisionResult<SyncedWorker> {
    let upn = &worker.user_principal_name;
    let existing = directory
        .find_user_by_upn(upn)
        .await
        .map_err(|e| ProvisionError::remote(format!("look up user '{}'", upn), e))?;
    if let Some(user) = existing {
        return Ok(SyncedWorker {
            user: Some(user),
            outcome: Outcome::Reused,
            detail: "account already exists".to_string(),
        });
    }

    let user = directory
        .create_user(NewUser {
            user_principal_name: upn.clone(),
            display_name: worker.display_name.clone(),
            employee_id: worker.employee_id.clone(),
            account_enabled: false,
            hire_date: worker
                .hire_date
                .and_hms_opt(0, 0, 0)
                .map(|start| start.and_utc()),
        })
        .await
        .map_err(|e| ProvisionError::remote(format!("create user '{}'", upn), e))?;

    Ok(SyncedWorker {
        user: Some(user),
        outcome: Outcome::Created,
        detail: format!("disabled until {}", worker.hire_date),
    })
}

/// Disable the account of a terminated worker, after confirmation.
pub async fn offboard<D, C>(
    directory: &D,
    confirmation: &C,
    worker: &WorkerRecord,
) -> ProvisionResult<SyncedWorker>
where
    D: DirectoryProvider,
    C: ConfirmationProvider + ?Sized,
{
    let upn = &worker.user_principal_name;
    let user = directory
        .find_user_by_upn(upn)
        .await
        .map_err(|e| ProvisionError::remote(format!("look up user '{}'", upn), e))?;

    let Some(user) = user else {
        return Ok(SyncedWorker {
            user: None,
            outcome: Outcome::Skipped,
            detail: "no account to disable".to_string(),
        });
    };
    if !user.account_enabled {
        return Ok(SyncedWorker {
            user: Some(user),
            outcome: Outcome::Reused,
            detail: "already disabled".to_string(),
        });
    }

    let termination = worker
        .termination_date
        .map(|d| d.to_string())
        .unwrap_or_default();
    let question = format!("Disable account '{}' (terminated {})?", upn, termination);
    if !confirmation.confirm(&question) {
        return Ok(SyncedWorker {
            user: Some(user),
            outcome: Outcome::Skipped,
            detail: "operator declined".to_string(),
        });
    }

    directory
        .set_account_enabled(&user.id, false)
        .await
        .map_err(|e| ProvisionError::remote(format!("disable user '{}'", upn), e))?;
    Ok(SyncedWorker {
        user: Some(UserRecord {
            account_enabled: false,
            ..user
        }),
        outcome: Outcome::Updated,
        detail: format!("disabled, terminated {}", termination),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{AutoApprove, AutoDecline};
    use crate::directory::InMemoryDirectory;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn worker(hire: NaiveDate, termination: Option<NaiveDate>) -> WorkerRecord {
        WorkerRecord {
            employee_id: "E100".to_string(),
            user_principal_name: "ada@example.com".to_string(),
            display_name: "Ada Lovelace".to_string(),
            hire_date: hire,
            termination_date: termination,
        }
    }

    #[test]
    fn test_action_windows() {
        let today = date(2026, 3, 1);
        assert_eq!(worker(today, None).action(today, 14), HrAction::Onboard);
        assert_eq!(worker(date(2026, 3, 15), None).action(today, 14), HrAction::Onboard);
        assert_eq!(worker(date(2026, 3, 16), None).action(today, 14), HrAction::None);
        assert_eq!(worker(date(2026, 2, 28), None).action(today, 14), HrAction::None);
        assert_eq!(
            worker(date(2020, 1, 1), Some(today)).action(today, 14),
            HrAction::Offboard
        );
        assert_eq!(
            worker(date(2020, 1, 1), Some(date(2026, 3, 2))).action(today, 14),
            HrAction::None
        );
    }

    #[test]
    fn test_huge_window_is_open_ended() {
        let today = date(2026, 3, 1);
        assert_eq!(
            worker(date(2090, 1, 1), None).action(today, u32::MAX),
            HrAction::Onboard
        );
        assert_eq!(
            worker(date(2026, 2, 1), None).action(today, u32::MAX),
            HrAction::None
        );
    }

    #[test]
    fn test_parse_workers() {
        let csv = "employee_id,user_principal_name,display_name,hire_date,termination_date\n\
                   E1,ada@example.com,Ada Lovelace,2026-03-10,\n\
                   E2,alan@example.com,Alan Turing,2019-06-01,2026-02-27\n";
        let workers = parse_workers_csv(csv.as_bytes()).unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].termination_date, None);
        assert_eq!(workers[1].termination_date, Some(date(2026, 2, 27)));

        let bad = "employee_id,user_principal_name,display_name,hire_date,termination_date\n\
                   E1,ada@example.com,Ada,March 10th,\n";
        let err = parse_workers_csv(bad.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_onboard_creates_disabled_then_reuses() {
        let directory = InMemoryDirectory::new();
        let w = worker(date(2026, 3, 10), None);

        let first = onboard(&directory, &w).await.unwrap();
        let second = onboard(&directory, &w).await.unwrap();

        assert_eq!(first.outcome, Outcome::Created);
        assert_eq!(second.outcome, Outcome::Reused);
        let user = directory.user("ada@example.com").await.unwrap();
        assert!(!user.account_enabled);
        assert_eq!(user.employee_id.as_deref(), Some("E100"));
    }

    #[tokio::test]
    async fn test_offboard_requires_confirmation() {
        let directory = InMemoryDirectory::new();
        directory.seed_user("ada@example.com", true).await;
        let w = worker(date(2020, 1, 1), Some(date(2026, 2, 1)));

        let declined = offboard(&directory, &AutoDecline, &w).await.unwrap();
        assert_eq!(declined.outcome, Outcome::Skipped);
        assert!(directory.user("ada@example.com").await.unwrap().account_enabled);

        let approved = offboard(&directory, &AutoApprove, &w).await.unwrap();
        assert_eq!(approved.outcome, Outcome::Updated);
        assert!(!directory.user("ada@example.com").await.unwrap().account_enabled);

        let again = offboard(&directory, &AutoApprove, &w).await.unwrap();
        assert_eq!(again.outcome, Outcome::Reused);
        assert_eq!(directory.stats().await.users, 1);
    }

    #[tokio::test]
    async fn test_offboard_unknown_user_is_skipped() {
        let directory = InMemoryDirectory::new();
        let w = worker(date(2020, 1, 1), Some(date(2026, 2, 1)));
        let result = offboard(&directory, &AutoApprove, &w).await.unwrap();
        assert_eq!(result.outcome, Outcome::Skipped);
        assert!(result.user.is_none());
    }
}
