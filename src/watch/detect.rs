//! PR change-set detector.
//!
//! Given a subscription and the repository's open PRs, split them into the
//! set to test now and the set on non-target branches. A wall-clock
//! watermark alone would silently drop PRs if a cycle failed between
//! detection and watermark advancement, so a target PR with no run record
//! at all is always picked up regardless of the watermark.

use crate::github::PullRequest;
use crate::storage::Subscription;
use std::collections::HashSet;

use super::classify::{classify, BranchClass};

#[derive(Debug, Default, PartialEq)]
pub struct ChangeSet {
    /// Target-branch PRs that need a run dispatched.
    pub to_test: Vec<PullRequest>,
    /// Open PRs on branches that are neither target nor excluded.
    pub non_target: Vec<PullRequest>,
}

/// Decide which open PRs to test for one subscription.
///
/// - Excluded branches appear in neither list.
/// - On the first poll (no watermark) the whole target backlog is tested.
/// - Afterwards a target PR is tested when it was updated after the
///   watermark (re-test on update is intentional) OR when it has no run
///   record at all.
pub fn detect(
    subscription: &Subscription,
    open_prs: &[PullRequest],
    existing_run_prs: &HashSet<i64>,
) -> ChangeSet {
    let mut change_set = ChangeSet::default();

    for pr in open_prs {
        match classify(&pr.head_branch, &subscription.exclude_branches) {
            BranchClass::Excluded => continue,
            BranchClass::Ignored => change_set.non_target.push(pr.clone()),
            BranchClass::Target => {
                let selected = match subscription.last_polled_at {
                    None => true,
                    Some(watermark) => {
                        let updated_after = pr.updated_at.is_some_and(|u| u > watermark);
                        updated_after || !existing_run_prs.contains(&pr.number)
                    }
                };
                if selected {
                    change_set.to_test.push(pr.clone());
                }
            }
        }
    }

    change_set
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sub(watermark: Option<chrono::DateTime<Utc>>) -> Subscription {
        Subscription {
            id: 1,
            user_id: "default".into(),
            owner: "acme".into(),
            repo: "shop".into(),
            repo_full_name: "acme/shop".into(),
            active: true,
            auto_test: true,
            notify: true,
            exclude_branches: vec!["main".into()],
            test_options: None,
            base_domain: None,
            credential_ref: None,
            last_polled_at: watermark,
        }
    }

    fn pr(number: i64, branch: &str, updated_at: Option<chrono::DateTime<Utc>>) -> PullRequest {
        PullRequest {
            number,
            title: format!("PR {number}"),
            head_branch: branch.into(),
            url: format!("https://github.com/acme/shop/pull/{number}"),
            created_at: updated_at,
            updated_at,
        }
    }

    fn numbers(prs: &[PullRequest]) -> Vec<i64> {
        prs.iter().map(|p| p.number).collect()
    }

    #[test]
    fn first_poll_tests_full_backlog() {
        let now = Utc::now();
        let open = vec![
            pr(10, "preview", Some(now)),
            pr(11, "main", Some(now)),
            pr(12, "feature-x", Some(now)),
        ];

        let cs = detect(&sub(None), &open, &HashSet::new());
        assert_eq!(numbers(&cs.to_test), vec![10]);
        assert_eq!(numbers(&cs.non_target), vec![12]);
        // #11 is excluded: appears in neither list
    }

    #[test]
    fn updated_after_watermark_is_retested_even_with_run_record() {
        let watermark = Utc::now() - Duration::hours(1);
        let open = vec![pr(10, "preview", Some(Utc::now()))];
        let existing = HashSet::from([10]);

        let cs = detect(&sub(Some(watermark)), &open, &existing);
        assert_eq!(numbers(&cs.to_test), vec![10]);
    }

    #[test]
    fn stale_pr_without_run_record_is_still_picked_up() {
        let watermark = Utc::now();
        let stale = watermark - Duration::hours(3);
        let open = vec![pr(10, "preview", Some(stale))];

        let cs = detect(&sub(Some(watermark)), &open, &HashSet::new());
        assert_eq!(numbers(&cs.to_test), vec![10]);
    }

    #[test]
    fn stale_pr_with_run_record_is_skipped() {
        let watermark = Utc::now();
        let stale = watermark - Duration::hours(3);
        let open = vec![pr(10, "preview", Some(stale))];
        let existing = HashSet::from([10]);

        let cs = detect(&sub(Some(watermark)), &open, &existing);
        assert!(cs.to_test.is_empty());
        assert!(cs.non_target.is_empty());
    }

    #[test]
    fn missing_updated_at_falls_back_to_run_record_check() {
        let watermark = Utc::now();
        let open = vec![pr(10, "preview", None), pr(11, "preview", None)];
        let existing = HashSet::from([11]);

        let cs = detect(&sub(Some(watermark)), &open, &existing);
        assert_eq!(numbers(&cs.to_test), vec![10]);
    }

    #[test]
    fn excluded_wildcard_branches_vanish() {
        let mut subscription = sub(None);
        subscription.exclude_branches = vec!["preview".into(), "hotfix/*".into()];
        let open = vec![
            pr(1, "preview", Some(Utc::now())),
            pr(2, "hotfix/login", Some(Utc::now())),
            pr(3, "feature-y", Some(Utc::now())),
        ];

        let cs = detect(&subscription, &open, &HashSet::new());
        assert!(cs.to_test.is_empty());
        assert_eq!(numbers(&cs.non_target), vec![3]);
    }
}
