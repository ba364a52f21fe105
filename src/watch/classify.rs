//! Branch classifier: is a PR head branch a test target, excluded, or
//! merely ignored?

/// The one branch name whose PRs are eligible for automated testing.
/// Fixed by convention, not configurable per subscription.
pub const TARGET_BRANCH: &str = "preview";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchClass {
    /// Eligible for automated testing.
    Target,
    /// Matched an exclude pattern; drops out of detection entirely.
    Excluded,
    /// Neither target nor excluded.
    Ignored,
}

/// Classify a head branch against a subscription's exclude patterns.
///
/// A pattern excludes the branch on exact match, or -- when it ends in
/// `*` -- on prefix match of its literal part. Exclusion is checked before
/// target matching, so an explicit exclude always wins over the target rule.
pub fn classify(head_branch: &str, exclude_patterns: &[String]) -> BranchClass {
    for pattern in exclude_patterns {
        if let Some(prefix) = pattern.strip_suffix('*') {
            if head_branch.starts_with(prefix) {
                return BranchClass::Excluded;
            }
        } else if head_branch == pattern {
            return BranchClass::Excluded;
        }
    }

    if head_branch == TARGET_BRANCH {
        BranchClass::Target
    } else {
        BranchClass::Ignored
    }
}
