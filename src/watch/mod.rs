//! PR watching -- branch classification, change detection, polling driver.

pub mod classify;
pub mod detect;
pub mod driver;

pub use self::classify::{classify, BranchClass, TARGET_BRANCH};
pub use self::detect::{detect, ChangeSet};
pub use self::driver::{run_poll_loop, Poller, RepoApiFactory};
