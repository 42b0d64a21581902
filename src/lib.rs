//! feedsync downloads a threat-intelligence CSV feed, stores it as a
//! timestamped file under the repository's `feeds/` directory and commits
//! and pushes it with git.
//!
//! A run is strictly sequential; see [`pipeline::run`]. Scheduling is left
//! to whatever invokes the binary (cron, a systemd timer, a CI schedule).

pub mod config;
pub mod feed;
pub mod pipeline;
pub mod storage;
pub mod vcs;
