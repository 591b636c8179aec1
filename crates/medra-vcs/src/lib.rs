// Medra VCS
// Narrow adapters over the git CLI and the GitHub REST API. The engine
// talks to version control exclusively through the traits defined here.

pub mod branch;
pub mod forge;
pub mod git;

pub use branch::{generate_branch_name, RepoRef};
pub use forge::{CiStatus, Forge, GitHubForge, PullRequest, WorkflowRun};
pub use git::{GitCli, GitOps};
