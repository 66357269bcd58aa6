//! Repository preparation
//!
//! Builds the shell commands that bring `<builds_dir>/project-<id>` to the
//! requested reference. Git runs as ordinary shell commands through the
//! process runner; nothing here touches a repository directly.

use keel_core::domain::job::Job;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Setup commands for one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPlan {
    /// The project directory must be wiped and recreated before running
    pub fresh_clone: bool,
    pub commands: Vec<String>,
}

pub struct RepositoryPreparer {
    builds_dir: PathBuf,
}

impl RepositoryPreparer {
    /// Relative builds directories are resolved against the current directory
    pub fn new(builds_dir: impl Into<PathBuf>) -> Self {
        let builds_dir = builds_dir.into();
        Self {
            builds_dir: std::path::absolute(&builds_dir).unwrap_or(builds_dir),
        }
    }

    pub fn builds_dir(&self) -> &Path {
        &self.builds_dir
    }

    pub fn project_dir(&self, job: &Job) -> PathBuf {
        self.builds_dir.join(job.project_dir_name())
    }

    /// A checkout exists when the project directory holds a `.git` entry
    pub fn repo_exists(&self, job: &Job) -> bool {
        self.project_dir(job).join(".git").exists()
    }

    /// Chooses between fetch and clone based on the current checkout
    pub fn plan(&self, job: &Job) -> SetupPlan {
        self.setup_commands(job, self.repo_exists(job))
    }

    pub fn setup_commands(&self, job: &Job, repo_exists: bool) -> SetupPlan {
        let fresh_clone = !(repo_exists && job.opts.allow_git_fetch);
        let first = if fresh_clone {
            self.clone_cmd(job)
        } else {
            self.fetch_cmd(job)
        };

        debug!(
            "Setup for job {}: {}",
            job.id,
            if fresh_clone { "clone" } else { "fetch" }
        );

        SetupPlan {
            fresh_clone,
            commands: vec![first, self.checkout_cmd(job)],
        }
    }

    /// Removes any previous checkout and recreates an empty project directory
    pub fn reset_project_dir(&self, job: &Job) -> std::io::Result<()> {
        let dir = self.project_dir(job);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        std::fs::create_dir_all(&dir)
    }

    pub fn clone_cmd(&self, job: &Job) -> String {
        let name = quote(&job.project_dir_name());
        [
            format!("cd {}", quote_path(&self.builds_dir)),
            format!("git clone {} {}", quote(&job.repo_url), name),
            format!("cd {}", name),
            format!("git checkout {}", quote(&job.git_ref)),
        ]
        .join(" && ")
    }

    pub fn fetch_cmd(&self, job: &Job) -> String {
        [
            format!("cd {}", quote_path(&self.project_dir(job))),
            "git reset --hard".to_string(),
            "git clean -fdx".to_string(),
            format!("git remote set-url origin {}", quote(&job.repo_url)),
            "git fetch origin".to_string(),
        ]
        .join(" && ")
    }

    pub fn checkout_cmd(&self, job: &Job) -> String {
        [
            format!("cd {}", quote_path(&self.project_dir(job))),
            "git reset --hard".to_string(),
            format!("git checkout {}", quote(&job.git_ref)),
        ]
        .join(" && ")
    }
}

/// Quotes a word for the shell unless it only holds characters that need no quoting
fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            9312,
            4,
            "https://example.com/six.git",
            "2e008a7",
            vec!["bundle".into()],
        )
    }

    #[test]
    fn test_clone_sequence() {
        let preparer = RepositoryPreparer::new("/builds");
        let plan = preparer.setup_commands(&job(), false);

        assert!(plan.fresh_clone);
        assert_eq!(
            plan.commands,
            vec![
                "cd /builds && git clone https://example.com/six.git project-4 && cd project-4 && git checkout 2e008a7",
                "cd /builds/project-4 && git reset --hard && git checkout 2e008a7",
            ]
        );
    }

    #[test]
    fn test_fetch_sequence() {
        let preparer = RepositoryPreparer::new("/builds");
        let plan = preparer.setup_commands(&job().with_git_fetch(), true);

        assert!(!plan.fresh_clone);
        assert_eq!(
            plan.commands[0],
            "cd /builds/project-4 && git reset --hard && git clean -fdx && git remote set-url origin https://example.com/six.git && git fetch origin"
        );
        assert_eq!(
            plan.commands[1],
            "cd /builds/project-4 && git reset --hard && git checkout 2e008a7"
        );
    }

    #[test]
    fn test_existing_checkout_without_fetch_permission_reclones() {
        let preparer = RepositoryPreparer::new("/builds");
        let plan = preparer.setup_commands(&job(), true);
        assert!(plan.fresh_clone);
        assert!(plan.commands[0].contains("git clone"));
    }

    #[test]
    fn test_plan_is_fetch_while_git_dir_exists() {
        let builds = tempfile::tempdir().unwrap();
        let preparer = RepositoryPreparer::new(builds.path());
        let job = job().with_git_fetch();

        assert!(preparer.plan(&job).fresh_clone);

        std::fs::create_dir_all(preparer.project_dir(&job).join(".git")).unwrap();
        for _ in 0..2 {
            let plan = preparer.plan(&job);
            assert!(!plan.fresh_clone);
            assert!(plan.commands[0].ends_with("git fetch origin"));
            assert!(plan.commands.iter().all(|c| !c.contains("git clone")));
        }
    }

    #[test]
    fn test_setup_commands_quote_unsafe_words() {
        let preparer = RepositoryPreparer::new("/srv/ci builds");
        let mut job = job();
        job.git_ref = "it's".to_string();
        let plan = preparer.setup_commands(&job, false);

        assert_eq!(
            plan.commands[0],
            "cd '/srv/ci builds' && git clone https://example.com/six.git project-4 && cd project-4 && git checkout 'it'\\''s'"
        );
        assert!(plan.commands[1].starts_with("cd '/srv/ci builds/project-4' && "));
    }

    #[tokio::test]
    async fn test_quoted_builds_dir_is_usable_by_the_shell() {
        let root = tempfile::tempdir().unwrap();
        let builds = root.path().join("with space");
        std::fs::create_dir_all(&builds).unwrap();
        let preparer = RepositoryPreparer::new(&builds);
        let job = job();
        preparer.reset_project_dir(&job).unwrap();

        let command = format!("cd {} && pwd", quote_path(&preparer.project_dir(&job)));
        let output = tokio::process::Command::new("bash")
            .args(["-c", &command])
            .output()
            .await
            .unwrap();

        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("with space/project-4"));
    }

    #[test]
    fn test_relative_builds_dir_is_resolved() {
        let preparer = RepositoryPreparer::new("builds");
        assert!(preparer.builds_dir().is_absolute());
        assert!(preparer.builds_dir().ends_with("builds"));
        assert!(preparer.clone_cmd(&job()).starts_with("cd /"));
    }

    #[test]
    fn test_reset_project_dir() {
        let builds = tempfile::tempdir().unwrap();
        let preparer = RepositoryPreparer::new(builds.path());
        let job = job();
        let dir = preparer.project_dir(&job);

        preparer.reset_project_dir(&job).unwrap();
        assert!(dir.is_dir());

        std::fs::write(dir.join("stale"), b"x").unwrap();
        preparer.reset_project_dir(&job).unwrap();
        assert!(dir.is_dir());
        assert!(!dir.join("stale").exists());
    }
}
