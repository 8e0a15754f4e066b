use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};
use crate::object::Database;

/// name of the repository directory inside a worktree
pub const REPO_DIR: &str = ".zeta";

/// default branch pointed at by HEAD after init
pub const DEFAULT_BRANCH: &str = "refs/heads/main";

/// a zeta repository
///
/// owns the object database; reference operations live in [`crate::refs`]
/// and take the repository by reference.
pub struct Repo {
    zeta_dir: PathBuf,
    worktree: Option<PathBuf>,
    config: Config,
    db: Database,
}

impl Repo {
    /// initialize a new repository under `<worktree>/.zeta`
    pub fn init(worktree: &Path) -> Result<Self> {
        let zeta_dir = worktree.join(REPO_DIR);
        if zeta_dir.join("HEAD").exists() {
            return Err(Error::RepoExists(zeta_dir));
        }

        create_layout(&zeta_dir)?;

        let config = Config::default();
        config.save(&zeta_dir.join("config.toml"))?;

        fs::write(zeta_dir.join("HEAD"), format!("ref: {}\n", DEFAULT_BRANCH))
            .with_path(zeta_dir.join("HEAD"))?;

        Self::open_at(zeta_dir, Some(worktree.to_path_buf()), None)
    }

    /// initialize a bare repository at the given directory
    pub fn init_bare(zeta_dir: &Path) -> Result<Self> {
        if zeta_dir.join("HEAD").exists() {
            return Err(Error::RepoExists(zeta_dir.to_path_buf()));
        }

        create_layout(zeta_dir)?;

        let config = Config::default();
        config.save(&zeta_dir.join("config.toml"))?;

        fs::write(zeta_dir.join("HEAD"), format!("ref: {}\n", DEFAULT_BRANCH))
            .with_path(zeta_dir.join("HEAD"))?;

        Self::open_at(zeta_dir.to_path_buf(), None, None)
    }

    /// open an existing repository; `path` may be the worktree or the
    /// repository directory itself
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_system_config(path, None)
    }

    /// open with an optional system-wide config file overlay (resolved
    /// by the caller, typically from ZETA_CONFIG_PATH)
    pub fn open_with_system_config(path: &Path, system_config: Option<&Path>) -> Result<Self> {
        let dotted = path.join(REPO_DIR);
        if is_repo_dir(&dotted) {
            return Self::open_at(dotted, Some(path.to_path_buf()), system_config);
        }
        if is_repo_dir(path) {
            return Self::open_at(path.to_path_buf(), None, system_config);
        }
        Err(Error::NoRepo(path.to_path_buf()))
    }

    /// walk up from `start` until a repository is found
    pub fn discover(start: &Path) -> Result<Self> {
        let mut current = Some(start);
        while let Some(dir) = current {
            if is_repo_dir(&dir.join(REPO_DIR)) || is_repo_dir(dir) {
                return Self::open(dir);
            }
            current = dir.parent();
        }
        Err(Error::NoRepo(start.to_path_buf()))
    }

    fn open_at(
        zeta_dir: PathBuf,
        worktree: Option<PathBuf>,
        system_config: Option<&Path>,
    ) -> Result<Self> {
        let config = Config::load(&zeta_dir.join("config.toml"), system_config)?;
        let db = Database::new(
            zeta_dir.join("objects"),
            zeta_dir.join("metadata"),
            zeta_dir.join("incoming"),
            &config,
        );

        Ok(Self {
            zeta_dir,
            worktree,
            config,
            db,
        })
    }

    /// repository directory (the `.zeta` dir for non-bare repos)
    pub fn path(&self) -> &Path {
        &self.zeta_dir
    }

    /// worktree root, if this repository has one
    pub fn worktree(&self) -> Option<&Path> {
        self.worktree.as_deref()
    }

    /// worktree root or a precondition error for bare repositories
    pub fn require_worktree(&self) -> Result<&Path> {
        self.worktree
            .as_deref()
            .ok_or_else(|| Error::NotAFile(self.zeta_dir.clone()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// object database facade
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config_path(&self) -> PathBuf {
        self.zeta_dir.join("config.toml")
    }

    pub fn objects_path(&self) -> PathBuf {
        self.zeta_dir.join("objects")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.zeta_dir.join("metadata")
    }

    pub fn refs_path(&self) -> PathBuf {
        self.zeta_dir.join("refs")
    }

    pub fn packed_refs_path(&self) -> PathBuf {
        self.zeta_dir.join("packed-refs")
    }

    pub fn head_path(&self) -> PathBuf {
        self.zeta_dir.join("HEAD")
    }

    pub fn index_path(&self) -> PathBuf {
        self.zeta_dir.join("index")
    }

    pub fn logs_path(&self) -> PathBuf {
        self.zeta_dir.join("logs")
    }

    /// staging directory for atomic object writes
    pub fn incoming_path(&self) -> PathBuf {
        self.zeta_dir.join("incoming")
    }
}

fn is_repo_dir(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir()
}

fn create_layout(zeta_dir: &Path) -> Result<()> {
    for sub in [
        "objects",
        "metadata",
        "refs/heads",
        "refs/tags",
        "refs/remotes",
        "incoming",
        "logs",
    ] {
        let dir = zeta_dir.join(sub);
        fs::create_dir_all(&dir).with_path(&dir)?;
    }
    Ok(())
}
