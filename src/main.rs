//! zeta CLI - thin command-line surface over the engine

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};

use zeta::ops::{self, ConflictStyle, MergeOptions, ResetMode};
use zeta::traverse::{PreorderWalk, TimeWalk, TopoWalk, Walker};
use zeta::types::Signature;
use zeta::{refs, Cancel, Repo, SYSTEM_CONFIG_ENV};

#[derive(Parser)]
#[command(name = "zeta")]
#[command(about = "version control for repositories with very large blobs")]
#[command(version)]
struct Cli {
    /// repository path
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new repository
    Init {
        /// worktree to create the repository in
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// show staged, unstaged and untracked changes
    Status,

    /// stage files or directories
    Add {
        paths: Vec<String>,
    },

    /// unstage paths, optionally keeping them on disk
    Rm {
        paths: Vec<String>,

        /// remove from the index only
        #[arg(long)]
        cached: bool,
    },

    /// rename a tracked path
    Mv {
        from: String,
        to: String,
    },

    /// record the index as a commit
    Commit {
        /// commit message
        #[arg(short, long)]
        message: String,

        /// author as "Name <email>"
        #[arg(short, long)]
        author: Option<String>,
    },

    /// show commit history
    Log {
        /// ref or hash to start from
        #[arg(default_value = "HEAD")]
        rev: String,

        /// maximum number of commits to show
        #[arg(short = 'n', long)]
        max_count: Option<usize>,

        /// order: time, topo or preorder
        #[arg(long, default_value = "time")]
        order: String,
    },

    /// list references, or create a branch at HEAD
    Branch {
        /// branch name to create
        name: Option<String>,
    },

    /// check out a commit's tree into the worktree
    Checkout {
        rev: String,

        /// overwrite local modifications
        #[arg(short, long)]
        force: bool,
    },

    /// move HEAD, and per mode the index and worktree
    Reset {
        rev: String,

        /// soft, mixed, hard or merge
        #[arg(long, default_value = "mixed")]
        mode: String,
    },

    /// three-way merge another revision into HEAD
    Merge {
        rev: String,

        /// conflict style: merge, diff3 or zdiff3
        #[arg(long)]
        style: Option<String>,

        /// allow merging unrelated histories
        #[arg(long)]
        allow_unrelated: bool,

        /// commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// delete untracked files
    Clean {
        /// also delete ignored files
        #[arg(short = 'x', long)]
        ignored: bool,

        /// report without deleting
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// stash the working set, or pop it back
    Stash {
        /// "push" (default) or "pop"
        #[arg(default_value = "push")]
        action: String,

        /// stash message
        #[arg(short, long, default_value = "WIP")]
        message: String,
    },

    /// print an object's decoded form
    CatFile {
        /// hash, prefix or ref
        rev: String,
    },

    /// resolve a revision to a hash
    RevParse {
        rev: String,

        /// print the short display form
        #[arg(long)]
        short: bool,
    },

    /// remove unreachable objects and compact references
    Gc {
        /// only prune objects older than this many seconds
        #[arg(long, default_value_t = 0)]
        grace: u64,
    },

    /// consolidate loose references into packed-refs
    PackRefs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn open_repo(path: &PathBuf) -> zeta::Result<Repo> {
    let system = std::env::var_os(SYSTEM_CONFIG_ENV).map(PathBuf::from);
    Repo::open_with_system_config(path, system.as_deref())
}

fn signature(author: Option<&str>) -> Signature {
    let when = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    match author.and_then(|a| {
        let open = a.find('<')?;
        let close = a.find('>')?;
        Some((a[..open].trim().to_string(), a[open + 1..close].to_string()))
    }) {
        Some((name, email)) => Signature { name, email, when, offset: "+0000".into() },
        None => {
            let user = std::env::var("USER").unwrap_or_else(|_| "you".to_string());
            Signature::new(user.clone(), format!("{}@localhost", user), when)
        }
    }
}

fn run(cli: Cli) -> zeta::Result<()> {
    let ctx = Cancel::new();

    match cli.command {
        Commands::Init { path } => {
            Repo::init(&path)?;
            println!("initialized zeta repository at {}", path.display());
        }

        Commands::Status => {
            let repo = open_repo(&cli.repo)?;
            let st = ops::status(&repo, &ctx)?;
            for change in &st.staged {
                let kind = if change.is_insert() {
                    "A"
                } else if change.is_delete() {
                    "D"
                } else {
                    "M"
                };
                println!("{}  {}", kind, change.path());
            }
            for change in &st.unstaged {
                let kind = if change.is_delete() { "D" } else { "M" };
                println!(" {} {}", kind, change.path());
            }
            for path in &st.untracked {
                println!("?? {}", path);
            }
        }

        Commands::Add { paths } => {
            let repo = open_repo(&cli.repo)?;
            let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            ops::add(&repo, &refs, &ctx)?;
        }

        Commands::Rm { paths, cached } => {
            let repo = open_repo(&cli.repo)?;
            let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            ops::rm(&repo, &refs, cached, &ctx)?;
        }

        Commands::Mv { from, to } => {
            let repo = open_repo(&cli.repo)?;
            ops::mv(&repo, &from, &to, &ctx)?;
        }

        Commands::Commit { message, author } => {
            let repo = open_repo(&cli.repo)?;
            let sig = signature(author.as_deref());
            let hash = ops::commit_index(&repo, &message, sig.clone(), sig)?;
            println!("{}", hash);
        }

        Commands::Log {
            rev,
            max_count,
            order,
        } => {
            let repo = open_repo(&cli.repo)?;
            let start = refs::rev_parse(&repo, &rev)?;
            let db = repo.db();

            let mut walk: Box<dyn Walker + '_> = match order.as_str() {
                "topo" => Box::new(TopoWalk::new(db, start, Default::default(), &[])),
                "preorder" => Box::new(PreorderWalk::new(db, start, Default::default(), &[])),
                _ => Box::new(TimeWalk::committer_time(db, start, Default::default(), &[])),
            };

            let mut shown = 0usize;
            while let Some(c) = walk.next(&ctx)? {
                if max_count.is_some_and(|n| shown >= n) {
                    break;
                }
                println!("commit {}", c.hash);
                println!("Author: {} <{}>", c.commit.author.name, c.commit.author.email);
                println!("Date:   {} {}", c.commit.committer.when, c.commit.committer.offset);
                println!();
                for line in c.commit.message.lines() {
                    println!("    {}", line);
                }
                println!();
                shown += 1;
            }
        }

        Commands::Branch { name } => {
            let repo = open_repo(&cli.repo)?;
            match name {
                Some(name) => {
                    let head = refs::resolve(&repo, refs::HEAD)?;
                    refs::update(&repo, &format!("refs/heads/{}", name), None, &head)?;
                }
                None => {
                    for r in refs::references(&repo)? {
                        match r.hash() {
                            Some(h) => println!("{} {}", h, r.name),
                            None => println!("{:>64} {}", "->", r.name),
                        }
                    }
                }
            }
        }

        Commands::Checkout { rev, force } => {
            let repo = open_repo(&cli.repo)?;
            let start = refs::rev_parse(&repo, &rev)?;
            let (tree, hash) = {
                let (commit, _) = repo.db().parse_rev_exhaustive(&start)?;
                (commit.tree, commit.hash)
            };
            ops::checkout_tree(&repo, tree, force, &ctx)?;

            let branch = format!("refs/heads/{}", rev);
            if refs::exists(&repo, &branch) {
                refs::set_head(&repo, refs::RefValue::Symbolic(branch))?;
            } else {
                refs::set_head(&repo, refs::RefValue::Hash(hash))?;
            }
        }

        Commands::Reset { rev, mode } => {
            let repo = open_repo(&cli.repo)?;
            let commit = refs::rev_parse(&repo, &rev)?;
            let mode = match mode.as_str() {
                "soft" => ResetMode::Soft,
                "hard" => ResetMode::Hard,
                "merge" => ResetMode::Merge,
                _ => ResetMode::Mixed,
            };
            ops::reset(&repo, commit, mode, &ctx)?;
        }

        Commands::Merge {
            rev,
            style,
            allow_unrelated,
            message,
        } => {
            let repo = open_repo(&cli.repo)?;
            let ours = refs::resolve(&repo, refs::HEAD)?;
            let theirs = refs::rev_parse(&repo, &rev)?;

            let style_name = style.unwrap_or_else(|| repo.config().merge.conflict_style.clone());
            let opts = MergeOptions {
                style: ConflictStyle::from_name(&style_name).unwrap_or(ConflictStyle::Merge),
                allow_unrelated,
                ours_label: "HEAD".to_string(),
                theirs_label: rev.clone(),
            };

            let outcome = ops::merge_commits(repo.db(), ours, theirs, &opts, &ctx)?;
            if outcome.is_clean() {
                let sig = signature(None);
                let msg = message.unwrap_or_else(|| format!("merge {}", rev));
                let commit = zeta::types::Commit::new(
                    outcome.tree,
                    vec![ours, theirs],
                    sig.clone(),
                    sig,
                    msg,
                );
                let hash = repo.db().write_commit(&commit)?;
                ops::checkout_tree(&repo, outcome.tree, false, &ctx)?;
                ops::update_head(&repo, hash)?;
                println!("{}", hash);
            } else {
                // conflicted tree goes into the worktree for fixing up
                ops::checkout_tree(&repo, outcome.tree, false, &ctx)?;
                for conflict in &outcome.conflicts {
                    eprintln!("conflict: {}", conflict.path);
                }
                eprintln!("{} conflicts, resolve and commit", outcome.conflicts.len());
            }
        }

        Commands::Clean { ignored, dry_run } => {
            let repo = open_repo(&cli.repo)?;
            for path in ops::clean(&repo, ignored, dry_run, &ctx)? {
                println!("{}", path);
            }
        }

        Commands::Stash { action, message } => {
            let repo = open_repo(&cli.repo)?;
            match action.as_str() {
                "pop" => {
                    ops::stash_pop(&repo, &ctx)?;
                }
                _ => match ops::stash_push(&repo, &message, signature(None), &ctx)? {
                    Some(hash) => println!("{}", hash),
                    None => println!("nothing to stash"),
                },
            }
        }

        Commands::CatFile { rev } => {
            let repo = open_repo(&cli.repo)?;
            let hash = refs::rev_parse(&repo, &rev)
                .or_else(|_| repo.db().search(&rev))?;

            match repo.db().object(&hash) {
                Ok(object) => print_object(&object),
                Err(e) if e.is_not_found() => {
                    // not metadata: stream the blob payload
                    let mut reader = repo.db().blob(&hash)?;
                    let mut content = Vec::new();
                    reader.read_to_end(&mut content).map_err(|e| {
                        zeta::Error::Io { path: "<blob>".into(), source: e }
                    })?;
                    use std::io::Write;
                    std::io::stdout().write_all(&content).ok();
                }
                Err(e) => return Err(e),
            }
        }

        Commands::RevParse { rev, short } => {
            let repo = open_repo(&cli.repo)?;
            let hash = refs::rev_parse(&repo, &rev)?;
            if short {
                println!("{}", hash.short_hex());
            } else {
                println!("{}", hash);
            }
        }

        Commands::Gc { grace } => {
            let repo = open_repo(&cli.repo)?;
            let cutoff = SystemTime::now() - std::time::Duration::from_secs(grace);
            let stats = ops::prune(&repo, cutoff, &ctx)?;
            println!(
                "removed {} blobs, {} metadata objects, {} bytes",
                stats.blobs_removed, stats.metadata_removed, stats.bytes_freed
            );
        }

        Commands::PackRefs => {
            let repo = open_repo(&cli.repo)?;
            refs::pack_refs(&repo)?;
        }
    }

    Ok(())
}

fn print_object(object: &zeta::types::Object) {
    use zeta::types::Object;
    match object {
        Object::Commit(c) => {
            println!("tree {}", c.tree);
            for p in &c.parents {
                println!("parent {}", p);
            }
            println!("author {}", c.author);
            println!("committer {}", c.committer);
            println!();
            println!("{}", c.message);
        }
        Object::Tree(t) => {
            for e in t.entries() {
                println!("{} {} {}\t{}", e.mode, e.size, e.hash, e.name);
            }
        }
        Object::Fragments(f) => {
            println!("size {}", f.size);
            println!("origin {}", f.origin);
            for e in &f.entries {
                println!("{:>8} {:>16} {}", e.index, e.size, e.hash);
            }
        }
        Object::Tag(t) => {
            println!("object {}", t.object);
            println!("type {}", t.target_kind.name());
            println!("tag {}", t.name);
            println!("tagger {}", t.tagger);
            println!();
            println!("{}", t.content);
        }
    }
}
