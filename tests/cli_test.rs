//! End-to-end tests: build a scratch git repository with known history and
//! run the real binary against it.
//!
//! Each test gets its own temp repo and its own cache root so runs never
//! interfere. All tests skip quietly when git isn't installed.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

const BOB: (&str, &str) = ("Bob", "bob@mail.com");
const JIM: (&str, &str) = ("Jim", "jim@mail.com");

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("git not installed; skipping");
            return;
        }
    };
}

/// A scratch repository plus an isolated cache root.
struct Fixture {
    repo: TempDir,
    cache_home: TempDir,
    commit_no: i64,
}

impl Fixture {
    fn new() -> Fixture {
        let fixture = Fixture {
            repo: tempfile::tempdir().expect("create repo dir"),
            cache_home: tempfile::tempdir().expect("create cache dir"),
            commit_no: 0,
        };
        fixture.git(&["init", "-q", "-b", "main"]);
        fixture.git(&["config", "user.name", "Test"]);
        fixture.git(&["config", "user.email", "test@example.com"]);
        fixture
    }

    fn path(&self) -> &Path {
        self.repo.path()
    }

    fn git(&self, args: &[&str]) {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .output()
            .expect("run git");
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, content).expect("write file");
    }

    fn commit_all(&mut self, message: &str, author: (&str, &str)) {
        self.commit_no += 1;
        // Spread commits a day apart, well in the past.
        let date = format!("2021-01-{:02}T12:00:00+00:00", self.commit_no);
        let out = Command::new("git")
            .args(["add", "-A"])
            .current_dir(self.path())
            .output()
            .expect("git add");
        assert!(out.status.success());

        let out = Command::new("git")
            .args(["commit", "-q", "--allow-empty", "-m", message])
            .current_dir(self.path())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_AUTHOR_NAME", author.0)
            .env("GIT_AUTHOR_EMAIL", author.1)
            .env("GIT_COMMITTER_NAME", author.0)
            .env("GIT_COMMITTER_EMAIL", author.1)
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date)
            .output()
            .expect("git commit");
        assert!(
            out.status.success(),
            "git commit failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    }

    fn ledger(&self, args: &[&str]) -> (String, String, i32) {
        let out = Command::new(env!("CARGO_BIN_EXE_git-ledger"))
            .args(args)
            .current_dir(self.path())
            .env("XDG_CACHE_HOME", self.cache_home.path())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .output()
            .expect("run git-ledger");
        (
            String::from_utf8_lossy(&out.stdout).into_owned(),
            String::from_utf8_lossy(&out.stderr).into_owned(),
            out.status.code().unwrap_or(-1),
        )
    }

    fn cache_files(&self) -> Vec<PathBuf> {
        let root = self.cache_home.path().join("git-ledger");
        let mut files = Vec::new();
        if let Ok(dirs) = std::fs::read_dir(root) {
            for dir in dirs.flatten() {
                if let Ok(entries) = std::fs::read_dir(dir.path()) {
                    files.extend(entries.flatten().map(|e| e.path()));
                }
            }
        }
        files
    }
}

fn two_author_fixture() -> Fixture {
    let mut f = Fixture::new();
    f.write("bim.txt", "one\ntwo\nthree\nfour\n");
    f.write("vim.txt", "a\nb\nc\nd\ne\nf\ng\nh\n");
    f.commit_all("bob adds files", BOB);
    f.write("bim.txt", "one\ntwo\nthree\nfour\nfive\nsix\nseven\n");
    f.commit_all("jim extends bim", JIM);
    f
}

#[test]
fn table_ranks_both_authors() {
    require_git!();
    let f = two_author_fixture();

    let (stdout, stderr, code) = f.ledger(&["table"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("Bob"), "missing Bob in:\n{stdout}");
    assert!(stdout.contains("Jim"), "missing Jim in:\n{stdout}");
    assert!(stdout.contains("Commits"), "missing header in:\n{stdout}");
}

#[test]
fn bare_invocation_defaults_to_table() {
    require_git!();
    let f = two_author_fixture();

    let (stdout, _, code) = f.ledger(&[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Author"));
}

#[test]
fn csv_reports_line_counts() {
    require_git!();
    let f = two_author_fixture();

    let (stdout, stderr, code) = f.ledger(&["table", "-l", "--csv", "-e"]);
    assert_eq!(code, 0, "stderr: {stderr}");

    let mut lines = stdout.lines();
    let header = lines.next().expect("csv header");
    assert_eq!(
        header,
        "name,email,commits,lines added,lines removed,files,last commit time,first commit time"
    );

    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 2);

    let bob = rows
        .iter()
        .find(|r| r.starts_with("Bob"))
        .expect("bob row");
    let cols: Vec<&str> = bob.split(',').collect();
    assert_eq!(cols[1], "bob@mail.com");
    assert_eq!(cols[2], "1"); // commits
    assert_eq!(cols[3], "12"); // lines added
    assert_eq!(cols[5], "2"); // files

    let jim = rows
        .iter()
        .find(|r| r.starts_with("Jim"))
        .expect("jim row");
    let cols: Vec<&str> = jim.split(',').collect();
    assert_eq!(cols[2], "1");
}

#[test]
fn limit_truncates_the_table() {
    require_git!();
    let f = two_author_fixture();

    let (stdout, _, code) = f.ledger(&["table", "--csv", "-n", "1"]);
    assert_eq!(code, 0);
    // Header plus exactly one author row.
    assert_eq!(stdout.lines().count(), 2);

    let (_, stderr, code) = f.ledger(&["table", "-n", "0"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("limit") || stderr.contains("zero"), "{stderr}");
}

#[test]
fn pathspec_limits_the_tally() {
    require_git!();
    let f = two_author_fixture();

    let (stdout, stderr, code) = f.ledger(&["table", "-l", "--csv", "--", "vim.txt"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("Bob"));
    // Jim only ever touched bim.txt.
    assert!(!stdout.contains("Jim"), "jim should be filtered:\n{stdout}");
}

#[test]
fn unsupported_pathspec_magic_is_an_error() {
    require_git!();
    let f = two_author_fixture();

    let (_, stderr, code) = f.ledger(&["table", "-l", "--", ":(top)foo"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("unsupported magic"), "{stderr}");
}

#[test]
fn tree_annotates_files_and_directories() {
    require_git!();
    let mut f = Fixture::new();
    f.write("src/main.rs", "fn main() {}\n");
    f.write("docs/guide.md", "# guide\n");
    f.commit_all("bob lays out the repo", BOB);
    f.write("src/main.rs", "fn main() { println!(\"hi\"); }\n");
    f.commit_all("jim edits main", JIM);

    let (stdout, stderr, code) = f.ledger(&["tree", "-l"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("src/"), "missing src dir:\n{stdout}");
    assert!(stdout.contains("main.rs"), "missing file:\n{stdout}");
    assert!(stdout.contains("Bob") || stdout.contains("Jim"));
}

#[test]
fn renamed_file_keeps_its_history_in_the_tree() {
    require_git!();
    let mut f = Fixture::new();
    f.write("old-name.txt", "line\nline\nline\n");
    f.commit_all("bob creates file", BOB);
    f.git(&["mv", "old-name.txt", "new-name.txt"]);
    f.commit_all("jim renames file", JIM);

    let (stdout, stderr, code) = f.ledger(&["tree", "-l", "-a"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("new-name.txt"), "{stdout}");

    // Two top-level entries (one hidden), so the root line is printed.
    assert!(
        stdout.lines().any(|l| l.starts_with("./")),
        "expected a root line:\n{stdout}"
    );

    // Without -a the vanished path stays hidden.
    let (stdout, _, _) = f.ledger(&["tree", "-l"]);
    assert!(!stdout.contains("old-name.txt"), "{stdout}");
}

#[test]
fn single_entry_chains_elide_through_the_root() {
    require_git!();
    let mut f = Fixture::new();
    f.write("only-file.txt", "just\nthis\none\n");
    f.commit_all("bob adds the only file", BOB);

    let (stdout, stderr, code) = f.ledger(&["tree", "-l"]);
    assert_eq!(code, 0, "stderr: {stderr}");

    // A single top-level entry collapses straight through the root: the
    // file appears unindented and no "./" line is printed.
    assert!(
        stdout.lines().any(|l| l.starts_with("only-file.txt")),
        "{stdout}"
    );
    assert!(!stdout.contains("./"), "root should be elided:\n{stdout}");
}

#[test]
fn hist_plots_buckets() {
    require_git!();
    let f = two_author_fixture();

    let (stdout, stderr, code) = f.ledger(&["hist", "--until", "2021-02-01"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("┤"), "missing plot axis:\n{stdout}");
    assert!(stdout.contains('#'), "missing bars:\n{stdout}");
}

#[test]
fn dump_prints_parsed_commits() {
    require_git!();
    let f = two_author_fixture();

    let (stdout, stderr, code) = f.ledger(&["dump"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert_eq!(
        stdout.lines().filter(|l| !l.starts_with("  ")).count(),
        2,
        "expected two commits:\n{stdout}"
    );
    assert!(stdout.contains("bim.txt"));
}

#[test]
fn second_run_hits_the_cache_and_agrees() {
    require_git!();
    let f = two_author_fixture();

    let (first, stderr, code) = f.ledger(&["table", "-l", "--csv", "-e"]);
    assert_eq!(code, 0, "stderr: {stderr}");

    // The diff query populated a compressed cache file. (The engine only
    // caches on the parallel path, so this needs more than one CPU.)
    let parallel = std::thread::available_parallelism().map_or(1, |n| n.get()) > 1;
    let files = f.cache_files();
    assert!(
        !parallel
            || files
                .iter()
                .any(|p| p.to_string_lossy().ends_with(".bin.gz")),
        "no cache file in {files:?}"
    );

    let (second, stderr, code) = f.ledger(&["table", "-l", "--csv", "-e"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert_eq!(first, second, "cached run must agree with cold run");
}

#[test]
fn disable_cache_env_is_honored() {
    require_git!();
    let f = two_author_fixture();

    let out = Command::new(env!("CARGO_BIN_EXE_git-ledger"))
        .args(["table", "-l", "--csv"])
        .current_dir(f.path())
        .env("XDG_CACHE_HOME", f.cache_home.path())
        .env("GIT_LEDGER_DISABLE_CACHE", "1")
        .output()
        .expect("run git-ledger");
    assert!(out.status.success());
    assert!(f.cache_files().is_empty(), "cache must stay untouched");
}

#[test]
fn mailmap_resolves_identities_and_invalidates_cache() {
    require_git!();
    let mut f = two_author_fixture();

    // Warm the cache with the unmapped identities.
    let (_, _, code) = f.ledger(&["table", "-l", "--csv"]);
    assert_eq!(code, 0);

    // Now fold Jim into Bob. The fingerprint changes, so the stale cache
    // file must not be consulted.
    f.write(".mailmap", "Bob <bob@mail.com> Jim <jim@mail.com>\n");
    f.commit_all("add mailmap", BOB);

    let (stdout, stderr, code) = f.ledger(&["table", "-l", "--csv", "-e"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(!stdout.contains("Jim"), "jim should be mapped away:\n{stdout}");

    let bob = stdout
        .lines()
        .find(|l| l.starts_with("Bob"))
        .expect("bob row");
    let cols: Vec<&str> = bob.split(',').collect();
    assert_eq!(cols[2], "3", "all commits fold into Bob: {stdout}");
}

#[test]
fn since_filter_narrows_history() {
    require_git!();
    let f = two_author_fixture();

    // Only the second commit (2021-01-02) is in range.
    let (stdout, stderr, code) =
        f.ledger(&["table", "--csv", "--since", "2021-01-01T18:00:00+00:00"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("Jim"));
    assert!(!stdout.contains("Bob"), "{stdout}");
}
