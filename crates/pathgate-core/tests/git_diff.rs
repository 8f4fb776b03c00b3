//! GitDiffMatcher and the gate against scratch git repositories.

use std::path::Path;
use std::process::Command;

use pathgate_core::fakes::RecordingStop;
use pathgate_core::{
    DiffMatcher, DiffResult, ExecutionGate, ExecutionHandle, GateDecision, GateError, GateInput,
    GitDiffMatcher, PathFilter, PathFilterSet, RevisionRef,
};

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .expect("git should be installed");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "-q"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
    dir
}

fn commit_files(repo_dir: &Path, files: &[(&str, &str)], message: &str) -> String {
    for (path, contents) in files {
        let full = repo_dir.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, contents).unwrap();
    }
    run_git(repo_dir, &["add", "-A"]);
    run_git(repo_dir, &["commit", "-q", "-m", message]);
    run_git(repo_dir, &["rev-parse", "HEAD"])
}

fn rev(s: &str) -> RevisionRef {
    RevisionRef::new(s).unwrap()
}

fn filter(s: &str) -> PathFilter {
    PathFilter::new(s).unwrap()
}

/// Two commits: the second only touches docs/readme.md.
fn docs_only_change() -> (tempfile::TempDir, String) {
    let repo = init_repo();
    commit_files(
        repo.path(),
        &[
            ("services/api/handler.go", "package api\n"),
            ("infra/main.tf", "# infra\n"),
            ("docs/readme.md", "v1\n"),
        ],
        "initial",
    );
    let head = commit_files(repo.path(), &[("docs/readme.md", "v2\n")], "docs");
    (repo, head)
}

#[tokio::test]
async fn unchanged_and_changed_scopes() {
    let (repo, head) = docs_only_change();
    let matcher = GitDiffMatcher::new(repo.path());
    let head = rev(&head);
    let base = RevisionRef::parent_of(&head);

    assert_eq!(
        matcher.matches(&base, &head, &filter("services/api")).await.unwrap(),
        DiffResult::Unchanged
    );
    assert_eq!(
        matcher.matches(&base, &head, &filter("docs")).await.unwrap(),
        DiffResult::Changed
    );
    assert_eq!(
        matcher.matches(&base, &head, &filter("docs/readme.md")).await.unwrap(),
        DiffResult::Changed
    );
    assert_eq!(
        matcher.matches(&base, &head, &filter(".")).await.unwrap(),
        DiffResult::Changed
    );
}

#[tokio::test]
async fn filter_for_path_that_never_existed_is_unchanged() {
    let (repo, head) = docs_only_change();
    let matcher = GitDiffMatcher::new(repo.path());
    let head = rev(&head);

    let result = matcher
        .matches(&RevisionRef::parent_of(&head), &head, &filter("no/such/dir"))
        .await
        .unwrap();
    assert_eq!(result, DiffResult::Unchanged);
}

#[tokio::test]
async fn glob_characters_in_filter_match_literally() {
    let (repo, head) = docs_only_change();
    let matcher = GitDiffMatcher::new(repo.path());
    let head = rev(&head);
    let base = RevisionRef::parent_of(&head);

    assert_eq!(
        matcher.matches(&base, &head, &filter("*.md")).await.unwrap(),
        DiffResult::Unchanged
    );
    assert_eq!(
        matcher.matches(&base, &head, &filter("docs/*")).await.unwrap(),
        DiffResult::Unchanged
    );
    assert_eq!(
        matcher.matches(&base, &head, &filter(":(glob)**/*.md")).await.unwrap(),
        DiffResult::Unchanged
    );
}

#[tokio::test]
async fn first_commit_is_base_unresolvable() {
    let repo = init_repo();
    let head = commit_files(repo.path(), &[("docs/readme.md", "v1\n")], "initial");
    let matcher = GitDiffMatcher::new(repo.path());
    let head = rev(&head);

    let result = matcher
        .matches(&RevisionRef::parent_of(&head), &head, &filter("services/api"))
        .await
        .unwrap();
    assert_eq!(result, DiffResult::BaseUnresolvable);
}

#[tokio::test]
async fn unknown_revision_is_diff_unavailable() {
    let (repo, head) = docs_only_change();
    let matcher = GitDiffMatcher::new(repo.path());

    let err = matcher
        .matches(&rev("no-such-branch"), &rev(&head), &filter("docs"))
        .await
        .unwrap_err();
    match err {
        GateError::DiffUnavailable { filter, reason } => {
            assert_eq!(filter, "docs");
            assert!(!reason.is_empty());
        }
        other => panic!("expected DiffUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_head_is_diff_unavailable_not_first_commit() {
    let (repo, head) = docs_only_change();
    let matcher = GitDiffMatcher::new(repo.path());
    let missing_head = rev("0123456789abcdef0123456789abcdef01234567");

    let err = matcher
        .matches(&rev(&head), &missing_head, &filter("docs"))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::DiffUnavailable { .. }));
}

#[tokio::test]
async fn outside_repository_is_diff_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let matcher = GitDiffMatcher::new(dir.path());

    let err = matcher
        .matches(&rev("HEAD~1"), &rev("HEAD"), &filter("docs"))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::DiffUnavailable { .. }));
}

#[tokio::test]
async fn changed_paths_lists_scoped_changes() {
    let repo = init_repo();
    commit_files(
        repo.path(),
        &[("services/api/handler.go", "v1\n"), ("docs/readme.md", "v1\n")],
        "initial",
    );
    let head = commit_files(
        repo.path(),
        &[("services/api/handler.go", "v2\n"), ("docs/readme.md", "v2\n")],
        "both",
    );
    let matcher = GitDiffMatcher::new(repo.path());
    let head = rev(&head);
    let base = RevisionRef::parent_of(&head);

    let all = matcher.changed_paths(&base, &head, None).await.unwrap();
    assert_eq!(all, vec!["docs/readme.md", "services/api/handler.go"]);

    let scoped = matcher
        .changed_paths(&base, &head, Some(&filter("services")))
        .await
        .unwrap();
    assert_eq!(scoped, vec!["services/api/handler.go"]);
}

#[tokio::test]
async fn changed_paths_for_first_commit_lists_tree() {
    let repo = init_repo();
    let head = commit_files(
        repo.path(),
        &[("a.txt", "a\n"), ("infra/main.tf", "# infra\n")],
        "initial",
    );
    let matcher = GitDiffMatcher::new(repo.path());
    let head = rev(&head);

    let paths = matcher
        .changed_paths(&RevisionRef::parent_of(&head), &head, None)
        .await
        .unwrap();
    assert_eq!(paths, vec!["a.txt", "infra/main.tf"]);
}

#[tokio::test]
async fn gate_over_git_stops_docs_only_change() {
    let (repo, head) = docs_only_change();
    let head = rev(&head);
    let gate = ExecutionGate::new(GitDiffMatcher::new(repo.path()), RecordingStop::new());
    let input = GateInput::new(
        RevisionRef::parent_of(&head),
        head,
        PathFilterSet::parse_csv("services/api, infra").unwrap(),
        ExecutionHandle::new("exec-git").unwrap(),
    );

    let report = gate.evaluate(&input).await.unwrap();

    assert_eq!(report.decision, GateDecision::Stopped);
    assert_eq!(gate.stop_primitive().calls().len(), 1);
}

#[tokio::test]
async fn gate_over_git_continues_on_first_commit() {
    let repo = init_repo();
    let head = rev(&commit_files(repo.path(), &[("docs/readme.md", "v1\n")], "initial"));
    let gate = ExecutionGate::new(GitDiffMatcher::new(repo.path()), RecordingStop::new());
    let input = GateInput::new(
        RevisionRef::parent_of(&head),
        head,
        PathFilterSet::parse_csv("services/api").unwrap(),
        ExecutionHandle::new("exec-git").unwrap(),
    );

    let report = gate.evaluate(&input).await.unwrap();

    assert_eq!(report.decision, GateDecision::Continue);
    assert!(gate.stop_primitive().calls().is_empty());
}
