//! Repository list parsing, merging and writing

use gerrit_backup::utils::repo_list::{merge_repo_lists, parse_repo_list, parse_repo_list_str, write_repo_list};
use test_utils::{sample_repo_list, sample_repos, TestContext};

#[test]
fn test_comments_and_blank_lines_are_ignored() {
    let repos = parse_repo_list_str("# comment\n\nteamA/app\nteamB/lib\n");
    assert_eq!(repos, vec!["teamA/app", "teamB/lib"]);
}

#[test]
fn test_parse_sample_file() {
    let ctx = TestContext::new();
    let path = ctx.create_file("repos.txt", sample_repo_list());

    assert_eq!(parse_repo_list(&path).unwrap(), sample_repos());
}

#[test]
fn test_missing_file_is_an_error() {
    let ctx = TestContext::new();
    assert!(parse_repo_list(&ctx.temp_dir().join("absent.txt")).is_err());
}

#[test]
fn test_merge_is_a_deduplicated_union() {
    let first = vec!["a".to_string(), "b".to_string()];
    let second = vec!["b".to_string(), "c".to_string(), "a".to_string()];
    let merged = merge_repo_lists(vec![first.clone(), second.clone()]);

    assert_eq!(merged, vec!["a", "b", "c"]);
    for repo in first.iter().chain(second.iter()) {
        assert!(merged.contains(repo), "{} dropped from merge", repo);
    }
}

#[test]
fn test_write_sorts_and_reads_back() {
    let ctx = TestContext::new();
    let path = ctx.temp_dir().join("nested/list.txt");
    let repos = vec!["zeta".to_string(), "alpha/one".to_string(), "zeta".to_string()];

    write_repo_list(&path, &repos).unwrap();

    assert_eq!(ctx.read_file("nested/list.txt").unwrap(), "alpha/one\nzeta\n");
    assert_eq!(parse_repo_list(&path).unwrap(), vec!["alpha/one", "zeta"]);
}
