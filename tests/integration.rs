//! CLI tests: run the `pdfchat` binary against a temp config.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pdfchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pdfchat");
    path
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("files")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/pdfchat.sqlite"

[storage]
root = "{root}/data/objects"

[server]
bind = "127.0.0.1:7341"
session_secret = "cli-secret"
{extra}
"#,
        root = root.display(),
        extra = extra,
    );

    let config_path = config_dir.join("pdfchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pdfchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pdfchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("PDFCHAT_SESSION_SECRET")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pdfchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Create a workspace as `user` and return its id.
fn create_workspace(config: &Path, user: &str, name: &str) -> String {
    let (stdout, stderr, ok) =
        run_pdfchat(config, &["--user", user, "workspace", "create", name]);
    assert!(ok, "workspace create failed: {}", stderr);
    // "Created workspace <name> (<id>)"
    let start = stdout.rfind('(').unwrap() + 1;
    let end = stdout.rfind(')').unwrap();
    stdout[start..end].to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env("");
    let (stdout, stderr, ok) = run_pdfchat(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/pdfchat.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env("");
    let (_, _, ok1) = run_pdfchat(&config, &["init"]);
    let (_, stderr, ok2) = run_pdfchat(&config, &["init"]);
    assert!(ok1);
    assert!(ok2, "second init failed: {}", stderr);
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_pdfchat(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_token_is_verifiable() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, ok) = run_pdfchat(&config, &["token", "alice"]);
    assert!(ok, "token failed: {}", stderr);
    let token = stdout.trim();
    assert!(token.starts_with("alice."));
    assert_eq!(
        pdfchat::auth::verify_token("cli-secret", token).unwrap(),
        "alice"
    );
}

#[test]
fn test_workspace_create_list_delete() {
    let (_tmp, config) = setup_test_env("");
    run_pdfchat(&config, &["init"]);

    let ws = create_workspace(&config, "alice", "Contracts");

    let (stdout, _, ok) = run_pdfchat(&config, &["--user", "alice", "workspace", "list"]);
    assert!(ok);
    assert!(stdout.contains(&ws));
    assert!(stdout.contains("Contracts"));
    assert!(stdout.contains("owner"));

    let (stdout, _, ok) = run_pdfchat(&config, &["--user", "bob", "workspace", "list"]);
    assert!(ok);
    assert!(stdout.contains("No workspaces."));

    let (_, stderr, ok) = run_pdfchat(&config, &["--user", "bob", "workspace", "delete", &ws]);
    assert!(!ok);
    assert!(stderr.contains("Only workspace owner can delete workspace"));

    let (stdout, stderr, ok) =
        run_pdfchat(&config, &["--user", "alice", "workspace", "delete", &ws]);
    assert!(ok, "delete failed: {}", stderr);
    assert!(stdout.contains("Deleted workspace"));

    let (stdout, _, _) = run_pdfchat(&config, &["--user", "alice", "workspace", "list"]);
    assert!(stdout.contains("No workspaces."));
}

#[test]
fn test_user_required_for_workspace_commands() {
    let (_tmp, config) = setup_test_env("");
    run_pdfchat(&config, &["init"]);
    let (_, stderr, ok) = run_pdfchat(&config, &["workspace", "list"]);
    assert!(!ok);
    assert!(stderr.contains("--user"));
}

#[test]
fn test_upload_rejects_non_pdf() {
    let (tmp, config) = setup_test_env("");
    run_pdfchat(&config, &["init"]);
    let ws = create_workspace(&config, "alice", "Docs");

    let file = tmp.path().join("files/notes.pdf");
    fs::write(&file, "just some text, not a pdf").unwrap();

    let (_, stderr, ok) = run_pdfchat(
        &config,
        &["--user", "alice", "upload", &ws, file.to_str().unwrap()],
    );
    assert!(!ok);
    assert!(stderr.contains("Could not read PDF"), "stderr: {}", stderr);
}

#[test]
fn test_upload_rejects_oversize_file() {
    let (tmp, config) = setup_test_env("[limits]\nmax_document_bytes = 64\n");
    run_pdfchat(&config, &["init"]);
    let ws = create_workspace(&config, "alice", "Docs");

    let file = tmp.path().join("files/big.pdf");
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.extend(std::iter::repeat(b'x').take(256));
    fs::write(&file, bytes).unwrap();

    let (_, stderr, ok) = run_pdfchat(
        &config,
        &["--user", "alice", "upload", &ws, file.to_str().unwrap()],
    );
    assert!(!ok);
    assert!(stderr.contains("File too large"), "stderr: {}", stderr);
}

#[test]
fn test_upload_by_non_member_is_denied() {
    let (tmp, config) = setup_test_env("");
    run_pdfchat(&config, &["init"]);
    let ws = create_workspace(&config, "alice", "Docs");

    let file = tmp.path().join("files/a.pdf");
    fs::write(&file, b"%PDF-1.4\n").unwrap();

    let (_, stderr, ok) = run_pdfchat(
        &config,
        &["--user", "mallory", "upload", &ws, file.to_str().unwrap()],
    );
    assert!(!ok);
    assert!(stderr.contains("Access denied"));
}

#[test]
fn test_embed_errors_when_disabled() {
    let (_tmp, config) = setup_test_env("");
    run_pdfchat(&config, &["init"]);
    let (_, stderr, ok) = run_pdfchat(&config, &["--user", "alice", "embed", "doc-1"]);
    assert!(!ok);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_ask_fails_with_disabled_chat() {
    let (_tmp, config) = setup_test_env("");
    run_pdfchat(&config, &["init"]);
    let ws = create_workspace(&config, "alice", "Docs");

    let (_, stderr, ok) = run_pdfchat(&config, &["--user", "alice", "ask", &ws, "hello?"]);
    assert!(!ok);
    assert!(stderr.contains("Chat provider is disabled"));
}

#[test]
fn test_similar_with_no_documents() {
    let (_tmp, config) = setup_test_env("");
    run_pdfchat(&config, &["init"]);
    let ws = create_workspace(&config, "alice", "Docs");

    let (stdout, stderr, ok) =
        run_pdfchat(&config, &["--user", "alice", "similar", &ws, "anything"]);
    assert!(ok, "similar failed: {}", stderr);
    assert!(stdout.contains("No similar documents."));
}

#[test]
fn test_invalid_chunking_config_rejected() {
    let (_tmp, config) =
        setup_test_env("[chunking]\nchunk_chars = 100\noverlap_chars = 200\n");
    let (_, stderr, ok) = run_pdfchat(&config, &["init"]);
    assert!(!ok);
    assert!(stderr.contains("overlap_chars"));
}

#[test]
fn test_completions() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, _, ok) = run_pdfchat(&config, &["completions", "bash"]);
    assert!(ok);
    assert!(stdout.contains("pdfchat"));
}
