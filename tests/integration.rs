use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn fortune_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fortune"))
}

fn write_config(root: &Path, extra: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[storage]
root = "{root}/storage"

[ingest]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt", "**/*.docx"]

[chunking]
parent_size = 120
parent_overlap = 20
child_size = 40
child_overlap = 8
summary_chars = 60

[retrieval]
expand_queries = false

[embedding]
provider = "hash"
dims = 256
{extra}
"#,
        root = root.display(),
        extra = extra
    );

    let config_path = config_dir.join("fortune.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("子平真诠.md"),
        "正官格以财印为喜。官星太旺则宜用印化之。正官身弱者喜印比扶身。\
         七杀格以食神制杀为贵。杀重身轻，终身有损。",
    )
    .unwrap();
    fs::write(
        files_dir.join("滴天髓.txt"),
        "甲木参天，脱胎要火。春不容金，秋不容土。\n火炽乘龙，水宕骑虎。地润天和，植立千古。",
    )
    .unwrap();
    fs::write(files_dir.join("notes.txt"), "   \n").unwrap();

    let config_path = write_config(&root, "");
    (tmp, config_path)
}

fn run_fortune(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = fortune_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run fortune binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Extract `label: N` from the ingest summary.
fn count(stdout: &str, label: &str) -> usize {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(&format!("{}: ", label)))
        .unwrap_or_else(|| panic!("'{}' missing from output:\n{}", label, stdout))
        .parse()
        .unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fortune(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("storage").join("fortune.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_fortune(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_fortune(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_reports_counts() {
    let (_tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    let (stdout, stderr, success) = run_fortune(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert_eq!(count(&stdout, "files found"), 3);
    assert_eq!(count(&stdout, "files ingested"), 2);
    assert_eq!(count(&stdout, "files skipped"), 1);
    assert!(count(&stdout, "summary entries") >= 2);
    assert!(count(&stdout, "passage entries") > count(&stdout, "summary entries"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reingest_is_duplicate_safe() {
    let (_tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    let (first, _, _) = run_fortune(&config_path, &["ingest"]);
    let (second, stderr, success) = run_fortune(&config_path, &["ingest"]);
    assert!(success, "re-ingest failed: {}", stderr);
    assert_eq!(count(&second, "files unchanged"), 2);
    assert_eq!(count(&second, "files ingested"), 0);
    assert_eq!(count(&second, "passage entries"), 0);

    // The query output is identical, so nothing was duplicated.
    let (before, _, _) = run_fortune(&config_path, &["query", "正官格身弱", "--json"]);
    run_fortune(&config_path, &["ingest"]);
    let (after, _, _) = run_fortune(&config_path, &["query", "正官格身弱", "--json"]);
    assert_eq!(before, after);
    assert!(count(&first, "passage entries") > 0);
}

#[test]
fn test_changed_document_is_reingested() {
    let (tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    run_fortune(&config_path, &["ingest"]);

    fs::write(
        tmp.path().join("files").join("滴天髓.txt"),
        "乙木虽柔，刲羊解牛。",
    )
    .unwrap();
    let (stdout, stderr, success) = run_fortune(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert_eq!(count(&stdout, "files ingested"), 1);
    assert_eq!(count(&stdout, "files unchanged"), 1);

    let (json, _, _) = run_fortune(&config_path, &["query", "乙木虽柔", "--json"]);
    assert!(json.contains("乙木虽柔"));
    assert!(!json.contains("甲木参天"));
}

#[test]
fn test_deleted_document_leaves_the_index() {
    let (tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    run_fortune(&config_path, &["ingest"]);

    fs::remove_file(tmp.path().join("files").join("滴天髓.txt")).unwrap();
    let (stdout, stderr, success) = run_fortune(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert_eq!(count(&stdout, "files removed"), 1);
    assert_eq!(count(&stdout, "files unchanged"), 1);

    let (json, _, _) = run_fortune(&config_path, &["query", "甲木参天", "--json"]);
    assert!(!json.contains("甲木参天，"));
    assert!(!json.contains("滴天髓"));
}

#[test]
fn test_rebuild_reingests_everything() {
    let (_tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    let (first, _, _) = run_fortune(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_fortune(&config_path, &["ingest", "--rebuild"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert_eq!(count(&stdout, "files ingested"), 2);
    assert_eq!(
        count(&stdout, "passage entries"),
        count(&first, "passage entries")
    );
}

#[test]
fn test_model_change_requires_rebuild() {
    let (tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    run_fortune(&config_path, &["ingest"]);

    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("dims = 256", "dims = 128");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_fortune(&config_path, &["query", "正官格"]);
    assert!(!success);
    assert!(stderr.contains("--rebuild"), "stderr: {}", stderr);

    let (_, stderr, success) = run_fortune(&config_path, &["ingest", "--rebuild"]);
    assert!(success, "rebuild failed: {}", stderr);
    let (_, _, success) = run_fortune(&config_path, &["query", "正官格"]);
    assert!(success);
    drop(tmp);
}

#[test]
fn test_query_prints_context_and_citations() {
    let (_tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    run_fortune(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_fortune(&config_path, &["query", "正官格身弱喜什么"]);
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Citations:"));
    assert!(stdout.contains("子平真诠.md:"));
    assert!(stdout.lines().next().unwrap().starts_with('['));
}

#[test]
fn test_query_json() {
    let (_tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    run_fortune(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_fortune(&config_path, &["query", "甲木", "--json"]);
    assert!(success, "query failed: {}", stderr);

    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["trace"]["queries"][0], "甲木");
    assert!(parsed["context"]["text"].is_string());
    let passages = parsed["trace"]["passages"].as_array().unwrap();
    assert!(!passages.is_empty());
    assert!(passages.len() <= 3);
    assert!(parsed["trace"]["degradations"].as_array().unwrap().is_empty());
}

#[test]
fn test_rendered_budget_is_respected() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("files")).unwrap();
    fs::write(
        root.join("files").join("穷通宝鉴.md"),
        "三春甲木，初春尚有余寒，得火温之，始有舒畅之美。仲春阳刃，须用庚金。\
         季春木气已竭，宜用庚金，丁火为佐。",
    )
    .unwrap();
    let config_path = write_config(&root, "");
    let content = fs::read_to_string(&config_path).unwrap().replace(
        "expand_queries = false",
        "expand_queries = false\nbudget_chars = 30\nbudget_mode = \"rendered\"",
    );
    fs::write(&config_path, content).unwrap();

    run_fortune(&config_path, &["init"]);
    run_fortune(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_fortune(&config_path, &["query", "甲木", "--json"]);
    assert!(success, "query failed: {}", stderr);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let text = parsed["context"]["text"].as_str().unwrap();
    assert!(text.chars().count() <= 30, "context too long: {}", text);
}

#[test]
fn test_blank_query_is_empty() {
    let (_tmp, config_path) = setup_test_env();

    run_fortune(&config_path, &["init"]);
    run_fortune(&config_path, &["ingest"]);
    let (stdout, _, success) = run_fortune(&config_path, &["query", "   "]);
    assert!(success);
    assert!(stdout.contains("No relevant passages found."));
}

#[test]
fn test_query_before_init_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_fortune(&config_path, &["query", "正官格"]);
    assert!(!success);
    assert!(stderr.contains("does not exist"), "stderr: {}", stderr);
}

#[test]
fn test_docx_is_ingested() {
    let (tmp, config_path) = setup_test_env();
    fs::write(
        tmp.path().join("files").join("三命通会.docx"),
        minimal_docx_with_text("论正官：正官者，甲见辛之类。"),
    )
    .unwrap();

    run_fortune(&config_path, &["init"]);
    let (stdout, stderr, success) = run_fortune(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert_eq!(count(&stdout, "files ingested"), 3);

    let (json, _, _) = run_fortune(&config_path, &["query", "甲见辛", "--json"]);
    assert!(json.contains("三命通会.docx"));
}

#[test]
fn test_invalid_config_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "");
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("provider = \"hash\"", "provider = \"telepathy\"");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_fortune(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"), "stderr: {}", stderr);
}

#[test]
fn test_disabled_embedding_fails_ingest() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "");
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("provider = \"hash\"", "provider = \"disabled\"");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_fortune(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}
