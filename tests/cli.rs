use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn trag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("trag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let guides_dir = root.join("guides");
    fs::create_dir_all(&guides_dir).unwrap();
    fs::write(
        guides_dir.join("lisbon.md"),
        "# Lisbon Guide\n\nTram 28 climbs through Alfama past the cathedral and the castle.\n\nPastel de nata is best eaten warm in Belem.",
    )
    .unwrap();
    fs::write(
        guides_dir.join("porto.txt"),
        "Porto sits on the Douro river.\n\nPort wine lodges line the Gaia waterfront across the Dom Luis bridge.",
    )
    .unwrap();
    fs::write(guides_dir.join("notes.csv"), "a,b,c").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/trag.sqlite"

[chunking]
max_chunk_size = 200
chunk_overlap = 20

[retrieval]
default_k = 3

[gateway]
base_backoff_ms = 1

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    );

    let config_path = config_dir.join("trag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_trag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = trag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run trag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_trag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_trag(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_directory() {
    let (tmp, config_path) = setup_test_env();
    let guides = tmp.path().join("guides");

    let (stdout, stderr, success) = run_trag(
        &config_path,
        &["ingest", guides.to_str().unwrap(), "--meta", "destination=Portugal"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("ingested 2 documents"),
        "unexpected ingest output: {}",
        stdout
    );
    // .csv is outside the default include globs.
    assert!(!stdout.contains("notes.csv"));
}

#[test]
fn test_ingest_unsupported_file_fails() {
    let (tmp, config_path) = setup_test_env();
    let csv = tmp.path().join("guides").join("notes.csv");

    let (stdout, _, success) = run_trag(&config_path, &["ingest", csv.to_str().unwrap()]);
    assert!(!success);
    assert!(stdout.contains("unreadable_format"), "got: {}", stdout);
}

#[test]
fn test_seed_then_ask() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_trag(&config_path, &["seed"]);
    assert!(success, "seed failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingested 6 documents"));

    let (stdout, stderr, success) = run_trag(&config_path, &["ask", "best time to visit Bali", "-k", "2"]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Sources:"));
    assert!(stdout.contains("sample/bali_guide.txt"));
}

#[test]
fn test_retrieve_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    run_trag(&config_path, &["seed"]);

    let (stdout1, _, success) = run_trag(&config_path, &["retrieve", "sushi and ramen"]);
    assert!(success);
    let (stdout2, _, _) = run_trag(&config_path, &["retrieve", "sushi and ramen"]);
    assert_eq!(stdout1, stdout2);
    assert!(stdout1.contains("tokyo_guide.txt"));
}

#[test]
fn test_retrieve_json_with_filter() {
    let (_tmp, config_path) = setup_test_env();
    run_trag(&config_path, &["seed"]);

    let (stdout, stderr, success) = run_trag(
        &config_path,
        &["--json", "retrieve", "museums", "--filter", "destination=Paris"],
    );
    assert!(success, "retrieve failed: {}", stderr);
    let body: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let chunks = body["chunks"].as_array().unwrap();
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c["metadata"]["destination"] == "Paris"));
}

#[test]
fn test_plan_and_destinations() {
    let (_tmp, config_path) = setup_test_env();
    run_trag(&config_path, &["seed"]);

    let (stdout, stderr, success) = run_trag(
        &config_path,
        &["plan", "--destination", "Tokyo", "--duration", "4", "--interest", "food"],
    );
    assert!(success, "plan failed: {}", stderr);
    assert!(stdout.starts_with("Suggested plan"));

    let (stdout, _, success) = run_trag(&config_path, &["destinations", "temples"]);
    assert!(success);
    assert!(!stdout.contains("general"));
}

#[test]
fn test_delete_and_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_trag(&config_path, &["seed"]);

    let (stdout, _, success) = run_trag(&config_path, &["--json", "stats"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["index"]["documents"], 6);

    let id = travel_rag_core::models::document_id_for("sample/bali_guide.txt");
    let (stdout, _, success) = run_trag(&config_path, &["delete", &id]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (_, stderr, success) = run_trag(&config_path, &["delete", &id]);
    assert!(!success);
    assert!(stderr.contains("not found"));

    let (stdout, _, _) = run_trag(&config_path, &["stats"]);
    assert!(stdout.contains("documents: 5"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[chunking]\nmax_chunk_size = 100\nchunk_overlap = 100\n").unwrap();

    let (_, stderr, success) = run_trag(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("chunk"), "got: {}", stderr);
}
