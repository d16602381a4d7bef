// tests/config_loading.rs

use std::fs;
use std::path::Path;

use clap::Parser;

use taskgate::cli::CliArgs;
use taskgate::config::{load_and_validate, load_from_path, load_transfer};
use taskgate::model::CryptoKeyType;
use taskgate::store::Store;
use taskgate::types::Direction;

const AES_KEY: &str = "0123456789abcdefhijklABCDEFHIJKL";

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("Taskgate.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn loads_rules_agents_and_key_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("keys")).unwrap();
    fs::write(dir.path().join("keys").join("partner.aes"), format!("{AES_KEY}\n")).unwrap();

    let path = write_config(
        dir.path(),
        r#"
[paths]
gateway_home = "/srv/gateway"

[[local_agent]]
name = "sftp-server"
protocol = "sftp"
accounts = ["alice", "bob"]

[[remote_agent]]
name = "partner"
protocol = "r66"
accounts = ["gw"]

[[crypto_key]]
name = "partner-aes"
type = "AES"
key_file = "keys/partner.aes"

[[rule]]
name = "inbound"
direction = "receive"
local_dir = "inbound"
post = [
  { type = "DECRYPT", args = { method = "AES-CFB", keyName = "partner-aes" } },
  { type = "MOVE", args = { path = "archive" } },
]
"#,
    );

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.paths.gateway_home, Path::new("/srv/gateway"));

    let rules = cfg.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].direction, Direction::Receive);

    let store = cfg.seed_store().unwrap();
    let key = store.crypto_key("partner-aes").unwrap();
    assert_eq!(key.kind, CryptoKeyType::Aes);
    assert_eq!(key.key, AES_KEY);

    let server = store.local_agent_by_name("sftp-server").unwrap();
    assert!(store.local_account_by_login(server.id, "bob").is_ok());
    assert_eq!(store.rule("inbound", Direction::Receive).unwrap().local_dir, "inbound");
}

#[test]
fn key_and_key_file_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("k"), AES_KEY).unwrap();
    let path = write_config(
        dir.path(),
        &format!(
            r#"
[[crypto_key]]
name = "dup"
type = "AES"
key = "{AES_KEY}"
key_file = "k"
"#
        ),
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(err.to_string().contains("both `key` and `key_file`"));
}

#[test]
fn missing_key_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[[crypto_key]]
name = "gone"
type = "HMAC"
key_file = "nowhere.key"
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(err.to_string().contains("cannot read key file"));
}

#[test]
fn unknown_fields_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[[rule]]
name = "inbound"
direction = "receive"
colour = "blue"
"#,
    );
    assert!(load_from_path(&path).is_err());
}

#[test]
fn transfer_file_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transfer.toml");
    fs::write(
        &path,
        r#"
local_path = "/data/in/report.csv"
remote_agent = "partner"
remote_account = "gw"

[transfer_info]
batch = "2024-06"
"#,
    )
    .unwrap();

    let transfer = load_transfer(&path).unwrap();
    assert_eq!(transfer.filesize, -1);
    assert_eq!(transfer.task_number, 0);
    assert_eq!(transfer.remote_agent.as_deref(), Some("partner"));
    assert_eq!(transfer.transfer_info["batch"], serde_json::Value::from("2024-06"));
}

#[tokio::test]
async fn run_command_executes_a_chain_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let incoming = dir.path().join("tmp").join("report.csv");
    fs::create_dir_all(incoming.parent().unwrap()).unwrap();
    fs::write(&incoming, b"id;qty\r\n1;2\r\n").unwrap();

    let home = dir.path().display().to_string();
    let config = write_config(
        dir.path(),
        &format!(
            r##"
[paths]
gateway_home = "{home}"

[[rule]]
name = "inbound"
direction = "receive"
local_dir = "inbox"
post = [
  {{ type = "CHNEWLINE", args = {{ from = "\\r\\n", to = "\\n" }} }},
  {{ type = "MOVE", args = {{ path = "#INPATH#" }} }},
]
"##
        ),
    );
    let transfer = dir.path().join("transfer.toml");
    fs::write(&transfer, format!("local_path = \"{}\"\n", incoming.display())).unwrap();

    let args = CliArgs::try_parse_from([
        "taskgate",
        "--config",
        config.to_str().unwrap(),
        "run",
        "--rule",
        "inbound",
        "--chain",
        "post",
        "--transfer",
        transfer.to_str().unwrap(),
    ])
    .unwrap();
    taskgate::run(args).await.unwrap();

    let moved = dir.path().join("inbox").join("report.csv");
    assert_eq!(fs::read(&moved).unwrap(), b"id;qty\n1;2\n");
    assert!(!incoming.exists());
}

#[tokio::test]
async fn check_command_reports_invalid_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[rule]]
name = "outbound"
direction = "send"
pre = [{ type = "ENCRYPT", args = { method = "AES-CFB", keyName = "missing" } }]
"#,
    );

    let args = CliArgs::try_parse_from(["taskgate", "--config", config.to_str().unwrap(), "check"]).unwrap();
    let err = taskgate::run(args).await.unwrap_err();
    assert!(err.to_string().contains("1 task(s) failed validation"));
}
