//! Spawns the real `hookgate` binary against a throwaway SQLite file and
//! drives one delivery through it over HTTP.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use portpicker::pick_unused_port;
use rand::Rng;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use sha2::Sha256;
use tempfile::TempDir;

const OPERATOR_TOKEN: &str = "smoke-operator-token";
const READY_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 300;

/// Kills the child when the test panics halfway through.
struct ServerProcess(Child);

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn e2e_smoke_binary_accepts_and_logs_a_delivery() {
    let data_dir = TempDir::new().expect("temp dir");
    let db_url = format!(
        "sqlite://{}?mode=rwc",
        data_dir.path().join("hookgate.db").display()
    );
    let port = pick_unused_port().expect("no free port for smoke test");
    let base_url = format!("http://127.0.0.1:{port}");

    let bin_path = assert_cmd::cargo::cargo_bin!("hookgate");
    let mut server = ServerProcess(
        Command::new(bin_path)
            .arg("serve")
            .current_dir(data_dir.path())
            .env("HOOKGATE_PROFILE", "test")
            .env("HOOKGATE_API_BIND_ADDR", format!("127.0.0.1:{port}"))
            .env("HOOKGATE_DATABASE_URL", &db_url)
            .env("HOOKGATE_OPERATOR_TOKEN", OPERATOR_TOKEN)
            .env("HOOKGATE_WEBHOOK_LOGGING_ENABLED", "true")
            .env_remove("HOOKGATE_CRYPTO_KEY")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn hookgate binary"),
    );

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("reqwest client");

    if let Err(err) = wait_for_health(&client, &base_url) {
        let exited = server.0.try_wait().ok().flatten();
        panic!("hookgate never became healthy: {err}; exit status: {exited:?}");
    }

    let created: Value = client
        .post(format!("{base_url}/admin/webhook-registrations"))
        .bearer_auth(OPERATOR_TOKEN)
        .json(&json!({"kind": "GITHUB", "url": "https://github.com"}))
        .send()
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.json())
        .expect("registration created");
    let webhook_path = created["webhook_path"].as_str().expect("webhook path");
    let secret = created["generated_secret"].as_str().expect("generated secret");

    let body = br#"{"zen":"Keep it logically awesome."}"#;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("any key length");
    mac.update(body);
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    let delivery = client
        .post(format!("{base_url}{webhook_path}"))
        .header("X-GitHub-Event", "ping")
        .header("X-Hub-Signature-256", signature)
        .body(body.to_vec())
        .send()
        .expect("delivery sent");
    assert_eq!(delivery.status().as_u16(), 200);

    let unsigned = client
        .post(format!("{base_url}{webhook_path}"))
        .header("X-GitHub-Event", "ping")
        .body(body.to_vec())
        .send()
        .expect("unsigned delivery sent");
    assert_eq!(unsigned.status().as_u16(), 401);

    let logs: Value = client
        .get(format!("{base_url}/admin/webhook-logs"))
        .bearer_auth(OPERATOR_TOKEN)
        .send()
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.json())
        .expect("webhook logs listed");
    let mut statuses: Vec<u64> = logs["logs"]
        .as_array()
        .expect("logs array")
        .iter()
        .filter_map(|log| log["status_code"].as_u64())
        .collect();
    statuses.sort();
    assert_eq!(statuses, vec![200, 401]);
}

fn wait_for_health(client: &Client, base_url: &str) -> Result<(), String> {
    let url = format!("{base_url}/healthz");
    let start = Instant::now();
    let mut last_error = String::from("no attempts yet");

    while start.elapsed() < READY_TIMEOUT {
        match client.get(&url).send() {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => last_error = format!("status {}", resp.status()),
            Err(e) => last_error = e.to_string(),
        }
        let backoff = rand::thread_rng().gen_range(MIN_BACKOFF_MS..=MAX_BACKOFF_MS);
        thread::sleep(Duration::from_millis(backoff));
    }

    Err(format!("timeout after {READY_TIMEOUT:?}: {last_error}"))
}
