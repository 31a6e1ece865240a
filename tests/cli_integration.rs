//! End-to-end tests of the `bench-daq` binary and its command layer against
//! fake instruments on loopback TCP.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use bench_daq::commands;
use bench_daq::HardwareConfig;
use serde_json::json;
use std::io::Write;
use std::process::{Command, Output};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection, log `\r`-terminated commands and answer the ones
/// listed in `replies` with a `\r`-terminated reply.
async fn fake_generator(
    replies: &'static [(&'static str, &'static str)],
) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut received = Vec::new();
        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\r', &mut line).await.unwrap() == 0 {
                break;
            }
            let command = String::from_utf8_lossy(&line)
                .trim_end_matches('\r')
                .to_string();
            if let Some((_, reply)) = replies.iter().find(|(cmd, _)| *cmd == command) {
                write_half
                    .write_all(format!("{}\r", reply).as_bytes())
                    .await
                    .unwrap();
            }
            received.push(command);
        }
        received
    });

    (address, handle)
}

fn generator_config(address: &str) -> String {
    format!(
        r#"
        [[devices]]
        id = "magnetron"
        name = "KU SG 2.45 250 A"
        [devices.driver]
        type = "kusg245_250a"
        address = "{address}"
        power_limit = 200
        startup_delay_ms = 10
        "#
    )
}

fn bench_daq(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bench-daq"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn drivers_lists_builtin_types() {
    let output = bench_daq(&["drivers"]);
    assert!(output.status.success());

    let drivers: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let types: Vec<&str> = drivers
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["driver_type"].as_str())
        .collect();
    assert_eq!(types, vec!["keithley705", "kusg245_250a", "rod4"]);
}

#[test]
fn device_commands_require_config() {
    let output = bench_daq(&["list"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--config"));
}

#[test]
fn empty_config_lists_no_devices() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let output = bench_daq(&["--config", file.path().to_str().unwrap(), "list"]);
    assert!(output.status.success());
    let devices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(devices, json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn binary_reads_property_over_tcp() {
    let (address, device) = fake_generator(&[("T", "37")]).await;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(generator_config(&address).as_bytes()).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let output = tokio::task::spawn_blocking(move || {
        bench_daq(&["--config", &path, "get", "magnetron", "temperature"])
    })
    .await
    .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value, json!(37.0));
    assert_eq!(device.await.unwrap(), vec!["T"]);
}

#[tokio::test]
async fn command_layer_drives_generator() {
    let (address, device) = fake_generator(&[("6", "150"), ("o?", "1")]).await;
    let config = HardwareConfig::from_toml_str(&generator_config(&address)).unwrap();
    let registry = daq_hardware::create_registry_from_config(&config)
        .await
        .unwrap();

    let reading = commands::read(&registry, "magnetron").await.unwrap();
    assert_eq!(reading, json!({ "value": 150.0, "units": "W" }));

    commands::set(&registry, "magnetron", "power_setpoint", commands::parse_value("250"))
        .await
        .unwrap();
    commands::exec(&registry, "magnetron", "tune", json!({ "power": 12 }))
        .await
        .unwrap();
    assert_eq!(
        commands::emission(&registry, "magnetron", true).await.unwrap(),
        json!({ "emission": true })
    );

    let description = commands::describe(&registry, "magnetron").unwrap();
    assert_eq!(description["device"]["driver_type"], json!("kusg245_250a"));
    assert!(description["commands"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c["name"] == json!("tune")));

    let err = commands::select_channel(&registry, "magnetron", 1)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not support channel switching"));

    assert!(registry.unregister("magnetron"));
    assert_eq!(
        device.await.unwrap(),
        vec!["6", "A200", "b012", "X", "O", "o?"]
    );
}
