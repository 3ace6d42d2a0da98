mod common;

use common::{Chunk, SLAVE, ScriptedTransport, link_quality_frame, sample_frame};
use loragate::config::{Config, LoraSettings, OperatingClass, PathsConfig};
use loragate::gateway::Gateway;
use loragate::persistence::FlagFile;
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    Config {
        paths: PathsConfig::under(dir.path()),
        ..Config::default()
    }
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn class_a_settings(dir: &TempDir) {
    std::fs::write(
        dir.path().join("config_lora.json"),
        json!({
            "class": "A",
            "window": "5s",
            "power": 17,
            "bandwidth": "250kHz",
            "spreading_factor": 10,
            "coding_rate": "4/6",
            "wake_interval": 30
        })
        .to_string(),
    )
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn reading_is_published() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new()
        .reply(vec![Chunk::after_ms(150, sample_frame())])
        .reply(vec![Chunk::now(link_quality_frame(SLAVE, 87, 92, 9, 7))]);
    let mut gateway = Gateway::new(config(&dir), transport);

    let report = gateway.run_iteration().await.unwrap().unwrap();
    assert_eq!(report.reading.bus_raw, 3300);

    let snapshot = read_json(&dir.path().join("sensor_snapshot.json"));
    assert_eq!(snapshot["channel_1"], 1024);
    assert_eq!(snapshot["channel_4"], 4095);
    assert_eq!(snapshot["battery_voltage"], 4.13);
    assert_eq!(snapshot["battery_current"], 50.0);
    assert_eq!(snapshot["battery_percent"], 100.0);
    assert_eq!(snapshot["rssi_uplink"], -87);
    assert_eq!(snapshot["online"], true);
    assert_eq!(snapshot["loss_counter"], 0);

    let health = read_json(&dir.path().join("link_health.json"));
    assert!(health["elapsed_s"].as_f64().unwrap() < 1.0);
    assert!(dir.path().join("link_quality.json").exists());
    assert!(dir.path().join("battery_state.json").exists());
}

#[tokio::test(start_paused = true)]
async fn timeout_skips_cycle_and_keeps_counting() {
    let dir = TempDir::new().unwrap();
    let mut gateway = Gateway::new(config(&dir), ScriptedTransport::new());

    assert!(gateway.run_iteration().await.unwrap().is_none());
    assert!(!dir.path().join("sensor_snapshot.json").exists());
    // Response timeout plus cooldown
    assert!(gateway.monitor().elapsed_s() >= 3.0);

    gateway.run_iteration().await.unwrap();
    let health = read_json(&dir.path().join("link_health.json"));
    assert!(health["elapsed_s"].as_f64().unwrap() >= 3.0);
}

#[tokio::test(start_paused = true)]
async fn reconfig_flag_triggers_config_frames() {
    let dir = TempDir::new().unwrap();
    class_a_settings(&dir);
    let flag = FlagFile::new(dir.path().join("reconfig.flag"));
    flag.raise().unwrap();

    let transport = ScriptedTransport::new()
        .reply(vec![Chunk::now(sample_frame())])
        .silent()
        .silent()
        .silent()
        .reply(vec![Chunk::after_ms(100, vec![0x06])]);
    let mut gateway = Gateway::new(config(&dir), transport);

    let report = gateway.run_iteration().await.unwrap().unwrap();
    assert!(report.config_applied);
    assert!(!flag.is_raised());
    assert!(!gateway.session().has_pending_config());

    let params = LoraSettings::from_file(dir.path().join("config_lora.json"))
        .unwrap()
        .radio_params();
    let writes = gateway.session().transport().writes();
    assert_eq!(writes[2], params.sleep_frame(SLAVE));
    assert_eq!(writes[3], params.mode_frame(SLAVE));
    assert_eq!(writes[4], params.radio_frame(SLAVE));
    assert_eq!(&writes[4][3..8], &[0x01, 17, 0x01, 10, 0x02]);
}

#[tokio::test(start_paused = true)]
async fn reset_flag_zeroes_accumulator_once() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("battery_state.json"),
        json!({"accumulated_mah": 812.5, "capacity_mah": 3000.0}).to_string(),
    )
    .unwrap();
    let reset = FlagFile::new(dir.path().join("reset_battery.flag"));
    reset.raise().unwrap();

    let transport = ScriptedTransport::new()
        .reply(vec![Chunk::now(sample_frame())])
        .silent();
    let mut gateway = Gateway::new(config(&dir), transport);
    assert_eq!(gateway.battery().state().accumulated_mah, 812.5);

    gateway.run_iteration().await.unwrap().unwrap();
    assert_eq!(gateway.battery().state().accumulated_mah, 0.0);
    assert!(!reset.is_raised());

    let state = read_json(&dir.path().join("battery_state.json"));
    assert_eq!(state["accumulated_mah"], 0.0);
}

#[tokio::test(start_paused = true)]
async fn capacity_comes_from_battery_settings() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config_battery.json"),
        r#"{"capacity_mah": 1200}"#,
    )
    .unwrap();
    let gateway = Gateway::new(config(&dir), ScriptedTransport::new());
    assert_eq!(gateway.battery().state().capacity_mah, 1200.0);
}

#[tokio::test(start_paused = true)]
async fn link_alarm_fires_while_endpoint_is_silent() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config_alarms.json"),
        json!({"relay_9": {"source": "link_elapsed_s", "limit": 5, "type": "above"}}).to_string(),
    )
    .unwrap();
    let mut gateway = Gateway::new(config(&dir), ScriptedTransport::new());

    for _ in 0..3 {
        gateway.run_iteration().await.unwrap();
    }
    assert_eq!(gateway.alarms().status()["relay_9"], true);
    let status = read_json(&dir.path().join("alarm_status.json"));
    assert_eq!(status["relay_9"], true);
}

#[tokio::test(start_paused = true)]
async fn run_until_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let mut gateway = Gateway::new(config(&dir), ScriptedTransport::new());
    let result = gateway
        .run_until(tokio::time::sleep(Duration::from_secs(10)))
        .await;
    assert!(result.is_ok());
    assert!(gateway.session().transport().writes().len() >= 2);
}

#[tokio::test(start_paused = true)]
async fn run_returns_on_transport_failure() {
    let dir = TempDir::new().unwrap();
    let mut gateway = Gateway::new(config(&dir), ScriptedTransport::broken());
    let err = gateway
        .run_until(tokio::time::sleep(Duration::from_secs(3600)))
        .await
        .unwrap_err();
    assert!(err.is_fatal());

    gateway.replace_transport(
        ScriptedTransport::new()
            .reply(vec![Chunk::now(sample_frame())])
            .silent(),
    );
    assert!(gateway.run_iteration().await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn comm_time_rule_from_web_ui_fires() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config_alarms.json"),
        json!({"relay_9": {"source": "comm_time", "limit_real": 5.0, "type": "high"}})
            .to_string(),
    )
    .unwrap();
    let mut gateway = Gateway::new(config(&dir), ScriptedTransport::new());

    for _ in 0..3 {
        gateway.run_iteration().await.unwrap();
    }
    assert_eq!(gateway.alarms().status()["relay_9"], true);
}

#[tokio::test(start_paused = true)]
async fn snapshot_carries_web_ui_keys() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config_alarms.json"),
        json!({"relay_1": {"source": "consumo_mah", "limit_real": 100.0, "type": "low"}})
            .to_string(),
    )
    .unwrap();
    let transport = ScriptedTransport::new()
        .reply(vec![Chunk::now(sample_frame())])
        .silent();
    let mut gateway = Gateway::new(config(&dir), transport);
    gateway.run_iteration().await.unwrap().unwrap();

    let snapshot = read_json(&dir.path().join("sensor_snapshot.json"));
    assert_eq!(snapshot["consumo_mah"], snapshot["accumulated_mah"]);
    assert_eq!(snapshot["bat_percent"], 100.0);
    assert_eq!(snapshot["comm_time"], 0.0);
    assert!(snapshot.get("bat_days").is_some());
    assert_eq!(gateway.alarms().status()["relay_1"], true);
}

#[tokio::test(start_paused = true)]
async fn broken_lora_settings_keep_last_values() {
    let dir = TempDir::new().unwrap();
    class_a_settings(&dir);
    let mut gateway = Gateway::new(config(&dir), ScriptedTransport::new());
    assert_eq!(gateway.lora_settings().operating_class(), OperatingClass::A);
    let duty_cycle = gateway.battery().duty_cycle();
    assert!(!duty_cycle.always_awake);

    std::fs::write(dir.path().join("config_lora.json"), "{broken").unwrap();
    gateway.run_iteration().await.unwrap();
    assert_eq!(gateway.lora_settings().operating_class(), OperatingClass::A);
    assert_eq!(gateway.battery().duty_cycle(), duty_cycle);

    std::fs::remove_file(dir.path().join("config_lora.json")).unwrap();
    gateway.run_iteration().await.unwrap();
    assert_eq!(gateway.lora_settings().operating_class(), OperatingClass::A);
    assert_eq!(gateway.battery().duty_cycle(), duty_cycle);
}

#[tokio::test(start_paused = true)]
async fn broken_battery_settings_keep_capacity() {
    let dir = TempDir::new().unwrap();
    let settings = dir.path().join("config_battery.json");
    std::fs::write(&settings, r#"{"capacity_mah": 1200}"#).unwrap();
    let mut gateway = Gateway::new(config(&dir), ScriptedTransport::new());
    assert_eq!(gateway.battery().state().capacity_mah, 1200.0);

    std::fs::write(&settings, "{broken").unwrap();
    gateway.run_iteration().await.unwrap();
    assert_eq!(gateway.battery().state().capacity_mah, 1200.0);

    std::fs::remove_file(&settings).unwrap();
    gateway.run_iteration().await.unwrap();
    assert_eq!(gateway.battery().state().capacity_mah, 1200.0);
}
