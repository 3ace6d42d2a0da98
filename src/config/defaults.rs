use super::*;

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/serial0".to_string(),
            baud_rate: 9600,
            open_settle_ms: 1000,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            slave_id: 1,
            response_timeout_ms: 2000,
            read_poll_ms: 20,
            link_quality_timeout_ms: 250,
            frame_trailer_bytes: 0,
            timeout_cooldown_ms: 1000,
            config_pre_apply_ms: 200,
            config_settle_ms: 500,
            radio_ack_wait_ms: 1500,
            radio_retries: 3,
        }
    }
}

impl Default for BatteryModelConfig {
    fn default() -> Self {
        Self {
            sleep_current_ma: 13.0,
            active_overhead_s: 4.0,
            max_interval_s: 3600.0,
            default_capacity_mah: 3000.0,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::under("/data/loragate")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/var/log/loragate/loragate.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            link: LinkConfig::default(),
            battery: BatteryModelConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
            poll_interval_ms: 1000,
            error_cooldown_ms: 5000,
        }
    }
}
