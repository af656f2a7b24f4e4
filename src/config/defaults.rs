use super::*;

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            topic_root: "saic".to_string(),
            keepalive_interval_seconds: 60,
            anonymized_publishing: false,
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            username: "user".to_string(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            active_interval_seconds: 30,
            inactive_interval_seconds: 86_400,
            charging_interval_seconds: 300,
            min_interval_seconds: 30,
            force_interval_seconds: 30,
            force_max_refreshes: 1,
            force_max_duration_seconds: 600,
            max_backoff_seconds: 3_600,
            request_timeout_seconds: 30,
        }
    }
}

impl Default for ReloginConfig {
    fn default() -> Self {
        Self {
            initial_delay_seconds: 30,
            max_delay_seconds: 3_600,
            expiry_margin_seconds: 60,
            login_timeout_seconds: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/evbridge.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            account: AccountConfig::default(),
            refresh: RefreshConfig::default(),
            relogin: ReloginConfig::default(),
            reconcile: ReconcileConfig::default(),
            logging: LoggingConfig::default(),
            persistence_file: None,
            charging_stations_file: None,
        }
    }
}
