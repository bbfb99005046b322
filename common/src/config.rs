use serde::{Deserialize, Serialize};

/// Serial side of the bridge: port roles, pins and baud rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Forward bytes verbatim between the ports, no datapoint processing.
    pub use_sniffer: bool,
    /// Detach UART0 from the serial monitor and use it for the MCU link.
    pub use_uart0: bool,
    pub baud_rate: u32,
    pub mcu_tx_pin: i32,
    pub mcu_rx_pin: i32,
    pub wifi_tx_pin: i32,
    pub wifi_rx_pin: i32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            use_sniffer: false,
            use_uart0: false,
            baud_rate: 9600,
            mcu_tx_pin: 17,
            mcu_rx_pin: 16,
            wifi_tx_pin: 19,
            wifi_rx_pin: 18,
        }
    }
}

impl SerialConfig {
    pub fn sanitize(&mut self) {
        if self.baud_rate == 0 {
            self.baud_rate = 9600;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub network: NetworkConfig,
    pub timezone: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            network: NetworkConfig::default(),
            timezone: "Europe/London".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn sanitize(&mut self) {
        self.serial.sanitize();
        if self.timezone.is_empty() {
            self.timezone = "Europe/London".to_string();
        }
    }
}
