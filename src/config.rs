//! Configuration for the accelerator context and the emulated backend

use serde::{Deserialize, Serialize};

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Elements summed per reduction work item. `None` asks the device.
    pub reduction_group_size: Option<usize>,
    /// Check the kernel library for complete, unambiguous coverage at start-up
    pub validate_library: bool,
}

impl AcceleratorConfig {
    pub fn new(reduction_group_size: Option<usize>, validate_library: bool) -> Self {
        Self {
            reduction_group_size,
            validate_library,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self::new(None, true)
    }
}

/// Settings for the in-process emulated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Reported device name
    pub device_name: String,
    /// Reported maximum work-group size
    pub max_work_group_size: usize,
    /// Largest buffer the device will allocate, in elements
    pub max_buffer_elements: usize,
}

impl EmulatorConfig {
    pub fn new(device_name: impl Into<String>, max_work_group_size: usize, max_buffer_elements: usize) -> Self {
        Self {
            device_name: device_name.into(),
            max_work_group_size,
            max_buffer_elements,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self::new("emulated-device", 256, 1 << 26)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_json_round_trip() {
        let config = EmulatorConfig::new("test", 64, 1024);
        let json = config.to_json().unwrap();
        assert_eq!(EmulatorConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = EmulatorConfig::from_json(r#"{ "max_work_group_size": 32 }"#).unwrap();
        assert_eq!(config.max_work_group_size, 32);
        assert_eq!(config.device_name, "emulated-device");

        let accel = AcceleratorConfig::from_json("{}").unwrap();
        assert_eq!(accel, AcceleratorConfig::default());
    }
}
