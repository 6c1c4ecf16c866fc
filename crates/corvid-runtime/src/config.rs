//! Runtime configuration
//!
//! ```rust
//! use corvid_runtime::{DeviceKind, RuntimeConfig};
//!
//! let config = RuntimeConfig {
//!     devices: vec![DeviceKind::Emulated, DeviceKind::Emulated],
//!     ..RuntimeConfig::default()
//! };
//! assert_eq!(config.devices.len(), 2);
//! ```
//!
//! ## Environment Variables
//!
//! - `CORVID_DEVICES`: comma-separated device list, `emulated` or `host`
//! - `CORVID_OPTIMIZATION`: `none`, `debug`, `basic`, `aggressive`, `speculative` or `full`
//! - `CORVID_DIAGNOSTIC_PREFIX`: prefix stamped on every diagnostic line

use std::env;
use std::fmt;
use std::str::FromStr;

use corvid_backends::{ExecutionDevice, OptimizationLevel, ReferenceDevice};
use corvid_tracing::diagnostics::DEFAULT_PREFIX;

/// Device created when the platform is first enumerated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Emulated accelerator
    Emulated,
    /// Host-CPU-class device
    Host,
}

impl DeviceKind {
    pub(crate) fn instantiate(self, ordinal: usize) -> Box<dyn ExecutionDevice> {
        match self {
            DeviceKind::Emulated => Box::new(ReferenceDevice::gpu(format!("Corvid Emulated GPU {ordinal}"))),
            DeviceKind::Host => Box::new(ReferenceDevice::cpu(format!("Corvid Host CPU {ordinal}"))),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emulated" | "emulator" | "gpu" => Ok(DeviceKind::Emulated),
            "host" | "cpu" => Ok(DeviceKind::Host),
            other => Err(format!("unknown device kind '{other}'")),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Emulated => f.write_str("emulated"),
            DeviceKind::Host => f.write_str("host"),
        }
    }
}

/// Runtime-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub platform_name: String,
    pub platform_vendor: String,
    /// Devices of the platform, in enumeration order
    pub devices: Vec<DeviceKind>,
    /// Applied to every module as it is bound to a device
    pub optimization_level: OptimizationLevel,
    /// Stamped on every line written to the diagnostic channel
    pub diagnostic_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            platform_name: "Corvid".to_string(),
            platform_vendor: "Corvid Project".to_string(),
            devices: vec![DeviceKind::Emulated, DeviceKind::Host],
            optimization_level: OptimizationLevel::default(),
            diagnostic_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `CORVID_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("CORVID_DEVICES") {
            match value
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<Vec<DeviceKind>, _>>()
            {
                Ok(devices) if !devices.is_empty() => config.devices = devices,
                Ok(_) => tracing::warn!("CORVID_DEVICES is empty, keeping default devices"),
                Err(e) => tracing::warn!(error = %e, "ignoring CORVID_DEVICES"),
            }
        }

        if let Ok(value) = env::var("CORVID_OPTIMIZATION") {
            match value.parse() {
                Ok(level) => config.optimization_level = level,
                Err(e) => tracing::warn!(error = %e, "ignoring CORVID_OPTIMIZATION"),
            }
        }

        if let Ok(prefix) = env::var("CORVID_DIAGNOSTIC_PREFIX") {
            config.diagnostic_prefix = prefix;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        env::remove_var("CORVID_DEVICES");
        env::remove_var("CORVID_OPTIMIZATION");
        env::remove_var("CORVID_DIAGNOSTIC_PREFIX");
    }

    #[test]
    fn test_device_kind_parse() {
        assert_eq!("Emulated".parse::<DeviceKind>(), Ok(DeviceKind::Emulated));
        assert_eq!(" cpu".parse::<DeviceKind>(), Ok(DeviceKind::Host));
        assert!("fpga".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_instantiate_types() {
        use corvid_backends::DeviceType;
        assert_eq!(
            DeviceKind::Emulated.instantiate(0).properties().device_type,
            DeviceType::Gpu
        );
        assert_eq!(DeviceKind::Host.instantiate(1).properties().device_type, DeviceType::Cpu);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        assert_eq!(RuntimeConfig::from_env(), RuntimeConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("CORVID_DEVICES", "host, emulated,host");
        env::set_var("CORVID_OPTIMIZATION", "aggressive");
        env::set_var("CORVID_DIAGNOSTIC_PREFIX", ">> ");

        let config = RuntimeConfig::from_env();
        assert_eq!(
            config.devices,
            vec![DeviceKind::Host, DeviceKind::Emulated, DeviceKind::Host]
        );
        assert_eq!(config.optimization_level, OptimizationLevel::Aggressive);
        assert_eq!(config.diagnostic_prefix, ">> ");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        clear_env();
        env::set_var("CORVID_DEVICES", "quantum");
        env::set_var("CORVID_OPTIMIZATION", "ludicrous");

        let config = RuntimeConfig::from_env();
        assert_eq!(config.devices, RuntimeConfig::default().devices);
        assert_eq!(config.optimization_level, OptimizationLevel::None);
        clear_env();
    }
}
