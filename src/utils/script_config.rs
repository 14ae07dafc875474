// src/utils/script_config.rs
//! Module and service descriptors
//!
//! Read from `<config_path>/scripts/module_conf.json` and
//! `<config_path>/scripts/service_conf.json`:
//!
//! ```json
//! {
//!   "path": "services",
//!   "preload": ["metrics"],
//!   "privilegedServices": ["Billing"],
//!   "deny": ["Debug"],
//!   "map": { "Billing": "billing_v2" },
//!   "initArguments": { "metrics": { "interval": 10 } }
//! }
//! ```

use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Descriptor shared by modules and services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptDescriptor {
    /// Script directory, resolved against `scripts_path` once loaded
    pub path: PathBuf,

    /// Names resolved eagerly at startup
    pub preload: Vec<String>,

    /// When present, only these names may be resolved
    pub allow: Option<Vec<String>>,

    /// Names that may never be resolved
    pub deny: Option<Vec<String>>,

    /// Logical name -> script name
    pub map: HashMap<String, String>,

    /// Per-name setup arguments
    pub init_arguments: HashMap<String, Value>,

    /// Services whose setup runs with elevated host access
    pub privileged_services: Vec<String>,
}

impl ScriptDescriptor {
    /// Whether `name` passes the allow/deny lists
    pub fn permits(&self, name: &str) -> bool {
        if let Some(deny) = &self.deny {
            if deny.iter().any(|d| d == name) {
                return false;
            }
        }
        match &self.allow {
            Some(allow) => allow.iter().any(|a| a == name),
            None => true,
        }
    }

    /// Script name a logical name maps to
    pub fn script_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.map.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Setup arguments for `name`, an empty object when none are configured
    pub fn init_arguments_for(&self, name: &str) -> Value {
        self.init_arguments
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    pub fn is_privileged(&self, name: &str) -> bool {
        self.privileged_services.iter().any(|p| p == name)
    }

    /// Directory holding the scripts for `name`
    pub fn script_dir(&self, name: &str) -> PathBuf {
        self.path.join(self.script_name(name))
    }

    fn read(path: &Path, default_dir: &str, scripts_path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ScriptError::io(path, e))?;
        let mut descriptor: ScriptDescriptor = serde_json::from_str(&raw).map_err(|e| {
            ScriptError::ConfigError(format!("malformed descriptor {}: {}", path.display(), e))
        })?;

        let relative = if descriptor.path.as_os_str().is_empty() {
            PathBuf::from(default_dir)
        } else {
            std::mem::take(&mut descriptor.path)
        };
        descriptor.path = scripts_path.join(relative);

        debug!(
            "Loaded descriptor {} ({} preload)",
            path.display(),
            descriptor.preload.len()
        );
        Ok(descriptor)
    }
}

/// Resolved script configuration handed to the engine at init
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub module: ScriptDescriptor,
    pub service: ScriptDescriptor,
    pub config: RuntimeConfig,
}

impl ScriptConfig {
    /// Read both descriptor files for `config`
    pub fn load(config: &RuntimeConfig) -> Result<Self> {
        let module =
            ScriptDescriptor::read(&config.module_conf_path(), "modules", &config.scripts_path)?;
        let service =
            ScriptDescriptor::read(&config.service_conf_path(), "services", &config.scripts_path)?;

        Ok(Self {
            module,
            service,
            config: config.clone(),
        })
    }

    /// JSON form published into the `system` namespace
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_descriptors(dir: &Path, module: &str, service: &str) -> RuntimeConfig {
        let scripts = dir.join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("module_conf.json"), module).unwrap();
        fs::write(scripts.join("service_conf.json"), service).unwrap();
        RuntimeConfig {
            config_path: dir.to_path_buf(),
            scripts_path: PathBuf::from("/srv/scripts"),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_descriptors(
            dir.path(),
            r#"{"preload": ["Alert"]}"#,
            r#"{"path": "svc", "preload": ["metrics"], "privilegedServices": ["Billing"]}"#,
        );

        let script_config = ScriptConfig::load(&config).unwrap();
        assert_eq!(script_config.module.path, PathBuf::from("/srv/scripts/modules"));
        assert_eq!(script_config.module.preload, vec!["Alert".to_string()]);
        assert_eq!(script_config.service.path, PathBuf::from("/srv/scripts/svc"));
        assert!(script_config.service.is_privileged("Billing"));
        assert!(!script_config.service.is_privileged("metrics"));
    }

    #[test]
    fn test_missing_descriptor_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            config_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let err = ScriptConfig::load(&config).unwrap_err();
        assert!(matches!(err, ScriptError::Io { .. }));
    }

    #[test]
    fn test_malformed_descriptor_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_descriptors(dir.path(), "{not json", "{}");
        let err = ScriptConfig::load(&config).unwrap_err();
        assert!(matches!(err, ScriptError::ConfigError(_)));
    }

    #[test]
    fn test_allow_deny_map() {
        let descriptor: ScriptDescriptor = serde_json::from_str(
            r#"{"deny": ["Debug"], "map": {"Billing": "billing_v2"}, "initArguments": {"Billing": {"currency": "MYR"}}}"#,
        )
        .unwrap();
        assert!(!descriptor.permits("Debug"));
        assert!(descriptor.permits("Billing"));
        assert_eq!(descriptor.script_name("Billing"), "billing_v2");
        assert_eq!(descriptor.script_name("Other"), "Other");
        assert_eq!(descriptor.init_arguments_for("Billing")["currency"], "MYR");
        assert!(descriptor.init_arguments_for("Other").as_object().unwrap().is_empty());

        let allow_only: ScriptDescriptor = serde_json::from_str(r#"{"allow": ["Alert"]}"#).unwrap();
        assert!(allow_only.permits("Alert"));
        assert!(!allow_only.permits("CallTest"));
    }
}
