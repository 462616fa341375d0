//! JSON device registry.
//!
//! The registry is a small document listing known devices and a free-form
//! `system` section:
//!
//! ```json
//! {
//!     "devices": [
//!         { "ip": "10.0.0.5", "name": "camera", "pub_port": 5557, "rep_port": 5556 }
//!     ],
//!     "system": {}
//! }
//! ```
//!
//! Names are unique regardless of case. Two devices on the same host can't
//! share a port, whatever role the port plays. Both rules are checked when
//! a device is added; a hand-edited file is loaded as is.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::error::{Error, Result};
use crate::value::Value;

/// Single registry entry.
///
/// Unknown keys found in the file are kept in `extra` and written back on
/// save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub ip: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_port: Option<u16>,
    pub rep_port: u16,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl DeviceEntry {
    pub fn new(name: &str, ip: &str, rep_port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            name: name.to_string(),
            pub_port: None,
            pull_port: None,
            push_port: None,
            rep_port,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_pub_port(mut self, port: u16) -> Self {
        self.pub_port = Some(port);
        self
    }

    pub fn with_push_port(mut self, port: u16) -> Self {
        self.push_port = Some(port);
        self
    }

    pub fn with_pull_port(mut self, port: u16) -> Self {
        self.pull_port = Some(port);
        self
    }

    /// All ports used by this device, labelled by role.
    pub fn ports(&self) -> Vec<(&'static str, u16)> {
        let mut ports = vec![("rep_port", self.rep_port)];
        if let Some(p) = self.pub_port {
            ports.push(("pub_port", p));
        }
        if let Some(p) = self.push_port {
            ports.push(("push_port", p));
        }
        if let Some(p) = self.pull_port {
            ports.push(("pull_port", p));
        }
        ports
    }

    /// Request/reply address in `host:port` form.
    pub fn rep_address(&self) -> String {
        format!("{}:{}", self.ip, self.rep_port)
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    devices: Vec<DeviceEntry>,
    #[serde(default)]
    system: serde_json::Map<String, Value>,
}

fn with_json_extension(path: &Path) -> PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().is_none() {
        path.set_extension("json");
    }
    path
}

/// In-memory view of a registry file.
#[derive(Debug, Default)]
pub struct Registry {
    path: Option<PathBuf>,
    file: RegistryFile,
}

impl Registry {
    /// Creates an empty registry not backed by any file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the registry at `path`, creating an empty one (and any missing
    /// parent directories) if the file doesn't exist. A path without an
    /// extension refers to the same `.json` file [`save_as`](Self::save_as)
    /// writes.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = with_json_extension(path.as_ref());
        if !path.exists() {
            info!("registry not found at {:?}, creating an empty one", path);
            let registry = Registry {
                path: Some(path),
                file: RegistryFile::default(),
            };
            registry.save()?;
            return Ok(registry);
        }
        let text = fs::read_to_string(&path)?;
        let mut registry = Self::from_json(&text)?;
        registry.path = Some(path);
        Ok(registry)
    }

    /// Parses a registry document without attaching it to a file.
    pub fn from_json(text: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(text)?;
        Ok(Registry { path: None, file })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rewrites the whole backing file.
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.save_as(path),
            None => Err(Error::Other("registry has no backing file".to_string())),
        }
    }

    /// Writes the registry to `path`, adding a `.json` extension if the
    /// path has none.
    pub fn save_as(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = with_json_extension(path.as_ref());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&path, self.to_json()?)?;
        debug!("saved registry to {:?}", path);
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.file.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| Error::Other(e.to_string()))
    }

    pub fn devices(&self) -> &[DeviceEntry] {
        &self.file.devices
    }

    /// Devices whose ip and name contain the given filters. `"*"` or an
    /// empty string matches anything.
    pub fn get_devices(&self, ip: &str, name: &str) -> Vec<&DeviceEntry> {
        let name = name.to_lowercase();
        self.file
            .devices
            .iter()
            .filter(|d| ip.is_empty() || ip == "*" || d.ip.contains(ip))
            .filter(|d| name.is_empty() || name == "*" || d.name.to_lowercase().contains(&name))
            .collect()
    }

    pub fn get_device_names(&self) -> Vec<String> {
        self.file.devices.iter().map(|d| d.name.clone()).collect()
    }

    pub fn get_device(&self, name: &str) -> Result<&DeviceEntry> {
        self.file
            .devices
            .iter()
            .find(|d| d.name_matches(name))
            .ok_or_else(|| Error::RegistryNotFound(name.to_string()))
    }

    pub fn device_exists(&self, name: &str) -> bool {
        self.file.devices.iter().any(|d| d.name_matches(name))
    }

    /// Adds a device, refusing name or address collisions.
    pub fn add_device(&mut self, entry: DeviceEntry) -> Result<()> {
        for existing in &self.file.devices {
            if existing.name_matches(&entry.name) {
                return Err(Error::ConfigConflict(format!(
                    "device named {} already exists",
                    existing.name
                )));
            }
            if !existing.ip.eq_ignore_ascii_case(&entry.ip) {
                continue;
            }
            for (role, port) in entry.ports() {
                if let Some((other_role, _)) =
                    existing.ports().into_iter().find(|(_, p)| *p == port)
                {
                    return Err(Error::ConfigConflict(format!(
                        "{} {}:{} already used as {} by {}",
                        role, entry.ip, port, other_role, existing.name
                    )));
                }
            }
        }
        debug!("adding device {} at {}", entry.name, entry.rep_address());
        self.file.devices.push(entry);
        Ok(())
    }

    pub fn remove_device(&mut self, name: &str) -> Result<DeviceEntry> {
        let idx = self
            .file
            .devices
            .iter()
            .position(|d| d.name_matches(name))
            .ok_or_else(|| Error::RegistryNotFound(name.to_string()))?;
        Ok(self.file.devices.remove(idx))
    }

    pub fn system(&self) -> &serde_json::Map<String, Value> {
        &self.file.system
    }

    pub fn get_system_var(&self, key: &str) -> Result<&Value> {
        self.file
            .system
            .get(key)
            .ok_or_else(|| Error::SystemVarNotFound(key.to_string()))
    }

    pub fn set_system_var(&mut self, key: &str, value: Value) {
        self.file.system.insert(key.to_string(), value);
    }

    pub fn remove_system_var(&mut self, key: &str) -> Result<Value> {
        self.file
            .system
            .remove(key)
            .ok_or_else(|| Error::SystemVarNotFound(key.to_string()))
    }
}
