//! Device directory backed by the JSON registry.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use zro_core::{DeviceEntry, Registry};

use crate::platform::PlatformInfo;
use crate::{Context, DeviceProxy, Error, Result};

/// Outcome of pinging a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ping {
    /// Mean round trip time over the successful attempts.
    Latency(Duration),
    /// Every attempt failed.
    Unreachable,
}

impl Ping {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Ping::Latency(_))
    }
}

impl fmt::Display for Ping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ping::Latency(d) => write!(f, "{:.3} ms", d.as_secs_f64() * 1000.0),
            Ping::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Resolves device names to proxies and reports on their health.
///
/// Every name based call fails with `RegistryNotFound` for names missing
/// from the registry, before any network traffic happens.
pub struct DeviceManager {
    ctx: Context,
    registry: Registry,
}

impl DeviceManager {
    pub fn new(ctx: &Context, registry: Registry) -> Self {
        Self {
            ctx: ctx.clone(),
            registry,
        }
    }

    /// Loads the registry at `path`, creating an empty one if missing.
    pub fn load(ctx: &Context, path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(ctx, Registry::load(path)?))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn get_device_info(&self, name: &str) -> Result<&DeviceEntry> {
        Ok(self.registry.get_device(name)?)
    }

    pub fn get_devices(&self, ip: &str, name: &str) -> Vec<&DeviceEntry> {
        self.registry.get_devices(ip, name)
    }

    pub fn get_device_names(&self) -> Vec<String> {
        self.registry.get_device_names()
    }

    pub fn device_exists(&self, name: &str) -> bool {
        self.registry.device_exists(name)
    }

    pub fn get_proxy(&self, name: &str, timeout: Duration) -> Result<DeviceProxy> {
        let entry = self.get_device_info(name)?;
        DeviceProxy::connect(&self.ctx, &entry.rep_address(), timeout)
    }

    /// True if the device answers within `timeout`.
    pub fn device_active(&self, name: &str, timeout: Duration) -> Result<bool> {
        let mut proxy = self.get_proxy(name, timeout)?;
        Ok(proxy.ping().is_ok())
    }

    /// Runs `attempts` lightweight round trips and averages the successful
    /// ones.
    pub fn ping_device(&self, name: &str, timeout: Duration, attempts: u32) -> Result<Ping> {
        let mut proxy = self.get_proxy(name, timeout)?;
        let mut times = Vec::with_capacity(attempts as usize);
        for _ in 0..attempts {
            match proxy.ping() {
                Ok(t) => times.push(t),
                Err(e) => debug!("ping of {} failed: {}", name, e),
            }
        }
        if times.is_empty() {
            return Ok(Ping::Unreachable);
        }
        let total: Duration = times.iter().sum();
        Ok(Ping::Latency(total / times.len() as u32))
    }

    pub fn ping_all_devices(
        &self,
        timeout: Duration,
        attempts: u32,
    ) -> Result<BTreeMap<String, Ping>> {
        let mut pings = BTreeMap::new();
        for name in self.get_device_names() {
            let ping = self.ping_device(&name, timeout, attempts)?;
            pings.insert(name, ping);
        }
        Ok(pings)
    }

    pub fn get_uptime(&self, name: &str, timeout: Duration) -> Result<Duration> {
        self.get_proxy(name, timeout)?.uptime()
    }

    pub fn get_platform_info(&self, name: &str, timeout: Duration) -> Result<PlatformInfo> {
        self.get_proxy(name, timeout)?.platform_info()
    }

    /// Registers a device and saves the registry. Nothing changes if the
    /// registry can't be saved.
    pub fn add_device(&mut self, entry: DeviceEntry) -> Result<()> {
        self.ensure_backed()?;
        let name = entry.name.clone();
        self.registry.add_device(entry)?;
        if let Err(e) = self.registry.save() {
            self.registry.remove_device(&name)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Unregisters a device and saves the registry. Nothing changes if the
    /// registry can't be saved.
    pub fn remove_device(&mut self, name: &str) -> Result<DeviceEntry> {
        self.ensure_backed()?;
        let entry = self.registry.remove_device(name)?;
        if let Err(e) = self.registry.save() {
            self.registry.add_device(entry)?;
            return Err(e.into());
        }
        Ok(entry)
    }

    fn ensure_backed(&self) -> Result<()> {
        match self.registry.path() {
            Some(_) => Ok(()),
            None => Err(Error::Other("registry has no file to save to".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zro_core::ErrorCode;

    fn manager() -> DeviceManager {
        let mut registry = Registry::new();
        registry
            .add_device(DeviceEntry::new("Camera", "127.0.0.1", 1))
            .unwrap();
        DeviceManager::new(&Context::new(), registry)
    }

    #[test]
    fn unknown_names_are_not_found() {
        let m = manager();
        let t = Duration::from_millis(50);
        let codes = vec![
            m.get_proxy("stage", t).err().map(|e| e.code()),
            m.device_active("stage", t).err().map(|e| e.code()),
            m.ping_device("stage", t, 1).err().map(|e| e.code()),
            m.get_uptime("stage", t).err().map(|e| e.code()),
            m.get_platform_info("stage", t).err().map(|e| e.code()),
        ];
        for code in codes {
            assert_eq!(code, Some(ErrorCode::RegistryNotFound));
        }
    }

    #[test]
    fn lookups_ignore_case() {
        let m = manager();
        assert!(m.device_exists("camera"));
        let proxy = m.get_proxy("CAMERA", Duration::from_millis(50)).unwrap();
        assert_eq!(proxy.address(), "tcp://127.0.0.1:1");
    }

    #[test]
    fn unsaved_registry_is_left_untouched() {
        let mut m = manager();
        assert!(m.add_device(DeviceEntry::new("Stage", "127.0.0.1", 2)).is_err());
        assert!(!m.device_exists("stage"));
        assert!(m.remove_device("camera").is_err());
        assert!(m.device_exists("camera"));
    }

    #[test]
    fn changes_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let mut m = DeviceManager::new(&Context::new(), Registry::load(&path).unwrap());
        m.add_device(DeviceEntry::new("Stage", "127.0.0.1", 2)).unwrap();
        assert!(Registry::load(&path).unwrap().get_device("stage").is_ok());
        m.remove_device("stage").unwrap();
        assert!(Registry::load(&path).unwrap().devices().is_empty());
    }

    #[test]
    fn dead_device_pings_unreachable() {
        let m = manager();
        let ping = m.ping_device("camera", Duration::from_millis(50), 2).unwrap();
        assert_eq!(ping, Ping::Unreachable);
        assert!(!m.device_active("camera", Duration::from_millis(50)).unwrap());
    }
}
