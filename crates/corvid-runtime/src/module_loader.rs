//! Module loader
//!
//! Modules are IR compilation units keyed by name and shared by every
//! device. A module is parsed once when registered, loaded onto a device the
//! first time it is bound there, and unloaded from every enumerated device
//! when unregistered.

use std::collections::{HashMap, HashSet};

use corvid_backends::{ModuleIr, OptimizationLevel};

use crate::arena::Handle;
use crate::device::Device;
use crate::error::{Error, Result};

pub(crate) struct Module {
    pub(crate) ir: ModuleIr,
    loaded_on: HashSet<Handle<Device>>,
    legalized: bool,
}

impl Module {
    pub(crate) fn is_loaded_on(&self, device: Handle<Device>) -> bool {
        self.loaded_on.contains(&device)
    }
}

#[derive(Default)]
pub(crate) struct ModuleLoader {
    modules: HashMap<String, Module>,
}

impl ModuleLoader {
    /// Register and parse `text` as module `name`.
    ///
    /// Nothing stays registered when parsing fails.
    pub(crate) fn register(&mut self, name: &str, text: &str) -> Result<()> {
        if self.modules.contains_key(name) {
            return Err(Error::ModuleExists(name.to_string()));
        }

        let ir = ModuleIr::parse(name, text).map_err(|e| Error::BuildFailure {
            module: name.to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(
            module = name,
            kernels = ir.kernels.len(),
            globals = ir.globals.len(),
            "module_registered"
        );
        self.modules.insert(
            name.to_string(),
            Module {
                ir,
                loaded_on: HashSet::new(),
                legalized: false,
            },
        );
        Ok(())
    }

    /// Load module `name` onto `device` unless it is already there.
    pub(crate) fn bind(
        &mut self,
        name: &str,
        handle: Handle<Device>,
        device: &mut Device,
        level: OptimizationLevel,
    ) -> Result<()> {
        let module = self
            .modules
            .get_mut(name)
            .ok_or_else(|| Error::ModuleNotFound(name.to_string()))?;
        if module.loaded_on.contains(&handle) {
            return Ok(());
        }

        {
            let mut selected = device.select();
            selected.load_module(&module.ir)?;
            selected.set_optimization_level(level);
        }

        if !module.legalized {
            module.legalized = true;
            tracing::debug!(module = name, "module_legalized");
        }
        module.loaded_on.insert(handle);
        tracing::debug!(module = name, device = device.name(), ?level, "module_bound");
        Ok(())
    }

    /// Remove module `name`, unloading it from every device in `devices`.
    pub(crate) fn unregister<'a>(
        &mut self,
        name: &str,
        devices: impl IntoIterator<Item = &'a mut Device>,
    ) -> Result<()> {
        if !self.modules.contains_key(name) {
            return Err(Error::ModuleNotFound(name.to_string()));
        }

        for device in devices {
            device.select().unload_module(name)?;
        }
        self.modules.remove(name);
        tracing::info!(module = name, "module_unregistered");
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    #[cfg(test)]
    fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Modules currently loaded on `device`.
    pub(crate) fn loaded_on(&self, device: Handle<Device>) -> impl Iterator<Item = &ModuleIr> {
        self.modules
            .values()
            .filter(move |m| m.is_loaded_on(device))
            .map(|m| &m.ir)
    }

    #[cfg(test)]
    fn is_legalized(&self, name: &str) -> bool {
        self.modules.get(name).is_some_and(|m| m.legalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::device::Platform;
    use corvid_backends::{ReferenceDevice, ReferenceProbe};

    const TEXT: &str = r#"{ "kernels": [{ "name": "k" }], "globals": [{ "name": "g", "size": 4 }] }"#;

    fn devices(count: usize) -> (Arena<Device>, Vec<ReferenceProbe>) {
        let platform = Arena::<Platform>::new().insert(Platform {
            name: "p".into(),
            vendor: "v".into(),
            devices: Vec::new(),
        });
        let mut arena = Arena::new();
        let mut probes = Vec::new();
        for i in 0..count {
            let gpu = ReferenceDevice::gpu(format!("gpu{i}"));
            probes.push(gpu.probe());
            arena.insert(Device::new(platform, Box::new(gpu)));
        }
        (arena, probes)
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut loader = ModuleLoader::default();
        loader.register("m", TEXT).unwrap();
        let err = loader.register("m", TEXT).unwrap_err();
        assert!(matches!(err, Error::ModuleExists(_)));
    }

    #[test]
    fn test_parse_failure_leaves_nothing_registered() {
        let mut loader = ModuleLoader::default();
        let err = loader.register("bad", "not json").unwrap_err();
        assert!(matches!(err, Error::BuildFailure { .. }));
        assert!(!loader.contains("bad"));
        loader.register("bad", TEXT).unwrap();
    }

    #[test]
    fn test_bind_is_idempotent_and_legalizes_once() {
        let (mut arena, probes) = devices(1);
        let handle = arena.handles()[0];
        let mut loader = ModuleLoader::default();
        loader.register("m", TEXT).unwrap();
        assert!(!loader.is_legalized("m"));

        let device = arena.get_mut(handle).unwrap();
        loader.bind("m", handle, device, OptimizationLevel::Basic).unwrap();
        loader.bind("m", handle, device, OptimizationLevel::Basic).unwrap();

        assert!(loader.is_legalized("m"));
        assert_eq!(probes[0].loads(), vec!["m".to_string()]);
        assert_eq!(probes[0].optimization_level(), Some(OptimizationLevel::Basic));
        assert_eq!(probes[0].selects(), probes[0].unselects());
        assert_eq!(loader.loaded_on(handle).count(), 1);
    }

    #[test]
    fn test_unregister_unloads_everywhere() {
        let (mut arena, probes) = devices(2);
        let mut loader = ModuleLoader::default();
        loader.register("m", TEXT).unwrap();

        loader
            .unregister("m", arena.iter_mut().map(|(_, d)| d))
            .unwrap();
        assert!(!loader.contains("m"));
        for probe in &probes {
            assert_eq!(probe.unloads(), vec!["m".to_string()]);
            assert_eq!(probe.nesting_violations(), 0);
        }

        let err = loader
            .unregister("m", arena.iter_mut().map(|(_, d)| d))
            .unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound(_)));
    }
}
