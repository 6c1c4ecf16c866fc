//! Intermediate-representation module model
//!
//! Modules arrive pre-translated as JSON documents. The runtime only needs
//! their interface: each kernel's ordered parameter list (size and alignment
//! per parameter) and the module-scope globals a device must mirror.
//!
//! ```json
//! {
//!   "kernels": [
//!     {
//!       "name": "saxpy",
//!       "params": [
//!         { "name": "n", "type": { "kind": "scalar", "type": "u32" } },
//!         { "name": "a", "type": { "kind": "scalar", "type": "f32" } },
//!         { "name": "x", "type": { "kind": "device_ptr" } },
//!         { "name": "y", "type": { "kind": "device_ptr" } }
//!       ]
//!     }
//!   ],
//!   "globals": [ { "name": "lut", "size": 64 } ]
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::device::POINTER_SIZE;
use crate::error::{BackendError, Result};

/// Scalar parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ScalarType {
    pub const fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

/// Declared type of a kernel parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamType {
    Scalar {
        #[serde(rename = "type")]
        scalar_type: ScalarType,
    },
    /// Address of a device allocation
    DevicePtr,
    /// Aggregate passed by value
    Bytes { size: usize, align: usize },
}

impl ParamType {
    pub fn size(&self) -> usize {
        match self {
            Self::Scalar { scalar_type } => scalar_type.size(),
            Self::DevicePtr => POINTER_SIZE,
            Self::Bytes { size, .. } => *size,
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            Self::Scalar { scalar_type } => scalar_type.size(),
            Self::DevicePtr => POINTER_SIZE,
            Self::Bytes { align, .. } => *align,
        }
    }
}

/// One declared kernel parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
}

impl ParamDecl {
    pub fn size(&self) -> usize {
        self.param_type.size()
    }

    pub fn alignment(&self) -> usize {
        self.param_type.alignment()
    }
}

/// Kernel entry point signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
}

/// Module-scope global variable mirrored on every device the module is loaded on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: String,
    pub size: usize,
    /// Initial contents; zero-filled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct ModuleDocument {
    #[serde(default)]
    kernels: Vec<KernelSignature>,
    #[serde(default)]
    globals: Vec<GlobalDecl>,
}

/// A parsed module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIr {
    pub name: String,
    pub kernels: Vec<KernelSignature>,
    pub globals: Vec<GlobalDecl>,
    /// Text the module was parsed from
    pub source: String,
}

impl ModuleIr {
    /// Parse `text` as the module `name`.
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let document: ModuleDocument = serde_json::from_str(text).map_err(|e| BackendError::parse(name, e))?;

        let mut seen = HashSet::new();
        for kernel in &document.kernels {
            if !seen.insert(kernel.name.as_str()) {
                return Err(BackendError::parse(name, format!("duplicate kernel '{}'", kernel.name)));
            }
            for (index, param) in kernel.params.iter().enumerate() {
                let align = param.alignment();
                if param.size() == 0 || align == 0 || !align.is_power_of_two() {
                    return Err(BackendError::parse(
                        name,
                        format!(
                            "kernel '{}' parameter {index}: size {} / alignment {align} is not a valid layout",
                            kernel.name,
                            param.size()
                        ),
                    ));
                }
            }
        }

        let mut seen = HashSet::new();
        for global in &document.globals {
            if !seen.insert(global.name.as_str()) {
                return Err(BackendError::parse(name, format!("duplicate global '{}'", global.name)));
            }
            if let Some(init) = &global.init {
                if init.len() > global.size {
                    return Err(BackendError::parse(
                        name,
                        format!("global '{}' initializer exceeds its size {}", global.name, global.size),
                    ));
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            kernels: document.kernels,
            globals: document.globals,
            source: text.to_string(),
        })
    }

    pub fn kernel(&self, name: &str) -> Option<&KernelSignature> {
        self.kernels.iter().find(|k| k.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalDecl> {
        self.globals.iter().find(|g| g.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAXPY: &str = r#"{
        "kernels": [{
            "name": "saxpy",
            "params": [
                { "name": "n", "type": { "kind": "scalar", "type": "u32" } },
                { "name": "x", "type": { "kind": "device_ptr" } },
                { "name": "s", "type": { "kind": "bytes", "size": 12, "align": 4 } }
            ]
        }],
        "globals": [{ "name": "lut", "size": 4, "init": [1, 2] }]
    }"#;

    #[test]
    fn test_parse_module() {
        let module = ModuleIr::parse("m", SAXPY).unwrap();
        let kernel = module.kernel("saxpy").unwrap();
        let layout: Vec<_> = kernel.params.iter().map(|p| (p.size(), p.alignment())).collect();
        assert_eq!(layout, vec![(4, 4), (8, 8), (12, 4)]);
        assert_eq!(module.global("lut").unwrap().size, 4);
        assert_eq!(module.source, SAXPY);
    }

    #[test]
    fn test_empty_document_is_valid() {
        let module = ModuleIr::parse("empty", "{}").unwrap();
        assert!(module.kernels.is_empty());
        assert!(module.globals.is_empty());
    }

    #[test]
    fn test_rejects_malformed_text() {
        let err = ModuleIr::parse("bad", "kernel void f() {}").unwrap_err();
        assert!(matches!(err, BackendError::Parse { ref module, .. } if module == "bad"));
    }

    #[test]
    fn test_rejects_bad_alignment() {
        let text = r#"{"kernels":[{"name":"k","params":[{"type":{"kind":"bytes","size":8,"align":3}}]}]}"#;
        assert!(ModuleIr::parse("m", text).is_err());
    }

    #[test]
    fn test_rejects_duplicate_kernel() {
        let text = r#"{"kernels":[{"name":"k"},{"name":"k"}]}"#;
        assert!(ModuleIr::parse("m", text).is_err());
    }

    #[test]
    fn test_rejects_oversized_initializer() {
        let text = r#"{"globals":[{"name":"g","size":1,"init":[1,2]}]}"#;
        assert!(ModuleIr::parse("m", text).is_err());
    }
}
