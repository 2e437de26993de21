//! Modules: functions, globals and module-level metadata.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    ir::{AddressSpace, Constant, DataLayout, Function, Linkage, Type},
    Result,
};

/// A module-level variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVariable {
    /// Symbol name
    pub name: String,
    /// Type of the stored value
    pub ty: Type,
    /// Address space the variable lives in
    pub space: AddressSpace,
    /// Initial value; `None` for external declarations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<Constant>,
    /// Read-only variable
    #[serde(default)]
    pub constant: bool,
    /// Linkage
    #[serde(default)]
    pub linkage: Linkage,
}

impl GlobalVariable {
    /// Creates an internal global with an initializer.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type, space: AddressSpace, init: Constant) -> Self {
        Self {
            name: name.into(),
            ty,
            space,
            initializer: Some(init),
            constant: false,
            linkage: Linkage::Internal,
        }
    }
}

/// A translation unit: the unit every pass and the linker operate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module identifier
    pub name: String,
    /// Declared language version (120, 200, ...)
    pub ocl_version: u32,
    /// Function definitions and declarations
    #[serde(default)]
    pub functions: Vec<Function>,
    /// Global variables
    #[serde(default)]
    pub globals: Vec<GlobalVariable>,
    /// Kernel names for IR formats that list kernels at module level
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_list: Vec<String>,
    /// Ordered device functions reachable through block dispatch indices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_functions: Vec<String>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>, ocl_version: u32) -> Self {
        Self {
            name: name.into(),
            ocl_version,
            functions: Vec::new(),
            globals: Vec::new(),
            kernel_list: Vec::new(),
            block_functions: Vec::new(),
        }
    }

    /// Returns true when the language version supports device-side enqueue and generic pointers.
    #[must_use]
    pub const fn is_ocl20(&self) -> bool {
        self.ocl_version >= 200
    }

    /// Address size in bits.
    #[must_use]
    pub const fn pointer_bits(&self) -> u32 {
        if self.is_ocl20() {
            64
        } else {
            32
        }
    }

    /// Size/alignment model for this module.
    #[must_use]
    pub const fn layout(&self) -> DataLayout {
        DataLayout::new(self.pointer_bits() / 8)
    }

    /// Returns true when `func` is a kernel entry point.
    #[must_use]
    pub fn is_kernel(&self, func: &Function) -> bool {
        func.kernel_args.is_some() || self.kernel_list.iter().any(|k| k == func.name())
    }

    /// Names of all kernels with a body.
    #[must_use]
    pub fn kernel_names(&self) -> Vec<String> {
        self.functions
            .iter()
            .filter(|f| !f.is_declaration() && self.is_kernel(f))
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// Looks up a function by name for modification.
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name() == name)
    }

    /// Adds a function, replacing an existing declaration of the same name.
    pub fn add_function(&mut self, func: Function) {
        if let Some(slot) = self.functions.iter_mut().find(|f| f.name() == func.name()) {
            *slot = func;
        } else {
            self.functions.push(func);
        }
    }

    /// Adds a declaration unless a function of that name already exists.
    pub fn declare(&mut self, func: Function) {
        if self.function(func.name()).is_none() {
            self.functions.push(func);
        }
    }

    /// Removes and returns a function.
    pub fn remove_function(&mut self, name: &str) -> Option<Function> {
        let index = self.functions.iter().position(|f| f.name() == name)?;
        Some(self.functions.remove(index))
    }

    /// Looks up a global by name.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Looks up a global by name for modification.
    pub fn global_mut(&mut self, name: &str) -> Option<&mut GlobalVariable> {
        self.globals.iter_mut().find(|g| g.name == name)
    }

    /// Returns true when any function body or global initializer references `name`.
    #[must_use]
    pub fn is_function_referenced(&self, name: &str) -> bool {
        let in_bodies = self
            .functions
            .iter()
            .any(|f| f.referenced_functions().iter().any(|n| n == name));
        in_bodies
            || self.globals.iter().any(|g| {
                let mut functions = Vec::new();
                if let Some(init) = &g.initializer {
                    crate::ir::function::collect_symbols(init, &mut functions, &mut Vec::new());
                }
                functions.iter().any(|n| n == name)
            })
    }

    /// Parses a module from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] when the text is not a valid module.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes the module to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] when serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a module from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] or [`crate::Error::Json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Writes the module as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] or [`crate::Error::Json`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{KernelArgInfo, Param};

    #[test]
    fn test_kernel_identification_formats() {
        let mut module = Module::new("m", 120);
        let mut kernel = Function::new("k", vec![], Type::Void);
        kernel.add_block("entry");
        let mut legacy = Function::new("legacy", vec![], Type::Void);
        legacy.add_block("entry");
        let helper = Function::new("helper", vec![Param::new("x", Type::I32)], Type::I32);
        kernel.kernel_args = Some(KernelArgInfo::default());
        module.add_function(kernel);
        module.add_function(legacy);
        module.add_function(helper);
        module.kernel_list.push("legacy".into());

        assert_eq!(module.kernel_names(), vec!["k", "legacy"]);
        assert!(!module.is_kernel(module.function("helper").unwrap()));
        assert_eq!(module.pointer_bits(), 32);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut module = Module::new("m", 200);
        let mut func = Function::new("k", vec![Param::new("x", Type::I32)], Type::Void);
        let entry = func.add_block("entry");
        func.build_at_end(entry).ret(None);
        module.add_function(func);
        let text = module.to_json().unwrap();
        assert_eq!(Module::from_json(&text).unwrap(), module);
    }
}
