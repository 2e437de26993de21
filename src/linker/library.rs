//! Lazily materialized library modules.
//!
//! The prebuilt library is a module in the JSON form of [`crate::ir::Module`], usually far
//! larger than what a kernel needs. [`Library`] maps the file into memory, reads the
//! module-level data (name, version, globals) eagerly and only records where each function
//! body lives. Bodies are deserialized on demand by [`Library::materialize`].

use std::{fs, ops::Range, path::Path};

use memmap2::Mmap;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::{
    ir::{Function, GlobalVariable},
    Error, Result,
};

/// Module-level view of a library file; function bodies stay raw.
#[derive(Deserialize)]
struct LibraryImage<'a> {
    name: String,
    ocl_version: u32,
    #[serde(default)]
    globals: Vec<GlobalVariable>,
    #[serde(borrow, default)]
    functions: Vec<&'a RawValue>,
}

#[derive(Deserialize)]
struct FunctionHeader {
    name: String,
}

/// A memory-mapped library module with lazily deserialized function bodies.
#[derive(Debug)]
pub struct Library {
    data: Mmap,
    name: String,
    ocl_version: u32,
    globals: Vec<GlobalVariable>,
    spans: FxHashMap<String, Range<usize>>,
    order: Vec<String>,
}

impl Library {
    /// Opens the first existing candidate of a colon-separated search path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LibraryNotFound`] naming `search_path` when no candidate exists, or the
    /// error of [`Library::open`] for the candidate that was found.
    pub fn find(search_path: &str) -> Result<Self> {
        let candidate = search_path
            .split(':')
            .filter(|p| !p.is_empty())
            .find(|p| Path::new(p).is_file())
            .ok_or_else(|| Error::LibraryNotFound(search_path.to_string()))?;
        log::debug!("library found at {candidate}");
        Self::open(candidate)
    }

    /// Maps `path` and indexes its functions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] when the file cannot be mapped, [`Error::Json`] when the
    /// module-level data does not parse and [`Error::Malformed`] for non UTF-8 content.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path.as_ref())?;
        // The library is read-only input for the lifetime of the mapping.
        let data = unsafe { Mmap::map(&file) }?;

        let text = std::str::from_utf8(&data)
            .map_err(|e| malformed_error!("library is not UTF-8: {}", e))?;
        let image: LibraryImage<'_> = serde_json::from_str(text)?;

        let base = text.as_ptr() as usize;
        let mut spans = FxHashMap::default();
        let mut order = Vec::with_capacity(image.functions.len());
        for raw in &image.functions {
            let header: FunctionHeader = serde_json::from_str(raw.get())?;
            let start = raw.get().as_ptr() as usize - base;
            spans.insert(header.name.clone(), start..start + raw.get().len());
            order.push(header.name);
        }
        let (name, ocl_version, globals) = (image.name, image.ocl_version, image.globals);
        log::debug!(
            "library '{name}': {} functions, {} globals",
            order.len(),
            globals.len()
        );

        Ok(Self {
            data,
            name,
            ocl_version,
            globals,
            spans,
            order,
        })
    }

    /// Module name recorded in the library.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Language version the library was built for.
    #[must_use]
    pub const fn ocl_version(&self) -> u32 {
        self.ocl_version
    }

    /// Library globals; always loaded.
    #[must_use]
    pub fn globals(&self) -> &[GlobalVariable] {
        &self.globals
    }

    /// Function names in file order.
    #[must_use]
    pub fn function_names(&self) -> &[String] {
        &self.order
    }

    /// Returns true when the library defines or declares `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.spans.contains_key(name)
    }

    /// Deserializes the function `name`, or returns `None` when the library lacks it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] when the stored function does not parse.
    pub fn materialize(&self, name: &str) -> Result<Option<Function>> {
        let Some(span) = self.spans.get(name) else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&self.data[span.clone()])
            .map_err(|e| malformed_error!("library function '{}' is not UTF-8: {}", name, e))?;
        let func: Function = serde_json::from_str(text)?;
        log::trace!("materialized @{name} from library '{}'", self.name);
        Ok(Some(func))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{AddressSpace, Constant, Module, Type},
        test::create_module,
    };
    use std::io::Write;

    fn library_file(module: &Module) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(module.to_json().unwrap().as_bytes()).unwrap();
        file
    }

    fn sample() -> Module {
        let mut helper = Function::new("__gen_memset_p", vec![], Type::Void);
        let entry = helper.add_block("entry");
        helper.build_at_end(entry).ret(None);
        let mut module = create_module(200, vec![helper, Function::new("sqrt", vec![], Type::F32)]);
        module.globals.push(GlobalVariable::new(
            "__ocl_math_fastpath_flag",
            Type::I32,
            AddressSpace::Global,
            Constant::int(32, 1),
        ));
        module
    }

    #[test]
    fn test_open_indexes_functions() {
        let file = library_file(&sample());
        let library = Library::open(file.path()).unwrap();
        assert_eq!(library.ocl_version(), 200);
        assert_eq!(library.function_names(), ["__gen_memset_p", "sqrt"]);
        assert_eq!(library.globals().len(), 1);
        assert!(library.contains("sqrt"));
        assert!(!library.contains("cos"));
    }

    #[test]
    fn test_materialize_on_demand() {
        let module = sample();
        let file = library_file(&module);
        let library = Library::open(file.path()).unwrap();
        let helper = library.materialize("__gen_memset_p").unwrap().unwrap();
        assert_eq!(&helper, module.function("__gen_memset_p").unwrap());
        assert!(library.materialize("cos").unwrap().is_none());
    }

    #[test]
    fn test_search_path_first_existing_wins() {
        let first = library_file(&sample());
        let mut other = sample();
        other.name = "second".into();
        let second = library_file(&other);
        let path = format!(
            "/nonexistent/lib.json:{}:{}",
            first.path().display(),
            second.path().display()
        );
        assert_eq!(Library::find(&path).unwrap().name(), "test");
    }

    #[test]
    fn test_search_path_without_candidate() {
        let path = "/nonexistent/a.json:/nonexistent/b.json";
        assert!(matches!(
            Library::find(path),
            Err(Error::LibraryNotFound(p)) if p == path
        ));
    }
}
