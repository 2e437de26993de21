//! Linking lowered kernels against a prebuilt library file.

use std::io::Write;

use genlower::{
    ir::{FloatKind, Linkage, Op},
    linker::{builtin_functions, link, Library, FASTPATH_FLAG},
    prelude::*,
};
use tempfile::NamedTempFile;

fn kernel(name: &str, callee: Option<&str>) -> Function {
    let mut func = Function::new(
        name,
        vec![Param::new("out", Type::Ptr(AddressSpace::Global))],
        Type::Void,
    );
    func.kernel_args = Some(KernelArgInfo {
        address_spaces: vec![1],
        access_quals: vec!["none".into()],
        type_names: vec!["float*".into()],
        base_type_names: vec!["float*".into()],
        type_quals: vec![String::new()],
        names: vec!["out".into()],
    });
    let entry = func.add_block("entry");
    let mut b = func.build_at_end(entry);
    if let Some(callee) = callee {
        let x = b.constant(Constant::Float {
            kind: FloatKind::Single,
            bits: u64::from(2.0f32.to_bits()),
        });
        let y = b.call(callee, vec![x], Type::F32);
        b.store(y, Value::Arg(0));
    }
    b.ret(None);
    func
}

/// A function returning its argument, optionally calling `callee` first.
fn helper(name: &str, callee: Option<&str>) -> Function {
    let mut func = Function::new(name, vec![Param::new("x", Type::F32)], Type::F32);
    let entry = func.add_block("entry");
    let mut b = func.build_at_end(entry);
    let result = match callee {
        Some(callee) => b.call(callee, vec![Value::Arg(0)], Type::F32),
        None => Value::Arg(0),
    };
    b.ret(Some(result));
    func
}

fn empty_body(name: &str) -> Function {
    let mut func = Function::new(name, vec![], Type::Void);
    let entry = func.add_block("entry");
    func.build_at_end(entry).ret(None);
    func
}

/// Library for `ocl_version` with every builtin helper, `sqrt` reading the fast path flag and
/// calling `__sqrt_impl`, and an unrelated `cos`.
fn library_module(ocl_version: u32) -> Module {
    let mut module = Module::new("libocl", ocl_version);
    for name in builtin_functions(ocl_version) {
        module.add_function(empty_body(&name));
    }
    let mut sqrt = helper("sqrt", Some("__sqrt_impl"));
    let entry = sqrt.entry();
    let mut b = InstBuilder::at(&mut sqrt, entry, 0);
    let flag = b.constant(Constant::Global {
        name: FASTPATH_FLAG.to_string(),
        space: AddressSpace::Global,
    });
    b.load(Type::I32, flag);
    module.add_function(sqrt);
    module.add_function(helper("__sqrt_impl", None));
    module.add_function(helper("cos", None));
    module.globals.push(GlobalVariable::new(
        FASTPATH_FLAG,
        Type::I32,
        AddressSpace::Global,
        Constant::int(32, 1),
    ));
    module.globals.push(GlobalVariable::new(
        "__unused_table",
        Type::array(Type::I32, 4),
        AddressSpace::Constant,
        Constant::int(32, 0),
    ));
    module
}

fn library_file(module: &Module) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(module.to_json()?.as_bytes())?;
    Ok(file)
}

fn fastpath(module: &Module) -> Option<i64> {
    match module.global(FASTPATH_FLAG)?.initializer.as_ref()? {
        Constant::Int(value) => value.to_i64(),
        _ => None,
    }
}

/// Test that only reachable library functions are pulled in and everything else is dropped
#[test]
fn test_link_pulls_reachable_functions() -> Result<()> {
    let file = library_file(&library_module(120))?;
    let library = Library::open(file.path())?;

    let mut module = Module::new("kernels", 120);
    module.add_function(kernel("k", Some("sqrt")));
    module.add_function(Function::new("sqrt", vec![Param::new("x", Type::F32)], Type::F32));

    let summary = link(&mut module, &library, false)?;
    assert!(summary.linked.contains(&"sqrt".to_string()));
    assert!(summary.linked.contains(&"__sqrt_impl".to_string()));
    assert!(module.function("sqrt").is_some_and(|f| !f.is_declaration()));
    assert!(module.function("cos").is_none());
    assert!(module.global("__unused_table").is_none());
    assert!(summary.removed.contains(&"__unused_table".to_string()));
    assert_eq!(module.function("__gen_memcpy_gg").map(|f| f.linkage), Some(Linkage::External));
    assert_eq!(module.function("__sqrt_impl").map(|f| f.linkage), Some(Linkage::Internal));
    assert_eq!(module.function("k").map(|f| f.linkage), Some(Linkage::External));
    Ok(())
}

/// Test that the kernel module's own definitions win over the library
#[test]
fn test_module_definition_wins() -> Result<()> {
    let file = library_file(&library_module(120))?;
    let library = Library::open(file.path())?;

    let mut module = Module::new("kernels", 120);
    module.add_function(kernel("k", Some("sqrt")));
    module.add_function(helper("sqrt", None));

    let summary = link(&mut module, &library, false)?;
    assert!(!summary.linked.contains(&"sqrt".to_string()));
    assert!(module.function("__sqrt_impl").is_none());
    let sqrt = module.function("sqrt").unwrap();
    assert!(sqrt
        .live_insts()
        .into_iter()
        .all(|id| !matches!(sqrt.inst(id).op, Op::Call { .. })));
    Ok(())
}

/// Test that strict math clears the fast path flag
#[test]
fn test_strict_math_flag() -> Result<()> {
    let file = library_file(&library_module(120))?;
    let library = Library::open(file.path())?;

    for (strict, expected) in [(false, 1), (true, 0)] {
        let mut module = Module::new("kernels", 120);
        module.add_function(kernel("k", Some("sqrt")));
        link(&mut module, &library, strict)?;
        assert_eq!(fastpath(&module), Some(expected));
    }
    Ok(())
}

/// Test that a function defined nowhere is reported by name
#[test]
fn test_missing_symbol() -> Result<()> {
    let file = library_file(&library_module(120))?;
    let library = Library::open(file.path())?;

    let mut module = Module::new("kernels", 120);
    module.add_function(kernel("k", Some("tanh")));
    assert!(matches!(
        link(&mut module, &library, false),
        Err(Error::MissingSymbol(name)) if name == "tanh"
    ));
    Ok(())
}

/// Test that a declaration defined nowhere is kept and reported as a warning
#[test]
fn test_undefined_declaration_warns() -> Result<()> {
    let file = library_file(&library_module(120))?;
    let library = Library::open(file.path())?;

    let mut module = Module::new("kernels", 120);
    module.add_function(kernel("k", Some("mystery")));
    module.add_function(Function::new("mystery", vec![Param::new("x", Type::F32)], Type::F32));
    let summary = link(&mut module.clone(), &library, false)?;
    assert_eq!(summary.undefined, vec!["mystery".to_string()]);

    let config = PipelineConfig::with_library(file.path().display().to_string());
    let report = Pipeline::standard(&config).run(&mut module)?;
    let warnings: Vec<_> = report.events.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].function.as_deref(), Some("mystery"));
    assert!(module.function("mystery").is_some_and(Function::is_declaration));
    Ok(())
}

/// Test that the 2.0 builtin set is required for 2.0 modules
#[test]
fn test_generic_builtins_required_for_ocl20() -> Result<()> {
    let file = library_file(&library_module(120))?;
    let library = Library::open(file.path())?;

    let mut module = Module::new("kernels", 200);
    module.add_function(kernel("k", None));
    assert!(matches!(
        link(&mut module, &library, false),
        Err(Error::MissingSymbol(name)) if name == "__gen_memcpy_gn"
    ));

    let file = library_file(&library_module(200))?;
    let library = Library::open(file.path())?;
    let mut module = Module::new("kernels", 200);
    module.add_function(kernel("k", None));
    link(&mut module, &library, false)?;
    assert!(module.function("__gen_memcpy_nn_align").is_some());
    Ok(())
}

/// Test that a module without kernels cannot be linked
#[test]
fn test_no_kernels() -> Result<()> {
    let file = library_file(&library_module(120))?;
    let library = Library::open(file.path())?;

    let mut module = Module::new("helpers", 120);
    module.add_function(helper("f", None));
    assert!(matches!(
        link(&mut module, &library, false),
        Err(Error::NoKernels(name)) if name == "helpers"
    ));
    Ok(())
}

/// Test the linker as the last pipeline stage, found through a search path
#[test]
fn test_pipeline_links_through_search_path() -> Result<()> {
    let file = library_file(&library_module(200))?;
    let search_path = format!("/nonexistent/libocl.json:{}", file.path().display());

    let mut module = Module::new("kernels", 200);
    module.add_function(kernel("k", Some("sqrt")));
    let config = PipelineConfig::with_library(search_path).strict_math(true);
    let report = Pipeline::standard(&config).run(&mut module)?;

    assert!(report.changed.contains(&"library-link"));
    assert!(report.events.count_kind(EventKind::FunctionLinked) > 0);
    assert_eq!(fastpath(&module), Some(0));
    assert!(module.function("__sqrt_impl").is_some());
    Ok(())
}

/// Test that a search path without any existing file is reported
#[test]
fn test_pipeline_without_library() {
    let mut module = Module::new("kernels", 120);
    module.add_function(kernel("k", None));
    let config = PipelineConfig::with_library("/nonexistent/a.json:/nonexistent/b.json");
    assert!(matches!(
        Pipeline::standard(&config).run(&mut module),
        Err(Error::LibraryNotFound(path)) if path.contains("/nonexistent/b.json")
    ));
}
