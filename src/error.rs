use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Builds an [`Error::Unsupported`] for the given function.
///
/// ```rust, ignore
/// return Err(unsupported!(func, "icmp {} on i{}", pred, bits));
/// ```
macro_rules! unsupported {
    ($func:expr, $msg:expr) => {
        crate::Error::Unsupported {
            function: $func.name().to_string(),
            message: $msg.to_string(),
        }
    };

    ($func:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Unsupported {
            function: $func.name().to_string(),
            message: format!($fmt, $($arg)*),
        }
    };
}

pub(crate) use malformed_error;
pub(crate) use unsupported;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every condition in this enum is fatal for the module being lowered: passes never produce a
/// partially legalized module. A pass that finds nothing to do reports `Ok(false)` instead of
/// an error.
///
/// # Error Categories
///
/// ## Legalization Errors
/// - [`Error::Unsupported`] - IR construct outside the subset the pipeline can legalize
/// - [`Error::MalformedPattern`] - Device-enqueue callee pattern that matches no known shape
/// - [`Error::Malformed`] - Internal IR inconsistency (dangling ids, broken invariants)
///
/// ## Link Errors
/// - [`Error::MissingSymbol`] - Function required during linking could not be found
/// - [`Error::LibraryNotFound`] - No candidate of the library search path exists
/// - [`Error::NoKernels`] - The kernel module defines no kernel entry point
///
/// ## I/O and Serialization Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Json`] - Module (de)serialization errors
///
/// # Examples
///
/// ```rust
/// use genlower::{Error, Pipeline, PipelineConfig, ir::Module};
///
/// let mut module = Module::new("empty", 120);
/// match Pipeline::standard(&PipelineConfig::default()).run(&mut module) {
///     Ok(report) => println!("{}", report.events.summary()),
///     Err(Error::Unsupported { function, message }) => {
///         eprintln!("cannot legalize {function}: {message}");
///     }
///     Err(e) => eprintln!("lowering failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The IR is internally inconsistent.
    ///
    /// Raised when an instruction references an id that does not exist or a structural
    /// invariant (terminated blocks, phi placement) does not hold. Includes the source
    /// location where the inconsistency was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An input pattern outside the legalizable subset.
    ///
    /// Examples are ordering comparisons on oversized integers, loop-carried oversized
    /// integers, vector intrinsics without a per-lane form and variable-index vector inserts.
    #[error("Unsupported construct in '{function}': {message}")]
    Unsupported {
        /// Function containing the construct
        function: String,
        /// What was encountered
        message: String,
    },

    /// A device-enqueue callee or block argument could not be resolved to a device function.
    #[error("Malformed block pattern in '{function}': {message}")]
    MalformedPattern {
        /// Function containing the call site
        function: String,
        /// Description of the unresolved pattern
        message: String,
    },

    /// A symbol required during linking exists neither in the library nor in the kernel module.
    #[error("Missing symbol '{0}'")]
    MissingSymbol(String),

    /// None of the candidates on the library search path exists.
    #[error("Library not found in search path '{0}'")]
    LibraryNotFound(String),

    /// The module to be linked does not define any kernel.
    #[error("Module '{0}' does not define any kernel")]
    NoKernels(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Module serialization error.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
