use thiserror::Error;

use crate::emulation::EmulationError;

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

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure detected while weaving a module is fatal for the whole module: the weaver
/// never hands back a partially instrumented result, and the task layer never writes an
/// output file after an error has been raised.
///
/// # Error Categories
///
/// ## Declaration Errors
/// - [`Error::InvalidPattern`] - A type or member target pattern could not be parsed
/// - [`Error::AspectVisibility`] - An aspect type is not reachable from its use sites
/// - [`Error::ConflictingDeclaration`] - An aspect sets both `Exclude` and `Replace`
/// - [`Error::UnsupportedAttributeValue`] - An annotation argument cannot be emitted
///
/// ## Resolution Errors
/// - [`Error::AssemblyResolution`] - A referenced module could not be located or loaded
/// - [`Error::TypeNotFound`] - A type identity could not be resolved
/// - [`Error::MemberNotFound`] - A field, property or method could not be resolved
///
/// ## Structural Errors
/// - [`Error::Malformed`] - A method body or module violates a structural rule
///
/// ## Configuration and I/O Errors
/// - [`Error::SigningKey`] - The strong-name key input is unusable
/// - [`Error::InvalidConfig`] - The weave configuration is incomplete or inconsistent
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Json`] - Module or symbol file serialization errors
///
/// ## Execution Errors
/// - [`Error::Emulation`] - The runtime interpreter hit a fault while executing a body
///
/// # Examples
///
/// ```rust,no_run
/// use aspectweave::{Error, WeaveConfig, WeaveTask};
///
/// let config = WeaveConfig::new("Sample.module.json");
/// match WeaveTask::new(config).run() {
///     Ok(outcome) => println!("{outcome}"),
///     Err(Error::AspectVisibility(message)) => eprintln!("{message}"),
///     Err(Error::InvalidPattern { pattern, reason }) => {
///         eprintln!("bad target pattern '{pattern}': {reason}");
///     }
///     Err(e) => eprintln!("weaving failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Declaration errors
    /// A `TypeTargets` or `MemberTargets` pattern could not be parsed.
    ///
    /// This error occurs when a regular expression pattern lacks its closing `/`
    /// delimiter, carries an unknown flag, or does not compile.
    ///
    /// # Fields
    ///
    /// * `pattern` - The pattern text as it appeared in the annotation
    /// * `reason` - Why the pattern was rejected
    #[error("Invalid target pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern text
        pattern: String,
        /// Human readable reason
        reason: String,
    },

    /// An aspect type is declared with a visibility that generated code cannot reach.
    ///
    /// Aspect types must be public or internal. A nested private aspect type fails the
    /// whole module.
    #[error("Aspect {0} must be declared as public or internal.")]
    AspectVisibility(String),

    /// An aspect declaration sets both `Exclude` and `Replace`.
    ///
    /// The combination has no defined meaning and is rejected at discovery time.
    #[error("Aspect {0} cannot set both Exclude and Replace")]
    ConflictingDeclaration(String),

    /// An annotation argument uses a value shape the initializer cannot emit.
    ///
    /// This happens for nested or multi-dimensional arrays and for values whose declared
    /// type disagrees with the stored value.
    #[error("Unsupported attribute value - {0}")]
    UnsupportedAttributeValue(String),

    // Resolution errors
    /// A referenced module could not be located or loaded.
    ///
    /// During aspect discovery this is not fatal: an attribute whose type lives in an
    /// unresolvable module is treated as "not an aspect".
    #[error("Failed to resolve assembly - {0}")]
    AssemblyResolution(String),

    /// A type identity could not be resolved in the module or any of its references.
    #[error("Failed to find type - {0}")]
    TypeNotFound(String),

    /// A field, property or method could not be found along a type's base chain.
    #[error("Failed to find member - {0}")]
    MemberNotFound(String),

    // Structural errors
    /// The module or a method body is structurally invalid.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
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

    // Configuration and I/O errors
    /// The strong-name key input cannot be used to re-sign the module.
    ///
    /// The message names the remediation, e.g. converting a `.pfx` container into a raw
    /// `.snk` key pair.
    #[error("{0}")]
    SigningKey(String),

    /// The weave configuration is incomplete or inconsistent.
    #[error("Invalid configuration - {0}")]
    InvalidConfig(String),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Module or symbol file (de)serialization error.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    // Execution errors
    /// The runtime interpreter faulted while executing a method body.
    ///
    /// Managed exceptions thrown by executed code are not errors; they are reported
    /// through [`crate::emulation::Outcome::Threw`]. This variant covers faults of the
    /// interpreter itself such as a missing method or a stack underflow.
    #[error("Emulation fault - {0}")]
    Emulation(#[from] EmulationError),
}
