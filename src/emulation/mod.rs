//! Execution runtime for woven method bodies.
//!
//! The runtime interprets the block IR of a module so that woven code can be executed and
//! its observable behaviour checked: hook order, return values, exceptions and arguments.
//!
//! # Architecture
//!
//! - [`EmValue`] / [`HeapRef`] / [`ValueCell`] - Runtime values and storage slots
//! - [`ManagedHeap`] / [`HeapObject`] - Objects, strings, arrays and boxes
//! - [`NativeRegistry`] - Rust implementations of runtime-provided methods, keyed by type and
//!   method name; used for the contract types, the built-in `System` types and test doubles
//! - [`Runtime`] - The interpreter: call dispatch, exception unwinding through the ordered
//!   handler table, `finally` execution on `leave`, one-time type initialization
//!
//! Managed exceptions are values, reported through [`Outcome::Threw`]. Faults of the
//! interpreter itself are [`EmulationError`]s.
//!
//! # Execution Limits
//!
//! [`RuntimeLimits`] bounds the call depth, the number of executed instructions and the heap
//! size so runaway programs terminate with an error.
//!
//! # Examples
//!
//! ```rust,no_run
//! use aspectweave::emulation::{EmValue, Outcome, Runtime};
//! use aspectweave::resolver::Resolver;
//!
//! # fn example(module: aspectweave::metadata::module::Module) -> aspectweave::Result<()> {
//! let mut runtime = Runtime::new(module, Resolver::new()?);
//! match runtime.call_static("Sample.Calc", "Add", vec![EmValue::I32(1), EmValue::I32(3)])? {
//!     Outcome::Returned(value) => println!("returned {value:?}"),
//!     Outcome::Threw(exception) => println!("threw {}", runtime.describe(&exception)),
//! }
//! # Ok(())
//! # }
//! ```

mod heap;
mod native;
mod runtime;
mod value;

use thiserror::Error;

pub use heap::{HeapObject, ManagedHeap};
pub use native::{NativeCall, NativeFn, NativeRegistry, NativeResult};
pub use runtime::{Outcome, Runtime, RuntimeLimits};
pub use value::{EmValue, HeapRef, MemberHandle, ValueCell};

/// Faults of the interpreter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmulationError {
    /// No implementation was found for a called method
    #[error("Method {type_name}::{method} not found")]
    MethodNotFound {
        /// Type the lookup started at
        type_name: String,
        /// Method name
        method: String,
    },

    /// A called method is neither IR nor native
    #[error("Method {0} has no body and no native implementation")]
    MissingMethodBody(String),

    /// A referenced type does not resolve
    #[error("Type {0} not found")]
    TypeNotFound(String),

    /// Operand of the wrong kind
    #[error("{operation} expected {expected}, found {found}")]
    TypeMismatch {
        /// Instruction or operation
        operation: &'static str,
        /// Expected operand kind
        expected: &'static str,
        /// Actual operand kind
        found: &'static str,
    },

    /// Pop from an empty evaluation stack
    #[error("Evaluation stack underflow in {0}")]
    StackUnderflow(String),

    /// Argument, local or block index out of range
    #[error("Invalid {kind} index {index}")]
    InvalidIndex {
        /// `argument`, `local` or `block`
        kind: &'static str,
        /// The index
        index: usize,
    },

    /// A dangling heap handle
    #[error("Invalid heap reference @{0}")]
    InvalidHeapReference(usize),

    /// The heap reached its object limit
    #[error("Heap limit of {0} objects exceeded")]
    HeapLimitExceeded(usize),

    /// Calls nested deeper than allowed
    #[error("Call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    /// More instructions executed than allowed
    #[error("Instruction limit of {0} exceeded")]
    InstructionLimitExceeded(u64),

    /// Control reached a terminator that is invalid in its position
    #[error("Invalid program: {0}")]
    InvalidProgram(String),
}
