use thiserror::Error;

macro_rules! structural_error {
    // Single format-string version
    ($msg:expr) => {
        $crate::Error::Structural {
            message: format!($msg),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::Structural {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two tiers. **Structural violations** indicate that the traversal driver or
/// a collaborator supplied broken preconditions (a merge with zero live inputs, a stack-frame
/// pop with no matching push, a released store reference used again); they abort the analysis
/// and are not recoverable. **Modeling uncertainty** (an unresolved pointer target, an unknown
/// call target) is never an error: every classification rule resolves it by taking the most
/// conservative verdict instead, so soundness is preserved by over-approximation rather than
/// by failing.
///
/// # Examples
///
/// ```rust
/// use specguard::{Error, program::ProgramBuilder};
///
/// match ProgramBuilder::new().finish() {
///     Ok(_program) => {
///         println!("Program model is well formed");
///     }
///     Err(Error::Structural { message, file, line }) => {
///         eprintln!("Structural violation: {} ({}:{})", message, file, line);
///     }
///     Err(e) => {
///         eprintln!("Other error: {}", e);
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A structural precondition of the analysis was violated.
    ///
    /// This indicates a broken invariant supplied by the traversal driver itself or by a
    /// collaborator, not a property of the program being analyzed. The error includes the
    /// source location where the violation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the violated precondition
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Structural violation - {file}:{line}: {message}")]
    Structural {
        /// The message to be printed for the structural violation
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An index into one of the program-model tables was out of range.
    ///
    /// Raised when a collaborator-supplied identifier (function, block, loop, object or
    /// activation) does not name an entry in the program model it was built against.
    #[error("Invalid {kind} index - {index}")]
    InvalidIndex {
        /// Which table the stale index pointed into
        kind: &'static str,
        /// The out-of-range index value
        index: usize,
    },

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories or for wrapping external
    /// context with additional information.
    #[error("{0}")]
    Error(String),
}
