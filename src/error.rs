//! Crate-wide error type and the `err_at!` construction macro.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. Errors are
//! tagged with the call-site `file:line` the way they are raised, which
//! makes tracing a failure back through several levels of fragment
//! resolution straightforward without a backtrace feature.

use std::{fmt, result};

/// Convenience alias used throughout the crate.
pub type Result<T> = result::Result<T, Error>;

/// Error kinds produced by the fragment layer, the red-black tree and the
/// B-tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The underlying key-value store failed to complete an operation.
    /// Recoverable by retrying at the caller level.
    StoreUnavailable(String, String),
    /// A reference resolved to an absent fragment, or a fragment failed
    /// decoder validation. Indicates corruption or a bug; fatal for the
    /// operation.
    StoreInconsistent(String, String),
    /// A key could not be compared against existing keys.
    InvalidKey(String, String),
    /// A structural invariant check failed (entry count outside `[b,
    /// 2b-1]`, mis-ordered index, etc). Indicates an implementation bug.
    InvariantViolation(String, String),
    /// Caller supplied input this crate cannot act on.
    InvalidInput(String, String),
    /// A numeric/size conversion failed.
    FailConvert(String, String),
    /// Encoding/decoding a fragment failed.
    FailCbor(String, String),
    /// Catch-all for invariants that should be unreachable.
    Fatal(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            StoreUnavailable(p, msg) => write!(f, "{} StoreUnavailable: {}", p, msg),
            StoreInconsistent(p, msg) => write!(f, "{} StoreInconsistent: {}", p, msg),
            InvalidKey(p, msg) => write!(f, "{} InvalidKey: {}", p, msg),
            InvariantViolation(p, msg) => write!(f, "{} InvariantViolation: {}", p, msg),
            InvalidInput(p, msg) => write!(f, "{} InvalidInput: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} FailConvert: {}", p, msg),
            FailCbor(p, msg) => write!(f, "{} FailCbor: {}", p, msg),
            Fatal(p, msg) => write!(f, "{} Fatal: {}", p, msg),
        }
    }
}

impl std::error::Error for Error {}

/// Build or wrap a [`Error`], tagging it with the call-site location.
///
/// Two forms:
/// - `err_at!(Variant, fallible_expr)` evaluates `fallible_expr` (any
///   `Result<T, E>` with `E: fmt::Display`) and converts an `Err` into
///   `Error::Variant` tagged with `file:line`.
/// - `err_at!(Variant, msg: "fmt", args...)` builds an `Err(Error::Variant(..))`
///   directly from a formatted message.
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let extra = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} ({})", err, extra)))
            }
        }
    }};
}
