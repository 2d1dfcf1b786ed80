// Error propagation: a tiny Copy signal travels through `Result` on
// every fallible VM path; the error object itself is parked on the
// runtime so `Result` stays one word wide.

use std::fmt;

/// Control signal raised out of VM operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A Lua error is in flight; the error object is in `Lua::fault`.
    Error,
    /// The current coroutine yielded; values are in the thread's
    /// transfer buffer.
    Yield,
}

pub type LuaResult<T> = Result<T, Fault>;

/// Status codes shared with the embedding ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum Status {
    Ok = 0,
    Yield = 1,
    ErrRun = 2,
    ErrSyntax = 3,
    ErrMem = 4,
    ErrErr = 5,
    ErrFile = 6,
}

/// Compile-time failure; never crosses into execution.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SyntaxError {}

/// Rich error handed to embedders: the status kind, the rendered error
/// object, and the traceback captured where the error was raised.
#[derive(Debug, Clone)]
pub struct MoonError {
    pub status: Status,
    pub message: String,
    pub traceback: Option<String>,
}

impl MoonError {
    pub fn runtime(message: String, traceback: Option<String>) -> Self {
        MoonError {
            status: Status::ErrRun,
            message,
            traceback,
        }
    }

    pub fn syntax(err: SyntaxError) -> Self {
        MoonError {
            status: Status::ErrSyntax,
            message: err.message,
            traceback: None,
        }
    }
}

impl fmt::Display for MoonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MoonError {}
