// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//! The daemon's closed error taxonomy.
//!
//! Every fallible operation in the task engine reduces to one of these
//! codes; there is no open-ended `Box<dyn Error>` escape hatch, mirroring
//! the enumerated `{Success, BadArgs, ...}` set in the wire protocol.

use std::fmt;

/// Wire-level and internal error code, shared by requests, responses and
/// in-process `Result`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    Success,
    BadArgs,
    ConnFailed,
    RpcSendFailed,
    RpcRecvFailed,
    Snafu,
    NoSuchJob,
    NoSuchNamespace,
    NamespaceExists,
    NotSupported,
    AcceptPaused,
    TasksPending,
    TooManyTasks,
    Timeout,
    NoSuchTask,
    SystemError,
    Protocol,
}

impl ErrorCode {
    pub fn is_success(self) -> bool { self == ErrorCode::Success }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self) }
}

/// An engine-level error: an [`ErrorCode`] plus an optional `errno`-style
/// system error number, captured when the failure originated in a syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    pub code: ErrorCode,
    pub sys_errno: i32,
}

impl Error {
    pub const fn new(code: ErrorCode) -> Error { Error { code, sys_errno: 0 } }

    pub const fn system(errno: i32) -> Error {
        Error { code: ErrorCode::SystemError, sys_errno: errno }
    }

    pub fn from_io(err: &std::io::Error) -> Error {
        Error::system(err.raw_os_error().unwrap_or(0))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sys_errno != 0 {
            write!(f, "{} (errno {})", self.code, self.sys_errno)
        } else {
            write!(f, "{}", self.code)
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Error { Error::new(code) }
}

pub const SUCCESS: Error = Error::new(ErrorCode::Success);

pub type Result<T> = std::result::Result<T, Error>;
