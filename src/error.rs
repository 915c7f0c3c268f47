//! Error types and Result alias for the pager/page-cache core.

use std::fmt;

/// Primary result code, modeled on the engine's own extended result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Error = 1,
    Perm = 3,
    Busy = 5,
    Locked = 6,
    NoMem = 7,
    ReadOnly = 8,
    Interrupt = 9,
    IoErr = 10,
    Corrupt = 11,
    NotFound = 12,
    Full = 13,
    CantOpen = 14,
    Protocol = 15,
    Misuse = 21,
    NotADb = 26,

    IoErrRead = 266,
    IoErrShortRead = 522,
    IoErrWrite = 778,
    IoErrFsync = 1034,
    IoErrDirFsync = 1290,
    IoErrTruncate = 1546,
    IoErrFstat = 1802,
    IoErrLock = 3850,
    IoErrUnlock = 2058,
    IoErrCheckReservedLock = 3338,
    IoErrDelete = 2570,
    IoErrAccess = 3098,
    IoErrShmOpen = 5898,
    IoErrShmLock = 5642,
    IoErrShmMap = 5386,

    BusyRecovery = 261,
    BusySnapshot = 517,

    CorruptVtab = 267,
    CorruptSequence = 523,

    CantOpenNoTempDir = 270,
    CantOpenIsDir = 526,
    CantOpenFullPath = 782,
}

impl ErrorCode {
    /// The coarse base code, stripping any extended-result-code bits.
    pub fn primary(self) -> ErrorCode {
        match (self as i32) & 0xff {
            0 => ErrorCode::Ok,
            3 => ErrorCode::Perm,
            5 => ErrorCode::Busy,
            6 => ErrorCode::Locked,
            7 => ErrorCode::NoMem,
            8 => ErrorCode::ReadOnly,
            9 => ErrorCode::Interrupt,
            10 => ErrorCode::IoErr,
            11 => ErrorCode::Corrupt,
            12 => ErrorCode::NotFound,
            13 => ErrorCode::Full,
            14 => ErrorCode::CantOpen,
            15 => ErrorCode::Protocol,
            21 => ErrorCode::Misuse,
            26 => ErrorCode::NotADb,
            _ => ErrorCode::Error,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An error produced by the pager or page cache.
#[derive(Debug)]
pub struct Error {
    pub code: ErrorCode,
    message: Option<String>,
    source: Option<std::io::Error>,
}

impl Error {
    pub fn new(code: ErrorCode) -> Self {
        Error {
            code,
            message: None,
            source: None,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Error {
            code,
            message: Some(message.into()),
            source: None,
        }
    }

    pub fn from_io(code: ErrorCode, source: std::io::Error) -> Self {
        Error {
            code,
            message: None,
            source: Some(source),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.source) {
            (Some(msg), _) => write!(f, "{}: {}", self.code, msg),
            (None, Some(src)) => write!(f, "{}: {}", self.code, src),
            (None, None) => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        let code = match e.kind() {
            NotFound => ErrorCode::CantOpen,
            PermissionDenied => ErrorCode::Perm,
            AlreadyExists => ErrorCode::CantOpen,
            Interrupted => ErrorCode::Interrupt,
            OutOfMemory => ErrorCode::NoMem,
            _ => ErrorCode::IoErr,
        };
        Error::from_io(code, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_strips_extended_code() {
        assert_eq!(ErrorCode::IoErrShortRead.primary(), ErrorCode::IoErr);
        assert_eq!(ErrorCode::BusyRecovery.primary(), ErrorCode::Busy);
        assert_eq!(ErrorCode::CantOpenIsDir.primary(), ErrorCode::CantOpen);
    }

    #[test]
    fn display_includes_message() {
        let e = Error::with_message(ErrorCode::Corrupt, "bad header");
        assert_eq!(format!("{}", e), "Corrupt: bad header");
    }

    #[test]
    fn io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert_eq!(e.code, ErrorCode::CantOpen);
    }
}
