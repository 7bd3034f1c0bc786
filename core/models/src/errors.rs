use std::fmt::Display;

use color_eyre::eyre::eyre;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorKind {
    Unknown = 1,
    Allocation = 2,
    Registration = 3,
    Bootstrap = 4,
    Serialization = 5,
    ContextIndex = 6,
    NotRehashable = 7,
    HandleScope = 8,
    Engine = 9,
    Filesystem = 10,
    Deserialization = 11,
    ParseSnapshot = 12,
}
impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            Unknown => "Unknown Error",
            Allocation => "Isolate Allocation Error",
            Registration => "Platform Registration Error",
            Bootstrap => "Runtime Bootstrap Error",
            Serialization => "Snapshot Serialization Error",
            ContextIndex => "Context Index Mismatch",
            NotRehashable => "Snapshot Not Rehashable",
            HandleScope => "Handle Scope Error",
            Engine => "Engine Error",
            Filesystem => "Filesystem I/O Error",
            Deserialization => "Deserialization Error",
            ParseSnapshot => "Embedded Snapshot Parse Error",
        }
    }
    pub fn code(&self) -> i32 {
        *self as i32
    }
}
impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
pub struct Error {
    pub source: color_eyre::eyre::Error,
    pub kind: ErrorKind,
}
impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.source)
    }
}
impl Error {
    pub fn new<E: Into<color_eyre::eyre::Error>>(source: E, kind: ErrorKind) -> Self {
        Error {
            source: source.into(),
            kind,
        }
    }
}
impl std::error::Error for Error {}
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(e, ErrorKind::Filesystem)
    }
}
impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::new(e, ErrorKind::ParseSnapshot)
    }
}

pub trait ResultExt<T, E>
where
    Self: Sized,
{
    fn with_kind(self, kind: ErrorKind) -> Result<T, Error>;
    fn with_ctx<F: FnOnce(&E) -> (ErrorKind, D), D: Display + Send + Sync + 'static>(
        self,
        f: F,
    ) -> Result<T, Error>;
}
impl<T, E> ResultExt<T, E> for Result<T, E>
where
    color_eyre::eyre::Error: From<E>,
{
    fn with_kind(self, kind: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error {
            source: e.into(),
            kind,
        })
    }

    fn with_ctx<F: FnOnce(&E) -> (ErrorKind, D), D: Display + Send + Sync + 'static>(
        self,
        f: F,
    ) -> Result<T, Error> {
        self.map_err(|e| {
            let (kind, ctx) = f(&e);
            let source = color_eyre::eyre::Error::from(e);
            let ctx = format!("{}: {}", ctx, source);
            let source = source.wrap_err(ctx);
            Error { kind, source }
        })
    }
}

pub trait OptionExt<T>
where
    Self: Sized,
{
    fn or_kind(self, kind: ErrorKind, message: impl Display) -> Result<T, Error>;
}
impl<T> OptionExt<T> for Option<T> {
    fn or_kind(self, kind: ErrorKind, message: impl Display) -> Result<T, Error> {
        self.ok_or_else(|| Error::new(eyre!("{}", message), kind))
    }
}

#[macro_export]
macro_rules! ensure_code {
    ($x:expr, $c:expr, $fmt:expr $(, $arg:expr)*) => {
        if !($x) {
            return Err($crate::Error::new($crate::eyre!($fmt, $($arg, )*), $c));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(index: usize) -> Result<usize, Error> {
        ensure_code!(index == 0, ErrorKind::ContextIndex, "got index {}", index);
        Ok(index)
    }

    #[test]
    fn ensure_code_reports_kind() {
        assert!(check(0).is_ok());
        let err = check(3).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContextIndex);
        assert_eq!(err.to_string(), "Context Index Mismatch: got index 3");
    }

    #[test]
    fn with_ctx_keeps_kind_and_context() {
        let res: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = res
            .with_ctx(|_| (ErrorKind::Filesystem, "snapshot.cc"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Filesystem);
        assert!(err.to_string().contains("snapshot.cc: missing"));
    }

    #[test]
    fn std_errors_map_to_kinds() {
        let err: Error = "x".parse::<usize>().unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::ParseSnapshot);
        let err: Error = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(err.kind, ErrorKind::Filesystem);
    }

    #[test]
    fn or_kind_on_none() {
        let err = None::<u8>.or_kind(ErrorKind::Engine, "no blob").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Engine);
        assert_eq!(err.kind.code(), 9);
    }
}
