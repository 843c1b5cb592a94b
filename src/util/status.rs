use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
    NotFound,
    Corruption,
    NotSupported,
    InvalidArgument,
    IOError,
    /// A concurrent excise removed keys protected by an eventually-file-only
    /// snapshot before it became file-only.
    Excised,
    /// The snapshot was closed while the operation was in progress.
    Closed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct Status {
    code: Code,
    message: Option<String>,
}

impl Status {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Status {
            code: Code::NotFound,
            message: Some(msg.into()),
        }
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Status {
            code: Code::Corruption,
            message: Some(msg.into()),
        }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Status {
            code: Code::NotSupported,
            message: Some(msg.into()),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Status {
            code: Code::InvalidArgument,
            message: Some(msg.into()),
        }
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Status {
            code: Code::IOError,
            message: Some(msg.into()),
        }
    }

    /// Returned by waits and reads on an eventually file-only snapshot once
    /// an excise overlapped one of its protected ranges before it became
    /// file-only.
    pub fn excised() -> Self {
        Status {
            code: Code::Excised,
            message: Some(
                "snapshot excised before conversion to file-only snapshot".to_string(),
            ),
        }
    }

    pub fn closed() -> Self {
        Status {
            code: Code::Closed,
            message: None,
        }
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Status {
            code: Code::Aborted,
            message: Some(msg.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }

    pub fn is_corruption(&self) -> bool {
        self.code == Code::Corruption
    }

    pub fn is_excised(&self) -> bool {
        self.code == Code::Excised
    }

    pub fn is_closed(&self) -> bool {
        self.code == Code::Closed
    }

    pub fn is_aborted(&self) -> bool {
        self.code == Code::Aborted
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{:?}: {}", self.code, msg),
            None => write!(f, "{:?}", self.code),
        }
    }
}

impl std::error::Error for Status {}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        Status::io_error(err.to_string())
    }
}

impl From<serde_json::Error> for Status {
    fn from(err: serde_json::Error) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_not_found() {
        let status = Status::not_found("key not found");
        assert!(status.is_not_found());
        assert_eq!(status.message(), Some("key not found"));
    }

    #[test]
    fn test_status_excised_and_closed_are_distinct() {
        let excised = Status::excised();
        let closed = Status::closed();
        assert!(excised.is_excised());
        assert!(!excised.is_closed());
        assert!(closed.is_closed());
        assert!(!closed.is_excised());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::io_error("disk full").to_string(), "IOError: disk full");
        assert_eq!(Status::closed().to_string(), "Closed");
    }

    #[test]
    fn test_status_from_json_error() {
        let err = serde_json::from_str::<u64>("not a number").unwrap_err();
        let status: Status = err.into();
        assert_eq!(status.code(), &Code::InvalidArgument);
    }
}
