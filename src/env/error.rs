use std::fmt;

use enum_map::Enum;
use strum_macros::{EnumIter, IntoStaticStr};

use super::object::{JVMCIObject, Mode};

/// The exception classes the runtime raises or recognizes by name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, EnumIter, IntoStaticStr)]
pub enum ExceptionKind {
    IllegalArgumentException,
    IllegalStateException,
    NullPointerException,
    ArrayIndexOutOfBoundsException,
    ClassCastException,
    InternalError,
    OutOfMemoryError,
    InstantiationException,
    UnsatisfiedLinkError,
    InvalidInstalledCodeException,
    UnsupportedOperationException,
    JVMCIError,
    /// Any other throwable.
    Other,
}

impl ExceptionKind {
    /// The class name of the exception in internal form. `None` for [`ExceptionKind::Other`].
    pub fn class_name(self) -> Option<&'static str> {
        Some(match self {
            ExceptionKind::IllegalArgumentException => "java/lang/IllegalArgumentException",
            ExceptionKind::IllegalStateException => "java/lang/IllegalStateException",
            ExceptionKind::NullPointerException => "java/lang/NullPointerException",
            ExceptionKind::ArrayIndexOutOfBoundsException => "java/lang/ArrayIndexOutOfBoundsException",
            ExceptionKind::ClassCastException => "java/lang/ClassCastException",
            ExceptionKind::InternalError => "java/lang/InternalError",
            ExceptionKind::OutOfMemoryError => "java/lang/OutOfMemoryError",
            ExceptionKind::InstantiationException => "java/lang/InstantiationException",
            ExceptionKind::UnsatisfiedLinkError => "java/lang/UnsatisfiedLinkError",
            ExceptionKind::InvalidInstalledCodeException => "jdk/vm/ci/code/InvalidInstalledCodeException",
            ExceptionKind::UnsupportedOperationException => "java/lang/UnsupportedOperationException",
            ExceptionKind::JVMCIError => "jdk/vm/ci/common/JVMCIError",
            ExceptionKind::Other => return None,
        })
    }

    /// The kinds with a class, most specific first, so the first match classifies a throwable.
    pub(crate) const CLASSIFICATION_ORDER: [ExceptionKind; 12] = [
        ExceptionKind::InvalidInstalledCodeException,
        ExceptionKind::JVMCIError,
        ExceptionKind::ArrayIndexOutOfBoundsException,
        ExceptionKind::IllegalArgumentException,
        ExceptionKind::IllegalStateException,
        ExceptionKind::NullPointerException,
        ExceptionKind::ClassCastException,
        ExceptionKind::UnsupportedOperationException,
        ExceptionKind::InstantiationException,
        ExceptionKind::OutOfMemoryError,
        ExceptionKind::UnsatisfiedLinkError,
        ExceptionKind::InternalError,
    ];
}

/// An exception raised on one side of the boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct ThrownException {
    pub kind: ExceptionKind,
    pub message: Option<String>,
    /// The exception object, in the heap that raised it. `None` if the exception was created by
    /// the runtime itself and has not been materialized yet.
    pub throwable: Option<JVMCIObject>,
}

impl fmt::Display for ThrownException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name: &'static str = self.kind.into();
        match &self.message {
            Some(message) => write!(f, "{}: {}", name, message),
            None => write!(f, "{}", name),
        }
    }
}

/// The error of every operation that crosses the boundary between the runtime and a compiler heap.
#[derive(Clone, Debug, PartialEq)]
pub enum JVMCIError {
    Exception(ThrownException),
    /// A reference from one heap was given to an environment working on the other heap.
    ModeMismatch { expected: Mode, found: Mode },
    /// An invariant of the runtime does not hold.
    Internal(String),
}

pub type JVMCIResult<T> = Result<T, JVMCIError>;

impl JVMCIError {
    /// An exception the runtime raises. The throwable is created when the exception reaches the
    /// boundary.
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        JVMCIError::Exception(ThrownException {
            kind,
            message: Some(message.into()),
            throwable: None,
        })
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::IllegalArgumentException, message)
    }

    pub fn null_pointer() -> Self {
        JVMCIError::Exception(ThrownException {
            kind: ExceptionKind::NullPointerException,
            message: None,
            throwable: None,
        })
    }

    /// The equivalent of `JVMCI_ERROR`: a `JVMCIError` exception on the compiler side.
    pub fn jvmci(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::JVMCIError, message)
    }

    pub fn kind(&self) -> Option<ExceptionKind> {
        match self {
            JVMCIError::Exception(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            JVMCIError::Exception(e) => e.message.as_deref(),
            JVMCIError::Internal(message) => Some(message),
            JVMCIError::ModeMismatch { .. } => None,
        }
    }
}

impl fmt::Display for JVMCIError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JVMCIError::Exception(e) => e.fmt(f),
            JVMCIError::ModeMismatch { expected, found } => {
                write!(f, "{} reference used in a {} environment", found, expected)
            }
            JVMCIError::Internal(message) => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for JVMCIError {}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_named_kind_is_classified() {
        for kind in ExceptionKind::iter().filter(|k| *k != ExceptionKind::Other) {
            assert!(ExceptionKind::CLASSIFICATION_ORDER.contains(&kind), "{:?}", kind);
            assert!(kind.class_name().is_some());
        }
    }

    #[test]
    fn display() {
        assert_eq!(
            JVMCIError::illegal_argument("bad").to_string(),
            "IllegalArgumentException: bad"
        );
        assert_eq!(JVMCIError::null_pointer().to_string(), "NullPointerException");
        assert_eq!(
            JVMCIError::ModeMismatch {
                expected: Mode::Host,
                found: Mode::Remote
            }
            .to_string(),
            "remote reference used in a host environment"
        );
    }
}
