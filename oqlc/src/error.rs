use std::fmt::Debug;

use serde::Serialize;

/// A compiler error. The pipeline either returns a SQL tree or fails with
/// one of these; runtime failures (null-on-required, index bounds) are not
/// errors here, they are materialised into the SQL tree itself.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub reason: Reason,
    pub hints: Vec<String>,
    /// Machine readable identifier error code eg, "E0001"
    pub code: Option<&'static str>,
}

/// Broad classification used by callers to pick a protocol error class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Invalid input: unknown IR shape, set-returning call in singleton
    /// mode, paths not provided by any enclosing scope.
    Query,
    UnsupportedFeature,
    /// Pointer/type lookups that fail after scope resolution.
    InvalidReference,
    InvalidType,
    /// Broken compiler invariants. These are bugs.
    Internal,
}

#[derive(Debug, Clone)]
pub enum Reason {
    Simple(String),
    Expected {
        who: Option<String>,
        expected: String,
        found: String,
    },
    NotFound {
        name: String,
        namespace: String,
    },
    Bug {
        details: String,
    },
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error {
            kind: ErrorKind::Query,
            reason,
            hints: Vec::new(),
            code: None,
        }
    }

    pub fn new_simple<S: ToString>(reason: S) -> Self {
        Error::new(Reason::Simple(reason.to_string()))
    }

    pub fn new_unsupported<S: ToString>(feature: S) -> Self {
        Error::new_simple(format!("{} is not supported", feature.to_string()))
            .with_kind(ErrorKind::UnsupportedFeature)
    }

    pub fn new_reference<N: ToString, S: ToString>(name: N, namespace: S) -> Self {
        Error::new(Reason::NotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
        .with_kind(ErrorKind::InvalidReference)
    }

    /// Used for invariant violations; carries the offending node's debug
    /// repr in `details`.
    pub fn new_internal<S: ToString>(details: S) -> Self {
        Error::new(Reason::Bug {
            details: details.to_string(),
        })
        .with_kind(ErrorKind::Internal)
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::Simple(text) => f.write_str(text),
            Reason::Expected {
                who,
                expected,
                found,
            } => {
                if let Some(who) = who {
                    write!(f, "{who} ")?;
                }
                write!(f, "expected {expected}, but found {found}")
            }
            Reason::NotFound { name, namespace } => write!(f, "{namespace} `{name}` not found"),
            Reason::Bug { details } => {
                write!(f, "internal compiler error; {details}")
            }
        }
    }
}

// Needed for StdError
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self, f)
    }
}

impl std::error::Error for Error {}

pub trait WithErrorInfo: Sized {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self;

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(self, hints: I) -> Self;

    fn with_code(self, code: &'static str) -> Self;

    fn with_kind(self, kind: ErrorKind) -> Self;
}

impl WithErrorInfo for Error {
    fn push_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hints.push(hint.into());
        self
    }

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(mut self, hints: I) -> Self {
        self.hints = hints.into_iter().map(|x| x.into()).collect();
        self
    }

    fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl<T, E: WithErrorInfo> WithErrorInfo for Result<T, E> {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(self, hints: I) -> Self {
        self.map_err(|e| e.with_hints(hints))
    }

    fn with_code(self, code: &'static str) -> Self {
        self.map_err(|e| e.with_code(code))
    }

    fn with_kind(self, kind: ErrorKind) -> Self {
        self.map_err(|e| e.with_kind(kind))
    }
}

#[cfg(test)]
mod test {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn error_display() {
        let e = Error::new_reference("title", "pointer");
        assert_snapshot!(e.reason.to_string(), @"pointer `title` not found");
        assert_eq!(e.kind, ErrorKind::InvalidReference);

        let e = Error::new_internal("no handler for node").with_code("E1001");
        assert_snapshot!(
            e.reason.to_string(),
            @"internal compiler error; no handler for node"
        );
    }
}
