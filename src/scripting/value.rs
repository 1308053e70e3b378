//! Host values and host objects shared with scripts.
//!
//! Every binding a host registers is a [`HostValue`]. Plain data is copied into
//! the script runtime; [`HostValue::Object`] carries an `Arc<dyn HostObject>`
//! that every backend projects into its own calling convention while keeping
//! the object itself shared by reference with the host.
//!
//! # Thread Safety
//!
//! Host objects may be invoked from a pool worker, and a timed-out worker can
//! keep calling into them after the engine has given up on it. Any mutation
//! safety is the object's own business; the scripting core imposes no locking.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a host object method.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostCallError {
    /// The object has no method or property with this name.
    #[error("{type_name} has no member '{member}'")]
    UnknownMember {
        /// Host type that was called.
        type_name: String,
        /// Requested member.
        member: String,
    },
    /// Arguments did not match what the method expects.
    #[error("invalid arguments for '{method}': {message}")]
    InvalidArguments {
        /// Method being called.
        method: String,
        /// What was wrong.
        message: String,
    },
    /// The method itself failed.
    #[error("{0}")]
    Failed(String),
}

/// A host-side object addressable from scripts by its binding name.
///
/// # Example
///
/// ```rust
/// use simscript::scripting::{HostCallError, HostObject, HostValue};
/// use std::sync::Mutex;
///
/// #[derive(Debug, Default)]
/// struct Clock {
///     now: Mutex<f64>,
/// }
///
/// impl HostObject for Clock {
///     fn type_name(&self) -> &str {
///         "Clock"
///     }
///
///     fn methods(&self) -> Vec<String> {
///         vec!["now".to_string()]
///     }
///
///     fn call(&self, method: &str, _args: &[HostValue]) -> Result<HostValue, HostCallError> {
///         match method {
///             "now" => Ok(HostValue::Float(*self.now.lock().unwrap())),
///             other => Err(HostCallError::UnknownMember {
///                 type_name: self.type_name().to_string(),
///                 member: other.to_string(),
///             }),
///         }
///     }
/// }
/// ```
pub trait HostObject: Send + Sync + fmt::Debug {
    /// Name reported to scripts that inspect the object's type.
    fn type_name(&self) -> &str;

    /// Methods callable from scripts.
    ///
    /// Backends that cannot dispatch dynamically (QuickJS) install exactly these.
    fn methods(&self) -> Vec<String>;

    /// Invoke `method` with already-converted arguments.
    fn call(&self, method: &str, args: &[HostValue]) -> Result<HostValue, HostCallError>;

    /// Read a property. `None` means the object has no such property.
    fn get(&self, _property: &str) -> Option<HostValue> {
        None
    }
}

/// Value exchanged between host and script.
#[derive(Debug, Clone)]
pub enum HostValue {
    /// No value (`()`, `undefined`, `None`).
    Unit,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// String.
    Str(String),
    /// Ordered list.
    List(Vec<HostValue>),
    /// Shared host object.
    Object(Arc<dyn HostObject>),
}

impl HostValue {
    /// Wrap a host object.
    pub fn object(object: impl HostObject + 'static) -> Self {
        HostValue::Object(Arc::new(object))
    }

    /// Integer view, accepting integral floats.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            HostValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Float view, accepting integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            HostValue::Float(f) => Some(*f),
            HostValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness as scripts would see it.
    pub fn is_truthy(&self) -> bool {
        match self {
            HostValue::Unit => false,
            HostValue::Bool(b) => *b,
            HostValue::Int(i) => *i != 0,
            HostValue::Float(f) => *f != 0.0,
            HostValue::Str(s) => !s.is_empty(),
            HostValue::List(items) => !items.is_empty(),
            HostValue::Object(_) => true,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Unit => Ok(()),
            HostValue::Bool(b) => write!(f, "{b}"),
            HostValue::Int(i) => write!(f, "{i}"),
            HostValue::Float(x) => write!(f, "{x}"),
            HostValue::Str(s) => f.write_str(s),
            HostValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            HostValue::Object(obj) => write!(f, "<{}>", obj.type_name()),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Unit, HostValue::Unit) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Str(a), HostValue::Str(b)) => a == b,
            (HostValue::List(a), HostValue::List(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Int(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Int(i64::from(value))
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Float(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::Str(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::Str(value)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(values: Vec<T>) -> Self {
        HostValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<Arc<dyn HostObject>> for HostValue {
    fn from(value: Arc<dyn HostObject>) -> Self {
        HostValue::Object(value)
    }
}
