//! Runtime values.
//!
//! Immediates are stored inline; closures and continuations are handles into
//! the block arena. Every `Value` is `Copy` and two words wide.

use std::fmt;

use snail_core::IntStr;
use snail_rt::ARef;

use crate::env::EnvRef;
use crate::exp::{FormalsId, VmExpId};
use crate::vm::{FrameRef, VmError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Symbol(IntStr),
    /// Host data the VM carries without interpreting (pairs, strings, ...).
    Opaque(u64),
    Unspecified,
    Closure(ARef<Closure>),
    Continuation(ARef<Continuation>),
    Primitive(PrimitiveId),
}

impl Value {
    pub const FALSE: Value = Value::Bool(false);
    pub const TRUE: Value = Value::Bool(true);

    /// Everything except the false singleton counts as true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_procedure(&self) -> bool {
        matches!(
            self,
            Value::Closure(_) | Value::Continuation(_) | Value::Primitive(_)
        )
    }

    /// True for values holding arena handles.
    pub fn is_boxed(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Continuation(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "real",
            Value::Symbol(_) => "symbol",
            Value::Opaque(_) => "opaque",
            Value::Unspecified => "unspecified",
            Value::Closure(_) => "procedure",
            Value::Continuation(_) => "continuation",
            Value::Primitive(_) => "primitive",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "()"),
            Value::Bool(true) => write!(f, "#t"),
            Value::Bool(false) => write!(f, "#f"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Symbol(id) => write!(f, "{id}"),
            Value::Opaque(h) => write!(f, "#<opaque {h}>"),
            Value::Unspecified => write!(f, "#<unspecified>"),
            Value::Closure(r) => write!(f, "#<procedure @{}>", r.addr().offset()),
            Value::Continuation(r) => write!(f, "#<continuation @{}>", r.addr().offset()),
            Value::Primitive(p) => write!(f, "#<primitive {}>", p.0),
        }
    }
}

/// A lambda together with the environment it closed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closure {
    pub formals: FormalsId,
    pub body: VmExpId,
    pub env: Option<EnvRef>,
}

/// Captured control stack. Invoking it delivers its argument into `a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub stack: Option<FrameRef>,
    /// Number of frames in `stack`.
    pub depth: usize,
}

/// Index of a registered primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveId(pub(crate) u32);

impl PrimitiveId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Host procedure. Receives the argument rib and must not retain it.
pub type PrimitiveFn = fn(&[Value]) -> Result<Value, VmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exactly(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(k) => write!(f, "{k}"),
            Arity::AtLeast(k) => write!(f, "at least {k}"),
        }
    }
}

#[derive(Clone)]
pub struct Primitive {
    pub name: IntStr,
    pub arity: Arity,
    pub func: PrimitiveFn,
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}
