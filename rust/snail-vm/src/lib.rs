//! Snail VM: a register machine over an index-addressed instruction graph,
//! with proper tail calls and multi-shot first-class continuations.
//!
//! The control stack is a chain of immutable call frames in the block arena,
//! so capturing a continuation copies one handle and never the native stack.
#![warn(clippy::all)]

pub mod env;
pub mod exp;
pub mod values;
pub mod vm;

pub use env::{EnvFrame, EnvHeader, EnvRef, Globals};
pub use exp::{ExpTable, FormalsId, Opcode, VmExp, VmExpId};
pub use values::{Arity, Closure, Continuation, Primitive, PrimitiveFn, PrimitiveId, Value};
pub use vm::{CallFrame, ExecStats, FrameHeader, FrameRef, Registers, Step, Vm, VmError};
