//! First-class continuations.
//!
//! Capture copies the stack pointer `s` into a one-block arena object.
//! Frames are immutable, so the same continuation can be invoked any number
//! of times, and every invocation resumes from the same frames.

use snail_rt::ARef;
use tracing::warn;

use super::{malformed, FrameRef, Frames, Vm, VmError};
use crate::values::{Arity, Continuation, Value};

impl Vm {
    /// `Conti`: reify the current control stack.
    pub(super) fn capture(&mut self) -> Result<Value, VmError> {
        let k = self.arena.alloc(Continuation {
            stack: self.regs.s,
            depth: self.depth,
        })?;
        self.stats.continuations_captured += 1;
        Ok(Value::Continuation(k))
    }

    /// Apply of a continuation: deliver the sole argument to its stack.
    pub(super) fn throw(&mut self, k: ARef<Continuation>) -> Result<(), VmError> {
        let cont = *self
            .arena
            .try_get(k)
            .ok_or_else(|| malformed("continuation is stale"))?;
        if self.regs.r.len() != 1 {
            warn!(args = self.regs.r.len(), "continuation invoked with wrong argument count");
            return Err(VmError::ArityMismatch {
                callee: self.render(Value::Continuation(k)),
                expected: Arity::Exactly(1),
                actual: self.regs.r.len(),
            });
        }
        self.regs.a = self.regs.r[0];
        self.stats.continuations_invoked += 1;
        self.reinstate(cont.stack, Some(cont.depth))
    }

    /// `Nuate`: make `stack` current, then return through its top frame
    /// with `a` as the delivered value.
    pub(super) fn reinstate(
        &mut self,
        stack: Option<FrameRef>,
        depth: Option<usize>,
    ) -> Result<(), VmError> {
        self.regs.s = stack;
        self.depth = match depth {
            Some(d) => d,
            None => Frames::new(&self.arena, stack).count(),
        };
        self.pop_frame()
    }

    /// The stack a continuation value would reinstate, for building `Nuate`
    /// nodes by hand. `None` if `value` is not a live continuation.
    pub fn continuation_stack(&self, value: Value) -> Option<Option<FrameRef>> {
        match value {
            Value::Continuation(k) => self.arena.try_get(k).map(|c| c.stack),
            _ => None,
        }
    }
}
