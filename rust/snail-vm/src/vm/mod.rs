//! The register machine.
//!
//! Registers: `a` accumulator, `x` next instruction, `e` environment,
//! `r` argument rib, `s` top of the frame stack. Only `Frame` pushes onto
//! `s`; a call compiled without a preceding `Frame` is a tail call and runs
//! in constant stack space.

mod continuations;
mod stack;

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, trace};

use snail_core::{IntStr, SharedStringTable};
use snail_rt::{Arena, ArenaError, RuntimeConfig};

use crate::env::{find_local, EnvFrame, EnvRef, Globals, Lookup};
use crate::exp::{ExpTable, VmExp, VmExpId};
use crate::values::{Arity, Closure, Primitive, PrimitiveFn, PrimitiveId, Value};

pub use stack::{CallFrame, FrameHeader, FrameRef, Frames};

/// How many instructions run between deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("unbound variable: {name}")]
    UnboundVariable { id: IntStr, name: String },
    #[error("attempt to apply non-procedure {value}")]
    NotCallable { value: String },
    #[error("{callee}: expected {expected} argument(s), got {actual}")]
    ArityMismatch {
        callee: String,
        expected: Arity,
        actual: usize,
    },
    #[error(transparent)]
    OutOfMemory(#[from] ArenaError),
    #[error("{name}: {message}")]
    PrimitiveFailed { name: String, message: String },
    #[error("instruction limit exceeded: {0}")]
    InstructionLimitExceeded(u64),
    #[error("deadline exceeded after {0} instructions")]
    DeadlineExceeded(u64),
    #[error("return with an empty frame stack at {at}")]
    StackUnderflow { at: VmExpId },
    #[error("malformed instruction graph: {0}")]
    MalformedInstructionGraph(String),
    #[error("{0}")]
    InvalidConfig(String),
}

impl VmError {
    /// Error for a primitive rejecting its arguments.
    pub fn primitive(name: impl Into<String>, message: impl Into<String>) -> Self {
        VmError::PrimitiveFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Fatal errors mean the instruction graph or the embedding is broken,
    /// not the program being run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::StackUnderflow { .. } | VmError::MalformedInstructionGraph(_)
        )
    }
}

fn malformed(msg: impl Into<String>) -> VmError {
    VmError::MalformedInstructionGraph(msg.into())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registers {
    pub a: Value,
    pub x: VmExpId,
    pub e: Option<EnvRef>,
    pub r: Vec<Value>,
    pub s: Option<FrameRef>,
}

impl Registers {
    fn at(entry: VmExpId) -> Self {
        Self {
            a: Value::Unspecified,
            x: entry,
            e: None,
            r: Vec::new(),
            s: None,
        }
    }
}

/// Counters for the most recent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    pub instructions: u64,
    pub frames_pushed: u64,
    pub frames_popped: u64,
    pub max_frame_depth: usize,
    pub continuations_captured: u64,
    pub continuations_invoked: u64,
}

/// Result of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Running,
    Halted(Value),
}

pub struct Vm {
    strings: SharedStringTable,
    arena: Arena,
    globals: Globals,
    primitives: Vec<Primitive>,
    regs: Registers,
    depth: usize,
    stats: ExecStats,
    instruction_limit: Option<u64>,
}

impl Vm {
    /// Create a VM with the default arena size and no instruction limit.
    pub fn new(strings: SharedStringTable) -> Result<Self, VmError> {
        Self::with_config(strings, &RuntimeConfig::default())
    }

    pub fn with_config(strings: SharedStringTable, config: &RuntimeConfig) -> Result<Self, VmError> {
        config
            .validate()
            .map_err(|e| VmError::InvalidConfig(e.to_string()))?;
        let arena = config.arena.build()?;
        debug!(
            capacity_blocks = arena.capacity_blocks(),
            instruction_limit = ?config.exec.instruction_limit,
            "vm created"
        );
        Ok(Self {
            strings,
            arena,
            globals: Globals::new(),
            primitives: Vec::new(),
            regs: Registers::at(VmExpId::from_raw(0)),
            depth: 0,
            stats: ExecStats::default(),
            instruction_limit: config.exec.instruction_limit,
        })
    }

    pub fn strings(&self) -> &SharedStringTable {
        &self.strings
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut Globals {
        &mut self.globals
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    /// Number of frames on `s`.
    pub fn frame_depth(&self) -> usize {
        self.depth
    }

    pub fn instruction_limit(&self) -> Option<u64> {
        self.instruction_limit
    }

    pub fn set_instruction_limit(&mut self, limit: Option<u64>) {
        self.instruction_limit = limit;
    }

    /// Bind a global by name, interning it.
    pub fn define_global(&mut self, name: &str, value: Value) -> IntStr {
        let id = self.strings.intern(name);
        self.globals.define(id, value);
        id
    }

    /// Register a host procedure and bind it globally under `name`.
    pub fn define_primitive(&mut self, name: &str, arity: Arity, func: PrimitiveFn) -> Value {
        let id = self.strings.intern(name);
        let prim = PrimitiveId(self.primitives.len() as u32);
        self.primitives.push(Primitive {
            name: id,
            arity,
            func,
        });
        let value = Value::Primitive(prim);
        self.globals.define(id, value);
        value
    }

    pub fn primitive(&self, id: PrimitiveId) -> Option<&Primitive> {
        self.primitives.get(id.index())
    }

    /// Resume indices of the live frames, innermost first.
    pub fn backtrace(&self) -> Vec<VmExpId> {
        Frames::new(&self.arena, self.regs.s)
            .map(|f| f.return_to)
            .collect()
    }

    /// Rewind the arena for an independent evaluation. Globals holding
    /// closures or continuations are dropped with it.
    pub fn reset(&mut self) -> Result<(), VmError> {
        self.arena.reset()?;
        let dropped = self.globals.retain_immediates();
        self.regs = Registers::at(VmExpId::from_raw(0));
        self.depth = 0;
        debug!(dropped_globals = dropped, "vm reset");
        Ok(())
    }

    /// Human-readable form of a value, with symbol and primitive names.
    pub fn render(&self, value: Value) -> String {
        match value {
            Value::Symbol(id) => match self.strings.try_resolve(id) {
                Some(name) => name.to_string(),
                None => value.to_string(),
            },
            Value::Primitive(p) => match self
                .primitive(p)
                .and_then(|prim| self.strings.try_resolve(prim.name))
            {
                Some(name) => format!("#<primitive {name}>"),
                None => value.to_string(),
            },
            other => other.to_string(),
        }
    }

    // --- execution ---

    /// Evaluate from `entry` until `Halt`, returning the accumulator.
    pub fn run(&mut self, table: &ExpTable, entry: VmExpId) -> Result<Value, VmError> {
        self.start(entry);
        debug!(entry = entry.index(), nodes = table.len(), "vm run started");
        loop {
            match self.step(table) {
                Ok(Step::Running) => {}
                Ok(Step::Halted(value)) => return Ok(self.halted(value)),
                Err(err) => return Err(self.report(err)),
            }
        }
    }

    /// Like [`Vm::run`], but gives up once `deadline` has passed.
    pub fn run_with_deadline(
        &mut self,
        table: &ExpTable,
        entry: VmExpId,
        deadline: Instant,
    ) -> Result<Value, VmError> {
        self.start(entry);
        debug!(entry = entry.index(), "vm run started with deadline");
        loop {
            if self.stats.instructions % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                return Err(self.report(VmError::DeadlineExceeded(self.stats.instructions)));
            }
            match self.step(table) {
                Ok(Step::Running) => {}
                Ok(Step::Halted(value)) => return Ok(self.halted(value)),
                Err(err) => return Err(self.report(err)),
            }
        }
    }

    /// Point the machine at `entry` with empty registers, for use with
    /// [`Vm::step`].
    pub fn start(&mut self, entry: VmExpId) {
        self.regs = Registers::at(entry);
        self.depth = 0;
        self.stats = ExecStats::default();
    }

    /// Execute a single instruction.
    pub fn step(&mut self, table: &ExpTable) -> Result<Step, VmError> {
        if let Some(limit) = self.instruction_limit {
            if self.stats.instructions >= limit {
                return Err(VmError::InstructionLimitExceeded(limit));
            }
        }
        let x = self.regs.x;
        let exp = *table.get(x).ok_or_else(|| {
            malformed(format!("{x} is out of range for a table of {}", table.len()))
        })?;
        self.stats.instructions += 1;
        trace!(x = x.index(), op = exp.opcode().name(), "step");

        match exp {
            VmExp::Halt => return Ok(Step::Halted(self.regs.a)),
            VmExp::Refer { var, next } => {
                self.regs.a = self.lookup(table, var)?;
                self.regs.x = next;
            }
            VmExp::Constant { value, next } => {
                self.regs.a = value;
                self.regs.x = next;
            }
            VmExp::Close {
                formals,
                body,
                next,
            } => {
                let closure = self.arena.alloc(Closure {
                    formals,
                    body,
                    env: self.regs.e,
                })?;
                self.regs.a = Value::Closure(closure);
                self.regs.x = next;
            }
            VmExp::Test { then, else_ } => {
                self.regs.x = if self.regs.a.is_truthy() { then } else { else_ };
            }
            VmExp::Assign { var, next } => {
                let value = self.regs.a;
                self.assign(table, var, value)?;
                self.regs.x = next;
            }
            VmExp::Conti { next } => {
                self.regs.a = self.capture()?;
                self.regs.x = next;
            }
            VmExp::Nuate { stack, var } => {
                if let Some(var) = var {
                    self.regs.a = self.lookup(table, var)?;
                }
                self.reinstate(stack, None)?;
            }
            VmExp::Frame { return_to, next } => {
                self.push_frame(return_to)?;
                self.regs.x = next;
            }
            VmExp::Argument { next } => {
                self.regs.r.push(self.regs.a);
                self.regs.x = next;
            }
            VmExp::Apply => self.apply(table)?,
            VmExp::Return => self.pop_frame()?,
        }
        Ok(Step::Running)
    }

    // --- internal helpers ---

    fn halted(&self, value: Value) -> Value {
        debug!(
            instructions = self.stats.instructions,
            frames_pushed = self.stats.frames_pushed,
            max_frame_depth = self.stats.max_frame_depth,
            "vm halted"
        );
        value
    }

    fn report(&self, err: VmError) -> VmError {
        if err.is_fatal() {
            error!(error = %err, x = self.regs.x.index(), depth = self.depth, "fatal vm error");
        } else {
            debug!(error = %err, x = self.regs.x.index(), "vm run failed");
        }
        err
    }

    fn unbound(&self, var: IntStr) -> VmError {
        let name = match self.strings.try_resolve(var) {
            Some(name) => name.to_string(),
            None => var.to_string(),
        };
        VmError::UnboundVariable { id: var, name }
    }

    fn lookup(&self, table: &ExpTable, var: IntStr) -> Result<Value, VmError> {
        match find_local(&self.arena, table, self.regs.e, var) {
            Lookup::Local(slot) => self
                .arena
                .try_slice(slot.values)
                .and_then(|values| values.get(slot.index))
                .copied()
                .ok_or_else(|| malformed("environment rib is stale")),
            Lookup::Free => self.globals.get(var).ok_or_else(|| self.unbound(var)),
            Lookup::Broken => Err(malformed("environment frame is stale")),
        }
    }

    fn assign(&mut self, table: &ExpTable, var: IntStr, value: Value) -> Result<(), VmError> {
        match find_local(&self.arena, table, self.regs.e, var) {
            Lookup::Local(slot) => {
                let cell = self
                    .arena
                    .try_slice_mut(slot.values)
                    .and_then(|values| values.get_mut(slot.index))
                    .ok_or_else(|| malformed("environment rib is stale"))?;
                *cell = value;
                Ok(())
            }
            Lookup::Free if self.globals.set(var, value) => Ok(()),
            Lookup::Free => Err(self.unbound(var)),
            Lookup::Broken => Err(malformed("environment frame is stale")),
        }
    }

    fn push_frame(&mut self, return_to: VmExpId) -> Result<(), VmError> {
        let frame = CallFrame::push(
            &mut self.arena,
            return_to,
            self.regs.e,
            &self.regs.r,
            self.regs.s,
        )?;
        self.regs.s = Some(frame);
        self.regs.r.clear();
        self.depth += 1;
        self.stats.frames_pushed += 1;
        self.stats.max_frame_depth = self.stats.max_frame_depth.max(self.depth);
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<(), VmError> {
        let top = self
            .regs
            .s
            .ok_or(VmError::StackUnderflow { at: self.regs.x })?;
        let frame = CallFrame::load(&self.arena, top)
            .ok_or_else(|| malformed("call frame is stale"))?;
        let rib = self
            .arena
            .try_slice(frame.rib)
            .ok_or_else(|| malformed("saved argument rib is stale"))?;
        self.regs.r.clear();
        self.regs.r.extend_from_slice(rib);
        self.regs.x = frame.return_to;
        self.regs.e = frame.env;
        self.regs.s = frame.link;
        self.depth = self.depth.saturating_sub(1);
        self.stats.frames_popped += 1;
        Ok(())
    }

    fn apply(&mut self, table: &ExpTable) -> Result<(), VmError> {
        match self.regs.a {
            Value::Closure(c) => {
                let closure = *self
                    .arena
                    .try_get(c)
                    .ok_or_else(|| malformed("closure is stale"))?;
                let names = table.formals_of(closure.formals).ok_or_else(|| {
                    malformed(format!("unknown formals list {}", closure.formals.index()))
                })?;
                if names.len() != self.regs.r.len() {
                    return Err(VmError::ArityMismatch {
                        callee: self.render(self.regs.a),
                        expected: Arity::Exactly(names.len()),
                        actual: self.regs.r.len(),
                    });
                }
                let env =
                    EnvFrame::bind(&mut self.arena, closure.formals, &self.regs.r, closure.env)?;
                self.regs.r.clear();
                self.regs.e = Some(env);
                self.regs.x = closure.body;
                Ok(())
            }
            Value::Continuation(k) => self.throw(k),
            Value::Primitive(p) => {
                let prim = self
                    .primitives
                    .get(p.index())
                    .cloned()
                    .ok_or_else(|| malformed(format!("unknown primitive {}", p.index())))?;
                if !prim.arity.accepts(self.regs.r.len()) {
                    return Err(VmError::ArityMismatch {
                        callee: self.render(self.regs.a),
                        expected: prim.arity,
                        actual: self.regs.r.len(),
                    });
                }
                self.regs.a = (prim.func)(&self.regs.r)?;
                self.pop_frame()
            }
            other => Err(VmError::NotCallable {
                value: self.render(other),
            }),
        }
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("x", &self.regs.x)
            .field("depth", &self.depth)
            .field("globals", &self.globals.len())
            .field("primitives", &self.primitives.len())
            .field("arena", &self.arena)
            .finish()
    }
}
