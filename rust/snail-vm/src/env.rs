//! Lexical environments and the global table.

use std::collections::HashMap;

use snail_core::IntStr;
use snail_rt::{ALink, ARef, ASlice, Arena, ArenaError};

use crate::exp::{ExpTable, FormalsId};
use crate::values::Value;

pub type EnvRef = ARef<EnvHeader>;

/// Arena layout of an environment frame: this one-block header, then one
/// `Value` per formal in the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvHeader {
    names: FormalsId,
    parent: ALink<EnvHeader>,
    len: u32,
}

/// One rib of bindings created by applying a closure.
///
/// The frame's shape is fixed at creation; `set!` only rewrites slots in
/// `values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvFrame {
    pub names: FormalsId,
    pub values: ASlice<Value>,
    pub parent: Option<EnvRef>,
}

impl EnvFrame {
    /// Allocate a frame binding `names` to `values`, inside `parent`.
    pub fn bind(
        arena: &mut Arena,
        names: FormalsId,
        values: &[Value],
        parent: Option<EnvRef>,
    ) -> Result<EnvRef, ArenaError> {
        let header = EnvHeader {
            names,
            parent: ALink::new(parent),
            // A longer tail cannot fit the arena and fails to allocate.
            len: u32::try_from(values.len()).unwrap_or(u32::MAX),
        };
        arena.alloc_with_tail(header, values)
    }

    /// Read the frame at `env`. `None` if the handle is stale.
    pub fn load(arena: &Arena, env: EnvRef) -> Option<Self> {
        let header = *arena.try_get(env)?;
        Some(Self {
            names: header.names,
            values: Arena::tail_of(env, header.len as usize),
            parent: header.parent.resolve(env.addr().generation()),
        })
    }
}

/// Location of a lexical binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub values: ASlice<Value>,
    pub index: usize,
}

/// Outcome of walking the environment chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Local(Slot),
    /// Not lexically bound; try the globals.
    Free,
    /// A frame or formals list could not be read.
    Broken,
}

/// Find the innermost binding of `var` starting at `env`.
pub fn find_local(arena: &Arena, table: &ExpTable, env: Option<EnvRef>, var: IntStr) -> Lookup {
    let mut cursor = env;
    while let Some(frame_ref) = cursor {
        let Some(frame) = EnvFrame::load(arena, frame_ref) else {
            return Lookup::Broken;
        };
        let Some(names) = table.formals_of(frame.names) else {
            return Lookup::Broken;
        };
        if let Some(index) = names.iter().position(|&n| n == var) {
            return Lookup::Local(Slot {
                values: frame.values,
                index,
            });
        }
        cursor = frame.parent;
    }
    Lookup::Free
}

/// Global bindings, shared by every environment chain.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    bindings: HashMap<IntStr, Value>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: IntStr) -> Option<Value> {
        self.bindings.get(&var).copied()
    }

    pub fn contains(&self, var: IntStr) -> bool {
        self.bindings.contains_key(&var)
    }

    /// Create or overwrite a binding.
    pub fn define(&mut self, var: IntStr, value: Value) {
        self.bindings.insert(var, value);
    }

    /// Overwrite an existing binding. Returns false if `var` is unbound.
    pub fn set(&mut self, var: IntStr, value: Value) -> bool {
        match self.bindings.get_mut(&var) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Drop bindings whose values point into the arena.
    pub fn retain_immediates(&mut self) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, v| !v.is_boxed());
        before - self.bindings.len()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
