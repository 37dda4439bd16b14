//! Instruction graph.
//!
//! Nodes live in an append-only table and refer to each other by index, so
//! the table can grow without invalidating anything already built. The
//! analyzer emits nodes back to front: `next` operands always name nodes
//! appended earlier, except where it chooses to validate afterwards.

use std::fmt::{self, Write as _};

use snail_core::{IntStr, Keyword, StringTable};

use crate::values::Value;
use crate::vm::{FrameRef, VmError};

/// Index of a node in an [`ExpTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmExpId(u32);

impl VmExpId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VmExpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#:vmx {}", self.0)
    }
}

/// Index of a formal-parameter list in an [`ExpTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormalsId(u32);

impl FormalsId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VmExp {
    Halt,
    Refer {
        var: IntStr,
        next: VmExpId,
    },
    Constant {
        value: Value,
        next: VmExpId,
    },
    Close {
        formals: FormalsId,
        body: VmExpId,
        next: VmExpId,
    },
    Test {
        then: VmExpId,
        else_: VmExpId,
    },
    Assign {
        var: IntStr,
        next: VmExpId,
    },
    Conti {
        next: VmExpId,
    },
    /// Reinstate `stack`, then return. With `var`, the delivered value is
    /// read from that binding first.
    Nuate {
        stack: Option<FrameRef>,
        var: Option<IntStr>,
    },
    Frame {
        return_to: VmExpId,
        next: VmExpId,
    },
    Argument {
        next: VmExpId,
    },
    Apply,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Halt,
    Refer,
    Constant,
    Close,
    Test,
    Assign,
    Conti,
    Nuate,
    Frame,
    Argument,
    Apply,
    Return,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Halt => "halt",
            Opcode::Refer => "refer",
            Opcode::Constant => "constant",
            Opcode::Close => "close",
            Opcode::Test => "test",
            Opcode::Assign => "assign",
            Opcode::Conti => "conti",
            Opcode::Nuate => "nuate",
            Opcode::Frame => "frame",
            Opcode::Argument => "argument",
            Opcode::Apply => "apply",
            Opcode::Return => "return",
        }
    }

    /// The opcode a special form lowers to. Forms that only sequence or
    /// rewrite other forms have none.
    pub fn for_keyword(kw: Keyword) -> Option<Opcode> {
        match kw {
            Keyword::Quote => Some(Opcode::Constant),
            Keyword::Lambda => Some(Opcode::Close),
            Keyword::If => Some(Opcode::Test),
            Keyword::Set => Some(Opcode::Assign),
            Keyword::CallCc => Some(Opcode::Conti),
            Keyword::PInvoke => Some(Opcode::Apply),
            Keyword::Define
            | Keyword::Begin
            | Keyword::DefineSyntax
            | Keyword::Ellipsis
            | Keyword::Underscore => None,
        }
    }
}

impl VmExp {
    pub fn opcode(&self) -> Opcode {
        match self {
            VmExp::Halt => Opcode::Halt,
            VmExp::Refer { .. } => Opcode::Refer,
            VmExp::Constant { .. } => Opcode::Constant,
            VmExp::Close { .. } => Opcode::Close,
            VmExp::Test { .. } => Opcode::Test,
            VmExp::Assign { .. } => Opcode::Assign,
            VmExp::Conti { .. } => Opcode::Conti,
            VmExp::Nuate { .. } => Opcode::Nuate,
            VmExp::Frame { .. } => Opcode::Frame,
            VmExp::Argument { .. } => Opcode::Argument,
            VmExp::Apply => Opcode::Apply,
            VmExp::Return => Opcode::Return,
        }
    }

    /// Instruction indices this node may transfer control to.
    pub fn successors(&self) -> impl Iterator<Item = VmExpId> {
        let (a, b) = match *self {
            VmExp::Refer { next, .. }
            | VmExp::Constant { next, .. }
            | VmExp::Assign { next, .. }
            | VmExp::Conti { next }
            | VmExp::Argument { next } => (Some(next), None),
            VmExp::Close { body, next, .. } => (Some(body), Some(next)),
            VmExp::Test { then, else_ } => (Some(then), Some(else_)),
            VmExp::Frame { return_to, next } => (Some(next), Some(return_to)),
            VmExp::Halt | VmExp::Nuate { .. } | VmExp::Apply | VmExp::Return => (None, None),
        };
        a.into_iter().chain(b)
    }
}

/// Append-only instruction table.
#[derive(Debug, Clone, Default)]
pub struct ExpTable {
    exps: Vec<VmExp>,
    formals: Vec<Box<[IntStr]>>,
}

impl ExpTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            exps: Vec::with_capacity(n),
            formals: Vec::new(),
        }
    }

    pub fn append(&mut self, exp: VmExp) -> VmExpId {
        let id = VmExpId(self.exps.len() as u32);
        self.exps.push(exp);
        id
    }

    pub fn get(&self, id: VmExpId) -> Option<&VmExp> {
        self.exps.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.exps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VmExpId, &VmExp)> + '_ {
        self.exps
            .iter()
            .enumerate()
            .map(|(i, e)| (VmExpId(i as u32), e))
    }

    /// Register a formal-parameter list for use by `Close`.
    pub fn add_formals(&mut self, names: &[IntStr]) -> FormalsId {
        let id = FormalsId(self.formals.len() as u32);
        self.formals.push(names.into());
        id
    }

    pub fn formals_of(&self, id: FormalsId) -> Option<&[IntStr]> {
        self.formals.get(id.index()).map(|f| &**f)
    }

    /// A call whose continuation is `next` is a tail call when `next` is a
    /// `Return`: no frame needs to be pushed for it.
    pub fn is_tail(&self, next: VmExpId) -> bool {
        matches!(self.get(next), Some(VmExp::Return))
    }

    // --- builders ---

    pub fn halt(&mut self) -> VmExpId {
        self.append(VmExp::Halt)
    }

    pub fn refer(&mut self, var: IntStr, next: VmExpId) -> VmExpId {
        self.append(VmExp::Refer { var, next })
    }

    pub fn constant(&mut self, value: Value, next: VmExpId) -> VmExpId {
        self.append(VmExp::Constant { value, next })
    }

    pub fn close(&mut self, formals: &[IntStr], body: VmExpId, next: VmExpId) -> VmExpId {
        let formals = self.add_formals(formals);
        self.append(VmExp::Close {
            formals,
            body,
            next,
        })
    }

    pub fn test(&mut self, then: VmExpId, else_: VmExpId) -> VmExpId {
        self.append(VmExp::Test { then, else_ })
    }

    pub fn assign(&mut self, var: IntStr, next: VmExpId) -> VmExpId {
        self.append(VmExp::Assign { var, next })
    }

    pub fn conti(&mut self, next: VmExpId) -> VmExpId {
        self.append(VmExp::Conti { next })
    }

    pub fn nuate(&mut self, stack: Option<FrameRef>, var: Option<IntStr>) -> VmExpId {
        self.append(VmExp::Nuate { stack, var })
    }

    pub fn frame(&mut self, return_to: VmExpId, next: VmExpId) -> VmExpId {
        self.append(VmExp::Frame { return_to, next })
    }

    pub fn argument(&mut self, next: VmExpId) -> VmExpId {
        self.append(VmExp::Argument { next })
    }

    pub fn apply(&mut self) -> VmExpId {
        self.append(VmExp::Apply)
    }

    pub fn return_(&mut self) -> VmExpId {
        self.append(VmExp::Return)
    }

    /// Check every cross-reference before execution.
    pub fn validate(&self) -> Result<(), VmError> {
        for (id, exp) in self.iter() {
            for target in exp.successors() {
                if target.index() >= self.exps.len() {
                    return Err(VmError::MalformedInstructionGraph(format!(
                        "{id} ({}) targets missing node {target}",
                        exp.opcode().name()
                    )));
                }
            }
            if let VmExp::Close { formals, .. } = exp {
                let names = self.formals_of(*formals).ok_or_else(|| {
                    VmError::MalformedInstructionGraph(format!(
                        "{id} (close) uses unknown formals list {}",
                        formals.index()
                    ))
                })?;
                for (i, name) in names.iter().enumerate() {
                    if names[..i].contains(name) {
                        return Err(VmError::MalformedInstructionGraph(format!(
                            "{id} (close) binds {name} twice"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// One node per line, indices zero-padded to the table width.
    pub fn disassemble(&self, strings: &StringTable) -> String {
        let width = self.exps.len().saturating_sub(1).to_string().len();
        let mut out = String::new();
        for (id, exp) in self.iter() {
            let _ = write!(out, "  [{:0width$}] ", id.index());
            self.write_exp(&mut out, exp, strings);
            out.push('\n');
        }
        out
    }

    fn write_exp(&self, out: &mut String, exp: &VmExp, strings: &StringTable) {
        let sym = |id: IntStr| strings.try_resolve(id).unwrap_or("?").to_string();
        let _ = match *exp {
            VmExp::Halt => write!(out, "(halt)"),
            VmExp::Refer { var, next } => write!(out, "(refer {} {next})", sym(var)),
            VmExp::Constant { value, next } => {
                let shown = match value {
                    Value::Symbol(id) => format!("'{}", sym(id)),
                    other => other.to_string(),
                };
                write!(out, "(constant {shown} {next})")
            }
            VmExp::Close {
                formals,
                body,
                next,
            } => {
                let names: Vec<String> = self
                    .formals_of(formals)
                    .unwrap_or(&[])
                    .iter()
                    .map(|&n| sym(n))
                    .collect();
                write!(out, "(close ({}) {body} {next})", names.join(" "))
            }
            VmExp::Test { then, else_ } => write!(out, "(test {then} {else_})"),
            VmExp::Assign { var, next } => write!(out, "(assign {} {next})", sym(var)),
            VmExp::Conti { next } => write!(out, "(conti {next})"),
            VmExp::Nuate { stack, var } => {
                let var = var.map(sym).unwrap_or_else(|| "#f".into());
                match stack {
                    Some(s) => write!(out, "(nuate {var} #:frame {})", s.addr().offset()),
                    None => write!(out, "(nuate {var} #:frame ())"),
                }
            }
            VmExp::Frame { return_to, next } => write!(out, "(frame {next} {return_to})"),
            VmExp::Argument { next } => write!(out, "(argument {next})"),
            VmExp::Apply => write!(out, "(apply)"),
            VmExp::Return => write!(out, "(return)"),
        };
    }
}
