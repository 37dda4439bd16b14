//! Shared helpers: a minimal reader and a lowering pass from s-expressions
//! to instruction graphs, enough to drive the VM from readable sources.
#![allow(dead_code)]

use snail_core::{IntStr, Keyword, Keywords, SharedStringTable};
use snail_rt::{ArenaConfig, RuntimeConfig};
use snail_vm::{Arity, ExpTable, Value, Vm, VmError, VmExpId};

#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    Int(i64),
    Atom(String),
    List(Vec<Sexp>),
}

fn tokenize(src: &str) -> Vec<String> {
    src.replace('(', " ( ")
        .replace(')', " ) ")
        .replace('\'', " ' ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn parse(tokens: &[String], pos: &mut usize) -> Sexp {
    let tok = &tokens[*pos];
    *pos += 1;
    match tok.as_str() {
        "(" => {
            let mut items = Vec::new();
            while tokens[*pos] != ")" {
                items.push(parse(tokens, pos));
            }
            *pos += 1;
            Sexp::List(items)
        }
        "'" => Sexp::List(vec![Sexp::Atom("quote".into()), parse(tokens, pos)]),
        other => match other.parse::<i64>() {
            Ok(n) => Sexp::Int(n),
            Err(_) => Sexp::Atom(other.to_string()),
        },
    }
}

/// Read every top-level form in `src`.
pub fn read_all(src: &str) -> Vec<Sexp> {
    let tokens = tokenize(src);
    let mut pos = 0;
    let mut forms = Vec::new();
    while pos < tokens.len() {
        forms.push(parse(&tokens, &mut pos));
    }
    forms
}

fn int_args(name: &str, args: &[Value]) -> Result<Vec<i64>, VmError> {
    args.iter()
        .map(|v| v.as_int().ok_or_else(|| VmError::primitive(name, "expected integer")))
        .collect()
}

fn prim_add(args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::Int(int_args("+", args)?.into_iter().sum()))
}

fn prim_sub(args: &[Value]) -> Result<Value, VmError> {
    let ns = int_args("-", args)?;
    Ok(Value::Int(match ns.as_slice() {
        [n] => -n,
        [first, rest @ ..] => rest.iter().fold(*first, |acc, n| acc - n),
        [] => 0,
    }))
}

fn prim_num_eq(args: &[Value]) -> Result<Value, VmError> {
    let ns = int_args("=", args)?;
    Ok(Value::Bool(ns.windows(2).all(|w| w[0] == w[1])))
}

fn prim_lt(args: &[Value]) -> Result<Value, VmError> {
    let ns = int_args("<", args)?;
    Ok(Value::Bool(ns.windows(2).all(|w| w[0] < w[1])))
}

/// A VM, its instruction table and the keyword cache, kept together so
/// closures and continuations survive across evaluations.
pub struct Session {
    pub vm: Vm,
    pub table: ExpTable,
    pub keywords: Keywords,
}

impl Session {
    pub fn new() -> Self {
        Self::with_blocks(1 << 16)
    }

    pub fn with_blocks(blocks: usize) -> Self {
        Self::with_strings(SharedStringTable::new(), blocks)
    }

    /// A session over an interner that other sessions may share.
    pub fn with_strings(strings: SharedStringTable, blocks: usize) -> Self {
        let config = RuntimeConfig {
            arena: ArenaConfig::with_blocks(blocks),
            ..RuntimeConfig::default()
        };
        Self::with_config(strings, &config)
    }

    /// A session whose VM is built exactly as `Vm::new` builds one.
    pub fn with_default_arena() -> Self {
        Self::with_config(SharedStringTable::new(), &RuntimeConfig::default())
    }

    pub fn with_config(strings: SharedStringTable, config: &RuntimeConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let keywords = Keywords::from_shared(&strings);
        let mut vm = Vm::with_config(strings, config).expect("arena reservation");
        vm.define_primitive("+", Arity::AtLeast(0), prim_add);
        vm.define_primitive("-", Arity::AtLeast(1), prim_sub);
        vm.define_primitive("=", Arity::AtLeast(1), prim_num_eq);
        vm.define_primitive("<", Arity::AtLeast(1), prim_lt);
        Self {
            vm,
            table: ExpTable::new(),
            keywords,
        }
    }

    pub fn sym(&self, name: &str) -> IntStr {
        self.vm.strings().intern(name)
    }

    /// Lower every form in `src`, in order, ending in a fresh `Halt`.
    pub fn compile(&mut self, src: &str) -> VmExpId {
        let forms = read_all(src);
        let mut next = self.table.halt();
        for form in forms.iter().rev() {
            next = self.lower(form, next);
        }
        self.table.validate().expect("lowered table must validate");
        next
    }

    pub fn eval(&mut self, src: &str) -> Result<Value, VmError> {
        let entry = self.compile(src);
        self.vm.run(&self.table, entry)
    }

    pub fn eval_int(&mut self, src: &str) -> i64 {
        match self.eval(src) {
            Ok(Value::Int(n)) => n,
            other => panic!("{src} evaluated to {other:?}"),
        }
    }

    fn keyword(&self, head: &Sexp) -> Option<Keyword> {
        match head {
            Sexp::Atom(name) => self
                .vm
                .strings()
                .get(name)
                .and_then(|id| self.keywords.classify(id)),
            _ => None,
        }
    }

    fn lower(&mut self, exp: &Sexp, next: VmExpId) -> VmExpId {
        match exp {
            Sexp::Int(n) => self.table.constant(Value::Int(*n), next),
            Sexp::Atom(a) if a == "#t" => self.table.constant(Value::TRUE, next),
            Sexp::Atom(a) if a == "#f" => self.table.constant(Value::FALSE, next),
            Sexp::Atom(name) => {
                let id = self.sym(name);
                self.table.refer(id, next)
            }
            Sexp::List(items) if items.is_empty() => self.table.constant(Value::Nil, next),
            Sexp::List(items) => match self.keyword(&items[0]) {
                Some(Keyword::Quote) => {
                    let value = match &items[1] {
                        Sexp::Int(n) => Value::Int(*n),
                        Sexp::Atom(name) => Value::Symbol(self.sym(name)),
                        Sexp::List(_) => Value::Nil,
                    };
                    self.table.constant(value, next)
                }
                Some(Keyword::Lambda) => {
                    let formals: Vec<IntStr> = match &items[1] {
                        Sexp::List(params) => params
                            .iter()
                            .map(|p| match p {
                                Sexp::Atom(name) => self.sym(name),
                                other => panic!("bad formal {other:?}"),
                            })
                            .collect(),
                        other => panic!("bad formals {other:?}"),
                    };
                    let ret = self.table.return_();
                    let body = self.lower_body(&items[2..], ret);
                    self.table.close(&formals, body, next)
                }
                Some(Keyword::If) => {
                    let then = self.lower(&items[2], next);
                    let else_ = match items.get(3) {
                        Some(e) => self.lower(e, next),
                        None => self.table.constant(Value::Unspecified, next),
                    };
                    let test = self.table.test(then, else_);
                    self.lower(&items[1], test)
                }
                Some(Keyword::Set) | Some(Keyword::Define) => {
                    let id = match &items[1] {
                        Sexp::Atom(name) => self.sym(name),
                        other => panic!("bad binding target {other:?}"),
                    };
                    if self.keyword(&items[0]) == Some(Keyword::Define)
                        && !self.vm.globals().contains(id)
                    {
                        self.vm.globals_mut().define(id, Value::Unspecified);
                    }
                    let assign = self.table.assign(id, next);
                    self.lower(&items[2], assign)
                }
                Some(Keyword::Begin) => self.lower_body(&items[1..], next),
                Some(Keyword::CallCc) => {
                    let apply = self.table.apply();
                    let callee = self.lower(&items[1], apply);
                    let arg = self.table.argument(callee);
                    let conti = self.table.conti(arg);
                    if self.table.is_tail(next) {
                        conti
                    } else {
                        self.table.frame(next, conti)
                    }
                }
                _ => {
                    let apply = self.table.apply();
                    let mut start = self.lower(&items[0], apply);
                    for arg in items[1..].iter().rev() {
                        let push = self.table.argument(start);
                        start = self.lower(arg, push);
                    }
                    if self.table.is_tail(next) {
                        start
                    } else {
                        self.table.frame(next, start)
                    }
                }
            },
        }
    }

    fn lower_body(&mut self, forms: &[Sexp], next: VmExpId) -> VmExpId {
        let mut next = next;
        for form in forms.iter().rev() {
            next = self.lower(form, next);
        }
        next
    }
}
