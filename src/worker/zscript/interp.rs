//! Tree-walking interpreter for zscript programs.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;

use super::ast::{BinOp, Body, Expr, FunctionDecl, Literal, LogicalOp, Program, Stmt, UnaryOp};
use super::ScriptError;
use crate::codec::{CodecError, Value, ZMap, ZPair, ZRecord};
use crate::worker::runtime::CallbackHost;

/// Nested calls deeper than this abort the evaluation.
pub const MAX_CALL_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Pair,
    Ref,
    Len,
    Str,
    Int,
    ToMap,
    Entries,
    Keys,
    Get,
    Split,
    Join,
    Call,
}

impl Builtin {
    const ALL: [Builtin; 12] = [
        Builtin::Pair,
        Builtin::Ref,
        Builtin::Len,
        Builtin::Str,
        Builtin::Int,
        Builtin::ToMap,
        Builtin::Entries,
        Builtin::Keys,
        Builtin::Get,
        Builtin::Split,
        Builtin::Join,
        Builtin::Call,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Pair => "pair",
            Builtin::Ref => "ref",
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::ToMap => "toMap",
            Builtin::Entries => "entries",
            Builtin::Keys => "keys",
            Builtin::Get => "get",
            Builtin::Split => "split",
            Builtin::Join => "join",
            Builtin::Call => "call",
        }
    }
}

pub struct Closure {
    decl: Rc<FunctionDecl>,
    env: Env,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.decl.name)
    }
}

/// Values as the interpreter sees them; integers and functions never leave it.
#[derive(Debug, Clone)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Ref(String),
    List(Vec<ScriptValue>),
    Pair(Box<ScriptValue>, Box<ScriptValue>, Option<Json>),
    Map(Vec<(ScriptValue, ScriptValue)>),
    Record(Option<Json>, BTreeMap<String, ScriptValue>),
    Function(Rc<Closure>),
    Builtin(Builtin),
}

impl ScriptValue {
    fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) => "integer",
            ScriptValue::Str(_) => "string",
            ScriptValue::Ref(_) => "reference",
            ScriptValue::List(_) => "list",
            ScriptValue::Pair(..) => "pair",
            ScriptValue::Map(_) => "map",
            ScriptValue::Record(..) => "record",
            ScriptValue::Function(_) | ScriptValue::Builtin(_) => "function",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            ScriptValue::Null => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Int(n) => *n != 0,
            ScriptValue::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    fn equals(&self, other: &ScriptValue) -> bool {
        use ScriptValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Str(a), Str(b)) | (Ref(a), Ref(b)) => a == b,
            (List(a), List(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y)),
            (Pair(a1, a2, _), Pair(b1, b2, _)) => a1.equals(b1) && a2.equals(b2),
            (Map(a), Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka.equals(kb) && va.equals(vb))
            }
            (Record(ta, a), Record(tb, b)) => {
                ta == tb
                    && a.len() == b.len()
                    && a.iter().zip(b).all(|((ka, va), (kb, vb))| ka == kb && va.equals(vb))
            }
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            (Builtin(a), Builtin(b)) => a == b,
            _ => false,
        }
    }

    /// Text used by `str()`, string concatenation and `throw`.
    pub fn to_text(&self) -> String {
        match self {
            ScriptValue::Null => "null".to_string(),
            ScriptValue::Bool(b) => b.to_string(),
            ScriptValue::Int(n) => n.to_string(),
            ScriptValue::Str(s) | ScriptValue::Ref(s) => s.clone(),
            ScriptValue::List(items) => items
                .iter()
                .map(ScriptValue::to_text)
                .collect::<Vec<_>>()
                .join(","),
            ScriptValue::Pair(k1, k2, _) => format!("({}, {})", k1.to_text(), k2.to_text()),
            ScriptValue::Map(entries) => {
                let body: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_text(), v.to_text()))
                    .collect();
                format!("{{{}}}", body.join(", "))
            }
            ScriptValue::Record(_, fields) => {
                let body: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_text()))
                    .collect();
                format!("<{}>", body.join(", "))
            }
            ScriptValue::Function(closure) => format!("function {}", closure.decl.name),
            ScriptValue::Builtin(builtin) => format!("function {}", builtin.name()),
        }
    }
}

fn map_insert(entries: &mut Vec<(ScriptValue, ScriptValue)>, key: ScriptValue, value: ScriptValue) {
    match entries.iter_mut().find(|(k, _)| k.equals(&key)) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

/// Decoded argument -> interpreter value
pub fn from_value(value: Value) -> ScriptValue {
    match value {
        Value::Str(s) => ScriptValue::Str(s),
        Value::Reference(id) => ScriptValue::Ref(id),
        Value::Bool(b) => ScriptValue::Bool(b),
        Value::Unit => ScriptValue::Null,
        Value::List(items) => ScriptValue::List(items.into_iter().map(from_value).collect()),
        Value::Pair(pair) => ScriptValue::Pair(
            Box::new(from_value(*pair.k1)),
            Box::new(from_value(*pair.k2)),
            pair.declared_type,
        ),
        Value::Map(map) => ScriptValue::Map(
            map.iter()
                .map(|(k, v)| (from_value(k.clone()), from_value(v.clone())))
                .collect(),
        ),
        Value::Record(record) => ScriptValue::Record(
            record.declared_type,
            record
                .fields
                .into_iter()
                .map(|(k, v)| (k, from_value(v)))
                .collect(),
        ),
    }
}

/// Interpreter value -> codec value; integers and functions have no wire form.
pub fn to_value(value: &ScriptValue) -> Result<Value, CodecError> {
    Ok(match value {
        ScriptValue::Null => Value::Unit,
        ScriptValue::Bool(b) => Value::Bool(*b),
        ScriptValue::Str(s) => Value::Str(s.clone()),
        ScriptValue::Ref(id) => Value::Reference(id.clone()),
        ScriptValue::List(items) => {
            Value::List(items.iter().map(to_value).collect::<Result<Vec<_>, _>>()?)
        }
        ScriptValue::Pair(k1, k2, declared) => {
            let pair = ZPair::new(to_value(k1)?, to_value(k2)?);
            Value::Pair(match declared {
                Some(t) => pair.with_type(t.clone()),
                None => pair,
            })
        }
        ScriptValue::Map(entries) => {
            let mut map = ZMap::new();
            for (k, v) in entries {
                map.insert(to_value(k)?, to_value(v)?);
            }
            Value::Map(map)
        }
        ScriptValue::Record(declared, fields) => {
            let mut record = ZRecord::new(declared.clone());
            for (k, v) in fields {
                record.fields.insert(k.clone(), to_value(v)?);
            }
            Value::Record(record)
        }
        ScriptValue::Int(n) => {
            return Err(CodecError::Encode(format!(
                "{} (integers have no wire form; use str())",
                n
            )))
        }
        other => return Err(CodecError::Encode(other.to_text())),
    })
}

struct Binding {
    value: ScriptValue,
    mutable: bool,
}

#[derive(Default)]
struct Scope {
    vars: HashMap<String, Binding>,
    parent: Option<Env>,
}

type Env = Rc<RefCell<Scope>>;

fn child_scope(parent: &Env) -> Env {
    Rc::new(RefCell::new(Scope {
        vars: HashMap::new(),
        parent: Some(Rc::clone(parent)),
    }))
}

fn define(env: &Env, name: &str, value: ScriptValue, mutable: bool) -> Result<(), ScriptError> {
    let mut scope = env.borrow_mut();
    if scope.vars.contains_key(name) {
        return Err(runtime(format!(
            "SyntaxError: identifier '{}' has already been declared",
            name
        )));
    }
    scope.vars.insert(name.to_string(), Binding { value, mutable });
    Ok(())
}

fn lookup(env: &Env, name: &str) -> Option<ScriptValue> {
    let scope = env.borrow();
    match scope.vars.get(name) {
        Some(binding) => Some(binding.value.clone()),
        None => scope.parent.as_ref().and_then(|parent| lookup(parent, name)),
    }
}

fn assign(env: &Env, name: &str, value: ScriptValue) -> Result<(), ScriptError> {
    let mut scope = env.borrow_mut();
    if let Some(binding) = scope.vars.get_mut(name) {
        if !binding.mutable {
            return Err(runtime(format!(
                "TypeError: assignment to constant variable '{}'",
                name
            )));
        }
        binding.value = value;
        return Ok(());
    }
    match scope.parent.clone() {
        Some(parent) => {
            drop(scope);
            assign(&parent, name, value)
        }
        None => Err(runtime(format!("ReferenceError: {} is not defined", name))),
    }
}

fn runtime(message: String) -> ScriptError {
    ScriptError::Runtime(message)
}

fn type_error(message: String) -> ScriptError {
    runtime(format!("TypeError: {}", message))
}

enum Flow {
    Normal,
    Return(ScriptValue),
}

/// One evaluation: a fresh global scope per run.
pub struct Interpreter<'h> {
    host: &'h mut dyn CallbackHost,
    depth: usize,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn CallbackHost) -> Self {
        Self { host, depth: 0 }
    }

    /// Run the program's top level, then call `function_name` with `args`.
    pub fn run(
        &mut self,
        program: &Program,
        function_name: &str,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError> {
        let globals: Env = Rc::new(RefCell::new(Scope::default()));
        for builtin in Builtin::ALL {
            define(&globals, builtin.name(), ScriptValue::Builtin(builtin), true)?;
        }

        if let Flow::Return(_) = self.exec_block(&program.statements, &globals)? {
            return Err(runtime(
                "SyntaxError: illegal return statement at top level".to_string(),
            ));
        }

        match lookup(&globals, function_name) {
            Some(target @ (ScriptValue::Function(_) | ScriptValue::Builtin(_))) => {
                self.call_value(&target, args)
            }
            Some(other) => Err(type_error(format!(
                "{} is a {}, not a function",
                function_name,
                other.kind()
            ))),
            None => Err(runtime(format!(
                "ReferenceError: implementation does not define {}",
                function_name
            ))),
        }
    }

    // -- Statements --

    fn exec_block(&mut self, statements: &[Stmt], env: &Env) -> Result<Flow, ScriptError> {
        // Function declarations are visible throughout their block.
        for statement in statements {
            if let Stmt::Function(decl) = statement {
                let closure = Closure {
                    decl: Rc::clone(decl),
                    env: Rc::clone(env),
                };
                define(env, &decl.name, ScriptValue::Function(Rc::new(closure)), true)?;
            }
        }

        for statement in statements {
            if let Flow::Return(value) = self.exec(statement, env)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, statement: &Stmt, env: &Env) -> Result<Flow, ScriptError> {
        match statement {
            Stmt::Let {
                name,
                mutable,
                init,
            } => {
                let value = match init {
                    Some(expr) => self.eval(expr, env)?,
                    None => ScriptValue::Null,
                };
                define(env, name, value, *mutable)?;
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value, env)?;
                assign(env, name, value)?;
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => ScriptValue::Null,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition, env)?.truthy() {
                    return self.exec_block(then, &child_scope(env));
                }
                if let Some(otherwise) = otherwise {
                    return self.exec_block(otherwise, &child_scope(env));
                }
            }
            Stmt::ForOf {
                name,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, env)?;
                for item in iterate(iterable)? {
                    let scope = child_scope(env);
                    define(&scope, name, item, false)?;
                    if let Flow::Return(value) = self.exec_block(body, &scope)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::Throw(value) => {
                let thrown = self.eval(value, env)?;
                return Err(ScriptError::Thrown(thrown.to_text()));
            }
            Stmt::Function(_) => {}
            Stmt::Block(statements) => return self.exec_block(statements, &child_scope(env)),
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
            }
        }
        Ok(Flow::Normal)
    }

    // -- Expressions --

    fn eval(&mut self, expr: &Expr, env: &Env) -> Result<ScriptValue, ScriptError> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Int(n) => ScriptValue::Int(*n),
                Literal::Str(s) => ScriptValue::Str(s.clone()),
                Literal::Bool(b) => ScriptValue::Bool(*b),
                Literal::Null => ScriptValue::Null,
            }),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item, env))
                .collect::<Result<Vec<_>, _>>()
                .map(ScriptValue::List),
            Expr::Ident(name) => lookup(env, name)
                .ok_or_else(|| runtime(format!("ReferenceError: {} is not defined", name))),
            Expr::Call { callee, args, .. } => {
                let callee = self.eval(callee, env)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_value(&callee, args)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, env)?;
                let index = self.eval(index, env)?;
                index_value(&target, &index)
            }
            Expr::Member { target, name } => member(&self.eval(target, env)?, name),
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand, env)?;
                match op {
                    UnaryOp::Not => Ok(ScriptValue::Bool(!operand.truthy())),
                    UnaryOp::Neg => match operand {
                        ScriptValue::Int(n) => n
                            .checked_neg()
                            .map(ScriptValue::Int)
                            .ok_or_else(|| runtime("RangeError: integer overflow".to_string())),
                        other => Err(type_error(format!("cannot negate a {}", other.kind()))),
                    },
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, env),
                }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition, env)?.truthy() {
                    self.eval(then, env)
                } else {
                    self.eval(otherwise, env)
                }
            }
            Expr::Arrow(decl) => Ok(ScriptValue::Function(Rc::new(Closure {
                decl: Rc::clone(decl),
                env: Rc::clone(env),
            }))),
        }
    }

    fn call_value(
        &mut self,
        callee: &ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError> {
        match callee {
            ScriptValue::Function(closure) => self.call_closure(closure, args),
            ScriptValue::Builtin(builtin) => self.call_builtin(*builtin, args),
            other => Err(type_error(format!("{} is not a function", other.kind()))),
        }
    }

    fn call_closure(
        &mut self,
        closure: &Closure,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(runtime(format!(
                "RangeError: maximum call depth of {} exceeded",
                MAX_CALL_DEPTH
            )));
        }
        self.depth += 1;
        let result = self.invoke_closure(closure, args);
        self.depth -= 1;
        result
    }

    fn invoke_closure(
        &mut self,
        closure: &Closure,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError> {
        let scope = child_scope(&closure.env);
        let mut args = args.into_iter();
        for param in &closure.decl.params {
            define(&scope, param, args.next().unwrap_or(ScriptValue::Null), true)?;
        }
        match &closure.decl.body {
            Body::Expr(expr) => self.eval(expr, &scope),
            Body::Block(statements) => match self.exec_block(statements, &scope)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(ScriptValue::Null),
            },
        }
    }

    fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError> {
        let given = args.len();
        let arity_error = |expected: &str| {
            type_error(format!(
                "{}() expects {} argument(s), got {}",
                builtin.name(),
                expected,
                given
            ))
        };

        match builtin {
            Builtin::Pair => match <[ScriptValue; 2]>::try_from(args) {
                Ok([k1, k2]) => Ok(ScriptValue::Pair(Box::new(k1), Box::new(k2), None)),
                Err(_) => Err(arity_error("2")),
            },
            Builtin::Ref => match args.as_slice() {
                [ScriptValue::Str(id)] | [ScriptValue::Ref(id)] if !id.is_empty() => {
                    Ok(ScriptValue::Ref(id.clone()))
                }
                _ => Err(type_error("ref() expects one non-empty string".to_string())),
            },
            Builtin::Len => match args.as_slice() {
                [value] => length(value),
                _ => Err(arity_error("1")),
            },
            Builtin::Str => match args.as_slice() {
                [value] => Ok(ScriptValue::Str(value.to_text())),
                _ => Err(arity_error("1")),
            },
            Builtin::Int => match args.as_slice() {
                [ScriptValue::Int(n)] => Ok(ScriptValue::Int(*n)),
                [ScriptValue::Str(s)] => s.trim().parse::<i64>().map(ScriptValue::Int).map_err(
                    |_| type_error(format!("cannot convert {:?} to an integer", s)),
                ),
                [ScriptValue::Bool(b)] => Ok(ScriptValue::Int(i64::from(*b))),
                _ => Err(type_error("int() expects a string or integer".to_string())),
            },
            Builtin::ToMap => match args.as_slice() {
                [ScriptValue::List(items)] => {
                    let mut entries = Vec::new();
                    for item in items {
                        match item {
                            ScriptValue::Pair(k, v, _) => {
                                map_insert(&mut entries, (**k).clone(), (**v).clone())
                            }
                            other => {
                                return Err(type_error(format!(
                                    "toMap() expects a list of pairs, found a {}",
                                    other.kind()
                                )))
                            }
                        }
                    }
                    Ok(ScriptValue::Map(entries))
                }
                _ => Err(type_error("toMap() expects a list of pairs".to_string())),
            },
            Builtin::Entries => match args.as_slice() {
                [ScriptValue::Map(entries)] => Ok(ScriptValue::List(
                    entries
                        .iter()
                        .map(|(k, v)| ScriptValue::Pair(Box::new(k.clone()), Box::new(v.clone()), None))
                        .collect(),
                )),
                _ => Err(type_error("entries() expects a map".to_string())),
            },
            Builtin::Keys => match args.as_slice() {
                [ScriptValue::Map(entries)] => Ok(ScriptValue::List(
                    entries.iter().map(|(k, _)| k.clone()).collect(),
                )),
                [ScriptValue::Record(_, fields)] => Ok(ScriptValue::List(
                    fields.keys().map(|k| ScriptValue::Str(k.clone())).collect(),
                )),
                _ => Err(type_error("keys() expects a map or record".to_string())),
            },
            Builtin::Get => match args.as_slice() {
                [ScriptValue::Map(entries), key] | [ScriptValue::Map(entries), key, _] => {
                    let found = entries.iter().find(|(k, _)| k.equals(key)).map(|(_, v)| v.clone());
                    Ok(found.unwrap_or_else(|| args.get(2).cloned().unwrap_or(ScriptValue::Null)))
                }
                _ => Err(type_error("get() expects a map, a key and an optional default".to_string())),
            },
            Builtin::Split => match args.as_slice() {
                [ScriptValue::Str(s), ScriptValue::Str(sep)] => {
                    let parts: Vec<ScriptValue> = if sep.is_empty() {
                        s.chars().map(|c| ScriptValue::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(|p| ScriptValue::Str(p.to_string())).collect()
                    };
                    Ok(ScriptValue::List(parts))
                }
                _ => Err(type_error("split() expects two strings".to_string())),
            },
            Builtin::Join => match args.as_slice() {
                [ScriptValue::List(items), ScriptValue::Str(sep)] => Ok(ScriptValue::Str(
                    items
                        .iter()
                        .map(ScriptValue::to_text)
                        .collect::<Vec<_>>()
                        .join(sep),
                )),
                _ => Err(type_error("join() expects a list and a string".to_string())),
            },
            Builtin::Call => self.reentrant_call(args),
        }
    }

    /// `call(functionId, ...args)`: evaluated by the orchestrator on our behalf.
    fn reentrant_call(&mut self, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
        let mut args = args.into_iter();
        let function_id = match args.next() {
            Some(ScriptValue::Str(id)) | Some(ScriptValue::Ref(id)) => id,
            _ => {
                return Err(type_error(
                    "call() expects a function id as its first argument".to_string(),
                ))
            }
        };
        let arguments = args
            .map(|arg| to_value(&arg))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| type_error(format!("cannot pass argument to {}: {}", function_id, e)))?;
        let result = self.host.call(&function_id, arguments)?;
        Ok(from_value(result))
    }
}

fn iterate(value: ScriptValue) -> Result<Vec<ScriptValue>, ScriptError> {
    match value {
        ScriptValue::List(items) => Ok(items),
        ScriptValue::Str(s) => Ok(s.chars().map(|c| ScriptValue::Str(c.to_string())).collect()),
        ScriptValue::Map(entries) => Ok(entries
            .into_iter()
            .map(|(k, v)| ScriptValue::Pair(Box::new(k), Box::new(v), None))
            .collect()),
        other => Err(type_error(format!("{} is not iterable", other.kind()))),
    }
}

fn length(value: &ScriptValue) -> Result<ScriptValue, ScriptError> {
    let n = match value {
        ScriptValue::List(items) => items.len(),
        ScriptValue::Str(s) => s.chars().count(),
        ScriptValue::Map(entries) => entries.len(),
        other => return Err(type_error(format!("a {} has no length", other.kind()))),
    };
    Ok(ScriptValue::Int(n as i64))
}

fn member(target: &ScriptValue, name: &str) -> Result<ScriptValue, ScriptError> {
    match (target, name) {
        (ScriptValue::List(_) | ScriptValue::Str(_) | ScriptValue::Map(_), "length") => {
            length(target)
        }
        (ScriptValue::Map(entries), "size") => Ok(ScriptValue::Int(entries.len() as i64)),
        (ScriptValue::Pair(k1, _, _), "K1") => Ok((**k1).clone()),
        (ScriptValue::Pair(_, k2, _), "K2") => Ok((**k2).clone()),
        (ScriptValue::Record(_, fields), field) => {
            Ok(fields.get(field).cloned().unwrap_or(ScriptValue::Null))
        }
        (other, _) => Err(type_error(format!(
            "cannot read property '{}' of {}",
            name,
            other.kind()
        ))),
    }
}

fn index_value(target: &ScriptValue, index: &ScriptValue) -> Result<ScriptValue, ScriptError> {
    match (target, index) {
        (ScriptValue::List(items), ScriptValue::Int(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(ScriptValue::Null)),
        (ScriptValue::Str(s), ScriptValue::Int(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| ScriptValue::Str(c.to_string()))
            .unwrap_or(ScriptValue::Null)),
        (ScriptValue::Map(entries), key) => Ok(entries
            .iter()
            .find(|(k, _)| k.equals(key))
            .map(|(_, v)| v.clone())
            .unwrap_or(ScriptValue::Null)),
        (ScriptValue::Record(_, fields), ScriptValue::Str(field)) => {
            Ok(fields.get(field).cloned().unwrap_or(ScriptValue::Null))
        }
        (target, index) => Err(type_error(format!(
            "cannot index a {} with a {}",
            target.kind(),
            index.kind()
        ))),
    }
}

fn binary(op: BinOp, left: ScriptValue, right: ScriptValue) -> Result<ScriptValue, ScriptError> {
    use ScriptValue::{Bool, Int, List, Str};

    let overflow = || runtime("RangeError: integer overflow".to_string());
    match (op, &left, &right) {
        (BinOp::Eq, _, _) => Ok(Bool(left.equals(&right))),
        (BinOp::NotEq, _, _) => Ok(Bool(!left.equals(&right))),

        (BinOp::Add, Int(a), Int(b)) => a.checked_add(*b).map(Int).ok_or_else(overflow),
        (BinOp::Add, Str(_), _) | (BinOp::Add, _, Str(_)) => {
            Ok(Str(left.to_text() + &right.to_text()))
        }
        (BinOp::Add, List(a), List(b)) => Ok(List(a.iter().chain(b).cloned().collect())),
        (BinOp::Sub, Int(a), Int(b)) => a.checked_sub(*b).map(Int).ok_or_else(overflow),
        (BinOp::Mul, Int(a), Int(b)) => a.checked_mul(*b).map(Int).ok_or_else(overflow),
        (BinOp::Div | BinOp::Rem, Int(_), Int(0)) => {
            Err(runtime("RangeError: division by zero".to_string()))
        }
        (BinOp::Div, Int(a), Int(b)) => a.checked_div(*b).map(Int).ok_or_else(overflow),
        (BinOp::Rem, Int(a), Int(b)) => a.checked_rem(*b).map(Int).ok_or_else(overflow),

        (BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq, _, _) => {
            let ordering = match (&left, &right) {
                (Int(a), Int(b)) => a.cmp(b),
                (Str(a), Str(b)) => a.cmp(b),
                _ => {
                    return Err(type_error(format!(
                        "cannot compare {} with {}",
                        left.kind(),
                        right.kind()
                    )))
                }
            };
            Ok(Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::LtEq => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }

        _ => Err(type_error(format!(
            "unsupported operand types for {:?}: {} and {}",
            op,
            left.kind(),
            right.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{lexer::lex, parser::parse_program};
    use super::*;
    use crate::config::types::{self, EvaluatorError};

    /// Host that answers every callback with the function id and arguments echoed back.
    struct EchoHost {
        calls: Vec<String>,
    }

    impl CallbackHost for EchoHost {
        fn call(&mut self, function_id: &str, arguments: Vec<Value>) -> types::Result<Value> {
            self.calls.push(function_id.to_string());
            if function_id == "Z404" {
                return Err(EvaluatorError::Execution("no such function".to_string()));
            }
            let rendered: Vec<String> = arguments.iter().map(|a| a.to_string()).collect();
            Ok(Value::str(format!("{}({})", function_id, rendered.join(","))))
        }
    }

    fn run_with(
        source: &str,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> (Result<ScriptValue, ScriptError>, Vec<String>) {
        let program = parse_program(lex(source).unwrap()).unwrap();
        let mut host = EchoHost { calls: Vec::new() };
        let result = Interpreter::new(&mut host).run(&program, name, args);
        (result, host.calls)
    }

    fn run(source: &str, name: &str, args: Vec<ScriptValue>) -> ScriptValue {
        run_with(source, name, args).0.unwrap()
    }

    fn run_err(source: &str, name: &str) -> String {
        run_with(source, name, vec![]).0.unwrap_err().to_string()
    }

    fn s(text: &str) -> ScriptValue {
        ScriptValue::Str(text.to_string())
    }

    #[test]
    fn string_concatenation() {
        let result = run(
            "function Z1000(a, b) { return a + b; }",
            "Z1000",
            vec![s("2"), s("3")],
        );
        assert!(result.equals(&s("23")));
    }

    #[test]
    fn integer_arithmetic_round_trips_through_str() {
        let source = "const Z1002 = (a, b) => str(int(a) * int(b) + 1);";
        assert!(run(source, "Z1002", vec![s("6"), s("7")]).equals(&s("43")));
    }

    #[test]
    fn loops_conditionals_and_closures() {
        let source = r#"
            function Z1003(words) {
                let out = [];
                const shout = (w) => w + "!";
                for (const w of words) {
                    if (len(w) > 2) {
                        out = out + [shout(w)];
                    } else if (w == "") {
                        continue_marker();
                    } else {
                        out = out + [w];
                    }
                }
                return join(out, " ");
            }
            function continue_marker() { return null; }
        "#;
        let words = ScriptValue::List(vec![s("hey"), s("yo"), s(""), s("there")]);
        assert!(run(source, "Z1003", vec![words]).equals(&s("hey! yo there!")));
    }

    #[test]
    fn maps_pairs_and_members() {
        let source = r#"
            function Z1004(m) {
                let total = "";
                for (const e of entries(m)) { total += e.K1 + "=" + e.K2 + ";"; }
                return pair(total, get(m, "missing", "fallback"));
            }
        "#;
        let map = ScriptValue::Map(vec![(s("a"), s("1")), (s("b"), s("2"))]);
        let result = run(source, "Z1004", vec![map]);
        let expected = ScriptValue::Pair(Box::new(s("a=1;b=2;")), Box::new(s("fallback")), None);
        assert!(result.equals(&expected));
    }

    #[test]
    fn ternary_and_short_circuit() {
        let source = "const f = (x) => x == 'y' ? true : (x || 'empty');";
        assert!(run(source, "f", vec![s("y")]).equals(&ScriptValue::Bool(true)));
        assert!(run(source, "f", vec![s("")]).equals(&s("empty")));
    }

    #[test]
    fn missing_arguments_are_null() {
        let source = "function f(a, b) { return b == null; }";
        assert!(run(source, "f", vec![s("only")]).equals(&ScriptValue::Bool(true)));
    }

    #[test]
    fn throw_becomes_the_error_message() {
        assert_eq!(
            run_err("function f() { throw 'bad input: ' + 'x'; }", "f"),
            "bad input: x"
        );
    }

    #[test]
    fn runtime_errors() {
        assert_eq!(
            run_err("function f() { return nope; }", "f"),
            "ReferenceError: nope is not defined"
        );
        assert_eq!(
            run_err("function f() { const a = '1'; a = '2'; }", "f"),
            "TypeError: assignment to constant variable 'a'"
        );
        assert_eq!(
            run_err("function f() { return true - 1; }", "f"),
            "TypeError: unsupported operand types for Sub: boolean and integer"
        );
        assert_eq!(
            run_err("const g = 1;", "f"),
            "ReferenceError: implementation does not define f"
        );
    }

    #[test]
    fn recursion_depth_is_bounded() {
        let err = run_err("function f() { return f(); }", "f");
        assert_eq!(err, "RangeError: maximum call depth of 128 exceeded");

        let source = "function count(n) { return n == 0 ? 'done' : count(n - 1); }";
        assert!(run(source, "count", vec![ScriptValue::Int(100)]).equals(&s("done")));
    }

    #[test]
    fn reentrant_calls_go_through_the_host() {
        let source = "function f(x) { return call('Z802', x, ref('Z41')); }";
        let (result, calls) = run_with(source, "f", vec![s("a")]);
        assert!(result.unwrap().equals(&s(r#"Z802("a",Z41)"#)));
        assert_eq!(calls, vec!["Z802"]);
    }

    #[test]
    fn host_errors_propagate_unchanged() {
        let (result, _) = run_with("function f() { return call('Z404'); }", "f", vec![]);
        match result.unwrap_err() {
            ScriptError::Host(EvaluatorError::Execution(msg)) => assert_eq!(msg, "no such function"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn integers_do_not_convert_to_wire_values() {
        let err = to_value(&ScriptValue::Int(5)).unwrap_err();
        assert!(err.to_string().starts_with("Could not serialize input value: 5"));
        assert_eq!(
            to_value(&ScriptValue::List(vec![s("x"), ScriptValue::Null])).unwrap(),
            Value::List(vec![Value::str("x"), Value::Unit])
        );
    }
}
