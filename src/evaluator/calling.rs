//! The generic calling convention shared by native procedures and closures.
//!
//! A call goes through four stages: the unevaluated argument list is split according to the
//! callee's [`Arity`], each argument is evaluated left to right (unless the callee takes raw
//! expressions), the backend produces a [`Completion`], and the completion is optionally
//! evaluated once more in the caller's scope. Argument evaluation is driven by the trampoline
//! one `Evaluate` state at a time; the values gathered so far sit in an immutable list, so a
//! continuation captured while evaluating argument `n` always resumes with exactly the first
//! `n` values.

use std::fmt;
use std::rc::Rc;

use super::closure::Closure;
use super::{Continuation, Frame, State};
use crate::ast::{Symbol, Value};
use crate::scope::Scope;
use crate::{Error, ErrorKind};

/// How many arguments a callable takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub required: usize,
    pub optional: usize,
    /// Whether any number of further arguments is accepted
    pub rest: bool,
}

impl Arity {
    pub const fn new(required: usize, optional: usize, rest: bool) -> Self {
        Arity {
            required,
            optional,
            rest,
        }
    }

    pub const fn exactly(n: usize) -> Self {
        Self::new(n, 0, false)
    }

    pub const fn at_least(n: usize) -> Self {
        Self::new(n, 0, true)
    }

    /// `min` required plus `max - min` optional arguments
    pub const fn between(min: usize, max: usize) -> Self {
        Self::new(min, max.saturating_sub(min), false)
    }

    fn count_error(&self) -> Error {
        let message = if self.rest {
            format!("invalid number of arguments: takes at least {}", self.required)
        } else if self.optional == 0 {
            format!("invalid number of arguments: takes exactly {}", self.required)
        } else {
            format!(
                "invalid number of arguments: takes between {} and {}",
                self.required,
                self.required + self.optional
            )
        };
        Error::arity(message)
    }

    /// Check an unevaluated argument list against this arity without collecting it.
    pub(crate) fn check(&self, args: &Value) -> Result<usize, Error> {
        let mut count = 0;
        let mut current = args;
        while let Value::Pair(pair) = current {
            count += 1;
            current = pair.second();
        }
        if !current.is_nil() {
            return Err(not_an_argument_list(args));
        }
        if count < self.required || (!self.rest && count > self.required + self.optional) {
            return Err(self.count_error());
        }
        Ok(count)
    }

    /// Split an unevaluated argument list into required, optional and rest slots.
    pub(crate) fn parse(&self, args: &Value) -> Result<ArgumentList, Error> {
        let mut items = Vec::new();
        let mut current = args;

        for _ in 0..self.required {
            match current {
                Value::Pair(pair) => {
                    items.push(pair.first().clone());
                    current = pair.second();
                }
                Value::Nil => return Err(self.count_error()),
                _ => return Err(not_an_argument_list(args)),
            }
        }

        let mut optional = 0;
        while optional < self.optional {
            let Value::Pair(pair) = current else { break };
            items.push(pair.first().clone());
            current = pair.second();
            optional += 1;
        }

        if self.rest {
            while let Value::Pair(pair) = current {
                items.push(pair.first().clone());
                current = pair.second();
            }
        }

        match current {
            Value::Nil => Ok(ArgumentList {
                items,
                required: self.required,
                optional,
            }),
            Value::Pair(_) => Err(self.count_error()),
            _ => Err(not_an_argument_list(args)),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.optional, self.rest) {
            (_, true) => write!(f, "{}+", self.required),
            (0, false) => write!(f, "{}", self.required),
            (n, false) => write!(f, "{}..{}", self.required, self.required + n),
        }
    }
}

fn not_an_argument_list(args: &Value) -> Error {
    Error::type_error(format!("not a valid argument list: {args}"))
}

/// Argument expressions split by slot, before any evaluation
#[derive(Debug)]
pub(crate) struct ArgumentList {
    pub(crate) items: Vec<Value>,
    required: usize,
    optional: usize,
}

impl ArgumentList {
    pub(crate) fn shape(&self) -> (usize, usize) {
        (self.required, self.optional)
    }
}

/// Arguments as handed to a backend.
///
/// `optional` holds only the optional arguments that were actually supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub required: Vec<Value>,
    pub optional: Vec<Value>,
    pub rest: Vec<Value>,
}

impl Arguments {
    pub(crate) fn from_values(
        mut values: Vec<Value>,
        (required, optional): (usize, usize),
    ) -> Self {
        let rest = values.split_off((required + optional).min(values.len()));
        let optional = values.split_off(required.min(values.len()));
        Arguments {
            required: values,
            optional,
            rest,
        }
    }

    /// All arguments in call order
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .chain(self.rest.iter())
    }

    pub fn len(&self) -> usize {
        self.required.len() + self.optional.len() + self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a backend hands back to the calling convention
pub enum Completion {
    /// A finished value
    Value(Value),
    /// A body to run as a sequence in `scope`, in tail position
    Sequence { scope: Scope, body: Value },
}

type NativeFn = dyn Fn(&Scope, Arguments) -> Result<Completion, Error>;

/// A native procedure.
///
/// By default arguments are evaluated and the result is delivered as is. A builtin built
/// with [`Builtin::with_convention`] can instead receive raw argument expressions and have
/// its result evaluated in the caller's scope, which is how host code writes macros.
pub struct Builtin {
    name: Symbol,
    arity: Arity,
    evaluate_arguments: bool,
    evaluate_result: bool,
    func: Rc<NativeFn>,
}

impl Builtin {
    pub fn new<F>(name: &'static str, arity: Arity, func: F) -> Self
    where
        F: Fn(Arguments) -> Result<Value, Error> + 'static,
    {
        Self::with_backend(name, arity, move |_, args| func(args).map(Completion::Value))
    }

    /// A builtin whose backend sees the caller's scope and may hand back a body to evaluate.
    pub fn with_backend<F>(name: &'static str, arity: Arity, func: F) -> Self
    where
        F: Fn(&Scope, Arguments) -> Result<Completion, Error> + 'static,
    {
        Builtin {
            name: Symbol::from_static(name),
            arity,
            evaluate_arguments: true,
            evaluate_result: false,
            func: Rc::new(func),
        }
    }

    pub fn with_convention(mut self, evaluate_arguments: bool, evaluate_result: bool) -> Self {
        self.evaluate_arguments = evaluate_arguments;
        self.evaluate_result = evaluate_result;
        self
    }

    pub fn name(&self) -> &str {
        self.name.name()
    }

    pub(crate) fn symbol(&self) -> &Symbol {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name.name())
            .field("arity", &self.arity)
            .field("evaluate_arguments", &self.evaluate_arguments)
            .field("evaluate_result", &self.evaluate_result)
            .finish()
    }
}

/// The two kinds of callable that go through the generic machine
pub(crate) enum Callee {
    Builtin(Rc<Builtin>),
    Closure(Rc<Closure>),
}

impl Callee {
    fn arity(&self) -> Arity {
        match self {
            Callee::Builtin(b) => b.arity,
            Callee::Closure(c) => c.arity(),
        }
    }

    fn evaluate_arguments(&self) -> bool {
        match self {
            Callee::Builtin(b) => b.evaluate_arguments,
            Callee::Closure(c) => !c.is_macro(),
        }
    }

    fn evaluate_result(&self) -> bool {
        match self {
            Callee::Builtin(b) => b.evaluate_result,
            Callee::Closure(c) => c.is_macro(),
        }
    }

    fn complete(&self, scope: &Scope, args: Arguments) -> Result<Completion, Error> {
        match self {
            Callee::Builtin(b) => (b.func)(scope, args),
            Callee::Closure(c) => Ok(c.bind(args)),
        }
    }
}

/// One call in flight: everything the argument frames need to resume
pub(crate) struct Invocation {
    callee: Callee,
    scope: Scope,
    pub(crate) form: Value,
    exprs: Vec<Value>,
    shape: (usize, usize),
}

impl Invocation {
    /// Start a call of `callee` with the unevaluated `args` of `form`.
    pub(crate) fn begin(
        callee: Callee,
        scope: Scope,
        args: &Value,
        form: Value,
        next: Continuation,
    ) -> Result<State, Error> {
        let list = callee.arity().parse(args)?;
        let shape = list.shape();
        let items = list.items;
        let Some(first) = items.first().cloned().filter(|_| callee.evaluate_arguments()) else {
            let call = Invocation {
                callee,
                scope,
                form,
                exprs: Vec::new(),
                shape,
            };
            return call.finish(items, next);
        };

        let call = Invocation {
            callee,
            scope: scope.clone(),
            form,
            exprs: items,
            shape,
        };
        let frame = Frame::Arguments {
            call: Rc::new(call),
            evaluated: Value::Nil,
            index: 0,
        };
        Ok(State::Evaluate {
            scope,
            expr: first,
            next: next.push(frame),
        })
    }

    /// Take the value of argument `index`; `evaluated` holds the earlier ones, newest first.
    pub(crate) fn resume(
        call: &Rc<Invocation>,
        value: Value,
        evaluated: &Value,
        index: usize,
        next: Continuation,
    ) -> Result<State, Error> {
        let evaluated = Value::cons(value, evaluated.clone());
        let index = index + 1;
        if let Some(expr) = call.exprs.get(index) {
            return Ok(State::Evaluate {
                scope: call.scope.clone(),
                expr: expr.clone(),
                next: next.push(Frame::Arguments {
                    call: Rc::clone(call),
                    evaluated,
                    index,
                }),
            });
        }

        let mut values: Vec<Value> = evaluated.iter().cloned().collect();
        values.reverse();
        call.finish(values, next)
    }

    fn finish(&self, values: Vec<Value>, next: Continuation) -> Result<State, Error> {
        let args = Arguments::from_values(values, self.shape);
        let completion = self.callee.complete(&self.scope, args)?;
        let reevaluate = self.callee.evaluate_result();
        match completion {
            Completion::Value(value) if reevaluate => Ok(State::Evaluate {
                scope: self.scope.clone(),
                expr: value,
                next,
            }),
            Completion::Value(value) => Ok(State::Return { value, next }),
            Completion::Sequence { scope, body } if reevaluate => Ok(State::Sequence {
                scope,
                body,
                // the EvalResult frame already names this call in backtraces
                form: Value::Nil,
                next: next.push(Frame::EvalResult {
                    scope: self.scope.clone(),
                    form: self.form.clone(),
                }),
            }),
            Completion::Sequence { scope, body } => Ok(State::Sequence {
                scope,
                body,
                form: self.form.clone(),
                next,
            }),
        }
    }
}

/// The single argument of a continuation invocation
pub(crate) fn single_argument(args: &Value) -> Result<Value, Error> {
    Arity::exactly(1).check(args)?;
    match args {
        Value::Pair(pair) => Ok(pair.first().clone()),
        _ => Err(Error::new(
            ErrorKind::ArityError,
            "invalid number of arguments: takes exactly 1",
        )),
    }
}
