//! The trampoline evaluator.
//!
//! Evaluation never recurses on the native stack. Every step turns the current [`State`] into
//! the next one, and whatever is still to be done after the current expression lives in a
//! [`Continuation`]: an immutable chain of frames on the heap. A call in tail position simply
//! hands its caller's continuation on, so tail loops run in constant space, and deep non-tail
//! recursion grows the heap chain rather than the native stack.
//!
//! Because frames are never mutated, a continuation reified by `call/cc` stays valid after
//! the computation has moved on and may be resumed any number of times.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Procedure, Symbol, Value};
use crate::builtinops::register_builtins;
use crate::scope::Scope;
use crate::{Error, ErrorKind, MAX_BACKTRACE_DEPTH};

pub mod calling;
pub mod closure;
pub mod special_forms;

use calling::{Callee, Invocation};
use special_forms::Pending;
pub use special_forms::{SpecialForm, register_special_forms};

/// A pending evaluation step
pub(crate) enum State {
    /// Evaluate `expr` in `scope` and pass the value to `next`
    Evaluate {
        scope: Scope,
        expr: Value,
        next: Continuation,
    },
    /// Call `procedure` with the unevaluated `args` taken from `form`
    Apply {
        scope: Scope,
        procedure: Procedure,
        args: Value,
        form: Value,
        next: Continuation,
    },
    /// Evaluate the list `body` in order, the last expression in tail position
    Sequence {
        scope: Scope,
        body: Value,
        form: Value,
        next: Continuation,
    },
    /// Hand `value` to `next`
    Return { value: Value, next: Continuation },
    Terminal(Value),
}

/// What a continuation node does with the value it receives
pub(crate) enum Frame {
    /// End of the chain: the value is the result of the whole evaluation
    Done,
    /// The operator of `form` has been evaluated; apply it
    Operator { scope: Scope, form: Value },
    /// Argument `index` of `call` has been evaluated
    Arguments {
        call: Rc<Invocation>,
        /// Values of the earlier arguments, newest first
        evaluated: Value,
        index: usize,
    },
    /// Discard the value and carry on with `remaining`
    Sequence {
        scope: Scope,
        remaining: Value,
        form: Value,
    },
    /// Evaluate the value once more in `scope` (macro expansion results)
    EvalResult { scope: Scope, form: Value },
    Special(Pending),
}

impl Frame {
    /// The expression this frame belongs to, for backtraces
    fn form(&self) -> Option<&Value> {
        let form = match self {
            Frame::Done => return None,
            Frame::Operator { form, .. }
            | Frame::Sequence { form, .. }
            | Frame::EvalResult { form, .. } => form,
            Frame::Arguments { call, .. } => &call.form,
            Frame::Special(pending) => pending.form(),
        };
        (!form.is_nil()).then_some(form)
    }
}

struct Node {
    frame: Frame,
    next: Option<Continuation>,
}

// A deep non-tail recursion leaves a chain as long as the recursion; release it iteratively.
impl Drop for Node {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(Continuation(node)) = next {
            match Rc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// The rest of a computation.
///
/// Cloning is cheap and shares the chain. Two handles are the same continuation only if they
/// point at the same node.
#[derive(Clone)]
pub struct Continuation(Rc<Node>);

impl Continuation {
    fn done() -> Self {
        Continuation(Rc::new(Node {
            frame: Frame::Done,
            next: None,
        }))
    }

    /// A continuation that runs `frame` first and then this one
    pub(crate) fn push(self, frame: Frame) -> Self {
        Continuation(Rc::new(Node {
            frame,
            next: Some(self),
        }))
    }

    pub(crate) fn same(&self, other: &Continuation) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of frames in the chain, including the final one
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut node = &self.0;
        while let Some(Continuation(next)) = &node.next {
            depth += 1;
            node = next;
        }
        depth
    }

    fn resume(&self, value: Value) -> Result<State, Error> {
        let Some(next) = self.0.next.clone() else {
            return Ok(State::Terminal(value));
        };
        match &self.0.frame {
            Frame::Done => Ok(State::Terminal(value)),
            Frame::Operator { scope, form } => match value {
                Value::Procedure(procedure) => Ok(State::Apply {
                    scope: scope.clone(),
                    procedure,
                    args: form.as_pair().map(|p| p.second().clone()).unwrap_or_default(),
                    form: form.clone(),
                    next,
                }),
                other => Err(Error::new(
                    ErrorKind::NotAProcedure,
                    format!("value does not evaluate to a procedure: {other}"),
                )),
            },
            Frame::Arguments {
                call,
                evaluated,
                index,
            } => Invocation::resume(call, value, evaluated, *index, next),
            Frame::Sequence {
                scope,
                remaining,
                form,
            } => Ok(State::Sequence {
                scope: scope.clone(),
                body: remaining.clone(),
                form: form.clone(),
                next,
            }),
            Frame::EvalResult { scope, .. } => Ok(State::Evaluate {
                scope: scope.clone(),
                expr: value,
                next,
            }),
            Frame::Special(pending) => pending.resume(value, next),
        }
    }
}

impl Procedure {
    /// Start applying this procedure to the unevaluated `args`.
    pub(crate) fn invoke(
        self,
        scope: Scope,
        args: &Value,
        form: Value,
        next: Continuation,
    ) -> Result<State, Error> {
        match self {
            Procedure::Builtin(builtin) => {
                Invocation::begin(Callee::Builtin(builtin), scope, args, form, next)
            }
            Procedure::Closure(closure) => {
                Invocation::begin(Callee::Closure(closure), scope, args, form, next)
            }
            Procedure::Special(special) => special.invoke(scope, args, form, next),
            Procedure::Continuation(target) => {
                let expr = calling::single_argument(args)?;
                debug!(depth = target.depth(), "re-entering continuation");
                // The current continuation is abandoned in favour of the captured one
                Ok(State::Evaluate {
                    scope,
                    expr,
                    next: target,
                })
            }
        }
    }
}

impl State {
    fn step(self) -> Result<State, Error> {
        match self {
            State::Evaluate { scope, expr, next } => match expr {
                Value::Pair(pair) => {
                    let operator = pair.first().clone();
                    let frame = Frame::Operator {
                        scope: scope.clone(),
                        form: Value::Pair(pair),
                    };
                    Ok(State::Evaluate {
                        scope,
                        expr: operator,
                        next: next.push(frame),
                    })
                }
                Value::Symbol(name) => match scope.get(name.name()) {
                    Ok(value) => Ok(State::Return { value, next }),
                    Err(_) => Err(Error::new(
                        ErrorKind::SymbolNotSet,
                        format!("symbol not set: {name}"),
                    )),
                },
                value => Ok(State::Return { value, next }),
            },
            State::Apply {
                scope,
                procedure,
                args,
                form,
                next,
            } => procedure.invoke(scope, &args, form, next),
            State::Sequence {
                scope,
                body,
                form,
                next,
            } => sequence(scope, body, form, next),
            State::Return { value, next } => next.resume(value),
            State::Terminal(value) => Ok(State::Terminal(value)),
        }
    }

    /// The expression under evaluation and the continuation waiting for it
    fn trail(&self) -> (Option<Value>, Option<Continuation>) {
        match self {
            State::Evaluate { expr, next, .. } => (Some(expr.clone()), Some(next.clone())),
            State::Apply { form, next, .. } => (Some(form.clone()), Some(next.clone())),
            State::Sequence { next, .. } | State::Return { next, .. } => (None, Some(next.clone())),
            State::Terminal(_) => (None, None),
        }
    }
}

fn sequence(scope: Scope, body: Value, form: Value, next: Continuation) -> Result<State, Error> {
    match body {
        Value::Nil => Ok(State::Return {
            value: Value::Nil,
            next,
        }),
        Value::Pair(pair) => {
            let expr = pair.first().clone();
            let remaining = pair.second().clone();
            if remaining.is_nil() {
                return Ok(State::Evaluate { scope, expr, next });
            }
            let frame = Frame::Sequence {
                scope: scope.clone(),
                remaining,
                form,
            };
            Ok(State::Evaluate {
                scope,
                expr,
                next: next.push(frame),
            })
        }
        other => Err(Error::type_error(format!(
            "not a valid expression list: {other}"
        ))),
    }
}

/// Expressions still waiting on a failed step, innermost first
fn backtrace(current: Option<Value>, next: Option<Continuation>) -> Vec<Value> {
    let mut trace: Vec<Value> = current.into_iter().collect();
    let mut node = next.as_ref().map(|k| &k.0);
    while let Some(current) = node
        && trace.len() < MAX_BACKTRACE_DEPTH
    {
        trace.extend(current.frame.form().cloned());
        node = current.next.as_ref().map(|k| &k.0);
    }
    trace
}

fn run(mut state: State) -> Result<Value, Error> {
    let mut steps: u64 = 0;
    loop {
        if let State::Terminal(value) = state {
            trace!(steps, "evaluation finished");
            return Ok(value);
        }
        let (current, next) = state.trail();
        steps += 1;
        state = match state.step() {
            Ok(state) => state,
            Err(mut error) => {
                let room = MAX_BACKTRACE_DEPTH.saturating_sub(error.trace.len());
                error
                    .trace
                    .extend(backtrace(current, next).into_iter().take(room));
                debug!(
                    kind = %error.kind,
                    depth = error.trace.len(),
                    steps,
                    "evaluation failed"
                );
                return Err(error);
            }
        };
    }
}

/// Evaluate `expr` in `scope`.
pub fn evaluate(scope: &Scope, expr: &Value) -> Result<Value, Error> {
    run(State::Evaluate {
        scope: scope.clone(),
        expr: expr.clone(),
        next: Continuation::done(),
    })
}

/// Evaluate each element of the list `exprs` in order, yielding the last value.
pub fn evaluate_sequence(scope: &Scope, exprs: &Value) -> Result<Value, Error> {
    run(State::Sequence {
        scope: scope.clone(),
        body: exprs.clone(),
        form: Value::Nil,
        next: Continuation::done(),
    })
}

/// Create a root scope with `t`, the special forms and the builtins bound.
pub fn create_global_scope() -> Scope {
    let scope = Scope::new_root();
    scope.set(Symbol::from_static("t"), Value::truth(), true);
    register_special_forms(&scope);
    register_builtins(&scope);
    scope
}
