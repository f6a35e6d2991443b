//! Forms that steer evaluation themselves instead of going through the calling convention.
//!
//! Each form receives its operands unevaluated and answers with the next trampoline state.
//! Forms that need the value of an operand push a [`Pending`] frame and let the trampoline
//! evaluate the operand; the frame picks up from there once the value arrives. Frames are
//! never modified after they are pushed, so a continuation captured inside any of these forms
//! can be resumed repeatedly.

use std::rc::Rc;

use tracing::debug;

use super::calling::{Arity, Builtin, Completion};
use super::closure::Closure;
use super::{Continuation, Frame, State};
use crate::Error;
use crate::ast::{Procedure, Symbol, Value};
use crate::scope::Scope;

/// The built-in special forms, bound by name in the root scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Quote,
    If,
    And,
    Or,
    While,
    Begin,
    Let,
    Set,
    Setq,
    Lambda,
    Macro,
    CallCc,
}

impl SpecialForm {
    pub const ALL: [SpecialForm; 12] = [
        SpecialForm::Quote,
        SpecialForm::If,
        SpecialForm::And,
        SpecialForm::Or,
        SpecialForm::While,
        SpecialForm::Begin,
        SpecialForm::Let,
        SpecialForm::Set,
        SpecialForm::Setq,
        SpecialForm::Lambda,
        SpecialForm::Macro,
        SpecialForm::CallCc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpecialForm::Quote => "quote",
            SpecialForm::If => "if",
            SpecialForm::And => "and",
            SpecialForm::Or => "or",
            SpecialForm::While => "while",
            SpecialForm::Begin => "begin",
            SpecialForm::Let => "let",
            SpecialForm::Set => "set",
            SpecialForm::Setq => "setq",
            SpecialForm::Lambda => "lambda",
            SpecialForm::Macro => "macro",
            SpecialForm::CallCc => "call/cc",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            SpecialForm::Quote | SpecialForm::CallCc => Arity::exactly(1),
            SpecialForm::If => Arity::at_least(2),
            SpecialForm::While | SpecialForm::Let | SpecialForm::Lambda | SpecialForm::Macro => {
                Arity::at_least(1)
            }
            SpecialForm::And
            | SpecialForm::Or
            | SpecialForm::Begin
            | SpecialForm::Set
            | SpecialForm::Setq => Arity::at_least(0),
        }
    }

    pub(crate) fn invoke(
        self,
        scope: Scope,
        args: &Value,
        form: Value,
        next: Continuation,
    ) -> Result<State, Error> {
        let count = self.arity().check(args)?;
        let (first, rest) = split(args);
        match self {
            SpecialForm::Quote => Ok(State::Return { value: first, next }),
            SpecialForm::If => {
                let (then_branch, else_body) = split(&rest);
                Ok(State::Evaluate {
                    scope: scope.clone(),
                    expr: first,
                    next: next.push(Frame::Special(Pending::If {
                        scope,
                        then_branch,
                        else_body,
                        form,
                    })),
                })
            }
            SpecialForm::And if count == 0 => Ok(State::Return {
                value: Value::truth(),
                next,
            }),
            SpecialForm::Or if count == 0 => Ok(State::Return {
                value: Value::Nil,
                next,
            }),
            SpecialForm::And => Ok(junction(Junction::And, scope, first, rest, form, next)),
            SpecialForm::Or => Ok(junction(Junction::Or, scope, first, rest, form, next)),
            SpecialForm::While => {
                let state = Rc::new(Loop {
                    scope,
                    test: first,
                    body: rest,
                    form,
                });
                Ok(Loop::test(&state, next))
            }
            SpecialForm::Begin => Ok(State::Sequence {
                scope,
                body: args.clone(),
                form,
                next,
            }),
            SpecialForm::Let => begin_let(scope, &first, rest, form, next),
            SpecialForm::Set | SpecialForm::Setq => {
                if count % 2 != 0 {
                    return Err(Error::arity(
                        "invalid number of arguments: takes an even number",
                    ));
                }
                let assignment = Rc::new(Assignment {
                    scope,
                    literal_names: self == SpecialForm::Setq,
                    form,
                });
                Assignment::step(&assignment, args.clone(), Value::Nil, next)
            }
            SpecialForm::Lambda | SpecialForm::Macro => {
                let closure = Closure::new(&first, rest, scope, self == SpecialForm::Macro)?;
                Ok(State::Return {
                    value: Value::Procedure(Procedure::Closure(Rc::new(closure))),
                    next,
                })
            }
            SpecialForm::CallCc => Ok(State::Evaluate {
                scope: scope.clone(),
                expr: first,
                next: next.push(Frame::Special(Pending::CallCc { scope, form })),
            }),
        }
    }
}

/// `(first . rest)` of a list, Nil for both halves of anything else
fn split(list: &Value) -> (Value, Value) {
    match list {
        Value::Pair(pair) => (pair.first().clone(), pair.second().clone()),
        _ => (Value::Nil, Value::Nil),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Junction {
    And,
    Or,
}

/// Evaluate `first`, leaving `remaining` for later unless `first` is the last operand.
fn junction(
    kind: Junction,
    scope: Scope,
    first: Value,
    remaining: Value,
    form: Value,
    next: Continuation,
) -> State {
    if remaining.is_nil() {
        return State::Evaluate {
            scope,
            expr: first,
            next,
        };
    }
    State::Evaluate {
        scope: scope.clone(),
        expr: first,
        next: next.push(Frame::Special(Pending::Junction {
            kind,
            scope,
            remaining,
            form,
        })),
    }
}

/// Shared state of one `while` loop
pub(crate) struct Loop {
    scope: Scope,
    test: Value,
    body: Value,
    form: Value,
}

impl Loop {
    fn test(state: &Rc<Loop>, next: Continuation) -> State {
        State::Evaluate {
            scope: state.scope.clone(),
            expr: state.test.clone(),
            next: next.push(Frame::Special(Pending::WhileTest(Rc::clone(state)))),
        }
    }
}

/// Parsed `let`: names and initialisers in source order
pub(crate) struct LetForm {
    scope: Scope,
    names: Vec<Symbol>,
    inits: Vec<Value>,
    body: Value,
    form: Value,
}

fn begin_let(
    scope: Scope,
    bindings: &Value,
    body: Value,
    form: Value,
    next: Continuation,
) -> Result<State, Error> {
    let mut names = Vec::new();
    let mut inits = Vec::new();
    let mut iter = bindings.iter();
    for binding in iter.by_ref() {
        let (name, init) = match binding {
            Value::Symbol(name) => (name, Value::Nil),
            Value::Pair(pair) => {
                let Value::Symbol(name) = pair.first() else {
                    return Err(Error::type_error(format!(
                        "let binding name is not a symbol: {binding}"
                    )));
                };
                match pair.second().list_to_vec().as_deref() {
                    Some([]) => (name, Value::Nil),
                    Some([init]) => (name, init.clone()),
                    _ => {
                        return Err(Error::type_error(format!(
                            "not a valid let binding: {binding}"
                        )));
                    }
                }
            }
            other => {
                return Err(Error::type_error(format!(
                    "not a valid let binding: {other}"
                )));
            }
        };
        names.push(name.clone());
        inits.push(init);
    }
    if !iter.tail().is_nil() {
        return Err(Error::type_error(format!(
            "not a valid binding list: {bindings}"
        )));
    }

    let Some(first) = inits.first().cloned() else {
        return Ok(State::Sequence {
            scope: scope.child(),
            body,
            form,
            next,
        });
    };
    let binding = Rc::new(LetForm {
        scope: scope.clone(),
        names,
        inits,
        body,
        form,
    });
    Ok(State::Evaluate {
        scope,
        expr: first,
        next: next.push(Frame::Special(Pending::Let {
            binding,
            evaluated: Value::Nil,
            index: 0,
        })),
    })
}

/// Shared state of one `set`/`setq` form
pub(crate) struct Assignment {
    scope: Scope,
    literal_names: bool,
    form: Value,
}

impl Assignment {
    /// Handle the next name/value pair of `remaining`, or finish with `last`.
    fn step(
        assignment: &Rc<Assignment>,
        remaining: Value,
        last: Value,
        next: Continuation,
    ) -> Result<State, Error> {
        let (name_expr, rest) = split(&remaining);
        if remaining.is_nil() {
            return Ok(State::Return { value: last, next });
        }
        if assignment.literal_names {
            let name = assignment_target(name_expr)?;
            let (value_expr, remaining) = split(&rest);
            return Ok(Assignment::value(assignment, name, value_expr, remaining, next));
        }
        Ok(State::Evaluate {
            scope: assignment.scope.clone(),
            expr: name_expr,
            next: next.push(Frame::Special(Pending::SetName {
                assignment: Rc::clone(assignment),
                remaining: rest,
            })),
        })
    }

    fn value(
        assignment: &Rc<Assignment>,
        name: Symbol,
        value_expr: Value,
        remaining: Value,
        next: Continuation,
    ) -> State {
        State::Evaluate {
            scope: assignment.scope.clone(),
            expr: value_expr,
            next: next.push(Frame::Special(Pending::SetValue {
                assignment: Rc::clone(assignment),
                name,
                remaining,
            })),
        }
    }
}

fn assignment_target(value: Value) -> Result<Symbol, Error> {
    match value {
        Value::Symbol(name) => Ok(name),
        other => Err(Error::type_error(format!(
            "cannot assign to a {}: {other}",
            other.type_name()
        ))),
    }
}

/// Continuation frames owned by the special forms
pub(crate) enum Pending {
    If {
        scope: Scope,
        then_branch: Value,
        else_body: Value,
        form: Value,
    },
    Junction {
        kind: Junction,
        scope: Scope,
        remaining: Value,
        form: Value,
    },
    WhileTest(Rc<Loop>),
    WhileBody(Rc<Loop>),
    Let {
        binding: Rc<LetForm>,
        /// Initialiser values so far, newest first
        evaluated: Value,
        index: usize,
    },
    SetName {
        assignment: Rc<Assignment>,
        remaining: Value,
    },
    SetValue {
        assignment: Rc<Assignment>,
        name: Symbol,
        remaining: Value,
    },
    CallCc {
        scope: Scope,
        form: Value,
    },
}

impl Pending {
    pub(crate) fn form(&self) -> &Value {
        match self {
            Pending::If { form, .. }
            | Pending::Junction { form, .. }
            | Pending::CallCc { form, .. } => form,
            Pending::WhileTest(state) | Pending::WhileBody(state) => &state.form,
            Pending::Let { binding, .. } => &binding.form,
            Pending::SetName { assignment, .. } | Pending::SetValue { assignment, .. } => {
                &assignment.form
            }
        }
    }

    /// Continue once the operand this frame waits on has produced `value`.
    pub(crate) fn resume(&self, value: Value, next: Continuation) -> Result<State, Error> {
        match self {
            Pending::If {
                scope,
                then_branch,
                else_body,
                form,
            } => Ok(if value.is_truthy() {
                State::Evaluate {
                    scope: scope.clone(),
                    expr: then_branch.clone(),
                    next,
                }
            } else {
                State::Sequence {
                    scope: scope.clone(),
                    body: else_body.clone(),
                    form: form.clone(),
                    next,
                }
            }),
            Pending::Junction {
                kind,
                scope,
                remaining,
                form,
            } => {
                let decided = match kind {
                    Junction::And => value.is_nil(),
                    Junction::Or => value.is_truthy(),
                };
                if decided {
                    return Ok(State::Return { value, next });
                }
                let (first, rest) = split(remaining);
                Ok(junction(*kind, scope.clone(), first, rest, form.clone(), next))
            }
            Pending::WhileTest(state) => {
                if value.is_nil() {
                    return Ok(State::Return {
                        value: Value::Nil,
                        next,
                    });
                }
                if state.body.is_nil() {
                    return Ok(Loop::test(state, next));
                }
                Ok(State::Sequence {
                    scope: state.scope.clone(),
                    body: state.body.clone(),
                    form: state.form.clone(),
                    next: next.push(Frame::Special(Pending::WhileBody(Rc::clone(state)))),
                })
            }
            Pending::WhileBody(state) => Ok(Loop::test(state, next)),
            Pending::Let {
                binding,
                evaluated,
                index,
            } => {
                let evaluated = Value::cons(value, evaluated.clone());
                let index = index + 1;
                if let Some(init) = binding.inits.get(index) {
                    return Ok(State::Evaluate {
                        scope: binding.scope.clone(),
                        expr: init.clone(),
                        next: next.push(Frame::Special(Pending::Let {
                            binding: Rc::clone(binding),
                            evaluated,
                            index,
                        })),
                    });
                }
                let scope = binding.scope.child();
                // `evaluated` is newest first, so walk the names backwards
                for (name, value) in binding.names.iter().rev().zip(evaluated.iter()) {
                    scope.set(name.clone(), value.clone(), true);
                }
                Ok(State::Sequence {
                    scope,
                    body: binding.body.clone(),
                    form: binding.form.clone(),
                    next,
                })
            }
            Pending::SetName {
                assignment,
                remaining,
            } => {
                let name = assignment_target(value)?;
                let (value_expr, remaining) = split(remaining);
                Ok(Assignment::value(assignment, name, value_expr, remaining, next))
            }
            Pending::SetValue {
                assignment,
                name,
                remaining,
            } => {
                assignment.scope.set(name.clone(), value.clone(), false);
                Assignment::step(assignment, remaining.clone(), value, next)
            }
            Pending::CallCc { scope, form } => {
                let procedure = match value {
                    Value::Procedure(procedure) => procedure,
                    other => {
                        return Err(Error::type_error(format!(
                            "call/cc needs a procedure, got {}",
                            other.type_name()
                        )));
                    }
                };
                debug!("capturing continuation");
                let captured = Value::Procedure(Procedure::Continuation(next.clone()));
                Ok(State::Apply {
                    scope: scope.clone(),
                    procedure,
                    args: Value::list([captured]),
                    form: form.clone(),
                    next,
                })
            }
        }
    }
}

/// Bind every special form, plus `eval`, in `scope`.
pub fn register_special_forms(scope: &Scope) {
    for form in SpecialForm::ALL {
        scope.set(
            Symbol::from_static(form.name()),
            Value::Procedure(Procedure::Special(form)),
            true,
        );
    }

    // `eval` follows the ordinary convention: its arguments are evaluated as usual and the
    // resulting values then run as a sequence in the caller's scope.
    scope.define(Builtin::with_backend(
        "eval",
        Arity::at_least(0),
        |scope, args| {
            Ok(Completion::Sequence {
                scope: scope.clone(),
                body: Value::list(args.rest),
            })
        },
    ));
}
