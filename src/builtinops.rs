//! Built-in leaf primitives.
//!
//! Everything here is an ordinary procedure under the generic calling convention: arguments
//! arrive evaluated and split by arity, and the result is returned as is. Control flow lives in
//! [`crate::evaluator::special_forms`] instead.
//!
//! ```lisp
//! (+ 1 2 3)          ; => 6
//! (/ 7 2)            ; => 3.5
//! (cons 1 '(2))      ; => (1 2)
//! (symbol-p 'a)      ; => t
//! (write 'stdout "hi") ; prints "hi", => 2
//! ```
//!
//! ## Numbers
//!
//! Integer arithmetic is checked: overflow is an `EvalError` rather than a wrapped result.
//! As soon as any operand is a float the whole operation is carried out in floating point.
//! Division stays in integers only when it is exact. Comparisons work across integers and
//! floats.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with the signature `fn(Arguments) -> Result<Value, Error>`
//! 2. **Add to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use std::cmp::Ordering;
use std::io::Write;

use crate::Error;
use crate::ast::{Symbol, Value};
use crate::evaluator::calling::{Arguments, Arity, Builtin};
use crate::scope::Scope;

/// Definition of a built-in operation
#[derive(Debug, Clone, Copy)]
pub struct BuiltinOp {
    /// The name the operation is bound to
    pub id: &'static str,
    pub arity: Arity,
    pub func: fn(Arguments) -> Result<Value, Error>,
}

/// A number pulled out of a value
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    fn from_value(value: &Value) -> Result<Number, Error> {
        match value {
            Value::Integer(n) => Ok(Number::Integer(*n)),
            Value::Float(n) => Ok(Number::Float(*n)),
            other => Err(Error::type_error(format!(
                "value not a number: {other} is a {}",
                other.type_name()
            ))),
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Number::Integer(n) => n as f64,
            Number::Float(n) => n,
        }
    }
}

fn numbers<'a>(args: impl Iterator<Item = &'a Value>) -> Result<Vec<Number>, Error> {
    args.map(Number::from_value).collect()
}

fn overflow(operation: &str) -> Error {
    Error::eval(format!("integer overflow in {operation}"))
}

//
// Builtin Function Implementations
//

fn fold_numbers(
    args: &Arguments,
    identity: i64,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
    operation: &str,
) -> Result<Value, Error> {
    let operands = numbers(args.iter())?;
    if operands.iter().any(|n| matches!(n, Number::Float(_))) {
        let init = Number::Integer(identity).to_f64();
        return Ok(Value::Float(
            operands.iter().fold(init, |acc, n| float_op(acc, n.to_f64())),
        ));
    }
    let mut acc = identity;
    for n in operands {
        if let Number::Integer(n) = n {
            acc = int_op(acc, n).ok_or_else(|| overflow(operation))?;
        }
    }
    Ok(Value::Integer(acc))
}

fn builtin_add(args: Arguments) -> Result<Value, Error> {
    fold_numbers(&args, 0, i64::checked_add, |a, b| a + b, "addition")
}

fn builtin_mul(args: Arguments) -> Result<Value, Error> {
    fold_numbers(&args, 1, i64::checked_mul, |a, b| a * b, "multiplication")
}

fn builtin_sub(args: Arguments) -> Result<Value, Error> {
    let first = Number::from_value(&args.required[0])?;
    let Some(second) = args.optional.first() else {
        return match first {
            Number::Integer(n) => n
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| overflow("negation")),
            Number::Float(n) => Ok(Value::Float(-n)),
        };
    };
    match (first, Number::from_value(second)?) {
        (Number::Integer(a), Number::Integer(b)) => a
            .checked_sub(b)
            .map(Value::Integer)
            .ok_or_else(|| overflow("subtraction")),
        (a, b) => Ok(Value::Float(a.to_f64() - b.to_f64())),
    }
}

fn divide(dividend: Number, divisor: Number) -> Result<Value, Error> {
    if divisor.to_f64() == 0.0 {
        return Err(Error::eval("division by zero"));
    }
    if let (Number::Integer(a), Number::Integer(b)) = (dividend, divisor)
        && a.checked_rem(b) == Some(0)
        && let Some(quotient) = a.checked_div(b)
    {
        return Ok(Value::Integer(quotient));
    }
    Ok(Value::Float(dividend.to_f64() / divisor.to_f64()))
}

fn builtin_div(args: Arguments) -> Result<Value, Error> {
    let first = Number::from_value(&args.required[0])?;
    match args.optional.first() {
        Some(second) => divide(first, Number::from_value(second)?),
        None => divide(Number::Integer(1), first),
    }
}

fn numeric_order(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => Some(x.cmp(&y)),
        _ => a.to_f64().partial_cmp(&b.to_f64()),
    }
}

// Macro to generate numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $ordering:path) => {
        fn $name(args: Arguments) -> Result<Value, Error> {
            let operands = numbers(args.iter())?;
            Ok(Value::from_bool(
                numeric_order(operands[0], operands[1]) == Some($ordering),
            ))
        }
    };
}

numeric_comparison!(builtin_lt, Ordering::Less);
numeric_comparison!(builtin_gt, Ordering::Greater);
numeric_comparison!(builtin_num_eq, Ordering::Equal);

fn builtin_eq(args: Arguments) -> Result<Value, Error> {
    Ok(Value::from_bool(args.required[0] == args.required[1]))
}

fn builtin_cons(args: Arguments) -> Result<Value, Error> {
    let mut args = args.required.into_iter();
    let first = args.next().unwrap_or_default();
    let second = args.next().unwrap_or_default();
    Ok(Value::cons(first, second))
}

fn builtin_car(args: Arguments) -> Result<Value, Error> {
    match &args.required[0] {
        Value::Pair(pair) => Ok(pair.first().clone()),
        other => Err(Error::type_error(format!("value not a cell: {other}"))),
    }
}

fn builtin_cdr(args: Arguments) -> Result<Value, Error> {
    match &args.required[0] {
        Value::Pair(pair) => Ok(pair.second().clone()),
        other => Err(Error::type_error(format!("value not a cell: {other}"))),
    }
}

fn builtin_list(args: Arguments) -> Result<Value, Error> {
    Ok(Value::list(args.rest))
}

// Macro to generate `<type>-p` predicates
macro_rules! type_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(args: Arguments) -> Result<Value, Error> {
            Ok(Value::from_bool(matches!(args.required[0], $pattern)))
        }
    };
}

type_predicate!(builtin_cell_p, Value::Pair(_));
type_predicate!(builtin_symbol_p, Value::Symbol(_));
type_predicate!(builtin_string_p, Value::String(_));
type_predicate!(builtin_number_p, Value::Integer(_) | Value::Float(_));
type_predicate!(builtin_integer_p, Value::Integer(_));
type_predicate!(builtin_float_p, Value::Float(_));
type_predicate!(builtin_procedure_p, Value::Procedure(_));
type_predicate!(builtin_nil_p, Value::Nil);

fn builtin_intern(args: Arguments) -> Result<Value, Error> {
    match &args.required[0] {
        Value::String(name) => Symbol::new(name).map(Value::Symbol),
        other => Err(Error::type_error(format!(
            "intern needs a string, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_write(args: Arguments) -> Result<Value, Error> {
    let Value::String(text) = &args.required[1] else {
        return Err(Error::type_error("data to write must be a string"));
    };
    let result = match args.required[0].as_symbol().map(Symbol::name) {
        Some("stdout") => {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes()).and_then(|()| out.flush())
        }
        Some("stderr") => std::io::stderr().lock().write_all(text.as_bytes()),
        _ => {
            return Err(Error::eval(format!(
                "unknown file: {}",
                args.required[0]
            )));
        }
    };
    result.map_err(|e| Error::eval(format!("write failed: {e}")))?;
    i64::try_from(text.len())
        .map(Value::Integer)
        .map_err(|_| overflow("byte count"))
}

/// The registry of built-in operations, in registration order
static BUILTIN_OPS: &[BuiltinOp] = &[
    BuiltinOp {
        id: "+",
        arity: Arity::at_least(0),
        func: builtin_add,
    },
    BuiltinOp {
        id: "*",
        arity: Arity::at_least(0),
        func: builtin_mul,
    },
    BuiltinOp {
        id: "-",
        arity: Arity::between(1, 2),
        func: builtin_sub,
    },
    BuiltinOp {
        id: "/",
        arity: Arity::between(1, 2),
        func: builtin_div,
    },
    BuiltinOp {
        id: "<",
        arity: Arity::exactly(2),
        func: builtin_lt,
    },
    BuiltinOp {
        id: ">",
        arity: Arity::exactly(2),
        func: builtin_gt,
    },
    BuiltinOp {
        id: "=",
        arity: Arity::exactly(2),
        func: builtin_num_eq,
    },
    BuiltinOp {
        id: "eq",
        arity: Arity::exactly(2),
        func: builtin_eq,
    },
    BuiltinOp {
        id: "cons",
        arity: Arity::exactly(2),
        func: builtin_cons,
    },
    BuiltinOp {
        id: "car",
        arity: Arity::exactly(1),
        func: builtin_car,
    },
    BuiltinOp {
        id: "cdr",
        arity: Arity::exactly(1),
        func: builtin_cdr,
    },
    BuiltinOp {
        id: "list",
        arity: Arity::at_least(0),
        func: builtin_list,
    },
    BuiltinOp {
        id: "cell-p",
        arity: Arity::exactly(1),
        func: builtin_cell_p,
    },
    BuiltinOp {
        id: "symbol-p",
        arity: Arity::exactly(1),
        func: builtin_symbol_p,
    },
    BuiltinOp {
        id: "string-p",
        arity: Arity::exactly(1),
        func: builtin_string_p,
    },
    BuiltinOp {
        id: "number-p",
        arity: Arity::exactly(1),
        func: builtin_number_p,
    },
    BuiltinOp {
        id: "integer-p",
        arity: Arity::exactly(1),
        func: builtin_integer_p,
    },
    BuiltinOp {
        id: "float-p",
        arity: Arity::exactly(1),
        func: builtin_float_p,
    },
    BuiltinOp {
        id: "procedure-p",
        arity: Arity::exactly(1),
        func: builtin_procedure_p,
    },
    BuiltinOp {
        id: "nil-p",
        arity: Arity::exactly(1),
        func: builtin_nil_p,
    },
    BuiltinOp {
        id: "intern",
        arity: Arity::exactly(1),
        func: builtin_intern,
    },
    BuiltinOp {
        id: "write",
        arity: Arity::exactly(2),
        func: builtin_write,
    },
];

pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_OPS.iter().find(|op| op.id == id)
}

/// Bind every operation of the registry in `scope`.
pub fn register_builtins(scope: &Scope) {
    for op in BUILTIN_OPS {
        scope.define(Builtin::new(op.id, op.arity, op.func));
    }
}
