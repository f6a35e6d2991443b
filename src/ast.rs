//! This module defines the value model the evaluator operates on. The main enum, [`Value`],
//! is a closed tagged union of nil, pairs, symbols, integers, floats, strings and
//! procedures. Values are immutable once built: pairs are shared through `Rc` and lists are
//! right-nested pairs terminated by [`Value::Nil`]. Ergonomic helpers such as [`val`],
//! [`sym`] and [`nil`] are provided for building expressions in code and tests, and the
//! `From` conversions accept common Rust literals, arrays and vectors. Equality is structural
//! for data and identity for procedures; display follows the reader's syntax so printed data
//! reads back unchanged.

use std::borrow::Borrow;
use std::fmt;
use std::rc::Rc;

use crate::evaluator::calling::Builtin;
use crate::evaluator::closure::Closure;
use crate::evaluator::{Continuation, SpecialForm};
use crate::{Error, ErrorKind};

/// Characters that may never appear in a symbol name
pub(crate) const SYMBOL_DISALLOWED_CHARS: &str = "\".`',; \n\r\t()[]";

/// Check if a string is a valid symbol name: non-empty and free of
/// [`SYMBOL_DISALLOWED_CHARS`]
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| SYMBOL_DISALLOWED_CHARS.contains(c))
}

/// A symbol name. Equality and hashing are by name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Rc<str>);

impl Symbol {
    /// Build a symbol, rejecting names containing reader syntax characters.
    pub fn new(name: &str) -> Result<Symbol, Error> {
        if is_valid_symbol(name) {
            Ok(Symbol(Rc::from(name)))
        } else {
            Err(Error::new(
                ErrorKind::InvalidSymbol,
                format!("invalid symbol name: {name:?}"),
            ))
        }
    }

    /// For names the crate itself spells out (`t`, `&rest`, special form names).
    pub(crate) fn from_static(name: &'static str) -> Symbol {
        debug_assert!(is_valid_symbol(name));
        Symbol(Rc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

/// A cons cell. Both slots are fixed at construction.
pub struct Pair {
    first: Value,
    second: Value,
}

impl Pair {
    pub fn first(&self) -> &Value {
        &self.first
    }

    pub fn second(&self) -> &Value {
        &self.second
    }
}

impl Pair {
    /// Move both slots' pairs onto `pending`, leaving Nil behind.
    fn detach(&mut self, pending: &mut Vec<Rc<Pair>>) {
        for slot in [&mut self.first, &mut self.second] {
            if let Value::Pair(cell) = std::mem::take(slot) {
                pending.push(cell);
            }
        }
    }
}

// Deep structure, through either slot, is released from a work list instead of nested drop
// glue. Cells still shared elsewhere are left to their other owners.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach(&mut pending);
        while let Some(cell) = pending.pop() {
            if let Ok(mut pair) = Rc::try_unwrap(cell) {
                pair.detach(&mut pending);
            }
        }
    }
}

/// Anything that can sit in the operator position of a call.
///
/// Equality is identity: two procedures are equal only if they are the same object.
#[derive(Clone)]
pub enum Procedure {
    /// Native procedure registered by the host or by [`crate::builtinops`]
    Builtin(Rc<Builtin>),
    /// User closure created by `lambda` or `macro`
    Closure(Rc<Closure>),
    /// Form that drives evaluation itself (`if`, `let`, `call/cc`, ...)
    Special(SpecialForm),
    /// Continuation reified by `call/cc`
    Continuation(Continuation),
}

impl Procedure {
    pub(crate) fn same(&self, other: &Procedure) -> bool {
        match (self, other) {
            (Procedure::Builtin(a), Procedure::Builtin(b)) => Rc::ptr_eq(a, b),
            (Procedure::Closure(a), Procedure::Closure(b)) => Rc::ptr_eq(a, b),
            (Procedure::Special(a), Procedure::Special(b)) => a == b,
            (Procedure::Continuation(a), Procedure::Continuation(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Builtin(b) => write!(f, "#<builtin:{}>", b.name()),
            Procedure::Closure(c) if c.is_macro() => write!(f, "#<macro>"),
            Procedure::Closure(_) => write!(f, "#<closure>"),
            Procedure::Special(form) => write!(f, "#<special-form:{}>", form.name()),
            Procedure::Continuation(_) => write!(f, "#<continuation>"),
        }
    }
}

/// Core value type of the interpreter
///
/// To build expressions, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone, Default)]
pub enum Value {
    /// The empty list, and the only false value
    #[default]
    Nil,
    Pair(Rc<Pair>),
    Symbol(Symbol),
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Procedure(Procedure),
}

impl Value {
    pub fn cons(first: Value, second: Value) -> Value {
        Value::Pair(Rc::new(Pair { first, second }))
    }

    /// Build a symbol value, see [`Symbol::new`].
    pub fn symbol(name: &str) -> Result<Value, Error> {
        Symbol::new(name).map(Value::Symbol)
    }

    /// Build a proper list from the items.
    pub fn list<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(Value::Nil, |tail, item| Value::cons(item, tail))
    }

    /// The canonical true value, the symbol `t`
    pub fn truth() -> Value {
        Value::Symbol(Symbol::from_static("t"))
    }

    pub fn from_bool(b: bool) -> Value {
        if b { Value::truth() } else { Value::Nil }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except nil counts as true
    pub fn is_truthy(&self) -> bool {
        !self.is_nil()
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Value::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Iterate the elements of a list, stopping at the first non-pair tail.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Collect a proper list into a vector; `None` if the list ends in a non-nil tail.
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Value::Nil => return Some(items),
                Value::Pair(pair) => {
                    items.push(pair.first.clone());
                    current = &pair.second;
                }
                _ => return None,
            }
        }
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Pair(_) => "cell",
            Value::Symbol(_) => "symbol",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Procedure(_) => "procedure",
        }
    }
}

/// Borrowing iterator over list elements, see [`Value::iter`].
pub struct ListIter<'a> {
    current: &'a Value,
}

impl<'a> ListIter<'a> {
    /// What is left of the list: `Nil` once a proper list is exhausted.
    pub fn tail(&self) -> &'a Value {
        self.current
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        match self.current {
            Value::Pair(pair) => {
                self.current = &pair.second;
                Some(&pair.first)
            }
            _ => None,
        }
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let items: Vec<Value> = iter.into_iter().collect();
        Value::list(items)
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<Procedure> for Value {
    fn from(p: Procedure) -> Self {
        Value::Procedure(p)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(i64::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(i64);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into))
    }
}

/// Helper function for creating symbols - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(Symbol(Rc::from(name.as_ref())))
}

/// Helper function for creating Values - accepts anything convertible to Value
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the empty list (nil)
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Value {
    Value::Nil
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n:?}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Pair(_) => write_nested(self, f),
            Value::Procedure(p) => write!(f, "{p}"),
        }
    }
}

/// Print a pair structure with an explicit stack, so nesting depth costs heap, not frames.
fn write_nested(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    enum Pending<'a> {
        /// A whole value
        Item(&'a Value),
        /// What follows an element inside an open list
        Tail(&'a Value),
    }

    let mut stack = vec![Pending::Item(value)];
    while let Some(next) = stack.pop() {
        match next {
            Pending::Item(Value::Pair(pair)) => {
                write!(f, "(")?;
                stack.push(Pending::Tail(&pair.second));
                stack.push(Pending::Item(&pair.first));
            }
            Pending::Item(atom) => write!(f, "{atom}")?,
            Pending::Tail(Value::Nil) => write!(f, ")")?,
            Pending::Tail(Value::Pair(pair)) => {
                write!(f, " ")?;
                stack.push(Pending::Tail(&pair.second));
                stack.push(Pending::Item(&pair.first));
            }
            Pending::Tail(tail) => write!(f, " . {tail})")?,
        }
    }
    Ok(())
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Float(n) => write!(f, "Float({n:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Pair(_) => write!(f, "Pair({self})"),
            Value::Procedure(p) => write!(f, "Procedure({p})"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // Pairs still to compare, so nesting through either slot never recurses
        let mut pending: Vec<(&Value, &Value)> = Vec::new();
        let (mut a, mut b) = (self, other);
        loop {
            let equal = match (a, b) {
                (Value::Pair(x), Value::Pair(y)) => {
                    if !Rc::ptr_eq(x, y) {
                        pending.push((&x.second, &y.second));
                        a = &x.first;
                        b = &y.first;
                        continue;
                    }
                    true
                }
                (Value::Nil, Value::Nil) => true,
                (Value::Symbol(x), Value::Symbol(y)) => x == y,
                (Value::Integer(x), Value::Integer(y)) => x == y,
                (Value::Float(x), Value::Float(y)) => x == y,
                (Value::String(x), Value::String(y)) => x == y,
                (Value::Procedure(x), Value::Procedure(y)) => x.same(y),
                _ => false, // Different variants are never equal
            };
            if !equal {
                return false;
            }
            match pending.pop() {
                Some((x, y)) => (a, b) = (x, y),
                None => return true,
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        // (helper_result, expected_value)
        let test_cases = vec![
            (val(42), Value::Integer(42)),
            (val(-17), Value::Integer(-17)),
            (val(255u8), Value::Integer(255)),
            (val(4294967295u32), Value::Integer(4294967295)),
            (val(i64::MIN), Value::Integer(i64::MIN)),
            (val(2.5), Value::Float(2.5)),
            (val("hello"), Value::String(Rc::from("hello"))),
            (val(""), Value::String(Rc::from(""))),
            (sym("foo-bar?"), Value::Symbol(Symbol::from_static("foo-bar?"))),
            (nil(), Value::Nil),
            (
                val([1, 2, 3]),
                Value::cons(
                    val(1),
                    Value::cons(val(2), Value::cons(val(3), Value::Nil)),
                ),
            ),
            (
                val(vec![sym("op"), val(42), val("s")]),
                Value::list([sym("op"), val(42), val("s")]),
            ),
            (val(Vec::<Value>::new()), Value::Nil),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_symbol_validation() {
        for good in ["abc", "+", "&rest", "call/cc", "nil-p", "a->b", "*x*", "1+"] {
            assert!(Symbol::new(good).is_ok(), "{good} should be a valid symbol");
        }
        for bad in [
            "", "a b", "(", ")", "[x]", "a.b", "\"q", "`x", "'x", ",x", "a;b", "tab\t", "nl\n",
            "cr\r",
        ] {
            let err = Symbol::new(bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidSymbol, "{bad:?}");
        }
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(val([1, 2, 3]), val([1, 2, 3]));
        // Both halves of a pair must match
        assert_ne!(Value::cons(val(1), val(2)), Value::cons(val(1), val(3)));
        assert_ne!(Value::cons(val(1), val(2)), Value::cons(val(0), val(2)));
        assert_ne!(val([1, 2]), val([1, 2, 3]));
        assert_ne!(val(1), val(1.0));
        assert_ne!(sym("a"), val("a"));
        assert_eq!(
            val(vec![val([1]), sym("x")]),
            val(vec![val([1]), sym("x")])
        );
    }

    #[test]
    fn test_display_round_trip_syntax() {
        let cases = vec![
            (nil(), "nil"),
            (val(3), "3"),
            (val(3.0), "3.0"),
            (val(0.5), "0.5"),
            (val("a\"b\n"), "\"a\\\"b\\n\""),
            (val([1, 2, 3]), "(1 2 3)"),
            (Value::cons(val(1), val(2)), "(1 . 2)"),
            (
                Value::cons(val(1), Value::cons(val(2), sym("tail"))),
                "(1 2 . tail)",
            ),
            (val(vec![sym("quote"), val([sym("a")])]), "(quote (a))"),
            (Value::list([nil(), nil()]), "(nil nil)"),
            (val(vec![val([1, 2]), val(3)]), "((1 2) 3)"),
            (
                Value::cons(Value::cons(sym("a"), sym("b")), sym("c")),
                "((a . b) . c)",
            ),
            (val(vec![val(vec![val([sym("x")])])]), "(((x)))"),
        ];
        for (value, expected) in cases {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn test_list_helpers() {
        let list = val([1, 2, 3]);
        assert_eq!(list.list_to_vec(), Some(vec![val(1), val(2), val(3)]));
        assert_eq!(list.iter().count(), 3);
        assert_eq!(Value::cons(val(1), val(2)).list_to_vec(), None);

        let mut iter = Value::cons(val(1), val(2)).iter().cloned().collect::<Vec<_>>();
        assert_eq!(iter.pop(), Some(val(1)));

        let collected: Value = (1..=3).map(val).collect();
        assert_eq!(collected, list);
    }

    #[test]
    fn test_long_list_drop_and_compare() {
        let long: Value = (0..1_000_000).map(val).collect();
        let copy: Value = (0..1_000_000).map(val).collect();
        assert_eq!(long, copy);
        drop(long);
        drop(copy);
    }

    fn nest_through_first(depth: usize) -> Value {
        (0..depth).fold(Value::Nil, |inner, _| Value::list([inner]))
    }

    #[test]
    fn test_deep_first_nesting_drop_compare_display() {
        let deep = nest_through_first(1_000_000);
        let copy = nest_through_first(1_000_000);
        assert_eq!(deep, copy);
        assert_ne!(deep, nest_through_first(999_999));
        drop(deep);
        drop(copy);

        let shown = nest_through_first(100_000).to_string();
        assert_eq!(shown, format!("{}nil{}", "(".repeat(100_000), ")".repeat(100_000)));
    }

    #[test]
    fn test_drop_keeps_shared_cells() {
        let shared = nest_through_first(10);
        let outer = Value::list([shared.clone(), shared.clone()]);
        drop(outer);
        assert_eq!(shared, nest_through_first(10));
        assert_eq!(shared.to_string(), format!("{}nil{}", "(".repeat(10), ")".repeat(10)));
    }
}
