//! Chained variable frames.
//!
//! A [`Scope`] is a handle to one frame; cloning the handle shares the frame. Closures and
//! captured continuations hold handles, which is what keeps a frame alive after the
//! construct that created it has finished.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Procedure, Symbol, Value};
use crate::evaluator::calling::{Arguments, Arity, Builtin};

/// Lookup miss along the whole frame chain
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("name not set: {0}")]
pub struct NameNotSet(pub String);

struct Frame {
    bindings: RefCell<HashMap<Symbol, Value>>,
    parent: Option<Scope>,
}

/// Handle to a frame of variable bindings
#[derive(Clone)]
pub struct Scope(Rc<Frame>);

impl Default for Scope {
    fn default() -> Self {
        Self::new_root()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scope({} bindings, {})",
            self.0.bindings.borrow().len(),
            if self.0.parent.is_some() { "child" } else { "root" }
        )
    }
}

impl Scope {
    /// A frame with no parent
    pub fn new_root() -> Self {
        Scope(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        }))
    }

    /// A new empty frame whose parent is this one
    pub fn child(&self) -> Self {
        Scope(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(self.clone()),
        }))
    }

    pub fn get(&self, name: &str) -> Result<Value, NameNotSet> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.0.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
            match &frame.0.parent {
                Some(parent) => frame = parent,
                None => return Err(NameNotSet(name.to_owned())),
            }
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Bind `name`.
    ///
    /// With `local_only` the binding goes into this frame, shadowing any ancestor. Otherwise
    /// the nearest existing binding along the chain is replaced in place, and if there is
    /// none the binding is created in the root frame.
    pub fn set(&self, name: Symbol, value: Value, local_only: bool) {
        if local_only {
            self.0.bindings.borrow_mut().insert(name, value);
            return;
        }
        let mut frame = self;
        loop {
            if let Some(slot) = frame.0.bindings.borrow_mut().get_mut(name.name()) {
                *slot = value;
                return;
            }
            match &frame.0.parent {
                Some(parent) => frame = parent,
                None => break,
            }
        }
        frame.0.bindings.borrow_mut().insert(name, value);
    }

    /// True when both handles refer to the same frame
    pub fn same_frame(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Register a native procedure in this frame.
    ///
    /// The procedure receives its arguments already evaluated and split according to
    /// `arity`; see [`Builtin::new`] for other calling conventions.
    ///
    /// # Example
    /// ```
    /// use cpslisp::{Value, create_global_scope, evaluate};
    /// use cpslisp::evaluator::calling::Arity;
    ///
    /// let scope = create_global_scope();
    /// scope.define_builtin("twice", Arity::exactly(1), |args| {
    ///     let v = args.required[0].clone();
    ///     Ok(Value::list([v.clone(), v]))
    /// });
    /// # #[cfg(feature = "reader")]
    /// # {
    /// let expr = cpslisp::reader::parse("(twice 7)").unwrap();
    /// assert_eq!(evaluate(&scope, &expr).unwrap().to_string(), "(7 7)");
    /// # }
    /// ```
    pub fn define_builtin<F>(&self, name: &'static str, arity: Arity, func: F)
    where
        F: Fn(Arguments) -> Result<Value, Error> + 'static,
    {
        self.define(Builtin::new(name, arity, func));
    }

    /// Bind an already constructed builtin under its own name in this frame
    pub fn define(&self, builtin: Builtin) {
        let name = builtin.symbol().clone();
        tracing::trace!(name = %name, "registering builtin");
        self.set(name, Value::Procedure(Procedure::Builtin(Rc::new(builtin))), true);
    }

    /// Get all bindings visible from this frame.
    /// Returns a Vec of (name, value) pairs sorted by name; inner frames shadow outer ones.
    pub fn bindings(&self) -> Vec<(Symbol, Value)> {
        let mut visible: HashMap<Symbol, Value> = HashMap::new();
        let mut frame = Some(self);
        while let Some(current) = frame {
            for (name, value) in current.0.bindings.borrow().iter() {
                visible
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
            frame = current.0.parent.as_ref();
        }

        let mut result: Vec<_> = visible.into_iter().collect();
        result.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        result
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::val;

    fn name(s: &'static str) -> Symbol {
        Symbol::from_static(s)
    }

    #[test]
    fn test_get_walks_parent_chain() {
        let root = Scope::new_root();
        root.set(name("x"), val(1), true);
        let inner = root.child().child();
        assert_eq!(inner.get("x").unwrap(), val(1));
        assert!(inner.is_set("x"));
        assert!(!inner.is_set("y"));
        assert_eq!(inner.get("y"), Err(NameNotSet("y".to_owned())));
    }

    #[test]
    fn test_local_set_shadows() {
        let root = Scope::new_root();
        root.set(name("x"), val(1), true);
        let inner = root.child();
        inner.set(name("x"), val(2), true);
        assert_eq!(inner.get("x").unwrap(), val(2));
        assert_eq!(root.get("x").unwrap(), val(1));
    }

    #[test]
    fn test_non_local_set_updates_nearest_binding() {
        let root = Scope::new_root();
        root.set(name("x"), val(1), true);
        let middle = root.child();
        middle.set(name("x"), val(10), true);
        let inner = middle.child();

        inner.set(name("x"), val(11), false);
        assert_eq!(middle.get("x").unwrap(), val(11));
        assert_eq!(root.get("x").unwrap(), val(1));
        assert!(inner.bindings().iter().any(|(n, v)| n.name() == "x" && *v == val(11)));
    }

    #[test]
    fn test_non_local_set_creates_in_root_when_missing() {
        let root = Scope::new_root();
        let inner = root.child().child();
        inner.set(name("fresh"), val(5), false);
        assert_eq!(inner.get("fresh").unwrap(), val(5));
        assert_eq!(root.get("fresh").unwrap(), val(5));
        // Visible from frames that never saw the assignment
        assert_eq!(root.child().get("fresh").unwrap(), val(5));
    }

    #[test]
    fn test_shared_frames_see_updates() {
        let root = Scope::new_root();
        let handle = root.clone();
        assert!(handle.same_frame(&root));
        handle.set(name("shared"), val("a"), false);
        assert_eq!(root.get("shared").unwrap(), val("a"));
        assert!(!root.child().same_frame(&root));
    }

    #[test]
    fn test_bindings_sorted_and_shadowed() {
        let root = Scope::new_root();
        root.set(name("b"), val(1), true);
        root.set(name("a"), val(2), true);
        let inner = root.child();
        inner.set(name("b"), val(3), true);
        let names: Vec<_> = inner
            .bindings()
            .into_iter()
            .map(|(n, v)| (n.name().to_owned(), v))
            .collect();
        assert_eq!(
            names,
            vec![("a".to_owned(), val(2)), ("b".to_owned(), val(3))]
        );
    }
}
