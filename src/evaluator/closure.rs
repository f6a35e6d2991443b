//! User procedures created by `lambda` and `macro`.

use std::fmt;

use super::calling::{Arguments, Arity, Completion};
use crate::Error;
use crate::ast::{Symbol, Value};
use crate::scope::Scope;

const OPTIONAL_MARKER: &str = "&optional";
const REST_MARKER: &str = "&rest";

/// A lambda or macro together with the scope it was created in
pub struct Closure {
    required: Vec<Symbol>,
    optional: Vec<Symbol>,
    rest: Option<Symbol>,
    body: Value,
    env: Scope,
    is_macro: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Required,
    Optional,
    RestName,
    Done,
}

impl Closure {
    /// Build a closure from a parameter list such as `(a b &optional c &rest d)`.
    pub(crate) fn new(
        params: &Value,
        body: Value,
        env: Scope,
        is_macro: bool,
    ) -> Result<Closure, Error> {
        let mut closure = Closure {
            required: Vec::new(),
            optional: Vec::new(),
            rest: None,
            body,
            env,
            is_macro,
        };

        let mut section = Section::Required;
        let mut iter = params.iter();
        for param in iter.by_ref() {
            let Value::Symbol(name) = param else {
                return Err(Error::malformed_parameters(format!(
                    "parameter is not a symbol: {param}"
                )));
            };
            section = match (name.name(), section) {
                (OPTIONAL_MARKER, Section::Required) => Section::Optional,
                (OPTIONAL_MARKER, Section::Optional) => {
                    return Err(Error::malformed_parameters("&optional given twice"));
                }
                (OPTIONAL_MARKER, _) => {
                    return Err(Error::malformed_parameters("&optional after &rest"));
                }
                (REST_MARKER, Section::Required | Section::Optional) => Section::RestName,
                (REST_MARKER, _) => {
                    return Err(Error::malformed_parameters("&rest given twice"));
                }
                (_, Section::Done) => {
                    return Err(Error::malformed_parameters(format!(
                        "only one name may follow &rest, found {name}"
                    )));
                }
                _ => {
                    if closure.binds(name) {
                        return Err(Error::malformed_parameters(format!(
                            "duplicate parameter name: {name}"
                        )));
                    }
                    match section {
                        Section::Required => closure.required.push(name.clone()),
                        Section::Optional => closure.optional.push(name.clone()),
                        _ => closure.rest = Some(name.clone()),
                    }
                    if section == Section::RestName {
                        Section::Done
                    } else {
                        section
                    }
                }
            };
        }

        if !iter.tail().is_nil() {
            return Err(Error::malformed_parameters(format!(
                "not a valid parameter list: {params}"
            )));
        }
        if section == Section::RestName {
            return Err(Error::malformed_parameters("&rest needs a name"));
        }
        Ok(closure)
    }

    fn binds(&self, name: &Symbol) -> bool {
        self.required.contains(name)
            || self.optional.contains(name)
            || self.rest.as_ref() == Some(name)
    }

    pub fn arity(&self) -> Arity {
        Arity::new(self.required.len(), self.optional.len(), self.rest.is_some())
    }

    pub fn is_macro(&self) -> bool {
        self.is_macro
    }

    /// Bind the arguments in a fresh child of the captured scope and hand back the body.
    pub(crate) fn bind(&self, args: Arguments) -> Completion {
        let scope = self.env.child();
        for (name, value) in self.required.iter().zip(args.required) {
            scope.set(name.clone(), value, true);
        }
        let mut supplied = args.optional.into_iter();
        for name in &self.optional {
            scope.set(name.clone(), supplied.next().unwrap_or_default(), true);
        }
        if let Some(name) = &self.rest {
            scope.set(name.clone(), Value::list(args.rest), true);
        }
        Completion::Sequence {
            scope,
            body: self.body.clone(),
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(if self.is_macro { "Macro" } else { "Closure" })
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("rest", &self.rest)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}
