//! Whole programs run through the public API: read, evaluate, inspect.
#![cfg(feature = "reader")]
#![expect(clippy::unwrap_used)] // test code OK

use cpslisp::evaluator::calling::{Arity, Builtin, Completion};
use cpslisp::reader::{parse, parse_program};
use cpslisp::{ErrorKind, Scope, Value, create_global_scope, evaluate, evaluate_sequence};

/// Run `source` as a program in `scope` and print the final value.
fn run_in(scope: &Scope, source: &str) -> Result<String, cpslisp::Error> {
    let program = parse_program(source).unwrap();
    evaluate_sequence(scope, &program).map(|v| v.to_string())
}

fn run(source: &str) -> Result<String, cpslisp::Error> {
    run_in(&create_global_scope(), source)
}

#[test]
fn test_programs() {
    let cases: Vec<(&str, &str)> = vec![
        (
            "(setq fact (lambda (n) (if (< n 2) 1 (* n (fact (- n 1))))))
             (fact 20)",
            "2432902008176640000",
        ),
        (
            "(setq rev (lambda (xs)
               (let ((acc nil))
                 (while xs
                   (setq acc (cons (car xs) acc))
                   (setq xs (cdr xs)))
                 acc)))
             (rev '(1 2 3 4))",
            "(4 3 2 1)",
        ),
        (
            "(setq make-counter (lambda () (let ((n 0)) (lambda () (setq n (+ n 1))))))
             (setq a (make-counter))
             (setq b (make-counter))
             (a) (a) (b)
             (list (a) (b))",
            "(3 2)",
        ),
        (
            "(setq unless (macro (c &rest body) (list 'if c nil (cons 'begin body))))
             (list (unless nil 1 2) (unless t 3))",
            "(2 nil)",
        ),
        (
            "(setq find-first (lambda (pred xs)
               (call/cc (lambda (return)
                 (while xs
                   (if (pred (car xs)) (return (car xs)))
                   (setq xs (cdr xs)))
                 nil))))
             (list (find-first (lambda (x) (> x 2)) '(1 2 3 4))
                   (find-first (lambda (x) (> x 10)) '(1 2)))",
            "(3 nil)",
        ),
        (
            "(setq opt (lambda (a &optional b &rest more) (list a b more)))
             (list (opt 1) (opt 1 2) (opt 1 2 3 4))",
            "((1 nil nil) (1 2 nil) (1 2 (3 4)))",
        ),
        ("(list (+ 1 2) (+ 1 2.0) (/ 4 2) (- 5) (= 1 1.0) (eq 1 1.0))", "(3 3.0 2 -5 t nil)"),
        ("(eval '(+ 1 2) '(* 2 3))", "6"),
        ("(let ((x 1) (y)) (list x y))", "(1 nil)"),
        ("(set (intern \"dyn\") 7) dyn", "7"),
        ("(begin)", "nil"),
        ("(cons 1 2)", "(1 . 2)"),
    ];

    for (i, (source, expected)) in cases.iter().enumerate() {
        let result = run(source).unwrap_or_else(|e| panic!("program #{}: {}", i + 1, e.report()));
        assert_eq!(result, *expected, "program #{}", i + 1);
    }
}

#[test]
fn test_failures() {
    let cases: Vec<(&str, ErrorKind)> = vec![
        ("(undefined-function 1)", ErrorKind::SymbolNotSet),
        ("(1 2 3)", ErrorKind::NotAProcedure),
        ("((lambda (a b) a) 1)", ErrorKind::ArityError),
        ("((lambda (a) a) 1 2)", ErrorKind::ArityError),
        ("(lambda (&rest) 1)", ErrorKind::MalformedParameterList),
        ("(intern \"has space\")", ErrorKind::InvalidSymbol),
        ("(setq a)", ErrorKind::ArityError),
        ("(setq 1 2)", ErrorKind::TypeError),
        ("(call/cc 5)", ErrorKind::TypeError),
        ("(car 5)", ErrorKind::TypeError),
        ("(/ 1 0)", ErrorKind::EvalError),
        ("(+ 9223372036854775807 1)", ErrorKind::EvalError),
    ];

    for (source, kind) in cases {
        let err = run(source).unwrap_err();
        assert_eq!(err.kind, kind, "{source}: {err}");
    }
}

#[test]
fn test_errors_abort_only_the_current_evaluation() {
    let scope = create_global_scope();
    let err = run_in(&scope, "(setq x 1) (car x) (setq x 2)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    // The statement after the failure never ran
    assert_eq!(run_in(&scope, "x").unwrap(), "1");
    assert_eq!(run_in(&scope, "(+ x 1)").unwrap(), "2");
}

#[test]
fn test_report_lists_enclosing_calls() {
    let err = run("(setq g (lambda (x) (car x))) (list 1 (g 2))").unwrap_err();
    let report = err.report();
    assert!(report.starts_with("*** Exception:\n\n"), "{report}");
    assert!(report.contains("(list 1 (g 2))\n"), "{report}");
    assert!(report.ends_with("*** TypeError: value not a cell: 2"), "{report}");
}

#[test]
fn test_retained_continuation_resumes_its_context() {
    let scope = create_global_scope();
    run_in(&scope, "(setq k nil) (setq log nil)").unwrap();
    assert_eq!(
        run_in(&scope, "(setq log (cons (+ 1 (call/cc (lambda (c) (setq k c) 1))) log))").unwrap(),
        "(2)"
    );
    run_in(&scope, "(k 10)").unwrap();
    run_in(&scope, "(k 100)").unwrap();
    assert_eq!(run_in(&scope, "log").unwrap(), "(101 11 2)");
}

#[test]
fn test_deep_recursion_from_the_public_api() {
    let scope = create_global_scope();
    run_in(
        &scope,
        "(setq count (lambda (n) (if (< n 1) 0 (+ 1 (count (- n 1))))))
         (setq loop (lambda (n acc) (if (< n 1) acc (loop (- n 1) (+ acc 1)))))",
    )
    .unwrap();
    assert_eq!(run_in(&scope, "(count 50000)").unwrap(), "50000");
    assert_eq!(run_in(&scope, "(loop 200000 0)").unwrap(), "200000");
}

#[test]
fn test_host_procedures() {
    let scope = create_global_scope();
    scope.define_builtin("square", Arity::exactly(1), |args| match &args.required[0] {
        Value::Integer(n) => Ok(Value::Integer(n * n)),
        other => Err(cpslisp::Error::type_error(format!("cannot square {other}"))),
    });
    // Receives its arguments unevaluated and hands back code to run in the caller's scope
    scope.define(
        Builtin::with_backend("quoted-sum", Arity::at_least(0), |_, args| {
            let mut form = vec![Value::symbol("+").unwrap()];
            form.extend(args.rest);
            Ok(Completion::Value(Value::list(form)))
        })
        .with_convention(false, true),
    );

    assert_eq!(run_in(&scope, "(square 12)").unwrap(), "144");
    assert_eq!(run_in(&scope, "(setq z 5) (quoted-sum z (square 2) 1)").unwrap(), "10");
    assert_eq!(run_in(&scope, "(square 'a)").unwrap_err().kind, ErrorKind::TypeError);
    assert_eq!(run_in(&scope, "(square)").unwrap_err().kind, ErrorKind::ArityError);
}

#[test]
fn test_single_expressions() {
    let scope = create_global_scope();
    let expr = parse("(+ 1 (call/cc (lambda (k) (k 41))))").unwrap();
    assert_eq!(evaluate(&scope, &expr).unwrap(), Value::Integer(42));
    assert_eq!(evaluate(&scope, &Value::Integer(7)).unwrap(), Value::Integer(7));
    assert_eq!(
        evaluate(&scope, &parse("t").unwrap()).unwrap(),
        Value::symbol("t").unwrap()
    );
}
