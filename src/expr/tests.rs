use super::{Expression, MapScope, Scope};
use crate::error::ErrorKind;
use crate::param_value::{Instance, ParamsMap, Value};

fn scope_with(entries: &[(&str, Value)]) -> ParamsMap {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn eval(source: &str, params: &ParamsMap) -> Value {
    Expression::compile(source)
        .expect("compile failed")
        .evaluate(&MapScope(params))
        .expect("evaluation failed")
}

fn eval_bool(source: &str, params: &ParamsMap) -> bool {
    Expression::compile(source)
        .expect("compile failed")
        .evaluate_bool(&MapScope(params))
        .expect("evaluation failed")
}

#[test]
fn test_literals() {
    let params = ParamsMap::new();
    assert_eq!(eval("42", &params), Value::Int(42));
    assert_eq!(eval("3.5", &params), Value::Float(3.5));
    assert_eq!(eval("'it\\'s'", &params), Value::Str("it's".into()));
    assert_eq!(eval("\"two\"", &params), Value::Str("two".into()));
    assert_eq!(eval("true", &params), Value::Bool(true));
    assert_eq!(eval("null", &params), Value::Null);
}

#[test]
fn test_arithmetic_precedence() {
    let params = ParamsMap::new();
    assert_eq!(eval("1 + 2 * 3", &params), Value::Int(7));
    assert_eq!(eval("(1 + 2) * 3", &params), Value::Int(9));
    assert_eq!(eval("7 % 4", &params), Value::Int(3));
    assert_eq!(eval("1 + 2.5", &params), Value::Float(3.5));
    assert_eq!(eval("-3 + 1", &params), Value::Int(-2));
}

#[test]
fn test_string_concatenation() {
    let params = scope_with(&[("name", Value::Str("John".into()))]);
    assert_eq!(eval("'Mr. ' + name", &params), Value::Str("Mr. John".into()));
    assert_eq!(eval("name + 1", &params), Value::Str("John1".into()));
}

#[test]
fn test_comparisons() {
    let params = scope_with(&[("age", Value::Int(30))]);
    assert_eq!(eval("age > 18", &params), Value::Bool(true));
    assert_eq!(eval("age <= 30", &params), Value::Bool(true));
    assert_eq!(eval("'abc' < 'abd'", &params), Value::Bool(true));
    assert_eq!(eval("age == 30.0", &params), Value::Bool(true));
    assert_eq!(eval("age === 30.0", &params), Value::Bool(false));
    assert_eq!(eval("age !== 30", &params), Value::Bool(false));
    assert_eq!(eval("age != null", &params), Value::Bool(true));
}

#[test]
fn test_short_circuit() {
    // The right side divides by zero; short-circuit must skip it.
    let params = scope_with(&[("n", Value::Int(0))]);
    assert_eq!(eval("false && 1 / n > 0", &params), Value::Bool(false));
    assert_eq!(eval("true || 1 / n > 0", &params), Value::Bool(true));
}

#[test]
fn test_dotted_path() {
    let mut address = indexmap::IndexMap::new();
    address.insert("city".to_string(), Value::Str("Oslo".into()));
    let mut user = Instance::new("User");
    user.properties
        .insert("address".into(), Value::Object(address));
    let params = scope_with(&[("user", Value::Instance(user))]);
    assert_eq!(eval("user.address.city", &params), Value::Str("Oslo".into()));
}

#[test]
fn test_missing_root_is_null() {
    let params = ParamsMap::new();
    assert_eq!(eval("ghost", &params), Value::Null);
    assert!(!eval_bool("ghost", &params));
    assert!(eval_bool("ghost == null", &params));
}

#[test]
fn test_missing_property_fails() {
    let params = scope_with(&[("user", Value::Object(indexmap::IndexMap::new()))]);
    let err = Expression::compile("user.name")
        .unwrap()
        .evaluate(&MapScope(&params))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expression);
}

#[test]
fn test_truthiness_of_zero() {
    let params = scope_with(&[
        ("zero", Value::Int(0)),
        ("empty", Value::Str(String::new())),
        ("list", Value::Array(vec![Value::Int(1)])),
    ]);
    assert!(!eval_bool("zero", &params));
    assert!(!eval_bool("empty", &params));
    assert!(eval_bool("list", &params));
}

#[test]
fn test_syntax_errors() {
    for source in ["1 +", "(1", "a.", "1 2", "@", "'open"] {
        let err = Expression::compile(source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expression, "source: {source}");
    }
}

#[test]
fn test_division_by_zero() {
    let params = ParamsMap::new();
    let err = Expression::compile("1 / 0")
        .unwrap()
        .evaluate(&MapScope(&params))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expression);
}

#[test]
fn test_scope_bindings_shadow_parameter() {
    struct Layered {
        bindings: ParamsMap,
        params: ParamsMap,
    }
    impl Scope for Layered {
        fn root(&self, name: &str) -> Option<Value> {
            self.bindings
                .get(name)
                .or_else(|| self.params.get(name))
                .cloned()
        }
        fn property(&self, base: &Value, name: &str) -> Option<Value> {
            MapScope(&self.params).property(base, name)
        }
    }
    let scope = Layered {
        bindings: scope_with(&[("x", Value::Int(2))]),
        params: scope_with(&[("x", Value::Int(1))]),
    };
    let expr = Expression::compile("x * 10").unwrap();
    assert_eq!(expr.evaluate(&scope).unwrap(), Value::Int(20));
}
