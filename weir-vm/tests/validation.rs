use rstest::rstest;
use serde_json::{json, Value};
use weir_vm::prelude::*;

fn program(doc: Value) -> Program {
    compile_value(&doc).unwrap_or_else(|e| panic!("compile failed for {doc}: {e}"))
}

fn check(doc: Value, input: &str) -> Result<(), ErrorCode> {
    validate(&program(doc), input.as_bytes())
}

// End-to-end agreement scenarios: one row per (schema, document, verdict).
#[rstest]
#[case(json!({}), r#"{"foo":{"bar":{"quux":[1,2,3,{},{"this":[]}],"foo":[{},{},[{}]]}}}"#, Ok(()))]
#[case(json!({"type": "integer"}), "1.1e2", Ok(()))]
#[case(json!({"type": "integer"}), "0.1", Err(ErrorCode::NotInteger))]
#[case(json!({"properties": {"foo": {"type": "number"}, "bar": {"type": "string"}}}),
       r#"{"foo":1,"bar":"baz"}"#, Ok(()))]
#[case(json!({"properties": {"foo": {"type": "number"}, "bar": {"type": "string"}}}),
       r#"{"bar":1,"foo":"baz"}"#, Err(ErrorCode::UnexpectedToken))]
#[case(json!({"minProperties": 1,
              "properties": {"foo": {"type": "object", "minProperties": 1},
                             "bar": {"type": "string"}}}),
       r#"{"foo":{"bar":3}}"#, Ok(()))]
#[case(json!({"dependencies": {"bar": ["foo"]}}), r#"{"bar":1}"#,
       Err(ErrorCode::MissingRequired))]
#[case(json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]}), "1.5",
       Err(ErrorCode::SplitCondition))]
#[case(json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]}), "3", Ok(()))]
#[case(json!({"minimum": 1.1}), "\"x\"", Ok(()))]
fn agreement(#[case] schema: Value, #[case] input: &str, #[case] expect: Result<(), ErrorCode>) {
    assert_eq!(check(schema, input), expect);
}

#[test]
fn integer_accepts_integer_valued_floats() {
    let schema = json!({"type": "integer"});
    assert_eq!(check(schema.clone(), "1.1e2"), Ok(()));
    assert_eq!(check(schema.clone(), "200e-2"), Ok(()));
    assert_eq!(check(schema.clone(), "-3"), Ok(()));
    assert_eq!(check(schema.clone(), "0.1"), Err(ErrorCode::NotInteger));
    assert_eq!(check(schema.clone(), "-5.7"), Err(ErrorCode::NotInteger));
    assert_eq!(check(schema, "\"1\""), Err(ErrorCode::UnexpectedToken));
}

#[test]
fn numeric_ranges() {
    let schema = json!({"minimum": 2.0, "maximum": 4.0});
    assert_eq!(check(schema.clone(), "2"), Ok(()));
    assert_eq!(check(schema.clone(), "4"), Ok(()));
    assert_eq!(check(schema.clone(), "1.9"), Err(ErrorCode::Number));
    assert_eq!(check(schema, "4.1"), Err(ErrorCode::Number));

    let excl = json!({"minimum": 2.0, "exclusiveMinimum": true});
    assert_eq!(check(excl.clone(), "2"), Err(ErrorCode::Number));
    assert_eq!(check(excl, "2.1"), Ok(()));
}

#[test]
fn multiple_of() {
    let schema = json!({"multipleOf": 3});
    assert_eq!(check(schema.clone(), "9"), Ok(()));
    assert_eq!(check(schema.clone(), "10"), Err(ErrorCode::Number));
    assert_eq!(check(schema, "\"x\""), Ok(()));

    let frac = json!({"multipleOf": 0.5});
    assert_eq!(check(frac.clone(), "2.5"), Ok(()));
    assert_eq!(check(frac, "2.3"), Err(ErrorCode::Number));
}

#[test]
fn min_properties_boundary() {
    let schema = json!({"minProperties": 2});
    assert_eq!(check(schema.clone(), r#"{"a":1,"b":2}"#), Ok(()));
    assert_eq!(check(schema.clone(), r#"{"a":1}"#), Err(ErrorCode::TooFewProps));
    // ignored on non-objects
    assert_eq!(check(schema, "[1]"), Ok(()));

    let schema = json!({"maxProperties": 1});
    assert_eq!(check(schema.clone(), r#"{"a":1}"#), Ok(()));
    assert_eq!(
        check(schema, r#"{"a":1,"b":2}"#),
        Err(ErrorCode::TooManyProps)
    );
}

#[test]
fn required_properties() {
    let schema = json!({"required": ["x"]});
    assert_eq!(check(schema.clone(), r#"{"x":1}"#), Ok(()));
    assert_eq!(
        check(schema.clone(), r#"{"y":1}"#),
        Err(ErrorCode::MissingRequired)
    );
    assert_eq!(check(schema.clone(), r#"{}"#), Err(ErrorCode::MissingRequired));
    // ignored on non-objects
    assert_eq!(check(schema, "17"), Ok(()));
}

#[test]
fn dependencies_accept_both_or_neither() {
    let schema = json!({"dependencies": {"bar": ["foo"]}});
    assert_eq!(check(schema.clone(), r#"{}"#), Ok(()));
    assert_eq!(check(schema.clone(), r#"{"foo":1}"#), Ok(()));
    assert_eq!(check(schema.clone(), r#"{"bar":1,"foo":2}"#), Ok(()));
    assert_eq!(
        check(schema, r#"{"bar":1}"#),
        Err(ErrorCode::MissingRequired)
    );
}

#[test]
fn closed_property_sets() {
    let schema = json!({"properties": {"foo": {}}, "additionalProperties": false});
    assert_eq!(check(schema.clone(), r#"{"foo":[1,2]}"#), Ok(()));
    assert_eq!(
        check(schema, r#"{"quux":1}"#),
        Err(ErrorCode::BadPropertyName)
    );

    let typed = json!({"additionalProperties": {"type": "number"}});
    assert_eq!(check(typed.clone(), r#"{"a":1,"b":2.5}"#), Ok(()));
    assert_eq!(
        check(typed, r#"{"a":"x"}"#),
        Err(ErrorCode::UnexpectedToken)
    );
}

#[test]
fn string_lengths_and_patterns() {
    let schema = json!({"minLength": 2, "maxLength": 3});
    assert_eq!(check(schema.clone(), "\"ab\""), Ok(()));
    assert_eq!(check(schema.clone(), "\"abc\""), Ok(()));
    assert_eq!(check(schema.clone(), "\"a\""), Err(ErrorCode::LengthTooShort));
    assert_eq!(
        check(schema.clone(), "\"abcd\""),
        Err(ErrorCode::LengthTooLong)
    );
    assert_eq!(check(schema, "31"), Ok(()));

    let pat = json!({"pattern": "abc"});
    assert_eq!(check(pat.clone(), "\"abc\""), Ok(()));
    assert_eq!(check(pat.clone(), "\"xxabcyy\""), Ok(()));
    assert_eq!(check(pat, "\"ab\""), Err(ErrorCode::InvalidString));
}

#[test]
fn uniform_items() {
    let schema = json!({"items": {"type": "number"}});
    assert_eq!(check(schema.clone(), "[]"), Ok(()));
    assert_eq!(check(schema.clone(), "[1,2.5,3e2]"), Ok(()));
    assert_eq!(check(schema.clone(), r#"[1,"x"]"#), Err(ErrorCode::UnexpectedToken));
    // ignored on non-arrays
    assert_eq!(check(schema, r#"{"length":1}"#), Ok(()));
}

#[test]
fn tuple_items_with_additional() {
    let schema = json!({
        "items": [{"type": "string"}, {"type": "number"}],
        "additionalItems": false,
    });
    assert_eq!(check(schema.clone(), r#"["a"]"#), Ok(()));
    assert_eq!(check(schema.clone(), r#"["a",1]"#), Ok(()));
    assert_eq!(
        check(schema.clone(), r#"["a",1,true]"#),
        Err(ErrorCode::LengthTooLong)
    );
    assert_eq!(check(schema, r#"[1]"#), Err(ErrorCode::UnexpectedToken));
}

#[test]
fn item_count_bounds() {
    let schema = json!({"minItems": 1, "maxItems": 2});
    assert_eq!(check(schema.clone(), "[1]"), Ok(()));
    assert_eq!(check(schema.clone(), "[1,2]"), Ok(()));
    assert_eq!(check(schema.clone(), "[]"), Err(ErrorCode::LengthTooShort));
    assert_eq!(check(schema, "[1,2,3]"), Err(ErrorCode::LengthTooLong));
}

#[test]
fn one_of_accepts_exactly_one() {
    let schema = json!({"oneOf": [{"type": "integer"}, {"minimum": 2.0}]});
    assert_eq!(check(schema.clone(), "1"), Ok(()));
    assert_eq!(check(schema.clone(), "2.5"), Ok(()));
    assert_eq!(check(schema.clone(), "3"), Err(ErrorCode::SplitCondition));
    assert_eq!(check(schema, "1.5"), Err(ErrorCode::SplitCondition));
}

#[test]
fn not_inverts_its_schema() {
    // the type switch absorbs the negation without a split
    let schema = json!({"not": {"type": "string"}});
    assert_eq!(check(schema.clone(), "5"), Ok(()));
    assert_eq!(check(schema, "\"x\""), Err(ErrorCode::UnexpectedToken));

    // a numeric negation runs as an inverted sub-validator
    let schema = json!({"not": {"minimum": 2.0}});
    assert_eq!(check(schema.clone(), "1"), Ok(()));
    assert_eq!(check(schema, "3"), Err(ErrorCode::SplitCondition));
}

#[test]
fn mixed_boolean_trees() {
    let schema = json!({
        "allOf": [
            {"anyOf": [{"type": "integer"}, {"minimum": 2.0}]},
            {"not": {"multipleOf": 3.0}},
        ]
    });

    assert_eq!(check(schema.clone(), "4"), Ok(()));
    assert_eq!(check(schema.clone(), "2.5"), Ok(()));
    assert_eq!(check(schema.clone(), "6"), Err(ErrorCode::SplitCondition));
    assert_eq!(check(schema.clone(), "9"), Err(ErrorCode::SplitCondition));
    assert_eq!(check(schema.clone(), "1.7"), Err(ErrorCode::SplitCondition));
    // {multipleOf: 3} accepts strings, so its negation rejects them
    assert_eq!(check(schema, "\"x\""), Err(ErrorCode::UnexpectedToken));
}

#[test]
fn splits_fan_out_over_whole_objects() {
    let schema = json!({
        "anyOf": [
            {"required": ["a"]},
            {"minProperties": 2},
        ]
    });

    assert_eq!(check(schema.clone(), r#"{"a":1}"#), Ok(()));
    assert_eq!(check(schema.clone(), r#"{"x":1,"y":2}"#), Ok(()));
    assert_eq!(check(schema, r#"{"x":1}"#), Err(ErrorCode::SplitCondition));
}

#[test]
fn nested_schemas_validate_nested_values() {
    let schema = json!({
        "properties": {
            "point": {
                "properties": {"x": {"type": "number"}, "y": {"type": "number"}},
                "required": ["x", "y"],
            },
            "tags": {"items": {"type": "string"}},
        }
    });

    assert_eq!(
        check(schema.clone(), r#"{"point":{"x":1,"y":2},"tags":["a","b"]}"#),
        Ok(())
    );
    assert_eq!(
        check(schema.clone(), r#"{"point":{"x":1}}"#),
        Err(ErrorCode::MissingRequired)
    );
    assert_eq!(
        check(schema, r#"{"tags":["a",3]}"#),
        Err(ErrorCode::UnexpectedToken)
    );
}

#[test]
fn boolean_and_null_types() {
    let schema = json!({"type": ["boolean", "null"]});
    assert_eq!(check(schema.clone(), "true"), Ok(()));
    assert_eq!(check(schema.clone(), "false"), Ok(()));
    assert_eq!(check(schema.clone(), "null"), Ok(()));
    assert_eq!(check(schema, "0"), Err(ErrorCode::UnexpectedToken));
}

#[test]
fn false_schema_rejects_everything() {
    let schema = json!(false);
    assert_eq!(check(schema.clone(), "1"), Err(ErrorCode::UnexpectedToken));
    assert_eq!(check(schema, "{}"), Err(ErrorCode::UnexpectedToken));
}

#[test]
fn programs_are_reusable_across_validators() {
    let prog = program(json!({"type": "integer"}));

    assert_eq!(validate(&prog, b"1"), Ok(()));
    assert_eq!(validate(&prog, b"0.5"), Err(ErrorCode::NotInteger));
    assert_eq!(validate(&prog, b"2"), Ok(()));
}

#[test]
fn compile_errors_are_fatal() {
    assert!(matches!(
        compile_value(&json!({"pattern": "^a+$"})),
        Err(CompileError::BadRegexp { .. })
    ));
    assert!(matches!(
        compile_value(&json!({"uniqueItems": true})),
        Err(CompileError::Unsupported(_))
    ));
    assert!(matches!(
        compile_value(&json!({"type": 7})),
        Err(CompileError::Schema(_))
    ));
}
