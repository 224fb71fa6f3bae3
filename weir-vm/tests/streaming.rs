use serde_json::json;
use weir_vm::prelude::*;

fn program(doc: serde_json::Value) -> Program {
    compile_value(&doc).unwrap()
}

#[test]
fn suspends_until_input_arrives() {
    let prog = program(json!({"type": "integer"}));
    let mut v = Validator::new(&prog);

    assert_eq!(v.state(), State::AwaitInput);

    // "1" could still grow into "10", so the validator must wait
    assert_eq!(v.more(b"1"), Outcome::More);
    assert_eq!(v.state(), State::SuspendedForMoreInput);

    assert_eq!(v.more(b"10"), Outcome::More);
    assert_eq!(v.close(), Outcome::Valid);
    assert_eq!(v.state(), State::Finished(Outcome::Valid));
}

#[test]
fn byte_at_a_time_feeding_matches_one_shot() {
    let schema = json!({
        "properties": {"foo": {"type": "number"}, "bar": {"type": "string"}},
        "required": ["foo"],
    });
    let prog = program(schema);
    let doc = br#"{"foo":1.5,"bar":"baz"}"#;

    let mut v = Validator::new(&prog);
    let mut outcome = Outcome::More;
    for &b in doc.iter() {
        outcome = v.more(&[b]);
        if outcome != Outcome::More {
            break;
        }
    }
    if outcome == Outcome::More {
        outcome = v.close();
    }

    assert_eq!(outcome, Outcome::Valid);
    assert_eq!(validate(&prog, doc), Ok(()));
}

#[test]
fn verdicts_are_stable_after_finishing() {
    let prog = program(json!({"type": "integer"}));
    let mut v = Validator::new(&prog);

    assert_eq!(v.more(b"0.5 "), Outcome::Invalid(ErrorCode::NotInteger));
    // further input cannot change a finished verdict
    assert_eq!(v.more(b"1"), Outcome::Invalid(ErrorCode::NotInteger));
    assert_eq!(v.close(), Outcome::Invalid(ErrorCode::NotInteger));
}

#[test]
fn closing_mid_document_reports_closed() {
    let prog = program(json!({}));
    let mut v = Validator::new(&prog);

    assert_eq!(v.more(br#"{"a":"#), Outcome::More);
    assert_eq!(v.close(), Outcome::Invalid(ErrorCode::Closed));
}

#[test]
fn closing_with_no_input_reports_closed() {
    let prog = program(json!({"type": "null"}));
    let mut v = Validator::new(&prog);
    assert_eq!(v.close(), Outcome::Invalid(ErrorCode::Closed));
}

#[test]
fn malformed_json_is_an_unexpected_token() {
    let prog = program(json!({}));
    let mut v = Validator::new(&prog);

    assert_eq!(
        v.more(br#"{"a":1,}"#),
        Outcome::Invalid(ErrorCode::UnexpectedToken)
    );
}

#[test]
fn oversized_keys_are_rejected() {
    let prog = program(json!({}));
    let mut v = Validator::new(&prog);

    let mut doc = b"{\"".to_vec();
    doc.extend(std::iter::repeat(b'k').take(weir_vm::token::KEY_CAPACITY + 1));
    doc.extend_from_slice(b"\":1}");

    assert_eq!(v.more(&doc), Outcome::Invalid(ErrorCode::KeyTooLong));
}

#[test]
fn splits_survive_suspension() {
    // the split branches must both resume across the chunk boundary
    let prog = program(json!({"anyOf": [{"required": ["a"]}, {"minProperties": 2}]}));
    let mut v = Validator::new(&prog);

    assert_eq!(v.more(br#"{"x":1,"#), Outcome::More);
    assert_eq!(v.more(br#""y":2}"#), Outcome::Valid);
}

#[test]
fn numbers_split_across_chunks_tokenize_whole() {
    let prog = program(json!({"maximum": 100.0}));
    let mut v = Validator::new(&prog);

    // "12" + "0" is 120, not 12
    assert_eq!(v.more(b"12"), Outcome::More);
    assert_eq!(v.more(b"0"), Outcome::More);
    assert_eq!(v.close(), Outcome::Invalid(ErrorCode::Number));
}
