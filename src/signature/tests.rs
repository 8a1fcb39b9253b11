use super::*;

#[test]
fn parses_basic_types() {
    let sig = parse("yyyy").unwrap();
    assert_eq!(sig.types, vec![Type::Byte, Type::Byte, Type::Byte, Type::Byte]);
    assert_eq!(sig.to_signature_string(), "yyyy");
}

#[test]
fn parses_array_and_struct() {
    let sig = parse("a(yyy)y").unwrap();
    assert_eq!(
        sig.types,
        vec![
            Type::Array(Box::new(Type::Struct(vec![Type::Byte, Type::Byte, Type::Byte]))),
            Type::Byte,
        ]
    );
    assert_eq!(sig.to_signature_string(), "a(yyy)y");
}

#[test]
fn parses_dict_entry_in_array() {
    let sig = parse("a{sv}").unwrap();
    assert_eq!(
        sig.types,
        vec![Type::Array(Box::new(Type::DictEntry(
            Box::new(Type::Str),
            Box::new(Type::Variant)
        )))]
    );
}

#[test]
fn rejects_unknown_type() {
    assert_eq!(parse("ccc"), Err(SignatureError::UnknownType));
}

#[test]
fn rejects_truncated_array() {
    assert_eq!(parse("a"), Err(SignatureError::UnexpectedEnd));
}

#[test]
fn rejects_unclosed_struct() {
    assert_eq!(parse("("), Err(SignatureError::UnexpectedEnd));
}

#[test]
fn rejects_dict_entry_outside_array() {
    assert_eq!(parse("{sv}"), Err(SignatureError::BadDictEntry));
    assert_eq!(parse("(i{sv})"), Err(SignatureError::BadDictEntry));
}

#[test]
fn rejects_non_basic_dict_key() {
    assert_eq!(parse("a{vs}"), Err(SignatureError::BadDictEntry));
}

#[test]
fn rejects_excessive_nesting() {
    let mut sig = String::new();
    for _ in 0..33 {
        sig.push('(');
    }
    sig.push('i');
    for _ in 0..33 {
        sig.push(')');
    }
    assert_eq!(parse(&sig), Err(SignatureError::MaxNesting));
}

#[test]
fn round_trips_render() {
    for s in ["", "y", "aaaai", "a{sv}", "(yyy)", "a(ii)a{si}b"] {
        let sig = parse(s).unwrap();
        assert_eq!(sig.to_signature_string(), s);
    }
}
