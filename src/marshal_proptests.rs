//! Property-based round-trip checks for the wire codec, using `quickcheck`
//! the way `marcelbuesing-dbus-native` and `fossabot-dbus-native` do for
//! their own marshalling layer.

use quickcheck::{quickcheck, TestResult};

use crate::marshal::marshall;
use crate::signature::parse;
use crate::unmarshal::{unmarshall, UnmarshallOptions};
use crate::value::Value;

fn roundtrip(sig: &str, values: Vec<Value>) -> bool {
    let tys = parse(sig).unwrap().types;
    let Ok(bytes) = marshall(&tys, &values, 0) else {
        return true;
    };
    let decoded = unmarshall(&bytes, &tys, 0, UnmarshallOptions::default()).unwrap();
    decoded == values
}

quickcheck! {
    fn roundtrip_bytes(xs: Vec<u8>) -> bool {
        roundtrip("y", xs.into_iter().take(1).map(Value::Byte).collect::<Vec<_>>())
    }

    fn roundtrip_u32(x: u32) -> bool {
        roundtrip("u", vec![Value::Uint32(x)])
    }

    fn roundtrip_i32(x: i32) -> bool {
        roundtrip("i", vec![Value::Int32(x)])
    }

    fn roundtrip_string(s: String) -> TestResult {
        if s.contains('\0') {
            return TestResult::discard();
        }
        TestResult::from_bool(roundtrip("s", vec![Value::Str(s)]))
    }

    fn roundtrip_struct_of_ints(a: i32, b: u16, c: u8) -> bool {
        roundtrip(
            "(iqy)",
            vec![Value::Struct(vec![
                Value::Int32(a),
                Value::Uint16(b),
                Value::Byte(c),
            ])],
        )
    }
}
