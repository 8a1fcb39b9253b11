use super::*;

#[test]
fn external_initial_request_is_hex_encoded_uid() {
    let (line, continuation) = initial_request(Mechanism::External).unwrap();
    assert!(line.starts_with("AUTH EXTERNAL "));
    assert_eq!(continuation, AuthContinuation::None);

    let hex = line.strip_prefix("AUTH EXTERNAL ").unwrap();
    let decoded = hex_decode(hex).unwrap();
    // The payload is the ASCII decimal UID, not raw binary.
    assert!(String::from_utf8(decoded).unwrap().chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn anonymous_request_has_fixed_trace_payload() {
    let (line, continuation) = initial_request(Mechanism::Anonymous).unwrap();
    assert!(line.starts_with("AUTH ANONYMOUS "));
    assert_eq!(continuation, AuthContinuation::None);
}

#[test]
fn cookie_request_awaits_a_challenge() {
    let (line, continuation) = initial_request(Mechanism::CookieSha1).unwrap();
    assert!(line.starts_with("AUTH DBUS_COOKIE_SHA1 "));
    assert_eq!(continuation, AuthContinuation::AwaitingCookieChallenge);
}

#[test]
fn parses_ok_line() {
    let line = parse_server_line("OK 1234deadbeef").unwrap();
    assert_eq!(line, ServerLine::Ok { guid: "1234deadbeef".into() });
}

#[test]
fn parses_rejected_line() {
    let line = parse_server_line("REJECTED EXTERNAL DBUS_COOKIE_SHA1").unwrap();
    assert_eq!(
        line,
        ServerLine::Rejected {
            mechanisms: vec!["EXTERNAL".into(), "DBUS_COOKIE_SHA1".into()],
        }
    );
}

#[test]
fn parses_data_line() {
    let line = parse_server_line("DATA 68656c6c6f").unwrap();
    assert_eq!(line, ServerLine::Data { hex: "68656c6c6f".into() });
}

#[test]
fn rejects_unknown_verb() {
    assert!(parse_server_line("WAT nope").is_err());
}

#[test]
fn hex_round_trips() {
    let bytes = b"hello dbus";
    let hex = hex_encode(bytes);
    assert_eq!(hex_decode(&hex).unwrap(), bytes);
}

#[test]
fn cookie_challenge_rejects_malformed_challenge_data() {
    // Not a valid "<context> <id> <challenge>" triple once hex-decoded.
    let hex = hex_encode(b"justtwo fields");
    assert!(answer_cookie_challenge(&hex).is_err());
}

#[test]
fn cookie_challenge_rejects_missing_keyring_file() {
    let hex = hex_encode(b"org_example_testcontext 1 serverchallenge");
    let err = answer_cookie_challenge(&hex).unwrap_err();
    assert!(matches!(err, Error::AuthFailed(_)));
}
