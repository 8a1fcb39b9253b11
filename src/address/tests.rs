use super::*;

#[test]
fn parses_unix_path() {
    let addrs = parse_addresses("unix:path=/run/dbus/system_bus_socket").unwrap();
    assert_eq!(addrs, vec![Address::UnixPath("/run/dbus/system_bus_socket".into())]);
}

#[test]
fn parses_unix_abstract() {
    let addrs = parse_addresses("unix:abstract=/tmp/dbus-xyz").unwrap();
    assert_eq!(addrs, vec![Address::UnixAbstract("/tmp/dbus-xyz".into())]);
}

#[test]
fn parses_tcp() {
    let addrs = parse_addresses("tcp:host=127.0.0.1,port=1234").unwrap();
    assert_eq!(
        addrs,
        vec![Address::Tcp { host: "127.0.0.1".into(), port: 1234 }]
    );
}

#[test]
fn parses_fallback_list() {
    let addrs = parse_addresses("unix:path=/a;unix:path=/b").unwrap();
    assert_eq!(addrs.len(), 2);
}

#[test]
fn unescapes_percent_sequences() {
    let addrs = parse_addresses("unix:path=/tmp/has%20space").unwrap();
    assert_eq!(addrs, vec![Address::UnixPath("/tmp/has space".into())]);
}

#[test]
fn rejects_missing_transport_separator() {
    assert!(parse_addresses("garbage").is_err());
}

#[test]
fn rejects_unsupported_transport() {
    assert!(parse_addresses("launchd:env=DBUS_LAUNCHD_SESSION_BUS_SOCKET").is_err());
}

#[test]
fn rejects_unix_without_path_or_abstract() {
    assert!(parse_addresses("unix:guid=deadbeef").is_err());
}

#[test]
fn system_bus_address_is_the_well_known_path() {
    assert_eq!(
        system_bus_address(),
        vec![Address::UnixPath("/var/run/dbus/system_bus_socket".into())]
    );
}
