#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod harness;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use nextroute_backend::config;
use nextroute_backend::context::DirectoryData;

use harness::*;

fn key(byte: u8) -> String {
    STANDARD.encode([byte; 32])
}

fn buyer_key() -> String {
    STANDARD.encode(buyer_signing_key().verifying_key().to_bytes())
}

fn keys_section() -> String {
    format!(
        "keys:\n  backend_private_key: \"{}\"\n  routing_private_key: \"{}\"\n  ping_key: \"{}\"\n",
        key(1),
        key(2),
        key(3)
    )
}

#[test]
fn ok_minimal_config() {
    let ok = format!("version: 1\n{}", keys_section());
    let cfg = config::load_from_str(&ok).expect("must parse");

    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.backend.route_matrix_stale_secs, 30);
    assert_eq!(cfg.backend.max_near_relays, 16);
    assert_eq!(cfg.backend.min_sdk_version().unwrap().to_string(), "5.0.0");
    assert_eq!(cfg.topology.path, "route_matrix.json");
    assert_eq!(cfg.backend.public_addr().unwrap().to_string(), "127.0.0.1:40000");
    assert!(cfg.location.is_none());
    assert!(cfg.buyers.is_empty());
}

#[test]
fn ok_full_config() {
    let ok = format!(
        r#"
version: 1
backend:
  listen: "127.0.0.1:40000"
  ops_listen: "127.0.0.1:8081"
  route_matrix_stale_secs: 60
  minimum_sdk_version: "5.2.1"
{keys}
topology:
  path: "/var/lib/nextroute/route_matrix.json"
  refresh_secs: 5
location:
  latitude: 40.7
  longitude: -74.0
datacenters:
  - id: 9
    name: "test.dc"
buyers:
  - id: 1311768467463790320
    name: "acme"
    public_key: "{buyer}"
    opt_out_tag: 777
    datacenters: [9]
    route_shader:
      acceptable_latency: 25
      multipath: true
    internal:
      large_customer: true
"#,
        keys = keys_section(),
        buyer = buyer_key()
    );
    let cfg = config::load_from_str(&ok).expect("must parse");

    assert_eq!(cfg.backend.route_matrix_stale_secs, 60);
    assert_eq!(cfg.topology.refresh_secs, 5);
    let buyer = &cfg.buyers[0];
    assert_eq!(buyer.opt_out_tag, Some(777));
    assert_eq!(buyer.route_shader.acceptable_latency, 25);
    assert!(buyer.route_shader.multipath);
    assert!(buyer.route_shader.reduce_latency);
    assert!(buyer.internal.large_customer);
    assert_eq!(buyer.internal.route_switch_threshold, 5);

    let directory = DirectoryData::from_config(&cfg).unwrap();
    assert_eq!(directory.buyer_count(), 1);
    assert_eq!(directory.datacenter_count(), 1);
}

#[test]
fn deny_unknown_fields_nested() {
    let bad = format!(
        r#"
version: 1
{keys}
buyers:
  - id: 1
    public_key: "{buyer}"
    route_shadr: {{ multipath: true }} # typo should fail
"#,
        keys = keys_section(),
        buyer = buyer_key()
    );

    let err = config::load_from_str(&bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}

#[test]
fn missing_keys_fail() {
    let err = config::load_from_str("version: 1\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}

#[test]
fn unsupported_version_fails() {
    let bad = format!("version: 2\n{}", keys_section());
    let err = config::load_from_str(&bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn out_of_range_values_fail() {
    for backend in [
        "backend:\n  max_near_relays: 0\n",
        "backend:\n  route_matrix_stale_secs: 0\n",
        "backend:\n  listen: \"not an address\"\n",
        "backend:\n  minimum_sdk_version: \"five\"\n",
        "backend:\n  public_address: \"0.0.0.0:40000\"\n",
        "backend:\n  public_address: \"[::]:40000\"\n",
        "backend:\n  public_address: \"203.0.113.9:0\"\n",
    ] {
        let bad = format!("version: 1\n{backend}{}", keys_section());
        let err = config::load_from_str(&bad).expect_err(backend);
        assert_eq!(err.code().as_str(), "BAD_REQUEST", "{backend}");
    }
}

#[test]
fn short_keys_fail() {
    let bad = format!(
        "version: 1\nkeys:\n  backend_private_key: \"{}\"\n  routing_private_key: \"{}\"\n  ping_key: \"{}\"\n",
        STANDARD.encode([1u8; 16]),
        key(2),
        key(3)
    );
    let err = config::load_from_str(&bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}

#[test]
fn duplicate_buyers_fail() {
    let bad = format!(
        "version: 1\n{}buyers:\n  - id: 1\n    public_key: \"{b}\"\n  - id: 1\n    public_key: \"{b}\"\n",
        keys_section(),
        b = buyer_key()
    );
    let err = config::load_from_str(&bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}

#[test]
fn selection_percent_above_hundred_fails() {
    let bad = format!(
        "version: 1\n{}buyers:\n  - id: 1\n    public_key: \"{}\"\n    route_shader:\n      selection_percent: 101\n",
        keys_section(),
        buyer_key()
    );
    let err = config::load_from_str(&bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}
