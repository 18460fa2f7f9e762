//! End-to-end sniff path the generic TCP entrypoint relies on: tell a raw
//! TLS ClientHello apart from a PostgreSQL `SSLRequest` preamble and from
//! plain, unroutable bytes, using only what a `peek`/buffered read would see.

use devproxy::protocol::{is_postgres_ssl_request, parse_client_hello_sni};

fn client_hello_with_sni(host: &str) -> Vec<u8> {
    let mut server_name_entry = Vec::new();
    server_name_entry.push(0x00);
    server_name_entry.extend_from_slice(&(host.len() as u16).to_be_bytes());
    server_name_entry.extend_from_slice(host.as_bytes());

    let mut server_name_list = Vec::new();
    server_name_list.extend_from_slice(&(server_name_entry.len() as u16).to_be_bytes());
    server_name_list.extend_from_slice(&server_name_entry);

    let mut sni_extension = Vec::new();
    sni_extension.extend_from_slice(&0x0000u16.to_be_bytes());
    sni_extension.extend_from_slice(&(server_name_list.len() as u16).to_be_bytes());
    sni_extension.extend_from_slice(&server_name_list);

    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0u8; 32]);
    body.push(0);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.push(1);
    body.push(0);
    body.extend_from_slice(&(sni_extension.len() as u16).to_be_bytes());
    body.extend_from_slice(&sni_extension);

    let mut handshake = Vec::new();
    handshake.push(0x01);
    let len = body.len() as u32;
    handshake.extend_from_slice(&len.to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = Vec::new();
    record.push(0x16);
    record.extend_from_slice(&[0x03, 0x03]);
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);

    record
}

fn postgres_ssl_request_preamble() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&8u32.to_be_bytes());
    buf.extend_from_slice(&80_877_103u32.to_be_bytes());
    buf
}

#[test]
fn test_plain_tls_connection_yields_sni_without_postgres_preamble() {
    let data = client_hello_with_sni("db.localhost");
    assert!(!is_postgres_ssl_request(&data));
    assert_eq!(parse_client_hello_sni(&data), Some("db.localhost".to_string()));
}

#[test]
fn test_postgres_ssl_request_then_clienthello_is_sniffed_after_stripping_preamble() {
    let mut buf = postgres_ssl_request_preamble();
    assert!(is_postgres_ssl_request(&buf));

    // The entrypoint acks the SSLRequest and drops it from the buffer before
    // sniffing continues, so the ClientHello that follows sniffs clean.
    buf.clear();
    buf.extend_from_slice(&client_hello_with_sni("db.localhost"));
    assert_eq!(parse_client_hello_sni(&buf), Some("db.localhost".to_string()));
}

#[test]
fn test_plain_postgres_without_tls_has_no_sni_and_no_route() {
    // A libpq client that never sends SSLRequest opens with its startup
    // packet instead; neither sniffer recognizes it, so the connection is
    // dropped by the entrypoint rather than misrouted.
    let startup_packet = [0x00, 0x00, 0x00, 0x08, 0x04, 0xd2, 0x16, 0x2f];
    assert!(!is_postgres_ssl_request(&startup_packet));
    assert_eq!(parse_client_hello_sni(&startup_packet), None);
}
