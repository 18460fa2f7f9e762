//! PostgreSQL wire-protocol `SSLRequest` detection
//!
//! The generic TCP entrypoint sniffs for this preamble so a single listening
//! port can multiplex TLS, plain PostgreSQL, and PostgreSQL-over-TLS clients
//! without each backend needing its own entrypoint.

/// The fixed `SSLRequest` code, a magic number PostgreSQL libpq sends as the
/// protocol version field before any TLS handshake.
const SSL_REQUEST_CODE: u32 = 80_877_103;

/// The exact length of the `SSLRequest` preamble: a 4-byte length field of
/// value 8, followed by the 4-byte request code.
const SSL_REQUEST_LEN: usize = 8;

/// Check whether `data` opens with a PostgreSQL `SSLRequest` preamble.
pub fn is_postgres_ssl_request(data: &[u8]) -> bool {
    if data.len() < SSL_REQUEST_LEN {
        return false;
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let code = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    length as usize == SSL_REQUEST_LEN && code == SSL_REQUEST_CODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_ssl_request() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
        assert!(is_postgres_ssl_request(&buf));
    }

    #[test]
    fn test_rejects_tls_client_hello() {
        let data = [0x16, 0x03, 0x03, 0x00, 0x31, 0x01, 0x00, 0x00];
        assert!(!is_postgres_ssl_request(&data));
    }

    #[test]
    fn test_rejects_short_data() {
        assert!(!is_postgres_ssl_request(&[0, 0, 0]));
    }
}
