//! TLS ClientHello SNI extraction
//!
//! A minimal parser for the `server_name` extension (RFC 6066) used by the
//! generic TCP entrypoint to route connections before TLS is terminated,
//! without performing a handshake. A ClientHello large enough to carry many
//! SANs, a long session ticket, or a large key share can be split by the
//! client across several TLS records; [`reassemble_handshake`] concatenates
//! consecutive handshake-content-type records before the rest of this parser
//! ever sees them.

/// Extract the SNI hostname from a buffered TLS ClientHello.
///
/// Returns `None` if `data` does not contain a complete, well-formed
/// ClientHello record with a `server_name` extension. Callers should treat
/// `None` as "keep buffering" until the sniff deadline elapses, at which
/// point the connection has no identifiable host.
pub fn parse_client_hello_sni(data: &[u8]) -> Option<String> {
    let handshake = reassemble_handshake(data)?;
    let mut r = Reader::new(&handshake);

    // Handshake header: msg_type(1) length(3)
    if r.u8()? != 0x01 {
        return None; // not a ClientHello
    }
    let hs_len = r.u24()?;
    let body = r.take(hs_len)?;
    let mut r = Reader::new(body);

    r.skip(2)?; // client_version
    r.skip(32)?; // random

    let session_id_len = r.u8()? as usize;
    r.skip(session_id_len)?;

    let cipher_suites_len = r.u16()? as usize;
    r.skip(cipher_suites_len)?;

    let compression_len = r.u8()? as usize;
    r.skip(compression_len)?;

    if r.remaining() == 0 {
        return None; // no extensions, no SNI
    }

    let extensions_len = r.u16()? as usize;
    let mut ext = Reader::new(r.take(extensions_len)?);

    while ext.remaining() >= 4 {
        let ext_type = ext.u16()?;
        let ext_len = ext.u16()? as usize;
        let ext_data = ext.take(ext_len)?;

        if ext_type == 0x0000 {
            return parse_server_name_extension(ext_data);
        }
    }

    None
}

/// Concatenate the payloads of consecutive TLS handshake-content-type
/// records (type `0x16`) into one contiguous handshake message, stopping as
/// soon as enough bytes have accumulated to satisfy the ClientHello's own
/// declared length. Returns `None` if `data` runs out before that point, or
/// if any record isn't a handshake record.
fn reassemble_handshake(data: &[u8]) -> Option<Vec<u8>> {
    let mut r = Reader::new(data);
    let mut handshake = Vec::new();
    let mut needed: Option<usize> = None;

    loop {
        if r.remaining() < 5 {
            return None;
        }

        // TLS record header: type(1) version(2) length(2)
        if r.u8()? != 0x16 {
            return None;
        }
        r.skip(2)?;
        let record_len = r.u16()? as usize;
        let record = r.take(record_len)?;
        handshake.extend_from_slice(record);

        if needed.is_none() && handshake.len() >= 4 {
            if handshake[0] != 0x01 {
                return None; // not a ClientHello
            }
            let hs_len = ((handshake[1] as usize) << 16) | ((handshake[2] as usize) << 8) | (handshake[3] as usize);
            needed = Some(4 + hs_len);
        }

        if let Some(needed) = needed {
            if handshake.len() >= needed {
                handshake.truncate(needed);
                return Some(handshake);
            }
        }
    }
}

fn parse_server_name_extension(data: &[u8]) -> Option<String> {
    let mut r = Reader::new(data);
    let list_len = r.u16()? as usize;
    let mut list = Reader::new(r.take(list_len)?);

    while list.remaining() >= 3 {
        let name_type = list.u8()?;
        let name_len = list.u16()? as usize;
        let name = list.take(name_len)?;

        if name_type == 0x00 {
            return std::str::from_utf8(name).ok().map(|s| s.to_string());
        }
    }

    None
}

/// Small cursor over a byte slice, returning `None` on any short read
/// instead of panicking, since ClientHello data always arrives truncated
/// until the sniff buffer is full.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(((bytes[0] as u16) << 8) | (bytes[1] as u16))
    }

    fn u24(&mut self) -> Option<usize> {
        let bytes = self.take(3)?;
        Some(((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize))
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }
}
