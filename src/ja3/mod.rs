//! JA3 fingerprints for observed TLS ClientHello packets.
//!
//! The canonical JA3 string is
//! `Version,Ciphers,Extensions,EllipticCurves,EllipticCurvePointFormats`
//! with each field a `-`-joined list of decimal integers in wire order
//! and GREASE values removed; the fingerprint is its lowercase hex MD5.

use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use std::net::IpAddr;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;

/// A TLS ClientHello observation tied to its flow endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsObservation {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub ja3: String,
}

/// Decode an Ethernet frame into a TLS observation. Anything that is not
/// a TCP segment starting a ClientHello yields None.
pub fn observe(frame: &[u8]) -> Option<TlsObservation> {
    let sliced = SlicedPacket::from_ethernet(frame).ok()?;

    let (src_ip, dst_ip) = match &sliced.ip {
        Some(InternetSlice::Ipv4(header, _)) => (
            IpAddr::V4(header.source_addr()),
            IpAddr::V4(header.destination_addr()),
        ),
        Some(InternetSlice::Ipv6(header, _)) => (
            IpAddr::V6(header.source_addr()),
            IpAddr::V6(header.destination_addr()),
        ),
        None => return None,
    };
    let tcp = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return None,
    };

    Some(TlsObservation {
        src_ip,
        dst_ip,
        src_port: tcp.source_port(),
        dst_port: tcp.destination_port(),
        ja3: digest_payload(sliced.payload)?,
    })
}

/// JA3 hash for a frame, or None when it carries no ClientHello.
pub fn digest(frame: &[u8]) -> Option<String> {
    observe(frame).map(|observation| observation.ja3)
}

fn digest_payload(payload: &[u8]) -> Option<String> {
    let ja3 = client_hello_string(payload)?;
    Some(format!("{:x}", md5::compute(ja3.as_bytes())))
}

// GREASE values have the form (i << 8) | i with a low nibble of 0xA.
fn is_grease(value: u16) -> bool {
    (value >> 8) == (value & 0xff) && (value & 0x0f) == 0x0a
}

fn client_hello_string(payload: &[u8]) -> Option<String> {
    let mut record = Reader::new(payload);
    if record.u8()? != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    record.skip(2)?; // record-layer version
    let record_len = record.u16()? as usize;

    let mut handshake = Reader::new(record.take(record_len)?);
    if handshake.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    let hello_len = handshake.u24()? as usize;
    let mut hello = Reader::new(handshake.take(hello_len)?);

    let version = hello.u16()?;
    hello.skip(32)?; // client random
    let session_id_len = hello.u8()? as usize;
    hello.skip(session_id_len)?;

    let cipher_len = hello.u16()? as usize;
    let mut ciphers = Vec::new();
    let mut cipher_list = Reader::new(hello.take(cipher_len)?);
    while let Some(cipher) = cipher_list.u16() {
        if !is_grease(cipher) {
            ciphers.push(cipher);
        }
    }

    let compression_len = hello.u8()? as usize;
    hello.skip(compression_len)?;

    let mut extensions = Vec::new();
    let mut curves = Vec::new();
    let mut formats = Vec::new();
    if !hello.is_empty() {
        let extensions_len = hello.u16()? as usize;
        let mut extension_list = Reader::new(hello.take(extensions_len)?);
        while !extension_list.is_empty() {
            let ext_type = extension_list.u16()?;
            let ext_len = extension_list.u16()? as usize;
            let ext_data = extension_list.take(ext_len)?;
            if !is_grease(ext_type) {
                extensions.push(ext_type);
            }
            match ext_type {
                EXT_SUPPORTED_GROUPS => {
                    let mut data = Reader::new(ext_data);
                    let list_len = data.u16()? as usize;
                    let mut list = Reader::new(data.take(list_len)?);
                    while let Some(curve) = list.u16() {
                        if !is_grease(curve) {
                            curves.push(curve);
                        }
                    }
                }
                EXT_EC_POINT_FORMATS => {
                    let mut data = Reader::new(ext_data);
                    let list_len = data.u8()? as usize;
                    for format in data.take(list_len)? {
                        formats.push(u16::from(*format));
                    }
                }
                _ => {}
            }
        }
    }

    Some(format!(
        "{},{},{},{},{}",
        version,
        join(&ciphers),
        join(&extensions),
        join(&curves),
        join(&formats)
    ))
}

fn join(values: &[u16]) -> String {
    values
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join("-")
}

// Bounds-checked cursor over the ClientHello bytes.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn u8(&mut self) -> Option<u8> {
        let value = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(value)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u24(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 3)?;
        self.pos += 3;
        Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(())
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 10.0.14.129:49206 -> 185.174.175.14:443, a ClientHello whose JA3
    // string is 771,60-47-61-53-5-10-49191-49171-49172-49195-49187-
    // 49196-49188-49161-49162-64-50-106-56-19-4,65281-0-10-11-13,
    // 23-24,0
    const CLIENT_HELLO_FRAME: &[u8] = &[
        0x00, 0x02, 0x16, 0x47, 0x96, 0xef, 0x00, 0x1a, 0x92, 0x06, 0x5c, 0x7b, 0x08, 0x00, 0x45,
        0x00, 0x00, 0xc6, 0x07, 0xf5, 0x40, 0x00, 0x80, 0x06, 0x70, 0xff, 0x0a, 0x00, 0x0e, 0x81,
        0xb9, 0xae, 0xaf, 0x0e, 0xc0, 0x36, 0x01, 0xbb, 0x7f, 0x3b, 0x3a, 0xfb, 0x08, 0x15, 0x2d,
        0x28, 0x50, 0x18, 0xfa, 0xf0, 0x68, 0xf2, 0x00, 0x00, 0x16, 0x03, 0x03, 0x00, 0x99, 0x01,
        0x00, 0x00, 0x95, 0x03, 0x03, 0x5a, 0xf4, 0xfb, 0x77, 0x95, 0x5f, 0x4f, 0xfb, 0x01, 0x23,
        0xb7, 0x4f, 0x0e, 0xa4, 0x9b, 0x26, 0xb8, 0xf4, 0x07, 0xa9, 0x9a, 0x98, 0xd3, 0x40, 0xa0,
        0x25, 0x16, 0xbe, 0x06, 0x43, 0xb0, 0xb8, 0x00, 0x00, 0x2a, 0x00, 0x3c, 0x00, 0x2f, 0x00,
        0x3d, 0x00, 0x35, 0x00, 0x05, 0x00, 0x0a, 0xc0, 0x27, 0xc0, 0x13, 0xc0, 0x14, 0xc0, 0x2b,
        0xc0, 0x23, 0xc0, 0x2c, 0xc0, 0x24, 0xc0, 0x09, 0xc0, 0x0a, 0x00, 0x40, 0x00, 0x32, 0x00,
        0x6a, 0x00, 0x38, 0x00, 0x13, 0x00, 0x04, 0x01, 0x00, 0x00, 0x42, 0xff, 0x01, 0x00, 0x01,
        0x00, 0x00, 0x00, 0x00, 0x15, 0x00, 0x13, 0x00, 0x00, 0x10, 0x72, 0x6f, 0x62, 0x77, 0x61,
        0x73, 0x73, 0x6f, 0x74, 0x64, 0x69, 0x6e, 0x74, 0x2e, 0x72, 0x75, 0x00, 0x0a, 0x00, 0x06,
        0x00, 0x04, 0x00, 0x17, 0x00, 0x18, 0x00, 0x0b, 0x00, 0x02, 0x01, 0x00, 0x00, 0x0d, 0x00,
        0x10, 0x00, 0x0e, 0x04, 0x01, 0x05, 0x01, 0x02, 0x01, 0x04, 0x03, 0x05, 0x03, 0x02, 0x03,
        0x02, 0x02,
    ];

    #[test]
    fn fingerprints_a_known_client_hello() {
        assert_eq!(
            digest(CLIENT_HELLO_FRAME).as_deref(),
            Some("4d7a28d6f2263ed61de88ca66eb011e3")
        );
    }

    #[test]
    fn observation_carries_the_flow_endpoints() {
        let observation = observe(CLIENT_HELLO_FRAME).expect("observation");
        assert_eq!(observation.src_ip, "10.0.14.129".parse::<IpAddr>().unwrap());
        assert_eq!(observation.dst_ip, "185.174.175.14".parse::<IpAddr>().unwrap());
        assert_eq!(observation.src_port, 49206);
        assert_eq!(observation.dst_port, 443);
    }

    #[test]
    fn identical_hellos_hash_identically() {
        assert_eq!(digest(CLIENT_HELLO_FRAME), digest(CLIENT_HELLO_FRAME));
    }

    #[test]
    fn non_client_hello_yields_nothing() {
        // application data instead of a handshake record
        let mut frame = CLIENT_HELLO_FRAME.to_vec();
        frame[54] = 0x17;
        assert_eq!(digest(&frame), None);
    }

    fn synthetic_hello(ciphers: &[u16], extensions: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut hello = Vec::new();
        hello.extend_from_slice(&0x0303u16.to_be_bytes());
        hello.extend_from_slice(&[0u8; 32]);
        hello.push(0); // no session id
        hello.extend_from_slice(&((ciphers.len() * 2) as u16).to_be_bytes());
        for cipher in ciphers {
            hello.extend_from_slice(&cipher.to_be_bytes());
        }
        hello.extend_from_slice(&[1, 0]); // null compression
        let mut ext_bytes = Vec::new();
        for (ext_type, data) in extensions {
            ext_bytes.extend_from_slice(&ext_type.to_be_bytes());
            ext_bytes.extend_from_slice(&(data.len() as u16).to_be_bytes());
            ext_bytes.extend_from_slice(data);
        }
        hello.extend_from_slice(&(ext_bytes.len() as u16).to_be_bytes());
        hello.extend_from_slice(&ext_bytes);

        let mut payload = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x03];
        payload.extend_from_slice(&((hello.len() + 4) as u16).to_be_bytes());
        payload.push(HANDSHAKE_CLIENT_HELLO);
        payload.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        payload.extend_from_slice(&hello);
        payload
    }

    #[test]
    fn grease_values_are_excluded_from_every_list() {
        let mut curve_data = 4u16.to_be_bytes().to_vec();
        curve_data.extend_from_slice(&0x3a3au16.to_be_bytes());
        curve_data.extend_from_slice(&23u16.to_be_bytes());
        let payload = synthetic_hello(
            &[0x0a0a, 0x002f, 0xfafa],
            &[(0x2a2a, Vec::new()), (EXT_SUPPORTED_GROUPS, curve_data)],
        );
        assert_eq!(
            client_hello_string(&payload).as_deref(),
            Some("771,47,10,23,")
        );
    }

    #[test]
    fn absent_fields_render_empty() {
        let payload = synthetic_hello(&[0x002f], &[]);
        assert_eq!(client_hello_string(&payload).as_deref(), Some("771,47,,,"));
    }

    #[test]
    fn truncated_hellos_are_rejected() {
        let payload = synthetic_hello(&[0x002f], &[]);
        assert_eq!(client_hello_string(&payload[..payload.len() - 4]), None);
    }
}
