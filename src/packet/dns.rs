//! Just enough DNS wire-format parsing to pull the first question out of
//! a query message. Responses and malformed messages are rejected, not
//! reported.

use std::fmt;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: u8 = 63;

/// Numeric QTYPE with its textual spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordType(pub u16);

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            1 => "A",
            2 => "NS",
            5 => "CNAME",
            6 => "SOA",
            12 => "PTR",
            13 => "HINFO",
            15 => "MX",
            16 => "TXT",
            17 => "RP",
            18 => "AFSDB",
            24 => "SIG",
            25 => "KEY",
            28 => "AAAA",
            29 => "LOC",
            33 => "SRV",
            35 => "NAPTR",
            36 => "KX",
            37 => "CERT",
            39 => "DNAME",
            41 => "OPT",
            43 => "DS",
            44 => "SSHFP",
            45 => "IPSECKEY",
            46 => "RRSIG",
            47 => "NSEC",
            48 => "DNSKEY",
            49 => "DHCID",
            50 => "NSEC3",
            51 => "NSEC3PARAM",
            52 => "TLSA",
            53 => "SMIMEA",
            55 => "HIP",
            59 => "CDS",
            60 => "CDNSKEY",
            61 => "OPENPGPKEY",
            64 => "SVCB",
            65 => "HTTPS",
            99 => "SPF",
            108 => "EUI48",
            109 => "EUI64",
            249 => "TKEY",
            250 => "TSIG",
            251 => "IXFR",
            252 => "AXFR",
            255 => "ANY",
            256 => "URI",
            257 => "CAA",
            // RFC 3597 spelling for everything else
            n => return write!(f, "TYPE{n}"),
        };
        f.write_str(name)
    }
}

/// First question of a DNS query message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub fqdn: String,
    pub record_type: RecordType,
}

/// Parse the first question out of a DNS message. Returns None unless
/// the message is a query (QR clear) carrying at least one question
/// whose name decodes cleanly.
pub fn parse_question(message: &[u8]) -> Option<Question> {
    if message.len() < HEADER_LEN {
        return None;
    }

    let flags = u16::from_be_bytes([message[2], message[3]]);
    if flags & 0x8000 != 0 {
        // response
        return None;
    }
    let qdcount = u16::from_be_bytes([message[4], message[5]]);
    if qdcount == 0 {
        return None;
    }

    let mut labels = Vec::new();
    let mut offset = HEADER_LEN;
    loop {
        let len = *message.get(offset)?;
        if len == 0 {
            offset += 1;
            break;
        }
        // compression pointers never appear in a question name
        if len > MAX_LABEL_LEN {
            return None;
        }
        let label = message.get(offset + 1..offset + 1 + len as usize)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        offset += 1 + len as usize;
    }

    let qtype = message.get(offset..offset + 2)?;
    message.get(offset + 2..offset + 4)?; // qclass must be present
    Some(Question {
        fqdn: labels.join("."),
        record_type: RecordType(u16::from_be_bytes([qtype[0], qtype[1]])),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // id, flags, qdcount 1, zero counts, then the question
    fn query_message(name_wire: &[u8], qtype: u16) -> Vec<u8> {
        let mut message = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        message.extend_from_slice(name_wire);
        message.extend_from_slice(&qtype.to_be_bytes());
        message.extend_from_slice(&1u16.to_be_bytes()); // IN
        message
    }

    const EXAMPLE_COM: &[u8] = b"\x07example\x03com\x00";

    #[test]
    fn parses_first_question() {
        let message = query_message(EXAMPLE_COM, 1);
        let question = parse_question(&message).expect("question");
        assert_eq!(question.fqdn, "example.com");
        assert_eq!(question.record_type, RecordType(1));
        assert_eq!(question.record_type.to_string(), "A");
    }

    #[test]
    fn rejects_responses() {
        let mut message = query_message(EXAMPLE_COM, 1);
        message[2] |= 0x80;
        assert_eq!(parse_question(&message), None);
    }

    #[test]
    fn rejects_zero_questions() {
        let mut message = query_message(EXAMPLE_COM, 1);
        message[5] = 0;
        assert_eq!(parse_question(&message), None);
    }

    #[test]
    fn rejects_truncated_question() {
        let message = query_message(EXAMPLE_COM, 1);
        assert_eq!(parse_question(&message[..message.len() - 3]), None);
    }

    #[test]
    fn rejects_compressed_names() {
        let message = query_message(&[0xc0, 0x0c], 1);
        assert_eq!(parse_question(&message), None);
    }

    #[test]
    fn allows_the_root_name() {
        let message = query_message(b"\x00", 2);
        let question = parse_question(&message).expect("question");
        assert_eq!(question.fqdn, "");
        assert_eq!(question.record_type.to_string(), "NS");
    }

    #[test]
    fn spells_unknown_types_per_rfc3597() {
        assert_eq!(RecordType(28).to_string(), "AAAA");
        assert_eq!(RecordType(257).to_string(), "CAA");
        assert_eq!(RecordType(1234).to_string(), "TYPE1234");
    }
}
