//! mDNS packet encoding and answer matching.

use crate::error::ResolveError;
use simple_dns::rdata::RData;
use simple_dns::{Name, Packet, Question, CLASS, TYPE};
use std::net::Ipv4Addr;
use tracing::trace;

/// Encode a standard query with one `A` question for `hostname`.
pub fn encode_query(hostname: &str) -> Result<Vec<u8>, ResolveError> {
    let name = Name::new(hostname).map_err(|e| ResolveError::InvalidHostname {
        hostname: hostname.to_string(),
        reason: e.to_string(),
    })?;

    let mut packet = Packet::new_query(0);
    packet
        .questions
        .push(Question::new(name, TYPE::A.into(), CLASS::IN.into(), false));
    packet
        .build_bytes_vec()
        .map_err(|e| ResolveError::Packet(e.to_string()))
}

/// Find an `A` answer for `hostname` in a received datagram.
///
/// Undecodable datagrams and datagrams without a matching answer yield
/// `None`. Names compare case-insensitively, ignoring a trailing root dot.
pub fn match_answer(datagram: &[u8], hostname: &str) -> Option<Ipv4Addr> {
    let packet = match Packet::parse(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            trace!(error = %e, len = datagram.len(), "Ignoring undecodable mDNS datagram");
            return None;
        }
    };

    let wanted = hostname.trim_end_matches('.');
    packet.answers.iter().find_map(|record| {
        let name = record.name.to_string();
        if !name.trim_end_matches('.').eq_ignore_ascii_case(wanted) {
            return None;
        }
        match &record.rdata {
            RData::A(a) => Some(Ipv4Addr::from(a.address)),
            _ => None,
        }
    })
}

/// Encode a reply carrying one `A` answer. Used to simulate responders.
#[cfg(test)]
pub(crate) fn encode_answer(hostname: &str, address: Ipv4Addr) -> Vec<u8> {
    use simple_dns::rdata::A;
    use simple_dns::ResourceRecord;

    let mut packet = Packet::new_reply(0);
    packet.answers.push(ResourceRecord::new(
        Name::new_unchecked(hostname),
        CLASS::IN,
        120,
        RData::A(A {
            address: u32::from(address),
        }),
    ));
    packet.build_bytes_vec().expect("encode answer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_dns::rdata::TXT;
    use simple_dns::ResourceRecord;

    #[test]
    fn test_query_has_one_a_question() {
        let bytes = encode_query("printer.local").unwrap();
        let packet = Packet::parse(&bytes).unwrap();

        assert_eq!(packet.questions.len(), 1);
        assert!(packet.answers.is_empty());
        let question = &packet.questions[0];
        assert_eq!(question.qname.to_string().trim_end_matches('.'), "printer.local");
        assert_eq!(question.qtype, TYPE::A.into());
    }

    #[test]
    fn test_matching_answer() {
        let bytes = encode_answer("printer.local", Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(
            match_answer(&bytes, "printer.local"),
            Some(Ipv4Addr::new(192, 168, 1, 20))
        );
        assert_eq!(
            match_answer(&bytes, "Printer.Local"),
            Some(Ipv4Addr::new(192, 168, 1, 20))
        );
    }

    #[test]
    fn test_answer_for_other_host_ignored() {
        let bytes = encode_answer("scanner.local", Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(match_answer(&bytes, "printer.local"), None);
    }

    #[test]
    fn test_non_a_record_ignored() {
        let mut packet = Packet::new_reply(0);
        packet.answers.push(ResourceRecord::new(
            Name::new_unchecked("printer.local"),
            CLASS::IN,
            120,
            RData::TXT(TXT::new()),
        ));
        let bytes = packet.build_bytes_vec().unwrap();
        assert_eq!(match_answer(&bytes, "printer.local"), None);
    }

    #[test]
    fn test_garbage_ignored() {
        assert_eq!(match_answer(&[0xde, 0xad, 0xbe, 0xef], "printer.local"), None);
        assert_eq!(match_answer(&[], "printer.local"), None);
    }

    #[test]
    fn test_query_itself_is_not_an_answer() {
        let bytes = encode_query("printer.local").unwrap();
        assert_eq!(match_answer(&bytes, "printer.local"), None);
    }
}
