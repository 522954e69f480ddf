//! SNMP delivery channel: encode an SNMPv1 TRAP PDU and fire it at a
//! trap receiver over UDP.
//!
//! No crate in this workspace's dependency stack speaks SNMP, so the
//! handful of BER/ASN.1 this needs is encoded by hand below rather than
//! pulled in as a new, unvetted dependency.

use std::net::Ipv4Addr;
use std::time::Duration;

use pulsegrid_core::DeliveryOutcome;
use tokio::net::UdpSocket;

const SNMP_VERSION_V1: i64 = 0;
/// genericTrap value for `enterpriseSpecific`; every PulseGrid alert is
/// reported this way and distinguished by `specific_trap` instead.
const GENERIC_TRAP_ENTERPRISE_SPECIFIC: i64 = 6;
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

// --- minimal BER encoding -------------------------------------------------

fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let significant: Vec<u8> = bytes.into_iter().skip_while(|b| *b == 0).collect();
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(&significant);
}

fn encode_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    encode_length(out, content.len());
    out.extend_from_slice(content);
}

fn encode_integer(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 && bytes[0] == 0x00 && bytes[1] & 0x80 == 0 {
        bytes.remove(0);
    }
    while bytes.len() > 1 && bytes[0] == 0xff && bytes[1] & 0x80 != 0 {
        bytes.remove(0);
    }
    bytes
}

fn tag_integer(out: &mut Vec<u8>, value: i64) {
    encode_tlv(out, 0x02, &encode_integer(value));
}

fn tag_octet_string(out: &mut Vec<u8>, value: &[u8]) {
    encode_tlv(out, 0x04, value);
}

fn tag_ip_address(out: &mut Vec<u8>, addr: Ipv4Addr) {
    encode_tlv(out, 0x40, &addr.octets());
}

fn tag_timeticks(out: &mut Vec<u8>, ticks: u32) {
    encode_tlv(out, 0x43, &encode_integer(i64::from(ticks)));
}

fn encode_oid(dotted: &str) -> Result<Vec<u8>, String> {
    let parts: Vec<u64> = dotted
        .split('.')
        .map(|p| p.parse::<u64>().map_err(|_| format!("invalid OID segment: {p}")))
        .collect::<Result<_, _>>()?;
    if parts.len() < 2 {
        return Err("OID needs at least two arcs".to_owned());
    }
    let mut body = vec![(parts[0] * 40 + parts[1]) as u8];
    for &arc in &parts[2..] {
        let mut chunk = vec![(arc & 0x7f) as u8];
        let mut remaining = arc >> 7;
        while remaining > 0 {
            chunk.push(((remaining & 0x7f) as u8) | 0x80);
            remaining >>= 7;
        }
        chunk.reverse();
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn tag_oid(out: &mut Vec<u8>, dotted: &str) -> Result<(), String> {
    let body = encode_oid(dotted)?;
    encode_tlv(out, 0x06, &body);
    Ok(())
}

fn sequence(inner: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_tlv(&mut out, 0x30, inner);
    out
}

/// One varbind to attach to the trap: an OID suffixed onto `oid_prefix`
/// paired with its value.
pub enum VarBindValue {
    String(String),
    Integer(i64),
}

pub struct VarBind {
    pub oid_suffix: &'static str,
    pub value: VarBindValue,
}

fn encode_varbind(oid_prefix: &str, bind: &VarBind) -> Result<Vec<u8>, String> {
    let mut name = Vec::new();
    tag_oid(&mut name, &format!("{oid_prefix}.{}", bind.oid_suffix))?;
    let mut value = Vec::new();
    match &bind.value {
        VarBindValue::String(s) => tag_octet_string(&mut value, s.as_bytes()),
        VarBindValue::Integer(i) => tag_integer(&mut value, *i),
    }
    let mut pair = name;
    pair.extend_from_slice(&value);
    Ok(sequence(&pair))
}

/// Build the full SNMPv1 TRAP message ready to write to a socket.
fn build_trap(
    community: &str,
    oid_prefix: &str,
    specific_trap: i64,
    uptime_ticks: u32,
    varbinds: &[VarBind],
) -> Result<Vec<u8>, String> {
    let mut pdu_body = Vec::new();
    tag_oid(&mut pdu_body, oid_prefix)?;
    tag_ip_address(&mut pdu_body, Ipv4Addr::UNSPECIFIED);
    tag_integer(&mut pdu_body, GENERIC_TRAP_ENTERPRISE_SPECIFIC);
    tag_integer(&mut pdu_body, specific_trap);
    tag_timeticks(&mut pdu_body, uptime_ticks);

    let mut varbind_list = Vec::new();
    for bind in varbinds {
        varbind_list.extend_from_slice(&encode_varbind(oid_prefix, bind)?);
    }
    pdu_body.extend_from_slice(&sequence(&varbind_list));

    let mut trap_pdu = Vec::new();
    encode_tlv(&mut trap_pdu, 0xa4, &pdu_body);

    let mut message = Vec::new();
    tag_integer(&mut message, SNMP_VERSION_V1);
    tag_octet_string(&mut message, community.as_bytes());
    message.extend_from_slice(&trap_pdu);

    Ok(sequence(&message))
}

/// Send one SNMPv1 TRAP to `host:port`. Traps are fire-and-forget (no
/// application-level ack), so success here only means the datagram left
/// the local socket; classification is deliberately coarse: a socket or
/// encoding error is retryable, anything else is success.
pub async fn send(
    host: &str,
    port: u16,
    community: &str,
    oid_prefix: &str,
    specific_trap: i64,
    varbinds: &[VarBind],
) -> DeliveryOutcome {
    let packet = match build_trap(community, oid_prefix, specific_trap, 0, varbinds) {
        Ok(packet) => packet,
        Err(err) => {
            return DeliveryOutcome::Permanent { transport_status: None, error: err };
        }
    };

    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(err) => {
            return DeliveryOutcome::Retryable { transport_status: None, error: err.to_string() };
        }
    };

    let send = socket.send_to(&packet, (host, port));
    match tokio::time::timeout(SEND_TIMEOUT, send).await {
        Ok(Ok(_)) => DeliveryOutcome::Success { transport_status: None },
        Ok(Err(err)) => DeliveryOutcome::Retryable { transport_status: None, error: err.to_string() },
        Err(_) => DeliveryOutcome::Retryable {
            transport_status: None,
            error: "timed out sending SNMP trap".to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_encodes_leading_arcs_into_one_byte() {
        let encoded = encode_oid("1.3.6.1.4.1.9999").unwrap();
        assert_eq!(encoded[0], 1 * 40 + 3);
    }

    #[test]
    fn oid_rejects_single_arc() {
        assert!(encode_oid("1").is_err());
    }

    #[test]
    fn trap_round_trips_through_sequence_tag() {
        let packet = build_trap(
            "public",
            "1.3.6.1.4.1.9999",
            2,
            0,
            &[VarBind { oid_suffix: "1", value: VarBindValue::String("offline".into()) }],
        )
        .unwrap();
        assert_eq!(packet[0], 0x30);
        assert!(packet.len() > 10);
    }

    #[tokio::test]
    async fn send_to_unreachable_port_does_not_panic() {
        let outcome = send("127.0.0.1", 0, "public", "1.3.6.1.4.1.9999", 2, &[]).await;
        assert!(matches!(outcome, DeliveryOutcome::Success { .. } | DeliveryOutcome::Retryable { .. }));
    }
}
