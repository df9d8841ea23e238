//! Wake-on-LAN magic packets

use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::info;

use crate::error::RelayError;

const MAC_PATTERN: &str = r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$";

/// Parse `AA:BB:CC:DD:EE:FF` (or dash separated) into bytes
pub fn parse_mac(mac: &str) -> Result<[u8; 6], RelayError> {
    let invalid = || RelayError::InvalidRequest("Invalid MAC address format".to_string());

    let valid = regex_lite::Regex::new(MAC_PATTERN)
        .map(|re| re.is_match(mac))
        .unwrap_or(false);
    if !valid {
        return Err(invalid());
    }

    let mut bytes = [0u8; 6];
    for (slot, pair) in bytes.iter_mut().zip(mac.split([':', '-'])) {
        *slot = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
    }
    Ok(bytes)
}

/// Six `0xFF` bytes followed by the MAC repeated sixteen times
pub fn magic_packet(mac: &[u8; 6]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + 16 * 6);
    packet.extend_from_slice(&[0xFF; 6]);
    for _ in 0..16 {
        packet.extend_from_slice(mac);
    }
    packet
}

/// Broadcast a magic packet to `target`
pub async fn send_magic_packet(mac: &[u8; 6], target: SocketAddr) -> Result<(), RelayError> {
    let bind: SocketAddr = if target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };

    let socket = UdpSocket::bind(bind).await?;
    socket.set_broadcast(true)?;
    socket.send_to(&magic_packet(mac), target).await?;

    info!(
        mac = %format_mac(mac),
        target = %target,
        "Sent Wake-on-LAN magic packet"
    );
    Ok(())
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac() {
        assert_eq!(
            parse_mac("00:1A:2b:3C:4d:5E").unwrap(),
            [0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]
        );
        assert_eq!(
            parse_mac("00-1a-2b-3c-4d-5e").unwrap(),
            [0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]
        );

        assert!(parse_mac("001A2B3C4D5E").is_err());
        assert!(parse_mac("00:1A:2B:3C:4D").is_err());
        assert!(parse_mac("00:1A:2B:3C:4D:5E; reboot").is_err());
        assert!(parse_mac("zz:1A:2B:3C:4D:5E").is_err());
    }

    #[test]
    fn test_magic_packet_layout() {
        let mac = [1, 2, 3, 4, 5, 6];
        let packet = magic_packet(&mac);

        assert_eq!(packet.len(), 102);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for chunk in packet[6..].chunks(6) {
            assert_eq!(chunk, &mac);
        }
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(&[0xAA, 0, 1, 2, 3, 0xFF]), "AA:00:01:02:03:FF");
    }

    #[tokio::test]
    async fn test_packet_reaches_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();
        let mac = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01];

        send_magic_packet(&mac, target).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], magic_packet(&mac).as_slice());
    }
}
