//! Wake-on-LAN.
//!
//! Most sets drop off the network in standby, so `X_SendKey` cannot turn
//! them on. A magic packet to the broadcast address can.

use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::Error;

/// Broadcast destination for magic packets.
pub const WOL_ADDR: &str = "255.255.255.255:9";

/// Length of a magic packet: 6 sync bytes plus 16 copies of the MAC.
pub const MAGIC_PACKET_LEN: usize = 102;

/// Parses `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`.
pub fn parse_mac(mac: &str) -> Result<[u8; 6], Error> {
    let invalid = || Error::InvalidArgument(format!("invalid MAC address: {mac}"));

    let separator = if mac.contains(':') { ':' } else { '-' };
    let parts: Vec<&str> = mac.trim().split(separator).collect();
    if parts.len() != 6 {
        return Err(invalid());
    }

    let mut out = [0u8; 6];
    for (byte, part) in out.iter_mut().zip(parts) {
        if part.len() != 2 {
            return Err(invalid());
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    Ok(out)
}

/// Builds the magic packet for `mac`.
pub fn magic_packet(mac: &str) -> Result<[u8; MAGIC_PACKET_LEN], Error> {
    let mac = parse_mac(mac)?;
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac);
    }
    Ok(packet)
}

/// Broadcasts a magic packet for `mac` on UDP port 9.
pub async fn send_magic_packet(mac: &str) -> Result<(), Error> {
    let packet = magic_packet(mac)?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    debug!(target_addr = WOL_ADDR, mac, "Sending magic packet");
    socket.send_to(&packet, WOL_ADDR).await?;
    Ok(())
}
