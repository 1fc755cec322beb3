//! UDP session to a single device: one request datagram, one reply datagram, bounded wait.

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, trace};
use pwm_core::wire::{decode_reply, encode_request};
use pwm_core::{ControlError, Reply, Request, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Owns the socket and the peer address. All exchanges are serialized: the lock is held from
/// send until the reply (or timeout), so one request's reply is never consumed by another.
#[derive(Debug)]
pub struct Session {
    socket: Mutex<UdpSocket>,
    peer: SocketAddr,
    timeout: Duration,
}

impl Session {
    /// Resolve `host:port` once and bind an ephemeral local socket of the matching family.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ControlError> {
        let peer = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address for {}:{}", host, port),
                )
            })?;
        Self::bind(peer, timeout).await
    }

    pub async fn bind(peer: SocketAddr, timeout: Duration) -> Result<Self, ControlError> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0u8, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        debug!("session bound to {} for peer {}", socket.local_addr()?, peer);
        Ok(Self {
            socket: Mutex::new(socket),
            peer,
            timeout,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` and wait at most the session timeout for any datagram. No retry.
    /// The reply's source address is not checked.
    pub async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, ControlError> {
        let socket = self.socket.lock().await;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        // Late replies to earlier timed-out exchanges.
        while let Ok((n, from)) = socket.try_recv_from(&mut buf) {
            trace!("discarding stale {} bytes from {}", n, from);
        }
        trace!("-> {} {:?}", self.peer, String::from_utf8_lossy(request));
        socket.send_to(request, self.peer).await?;
        match tokio::time::timeout(self.timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => {
                trace!("<- {} {:?}", from, String::from_utf8_lossy(&buf[..n]));
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(ControlError::Io(e)),
            Err(_) => Err(ControlError::NoResponse),
        }
    }

    /// Encode, exchange and decode one request.
    pub async fn request(
        &self,
        req: &Request,
        update_ack: Option<&str>,
    ) -> Result<Reply, ControlError> {
        let bytes = encode_request(req)?;
        let reply = self.exchange(&bytes).await?;
        decode_reply(req, &reply, update_ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{DeviceEvent, FakeDevice, TEST_TIMEOUT};
    use pwm_core::DutyCycle;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn exchange_returns_reply_verbatim() {
        let device = FakeDevice::start().await;
        let session = Session::bind(device.addr(), TEST_TIMEOUT).await.unwrap();
        let reply = session.exchange(b"!PING").await.unwrap();
        assert_eq!(reply, b"acknowledged");
        assert_eq!(device.received(), 1);
    }

    #[tokio::test]
    async fn silent_device_is_no_response() {
        let device = FakeDevice::start().await;
        device.set_online(false);
        let session = Session::bind(device.addr(), TEST_TIMEOUT).await.unwrap();
        let started = Instant::now();
        let err = session.exchange(b"!PING").await.unwrap_err();
        assert!(matches!(err, ControlError::NoResponse));
        assert!(started.elapsed() >= TEST_TIMEOUT);
        assert_eq!(device.received(), 1);
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_the_next_one() {
        let device = FakeDevice::start().await;
        device.set_reply_delay(TEST_TIMEOUT + Duration::from_millis(50));
        let session = Session::bind(device.addr(), TEST_TIMEOUT).await.unwrap();
        assert!(matches!(
            session.exchange(b"!PING").await,
            Err(ControlError::NoResponse)
        ));
        // The late ack is queued on the socket by now.
        tokio::time::sleep(Duration::from_millis(150)).await;
        device.set_reply_delay(Duration::ZERO);
        let reply = session.exchange(b"5_10").await.unwrap();
        assert_eq!(reply, device.update_reply("5_10").into_bytes());
    }

    #[tokio::test]
    async fn bad_label_never_sent() {
        let device = FakeDevice::start().await;
        let session = Session::bind(device.addr(), TEST_TIMEOUT).await.unwrap();
        let req = Request::SetDutyCycle {
            label: "5|6".into(),
            duty: DutyCycle::ZERO,
        };
        assert!(matches!(
            session.request(&req, None).await,
            Err(ControlError::InvalidLabel(_))
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.received(), 0);
    }

    #[tokio::test]
    async fn concurrent_exchanges_do_not_interleave() {
        let device = FakeDevice::start().await;
        device.set_reply_delay(Duration::from_millis(80));
        let session = Arc::new(
            Session::bind(device.addr(), Duration::from_millis(500))
                .await
                .unwrap(),
        );
        let a = {
            let s = session.clone();
            tokio::spawn(async move { s.exchange(b"5_10").await })
        };
        let b = {
            let s = session.clone();
            tokio::spawn(async move { s.exchange(b"6_20").await })
        };
        let ra = a.await.unwrap().unwrap();
        let rb = b.await.unwrap().unwrap();
        assert_eq!(ra, device.update_reply("5_10").into_bytes());
        assert_eq!(rb, device.update_reply("6_20").into_bytes());

        // Each request must arrive only after the previous reply went out.
        let events = device.events();
        assert_eq!(events.len(), 4);
        let DeviceEvent::Received { text: first } = &events[0] else {
            panic!("expected a request first, got {:?}", events[0]);
        };
        let second = if first == "5_10" { "6_20" } else { "5_10" };
        assert_eq!(
            events[1..],
            [
                DeviceEvent::Replied {
                    text: device.update_reply(first)
                },
                DeviceEvent::Received {
                    text: second.to_string()
                },
                DeviceEvent::Replied {
                    text: device.update_reply(second)
                },
            ]
        );
    }
}
