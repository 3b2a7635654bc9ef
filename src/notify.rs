use std::io::Write;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::ChannelError;

pub const DEFAULT_ADDRESS: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 12345));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Side channel signalled once a face has been matched.
pub trait Notifier {
    fn signal(&self, message: &str) -> Result<(), ChannelError>;
}

impl<T: Notifier + ?Sized> Notifier for &T {
    fn signal(&self, message: &str) -> Result<(), ChannelError> {
        (**self).signal(message)
    }
}

/// Point-to-point TCP notifier.
///
/// Every `signal` binds the endpoint, waits at most `timeout` for a single
/// consumer, writes the UTF-8 payload and closes both sockets.
#[derive(Debug, Clone)]
pub struct OneShotNotifier {
    addr: SocketAddr,
    timeout: Duration,
}

impl OneShotNotifier {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

impl Notifier for OneShotNotifier {
    fn signal(&self, message: &str) -> Result<(), ChannelError> {
        let listener = TcpListener::bind(self.addr).map_err(|source| ChannelError::Bind {
            addr: self.addr,
            source,
        })?;
        // std has no accept timeout, poll a non-blocking listener instead
        listener.set_nonblocking(true)?;

        let deadline = Instant::now() + self.timeout;
        let (mut stream, peer) = loop {
            match listener.accept() {
                Ok(conn) => break conn,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ChannelError::Timeout {
                            addr: self.addr,
                            timeout: self.timeout,
                        });
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(e.into()),
            }
        };
        debug!("notification consumer connected from {}", peer);

        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(message.as_bytes())?;
        stream.flush()?;
        // the peer may already be gone, nothing left to deliver either way
        let _ = stream.shutdown(Shutdown::Both);

        info!("notification delivered to {}", peer);
        Ok(())
    }
}
