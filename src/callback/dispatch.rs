use std::io::{ErrorKind, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::backend::Clock;
use crate::device::Callback;
use crate::error::HubError;

const CLOSE_WAIT_RETRIES: u8 = 20;
const CLOSE_WAIT_DELAY_MS: u64 = 10;
const USER_AGENT: &str = concat!("WifiSensors/", env!("CARGO_PKG_VERSION"));

pub trait Connection: Send {
    /// True while the peer has not closed its side.
    fn is_open(&mut self) -> bool;
    fn send(&mut self, bytes: &[u8]) -> Result<(), HubError>;
    fn close(&mut self);
}

pub trait Connector: Send {
    fn connect(&mut self, host: &str, port: u16) -> Result<Box<dyn Connection>, HubError>;
}

/// Formats the single GET request sent to a callback.
pub fn build_request(callback: &Callback, path: &str) -> String {
    let mut request = format!(
        "GET {path} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {USER_AGENT}\r\n",
        callback.host()
    );
    if !callback.auth().is_empty() {
        request.push_str(&format!("Authorization: {}\r\n", callback.auth()));
    }
    request.push_str("Connection: close\r\n\r\n");
    request
}

/// A rendered callback request waiting for delivery. `device` is `None` for
/// the server warning callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Push {
    pub device: Option<usize>,
    pub callback: Callback,
    pub path: String,
}

/// Owner of the one outbound connection. Every dispatch evicts the
/// connection left behind by the previous one.
pub struct Dispatcher {
    connector: Box<dyn Connector>,
    clock: Arc<dyn Clock>,
    active: Option<Box<dyn Connection>>,
}

impl Dispatcher {
    pub fn new(connector: Box<dyn Connector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            connector,
            clock,
            active: None,
        }
    }

    fn evict_previous(&mut self) {
        let Some(mut previous) = self.active.take() else {
            return;
        };
        for attempt in 0..CLOSE_WAIT_RETRIES {
            if !previous.is_open() {
                break;
            }
            debug!("Wait for client to close {attempt}");
            self.clock.delay_ms(CLOSE_WAIT_DELAY_MS);
        }
        previous.close();
    }

    pub fn dispatch(&mut self, callback: &Callback, path: &str) -> Result<(), HubError> {
        self.evict_previous();

        let mut conn = self
            .connector
            .connect(callback.host(), callback.port())
            .inspect_err(|e| {
                warn!(
                    "connection failed for: {}:{} ({e})",
                    callback.host(),
                    callback.port()
                )
            })?;

        info!("{} Sending: {path}", self.clock.now_ms());
        conn.send(build_request(callback, path).as_bytes())
            .inspect_err(|e| warn!("sending to {} failed: {e}", callback.host()))?;
        self.active = Some(conn);
        Ok(())
    }

    /// Sends `pushes` in order and hands back the ones that failed.
    pub fn deliver(&mut self, pushes: Vec<Push>) -> Vec<Push> {
        pushes
            .into_iter()
            .filter(|push| self.dispatch(&push.callback, &push.path).is_err())
            .collect()
    }

    pub fn has_active_connection(&self) -> bool {
        self.active.is_some()
    }
}

pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self, host: &str, port: u16) -> Result<Box<dyn Connection>, HubError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| HubError::Network(format!("resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| HubError::Network(format!("no address for {host}")))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| HubError::Network(format!("connect {addr}: {e}")))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| HubError::Network(format!("write timeout: {e}")))?;
        Ok(Box::new(TcpConnection { stream }))
    }
}

struct TcpConnection {
    stream: TcpStream,
}

impl Connection for TcpConnection {
    fn is_open(&mut self) -> bool {
        if self.stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut byte = [0u8; 1];
        let open = match self.stream.peek(&mut byte) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == ErrorKind::WouldBlock,
        };
        let _ = self.stream.set_nonblocking(false);
        open
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), HubError> {
        self.stream
            .write_all(bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|e| HubError::Network(format!("write: {e}")))
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ManualClock, RecordingConnector};

    fn callback(auth: &str) -> Callback {
        Callback::new("collector", 8080, "/v/<state>", auth)
    }

    #[test]
    fn request_has_host_agent_and_close() {
        let req = build_request(&callback(""), "/v/on");
        assert!(req.starts_with("GET /v/on HTTP/1.1\r\nHost: collector\r\n"));
        assert!(req.contains("User-Agent: WifiSensors/"));
        assert!(!req.contains("Authorization"));
        assert!(req.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn request_carries_auth_header() {
        let req = build_request(&callback("Bearer t"), "/v/on");
        assert!(req.contains("Authorization: Bearer t\r\nConnection: close"));
    }

    #[test]
    fn dispatch_sends_to_callback_target() {
        let connector = RecordingConnector::default();
        let clock = Arc::new(ManualClock::default());
        let mut dispatcher = Dispatcher::new(Box::new(connector.clone()), clock);

        dispatcher.dispatch(&callback(""), "/v/on").unwrap();

        let sent = connector.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].host, "collector");
        assert_eq!(sent[0].port, 8080);
        assert_eq!(sent[0].path(), "/v/on");
        assert!(dispatcher.has_active_connection());
    }

    #[test]
    fn next_dispatch_waits_then_evicts_previous_connection() {
        let connector = RecordingConnector::default();
        connector.keep_open(true);
        let clock = Arc::new(ManualClock::default());
        let mut dispatcher = Dispatcher::new(Box::new(connector.clone()), clock.clone());

        dispatcher.dispatch(&callback(""), "/a").unwrap();
        dispatcher.dispatch(&callback(""), "/b").unwrap();

        // previous connection never closed by the peer: full wait budget
        assert_eq!(clock.now_ms(), u64::from(CLOSE_WAIT_RETRIES) * CLOSE_WAIT_DELAY_MS);
        assert_eq!(connector.closed(), 1);
        assert_eq!(connector.requests().len(), 2);
    }

    #[test]
    fn closed_peer_is_not_waited_for() {
        let connector = RecordingConnector::default();
        let clock = Arc::new(ManualClock::default());
        let mut dispatcher = Dispatcher::new(Box::new(connector.clone()), clock.clone());

        dispatcher.dispatch(&callback(""), "/a").unwrap();
        dispatcher.dispatch(&callback(""), "/b").unwrap();
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn deliver_returns_only_failed_pushes() {
        let connector = RecordingConnector::default();
        let mut dispatcher =
            Dispatcher::new(Box::new(connector.clone()), Arc::new(ManualClock::default()));
        let push = |path: &str| Push {
            device: Some(0),
            callback: callback(""),
            path: path.to_string(),
        };

        assert!(dispatcher.deliver(vec![push("/a"), push("/b")]).is_empty());
        assert_eq!(connector.paths(), vec!["/a", "/b"]);

        connector.fail_connects(true);
        assert_eq!(dispatcher.deliver(vec![push("/c")]), vec![push("/c")]);
    }

    #[test]
    fn connect_failure_is_reported() {
        let connector = RecordingConnector::default();
        connector.fail_connects(true);
        let mut dispatcher =
            Dispatcher::new(Box::new(connector.clone()), Arc::new(ManualClock::default()));

        let err = dispatcher.dispatch(&callback(""), "/a").unwrap_err();
        assert!(matches!(err, HubError::Network(_)));
        assert!(!dispatcher.has_active_connection());
        assert!(connector.requests().is_empty());
    }
}
