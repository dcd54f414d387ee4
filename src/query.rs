use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, warn};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::error::TeeQueryError;
use crate::info::{InfoDecoder, ServerInfo};
use crate::packet::{RequestPacket, MAX_PACKET_SIZE};

/// Deadline applied to each send and receive when the caller passes `None`.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle for querying one game server.
///
/// Example usage:
/// ```no_run
/// # async fn run() -> Result<(), teequery::error::TeeQueryError> {
/// use teequery::query::ServerQuery;
///
/// let query = ServerQuery::new("ger.ddnet.org", ServerQuery::DEFAULT_PORT, false);
/// if let Some(info) = query.request_info(None).await? {
///     println!("{} on {}", info.name, info.map);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ServerQuery {
    address: String,
    port: u16,
    ignore_token: bool,
}

impl ServerQuery {
    /// Default Teeworlds server port.
    pub const DEFAULT_PORT: u16 = 8303;

    /// `ignore_token` suppresses token validation errors; useful against
    /// servers that echo tokens incorrectly.
    pub fn new(address: impl Into<String>, port: u16, ignore_token: bool) -> Self {
        ServerQuery {
            address: address.into(),
            port,
            ignore_token,
        }
    }

    /// Resolve the server address once and bind a local socket, to be
    /// reused across requests.
    pub async fn connect(&self) -> Result<QuerySocket, TeeQueryError> {
        let target = resolve(&self.address, self.port).await?;

        // any local port will do
        let sock = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(TeeQueryError::FailedPortBind)?;
        debug!("bound query socket for {target}");

        Ok(QuerySocket {
            sock,
            target,
            ignore_token: self.ignore_token,
        })
    }

    /// One-shot convenience: resolve, bind and run a single exchange.
    pub async fn request_info(
        &self,
        timeout_dur: Option<Duration>,
    ) -> Result<Option<ServerInfo>, TeeQueryError> {
        self.connect().await?.request_info(timeout_dur).await
    }
}

/// Resolve a hostname to its first IPv4 address.
async fn resolve(address: &str, port: u16) -> Result<SocketAddr, TeeQueryError> {
    lookup_host((address, port))
        .await
        .map_err(TeeQueryError::ResolutionError)?
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| TeeQueryError::UnresolvedHost(address.to_owned()))
}

/// A bound query socket aimed at one server.
#[derive(Debug)]
pub struct QuerySocket {
    sock: UdpSocket,
    target: SocketAddr,
    ignore_token: bool,
}

impl QuerySocket {
    /// The resolved address this socket queries.
    pub fn peer(&self) -> SocketAddr {
        self.target
    }

    /// Run one request/response exchange.
    ///
    /// The request is sent exactly once, with no retries. The wait ends
    /// when a datagram from the queried server arrives; datagrams from
    /// any other sender are discarded without ending the wait.
    /// `timeout_dur` bounds each send and receive await (default 5
    /// seconds).
    pub async fn request_info(
        &self,
        timeout_dur: Option<Duration>,
    ) -> Result<Option<ServerInfo>, TeeQueryError> {
        let timeout_dur: Duration = timeout_dur.unwrap_or(DEFAULT_TIMEOUT);

        let request = RequestPacket::new()?;
        let mut decoder = InfoDecoder::new(request.token(), self.ignore_token);

        let raw = self.send_recv(&request, timeout_dur).await?;
        decoder.decode(&raw)
    }

    async fn send_recv(
        &self,
        request: &RequestPacket,
        timeout_dur: Duration,
    ) -> Result<Vec<u8>, TeeQueryError> {
        timeout(timeout_dur, self.sock.send_to(&request.pack(), self.target))
            .await?
            .map_err(TeeQueryError::SendError)?;

        let mut resp_buf: [u8; MAX_PACKET_SIZE] = [0u8; MAX_PACKET_SIZE];
        loop {
            let (len, from) = timeout(timeout_dur, self.sock.recv_from(&mut resp_buf))
                .await?
                .map_err(TeeQueryError::ReceiveError)?;

            if from != self.target {
                debug!("discarding datagram from non-peer {from}, expected {}", self.target);
                continue;
            }
            return Ok(resp_buf[..len].to_vec());
        }
    }

    /// Re-issue the info request on a fixed interval, emitting each
    /// decoded [ServerInfo] through the returned channel.
    ///
    /// Failed or undecodable exchanges are logged and skipped; the loop
    /// keeps polling. The loop ends when [InfoPoller::stop] is called
    /// (which also closes the socket) or when the receiver is dropped.
    pub fn poll(
        self,
        poll_interval: Duration,
        timeout_dur: Option<Duration>,
    ) -> (InfoPoller, mpsc::Receiver<ServerInfo>) {
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            loop {
                ticker.tick().await;
                match self.request_info(timeout_dur).await {
                    Ok(Some(info)) => {
                        if tx.send(info).await.is_err() {
                            // receiver gone, stop polling
                            break;
                        }
                    }
                    Ok(None) => debug!("undecodable response from {}", self.target),
                    Err(err) => warn!("query to {} failed: {err}", self.target),
                }
            }
        });

        (InfoPoller { task }, rx)
    }
}

/// Cancellation handle for a poll loop started by [QuerySocket::poll].
#[derive(Debug)]
pub struct InfoPoller {
    task: JoinHandle<()>,
}

impl InfoPoller {
    /// Stop the poll loop and close its socket.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for InfoPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal vanilla response echoing `raw_token`, no clients.
    fn vanilla_response(raw_token: u32) -> Vec<u8> {
        let mut resp = vec![0u8; 10];
        resp.extend_from_slice(b"inf3");
        resp.extend_from_slice(raw_token.to_string().as_bytes());
        resp.push(0);
        let fields: [&[u8]; 9] = [
            b"0.6.4",
            b"unnamed server",
            b"dm1",
            b"dm",
            b"0",
            b"0",
            b"8",
            b"0",
            b"16",
        ];
        for field in fields {
            resp.extend_from_slice(field);
            resp.push(0);
        }
        resp
    }

    /// The full 24-bit token a well-behaved server echoes back, read from
    /// the request bytes.
    fn echo_token(request: &[u8]) -> u32 {
        ((request[2] as u32) << 16) | ((request[3] as u32) << 8) | request[14] as u32
    }

    #[tokio::test]
    async fn exchange_discards_datagrams_from_other_senders() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let query = ServerQuery::new("127.0.0.1", port, false);
        let socket = query.connect().await.unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 15);
            assert_eq!(&buf[0..2], b"xe");
            assert_eq!(&buf[6..10], &[0xff; 4]);
            assert_eq!(&buf[10..14], b"gie3");

            // a datagram from the wrong sender must not end the wait
            stranger.send_to(b"not for you", from).await.unwrap();

            let resp = vanilla_response(echo_token(&buf[..len]));
            server.send_to(&resp, from).await.unwrap();
        });

        let info = socket
            .request_info(Some(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.name, "unnamed server");
        assert_eq!(info.map, "dm1");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn receive_deadline_elapses_without_a_response() {
        // bound but mute server
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let query = ServerQuery::new("127.0.0.1", port, true);
        let result = query.request_info(Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(TeeQueryError::TimeoutError(_))));
    }

    #[tokio::test]
    async fn poll_emits_info_until_stopped() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let (len, from) = server.recv_from(&mut buf).await.unwrap();
                let resp = vanilla_response(echo_token(&buf[..len]));
                server.send_to(&resp, from).await.unwrap();
            }
        });

        let socket = ServerQuery::new("127.0.0.1", port, false)
            .connect()
            .await
            .unwrap();
        let (poller, mut rx) = socket.poll(Duration::from_millis(20), Some(Duration::from_secs(1)));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.game_type, "dm");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.map, "dm1");

        poller.stop();
        server_task.abort();
    }
}
