//! Chat connection, line reader and line writer
//!
//! The socket is split once: the read half feeds `LineReader`, the write
//! half sits behind `ChatSender`, which both the writer task and the
//! reader's keepalive replies use. Neither task touches the connection
//! state except through `StateHandle`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::codec::LineCodec;
use crate::error::GatewayError;
use crate::protocol::{keepalive_response, nick_command, parse_reply, user_command};
use crate::queue::Delivery;
use crate::state::{ConnectionState, StateHandle};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Incoming line stream of the chat socket
pub type ChatLines = FramedRead<BoxedRead, LineCodec>;

/// Dial the chat server, giving up after `dial_timeout`
pub async fn dial(addr: &str, dial_timeout: Duration) -> Result<TcpStream, GatewayError> {
    match tokio::time::timeout(dial_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            info!("connected to {}", addr);
            Ok(stream)
        }
        Ok(Err(source)) => Err(GatewayError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(GatewayError::ConnectTimeout {
            addr: addr.to_string(),
            timeout: dial_timeout,
        }),
    }
}

/// Line-send primitive shared by the reader and the writer
#[derive(Clone)]
pub struct ChatSender {
    sink: Arc<Mutex<FramedWrite<BoxedWrite, LineCodec>>>,
}

impl ChatSender {
    /// Send one line verbatim; the CRLF terminator is added here
    pub async fn send_line(&self, line: &str) -> Result<(), GatewayError> {
        debug!("> {}", line);
        self.sink
            .lock()
            .await
            .send(line.to_string())
            .await
            .map_err(GatewayError::ChatWrite)
    }

    /// Send a command the gateway composed itself, without surrounding
    /// whitespace
    pub async fn send_command(&self, command: &str) -> Result<(), GatewayError> {
        self.send_line(command.trim()).await
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = SinkExt::<String>::close(&mut *sink).await;
    }
}

/// An open chat connection, not yet handed to its reader and writer tasks
pub struct ChatConnection {
    pub lines: ChatLines,
    pub sender: ChatSender,
}

impl ChatConnection {
    pub fn new<R, W>(read: R, write: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let read: BoxedRead = Box::new(read);
        let write: BoxedWrite = Box::new(write);
        Self {
            lines: FramedRead::new(read, LineCodec::new()),
            sender: ChatSender {
                sink: Arc::new(Mutex::new(FramedWrite::new(write, LineCodec::new()))),
            },
        }
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self::new(read, write)
    }

    /// Dial `addr` and wrap the socket
    pub async fn connect(addr: &str, dial_timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self::from_tcp(dial(addr, dial_timeout).await?))
    }
}

/// Why the reader stopped
#[derive(Debug)]
pub enum ReaderExit {
    /// The server closed the connection
    Disconnected,
    /// Reading (or answering a keepalive) failed
    Failed(GatewayError),
}

/// Consumes the chat socket
///
/// Drives the server's side of the handshake, answers keepalive probes in
/// place and forwards every other line once the connection is live.
pub struct LineReader {
    lines: ChatLines,
    sender: ChatSender,
    state: StateHandle,
    inbound: mpsc::UnboundedSender<String>,
    disconnect: oneshot::Sender<ReaderExit>,
}

impl LineReader {
    pub fn new(
        lines: ChatLines,
        sender: ChatSender,
        state: StateHandle,
        inbound: mpsc::UnboundedSender<String>,
        disconnect: oneshot::Sender<ReaderExit>,
    ) -> Self {
        Self {
            lines,
            sender,
            state,
            inbound,
            disconnect,
        }
    }

    /// Read until end-of-stream or error, then signal the router
    pub async fn run(mut self) {
        let exit = loop {
            match self.lines.next().await {
                None => break ReaderExit::Disconnected,
                Some(Err(e)) => break ReaderExit::Failed(GatewayError::ChatRead(e)),
                Some(Ok(line)) => {
                    if let Err(e) = self.handle_line(line).await {
                        break ReaderExit::Failed(e);
                    }
                }
            }
        };

        debug!(?exit, "reader stopped");
        let _ = self.disconnect.send(exit);
    }

    async fn handle_line(&mut self, line: String) -> Result<(), GatewayError> {
        // Servers may probe before registration completes too
        if let Some(response) = keepalive_response(&line) {
            trace!("keepalive: {}", line);
            return self.sender.send_command(&response).await;
        }

        let snapshot = self.state.snapshot();
        match snapshot.state {
            ConnectionState::Live => {
                debug!("< {}", line);
                self.forward(line)
            }
            ConnectionState::AwaitingHandshake => {
                let Some(reply) = parse_reply(&line) else {
                    debug!("ignoring line during handshake: {}", line);
                    return Ok(());
                };
                if !reply.is_addressed_to(&snapshot.nickname) {
                    warn!(
                        nickname = %snapshot.nickname,
                        "invalid server message: wrong nickname in: {}", line
                    );
                    return Ok(());
                }

                if reply.rejects_nickname() {
                    debug!(code = reply.code, "< {}", line);
                    self.state.reject_nickname();
                    Ok(())
                } else if self.state.go_live() {
                    debug!("< {}", line);
                    self.forward(line)
                } else {
                    Ok(())
                }
            }
            ConnectionState::Init => {
                debug!("ignoring line before handshake: {}", line);
                Ok(())
            }
        }
    }

    fn forward(&self, line: String) -> Result<(), GatewayError> {
        self.inbound
            .send(line)
            .map_err(|_| GatewayError::ChannelClosed("inbound lines"))
    }
}

/// A line to write to chat, with the queue message it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundLine {
    pub text: String,
    /// Reported back once the line has been written
    pub delivery: Option<Delivery>,
}

/// Performs the handshake, then streams outbound lines to the socket
pub struct LineWriter {
    sender: ChatSender,
    state: StateHandle,
    outgoing: mpsc::UnboundedReceiver<OutboundLine>,
    delivered: mpsc::UnboundedSender<Delivery>,
}

impl LineWriter {
    pub fn new(
        sender: ChatSender,
        state: StateHandle,
        outgoing: mpsc::UnboundedReceiver<OutboundLine>,
        delivered: mpsc::UnboundedSender<Delivery>,
    ) -> Self {
        Self {
            sender,
            state,
            outgoing,
            delivered,
        }
    }

    /// Runs until the outbound channel closes or a write fails
    pub async fn run(mut self) -> Result<(), GatewayError> {
        self.handshake().await?;

        while let Some(line) = self.outgoing.recv().await {
            self.sender.send_line(&line.text).await?;
            if let Some(delivery) = line.delivery {
                let _ = self.delivered.send(delivery);
            }
        }

        self.sender.close().await;
        Ok(())
    }

    /// Announce identity whenever the state is `Init`, until it is `Live`
    async fn handshake(&self) -> Result<(), GatewayError> {
        loop {
            let snapshot = self
                .state
                .wait_until(|s| s.state != ConnectionState::AwaitingHandshake)
                .await?;
            if snapshot.state == ConnectionState::Live {
                return Ok(());
            }

            if let Some(nickname) = self.state.begin_handshake() {
                info!(nickname = %nickname, "sending identity");
                self.sender.send_command(&nick_command(&nickname)).await?;
                self.sender.send_command(&user_command(&nickname)).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    use super::*;

    const WAIT: Duration = Duration::from_secs(1);

    struct Harness {
        /// Server side of the socket
        server_read: tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        server_write: tokio::io::WriteHalf<DuplexStream>,
        state: StateHandle,
        inbound: mpsc::UnboundedReceiver<String>,
        outgoing: mpsc::UnboundedSender<OutboundLine>,
        delivered: mpsc::UnboundedReceiver<Delivery>,
        disconnect: oneshot::Receiver<ReaderExit>,
    }

    impl Harness {
        fn start(nickname: &str) -> Self {
            let (client, server) = tokio::io::duplex(4096);
            let (client_read, client_write) = tokio::io::split(client);
            let (server_read, server_write) = tokio::io::split(server);

            let connection = ChatConnection::new(client_read, client_write);
            let state = StateHandle::new(nickname);
            let (inbound_tx, inbound) = mpsc::unbounded_channel();
            let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
            let (delivered_tx, delivered) = mpsc::unbounded_channel();
            let (disconnect_tx, disconnect) = oneshot::channel();

            tokio::spawn(
                LineReader::new(
                    connection.lines,
                    connection.sender.clone(),
                    state.clone(),
                    inbound_tx,
                    disconnect_tx,
                )
                .run(),
            );
            tokio::spawn(
                LineWriter::new(connection.sender, state.clone(), outgoing_rx, delivered_tx).run(),
            );

            Self {
                server_read: BufReader::new(server_read).lines(),
                server_write,
                state,
                inbound,
                outgoing,
                delivered,
                disconnect,
            }
        }

        async fn expect_line(&mut self) -> String {
            tokio::time::timeout(WAIT, self.server_read.next_line())
                .await
                .expect("timed out waiting for client line")
                .unwrap()
                .expect("client closed")
        }

        async fn say(&mut self, line: &str) {
            self.server_write
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .unwrap();
        }

        async fn next_inbound(&mut self) -> String {
            tokio::time::timeout(WAIT, self.inbound.recv())
                .await
                .expect("timed out waiting for inbound line")
                .unwrap()
        }

        async fn go_live(&mut self) {
            assert_eq!(self.expect_line().await, "NICK bot");
            assert_eq!(self.expect_line().await, "USER bot localhost 127.0.0.1 :bot");
            self.say(":srv 001 bot :Welcome").await;
            assert_eq!(self.next_inbound().await, ":srv 001 bot :Welcome");
        }
    }

    #[tokio::test]
    async fn test_handshake_sends_identity() {
        let mut h = Harness::start("bot");
        h.go_live().await;
        assert_eq!(h.state.state(), ConnectionState::Live);
    }

    #[tokio::test]
    async fn test_nickname_in_use_retries_with_underscore() {
        let mut h = Harness::start("bot");
        assert_eq!(h.expect_line().await, "NICK bot");
        h.expect_line().await;

        h.say(":srv 433 * bot :Nickname is already in use").await;
        assert_eq!(h.expect_line().await, "NICK bot_");
        assert_eq!(h.expect_line().await, "USER bot_ localhost 127.0.0.1 :bot_");

        h.say(":srv 001 bot_ :Welcome bot_").await;
        assert_eq!(h.next_inbound().await, ":srv 001 bot_ :Welcome bot_");
        assert_eq!(h.state.state(), ConnectionState::Live);
        assert_eq!(h.state.nickname(), "bot_");
    }

    #[tokio::test]
    async fn test_consecutive_collisions() {
        let mut h = Harness::start("bot");
        let codes = [431, 432, 433, 436];
        for (n, code) in codes.iter().enumerate() {
            let nick = format!("bot{}", "_".repeat(n));
            assert_eq!(h.expect_line().await, format!("NICK {nick}"));
            h.expect_line().await;
            h.say(&format!(":srv {code} {nick} :rejected")).await;
        }
        assert_eq!(h.expect_line().await, "NICK bot____");
        h.expect_line().await;
        assert_eq!(h.state.snapshot().attempts, 5);
        assert_eq!(h.state.state(), ConnectionState::AwaitingHandshake);
    }

    #[tokio::test]
    async fn test_replies_for_other_nick_ignored() {
        let mut h = Harness::start("bot");
        h.expect_line().await;
        h.expect_line().await;

        h.say(":srv NOTICE AUTH :*** Looking up your hostname").await;
        h.say(":srv 001 someone :Welcome").await;
        h.say(":srv 001 bot :Welcome").await;
        assert_eq!(h.next_inbound().await, ":srv 001 bot :Welcome");
    }

    #[tokio::test]
    async fn test_unaddressed_notice_does_not_complete_handshake() {
        let mut h = Harness::start("bot");
        h.expect_line().await;
        h.expect_line().await;

        h.say(":srv 020 * :Please wait while we process your connection.").await;
        h.say(":srv 433 * bot :Nickname is already in use").await;
        assert_eq!(h.expect_line().await, "NICK bot_");
        assert_eq!(h.expect_line().await, "USER bot_ localhost 127.0.0.1 :bot_");
        assert_eq!(h.state.state(), ConnectionState::AwaitingHandshake);

        h.say(":srv 001 bot_ :Welcome").await;
        assert_eq!(h.next_inbound().await, ":srv 001 bot_ :Welcome");
        assert!(h.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outbound_text_written_verbatim() {
        let mut h = Harness::start("bot");
        h.go_live().await;

        h.outgoing
            .send(OutboundLine {
                text: "  PRIVMSG #room :  spaced out  ".into(),
                delivery: None,
            })
            .unwrap();
        assert_eq!(h.expect_line().await, "  PRIVMSG #room :  spaced out  ");
    }

    #[tokio::test]
    async fn test_keepalive_answered_not_forwarded() {
        let mut h = Harness::start("bot");
        h.go_live().await;

        h.say("PING :irc.example.net").await;
        h.say(":alice!a@h PRIVMSG #room :hi").await;
        assert_eq!(h.expect_line().await, "PONG :irc.example.net");
        assert_eq!(h.next_inbound().await, ":alice!a@h PRIVMSG #room :hi");
        assert!(h.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_keepalive_before_registration() {
        let mut h = Harness::start("bot");
        h.expect_line().await;
        h.expect_line().await;
        h.say("PING :cookie").await;
        assert_eq!(h.expect_line().await, "PONG :cookie");
        assert_eq!(h.state.state(), ConnectionState::AwaitingHandshake);
    }

    #[tokio::test]
    async fn test_live_lines_forwarded_in_order() {
        let mut h = Harness::start("bot");
        h.go_live().await;

        let lines: Vec<String> = (0..20).map(|i| format!(":a!b@c PRIVMSG #room :{i}")).collect();
        for line in &lines {
            h.say(line).await;
        }
        for line in &lines {
            assert_eq!(&h.next_inbound().await, line);
        }
    }

    #[tokio::test]
    async fn test_writer_waits_for_live_then_reports_delivery() {
        let mut h = Harness::start("bot");
        let delivery = Delivery {
            id: crate::types::MessageId("m1".into()),
            receipt: crate::types::ReceiptHandle("r1".into()),
            queue: crate::types::QueueUrl("q".into()),
        };
        h.outgoing
            .send(OutboundLine {
                text: "PRIVMSG #room :hello room".into(),
                delivery: Some(delivery.clone()),
            })
            .unwrap();

        h.go_live().await;
        assert_eq!(h.expect_line().await, "PRIVMSG #room :hello room");
        let reported = tokio::time::timeout(WAIT, h.delivered.recv()).await.unwrap();
        assert_eq!(reported, Some(delivery));
    }

    #[tokio::test]
    async fn test_end_of_stream_signals_disconnect() {
        let mut h = Harness::start("bot");
        h.go_live().await;
        h.server_write.shutdown().await.unwrap();

        let exit = tokio::time::timeout(WAIT, h.disconnect).await.unwrap().unwrap();
        assert!(matches!(exit, ReaderExit::Disconnected));
    }
}
