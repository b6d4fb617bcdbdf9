//! TLS-capable byte stream used by SMTP connection tasks
//!
//! The connection task consumes streams through the `SmtpStream` trait and
//! obtains fresh ones through a `StreamConnector`, so tests can substitute
//! a scripted stub for the real socket. `TcpSmtpStream` is the production
//! implementation: plain TCP with per-operation timeouts, upgradable in
//! place to TLS after a STARTTLS exchange.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use derive_more::{Display, Error, From};
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};

use crate::smtp::reply;

#[derive(Debug, Display, From, Error)]
pub enum StreamError {
    Io(std::io::Error),
    Tls(openssl::error::ErrorStack),
    #[display(fmt = "TLS handshake failed")]
    Handshake,
    #[display(fmt = "connection closed by peer")]
    Closed,
    #[display(fmt = "stream is not in the plaintext state")]
    NotPlaintext,
}

type Result<T> = std::result::Result<T, StreamError>;

/// A byte stream carrying one SMTP session
pub trait SmtpStream: Send {
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read one complete reply, consuming lines until the final line
    fn read_reply(&mut self) -> Result<String>;

    fn upgrade_tls(&mut self) -> Result<()>;

    fn close(&mut self);
}

/// Mints fresh byte streams for connection tasks
pub trait StreamConnector: Send + Sync {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<Box<dyn SmtpStream>>;
}

enum Transport {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
    Closed,
}

/// TCP byte stream with optional in-place TLS upgrade
///
/// Certificates are deliberately not verified; the prober talks to servers
/// it has no trust relationship with.
pub struct TcpSmtpStream {
    host: String,
    transport: Transport,
}

impl TcpSmtpStream {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpSmtpStream> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "host resolved to no address")
        })?;

        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        Ok(TcpSmtpStream {
            host: host.to_string(),
            transport: Transport::Plain(stream),
        })
    }
}

impl SmtpStream for TcpSmtpStream {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        match self.transport {
            Transport::Plain(ref mut stream) => {
                stream.write_all(data)?;
                stream.flush()?;
            }
            Transport::Tls(ref mut stream) => {
                stream.write_all(data)?;
                stream.flush()?;
            }
            Transport::Closed => return Err(StreamError::Closed),
        }

        Ok(())
    }

    fn read_reply(&mut self) -> Result<String> {
        let mut received = String::new();
        let mut chunk = [0u8; 1024];

        loop {
            let read = match self.transport {
                Transport::Plain(ref mut stream) => stream.read(&mut chunk)?,
                Transport::Tls(ref mut stream) => stream.read(&mut chunk)?,
                Transport::Closed => return Err(StreamError::Closed),
            };

            if read == 0 {
                return Err(StreamError::Closed);
            }

            received.push_str(&String::from_utf8_lossy(&chunk[..read]));
            if reply::is_complete(&received) {
                return Ok(received);
            }
        }
    }

    fn upgrade_tls(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Plain(stream) => {
                let mut builder = SslConnector::builder(SslMethod::tls())?;
                builder.set_verify(SslVerifyMode::NONE);
                let connector = builder.build();

                let tls = connector
                    .configure()?
                    .verify_hostname(false)
                    .connect(&self.host, stream)
                    .map_err(|e| {
                        log::debug!("TLS handshake with {} failed: {}", self.host, e);
                        StreamError::Handshake
                    })?;

                self.transport = Transport::Tls(tls);

                Ok(())
            }
            other => {
                self.transport = other;

                Err(StreamError::NotPlaintext)
            }
        }
    }

    fn close(&mut self) {
        if let Transport::Tls(ref mut stream) = self.transport {
            let _ = stream.shutdown();
        }

        self.transport = Transport::Closed;
    }
}

/// Connects plain TCP streams; the default connector for live probes
pub struct TcpConnector;

impl StreamConnector for TcpConnector {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<Box<dyn SmtpStream>> {
        Ok(Box::new(TcpSmtpStream::connect(host, port, timeout)?))
    }
}

#[cfg(test)]
pub mod tests {

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    /// Behavior of one scripted connection
    pub enum Script {
        /// Successive replies handed out by `read_reply`
        Replies(Vec<String>),
        /// The connection attempt itself fails
        Refuse,
    }

    pub fn script(replies: &[&str]) -> Script {
        Script::Replies(replies.iter().map(|r| r.to_string()).collect())
    }

    pub struct StubStream {
        replies: VecDeque<String>,
        sent: Arc<Mutex<Vec<String>>>,
        upgrades: Arc<AtomicUsize>,
    }

    impl SmtpStream for StubStream {
        fn send(&mut self, data: &[u8]) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(data).to_string());

            Ok(())
        }

        fn read_reply(&mut self) -> Result<String> {
            self.replies.pop_front().ok_or(StreamError::Closed)
        }

        fn upgrade_tls(&mut self) -> Result<()> {
            self.upgrades.fetch_add(1, Ordering::SeqCst);

            Ok(())
        }

        fn close(&mut self) {}
    }

    /// Scripted connector: each `connect` consumes the next script, or
    /// replays a single repeating one. Commands are recorded per
    /// connection so tests can inspect exactly what went over each wire.
    pub struct StubConnector {
        scripts: Mutex<VecDeque<Script>>,
        repeating: Option<Vec<String>>,
        connections: Mutex<Vec<Arc<Mutex<Vec<String>>>>>,
        pub upgrades: Arc<AtomicUsize>,
    }

    impl StubConnector {
        pub fn new(scripts: Vec<Script>) -> StubConnector {
            StubConnector {
                scripts: Mutex::new(scripts.into()),
                repeating: None,
                connections: Mutex::new(Vec::new()),
                upgrades: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn repeating(replies: &[&str]) -> StubConnector {
            StubConnector {
                scripts: Mutex::new(VecDeque::new()),
                repeating: Some(replies.iter().map(|r| r.to_string()).collect()),
                connections: Mutex::new(Vec::new()),
                upgrades: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Commands sent over every connection, in connection order
        pub fn sent(&self) -> Vec<Vec<String>> {
            self.connections
                .lock()
                .unwrap()
                .iter()
                .map(|log| log.lock().unwrap().clone())
                .collect()
        }
    }

    impl StreamConnector for StubConnector {
        fn connect(&self, _host: &str, _port: u16, _timeout: Duration) -> Result<Box<dyn SmtpStream>> {
            let replies = match self.scripts.lock().unwrap().pop_front() {
                Some(Script::Replies(replies)) => replies,
                Some(Script::Refuse) => {
                    return Err(StreamError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    )))
                }
                None => match self.repeating {
                    Some(ref replies) => replies.clone(),
                    None => return Err(StreamError::Closed),
                },
            };

            let sent = Arc::new(Mutex::new(Vec::new()));
            self.connections.lock().unwrap().push(sent.clone());

            Ok(Box::new(StubStream {
                replies: replies.into(),
                sent,
                upgrades: self.upgrades.clone(),
            }))
        }
    }

    #[test]
    fn test_stub_replays_script_and_records_commands() {
        let connector = StubConnector::new(vec![script(&["220 ok\r\n", "250 ok\r\n"])]);

        let mut stream = connector
            .connect("mail.test", 25, Duration::from_secs(1))
            .unwrap();

        assert_eq!("220 ok\r\n", stream.read_reply().unwrap());
        stream.send(b"EHLO localhost\r\n").unwrap();
        assert_eq!("250 ok\r\n", stream.read_reply().unwrap());

        // An exhausted script behaves like a closed connection
        assert!(matches!(stream.read_reply(), Err(StreamError::Closed)));
        assert!(matches!(
            connector.connect("mail.test", 25, Duration::from_secs(1)),
            Err(StreamError::Closed)
        ));

        assert_eq!(vec![vec!["EHLO localhost\r\n".to_string()]], connector.sent());
    }
}
