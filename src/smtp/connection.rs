//! Single-credential SMTP connection task
//!
//! One task attempts exactly one username and password pair against one
//! server, from a cold connection up to a decisive outcome. Transient
//! failures tear the stream down and start over on a fresh one, within the
//! configured retry budget. The task never sends `QUIT`; a rejected
//! credential leaves nothing on the connection worth preserving.

use derive_more::{Display, Error, From};
use serde_derive::{Deserialize, Serialize};

use crate::smtp::config::{AuthMethod, SmtpConfig};
use crate::smtp::reply;
use crate::smtp::stream::{SmtpStream, StreamConnector};

#[derive(Debug, Display, From, Error)]
pub enum ConnectionError {
    Stream(crate::smtp::stream::StreamError),
    #[display(fmt = "server greeting rejected with code {}", _0)]
    #[from(ignore)]
    Greeting(#[error(not(source))] u16),
    #[display(fmt = "EHLO rejected with code {}", _0)]
    #[from(ignore)]
    Ehlo(#[error(not(source))] u16),
    #[display(fmt = "STARTTLS rejected with code {}", _0)]
    #[from(ignore)]
    StartTls(#[error(not(source))] u16),
    #[display(fmt = "no shared authentication mechanism")]
    NoSharedMechanism,
    #[display(fmt = "authentication initialization rejected with code {}", _0)]
    #[from(ignore)]
    AuthInit(#[error(not(source))] u16),
    #[display(fmt = "username stage rejected with code {}", _0)]
    #[from(ignore)]
    Username(#[error(not(source))] u16),
}

impl ConnectionError {
    /// Whether a fresh connection may fare better
    ///
    /// Transport and TLS failures are worth another attempt, as are 4xx
    /// rejections. 5xx rejections and a failed mechanism negotiation would
    /// only recur.
    pub fn is_transient(&self) -> bool {
        match *self {
            ConnectionError::Stream(_) => true,
            ConnectionError::Greeting(code)
            | ConnectionError::Ehlo(code)
            | ConnectionError::StartTls(code)
            | ConnectionError::AuthInit(code)
            | ConnectionError::Username(code) => code < 500,
            ConnectionError::NoSharedMechanism => false,
        }
    }
}

type Result<T> = std::result::Result<T, ConnectionError>;

/// Phase of one SMTP session
///
/// Transitions run top to bottom, except that a successful STARTTLS
/// exchange re-enters `Connected` on the upgraded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Init,
    Connected,
    EhloSent,
    AuthStarted,
    AuthUsername,
    AuthPassword,
    AuthComplete,
    Error,
}

/// The classification of one credential attempt
///
/// `success` holds exactly when the final response code is in `[200, 400)`;
/// the code is 0 when the final reply carried no parseable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub success: bool,
    pub response_code: u16,
    pub response_text: String,
    pub username: String,
    pub password: String,
}

impl AuthOutcome {
    /// Classify a final server reply for one credential pair
    pub fn classify(reply_text: &str, username: &str, password: &str) -> AuthOutcome {
        AuthOutcome {
            success: reply::is_positive(reply_text),
            response_code: reply::response_code(reply_text),
            response_text: reply_text.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Drives one credential pair against one server
pub struct SmtpConnection<'a> {
    config: &'a SmtpConfig,
    username: String,
    password: String,
    state: ConnectionState,
    mechanisms: Vec<String>,
    tls_active: bool,
}

impl<'a> SmtpConnection<'a> {
    pub fn new(config: &'a SmtpConfig, username: String, password: String) -> SmtpConnection<'a> {
        SmtpConnection {
            config,
            username,
            password,
            state: ConnectionState::Init,
            mechanisms: Vec::new(),
            tls_active: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run this credential to a decisive outcome
    ///
    /// Each attempt runs on a fresh stream; transient failures are retried
    /// up to `max_retries` additional times.
    pub fn run(&mut self, connector: &dyn StreamConnector) -> Result<AuthOutcome> {
        let mut attempt: u16 = 0;

        loop {
            match self.attempt(connector) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    self.state = ConnectionState::Error;
                    if !e.is_transient() || attempt >= self.config.max_retries {
                        return Err(e);
                    }

                    attempt += 1;
                    log::debug!(
                        "attempt {} against {}:{} failed ({}), retrying",
                        attempt,
                        self.config.host,
                        self.config.port,
                        e
                    );
                }
            }
        }
    }

    fn attempt(&mut self, connector: &dyn StreamConnector) -> Result<AuthOutcome> {
        self.reset();

        let mut stream =
            connector.connect(&self.config.host, self.config.port, self.config.timeout)?;
        let outcome = self.drive(stream.as_mut());
        stream.close();

        outcome
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Init;
        self.mechanisms.clear();
        self.tls_active = false;
    }

    fn drive(&mut self, stream: &mut dyn SmtpStream) -> Result<AuthOutcome> {
        let greeting = stream.read_reply()?;
        let code = reply::response_code(&greeting);
        if !(200..300).contains(&code) {
            return Err(ConnectionError::Greeting(code));
        }
        self.state = ConnectionState::Connected;

        // EHLO runs a second time on the upgraded stream after STARTTLS
        loop {
            self.ehlo(stream)?;

            if self.config.use_tls && !self.tls_active {
                self.start_tls(stream)?;
                continue;
            }

            break;
        }

        let method = self.resolve_method()?;
        stream.send(format!("AUTH {}\r\n", method.token()).as_bytes())?;
        let reply_text = stream.read_reply()?;
        let code = reply::response_code(&reply_text);
        if !(300..400).contains(&code) {
            return Err(ConnectionError::AuthInit(code));
        }
        self.state = ConnectionState::AuthStarted;

        stream.send(format!("{}\r\n", base64::encode(&self.username)).as_bytes())?;
        let reply_text = stream.read_reply()?;
        let code = reply::response_code(&reply_text);
        if code >= 500 {
            // The server already rejected the credential at the username
            self.state = ConnectionState::AuthComplete;
            return Ok(AuthOutcome::classify(
                &reply_text,
                &self.username,
                &self.password,
            ));
        }
        if !(300..400).contains(&code) {
            return Err(ConnectionError::Username(code));
        }
        self.state = ConnectionState::AuthUsername;

        stream.send(format!("{}\r\n", base64::encode(&self.password)).as_bytes())?;
        self.state = ConnectionState::AuthPassword;

        let final_reply = stream.read_reply()?;
        self.state = ConnectionState::AuthComplete;

        Ok(AuthOutcome::classify(
            &final_reply,
            &self.username,
            &self.password,
        ))
    }

    fn ehlo(&mut self, stream: &mut dyn SmtpStream) -> Result<()> {
        stream.send(format!("EHLO {}\r\n", self.config.ehlo_domain).as_bytes())?;

        let reply_text = stream.read_reply()?;
        let code = reply::response_code(&reply_text);
        if !(200..300).contains(&code) {
            return Err(ConnectionError::Ehlo(code));
        }

        self.mechanisms = reply::auth_mechanisms(&reply_text);
        self.state = ConnectionState::EhloSent;

        Ok(())
    }

    fn start_tls(&mut self, stream: &mut dyn SmtpStream) -> Result<()> {
        stream.send(b"STARTTLS\r\n")?;

        let reply_text = stream.read_reply()?;
        let code = reply::response_code(&reply_text);
        if !(200..300).contains(&code) {
            return Err(ConnectionError::StartTls(code));
        }

        stream.upgrade_tls()?;
        self.tls_active = true;
        self.state = ConnectionState::Connected;

        Ok(())
    }

    fn resolve_method(&self) -> Result<AuthMethod> {
        match self.config.auth_method {
            AuthMethod::Auto => {
                for method in [AuthMethod::Login, AuthMethod::Plain, AuthMethod::CramMd5] {
                    if self.mechanisms.iter().any(|m| m == method.token()) {
                        return Ok(method);
                    }
                }

                Err(ConnectionError::NoSharedMechanism)
            }
            method => Ok(method),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::smtp::config::{AuthMethod, SmtpConfig};
    use crate::smtp::stream::tests::{script, Script, StubConnector};

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "mail.test".to_string(),
            ..SmtpConfig::default()
        }
    }

    fn happy_script() -> Script {
        script(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250 AUTH LOGIN\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 2.7.0 authentication successful\r\n",
        ])
    }

    #[test]
    fn test_login_happy_path() {
        let connector = StubConnector::new(vec![happy_script()]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "s3cret".to_string());

        let outcome = task.run(&connector).unwrap();

        assert!(outcome.success);
        assert_eq!(235, outcome.response_code);
        assert_eq!("alice", outcome.username);
        assert_eq!("s3cret", outcome.password);
        assert_eq!(ConnectionState::AuthComplete, task.state());

        let sent = connector.sent();
        assert_eq!(1, sent.len());
        assert_eq!(
            vec![
                "EHLO localhost\r\n".to_string(),
                "AUTH LOGIN\r\n".to_string(),
                format!("{}\r\n", base64::encode("alice")),
                format!("{}\r\n", base64::encode("s3cret")),
            ],
            sent[0]
        );
    }

    #[test]
    fn test_rejection_with_multiline_reply() {
        let reply_text = "535-5.7.8 authentication failed\r\n535 5.7.8 try later\r\n";
        let connector = StubConnector::new(vec![script(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250 AUTH LOGIN\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            reply_text,
        ])]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "wrong".to_string());

        let outcome = task.run(&connector).unwrap();

        assert!(!outcome.success);
        assert_eq!(535, outcome.response_code);
        assert_eq!(reply_text, outcome.response_text);

        // A rejection is decisive; nothing is retried and QUIT is never sent
        let sent = connector.sent();
        assert_eq!(1, sent.len());
        assert!(sent[0].iter().all(|command| !command.starts_with("QUIT")));
    }

    #[test]
    fn test_starttls_reenters_ehlo() {
        let connector = StubConnector::new(vec![script(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250-STARTTLS\r\n250 AUTH LOGIN\r\n",
            "220 2.0.0 ready to start TLS\r\n",
            "250-mail.test\r\n250 AUTH LOGIN\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 2.7.0 authentication successful\r\n",
        ])]);
        let mut cfg = config();
        cfg.use_tls = true;
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "s3cret".to_string());

        let outcome = task.run(&connector).unwrap();

        assert!(outcome.success);
        assert_eq!(1, connector.upgrades.load(std::sync::atomic::Ordering::SeqCst));

        let sent = connector.sent();
        let ehlo_count = sent[0]
            .iter()
            .filter(|command| command.starts_with("EHLO"))
            .count();
        assert_eq!(2, ehlo_count);
        assert!(sent[0].iter().any(|command| command == "STARTTLS\r\n"));
    }

    #[test]
    fn test_refused_connection_is_retried() {
        let connector = StubConnector::new(vec![Script::Refuse, happy_script()]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "s3cret".to_string());

        let outcome = task.run(&connector).unwrap();

        assert!(outcome.success);
        // The refused attempt never produced a connection
        assert_eq!(1, connector.sent().len());
    }

    #[test]
    fn test_transient_rejection_exhausts_retry_budget() {
        let connector = StubConnector::repeating(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250 AUTH LOGIN\r\n",
            "454 4.7.0 temporary authentication failure\r\n",
        ]);
        let mut cfg = config();
        cfg.max_retries = 2;
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "s3cret".to_string());

        match task.run(&connector) {
            Err(ConnectionError::AuthInit(454)) => {}
            other => panic!("expected exhausted AUTH retries, got {:?}", other.map(|_| ())),
        }

        assert_eq!(3, connector.sent().len());
        assert_eq!(ConnectionState::Error, task.state());
    }

    #[test]
    fn test_permanent_auth_init_rejection_is_not_retried() {
        let connector = StubConnector::repeating(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250 AUTH LOGIN\r\n",
            "503 5.5.1 bad sequence of commands\r\n",
        ]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "s3cret".to_string());

        match task.run(&connector) {
            Err(ConnectionError::AuthInit(503)) => {}
            other => panic!("expected permanent rejection, got {:?}", other.map(|_| ())),
        }

        assert_eq!(1, connector.sent().len());
    }

    #[test]
    fn test_username_rejection_is_decisive() {
        let connector = StubConnector::new(vec![script(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250 AUTH LOGIN\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "535 5.7.8 authentication credentials invalid\r\n",
        ])]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "nosuchuser".to_string(), "pw".to_string());

        let outcome = task.run(&connector).unwrap();

        assert!(!outcome.success);
        assert_eq!(535, outcome.response_code);

        // Only the username crossed the wire
        let sent = connector.sent();
        assert_eq!(1, sent.len());
        assert_eq!(3, sent[0].len());
    }

    #[test]
    fn test_no_shared_mechanism_is_not_retried() {
        let connector = StubConnector::new(vec![script(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250 SIZE 10240000\r\n",
        ])]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "s3cret".to_string());

        match task.run(&connector) {
            Err(ConnectionError::NoSharedMechanism) => {}
            other => panic!("expected failed negotiation, got {:?}", other.map(|_| ())),
        }

        assert_eq!(1, connector.sent().len());
    }

    #[test]
    fn test_auto_negotiation_prefers_login() {
        let connector = StubConnector::new(vec![script(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250 AUTH CRAM-MD5 PLAIN LOGIN\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "535 5.7.8 no\r\n",
        ])]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "pw".to_string());

        task.run(&connector).unwrap();

        assert_eq!("AUTH LOGIN\r\n", connector.sent()[0][1]);
    }

    #[test]
    fn test_auto_negotiation_falls_back_to_plain() {
        let connector = StubConnector::new(vec![script(&[
            "220 mail.test ESMTP\r\n",
            "250-mail.test\r\n250 AUTH CRAM-MD5 PLAIN\r\n",
            "334 ok\r\n",
            "334 ok\r\n",
            "535 5.7.8 no\r\n",
        ])]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "pw".to_string());

        task.run(&connector).unwrap();

        assert_eq!("AUTH PLAIN\r\n", connector.sent()[0][1]);
    }

    #[test]
    fn test_configured_method_skips_negotiation() {
        let connector = StubConnector::new(vec![script(&[
            "220 mail.test ESMTP\r\n",
            "250 mail.test\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 2.7.0 ok\r\n",
        ])]);
        let mut cfg = config();
        cfg.auth_method = AuthMethod::Login;
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "s3cret".to_string());

        let outcome = task.run(&connector).unwrap();

        assert!(outcome.success);
    }

    #[test]
    fn test_bad_greeting_code_is_an_error() {
        let connector = StubConnector::new(vec![script(&["554 no service for you\r\n"])]);
        let cfg = config();
        let mut task = SmtpConnection::new(&cfg, "alice".to_string(), "pw".to_string());

        match task.run(&connector) {
            Err(ConnectionError::Greeting(554)) => {}
            other => panic!("expected greeting rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_outcome_classification_invariant() {
        for (reply_text, success, code) in [
            ("200 ok\r\n", true, 200),
            ("235 2.7.0 ok\r\n", true, 235),
            ("399 odd\r\n", true, 399),
            ("400 busy\r\n", false, 400),
            ("535 no\r\n", false, 535),
            ("garbage\r\n", false, 0),
        ] {
            let outcome = AuthOutcome::classify(reply_text, "u", "p");
            assert_eq!(success, outcome.success);
            assert_eq!(code, outcome.response_code);
            assert_eq!(
                outcome.success,
                (200..400).contains(&outcome.response_code)
            );
        }
    }
}
