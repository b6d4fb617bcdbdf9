//! Configuration records for the SMTP prober

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

/// SMTP authentication mechanism
///
/// `Auto` defers the choice to the EHLO negotiation, which picks the first
/// server-advertised mechanism in the order below. A mechanism can be
/// converted to its wire token using the `token` method, and back using the
/// `from_token` function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    Login,
    Plain,
    CramMd5,
    Auto,
}

impl AuthMethod {
    /// Token named in the `AUTH <METHOD>` command
    pub fn token(&self) -> &'static str {
        match *self {
            AuthMethod::Login => "LOGIN",
            AuthMethod::Plain => "PLAIN",
            AuthMethod::CramMd5 => "CRAM-MD5",
            AuthMethod::Auto => "LOGIN",
        }
    }

    pub fn from_token(token: &str) -> AuthMethod {
        match token.to_uppercase().as_str() {
            "LOGIN" => AuthMethod::Login,
            "PLAIN" => AuthMethod::Plain,
            "CRAM-MD5" => AuthMethod::CramMd5,
            _ => AuthMethod::Auto,
        }
    }
}

/// Settings for a single target server, shared by every connection task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub auth_method: AuthMethod,
    pub use_tls: bool,
    pub timeout: Duration,
    pub max_retries: u16,
    pub ehlo_domain: String,
}

impl Default for SmtpConfig {
    fn default() -> SmtpConfig {
        SmtpConfig {
            host: String::new(),
            port: 25,
            auth_method: AuthMethod::Auto,
            use_tls: false,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            ehlo_domain: "localhost".to_string(),
        }
    }
}

/// The credential lists and concurrency settings of one probe run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeParams {
    pub usernames: Vec<String>,
    pub passwords: Vec<String>,
    pub parallelism: u16,
    pub stop_on_first_success: bool,
}

impl Default for ProbeParams {
    fn default() -> ProbeParams {
        ProbeParams {
            usernames: Vec::new(),
            passwords: Vec::new(),
            parallelism: 10,
            stop_on_first_success: true,
        }
    }
}

impl ProbeParams {
    /// Size of the username and password cartesian product
    pub fn total_attempts(&self) -> usize {
        self.usernames.len() * self.passwords.len()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_method_tokens() {
        assert_eq!("LOGIN", AuthMethod::Login.token());
        assert_eq!("PLAIN", AuthMethod::Plain.token());
        assert_eq!("CRAM-MD5", AuthMethod::CramMd5.token());
    }

    #[test]
    fn test_method_from_token() {
        assert_eq!(AuthMethod::Login, AuthMethod::from_token("LOGIN"));
        assert_eq!(AuthMethod::Login, AuthMethod::from_token("login"));
        assert_eq!(AuthMethod::Plain, AuthMethod::from_token("Plain"));
        assert_eq!(AuthMethod::CramMd5, AuthMethod::from_token("CRAM-MD5"));
        assert_eq!(AuthMethod::Auto, AuthMethod::from_token("DIGEST-MD5"));
    }

    #[test]
    fn test_defaults() {
        let config = SmtpConfig::default();

        assert_eq!(25, config.port);
        assert_eq!(AuthMethod::Auto, config.auth_method);
        assert!(!config.use_tls);
        assert_eq!(Duration::from_secs(30), config.timeout);
        assert_eq!(3, config.max_retries);
        assert_eq!("localhost", config.ehlo_domain);

        let params = ProbeParams::default();

        assert_eq!(10, params.parallelism);
        assert!(params.stop_on_first_success);
        assert_eq!(0, params.total_attempts());
    }
}
