//! Parsing helpers for SMTP reply lines
//!
//! A reply consists of one or more lines, each opening with a 3-digit code.
//! Continuation lines carry a `-` in column 4; the final line carries a
//! space there. Codes 2xx and 3xx are non-error, 4xx transient, 5xx
//! permanent.

/// The leading 3-digit code of a reply, or 0 when it cannot be parsed
pub fn response_code(reply: &str) -> u16 {
    let bytes = reply.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(|b| b.is_ascii_digit()) {
        return 0;
    }

    reply[..3].parse().unwrap_or(0)
}

/// Whether a reply carries a non-error code
pub fn is_positive(reply: &str) -> bool {
    (200..400).contains(&response_code(reply))
}

/// Whether the accumulated bytes form a complete reply
///
/// Receivers must keep reading until the final line arrives; a reply is
/// complete once its last received line terminates with CRLF and has a
/// space in column 4.
pub fn is_complete(reply: &str) -> bool {
    if !reply.ends_with('\n') {
        return false;
    }

    match reply.lines().next_back() {
        Some(line) => {
            let bytes = line.as_bytes();
            bytes.len() >= 4
                && bytes[..3].iter().all(|b| b.is_ascii_digit())
                && bytes[3] == b' '
        }
        None => false,
    }
}

/// Mechanisms advertised in the `AUTH` capability line of an EHLO reply
pub fn auth_mechanisms(reply: &str) -> Vec<String> {
    for line in reply.lines() {
        let rest = match line.get(4..) {
            Some(rest) => rest,
            None => continue,
        };

        if let Some(tokens) = rest.strip_prefix("AUTH ") {
            return tokens
                .split_whitespace()
                .map(|token| token.to_uppercase())
                .collect();
        }
    }

    Vec::new()
}
