//! Inquest command line tool
//!
//! Runs an SMTP credential probe from username and password list files, or
//! decodes a raw DNS message file into a readable summary.

use std::env;
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use getopts::Options;

use inquest::dns::protocol::DnsMessage;
use inquest::smtp::config::{AuthMethod, ProbeParams, SmtpConfig};
use inquest::smtp::prober::{ProbeStatus, SmtpProber};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn read_lines(path: &str) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        Err(e) => {
            log::error!("failed to read {}: {}", path, e);
            process::exit(1);
        }
    }
}

fn decode_message(path: &str) {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            log::error!("failed to read {}: {}", path, e);
            process::exit(1);
        }
    };

    match DnsMessage::from_bytes(&data) {
        Ok(message) => {
            print!("{}", message.header);

            for question in &message.questions {
                print!("{}", question);
            }

            for rec in message
                .answers
                .iter()
                .chain(message.authorities.iter())
                .chain(message.additionals.iter())
            {
                println!("{:?}", rec);
            }
        }
        Err(e) => {
            log::error!("failed to decode {}: {}", path, e);
            process::exit(1);
        }
    }
}

fn main() {
    simple_logger::init().expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "x",
        "decode",
        "decode a raw DNS message file and exit",
        "FILE",
    );
    opts.optopt("s", "server", "SMTP server host", "HOST");
    opts.optopt("p", "port", "SMTP server port (default 25)", "PORT");
    opts.optopt("U", "userfile", "file with one username per line", "FILE");
    opts.optopt("P", "passfile", "file with one password per line", "FILE");
    opts.optopt(
        "m",
        "method",
        "authentication method: LOGIN, PLAIN, CRAM-MD5 or AUTO (default)",
        "METHOD",
    );
    opts.optopt(
        "c",
        "concurrency",
        "number of concurrent connections (default 10)",
        "COUNT",
    );
    opts.optopt("e", "ehlo", "EHLO domain (default localhost)", "DOMAIN");
    opts.optopt(
        "T",
        "timeout",
        "per-operation timeout in seconds (default 30)",
        "SECONDS",
    );
    opts.optflag("t", "starttls", "escalate the connection with STARTTLS");
    opts.optflag(
        "a",
        "all",
        "probe every pair instead of stopping at the first success",
    );

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(e) => {
            eprintln!("{}", e);
            print_usage(&program, opts);
            process::exit(1);
        }
    };

    if matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    if let Some(path) = matches.opt_str("x") {
        decode_message(&path);
        return;
    }

    let host = match matches.opt_str("s") {
        Some(host) => host,
        None => {
            print_usage(&program, opts);
            process::exit(1);
        }
    };

    let mut config = SmtpConfig {
        host,
        use_tls: matches.opt_present("t"),
        ..SmtpConfig::default()
    };

    if let Some(port) = matches.opt_str("p").and_then(|p| p.parse().ok()) {
        config.port = port;
    }
    if let Some(method) = matches.opt_str("m") {
        config.auth_method = AuthMethod::from_token(&method);
    }
    if let Some(ehlo_domain) = matches.opt_str("e") {
        config.ehlo_domain = ehlo_domain;
    }
    if let Some(seconds) = matches.opt_str("T").and_then(|t| t.parse().ok()) {
        config.timeout = Duration::from_secs(seconds);
    }

    let usernames = match matches.opt_str("U") {
        Some(path) => read_lines(&path),
        None => {
            log::error!("a username file is required (-U)");
            process::exit(1);
        }
    };
    let passwords = match matches.opt_str("P") {
        Some(path) => read_lines(&path),
        None => {
            log::error!("a password file is required (-P)");
            process::exit(1);
        }
    };

    let mut params = ProbeParams {
        usernames,
        passwords,
        stop_on_first_success: !matches.opt_present("a"),
        ..ProbeParams::default()
    };

    if let Some(parallelism) = matches.opt_str("c").and_then(|c| c.parse().ok()) {
        params.parallelism = parallelism;
    }

    let prober = SmtpProber::new(config, params);

    prober.set_success_callback(Arc::new(|outcome| {
        log::info!(
            "valid credential found: {}:{} (code {})",
            outcome.username,
            outcome.password,
            outcome.response_code
        );
    }));
    prober.set_progress_callback(Arc::new(|total, completed| {
        log::debug!("progress: {}/{}", completed, total);
    }));

    match prober.run() {
        Ok(report) => {
            match report.status {
                ProbeStatus::Completed => log::info!("probe completed"),
                ProbeStatus::StoppedEarly => log::info!("probe stopped early"),
                ProbeStatus::Aborted { reason } => log::warn!("probe aborted: {}", reason),
            }

            if report.outcomes.is_empty() {
                log::info!("no valid credentials found");
            }

            for outcome in &report.outcomes {
                println!(
                    "{}:{} ({})",
                    outcome.username, outcome.password, outcome.response_code
                );
            }
        }
        Err(e) => {
            log::error!("probe failed to start: {}", e);
            process::exit(1);
        }
    }
}
