//! `TcpConnectVerifier`: a host and port must accept a TCP connection.

use std::time::Duration;

use async_trait::async_trait;
use fig_types::SettingValue;
use tokio::net::TcpStream;

use crate::verifier::{VerificationOutcome, Verifier, VerifierError, string_arg};

pub struct TcpConnectVerifier {
    timeout: Duration,
}

impl TcpConnectVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn port_arg(args: &[SettingValue], index: usize) -> Result<u16, VerifierError> {
    let port = match args.get(index) {
        Some(SettingValue::String(s)) => s.trim().parse::<i64>().ok(),
        Some(value) => value.as_i64(),
        None => None,
    };
    port.and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p != 0)
        .ok_or_else(|| VerifierError::invalid_argument("Port", "expected a port number"))
}

#[async_trait]
impl Verifier for TcpConnectVerifier {
    fn name(&self) -> &str {
        "TcpConnectVerifier"
    }

    fn description(&self) -> &str {
        "Checks that a TCP connection to the host and port can be opened"
    }

    fn property_arguments(&self) -> &[&'static str] {
        &["Host", "Port"]
    }

    async fn run(&self, args: &[SettingValue]) -> Result<VerificationOutcome, VerifierError> {
        let host = string_arg(args, 0, "Host")?;
        let port = port_arg(args, 1)?;

        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => Ok(VerificationOutcome::passed(format!(
                "Connected to {host}:{port}"
            ))),
            Ok(Err(e)) => Ok(VerificationOutcome::failed(format!(
                "Could not connect to {host}:{port}: {e}"
            ))),
            Err(_) => Ok(VerificationOutcome::failed(format!(
                "Connecting to {host}:{port} timed out after {} ms",
                self.timeout.as_millis()
            ))),
        }
    }
}
