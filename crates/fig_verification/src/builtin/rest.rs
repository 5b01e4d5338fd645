//! `Rest200OkVerifier`: an HTTP GET against a URI must return 200.

use std::time::Duration;

use async_trait::async_trait;
use fig_types::SettingValue;

use crate::verifier::{VerificationOutcome, Verifier, VerifierError, string_arg};

pub struct Rest200OkVerifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl Rest200OkVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Verifier for Rest200OkVerifier {
    fn name(&self) -> &str {
        "Rest200OkVerifier"
    }

    fn description(&self) -> &str {
        "Checks that an HTTP GET to the URI returns 200 OK"
    }

    fn property_arguments(&self) -> &[&'static str] {
        &["Uri"]
    }

    async fn run(&self, args: &[SettingValue]) -> Result<VerificationOutcome, VerifierError> {
        let uri = string_arg(args, 0, "Uri")?;
        let url = reqwest::Url::parse(uri)
            .map_err(|e| VerifierError::invalid_argument("Uri", e.to_string()))?;

        let response = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(VerificationOutcome::failed(format!(
                    "Request to {uri} timed out after {} ms",
                    self.timeout.as_millis()
                )));
            }
            Err(e) => {
                return Ok(VerificationOutcome::failed(format!(
                    "Request to {uri} failed: {e}"
                )));
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            Ok(VerificationOutcome::passed(format!("{uri} returned 200 OK")))
        } else {
            Ok(VerificationOutcome::failed(format!(
                "{uri} returned {status}, expected 200 OK"
            )))
        }
    }
}
