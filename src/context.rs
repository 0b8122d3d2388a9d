use std::time::{Duration, Instant};

use tonic::metadata::MetadataMap;
use tonic::Request;

use crate::{Error, Result};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Deadline of one inbound call, captured when the call arrives.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// Captures the deadline a client attached to `request`.
    pub fn from_request<T>(request: &Request<T>) -> Self {
        Self::from_metadata(request.metadata())
    }

    /// Captures the deadline from raw call metadata.
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        let deadline = metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_timeout)
            .and_then(|timeout| Instant::now().checked_add(timeout));

        Self { deadline }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// When the call must finish, if the client set a deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with [`Error::DeadlineExceeded`] once the deadline has passed.
    pub fn check(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Parses a `grpc-timeout` value: up to eight digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
fn parse_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    let amount = digits.parse::<u64>().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };

    Some(timeout)
}
