//! Peer Probe
//!
//! Plain HTTP request against the peer's replication endpoint before the
//! local cluster becomes a follower. A peer that refuses the connection or
//! drops it without answering is taken to be active.
//!
//! A peer that is simply down also refuses connections, so a `PeerActive`
//! outcome can be a false negative.

use crate::domain::ports::{PeerProbe, ProbeOutcome};
use async_trait::async_trait;
use reqwest::Client;
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, info};

/// reqwest-backed [`PeerProbe`]
#[derive(Clone)]
pub struct HttpPeerProbe {
    http: Client,
}

impl HttpPeerProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(timeout: Duration) -> crate::error::Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl PeerProbe for HttpPeerProbe {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        match self.http.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                info!("Peer [{}] answered with status {}", url, status);
                ProbeOutcome::Responded(status)
            }
            Err(e) if refused_or_closed(&e) => {
                debug!("Peer [{}] refused the connection: {}", url, e);
                ProbeOutcome::PeerActive
            }
            Err(e) => {
                info!("Peer [{}] cannot be reached: {}", url, e);
                ProbeOutcome::Unreachable(e.to_string())
            }
        }
    }
}

/// Connection refused, reset, or closed before a response arrived
fn refused_or_closed(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        if let Some(hyper_error) = cause.downcast_ref::<hyper::Error>() {
            if hyper_error.is_incomplete_message() {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
