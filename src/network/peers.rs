use log::{debug, warn};

use super::message::{Envelope, Outbound, Recipient};

/// Delivers outbound messages to the configured peers over HTTP.
/// Fire-and-forget: failures are logged and never reach the event loop.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    peers: Vec<String>,
    origin: String,
}

impl PeerClient {
    pub fn new(peers: Vec<String>, origin: String) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            peers,
            origin,
        }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Resolve a recipient to peer base URLs.
    pub fn recipients(&self, to: &Recipient) -> Vec<String> {
        match to {
            Recipient::All => self.peers.clone(),
            Recipient::AllExcept(origin) => self
                .peers
                .iter()
                .filter(|p| p.trim_end_matches('/') != origin.trim_end_matches('/'))
                .cloned()
                .collect(),
            Recipient::Peer(origin) => vec![origin.clone()],
        }
    }

    pub fn dispatch(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            let envelope = Envelope {
                origin: self.origin.clone(),
                message: out.message,
            };
            for peer in self.recipients(&out.to) {
                let url = format!("{}/api/v1/peer/", peer.trim_end_matches('/'));
                let http = self.http.clone();
                let envelope = envelope.clone();
                tokio::spawn(async move {
                    let command = envelope.message.command();
                    match http.post(&url).json(&envelope).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            debug!("sent {command} to {url}");
                        }
                        Ok(resp) => warn!("peer {url} refused {command}: {}", resp.status()),
                        Err(e) => warn!("could not reach peer {url}: {e}"),
                    }
                });
            }
        }
    }
}
