//! Per-follower update transport
//!
//! The dispatcher talks to followers through these traits: it starts one
//! asynchronous update RPC per follower, polls readiness without blocking,
//! and cancels on timeout or shutdown. `ping` is the synchronous liveness
//! probe behind `hint_server_down`.
//!
//! [`HttpTransport`] is the production implementation: updates are posted
//! as JSON to the follower's service locator from a dedicated thread per
//! in-flight RPC.

use crate::membership::id::ServerId;
use crate::membership::wire::ServerListUpdate;
use crate::{Error, Result};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Handle to one in-flight server-list update RPC.
pub trait UpdateRpc: Send {
    /// True once `wait` will return without blocking.
    fn is_ready(&mut self) -> bool;

    /// Block for the outcome. `Err(Error::ServerNotUp)` means the follower
    /// rejected the update because it is no longer part of the cluster.
    fn wait(&mut self) -> Result<()>;

    /// Abandon the RPC. The entry it was updating must be reverted by the
    /// caller; the transport only stops caring about the outcome.
    fn cancel(&mut self);
}

pub trait UpdateTransport: Send + Sync {
    /// Start sending `update` to the follower at `locator`.
    fn send_update(
        &self,
        target: ServerId,
        locator: &str,
        update: &ServerListUpdate,
    ) -> Box<dyn UpdateRpc>;

    /// Synchronously probe the server, returning true if it answered within
    /// `deadline`.
    fn ping(&self, target: ServerId, locator: &str, deadline: Duration) -> bool;
}

/// HTTP/JSON transport: updates go to `POST {locator}/server-list`, pings
/// to `GET {locator}/ping`. A follower that answers 410 Gone is treated as
/// no longer up.
pub struct HttpTransport;

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        HttpTransport::new()
    }
}

fn post_update(url: &str, body: Vec<u8>, target: ServerId) -> Result<()> {
    let client = reqwest::blocking::Client::new();
    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .map_err(|e| Error::Transport(e.to_string()))?;

    if response.status() == reqwest::StatusCode::GONE {
        return Err(Error::ServerNotUp(target));
    }
    if !response.status().is_success() {
        return Err(Error::Transport(format!(
            "update to {} failed with status {}",
            url,
            response.status()
        )));
    }
    Ok(())
}

impl UpdateTransport for HttpTransport {
    fn send_update(
        &self,
        target: ServerId,
        locator: &str,
        update: &ServerListUpdate,
    ) -> Box<dyn UpdateRpc> {
        let url = format!("{}/server-list", locator.trim_end_matches('/'));
        let (tx, rx) = mpsc::channel();

        match serde_json::to_vec(update) {
            Ok(body) => {
                thread::spawn(move || {
                    let _ = tx.send(post_update(&url, body, target));
                });
            }
            Err(e) => {
                let _ = tx.send(Err(Error::Transport(format!("encode failed: {}", e))));
            }
        }

        Box::new(HttpUpdateRpc {
            rx,
            outcome: None,
            cancelled: false,
        })
    }

    fn ping(&self, _target: ServerId, locator: &str, deadline: Duration) -> bool {
        let url = format!("{}/ping", locator.trim_end_matches('/'));
        // Run the probe on its own thread so callers inside an async runtime
        // are not blocked on reqwest's blocking client.
        let handle = thread::spawn(move || {
            let client = match reqwest::blocking::Client::builder().timeout(deadline).build() {
                Ok(client) => client,
                Err(_) => return false,
            };
            match client.get(&url).send() {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            }
        });
        handle.join().unwrap_or(false)
    }
}

struct HttpUpdateRpc {
    rx: mpsc::Receiver<Result<()>>,
    outcome: Option<Result<()>>,
    cancelled: bool,
}

impl UpdateRpc for HttpUpdateRpc {
    fn is_ready(&mut self) -> bool {
        if self.outcome.is_some() || self.cancelled {
            return true;
        }
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                true
            }
            Err(mpsc::TryRecvError::Empty) => false,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.outcome = Some(Err(Error::Transport("update rpc worker died".to_string())));
                true
            }
        }
    }

    fn wait(&mut self) -> Result<()> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        if self.cancelled {
            return Err(Error::Transport("update rpc cancelled".to_string()));
        }
        match self.rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Transport("update rpc worker died".to_string())),
        }
    }

    fn cancel(&mut self) {
        // The worker thread keeps running; its result is discarded when it
        // finds the channel closed.
        self.cancelled = true;
        self.outcome = None;
    }
}
