//! Shared helpers: in-process servers linked through their coordinators.
#![allow(dead_code)]

use linkd::config::Config;
use linkd::error::LinkError;
use linkd::state::{Matrix, User};
use linkd::sync::{LinkCoordinator, LinkState};
use linkd_proto::{Record, ServerId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A server named `<sid>.straylight.net`.
pub fn matrix(sid: &str) -> Arc<Matrix> {
    matrix_with(sid, "")
}

/// A server with extra TOML appended to its config.
pub fn matrix_with(sid: &str, extra: &str) -> Arc<Matrix> {
    let toml = format!(
        r#"
        [server]
        name = "{}"
        sid = "{sid}"
        description = "test server"
        {extra}
        "#,
        server_name(sid)
    );
    Arc::new(Matrix::new(Config::from_toml(&toml).expect("valid config")))
}

pub fn server_name(sid: &str) -> String {
    format!("{}.straylight.net", sid.to_lowercase())
}

/// A user owned by `sid`, e.g. `user("00A", "AAAAAB", "alice")`.
pub fn user(sid: &str, id: &str, nick: &str) -> User {
    User::new(
        format!("{sid}{id}"),
        nick,
        nick,
        format!("{nick}.example.net"),
        format!("{nick} realname"),
        1_000,
    )
}

/// One end of a link: the coordinator running on `local` for the peer, and
/// the queue of what `local` sends to the peer.
pub struct End {
    pub local: Arc<Matrix>,
    pub coordinator: LinkCoordinator,
    pub outbound: mpsc::Receiver<Record>,
    pub burst: Vec<Record>,
}

impl End {
    pub fn open(local: &Arc<Matrix>, peer: &Arc<Matrix>) -> Self {
        let peer_id = peer.sync.local_id.clone();
        let mut coordinator = LinkCoordinator::new(
            local.clone(),
            peer_id,
            peer.sync.local_name.clone(),
            peer.sync.local_desc.clone(),
        );
        let (tx, outbound) = mpsc::channel(1024);
        let burst = coordinator.handshake_complete(tx).expect("handshake");
        Self {
            local: local.clone(),
            coordinator,
            outbound,
            burst,
        }
    }

    pub fn state(&self) -> LinkState {
        self.coordinator.state()
    }

    pub fn peer(&self) -> &ServerId {
        self.coordinator.peer()
    }
}

/// Two servers linked in-process.
pub struct Link {
    pub a: End,
    pub b: End,
}

impl Link {
    /// Open both ends, then exchange bursts and any queued traffic.
    pub fn connect(a: &Arc<Matrix>, b: &Arc<Matrix>) -> Self {
        let mut link = Self::open(a, b);
        link.exchange_bursts().expect("bursts apply cleanly");
        link.pump().expect("queued traffic applies cleanly");
        link
    }

    /// Open both ends without exchanging anything yet.
    pub fn open(a: &Arc<Matrix>, b: &Arc<Matrix>) -> Self {
        Self {
            a: End::open(a, b),
            b: End::open(b, a),
        }
    }

    pub fn exchange_bursts(&mut self) -> Result<(), LinkError> {
        for record in std::mem::take(&mut self.a.burst) {
            self.b.coordinator.handle(record)?;
        }
        for record in std::mem::take(&mut self.b.burst) {
            self.a.coordinator.handle(record)?;
        }
        Ok(())
    }

    /// Deliver queued records in both directions until both queues are empty.
    pub fn pump(&mut self) -> Result<usize, LinkError> {
        let mut delivered = 0;
        loop {
            let mut moved = false;
            while let Ok(record) = self.a.outbound.try_recv() {
                self.b.coordinator.handle(record)?;
                delivered += 1;
                moved = true;
            }
            while let Ok(record) = self.b.outbound.try_recv() {
                self.a.coordinator.handle(record)?;
                delivered += 1;
                moved = true;
            }
            if !moved {
                return Ok(delivered);
            }
        }
    }
}
