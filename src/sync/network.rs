//! Peer-link transport.
//!
//! Accepts and initiates TCP links, exchanges self-introductions, then hands
//! the connection to a [`LinkCoordinator`]. Each link gets one reader loop,
//! which feeds the coordinator strictly in arrival order, and one writer
//! task draining the link's outbound queue.

use super::coordinator::LinkCoordinator;
use super::split::netsplit_reason;
use crate::config::LinkBlock;
use crate::error::LinkError;
use crate::state::Matrix;
use crate::telemetry::spans;
use futures_util::{SinkExt, StreamExt};
use linkd_proto::{Record, RecordBody, RecordCodec, ServerId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{Instrument, debug, error, info, warn};

/// How long to wait for the peer to introduce itself.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept inbound peer links until the listener fails.
pub async fn listen(matrix: Arc<Matrix>, addr: SocketAddr) -> Result<(), LinkError> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Listening for peer links");
    loop {
        let (stream, remote) = listener.accept().await?;
        debug!(peer = %remote, "Inbound peer connection");
        let matrix = matrix.clone();
        tokio::spawn(async move {
            if let Err(e) = run_link(matrix, stream, None).await {
                warn!(peer = %remote, error = %e, code = e.error_code(), "Inbound link failed");
            }
        });
    }
}

/// Open an outbound link described by `block` and run it to completion.
pub async fn connect(matrix: Arc<Matrix>, block: LinkBlock) -> Result<(), LinkError> {
    info!(name = %block.name, address = %block.address(), "Connecting to peer");
    let stream = TcpStream::connect(block.address()).await?;
    run_link(matrix, stream, Some(block)).await
}

/// Drive one connection: introductions, burst exchange, then deltas until
/// the link drops. Everything only reachable through the peer is split off
/// on the way out.
pub async fn run_link(
    matrix: Arc<Matrix>,
    stream: TcpStream,
    expected: Option<LinkBlock>,
) -> Result<(), LinkError> {
    let mut framed = Framed::new(stream, RecordCodec::new());
    framed.send(matrix.sync.self_intro()).await?;

    let (peer, name, description) =
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
            Ok(Some(record)) => accept_intro(&matrix, record?, expected.as_ref())?,
            Ok(None) => return Err(LinkError::Closed),
            Err(_) => return Err(LinkError::violation("no introduction before timeout")),
        };

    let span = spans::peer(peer.as_str(), &name);
    drive(matrix, framed, peer, name, description)
        .instrument(span)
        .await
}

/// Check the peer's self-introduction against our link blocks.
fn accept_intro(
    matrix: &Matrix,
    record: Record,
    expected: Option<&LinkBlock>,
) -> Result<(ServerId, String, String), LinkError> {
    let command = record.body.command();
    let RecordBody::Server {
        sid,
        name,
        description,
    } = record.body
    else {
        return Err(LinkError::violation(format!(
            "expected SERVER, got {}",
            command
        )));
    };
    if sid != record.source {
        return Err(LinkError::violation(format!(
            "introduction for {} sent by {}",
            sid, record.source
        )));
    }
    if sid == matrix.sync.local_id {
        return Err(LinkError::violation(format!("peer claims our SID {}", sid)));
    }

    let block = match expected {
        Some(block) if block.name.eq_ignore_ascii_case(&name) => block,
        Some(block) => {
            return Err(LinkError::violation(format!(
                "connected to {} but it introduced itself as {}",
                block.name, name
            )));
        }
        None => matrix
            .config
            .link_block(&name)
            .ok_or_else(|| LinkError::violation(format!("no link block for {}", name)))?,
    };
    if let Some(want) = &block.sid
        && want != sid.as_str()
    {
        return Err(LinkError::violation(format!(
            "{} introduced itself as {}, expected {}",
            name, sid, want
        )));
    }
    Ok((sid, name, description))
}

async fn drive(
    matrix: Arc<Matrix>,
    framed: Framed<TcpStream, RecordCodec>,
    peer: ServerId,
    name: String,
    description: String,
) -> Result<(), LinkError> {
    let (mut sink, mut stream) = framed.split();
    let (tx, mut rx) = mpsc::channel::<Record>(matrix.config.limits.link_queue_capacity);

    let mut coordinator = LinkCoordinator::new(matrix.clone(), peer.clone(), name.clone(), description);
    // Registration makes the link visible to broadcasts, which queue behind
    // the burst on `tx` until the writer starts.
    let burst = coordinator.handshake_complete(tx)?;
    for record in burst {
        if let Err(e) = sink.send(record).await {
            coordinator.link_lost(&e.to_string());
            return Err(e.into());
        }
    }

    let writer = tokio::spawn(
        async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = sink.send(record).await {
                    warn!(error = %e, "Write to peer failed");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let mut outcome = Ok(());
    while let Some(next) = stream.next().await {
        let result = match next {
            Ok(record) => coordinator.handle(record),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, code = e.error_code(), "Skipping record");
            }
            Err(e) => {
                error!(error = %e, code = e.error_code(), "Closing link");
                outcome = Err(e);
                break;
            }
        }
    }

    let reason = match &outcome {
        Ok(()) | Err(LinkError::Squit(_)) => netsplit_reason(&matrix.config.server.name, &name),
        Err(e) => e.to_string(),
    };
    if let Some(report) = coordinator.link_lost(&reason) {
        info!(
            servers = report.servers.len(),
            users = report.users.len(),
            "Peer link closed"
        );
    }
    writer.abort();

    match outcome {
        Err(LinkError::Squit(_)) => Ok(()),
        other => other,
    }
}

/// Keep every autoconnect link up, retrying after `retry` on failure.
pub async fn autoconnect(matrix: Arc<Matrix>, retry: Duration) {
    let blocks: Vec<LinkBlock> = matrix
        .config
        .links
        .iter()
        .filter(|l| l.autoconnect)
        .cloned()
        .collect();
    for block in blocks {
        let matrix = matrix.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = connect(matrix.clone(), block.clone()).await {
                    warn!(name = %block.name, error = %e, "Peer link ended");
                }
                tokio::time::sleep(retry).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn matrix(links: &str) -> Matrix {
        let toml = format!(
            r#"
            [server]
            name = "hub.straylight.net"
            sid = "00A"
            {links}
            "#
        );
        Matrix::new(Config::from_toml(&toml).unwrap())
    }

    fn intro(sid: &str, name: &str) -> Record {
        Record::new(
            ServerId::new(sid),
            RecordBody::Server {
                sid: ServerId::new(sid),
                name: name.into(),
                description: "leaf".into(),
            },
        )
    }

    const LEAF: &str = r#"
        [[links]]
        name = "leaf.straylight.net"
        hostname = "127.0.0.1"
        port = 7000
        sid = "00B"
    "#;

    #[test]
    fn accepts_configured_peer() {
        let m = matrix(LEAF);
        let (sid, name, _) = accept_intro(&m, intro("00B", "leaf.straylight.net"), None).unwrap();
        assert_eq!(sid.as_str(), "00B");
        assert_eq!(name, "leaf.straylight.net");
    }

    #[test]
    fn refuses_unknown_or_mismatched_peer() {
        let m = matrix(LEAF);
        assert!(accept_intro(&m, intro("00C", "other.straylight.net"), None).is_err());
        assert!(accept_intro(&m, intro("00C", "leaf.straylight.net"), None).is_err());
        assert!(accept_intro(&m, intro("00A", "leaf.straylight.net"), None).is_err());
    }

    #[test]
    fn refuses_intro_for_someone_else() {
        let m = matrix(LEAF);
        let mut record = intro("00B", "leaf.straylight.net");
        record.source = ServerId::new("00C");
        assert!(accept_intro(&m, record, None).is_err());
    }
}
