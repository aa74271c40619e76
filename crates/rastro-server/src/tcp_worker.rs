//! TCP ingress: plain-text line-oriented frames from Suntech devices and
//! Coban GPRS units. Message boundary is the transport-delivered line; there
//! is no length framing.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rastro_domain::{
    InboundSmsRouter, Reconciler, Tracker, TrackerModel, TrackerRegistry, TrackerRepository,
};
use rastro_protocol::{classify, coban, suntech, FrameKind, SuntechFrame};

const PROVISIONED_UPDATE_INTERVAL_SECS: u64 = 60;

pub struct TcpWorkerDeps {
    pub registry: Arc<TrackerRegistry>,
    pub trackers: Arc<dyn TrackerRepository>,
    pub reconciler: Arc<dyn Reconciler>,
    pub router: Arc<InboundSmsRouter>,
}

pub async fn run_tcp_listener(
    bind: String,
    deps: Arc<TcpWorkerDeps>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind tcp listener on {bind}"))?;
    serve_connections(listener, deps, token).await
}

/// Accept loop over an already bound listener.
pub async fn serve_connections(
    listener: TcpListener,
    deps: Arc<TcpWorkerDeps>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "tcp server listening");
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "tcp connected");
                    tokio::spawn(handle_connection(stream, peer, deps.clone(), token.clone()));
                }
                Err(e) => warn!(error = %e, "tcp accept failed"),
            },
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    deps: Arc<TcpWorkerDeps>,
    token: CancellationToken,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(frame)) => {
                    debug!(peer = %peer, frame = %frame, "tcp ->");
                    handle_frame(&frame, &mut writer, &deps, peer).await;
                }
                Ok(None) => {
                    info!(peer = %peer, "tcp disconnected");
                    break;
                }
                Err(e) => {
                    error!(peer = %peer, error = %e, "tcp connection error");
                    break;
                }
            },
        }
    }
}

async fn handle_frame(
    frame: &str,
    writer: &mut OwnedWriteHalf,
    deps: &TcpWorkerDeps,
    peer: SocketAddr,
) {
    match classify(frame) {
        FrameKind::Suntech => match suntech::parse_frame(frame) {
            Ok(Some(parsed)) => {
                ensure_suntech_tracker(deps, &parsed).await;

                if let Err(e) = deps
                    .reconciler
                    .reconcile(&parsed.device_id, parsed.sample.clone())
                    .await
                {
                    error!(device_id = %parsed.device_id, error = %e, "failed to reconcile suntech frame");
                }

                if parsed.requires_ack() {
                    let ack = parsed.ack();
                    match writer.write_all(ack.as_bytes()).await {
                        Ok(()) => debug!(peer = %peer, ack = %ack, "tcp <-"),
                        Err(e) => error!(device_id = %parsed.device_id, error = %e, "failed to send ack"),
                    }
                }
            }
            Ok(None) => debug!(peer = %peer, "suntech frame type ignored"),
            Err(e) => warn!(peer = %peer, error = %e, "malformed suntech frame"),
        },
        FrameKind::Coban => match coban::parse_tcp_frame(frame) {
            Ok(parsed) => {
                let tracker = match deps.registry.get(&parsed.identification).await {
                    Some(tracker) => Some(tracker),
                    None => {
                        deps.registry
                            .find_by_identification(&parsed.identification)
                            .await
                    }
                };
                match tracker {
                    Some(tracker) => {
                        if let Err(e) = deps.router.route_report(&tracker, &parsed.body).await {
                            error!(tracker = %tracker.name, error = %e, "failed to route coban frame");
                        }
                    }
                    None => {
                        warn!(identification = %parsed.identification, "coban frame from unknown tracker");
                    }
                }
            }
            Err(e) => warn!(peer = %peer, error = %e, "malformed coban frame"),
        },
        FrameKind::Unknown => {
            warn!(peer = %peer, "unknown data structure received from tcp connection");
        }
        FrameKind::Noise => {}
    }
}

/// First sighting of an unknown Suntech device id creates the tracker with
/// defaults; the change feed then mirrors it into every instance's registry.
async fn ensure_suntech_tracker(deps: &TcpWorkerDeps, frame: &SuntechFrame) {
    if deps.registry.get(&frame.device_id).await.is_some() {
        return;
    }

    match deps.trackers.get_tracker(&frame.device_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            info!(device_id = %frame.device_id, "new suntech tracker detected, provisioning");
            let tracker = Tracker {
                id: frame.device_id.clone(),
                name: format!("ST940 #{}", frame.device_id),
                model: TrackerModel::St940,
                identification: frame.device_id.clone(),
                update_interval_secs: PROVISIONED_UPDATE_INTERVAL_SECS,
                last_check: None,
                last_update: None,
                last_coordinate: None,
                last_coordinate_type: None,
                battery_level: None,
                signal_level: None,
            };
            if let Err(e) = deps.trackers.upsert_tracker(tracker).await {
                error!(device_id = %frame.device_id, error = %e, "failed to provision tracker");
            }
        }
        Err(e) => {
            warn!(device_id = %frame.device_id, error = %e, "tracker lookup failed");
        }
    }
}
