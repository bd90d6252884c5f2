use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Mutex;

use crate::{
    config::TorrentConfig,
    fs::{Writer, WriterError},
    info::TorrentInfo,
    metainfo::MetaInfo,
    p2p::PeerSession,
    picker::{DeliverOutcome, PieceTable},
    stats::{format_speed, Counter},
    tracker::{AnnounceParams, Event, Tracker},
    Bitfield,
};

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("no peers found: every tracker announce URL failed or returned none")]
    NoPeersFound,

    #[error("writer error: {0}")]
    Writer(#[from] WriterError),
}

pub type Result<T> = std::result::Result<T, TorrentError>;

/// Peers known this run, split the way spec's §3 "Peer registry"
/// describes: actively connected, and blacklisted never to retry.
struct PeerRegistry {
    active: HashSet<SocketAddr>,
    blacklist: HashSet<SocketAddr>,
    last_observed_peer_count: usize,
}

#[derive(Default)]
struct Stats {
    downloaded: Counter,
}

/// Shared, read-mostly state every peer session holds a (non-owning)
/// reference to, and the narrow four-operation capability
/// (`next_assignment`/`return_assignment`/`deliver_block`/
/// `handle_disconnect`) spec's §9 "Cyclic references" calls for. The
/// coordinator (`Torrent`) outlives every peer session it spawns.
pub struct TorrentContext {
    pub info_hash: [u8; 20],
    pub config: TorrentConfig,
    torrent_info: TorrentInfo,
    piece_table: PieceTable,
    writer: Writer,
    trackers: Mutex<Vec<Vec<Tracker>>>,
    registry: Mutex<PeerRegistry>,
    stats: Mutex<Stats>,
    announced_started: AtomicBool,
}

impl TorrentContext {
    pub fn piece_table(&self) -> &PieceTable {
        &self.piece_table
    }

    pub async fn next_assignment(&self, bitfield: Option<&Bitfield>) -> (Option<usize>, Option<u32>) {
        self.piece_table.next_assignment(bitfield).await
    }

    pub async fn return_assignment(&self, p: usize, b: u32) {
        self.piece_table.return_assignment(p, b).await;
    }

    pub async fn deliver_block(&self, p: usize, b: u32, bytes: Vec<u8>) {
        let len = bytes.len() as u64;
        self.stats.lock().await.downloaded.add(len);

        match self.piece_table.deliver_block(p, b, bytes).await {
            DeliverOutcome::Finalized(piece_bytes) => {
                if let Err(e) = self.writer.write_piece(&self.torrent_info, p, &piece_bytes).await {
                    // Writer I/O errors are fatal per spec's §7; there is
                    // no recovery path for a torrent that can't persist
                    // what it downloads.
                    tracing::error!(piece = p, error = %e, "fatal write error");
                }
            }
            DeliverOutcome::HashMismatch => {
                tracing::warn!(piece = p, "hash mismatch, piece requeued");
            }
            DeliverOutcome::Incomplete => {}
        }
    }

    /// Removes `address` from the active set (and blacklists it if
    /// `is_bad`), and reports whether the population has fallen under
    /// 70% of its last observed peak (spec's §4.3 peer replenishment
    /// trigger).
    pub async fn handle_disconnect(&self, address: SocketAddr, is_bad: bool) -> bool {
        let mut reg = self.registry.lock().await;
        reg.active.remove(&address);
        if is_bad {
            reg.blacklist.insert(address);
        }
        (reg.active.len() as f64) < 0.7 * reg.last_observed_peer_count as f64
    }

    pub async fn progress(&self) -> f64 {
        self.piece_table.progress().await
    }

    pub async fn is_complete(&self) -> bool {
        self.piece_table.is_complete().await
    }

    pub async fn peer_count(&self) -> usize {
        self.registry.lock().await.active.len()
    }

    pub async fn tick_stats(&self) -> String {
        let mut stats = self.stats.lock().await;
        let speed = format_speed(stats.downloaded.avg());
        stats.downloaded.reset();
        speed
    }

    /// Tracker discovery: iterate announce tiers/URLs in order,
    /// returning the first non-empty peer list (spec's §4.1 algorithm).
    /// Fails with `NoPeersFound` only once every URL has been tried.
    async fn discover_peers(&self) -> Result<Vec<SocketAddr>> {
        let event = if self.announced_started.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Event::Started)
        };

        let now = std::time::Instant::now();
        let mut trackers = self.trackers.lock().await;
        for tier in trackers.iter_mut() {
            for tracker in tier.iter_mut() {
                if !tracker.can_announce(now) {
                    tracing::trace!(url = %tracker.url, "skipping tracker, min_interval not elapsed");
                    continue;
                }

                let params = AnnounceParams {
                    info_hash: self.info_hash,
                    peer_id: self.config.peer_id,
                    port: self.config.port,
                    uploaded: 0,
                    downloaded: 0,
                    left: self.torrent_info.total_len,
                    event,
                    num_want: Some(self.config.numwant),
                    max_recv: self.config.max_recv,
                };

                match tracker.send_announce(params, self.config.tracker_timeout).await {
                    Ok(peers) if !peers.is_empty() => return Ok(peers),
                    Ok(_) => tracing::debug!(url = %tracker.url, "tracker returned no peers"),
                    Err(e) => tracing::warn!(url = %tracker.url, error = %e, "tracker announce failed"),
                }
            }
        }

        Err(TorrentError::NoPeersFound)
    }

    async fn announce_stopped(&self) {
        let mut trackers = self.trackers.lock().await;
        if let Some(tracker) = trackers.iter_mut().flatten().next() {
            let params = AnnounceParams {
                info_hash: self.info_hash,
                peer_id: self.config.peer_id,
                port: self.config.port,
                uploaded: 0,
                downloaded: self.torrent_info.total_len,
                left: 0,
                event: Some(Event::Stopped),
                num_want: Some(0),
                max_recv: self.config.max_recv,
            };
            if let Err(e) = tracker.send_announce(params, self.config.tracker_timeout).await {
                tracing::debug!(error = %e, "stopped announce failed, ignoring");
            }
        }
    }

    /// Attempts a handshake with every candidate concurrently (so RTT
    /// doesn't serialize discovery, per spec §5), adds the ones that
    /// succeed to `active` and starts their download loop, blacklists
    /// the ones that don't. Returns how many peers were newly added.
    async fn connect_candidates(self: &Arc<Self>, candidates: Vec<SocketAddr>) -> usize {
        let candidates: Vec<SocketAddr> = {
            let reg = self.registry.lock().await;
            candidates
                .into_iter()
                .filter(|a| !reg.active.contains(a) && !reg.blacklist.contains(a))
                .collect()
        };

        if candidates.is_empty() {
            return 0;
        }

        let attempts = candidates.into_iter().map(|addr| {
            let ctx = self.clone();
            async move { (addr, PeerSession::connect(addr, ctx, None).await) }
        });
        let results = futures::future::join_all(attempts).await;

        let mut added = 0;
        let mut reg = self.registry.lock().await;
        for (addr, result) in results {
            match result {
                Ok(session) => {
                    reg.active.insert(addr);
                    added += 1;
                    tokio::spawn(session.run());
                }
                Err(e) => {
                    tracing::debug!(peer = %addr, error = %e, "candidate handshake failed");
                    reg.blacklist.insert(addr);
                }
            }
        }
        reg.last_observed_peer_count = reg.active.len().max(reg.last_observed_peer_count).max(1);
        added
    }

    /// Re-announces to the first tracker whose preferred interval has
    /// elapsed, picking up any fresh peers it returns. Called once per
    /// progress tick so a long-running download keeps its peer list
    /// topped up between replenishment rounds, per spec's §4.1 "regular
    /// reannounce" behaviour.
    async fn maybe_reannounce(self: &Arc<Self>) {
        let now = std::time::Instant::now();
        let peers = {
            let mut trackers = self.trackers.lock().await;
            let tracker = trackers
                .iter_mut()
                .flatten()
                .find(|t| t.last_announce.is_some() && t.should_announce(now));
            let tracker = match tracker {
                Some(t) => t,
                None => return,
            };

            let params = AnnounceParams {
                info_hash: self.info_hash,
                peer_id: self.config.peer_id,
                port: self.config.port,
                uploaded: 0,
                downloaded: 0,
                left: self.torrent_info.total_len,
                event: None,
                num_want: Some(self.config.numwant),
                max_recv: self.config.max_recv,
            };

            match tracker.send_announce(params, self.config.tracker_timeout).await {
                Ok(peers) => peers,
                Err(e) => {
                    tracing::debug!(url = %tracker.url, error = %e, "periodic reannounce failed");
                    return;
                }
            }
        };

        if !peers.is_empty() {
            self.connect_candidates(peers).await;
        }
    }

    /// Repeats tracker discovery + concurrent connects until the active
    /// population stops growing or a bounded number of rounds elapses
    /// (spec's §4.3 "Peer replenishment", with the Open Question's
    /// suggested bounded-retry addition).
    pub async fn replenish(self: &Arc<Self>) {
        const MAX_ROUNDS: u32 = 5;
        for _ in 0..MAX_ROUNDS {
            let peers = match self.discover_peers().await {
                Ok(peers) => peers,
                Err(e) => {
                    tracing::warn!(error = %e, "replenishment: tracker discovery failed");
                    return;
                }
            };
            if self.connect_candidates(peers).await == 0 {
                break;
            }
        }
    }
}

/// Owns the coordinator's shared context and drives the top-level
/// lifecycle: initial peer discovery, the progress ticker, and shutdown.
pub struct Torrent {
    ctx: Arc<TorrentContext>,
}

impl Torrent {
    pub fn new(metainfo: &MetaInfo, config: TorrentConfig) -> Result<Self> {
        let torrent_info = TorrentInfo::new(metainfo, config.output_dir.clone());
        let writer = Writer::new(&torrent_info)?;
        let piece_table = PieceTable::new(&torrent_info, metainfo.piece_hashes());
        let trackers = metainfo.trackers();

        let ctx = Arc::new(TorrentContext {
            info_hash: metainfo.info_hash(),
            config,
            torrent_info,
            piece_table,
            writer,
            trackers: Mutex::new(trackers),
            registry: Mutex::new(PeerRegistry {
                active: HashSet::new(),
                blacklist: HashSet::new(),
                last_observed_peer_count: 1,
            }),
            stats: Mutex::new(Stats::default()),
            announced_started: AtomicBool::new(false),
        });

        Ok(Self { ctx })
    }

    pub fn num_pieces(&self) -> usize {
        self.ctx.piece_table().num_pieces()
    }

    /// Runs the whole download to completion: discovers peers,
    /// connects, and reports progress on a fixed tick until every piece
    /// is verified and written, or the torrent gives up with
    /// `NoPeersFound`.
    pub async fn run(self) -> Result<()> {
        tracing::info!(pieces = self.num_pieces(), "starting torrent");

        let peers = self.ctx.discover_peers().await?;
        self.ctx.connect_candidates(peers).await;
        if self.ctx.peer_count().await == 0 {
            self.ctx.replenish().await;
        }
        if self.ctx.peer_count().await == 0 && !self.ctx.is_complete().await {
            return Err(TorrentError::NoPeersFound);
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            ticker.tick().await;
            let speed = self.ctx.tick_stats().await;
            let progress = self.ctx.progress().await;
            let peer_count = self.ctx.peer_count().await;

            tracing::info!(
                "{:>5.1}%  peers={}  {}",
                progress * 100.0,
                peer_count,
                speed
            );

            if self.ctx.is_complete().await {
                break;
            }
            if peer_count == 0 {
                self.ctx.replenish().await;
            } else {
                self.ctx.maybe_reannounce().await;
            }
        }

        tracing::info!("download complete");
        self.ctx.announce_stopped().await;
        Ok(())
    }
}
