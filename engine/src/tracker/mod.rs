use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use url::Url;

mod http;
mod udp;

use http::HttpTracker;
use udp::UdpTracker;

pub type Result<T> = std::result::Result<T, TrackerError>;

// Fallback spacing between announces when a tracker never tells us its
// preferred interval.
const DEFAULT_MIN_ANNOUNCE_INTERVAL: u64 = 60;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("tracker request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("tracker io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error decoding tracker response: {0}")]
    Bencode(#[from] bencode::Error),

    #[error("tracker request timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("invalid tracker url")]
    InvalidUrl,

    #[error("tracker returned failure: {0}")]
    Failure(String),

    #[error("malformed tracker response: {0}")]
    Response(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    Completed,
    Stopped,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Started => write!(f, "started"),
            Event::Completed => write!(f, "completed"),
            Event::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnounceParams {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Option<Event>,
    pub num_want: Option<usize>,
    pub max_recv: usize,
}

// A single announce response, normalised across the HTTP and UDP wire
// formats so `Tracker` only needs to understand one shape.
pub(crate) struct AnnounceResponse {
    pub peers: Vec<SocketAddr>,
    pub interval: Option<u64>,
    pub min_interval: Option<u64>,
    pub tracker_id: Option<String>,
}

enum TrackerKind {
    Http(HttpTracker),
    Udp(UdpTracker),
}

/// One announce endpoint from a torrent's announce-list, dispatched over
/// HTTP(S) or UDP depending on the url scheme (BEP-15). Bookkeeping
/// (interval, tracker id, last announce time) lives here regardless of
/// which wire protocol is underneath.
pub struct Tracker {
    pub url: Url,
    kind: TrackerKind,
    pub tracker_id: Option<String>,
    pub last_announce: Option<Instant>,
    interval: Option<Duration>,
    min_interval: Option<Duration>,
}

impl Tracker {
    // Returns None for schemes we don't speak (e.g. the ws/wss webtorrent
    // trackers sometimes list) rather than erroring the whole tier out.
    pub fn new(url: Url) -> Option<Self> {
        let kind = match url.scheme() {
            "http" | "https" => TrackerKind::Http(HttpTracker::new()),
            "udp" => TrackerKind::Udp(UdpTracker::new()),
            other => {
                tracing::warn!("unsupported tracker scheme: {}", other);
                return None;
            }
        };

        Some(Self {
            url,
            kind,
            tracker_id: None,
            last_announce: None,
            interval: None,
            min_interval: None,
        })
    }

    // Whether enough time has passed since the last announce that we are
    // *allowed* to announce again (tracker's min_interval, or our own
    // default floor if it never told us one).
    pub fn can_announce(&self, time: Instant) -> bool {
        match self.last_announce {
            Some(last) => {
                time.duration_since(last)
                    >= self
                        .min_interval
                        .unwrap_or(Duration::from_secs(DEFAULT_MIN_ANNOUNCE_INTERVAL))
            }
            None => true,
        }
    }

    // Whether the tracker's preferred regular re-announce interval has
    // elapsed.
    pub fn should_announce(&self, time: Instant) -> bool {
        match self.last_announce {
            Some(last) => {
                time.duration_since(last)
                    >= self
                        .interval
                        .unwrap_or(Duration::from_secs(DEFAULT_MIN_ANNOUNCE_INTERVAL))
            }
            None => true,
        }
    }

    #[tracing::instrument(skip(self, params), fields(url = %self.url))]
    pub async fn send_announce(
        &mut self,
        params: AnnounceParams,
        timeout: Duration,
    ) -> Result<Vec<SocketAddr>> {
        let resp = match &mut self.kind {
            TrackerKind::Http(t) => {
                tokio::time::timeout(
                    timeout,
                    t.announce(&self.url, &params, self.tracker_id.as_deref()),
                )
                .await??
            }
            TrackerKind::Udp(t) => {
                tokio::time::timeout(timeout, t.announce(&self.url, &params, params.max_recv))
                    .await??
            }
        };

        self.last_announce = Some(Instant::now());
        if let Some(interval) = resp.interval {
            self.interval = Some(Duration::from_secs(interval));
        }
        if let Some(min_interval) = resp.min_interval {
            self.min_interval = Some(Duration::from_secs(min_interval));
        }
        if resp.tracker_id.is_some() {
            self.tracker_id = resp.tracker_id;
        }

        tracing::debug!("tracker provided {} peers", resp.peers.len());
        Ok(resp.peers)
    }
}
