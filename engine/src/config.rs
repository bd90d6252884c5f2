use std::path::PathBuf;

use crate::BLOCK_SIZE;

const DEFAULT_PEER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TRACKER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_NUMWANT: usize = 50;
const DEFAULT_PORT: u16 = 6881;
const DEFAULT_MAX_RECV: usize = 131_072;

/// Configuration for a single running torrent, built once at startup and
/// shared read-only with every peer session and tracker task. No ambient
/// globals: this record is threaded explicitly into the coordinator,
/// every peer session and the tracker client (spec's §9 "Global
/// configuration").
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// Client ID sent in the peer-wire handshake and tracker announces.
    pub peer_id: [u8; 20],

    /// Port reported to trackers in the announce request. This engine
    /// never accepts inbound peer connections (it never serves blocks),
    /// so the value is a fixed report rather than a real listen socket.
    pub port: u16,

    /// Block size requested from peers. Fixed at 16 KiB by convention, but
    /// kept configurable to match how the original protocol constant is
    /// threaded through the codebase.
    pub block_size: usize,

    /// Maximum bytes accepted in a single read: guards against a malicious
    /// or buggy peer claiming an enormous `Block` length, and sizes the UDP
    /// tracker's announce-response receive buffer.
    pub max_recv: usize,

    /// Time without a meaningful exchange (message sent or received) before
    /// a peer session is considered dead and torn down.
    pub peer_timeout: std::time::Duration,

    /// Time to wait for a tracker response before treating it as an error.
    pub tracker_timeout: std::time::Duration,

    /// Preferred number of peers to request per tracker announce.
    pub numwant: usize,

    /// Directory files are written into. For multi-file torrents this is
    /// the parent of the torrent's own named subdirectory.
    pub output_dir: PathBuf,
}

impl TorrentConfig {
    pub fn new(peer_id: [u8; 20], output_dir: PathBuf) -> Self {
        Self {
            peer_id,
            port: DEFAULT_PORT,
            block_size: BLOCK_SIZE,
            max_recv: DEFAULT_MAX_RECV,
            peer_timeout: std::time::Duration::from_secs(DEFAULT_PEER_TIMEOUT_SECS),
            tracker_timeout: std::time::Duration::from_secs(DEFAULT_TRACKER_TIMEOUT_SECS),
            numwant: DEFAULT_NUMWANT,
            output_dir,
        }
    }
}
