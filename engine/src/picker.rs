use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::{
    block::{block_len, num_blocks},
    info::TorrentInfo,
    Bitfield,
};

/// What happened to a piece as a result of a block delivery.
#[derive(Debug)]
pub enum DeliverOutcome {
    // More blocks of this piece are still outstanding.
    Incomplete,

    // The piece filled, hashed correctly, and is ready to be written out.
    Finalized(Vec<u8>),

    // The piece filled but its hash didn't match; its blocks were reset
    // and every block index was put back in the pending set.
    HashMismatch,
}

struct Inner {
    // blocks[p][b] holds the bytes of block b of piece p once delivered.
    blocks: Vec<Vec<Option<Vec<u8>>>>,

    filled_count: Vec<u32>,

    // piece_idx -> block indices not yet requested or delivered. A piece
    // disappears from this map once finalized.
    pending: HashMap<usize, HashSet<u32>>,
}

/// Piece/block bookkeeping for a single torrent, shared by every peer
/// session. Folds what spec's pending-work map and piece-block map
/// describe as separate locks into one mutex, since this engine never
/// needs to hold one without the other.
pub struct PieceTable {
    inner: Mutex<Inner>,
    piece_hashes: Vec<[u8; 20]>,
    piece_len: usize,
    last_piece_len: usize,
    num_pieces: usize,
}

impl PieceTable {
    pub fn new(info: &TorrentInfo, piece_hashes: Vec<[u8; 20]>) -> Self {
        let num_pieces = info.num_pieces as usize;
        let mut blocks = Vec::with_capacity(num_pieces);
        let mut filled_count = Vec::with_capacity(num_pieces);
        let mut pending = HashMap::with_capacity(num_pieces);

        for p in 0..num_pieces {
            let len = info.piece_length(p);
            let n = num_blocks(len);
            blocks.push(vec![None; n as usize]);
            filled_count.push(0);
            pending.insert(p, (0..n).collect());
        }

        Self {
            inner: Mutex::new(Inner { blocks, filled_count, pending }),
            piece_hashes,
            piece_len: info.piece_len,
            last_piece_len: info.last_piece_len,
            num_pieces,
        }
    }

    fn piece_length(&self, p: usize) -> usize {
        if p == self.num_pieces - 1 {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    pub fn block_len(&self, p: usize, b: u32) -> usize {
        block_len(self.piece_length(p), b as usize)
    }

    pub fn num_pieces(&self) -> usize {
        self.num_pieces
    }

    // First pending piece the peer has, with an arbitrary free block if
    // one is available. Matches the "first pending piece, arbitrary
    // block" scheduler policy: no rarest-first, no pipelining.
    pub async fn next_assignment(&self, bitfield: Option<&Bitfield>) -> (Option<usize>, Option<u32>) {
        let mut inner = self.inner.lock().await;

        let mut piece_idxs: Vec<usize> = inner.pending.keys().copied().collect();
        piece_idxs.sort_unstable();

        for p in piece_idxs {
            let has_piece = match bitfield {
                Some(bf) => bf.get(p).map(|b| *b).unwrap_or(false),
                // No bitfield observed yet: the source treats the peer as
                // having everything until proven otherwise (spec Open Question).
                None => true,
            };
            if !has_piece {
                continue;
            }

            let set = inner.pending.get_mut(&p).expect("key from pending keys");
            if let Some(&b) = set.iter().next() {
                set.remove(&b);
                return (Some(p), Some(b));
            }
            return (Some(p), None);
        }

        (None, None)
    }

    pub async fn return_assignment(&self, p: usize, b: u32) {
        let mut inner = self.inner.lock().await;
        if let Some(set) = inner.pending.get_mut(&p) {
            set.insert(b);
        }
    }

    #[tracing::instrument(skip(self, bytes), fields(piece = p, block = b, len = bytes.len()))]
    pub async fn deliver_block(&self, p: usize, b: u32, bytes: Vec<u8>) -> DeliverOutcome {
        let mut inner = self.inner.lock().await;

        let slot = &mut inner.blocks[p][b as usize];
        if slot.is_some() {
            // Duplicate delivery (e.g. the block was reassigned after a
            // timeout and two peers both answered); keep the first copy.
            return DeliverOutcome::Incomplete;
        }
        *slot = Some(bytes);
        inner.filled_count[p] += 1;

        let num_blocks = inner.blocks[p].len() as u32;
        if inner.filled_count[p] != num_blocks {
            return DeliverOutcome::Incomplete;
        }

        let mut piece_bytes = Vec::with_capacity(self.piece_length(p));
        for slot in &inner.blocks[p] {
            piece_bytes.extend_from_slice(slot.as_ref().expect("filled_count reached num_blocks"));
        }

        use sha1::Digest;
        let mut hasher = sha1::Sha1::new();
        hasher.update(&piece_bytes);
        let digest: [u8; 20] = hasher.finalize().into();

        if digest == self.piece_hashes[p] {
            inner.pending.remove(&p);
            inner.blocks[p] = Vec::new();
            tracing::debug!("piece {} verified", p);
            DeliverOutcome::Finalized(piece_bytes)
        } else {
            tracing::warn!("piece {} failed hash check, resetting", p);
            let n = num_blocks;
            inner.blocks[p] = vec![None; n as usize];
            inner.filled_count[p] = 0;
            inner.pending.insert(p, (0..n).collect());
            DeliverOutcome::HashMismatch
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn progress(&self) -> f64 {
        if self.num_pieces == 0 {
            return 1.0;
        }
        1.0 - (self.pending_count().await as f64 / self.num_pieces as f64)
    }

    pub async fn is_complete(&self) -> bool {
        self.inner.lock().await.pending.is_empty()
    }
}
