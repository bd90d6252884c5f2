use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, time};
use tokio_util::codec::Framed;

use crate::{block::BlockInfo, torrent::TorrentContext};

use super::{
    handshake::{Handshake, HandshakeCodec, PROTOCOL},
    message::{Message, MessageCodec},
    state::SessionState,
    PeerError,
};

type Result<T> = std::result::Result<T, PeerError>;

// Bounded backoff applied when the coordinator reports a piece we could
// serve but whose blocks are all in flight with other peers (spec's
// Open Question: avoid a tight spin on `(p, None)`).
const NO_FREE_BLOCK_BACKOFF: Duration = Duration::from_millis(200);

/// One TCP session with a single remote peer. Drives the handshake,
/// then the receive loop and single-outstanding-request policy of
/// spec's §4.2. Never serves blocks: `request`/`cancel`/`port` are
/// accepted and ignored, per the engine's leecher-only Non-goals.
pub struct PeerSession {
    address: SocketAddr,
    ctx: Arc<TorrentContext>,
    framed: Framed<TcpStream, MessageCodec>,
    state: SessionState,
}

impl PeerSession {
    /// Attempts the TCP connect (if `socket` isn't already an accepted
    /// inbound stream) and the handshake. Returns `Err` on any failure;
    /// the caller never sees a half-built session to tear down.
    pub async fn connect(
        address: SocketAddr,
        ctx: Arc<TorrentContext>,
        socket: Option<TcpStream>,
    ) -> Result<Self> {
        let stream = match socket {
            Some(s) => s,
            None => time::timeout(ctx.config.peer_timeout, TcpStream::connect(address))
                .await
                .map_err(|_| PeerError::Timeout)??,
        };

        let mut handshake_framed = Framed::new(stream, HandshakeCodec);
        let handshake = Handshake::new(ctx.info_hash, ctx.config.peer_id);
        time::timeout(ctx.config.peer_timeout, handshake_framed.send(handshake))
            .await
            .map_err(|_| PeerError::Timeout)??;

        let received = time::timeout(ctx.config.peer_timeout, handshake_framed.next())
            .await
            .map_err(|_| PeerError::Timeout)?
            .ok_or(PeerError::NoHandshake)??;

        if received.protocol != PROTOCOL {
            return Err(PeerError::IncorrectProtocol);
        }
        if received.info_hash != ctx.info_hash {
            return Err(PeerError::IncorrectInfoHash);
        }

        tracing::info!(peer = %address, "handshake complete");
        let framed = Framed::new(handshake_framed.into_inner(), MessageCodec::new(ctx.config.max_recv));

        Ok(Self { address, ctx, framed, state: SessionState::default() })
    }

    /// Runs until there is no more work this peer can serve, the peer
    /// disconnects, or a protocol error occurs. Always reports the
    /// outcome to the coordinator before returning, including
    /// returning any block that was in flight when the session ended.
    #[tracing::instrument(name = "peer", skip(self), fields(addr = %self.address))]
    pub async fn run(mut self) {
        let result = self.run_download().await;

        if let Some((p, b)) = self.state.current_request.take() {
            self.ctx.return_assignment(p, b).await;
        }

        if let Err(e) = &result {
            tracing::warn!(peer = %self.address, error = %e, "peer session ended");
        } else {
            tracing::debug!(peer = %self.address, "peer session ended: no more work");
        }

        // Never having seen a bitfield/have from this peer is treated as
        // a bad peer for this run, per spec's failure-mode table.
        let is_bad = self.state.available_pieces.is_none();
        if self.ctx.handle_disconnect(self.address, is_bad).await {
            let ctx = self.ctx.clone();
            tokio::spawn(async move { ctx.replenish().await });
        }
    }

    async fn run_download(&mut self) -> Result<()> {
        loop {
            let (piece, block) = self
                .ctx
                .next_assignment(self.state.available_pieces.as_ref())
                .await;

            let (p, b) = match (piece, block) {
                (None, None) => return Ok(()),
                (Some(_), None) => {
                    time::sleep(NO_FREE_BLOCK_BACKOFF).await;
                    continue;
                }
                (Some(p), Some(b)) => (p, b),
            };

            self.state.current_request = Some((p, b));

            if self.state.peer_choking {
                if !self.state.self_interested {
                    self.send(Message::Interested).await?;
                    self.state.self_interested = true;
                }
                self.recv_one(self.ctx.config.peer_timeout).await?;
                if self.state.peer_choking {
                    // Still choked after a round: return the block and
                    // stop, there's nothing more this peer can do for us.
                    self.ctx.return_assignment(p, b).await;
                    self.state.current_request = None;
                    return Ok(());
                }
            }

            let block_len = self.ctx.piece_table().block_len(p, b);
            self.send(Message::Request(BlockInfo {
                piece_idx: p,
                offset: b as usize * self.ctx.config.block_size,
                len: block_len,
            }))
            .await?;

            let deadline = tokio::time::Instant::now() + self.ctx.config.peer_timeout;
            while self.state.current_request.is_some() {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    // Peer failed to deliver in time.
                    self.ctx.return_assignment(p, b).await;
                    self.state.current_request = None;
                    return Err(PeerError::Timeout);
                }
                self.recv_one(remaining).await?;
            }
        }
    }

    async fn send(&mut self, msg: Message) -> Result<()> {
        tracing::trace!(peer = %self.address, %msg, "send");
        self.framed.send(msg).await
    }

    async fn recv_one(&mut self, timeout: Duration) -> Result<()> {
        match time::timeout(timeout, self.framed.next()).await {
            Ok(Some(Ok(msg))) => {
                tracing::trace!(peer = %self.address, %msg, "recv");
                self.handle_message(msg).await
            }
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(PeerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed connection",
            ))),
            Err(_) => Err(PeerError::Timeout),
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Result<()> {
        match msg {
            Message::KeepAlive => {}
            Message::Choke => self.state.peer_choking = true,
            Message::Unchoke => self.state.peer_choking = false,
            // This client never serves blocks, so it has no use for
            // whether the peer is interested in it.
            Message::Interested | Message::NotInterested => {}

            Message::Have { idx } => {
                // Only update a bitfield that already exists; a peer that
                // never sent `bitfield` stays `None` ("has everything")
                // rather than being narrowed down to just this one piece.
                if let Some(bf) = self.state.available_pieces.as_mut() {
                    if (idx as usize) < bf.len() {
                        bf.set(idx as usize, true);
                    }
                }
            }

            Message::Bitfield(mut bf) => {
                let num_pieces = self.ctx.piece_table().num_pieces();
                // Trailing padding bits beyond num_pieces are discarded
                // rather than causing spurious assignments (spec B3).
                bf.resize(num_pieces, false);
                self.state.available_pieces = Some(bf);
            }

            Message::Block(block) => {
                let block_idx = (block.offset / self.ctx.config.block_size) as u32;
                if self.state.current_request == Some((block.piece_idx, block_idx)) {
                    self.state.current_request = None;
                    self.ctx.deliver_block(block.piece_idx, block_idx, block.data).await;
                }
                // Unsolicited or stale delivery: ignored, matches the
                // single-outstanding-request policy (no pipelining).
            }

            // This client never serves blocks.
            Message::Request(_) | Message::Cancel(_) | Message::Port { .. } => {}
        }

        Ok(())
    }
}
