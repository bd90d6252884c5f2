use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

use bytes::{Buf, BufMut, BytesMut};
use tokio::net::UdpSocket;
use url::Url;

use super::{AnnounceParams, AnnounceResponse, Event, Result, TrackerError};

// Reference: https://www.bittorrent.org/beps/bep_0015.html
const PROTOCOL_ID: i64 = 0x41727101980;
const ACTION_CONNECT: i32 = 0;
const ACTION_ANNOUNCE: i32 = 1;

pub struct UdpTracker {
    socket: Option<UdpSocket>,
    conn_id: Option<i64>,
}

impl UdpTracker {
    pub fn new() -> Self {
        Self { socket: None, conn_id: None }
    }

    async fn connect(&mut self, url: &Url) -> Result<()> {
        let host = url.host_str().ok_or(TrackerError::InvalidUrl)?;
        let port = url.port().ok_or(TrackerError::InvalidUrl)?;
        let addr = (host, port).to_socket_addrs()?.next().ok_or(TrackerError::InvalidUrl)?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;

        let trans_id = rand::random();
        let mut buf = BytesMut::with_capacity(16);
        buf.put_i64(PROTOCOL_ID);
        buf.put_i32(ACTION_CONNECT);
        buf.put_i32(trans_id);
        socket.send(&buf).await?;

        let mut resp_buf = [0u8; 16];
        let n = socket.recv(&mut resp_buf).await?;
        if n < 16 {
            return Err(TrackerError::Response("connect response too short".to_string()));
        }
        let mut resp = &resp_buf[..];
        if resp.get_i32() != ACTION_CONNECT {
            return Err(TrackerError::Response("expected connect action".to_string()));
        }
        if resp.get_i32() != trans_id {
            return Err(TrackerError::Response("transaction id mismatch".to_string()));
        }
        self.conn_id = Some(resp.get_i64());
        self.socket = Some(socket);

        tracing::trace!("connected to udp tracker");
        Ok(())
    }

    pub async fn announce(
        &mut self,
        url: &Url,
        params: &AnnounceParams,
        max_recv: usize,
    ) -> Result<AnnounceResponse> {
        self.connect(url).await?;
        let socket = self.socket.as_ref().expect("connect sets socket");
        let conn_id = self.conn_id.expect("connect sets conn_id");

        let trans_id = rand::random();
        let mut buf = BytesMut::with_capacity(98);
        buf.put_i64(conn_id);
        buf.put_i32(ACTION_ANNOUNCE);
        buf.put_i32(trans_id);
        buf.put(&params.info_hash[..]);
        buf.put(&params.peer_id[..]);
        buf.put_u64(params.downloaded);
        buf.put_u64(params.left);
        buf.put_u64(params.uploaded);
        buf.put_i32(match params.event {
            Some(Event::Started) => 2,
            Some(Event::Completed) => 1,
            Some(Event::Stopped) => 3,
            None => 0,
        });
        buf.put_i32(0); // IP address, 0 = use the sender's.
        buf.put_i32(rand::random()); // Key.
        buf.put_i32(match params.num_want {
            Some(num_want) => num_want as i32,
            None => -1,
        });
        buf.put_u16(params.port);

        socket.send(&buf).await?;

        let mut resp_buf = vec![0u8; max_recv];
        let n = socket.recv(&mut resp_buf).await?;
        if n < 20 {
            return Err(TrackerError::Response("announce response too short".to_string()));
        }
        let mut resp = &resp_buf[..n];
        if resp.get_i32() != ACTION_ANNOUNCE {
            return Err(TrackerError::Response("expected announce action".to_string()));
        }
        if resp.get_i32() != trans_id {
            return Err(TrackerError::Response("transaction id mismatch".to_string()));
        }
        let interval = resp.get_i32() as u64;
        let _leechers = resp.get_i32();
        let _seeders = resp.get_i32();
        let num_peers = resp.remaining() / 6;

        let mut peers = Vec::with_capacity(num_peers);
        for _ in 0..num_peers {
            let ip = resp.get_u32();
            let port = resp.get_u16();
            peers.push(SocketAddr::new(Ipv4Addr::from(ip).into(), port));
        }

        tracing::info!("udp tracker provided {} peers", peers.len());
        Ok(AnnounceResponse { peers, interval: Some(interval), min_interval: None, tracker_id: None })
    }
}
