//! Black-box end-to-end scenarios run against the public `engine` API:
//! a mock HTTP tracker and a mock TCP peer stand in for the network,
//! and a real `Torrent` downloads through them.

use std::time::Duration;

use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use engine::{MetaInfo, Torrent, TorrentConfig};

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
const PIECE_LEN: u32 = 16_384;

#[derive(Serialize)]
struct TestInfo {
    name: String,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(rename = "piece length")]
    piece_length: u32,
    length: u64,
}

#[derive(Serialize)]
struct TestMetaInfo {
    announce: String,
    info: TestInfo,
}

fn write_single_file_torrent(dir: &std::path::Path, announce: &str, data: &[u8]) -> std::path::PathBuf {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let hash: [u8; 20] = hasher.finalize().into();

    let metainfo = TestMetaInfo {
        announce: announce.to_string(),
        info: TestInfo {
            name: "scenario.bin".to_string(),
            pieces: hash.to_vec(),
            piece_length: PIECE_LEN,
            length: data.len() as u64,
        },
    };

    let path = dir.join("scenario.torrent");
    let encoded = bencode::encode_to_raw(&metainfo).unwrap();
    std::fs::write(&path, encoded).unwrap();
    path
}

// A minimal single-announce HTTP tracker: replies to any request with a
// bencoded dict pointing to one compact peer record.
async fn run_fake_tracker(listener: TcpListener, peer_addr: std::net::SocketAddr) {
    loop {
        let Ok((mut socket, _)) = listener.accept().await else { return };
        let peer_addr = peer_addr;
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            // Read until the request's terminating blank line; a GET with
            // no body always fits in one read for these tests.
            let _ = socket.read(&mut buf).await;

            let compact = match peer_addr.ip() {
                std::net::IpAddr::V4(v4) => {
                    let mut bytes = v4.octets().to_vec();
                    bytes.extend_from_slice(&peer_addr.port().to_be_bytes());
                    bytes
                }
                _ => unreachable!("test peers are always v4"),
            };

            let mut body = Vec::new();
            body.extend_from_slice(b"d8:intervali1800e5:peers6:");
            body.extend_from_slice(&compact);
            body.push(b'e');

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        });
    }
}

async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.expect("read frame length");
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.expect("read frame payload");
    (payload[0], payload[1..].to_vec())
}

async fn send_frame(stream: &mut TcpStream, id: u8, payload: &[u8]) {
    let len = (payload.len() + 1) as u32;
    stream.write_all(&len.to_be_bytes()).await.unwrap();
    stream.write_all(&[id]).await.unwrap();
    stream.write_all(payload).await.unwrap();
}

async fn do_handshake(stream: &mut TcpStream, expected_info_hash: &[u8; 20]) {
    let mut handshake = [0u8; 68];
    stream.read_exact(&mut handshake).await.expect("read handshake");
    assert_eq!(handshake[0], 19);
    assert_eq!(&handshake[1..20], PROTOCOL);
    assert_eq!(&handshake[28..48], expected_info_hash);

    let mut reply = Vec::with_capacity(68);
    reply.push(19);
    reply.extend_from_slice(PROTOCOL);
    reply.extend_from_slice(&[0u8; 8]);
    reply.extend_from_slice(expected_info_hash);
    reply.extend_from_slice(&[9u8; 20]); // arbitrary remote peer_id
    stream.write_all(&reply).await.unwrap();
}

// S1: a single peer owning the whole (single-piece) torrent delivers it
// on first request; the downloaded file matches byte-for-byte.
#[tokio::test]
async fn scenario_single_piece_single_file_download() {
    let data = vec![7u8; PIECE_LEN as usize];
    let mut hasher = Sha1::new();
    hasher.update(&data);
    let data_hash: [u8; 20] = hasher.finalize().into();

    let tmp = tempfile::tempdir().unwrap();
    let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();
    let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tracker_addr = tracker_listener.local_addr().unwrap();

    let announce = format!("http://{}/announce", tracker_addr);
    let torrent_path = write_single_file_torrent(tmp.path(), &announce, &data);
    let metainfo = MetaInfo::new(&torrent_path).unwrap();
    let expected_info_hash = metainfo.info_hash();
    // Sanity: the piece hash baked into the torrent is the data's own hash.
    assert_eq!(metainfo.piece_hashes()[0], data_hash);

    tokio::spawn(run_fake_tracker(tracker_listener, peer_addr));

    let piece_data = data.clone();
    tokio::spawn(async move {
        let (mut stream, _) = peer_listener.accept().await.unwrap();
        do_handshake(&mut stream, &expected_info_hash).await;

        let (id, _) = read_frame(&mut stream).await;
        assert_eq!(id, 2, "expected Interested before being unchoked");
        send_frame(&mut stream, 1, &[]).await; // Unchoke

        let (id, payload) = read_frame(&mut stream).await;
        assert_eq!(id, 6, "expected Request");
        let piece_idx = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let offset = u32::from_be_bytes(payload[4..8].try_into().unwrap());
        assert_eq!(piece_idx, 0);
        assert_eq!(offset, 0);

        let mut block_payload = Vec::with_capacity(8 + piece_data.len());
        block_payload.extend_from_slice(&0u32.to_be_bytes());
        block_payload.extend_from_slice(&0u32.to_be_bytes());
        block_payload.extend_from_slice(&piece_data);
        send_frame(&mut stream, 7, &block_payload).await;

        // Keep the socket alive briefly so the session's next
        // `next_assignment` call (which should return (None, None)) has
        // time to observe completion before we drop the stream.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let out_dir = tempfile::tempdir().unwrap();
    let config = TorrentConfig::new([1u8; 20], out_dir.path().to_path_buf());
    let torrent = Torrent::new(&metainfo, config).unwrap();

    tokio::time::timeout(Duration::from_secs(10), torrent.run())
        .await
        .expect("download did not finish in time")
        .expect("download failed");

    let written = std::fs::read(out_dir.path().join("scenario.bin")).unwrap();
    assert_eq!(written, data);
}

// S2: the first delivered block fails the hash check; the piece is reset
// and re-requested, and the second (correct) delivery completes it.
#[tokio::test]
async fn scenario_hash_mismatch_then_retry_succeeds() {
    let good = vec![3u8; PIECE_LEN as usize];
    let bad = vec![4u8; PIECE_LEN as usize];

    let tmp = tempfile::tempdir().unwrap();
    let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();
    let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tracker_addr = tracker_listener.local_addr().unwrap();

    let announce = format!("http://{}/announce", tracker_addr);
    let torrent_path = write_single_file_torrent(tmp.path(), &announce, &good);
    let metainfo = MetaInfo::new(&torrent_path).unwrap();
    let expected_info_hash = metainfo.info_hash();

    tokio::spawn(run_fake_tracker(tracker_listener, peer_addr));

    tokio::spawn(async move {
        let (mut stream, _) = peer_listener.accept().await.unwrap();
        do_handshake(&mut stream, &expected_info_hash).await;

        let (id, _) = read_frame(&mut stream).await;
        assert_eq!(id, 2);
        send_frame(&mut stream, 1, &[]).await; // Unchoke

        for payload_bytes in [&bad, &good] {
            let (id, payload) = read_frame(&mut stream).await;
            assert_eq!(id, 6, "expected Request");
            let piece_idx = u32::from_be_bytes(payload[0..4].try_into().unwrap());
            assert_eq!(piece_idx, 0);

            let mut block_payload = Vec::with_capacity(8 + payload_bytes.len());
            block_payload.extend_from_slice(&0u32.to_be_bytes());
            block_payload.extend_from_slice(&0u32.to_be_bytes());
            block_payload.extend_from_slice(payload_bytes);
            send_frame(&mut stream, 7, &block_payload).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let out_dir = tempfile::tempdir().unwrap();
    let config = TorrentConfig::new([2u8; 20], out_dir.path().to_path_buf());
    let torrent = Torrent::new(&metainfo, config).unwrap();

    tokio::time::timeout(Duration::from_secs(10), torrent.run())
        .await
        .expect("download did not finish in time")
        .expect("download failed");

    let written = std::fs::read(out_dir.path().join("scenario.bin")).unwrap();
    assert_eq!(written, good);
}

// S6: the first announce URL is unreachable; the fallback URL still
// yields peers and the download proceeds rather than failing NoPeersFound.
#[tokio::test]
async fn scenario_tracker_fallback_after_unreachable_primary() {
    let data = vec![5u8; PIECE_LEN as usize];

    let tmp = tempfile::tempdir().unwrap();
    let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();
    let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tracker_addr = tracker_listener.local_addr().unwrap();

    // A bound-but-never-accepting listener simulates an unreachable first
    // tracker: connections queue but the HTTP client's timeout fires.
    let dead_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead_listener.local_addr().unwrap();
    // Drop immediately: nothing listens on this port anymore, so connect
    // fails fast with ConnectionRefused rather than requiring a timeout.
    drop(dead_listener);

    let torrent_path = tmp.path().join("scenario.torrent");

    // Build the torrent directly with an announce-list: a dead primary
    // tier and a working fallback tier.
    #[derive(Serialize)]
    struct InfoWithList {
        name: String,
        #[serde(with = "serde_bytes")]
        pieces: Vec<u8>,
        #[serde(rename = "piece length")]
        piece_length: u32,
        length: u64,
    }
    #[derive(Serialize)]
    struct MetaInfoWithList {
        announce: String,
        #[serde(rename = "announce-list")]
        announce_list: Vec<Vec<String>>,
        info: InfoWithList,
    }

    let mut hasher = Sha1::new();
    hasher.update(&data);
    let hash: [u8; 20] = hasher.finalize().into();

    let dead_announce = format!("http://{}/announce", dead_addr);
    let fallback_announce = format!("http://{}/announce", tracker_addr);
    let metainfo_with_list = MetaInfoWithList {
        announce: dead_announce.clone(),
        announce_list: vec![vec![dead_announce], vec![fallback_announce]],
        info: InfoWithList {
            name: "scenario.bin".to_string(),
            pieces: hash.to_vec(),
            piece_length: PIECE_LEN,
            length: data.len() as u64,
        },
    };
    std::fs::write(&torrent_path, bencode::encode_to_raw(&metainfo_with_list).unwrap()).unwrap();

    let metainfo = MetaInfo::new(&torrent_path).unwrap();
    let expected_info_hash = metainfo.info_hash();

    tokio::spawn(run_fake_tracker(tracker_listener, peer_addr));

    tokio::spawn(async move {
        let (mut stream, _) = peer_listener.accept().await.unwrap();
        do_handshake(&mut stream, &expected_info_hash).await;

        let (id, _) = read_frame(&mut stream).await;
        assert_eq!(id, 2);
        send_frame(&mut stream, 1, &[]).await;

        let (id, payload) = read_frame(&mut stream).await;
        assert_eq!(id, 6);
        let _ = payload;

        let mut block_payload = Vec::with_capacity(8 + data.len());
        block_payload.extend_from_slice(&0u32.to_be_bytes());
        block_payload.extend_from_slice(&0u32.to_be_bytes());
        block_payload.extend_from_slice(&data);
        send_frame(&mut stream, 7, &block_payload).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let out_dir = tempfile::tempdir().unwrap();
    let config = TorrentConfig::new([3u8; 20], out_dir.path().to_path_buf());
    let torrent = Torrent::new(&metainfo, config).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), torrent.run()).await;
    assert!(result.expect("download did not finish in time").is_ok());
}
