use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Buf;
use serde::de;
use serde_derive::Deserialize;
use url::Url;

use super::{AnnounceParams, AnnounceResponse, Result, TrackerError};

pub struct HttpTracker {
    client: reqwest::Client,
}

impl HttpTracker {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    pub async fn announce(
        &mut self,
        url: &Url,
        params: &AnnounceParams,
        tracker_id: Option<&str>,
    ) -> Result<AnnounceResponse> {
        let mut request_url = format!(
            "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&no_peer_id=1",
            url.as_str(),
            urlencoding::encode_binary(&params.info_hash),
            urlencoding::encode_binary(&params.peer_id),
            params.port,
            params.uploaded,
            params.downloaded,
            params.left,
        );
        if let Some(event) = params.event {
            request_url.push_str(&format!("&event={}", event));
        }
        if let Some(num_want) = params.num_want {
            request_url.push_str(&format!("&numwant={}", num_want));
        }
        if let Some(tracker_id) = tracker_id {
            request_url.push_str(&format!("&tracker_id={}", tracker_id));
        }
        tracing::debug!("announce url: {}", request_url);

        let raw_resp = self.client.get(request_url).send().await?.bytes().await?;
        let resp: HttpResponse = bencode::decode_bytes(&raw_resp)?;
        tracing::debug!("announce response: {:#?}", resp);

        if let Some(failure) = resp.failure_reason {
            return Err(TrackerError::Failure(failure));
        }
        if let Some(warning) = resp.warning_message {
            tracing::warn!("tracker warning: {}", warning);
        }

        Ok(AnnounceResponse {
            peers: resp.peers,
            interval: resp.interval,
            min_interval: resp.min_interval,
            tracker_id: resp.tracker_id,
        })
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct HttpResponse {
    // If present, then no other keys may be present. A human-readable
    // error message as to why the request failed.
    #[serde(rename = "failure reason")]
    pub failure_reason: Option<String>,

    // Similar to failure reason, but the response still gets processed.
    #[serde(rename = "warning message")]
    pub warning_message: Option<String>,

    // Seconds the client should wait between regular announces.
    pub interval: Option<u64>,

    // Clients must not reannounce more frequently than this.
    #[serde(rename = "min interval")]
    pub min_interval: Option<u64>,

    // String the client should echo back on its next announce.
    #[serde(rename = "tracker id")]
    pub tracker_id: Option<String>,

    pub complete: Option<u64>,

    pub incomplete: Option<u64>,

    #[serde(default)]
    #[serde(deserialize_with = "peer_deserialize")]
    pub peers: Vec<SocketAddr>,
}

// The tracker can return either a compacted peer string or a list of
// dictionaries, regardless of what the `compact` request parameter asked
// for, so both models are accepted on decode.
fn peer_deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<SocketAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct PeerVisitor;

    impl<'de> de::Visitor<'de> for PeerVisitor {
        type Value = Vec<SocketAddr>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string of bytes or a list of dictionaries")
        }

        // Compact model: 4 bytes IP + 2 bytes port, big-endian, repeated.
        fn visit_bytes<E>(self, mut v: &[u8]) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.len() % 6 != 0 {
                return Err(E::custom("peer string not a multiple of 6 bytes"));
            }

            let num_peers = v.len() / 6;
            let mut peers = Vec::with_capacity(num_peers);
            for _ in 0..num_peers {
                peers.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(v.get_u32())), v.get_u16()));
            }

            Ok(peers)
        }

        // Dictionary model: a list of {ip, port} dicts.
        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            #[derive(Deserialize)]
            struct PeerItem {
                ip: String,
                port: u16,
            }

            let mut peers = Vec::new();
            while let Some(peer) = seq.next_element::<PeerItem>()? {
                let ip = match peer.ip.parse::<Ipv4Addr>() {
                    Ok(ip) => SocketAddr::new(IpAddr::V4(ip), peer.port),
                    Err(_) => continue,
                };
                peers.push(ip);
            }

            Ok(peers)
        }
    }

    deserializer.deserialize_any(PeerVisitor)
}
