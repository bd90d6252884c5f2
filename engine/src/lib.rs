#![allow(dead_code)]

mod block;
mod config;
mod de;
mod fs;
mod info;
mod metainfo;
mod p2p;
mod picker;
mod stats;
mod torrent;
mod tracker;

const BLOCK_SIZE: usize = 0x4000;

type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

pub use config::TorrentConfig;
pub use metainfo::{MetaInfo, MetaInfoError};
pub use stats::{format_speed, Counter};
pub use torrent::{Torrent, TorrentError};
