use std::{ops::Range, path::PathBuf};

use serde_derive::{Deserialize, Serialize};

use crate::metainfo::MetaInfo;

/// File information as derived from metainfo, with its absolute byte
/// offset into the torrent filled in.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename = "File")]
pub struct FileInfo {
    #[serde(deserialize_with = "crate::de::path_deserialize")]
    pub path: PathBuf,

    pub length: usize,

    // Offset in bytes from the start of the torrent, viewed as one
    // contiguous array of all files concatenated in metainfo order.
    #[serde(skip)]
    pub offset: usize,

    #[serde(default)]
    pub md5sum: Option<String>,
}

impl FileInfo {
    // Half-open byte range [offset, offset + length) for this file within
    // the whole torrent.
    pub fn byte_range(&self) -> Range<usize> {
        self.offset..(self.offset + self.length)
    }

    pub fn last_byte(&self) -> usize {
        self.offset + self.length
    }
}

/// Derived layout facts about a torrent: total length, piece geometry and
/// the file list with offsets computed, plus where to write output.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    pub total_len: u64,

    pub piece_len: usize,

    // Length of the final piece, always <= piece_len.
    pub last_piece_len: usize,

    pub num_pieces: u32,

    pub files: Vec<FileInfo>,

    pub output_dir: PathBuf,
}

impl TorrentInfo {
    pub fn new(metainfo: &MetaInfo, output_dir: PathBuf) -> Self {
        let total_len = metainfo.total_len();
        let num_pieces = metainfo.num_pieces();
        let piece_len = metainfo.piece_len();
        let last_piece_len = (total_len - (piece_len as u64 * (num_pieces as u64 - 1))) as usize;
        let files = metainfo.files();
        let output_dir = if metainfo.is_multi_file() {
            output_dir.join(metainfo.name())
        } else {
            output_dir
        };

        Self { total_len, piece_len, last_piece_len, num_pieces, files, output_dir }
    }

    pub fn piece_length(&self, idx: usize) -> usize {
        if idx as u32 == self.num_pieces - 1 {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    pub fn piece_byte_offset(&self, piece_idx: usize) -> usize {
        piece_idx * self.piece_len
    }

    // Indices of the first and last file a piece overlaps, as a range.
    pub fn piece_file_intersections(&self, piece_idx: usize) -> Range<usize> {
        debug_assert!(piece_idx < self.num_pieces as usize, "piece index out of bounds");

        if self.files.len() == 1 {
            return 0..1;
        }

        let offset = piece_idx * self.piece_len;
        // Last byte is exclusive; use offset + len - 1 so it still lands
        // within the last file's range rather than one past the end.
        let end = offset + self.piece_length(piece_idx) - 1;

        let start_file = self
            .files
            .iter()
            .position(|f| f.byte_range().contains(&offset))
            .expect("piece byte offset exceeds file length");

        let end_file = self.files[start_file..]
            .iter()
            .position(|f| f.byte_range().contains(&end))
            .map(|idx| start_file + idx)
            .expect("piece last byte exceeds torrent length");

        start_file..(end_file + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::tests::write_test_torrent;

    #[test]
    fn test_piece_file_intersections_single_file() {
        let (_dir, path) = write_test_torrent(false);
        let metainfo = MetaInfo::new(&path).unwrap();
        let info = TorrentInfo::new(&metainfo, std::path::PathBuf::from("out"));
        assert_eq!(info.piece_file_intersections(0), 0..1);
    }

    #[test]
    fn test_piece_file_intersections_multi_file() {
        let (_dir, path) = write_test_torrent(true);
        let metainfo = MetaInfo::new(&path).unwrap();
        let info = TorrentInfo::new(&metainfo, std::path::PathBuf::from("out"));
        // With two files of unequal size, the middle piece should
        // straddle the boundary between them.
        let boundary_piece = info.files[0].length / info.piece_len;
        let range = info.piece_file_intersections(boundary_piece);
        assert!(range.len() >= 1);
        assert!(range.start <= 1 && range.end <= info.files.len());
    }
}
