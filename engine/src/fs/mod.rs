use std::sync::Mutex;

use crate::info::TorrentInfo;

mod file;

pub use file::TorrentFile;

#[derive(thiserror::Error, Debug)]
pub enum WriterError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("writer mutex poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for WriterError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        WriterError::Poisoned
    }
}

pub type Result<T> = std::result::Result<T, WriterError>;

/// Maps finalized piece bytes onto the declared output file(s) at their
/// correct byte offsets. This client never serves blocks to other peers,
/// so unlike a full client's disk layer there is no read path here.
#[derive(Debug)]
pub struct Writer {
    files: Vec<Mutex<TorrentFile>>,
}

impl Writer {
    pub fn new(info: &TorrentInfo) -> Result<Self> {
        if !info.output_dir.is_dir() {
            std::fs::create_dir_all(&info.output_dir)?;
            tracing::info!("created output directory: {:?}", info.output_dir);
        }

        debug_assert!(!info.files.is_empty());
        let mut files = Vec::with_capacity(info.files.len());
        for file_info in &info.files {
            let path = info.output_dir.join(&file_info.path);
            if let Some(subdir) = path.parent() {
                if !subdir.exists() {
                    tracing::info!("creating sub-directory: {:?}", subdir);
                    std::fs::create_dir_all(subdir)?;
                }
            }
            files.push(Mutex::new(TorrentFile::new(&info.output_dir, file_info.clone())?));
        }

        Ok(Self { files })
    }

    // Walks the file list starting at the piece's global byte offset,
    // writing into each file until either it or the piece is exhausted.
    pub async fn write_piece(&self, torrent_info: &TorrentInfo, piece_idx: usize, bytes: &[u8]) -> Result<()> {
        let range = torrent_info.piece_file_intersections(piece_idx);
        let mut offset = torrent_info.piece_byte_offset(piece_idx);
        let mut remaining = bytes;

        for file_mutex in &self.files[range] {
            if remaining.is_empty() {
                break;
            }
            let mut file = file_mutex.lock()?;
            let byte_range = file.info.byte_range();
            if offset >= byte_range.end {
                continue;
            }
            let file_offset = offset - byte_range.start;
            let space_in_file = byte_range.end - offset;
            let n = remaining.len().min(space_in_file);
            file.write_at(file_offset, &remaining[..n])?;
            remaining = &remaining[n..];
            offset += n;
        }

        debug_assert!(remaining.is_empty(), "piece bytes not fully written to files");
        tracing::debug!("piece {} written to disk", piece_idx);
        Ok(())
    }
}
