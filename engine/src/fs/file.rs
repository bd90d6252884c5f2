use std::{
    fs,
    io::{Seek, SeekFrom, Write},
    path,
};

use crate::info::FileInfo;

use super::Result;

#[derive(Debug)]
pub struct TorrentFile {
    pub info: FileInfo,

    pub handle: fs::File,
}

impl TorrentFile {
    // Opens (creating if absent) the file at its declared length, writing
    // a single zero byte at `length - 1` to preallocate on filesystems
    // that support sparse files.
    pub fn new(dir: &path::Path, info: FileInfo) -> Result<Self> {
        let path = dir.join(&info.path);
        tracing::info!("creating file: {:?}", &path);

        let mut handle = fs::OpenOptions::new().create(true).read(true).write(true).open(&path)?;

        if info.length > 0 {
            handle.seek(SeekFrom::Start(info.length as u64 - 1))?;
            handle.write_all(&[0u8])?;
            handle.seek(SeekFrom::Start(0))?;
        }

        Ok(Self { info, handle })
    }

    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.handle.seek(SeekFrom::Start(offset as u64))?;
        self.handle.write_all(data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preallocation_sets_length() {
        let dir = tempfile::tempdir().unwrap();
        let info = FileInfo { path: "a.bin".into(), length: 1000, offset: 0, md5sum: None };
        let file = TorrentFile::new(dir.path(), info).unwrap();
        assert_eq!(file.handle.metadata().unwrap().len(), 1000);
    }

    #[test]
    fn test_write_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let info = FileInfo { path: "a.bin".into(), length: 10, offset: 0, md5sum: None };
        let mut file = TorrentFile::new(dir.path(), info).unwrap();
        file.write_at(4, b"abcd").unwrap();
        let contents = fs::read(dir.path().join("a.bin")).unwrap();
        assert_eq!(&contents[4..8], b"abcd");
        assert_eq!(contents.len(), 10);
    }
}
