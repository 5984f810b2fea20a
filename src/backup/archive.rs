//! Archive codec
//!
//! Backups are stored as a tar stream under gzip, bzip2 or xz (or plain tar),
//! or as a zip file. `ArchiveWriter` and `ArchiveReader` hide the format so
//! capture, verification and restore only deal in relative paths and byte
//! streams.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{BackupError, BackupResult};
use crate::models::Compression;

/// Compressed byte sink under a tar builder
enum Encoder {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Bzip2(BzEncoder<BufWriter<File>>),
    Xz(XzEncoder<BufWriter<File>>),
}

impl Encoder {
    fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            Self::Plain(w) => w,
            Self::Gzip(e) => e.finish()?,
            Self::Bzip2(e) => e.finish()?,
            Self::Xz(e) => e.finish()?,
        };
        inner.flush()?;
        inner.get_ref().sync_all()
    }
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(e) => e.write(buf),
            Self::Bzip2(e) => e.write(buf),
            Self::Xz(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(e) => e.flush(),
            Self::Bzip2(e) => e.flush(),
            Self::Xz(e) => e.flush(),
        }
    }
}

enum WriterKind {
    Tar(tar::Builder<Encoder>),
    Zip(ZipWriter<BufWriter<File>>),
}

/// Writes files into a new archive
pub struct ArchiveWriter {
    path: PathBuf,
    kind: WriterKind,
    files: u64,
}

impl ArchiveWriter {
    /// Create the archive file
    pub fn create(path: &Path, compression: Compression) -> BackupResult<Self> {
        let file = File::create(path).map_err(|e| {
            BackupError::Io(format!("Failed to create archive {}: {}", path.display(), e))
        })?;
        let sink = BufWriter::new(file);

        let kind = match compression {
            Compression::None => WriterKind::Tar(tar::Builder::new(Encoder::Plain(sink))),
            Compression::Gzip => WriterKind::Tar(tar::Builder::new(Encoder::Gzip(
                GzEncoder::new(sink, flate2::Compression::default()),
            ))),
            Compression::Bzip2 => WriterKind::Tar(tar::Builder::new(Encoder::Bzip2(
                BzEncoder::new(sink, bzip2::Compression::new(6)),
            ))),
            Compression::Xz => {
                WriterKind::Tar(tar::Builder::new(Encoder::Xz(XzEncoder::new(sink, 6))))
            }
            Compression::Zip => WriterKind::Zip(ZipWriter::new(sink)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            files: 0,
        })
    }

    /// Append a file from disk under its archive path
    pub fn append_file(&mut self, relative: &str, source: &Path) -> BackupResult<()> {
        let context = |e: &dyn std::fmt::Display| {
            BackupError::Io(format!("Failed to archive {}: {}", source.display(), e))
        };

        match &mut self.kind {
            WriterKind::Tar(builder) => {
                builder
                    .append_path_with_name(source, relative)
                    .map_err(|e| context(&e))?;
            }
            WriterKind::Zip(zip) => {
                let mut file = File::open(source).map_err(|e| context(&e))?;
                let size = file.metadata().map_err(|e| context(&e))?.len();
                let options = FileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .large_file(size >= u32::MAX as u64);
                zip.start_file(relative, options).map_err(|e| context(&e))?;
                io::copy(&mut file, zip).map_err(|e| context(&e))?;
            }
        }

        self.files += 1;
        Ok(())
    }

    /// Number of files appended so far
    pub fn file_count(&self) -> u64 {
        self.files
    }

    /// Finish the archive and return its size in bytes
    pub fn finish(self) -> BackupResult<u64> {
        let finish_error =
            |e: &dyn std::fmt::Display| BackupError::Io(format!("Failed to finish archive: {}", e));

        match self.kind {
            WriterKind::Tar(builder) => {
                let encoder = builder.into_inner().map_err(|e| finish_error(&e))?;
                encoder.finish().map_err(|e| finish_error(&e))?;
            }
            WriterKind::Zip(mut zip) => {
                let mut inner = zip.finish().map_err(|e| finish_error(&e))?;
                inner.flush().map_err(|e| finish_error(&e))?;
            }
        }

        Ok(fs::metadata(&self.path)?.len())
    }
}

/// Reads files back out of an archive
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    path: PathBuf,
    compression: Compression,
}

impl ArchiveReader {
    /// Open an existing archive
    pub fn open(path: &Path, compression: Compression) -> BackupResult<Self> {
        if !path.is_file() {
            return Err(BackupError::NotFound {
                entity_type: "Archive",
                identifier: path.display().to_string(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            compression,
        })
    }

    /// Visit every regular file with its archive path and contents
    ///
    /// Decoding failures are reported as `Archive` errors; errors returned by
    /// `visit` are passed through unchanged.
    pub fn for_each_file<F>(&self, mut visit: F) -> BackupResult<()>
    where
        F: FnMut(&str, &mut dyn Read) -> BackupResult<()>,
    {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        if self.compression == Compression::Zip {
            let mut archive = ZipArchive::new(reader).map_err(|e| self.corrupt(&e))?;
            for index in 0..archive.len() {
                let mut entry = archive.by_index(index).map_err(|e| self.corrupt(&e))?;
                if entry.is_dir() {
                    continue;
                }
                let name = entry.name().to_string();
                visit(&name, &mut entry)?;
            }
            return Ok(());
        }

        let decoder: Box<dyn Read> = match self.compression {
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            Compression::None | Compression::Zip => Box::new(reader),
        };

        let mut archive = tar::Archive::new(decoder);
        for entry in archive.entries().map_err(|e| self.corrupt(&e))? {
            let mut entry = entry.map_err(|e| self.corrupt(&e))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .map_err(|e| self.corrupt(&e))?
                .to_string_lossy()
                .replace('\\', "/");
            visit(&name, &mut entry)?;
        }
        Ok(())
    }

    fn corrupt(&self, e: &dyn std::fmt::Display) -> BackupError {
        BackupError::Archive(format!("{} is unreadable: {}", self.path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const ALL: [Compression; 5] = [
        Compression::Gzip,
        Compression::Bzip2,
        Compression::Xz,
        Compression::Zip,
        Compression::None,
    ];

    fn read_all(reader: &ArchiveReader) -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        reader
            .for_each_file(|name, r| {
                let mut buf = Vec::new();
                r.read_to_end(&mut buf)?;
                files.insert(name.to_string(), buf);
                Ok(())
            })
            .unwrap();
        files
    }

    #[test]
    fn test_every_format_stores_nested_files() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join(".config/nvim")).unwrap();
        fs::write(src.join(".zshrc"), "bindkey -v").unwrap();
        fs::write(src.join(".config/nvim/init.lua"), "-- lua").unwrap();

        for compression in ALL {
            let path = temp.path().join(compression.archive_file_name());
            let mut writer = ArchiveWriter::create(&path, compression).unwrap();
            writer.append_file(".zshrc", &src.join(".zshrc")).unwrap();
            writer
                .append_file(".config/nvim/init.lua", &src.join(".config/nvim/init.lua"))
                .unwrap();
            assert_eq!(writer.file_count(), 2);
            let size = writer.finish().unwrap();
            assert!(size > 0);

            let reader = ArchiveReader::open(&path, compression).unwrap();
            let files = read_all(&reader);
            assert_eq!(files.len(), 2, "{}", compression);
            assert_eq!(files[".zshrc"], b"bindkey -v");
            assert_eq!(files[".config/nvim/init.lua"], b"-- lua");
        }
    }

    #[test]
    fn test_open_missing_archive() {
        let temp = TempDir::new().unwrap();
        let err = ArchiveReader::open(&temp.path().join("data.tar.gz"), Compression::Gzip)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_garbage_archive_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.tar.gz");
        fs::write(&path, b"definitely not gzip").unwrap();

        let reader = ArchiveReader::open(&path, Compression::Gzip).unwrap();
        let err = reader.for_each_file(|_, _| Ok(())).unwrap_err();
        assert!(matches!(err, BackupError::Archive(_)));
    }
}
