use crate::error::{GeoproxError, Result};
use crate::types::{PointRecord, RecordId, SyncPolicy};
use bytes::{Buf, BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

const TAG_PUT: u8 = 0;
const TAG_REMOVE: u8 = 1;

/// AOF configuration
#[derive(Debug, Clone)]
pub struct AOFConfig {
    /// Compaction is due once the file grows past this many bytes
    pub rewrite_size_threshold: u64,
    /// When appended frames are forced to disk
    pub sync_policy: SyncPolicy,
}

impl Default for AOFConfig {
    fn default() -> Self {
        Self {
            rewrite_size_threshold: 64 * 1024 * 1024, // 64MB
            sync_policy: SyncPolicy::default(),
        }
    }
}

/// Append-only file holding one frame per record mutation.
///
/// Frame layout: `tag: u8`, `len: u32` (big endian), `payload`. A PUT payload
/// is the JSON encoded [`PointRecord`]; a REMOVE payload is the 16 id bytes.
pub struct AOFFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    config: AOFConfig,
    last_sync: Instant,
}

#[derive(Debug)]
pub enum AOFCommand {
    Put { record: PointRecord },
    Remove { id: RecordId },
}

impl AOFFile {
    /// Open AOF file with default configuration
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, AOFConfig::default())
    }

    /// Open AOF file with custom configuration
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: AOFConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);

        Ok(AOFFile {
            file,
            writer,
            path,
            size,
            config,
            last_sync: Instant::now(),
        })
    }

    /// Get current file size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file has outgrown the rewrite threshold
    pub fn needs_rewrite(&self) -> bool {
        self.size >= self.config.rewrite_size_threshold
    }

    /// Append a PUT frame for the full record
    pub fn write_put(&mut self, record: &PointRecord) -> Result<()> {
        let frame = encode(&AOFCommand::Put {
            record: record.clone(),
        })?;
        self.append(&frame)
    }

    /// Append a REMOVE frame
    pub fn write_remove(&mut self, id: &RecordId) -> Result<()> {
        let frame = encode(&AOFCommand::Remove { id: *id })?;
        self.append(&frame)
    }

    fn append(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame)?;
        self.size += frame.len() as u64;
        self.maybe_sync()
    }

    fn maybe_sync(&mut self) -> Result<()> {
        match self.config.sync_policy.interval() {
            Some(interval) if self.last_sync.elapsed() >= interval => self.sync(),
            Some(_) => self.flush(),
            None => Ok(()),
        }
    }

    /// Read every frame from the start of the file.
    ///
    /// A frame cut short by a crash ends the replay; the file is truncated to
    /// the last complete frame so later appends stay readable.
    pub fn replay(&mut self) -> Result<Vec<AOFCommand>> {
        self.writer.flush()?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut commands = Vec::new();
        let mut valid_len = 0u64;
        let mut truncated = false;
        {
            let mut reader = BufReader::new(&mut self.file);
            loop {
                match read_frame(&mut reader) {
                    Ok(Some((command, frame_len))) => {
                        commands.push(command);
                        valid_len += frame_len;
                    }
                    Ok(None) => break,
                    Err(GeoproxError::UnexpectedEof) => {
                        truncated = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if truncated {
            warn!(
                path = %self.path.display(),
                valid_len,
                size = self.size,
                "AOF ends with a partial frame, truncating"
            );
            self.file.set_len(valid_len)?;
            self.size = valid_len;
        }

        Ok(commands)
    }

    /// Replace the file with one PUT frame per live record.
    ///
    /// The compacted copy is written and fsynced next to the original, then
    /// renamed over it.
    pub fn rewrite<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a PointRecord>,
    {
        self.writer.flush()?;

        let rewrite_path = self.path.with_extension("aof.rewrite");
        let before = self.size;
        {
            let rewrite_file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&rewrite_path)?;
            let mut writer = BufWriter::new(rewrite_file);
            for record in records {
                let frame = encode(&AOFCommand::Put {
                    record: record.clone(),
                })?;
                writer.write_all(&frame)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        std::fs::rename(&rewrite_path, &self.path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)?;
        self.size = file.metadata()?.len();
        self.writer = BufWriter::new(file.try_clone()?);
        self.file = file;
        self.last_sync = Instant::now();

        info!(
            path = %self.path.display(),
            before,
            after = self.size,
            "AOF compacted"
        );
        Ok(())
    }

    /// Flush buffered writes to the OS
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        self.last_sync = Instant::now();
        Ok(())
    }
}

impl Drop for AOFFile {
    fn drop(&mut self) {
        // Best effort flush on drop, ignore errors
        let _ = self.writer.flush();
    }
}

fn encode(command: &AOFCommand) -> Result<Vec<u8>> {
    let (tag, payload) = match command {
        AOFCommand::Put { record } => (TAG_PUT, serde_json::to_vec(record)?),
        AOFCommand::Remove { id } => (TAG_REMOVE, id.as_bytes().to_vec()),
    };

    let len = u32::try_from(payload.len()).map_err(|_| {
        GeoproxError::Serialization(format!("frame of {} bytes is too large", payload.len()))
    })?;

    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(tag);
    buf.put_u32(len);
    buf.put_slice(&payload);
    Ok(buf.to_vec())
}

/// Read one frame; `Ok(None)` at a clean end of file.
fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(AOFCommand, u64)>> {
    let mut header = [0u8; 5];
    match reader.read(&mut header[..1]) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(e.into()),
    }
    read_exact(reader, &mut header[1..])?;

    let mut header = &header[..];
    let tag = header.get_u8();
    let len = header.get_u32() as usize;

    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload)?;

    let command = match tag {
        TAG_PUT => AOFCommand::Put {
            record: serde_json::from_slice(&payload)?,
        },
        TAG_REMOVE => {
            let bytes: [u8; 16] = payload
                .as_slice()
                .try_into()
                .map_err(|_| GeoproxError::InvalidFormat)?;
            AOFCommand::Remove {
                id: RecordId::from_bytes(bytes),
            }
        }
        _ => return Err(GeoproxError::InvalidFormat),
    };

    Ok(Some((command, 5 + len as u64)))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => GeoproxError::UnexpectedEof,
        _ => GeoproxError::Io(e),
    })
}
