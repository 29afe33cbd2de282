use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info};

use crate::documents::{DataInfo, DataInfoContent, FileInfo};
use crate::error::{MffError, Result};
use crate::schema::{registry, DocumentContent, XmlSchema};
use crate::tree::write_tree;
use crate::types::BlockKind;
use crate::{MAX_CHANNELS, MFF_EXTENSION, SAMPLE_DEPTH_BITS};

/// 采样率占 depth_rate 字的高 24 位
const MAX_SAMPLING_RATE: u32 = (1 << 24) - 1;

/// Encoder for one binary signal stream.
///
/// Blocks are appended in memory. The first block, and every block whose
/// sample count differs from the one before it, gets a key header; the rest
/// get a one-word continuation header.
///
/// ```rust
/// use mffio::BinWriter;
///
/// let mut writer = BinWriter::new(1000, 2)?;
/// writer.add_block(&[vec![0.0f32; 500], vec![1.0f32; 500]])?;
/// writer.add_block(&[vec![0.0f32; 500], vec![1.0f32; 500]])?;
/// writer.add_block(&[vec![0.0f32; 20], vec![1.0f32; 20]])?;
/// assert_eq!(writer.num_blocks(), 3);
/// assert_eq!(writer.num_samples(), 1020);
/// # Ok::<(), mffio::MffError>(())
/// ```
#[derive(Debug, Clone)]
pub struct BinWriter {
    sampling_rate: u32,
    num_channels: usize,
    bytes: Vec<u8>,
    kinds: Vec<BlockKind>,
    last_block_samples: Option<usize>,
    num_samples: u64,
}

impl BinWriter {
    /// # Errors
    ///
    /// [`MffError::InvalidFormat`] if the channel count is outside
    /// `1..=MAX_CHANNELS` or the rate does not fit the 24-bit header field.
    pub fn new(sampling_rate: u32, num_channels: usize) -> Result<Self> {
        if num_channels == 0 || num_channels > MAX_CHANNELS {
            return Err(MffError::InvalidFormat(format!(
                "channel count {} outside 1..={}",
                num_channels, MAX_CHANNELS
            )));
        }
        if sampling_rate == 0 || sampling_rate > MAX_SAMPLING_RATE {
            return Err(MffError::InvalidFormat(format!(
                "sampling rate {} outside 1..={}",
                sampling_rate, MAX_SAMPLING_RATE
            )));
        }
        Ok(BinWriter {
            sampling_rate,
            num_channels,
            bytes: Vec::new(),
            kinds: Vec::new(),
            last_block_samples: None,
            num_samples: 0,
        })
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_blocks(&self) -> usize {
        self.kinds.len()
    }

    /// Samples per channel written so far
    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    /// Header kind chosen for each block, in order
    pub fn block_kinds(&self) -> &[BlockKind] {
        &self.kinds
    }

    /// Append one block given as `channels x samples`.
    ///
    /// Every channel must carry the same, non-zero number of samples.
    pub fn add_block<C: AsRef<[f32]>>(&mut self, channels: &[C]) -> Result<()> {
        if channels.len() != self.num_channels {
            return Err(MffError::InvalidFormat(format!(
                "block has {} channels, stream has {}",
                channels.len(),
                self.num_channels
            )));
        }
        let samples = channels[0].as_ref().len();
        if samples == 0 {
            return Err(MffError::InvalidFormat("empty block".to_string()));
        }
        if let Some(c) = channels.iter().position(|ch| ch.as_ref().len() != samples) {
            return Err(MffError::InvalidFormat(format!(
                "channel {} has {} samples, expected {}",
                c,
                channels[c].as_ref().len(),
                samples
            )));
        }

        let kind = if self.last_block_samples == Some(samples) {
            BlockKind::Continuation
        } else {
            BlockKind::Key
        };
        match kind {
            BlockKind::Key => self.write_key_header(samples)?,
            BlockKind::Continuation => self.bytes.write_i32::<LittleEndian>(0)?,
        }
        for channel in channels {
            for &value in channel.as_ref() {
                self.bytes.write_f32::<LittleEndian>(value)?;
            }
        }

        self.kinds.push(kind);
        self.last_block_samples = Some(samples);
        self.num_samples += samples as u64;
        Ok(())
    }

    fn write_key_header(&mut self, samples: usize) -> Result<()> {
        let n = self.num_channels;
        let bytes_per_sample = (SAMPLE_DEPTH_BITS / 8) as usize;
        let block_size = n * samples * bytes_per_sample;
        let block_size = i32::try_from(block_size).map_err(|_| {
            MffError::InvalidFormat(format!("block of {} bytes is too large", block_size))
        })?;
        let depth_rate = ((self.sampling_rate << 8) | SAMPLE_DEPTH_BITS) as i32;

        let out = &mut self.bytes;
        out.write_i32::<LittleEndian>(1)?;
        out.write_i32::<LittleEndian>((20 + 8 * n) as i32)?;
        out.write_i32::<LittleEndian>(block_size)?;
        out.write_i32::<LittleEndian>(n as i32)?;
        for c in 0..n {
            out.write_i32::<LittleEndian>((c * samples * bytes_per_sample) as i32)?;
        }
        for _ in 0..n {
            out.write_i32::<LittleEndian>(depth_rate)?;
        }
        // 无可选头部
        out.write_i32::<LittleEndian>(0)?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_to<W: Write>(&self, mut sink: W) -> Result<()> {
        sink.write_all(&self.bytes)?;
        sink.flush()?;
        Ok(())
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }
}

#[derive(Debug)]
struct PendingDocument {
    content: DocumentContent,
    filename: Option<String>,
}

/// One-shot writer for a complete new container.
///
/// # File Creation Workflow
///
/// 1. Create the writer with [`MffWriter::create`]
/// 2. Add metadata documents with [`MffWriter::add_document`] (a
///    `fileInfo` document is mandatory)
/// 3. Add signal groups with [`MffWriter::add_signal`]
/// 4. Write everything with [`MffWriter::finalize`]
///
/// Nothing touches the disk before `finalize`, and `finalize` serializes
/// every document before it creates the directory.
///
/// ```rust
/// use mffio::{BinWriter, MffWriter, Reader};
/// use mffio::documents::{DataInfoContent, FileInfoContent};
/// use mffio::schema::DocumentContent;
/// use mffio::utils::parse_timestamp;
///
/// let dir = tempfile::tempdir()?;
/// let path = dir.path().join("session.mff");
///
/// let mut eeg = BinWriter::new(250, 4)?;
/// eeg.add_block(&vec![vec![1.5f32; 250]; 4])?;
///
/// let mut writer = MffWriter::create(&path)?;
/// let start = parse_timestamp("2021-06-01T09:30:00.000000+02:00")?;
/// writer.add_document(DocumentContent::FileInfo(FileInfoContent::new(start)))?;
/// writer.add_signal(eeg, DataInfoContent::new("EEG"))?;
/// writer.finalize()?;
///
/// let reader = Reader::open(&path)?;
/// assert_eq!(reader.sampling_rates()["EEG"], 250);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct MffWriter {
    path: PathBuf,
    documents: Vec<PendingDocument>,
    signals: Vec<(BinWriter, DataInfoContent)>,
}

impl MffWriter {
    /// Start a new container at `path`, which must end in `.mff` and must not exist yet
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let has_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case(MFF_EXTENSION));
        if !has_extension {
            return Err(MffError::NotAContainer(path.display().to_string()));
        }
        if path.exists() {
            return Err(MffError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        Ok(MffWriter { path: path.to_path_buf(), documents: Vec::new(), signals: Vec::new() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a document under its default filename.
    ///
    /// Data-info documents belong to a signal group and are added through
    /// [`MffWriter::add_signal`] instead.
    pub fn add_document(&mut self, content: DocumentContent) -> Result<()> {
        self.queue(content, None)
    }

    /// Queue a document under a custom filename, e.g. `Events_ECI.xml`
    pub fn add_document_as(&mut self, content: DocumentContent, filename: &str) -> Result<()> {
        self.queue(content, Some(filename.to_string()))
    }

    fn queue(&mut self, content: DocumentContent, filename: Option<String>) -> Result<()> {
        if matches!(content, DocumentContent::DataInfo(_)) {
            return Err(MffError::InvalidFormat(
                "data-info documents are written with their signal".to_string(),
            ));
        }
        self.documents.push(PendingDocument { content, filename });
        Ok(())
    }

    /// Queue a signal group; it is written as `signal<N>.bin` / `info<N>.xml`
    /// with `N` counting from 1 in insertion order. Returns `N`.
    pub fn add_signal(&mut self, signal: BinWriter, info: DataInfoContent) -> Result<u32> {
        if signal.num_blocks() == 0 {
            return Err(MffError::InvalidFormat(format!(
                "{} signal has no blocks",
                info.file_data_type
            )));
        }
        self.signals.push((signal, info));
        Ok(self.signals.len() as u32)
    }

    /// Serialize everything, then create the directory and write all files
    pub fn finalize(self) -> Result<()> {
        let has_file_info = self
            .documents
            .iter()
            .any(|d| d.content.logical_name() == FileInfo::ROOT_TAG);
        if !has_file_info {
            return Err(MffError::MissingFile(format!(
                "{} for {}",
                FileInfo::DEFAULT_FILENAME,
                self.path.display()
            )));
        }

        let mut files = Vec::with_capacity(self.documents.len() + self.signals.len());
        for doc in &self.documents {
            let desc = registry().describe_for_write(doc.content.logical_name(), &doc.content)?;
            let filename = doc.filename.clone().unwrap_or_else(|| desc.filename.to_string());
            files.push((filename, desc.content));
        }
        for (i, (_, info)) in self.signals.iter().enumerate() {
            let content = DocumentContent::DataInfo(info.clone());
            let desc = registry().describe_for_write(DataInfo::ROOT_TAG, &content)?;
            files.push((format!("info{}.xml", i + 1), desc.content));
        }

        fs::create_dir_all(&self.path)?;
        for (filename, root) in &files {
            let file = File::create(self.path.join(filename))?;
            let mut sink = BufWriter::new(file);
            write_tree(&mut sink, root)?;
            sink.flush()?;
            debug!("wrote {}", filename);
        }
        for (i, (signal, _)) in self.signals.iter().enumerate() {
            signal.write_file(self.path.join(format!("signal{}.bin", i + 1)))?;
        }

        info!(
            "wrote container {}: {} documents, {} signals",
            self.path.display(),
            self.documents.len(),
            self.signals.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::FileInfoContent;
    use crate::utils::parse_timestamp;

    #[test]
    fn test_key_header_only_when_block_size_changes() {
        let mut writer = BinWriter::new(100, 2).unwrap();
        writer.add_block(&[vec![0.0f32; 10], vec![0.0f32; 10]]).unwrap();
        writer.add_block(&[vec![0.0f32; 10], vec![0.0f32; 10]]).unwrap();
        writer.add_block(&[vec![0.0f32; 4], vec![0.0f32; 4]]).unwrap();
        writer.add_block(&[vec![0.0f32; 4], vec![0.0f32; 4]]).unwrap();
        assert_eq!(
            writer.block_kinds(),
            &[BlockKind::Key, BlockKind::Continuation, BlockKind::Key, BlockKind::Continuation]
        );
        assert_eq!(writer.num_samples(), 28);
    }

    #[test]
    fn test_key_header_layout() {
        let mut writer = BinWriter::new(250, 2).unwrap();
        writer.add_block(&[vec![1.0f32; 3], vec![2.0f32; 3]]).unwrap();
        let bytes = writer.as_bytes();
        let word = |i: usize| i32::from_le_bytes([bytes[4 * i], bytes[4 * i + 1], bytes[4 * i + 2], bytes[4 * i + 3]]);
        assert_eq!(word(0), 1); // version
        assert_eq!(word(1), 36); // 20 + 8 * 2
        assert_eq!(word(2), 24); // 2 channels x 3 samples x 4 bytes
        assert_eq!(word(3), 2);
        assert_eq!(word(4), 0);
        assert_eq!(word(5), 12);
        assert_eq!(word(6) & 0xff, 32);
        assert_eq!(word(6) >> 8, 250);
        assert_eq!(word(8), 0); // opt_size
        assert_eq!(bytes.len(), 36 + 24);
    }

    #[test]
    fn test_ragged_block_rejected() {
        let mut writer = BinWriter::new(100, 2).unwrap();
        assert!(writer.add_block(&[vec![0.0f32; 3], vec![0.0f32; 2]]).is_err());
        assert!(writer.add_block(&[vec![0.0f32; 3]]).is_err());
        assert!(writer.add_block(&[Vec::<f32>::new(), Vec::new()]).is_err());
        assert_eq!(writer.num_blocks(), 0);
    }

    #[test]
    fn test_invalid_stream_parameters() {
        assert!(BinWriter::new(0, 1).is_err());
        assert!(BinWriter::new(1 << 24, 1).is_err());
        assert!(BinWriter::new(100, 0).is_err());
        assert!(BinWriter::new(100, MAX_CHANNELS + 1).is_err());
    }

    #[test]
    fn test_create_requires_mff_extension() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MffWriter::create(dir.path().join("out.dat")),
            Err(MffError::NotAContainer(_))
        ));
        assert!(MffWriter::create(dir.path()).is_err());
    }

    #[test]
    fn test_finalize_requires_file_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_info.mff");
        let writer = MffWriter::create(&path).unwrap();
        assert!(matches!(writer.finalize(), Err(MffError::MissingFile(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_finalize_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mff");
        let mut writer = MffWriter::create(&path).unwrap();
        let start = parse_timestamp("2020-02-02T10:00:00.000000-05:00").unwrap();
        writer.add_document(DocumentContent::FileInfo(FileInfoContent::new(start))).unwrap();
        writer.add_document(DocumentContent::Epochs(Vec::new())).unwrap();

        let mut eeg = BinWriter::new(10, 1).unwrap();
        eeg.add_block(&[vec![0.5f32; 10]]).unwrap();
        assert_eq!(writer.add_signal(eeg.clone(), DataInfoContent::new("EEG")).unwrap(), 1);
        assert_eq!(writer.add_signal(eeg, DataInfoContent::new("PNSData")).unwrap(), 2);
        assert!(writer
            .add_document(DocumentContent::DataInfo(DataInfoContent::new("EEG")))
            .is_err());
        writer.finalize().unwrap();

        for name in ["info.xml", "epochs.xml", "info1.xml", "info2.xml", "signal1.bin", "signal2.bin"] {
            assert!(path.join(name).is_file(), "{} missing", name);
        }
    }
}
