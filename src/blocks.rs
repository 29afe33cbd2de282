use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info};

use crate::error::{MffError, Result};
use crate::types::{BlockDescriptor, BlockKind};
use crate::{MAX_CHANNELS, SAMPLE_DEPTH_BITS};

const BYTES_PER_SAMPLE: usize = (SAMPLE_DEPTH_BITS / 8) as usize;

/// 固定头部字段: version, header_size, block_size, num_channels, opt_size
const FIXED_HEADER_BYTES: i64 = 20;

/// Ordered blocks of one stream; cumulative offsets are contiguous.
#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    blocks: Vec<BlockDescriptor>,
}

impl BlockIndex {
    pub fn blocks(&self) -> &[BlockDescriptor] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BlockDescriptor> {
        self.blocks.get(index)
    }

    pub fn total_samples(&self) -> u64 {
        self.blocks.last().map_or(0, |b| b.end_offset())
    }

    /// Index of the block holding cumulative sample `sample` (binary search)
    pub fn block_containing(&self, sample: u64) -> Option<usize> {
        let i = self.blocks.partition_point(|b| b.end_offset() <= sample);
        (i < self.blocks.len()).then_some(i)
    }

    /// Blocks overlapping the half-open sample range
    pub fn blocks_covering(&self, samples: Range<u64>) -> Range<usize> {
        if samples.start >= samples.end {
            return 0..0;
        }
        let first = self.blocks.partition_point(|b| b.end_offset() <= samples.start);
        let last = self.blocks.partition_point(|b| b.sample_offset < samples.end);
        first..last.max(first)
    }

    /// Cumulative sample range spanned by a block range (clamped to the index)
    pub fn sample_range(&self, blocks: Range<usize>) -> Range<u64> {
        let end = blocks.end.min(self.blocks.len());
        let start = blocks.start.min(end);
        if start == end {
            let at = self.blocks.get(start).map_or(self.total_samples(), |b| b.sample_offset);
            return at..at;
        }
        self.blocks[start].sample_offset..self.blocks[end - 1].end_offset()
    }
}

/// Layout declared by the most recent key block
#[derive(Debug, Clone, Copy, PartialEq)]
struct KeyLayout {
    block_size: usize,
    num_channels: usize,
    num_samples: usize,
    sampling_rate: u32,
}

fn corrupt(block_start: u64, msg: impl AsRef<str>) -> MffError {
    MffError::CorruptBlock(format!("block at byte {}: {}", block_start, msg.as_ref()))
}

fn eof_as_corrupt(e: io::Error, block_start: u64, what: &str) -> MffError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => corrupt(block_start, format!("truncated {}", what)),
        _ => MffError::Io(e),
    }
}

fn read_field<R: Read>(stream: &mut R, block_start: u64, what: &str) -> Result<i32> {
    stream
        .read_i32::<LittleEndian>()
        .map_err(|e| eof_as_corrupt(e, block_start, what))
}

fn read_key_header<R: Read + Seek>(stream: &mut R, block_start: u64) -> Result<KeyLayout> {
    let header_size = read_field(stream, block_start, "header size")?;
    let block_size = read_field(stream, block_start, "block size")?;
    let num_channels = read_field(stream, block_start, "channel count")?;
    if num_channels < 1 || num_channels as usize > MAX_CHANNELS {
        return Err(corrupt(block_start, format!("invalid channel count {}", num_channels)));
    }
    let n = num_channels as usize;

    let mut offsets = vec![0i32; n];
    stream
        .read_i32_into::<LittleEndian>(&mut offsets)
        .map_err(|e| eof_as_corrupt(e, block_start, "channel offsets"))?;
    let mut depth_rates = vec![0i32; n];
    stream
        .read_i32_into::<LittleEndian>(&mut depth_rates)
        .map_err(|e| eof_as_corrupt(e, block_start, "channel depth/rate"))?;

    let opt_size = read_field(stream, block_start, "optional header size")?;
    if opt_size < 0 {
        return Err(corrupt(block_start, format!("negative optional header size {}", opt_size)));
    }
    // 跳过可选头部
    let skipped = io::copy(&mut stream.by_ref().take(opt_size as u64), &mut io::sink())?;
    if skipped < opt_size as u64 {
        return Err(corrupt(block_start, "truncated optional header"));
    }

    let expected_header = FIXED_HEADER_BYTES + 8 * n as i64 + opt_size as i64;
    if header_size as i64 != expected_header {
        return Err(corrupt(
            block_start,
            format!("header size {} but layout needs {}", header_size, expected_header),
        ));
    }

    let mut sampling_rate = None;
    for (c, &dr) in depth_rates.iter().enumerate() {
        let depth = (dr & 0xff) as u32;
        let rate = (dr as u32) >> 8;
        if depth != SAMPLE_DEPTH_BITS {
            return Err(corrupt(block_start, format!("channel {} has unsupported depth {}", c, depth)));
        }
        if rate == 0 {
            return Err(corrupt(block_start, format!("channel {} has zero sampling rate", c)));
        }
        match sampling_rate {
            None => sampling_rate = Some(rate),
            Some(r) if r != rate => {
                return Err(corrupt(block_start, format!("mixed sampling rates {} and {}", r, rate)))
            }
            Some(_) => {}
        }
    }

    let frame = n * BYTES_PER_SAMPLE;
    if block_size <= 0 || block_size as usize % frame != 0 {
        return Err(corrupt(
            block_start,
            format!("block size {} inconsistent with {} channels", block_size, n),
        ));
    }
    let num_samples = block_size as usize / frame;
    for (c, &offset) in offsets.iter().enumerate() {
        let expected = c * num_samples * BYTES_PER_SAMPLE;
        if offset < 0 || offset as usize != expected {
            return Err(corrupt(
                block_start,
                format!("channel {} offset {} inconsistent with {} samples", c, offset, num_samples),
            ));
        }
    }

    Ok(KeyLayout {
        block_size: block_size as usize,
        num_channels: n,
        num_samples,
        sampling_rate: sampling_rate.unwrap_or(0),
    })
}

/// Read all block headers front to back and build the index
fn scan<R: Read + Seek>(stream: &mut R) -> Result<(BlockIndex, KeyLayout)> {
    let stream_len = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(0))?;

    let mut blocks = Vec::new();
    let mut first_layout: Option<KeyLayout> = None;
    let mut current: Option<KeyLayout> = None;
    let mut sample_offset = 0u64;
    let mut pos = 0u64;

    while pos < stream_len {
        let version = read_field(stream, pos, "version")?;
        let kind = match version {
            1 => {
                let layout = read_key_header(stream, pos)?;
                if let Some(first) = first_layout {
                    if first.num_channels != layout.num_channels {
                        return Err(corrupt(pos, format!(
                            "channel count changed from {} to {}",
                            first.num_channels, layout.num_channels
                        )));
                    }
                    if first.sampling_rate != layout.sampling_rate {
                        return Err(corrupt(pos, format!(
                            "sampling rate changed from {} to {}",
                            first.sampling_rate, layout.sampling_rate
                        )));
                    }
                } else {
                    first_layout = Some(layout);
                }
                current = Some(layout);
                BlockKind::Key
            }
            0 => BlockKind::Continuation,
            other => return Err(corrupt(pos, format!("unknown header version {}", other))),
        };

        let Some(layout) = current else {
            return Err(corrupt(pos, "continuation block before any key block"));
        };

        let payload_offset = stream.stream_position()?;
        let end = payload_offset + layout.block_size as u64;
        if end > stream_len {
            return Err(corrupt(pos, format!(
                "payload of {} bytes runs past end of stream ({})",
                layout.block_size, stream_len
            )));
        }

        debug!(
            "block {} ({:?}) at byte {}: {} samples x {} channels, offset {}",
            blocks.len(), kind, pos, layout.num_samples, layout.num_channels, sample_offset
        );
        blocks.push(BlockDescriptor {
            kind,
            payload_offset,
            num_samples: layout.num_samples,
            num_channels: layout.num_channels,
            sample_offset,
        });
        sample_offset += layout.num_samples as u64;
        pos = stream.seek(SeekFrom::Start(end))?;
    }

    match first_layout {
        Some(layout) => Ok((BlockIndex { blocks }, layout)),
        None => Err(MffError::CorruptBlock("stream contains no blocks".to_string())),
    }
}

/// Random-access reader over one binary signal stream.
///
/// The whole stream is scanned once on construction; every later read seeks
/// straight to the blocks it needs.
///
/// ```rust
/// use std::io::Cursor;
/// use mffio::{BinWriter, RawBinFile};
///
/// let mut writer = BinWriter::new(250, 2)?;
/// writer.add_block(&[vec![1.0f32; 250], vec![2.0f32; 250]])?;
/// writer.add_block(&[vec![3.0f32; 250], vec![4.0f32; 250]])?;
///
/// let mut raw = RawBinFile::new(Cursor::new(writer.into_bytes()))?;
/// assert_eq!(raw.num_channels(), 2);
/// assert_eq!(raw.duration(), 2.0);
///
/// // 跨越两个 block
/// let (samples, start) = raw.read_raw_samples(0.5, Some(1.0), None)?;
/// assert_eq!(samples[0].len(), 250);
/// assert_eq!(samples[1][249], 4.0);
/// assert_eq!(start, 0.5);
/// # Ok::<(), mffio::MffError>(())
/// ```
#[derive(Debug)]
pub struct RawBinFile<R> {
    stream: R,
    index: BlockIndex,
    num_channels: usize,
    sampling_rate: u32,
}

impl RawBinFile<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .map_err(|e| MffError::FileNotFound(format!("{}: {}", path.as_ref().display(), e)))?;
        let raw = RawBinFile::new(BufReader::new(file))?;
        info!(
            "opened {}: {} channels @ {} Hz, {} blocks",
            path.as_ref().display(),
            raw.num_channels,
            raw.sampling_rate,
            raw.index.len()
        );
        Ok(raw)
    }
}

impl<R: Read + Seek> RawBinFile<R> {
    pub fn new(mut stream: R) -> Result<Self> {
        let (index, layout) = scan(&mut stream)?;
        Ok(RawBinFile {
            stream,
            index,
            num_channels: layout.num_channels,
            sampling_rate: layout.sampling_rate,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Samples per second, shared by every channel and block
    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn num_samples(&self) -> u64 {
        self.index.total_samples()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.num_samples() as f64 / self.sampling_rate as f64
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    /// Read the window `[t0, t0 + dt)` seconds as `(channels, samples)`.
    ///
    /// The start index is `floor(t0 * rate)` and the end index
    /// `ceil((t0 + dt) * rate)`. `dt = None` reads to the end. Windows that
    /// start at or past the end give zero samples; longer ones are clamped.
    ///
    /// With `block_range`, only those blocks (zero-based, half-open) are
    /// considered and `t0` is relative to the first of them. The returned
    /// start time is always measured from the stream origin.
    pub fn read_raw_samples(
        &mut self,
        t0: f64,
        dt: Option<f64>,
        block_range: Option<Range<usize>>,
    ) -> Result<(Vec<Vec<f32>>, f64)> {
        if !t0.is_finite() || t0 < 0.0 {
            return Err(MffError::InvalidTimeWindow(format!("t0 = {}", t0)));
        }
        if let Some(dt) = dt {
            if !dt.is_finite() || dt < 0.0 {
                return Err(MffError::InvalidTimeWindow(format!("dt = {}", dt)));
            }
        }

        let bounds = match block_range {
            Some(range) => self.index.sample_range(range),
            None => 0..self.index.total_samples(),
        };
        let rate = self.sampling_rate as f64;
        // `as u64` saturates, so huge windows clamp instead of wrapping
        let start = bounds
            .start
            .saturating_add((t0 * rate).floor() as u64)
            .min(bounds.end);
        let end = match dt {
            Some(dt) => bounds.start.saturating_add(((t0 + dt) * rate).ceil() as u64),
            None => bounds.end,
        }
        .min(bounds.end);

        let start_time = start as f64 / rate;
        if start >= end {
            return Ok((vec![Vec::new(); self.num_channels], start_time));
        }
        let samples = self.read_sample_range(start..end)?;
        Ok((samples, start_time))
    }

    /// Read a half-open cumulative sample range, seeking block by block
    fn read_sample_range(&mut self, range: Range<u64>) -> Result<Vec<Vec<f32>>> {
        let count = (range.end - range.start) as usize;
        let mut out = vec![Vec::with_capacity(count); self.num_channels];
        let mut buf: Vec<f32> = Vec::new();

        let covered = self.index.blocks_covering(range.clone());
        for block in &self.index.blocks[covered] {
            let from = range.start.max(block.sample_offset) - block.sample_offset;
            let to = range.end.min(block.end_offset()) - block.sample_offset;
            let n = (to - from) as usize;
            buf.resize(n, 0.0);

            for (c, channel) in out.iter_mut().enumerate() {
                let sample = (c * block.num_samples) as u64 + from;
                let pos = block.payload_offset + sample * BYTES_PER_SAMPLE as u64;
                self.stream.seek(SeekFrom::Start(pos))?;
                self.stream
                    .read_f32_into::<LittleEndian>(&mut buf)
                    .map_err(|e| eof_as_corrupt(e, block.payload_offset, "payload"))?;
                channel.extend_from_slice(&buf);
            }
        }
        Ok(out)
    }

    pub fn into_inner(self) -> R {
        self.stream
    }
}
