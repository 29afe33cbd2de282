use std::collections::BTreeMap;
use std::ops::Range;
use chrono::{DateTime, FixedOffset};

/// Header flavour of a block in a binary signal stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// 头部完整声明通道数与布局
    Key,
    /// 继承最近一个 key block 的布局
    Continuation,
}

/// One physical block of a binary signal stream
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDescriptor {
    pub kind: BlockKind,
    pub payload_offset: u64,     // 数据区在流中的字节偏移
    pub num_samples: usize,      // 每通道样本数
    pub num_channels: usize,
    pub sample_offset: u64,      // 自流起点的累计样本偏移
}

impl BlockDescriptor {
    /// Cumulative sample index one past this block's last sample
    pub fn end_offset(&self) -> u64 {
        self.sample_offset + self.num_samples as u64
    }
}

/// A named calibration from a data-info document
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub kind: String,
    pub begin_time: f64,
    /// 1-based channel number -> factor
    pub channels: BTreeMap<usize, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub begin_time: f64,
    pub method: String,
    pub kind: String,
    pub cutoff_frequency: f64,
    pub cutoff_units: Option<String>,
}

/// A contiguous recording segment; times in microseconds, blocks 1-based inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    pub begin_time: u64,
    pub end_time: u64,
    pub first_block: usize,
    pub last_block: usize,
}

impl Epoch {
    /// Start of the epoch in seconds
    pub fn t0(&self) -> f64 {
        self.begin_time as f64 * 1e-6
    }

    /// Duration of the epoch in seconds
    pub fn dt(&self) -> f64 {
        (self.end_time.saturating_sub(self.begin_time)) as f64 * 1e-6
    }

    /// Zero-based, half-open range of blocks covered by the epoch
    pub fn block_range(&self) -> Range<usize> {
        self.first_block.saturating_sub(1)..self.last_block
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub name: Option<String>,
    pub number: u32,
    pub kind: i32,
    pub identifier: Option<i32>,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKey {
    Short(i16),
    Text(String),
}

/// One entry of an event track; every field is optional in the document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub begin_time: Option<DateTime<FixedOffset>>,
    pub duration: Option<u64>,
    pub relative_begin_time: Option<u64>,
    pub segmentation_event: Option<bool>,
    pub code: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub source_device: Option<String>,
    pub keys: BTreeMap<String, EventKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStatus {
    pub signal_bin: u32,
    pub exclusion: String,
    pub channels: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub status: Option<String>,
    pub faults: Vec<String>,
    pub begin_time: u64,
    pub end_time: u64,
    pub evt_begin: u64,
    pub evt_end: u64,
    pub channel_status: Vec<ChannelStatus>,
}

/// Dipole arrays; all three vectors have one entry per dipole
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dipoles {
    pub computation_coordinate: Vec<[f32; 3]>,
    pub visualization_coordinate: Vec<[f32; 3]>,
    pub orientation_vector: Vec<[f32; 3]>,
}

impl Dipoles {
    pub fn len(&self) -> usize {
        self.computation_coordinate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.computation_coordinate.is_empty()
    }
}

/// Singleton metadata documents of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Info,
    Epochs,
    Categories,
    Subject,
    SensorLayout,
    Coordinates,
    DipoleSet,
}

impl FileKind {
    pub const ALL: [FileKind; 7] = [
        FileKind::Info,
        FileKind::Epochs,
        FileKind::Categories,
        FileKind::Subject,
        FileKind::SensorLayout,
        FileKind::Coordinates,
        FileKind::DipoleSet,
    ];

    /// Canonical filename inside the container
    pub fn filename(&self) -> &'static str {
        match self {
            FileKind::Info => "info.xml",
            FileKind::Epochs => "epochs.xml",
            FileKind::Categories => "categories.xml",
            FileKind::Subject => "subject.xml",
            FileKind::SensorLayout => "sensorLayout.xml",
            FileKind::Coordinates => "coordinates.xml",
            FileKind::DipoleSet => "dipoleSet.xml",
        }
    }

    pub fn is_mandatory(&self) -> bool {
        matches!(self, FileKind::Info)
    }
}
