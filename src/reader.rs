use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use log::{info, warn};

use crate::directory::MffDirectory;
use crate::documents::{
    Categories, Coordinates, DipoleSet, EventTrack, Epochs, FileInfo, Patient, SensorLayout,
};
use crate::error::{MffError, Result};
use crate::schema::{registry, XmlDocument, XmlSchema};
use crate::signal::BinFile;
use crate::types::{Epoch, FileKind};
use crate::utils::Memo;

/// Samples of one signal group: `(channels x samples, actual start time)`
pub type SignalSamples = (Vec<Vec<f32>>, f64);

/// Reader for a whole container.
///
/// Opening resolves the directory, parses `info.xml` and scans every signal
/// stream. Signal groups are keyed by their signal type (`EEG`,
/// `PNSData`, ...); when two groups share a type, the one with the lower
/// file number keeps the plain key and the other becomes `<type>_<N>`.
///
/// Optional documents (epochs, categories, subject, ...) are parsed on first
/// access and cached. The cache is not thread-safe; give each thread its own
/// `Reader`.
///
/// # Examples
///
/// ```rust
/// use mffio::Reader;
///
/// # mffio::doctest_utils::create_test_container("reader_doc.mff")?;
/// let mut reader = Reader::open("reader_doc.mff")?;
///
/// for (signal_type, rate) in reader.sampling_rates() {
///     println!("{}: {} Hz, {:.1} s", signal_type, rate, reader.durations()[&signal_type]);
/// }
///
/// // 一秒钟的 EEG, 单位 uV
/// let samples = reader.get_physical_samples(0.0, Some(1.0), Some(&["EEG"][..]))?;
/// let (eeg, start) = &samples["EEG"];
/// assert_eq!(eeg[0].len(), 250);
/// assert_eq!(*start, 0.0);
///
/// # drop(reader);
/// # mffio::doctest_utils::cleanup_doctest_container("reader_doc.mff");
/// # Ok::<(), mffio::MffError>(())
/// ```
#[derive(Debug)]
pub struct Reader {
    directory: MffDirectory,
    file_info: FileInfo,
    bin_files: BTreeMap<String, BinFile>,
    epochs: Memo<Option<Epochs>>,
    categories: Memo<Option<Categories>>,
    subject: Memo<Option<Patient>>,
    sensor_layout: Memo<Option<SensorLayout>>,
    coordinates: Memo<Option<Coordinates>>,
    dipole_set: Memo<Option<DipoleSet>>,
    event_tracks: Memo<Vec<EventTrack>>,
}

impl Reader {
    /// Opens a container for reading
    ///
    /// # Errors
    ///
    /// * `MffError::NotAContainer` - path is not a `.mff` directory
    /// * `MffError::MissingFile` - `info.xml` is absent
    /// * `MffError::UnpairedFile` - a signal stream lacks its data-info document or vice versa
    /// * `MffError::CorruptBlock` - a signal stream fails to scan
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let directory = MffDirectory::open(path)?;
        let file_info = registry()
            .from_file(directory.filename(FileKind::Info)?)?
            .into_file_info()?;

        let mut bin_files: BTreeMap<String, BinFile> = BTreeMap::new();
        for group in directory.signals_with_info()? {
            let group = group?;
            let suffix = group.suffix;
            let bin = group.into_bin_file()?;
            let mut key = bin.signal_type().to_string();
            if bin_files.contains_key(&key) {
                let renamed = format!("{}_{}", key, suffix);
                warn!("signal type {} already taken, signal{}.bin becomes {}", key, suffix, renamed);
                key = renamed;
            }
            bin_files.insert(key, bin);
        }

        info!(
            "opened {}: signals {:?}",
            directory.path().display(),
            bin_files.keys().collect::<Vec<_>>()
        );
        Ok(Reader {
            directory,
            file_info,
            bin_files,
            epochs: Memo::new(),
            categories: Memo::new(),
            subject: Memo::new(),
            sensor_layout: Memo::new(),
            coordinates: Memo::new(),
            dipole_set: Memo::new(),
            event_tracks: Memo::new(),
        })
    }

    pub fn directory(&self) -> &MffDirectory {
        &self.directory
    }

    pub fn file_info(&self) -> &FileInfo {
        &self.file_info
    }

    /// Keys of the signal groups, sorted
    pub fn signal_types(&self) -> impl Iterator<Item = &str> {
        self.bin_files.keys().map(String::as_str)
    }

    pub fn bin_file(&self, signal_type: &str) -> Option<&BinFile> {
        self.bin_files.get(signal_type)
    }

    /// Mutable access, for selecting calibrations and units
    pub fn bin_file_mut(&mut self, signal_type: &str) -> Option<&mut BinFile> {
        self.bin_files.get_mut(signal_type)
    }

    pub fn sampling_rates(&self) -> BTreeMap<String, u32> {
        self.bin_files
            .iter()
            .map(|(k, b)| (k.clone(), b.sampling_rate()))
            .collect()
    }

    /// Durations in seconds
    pub fn durations(&self) -> BTreeMap<String, f64> {
        self.bin_files.iter().map(|(k, b)| (k.clone(), b.duration())).collect()
    }

    pub fn num_channels(&self) -> BTreeMap<String, usize> {
        self.bin_files
            .iter()
            .map(|(k, b)| (k.clone(), b.num_channels()))
            .collect()
    }

    pub fn mff_version(&self) -> Option<&str> {
        self.file_info.version()
    }

    /// Recording start time from `info.xml`
    pub fn start_datetime(&self) -> Result<DateTime<FixedOffset>> {
        self.file_info.record_time()?.ok_or_else(|| {
            MffError::InvalidFormat(format!(
                "{} has no recordTime",
                FileInfo::DEFAULT_FILENAME
            ))
        })
    }

    /// Calibrated, unit-scaled samples in `[t0, t0 + dt)` seconds per signal group.
    ///
    /// `channels` restricts the read to the named signal types; `None` reads
    /// every group. `dt = None` reads to the end.
    pub fn get_physical_samples(
        &mut self,
        t0: f64,
        dt: Option<f64>,
        channels: Option<&[&str]>,
    ) -> Result<BTreeMap<String, SignalSamples>> {
        self.read_groups(t0, dt, None, channels)
    }

    /// Epochs from `epochs.xml`; empty if the container has none
    pub fn epochs(&self) -> Result<&[Epoch]> {
        let epochs = self.epochs.get_or_try_init(|| {
            self.optional_document(FileKind::Epochs)?
                .map(XmlDocument::into_epochs)
                .transpose()
        })?;
        match epochs {
            Some(doc) => doc.epochs(),
            None => Ok(&[][..]),
        }
    }

    /// Like [`Reader::get_physical_samples`], restricted to the blocks of
    /// `epoch`, with `t0` relative to the epoch start.
    ///
    /// The returned start times are measured from the recording origin.
    pub fn get_physical_samples_from_epoch(
        &mut self,
        epoch: Epoch,
        t0: f64,
        dt: Option<f64>,
        channels: Option<&[&str]>,
    ) -> Result<BTreeMap<String, SignalSamples>> {
        self.read_groups(t0, dt, Some(epoch.block_range()), channels)
    }

    fn read_groups(
        &mut self,
        t0: f64,
        dt: Option<f64>,
        block_range: Option<Range<usize>>,
        channels: Option<&[&str]>,
    ) -> Result<BTreeMap<String, SignalSamples>> {
        let keys: Vec<String> = match channels {
            Some(names) => names.iter().map(|s| s.to_string()).collect(),
            None => self.bin_files.keys().cloned().collect(),
        };
        let mut out = BTreeMap::new();
        for key in keys {
            let bin = self
                .bin_files
                .get_mut(&key)
                .ok_or_else(|| MffError::UnknownSignalType(key.clone()))?;
            let samples = bin.get_physical_samples::<f32>(t0, dt, block_range.clone())?;
            out.insert(key, samples);
        }
        Ok(out)
    }

    pub fn categories(&self) -> Result<Option<&Categories>> {
        self.categories
            .get_or_try_init(|| {
                self.optional_document(FileKind::Categories)?
                    .map(XmlDocument::into_categories)
                    .transpose()
            })
            .map(Option::as_ref)
    }

    /// Subject fields from `subject.xml`
    pub fn subject(&self) -> Result<Option<&Patient>> {
        self.subject
            .get_or_try_init(|| {
                self.optional_document(FileKind::Subject)?
                    .map(XmlDocument::into_patient)
                    .transpose()
            })
            .map(Option::as_ref)
    }

    pub fn sensor_layout(&self) -> Result<Option<&SensorLayout>> {
        self.sensor_layout
            .get_or_try_init(|| {
                self.optional_document(FileKind::SensorLayout)?
                    .map(XmlDocument::into_sensor_layout)
                    .transpose()
            })
            .map(Option::as_ref)
    }

    pub fn coordinates(&self) -> Result<Option<&Coordinates>> {
        self.coordinates
            .get_or_try_init(|| {
                self.optional_document(FileKind::Coordinates)?
                    .map(XmlDocument::into_coordinates)
                    .transpose()
            })
            .map(Option::as_ref)
    }

    /// Source dipoles from `dipoleSet.xml`
    pub fn dipole_set(&self) -> Result<Option<&DipoleSet>> {
        self.dipole_set
            .get_or_try_init(|| {
                self.optional_document(FileKind::DipoleSet)?
                    .map(XmlDocument::into_dipole_set)
                    .transpose()
            })
            .map(Option::as_ref)
    }

    /// Every `Events*.xml` track, in filename order
    pub fn event_tracks(&self) -> Result<&[EventTrack]> {
        let tracks = self.event_tracks.get_or_try_init(|| {
            self.directory
                .event_track_files()
                .iter()
                .map(|path| registry().from_file(path)?.into_event_track())
                .collect()
        })?;
        Ok(tracks.as_slice())
    }

    fn optional_document(&self, kind: FileKind) -> Result<Option<XmlDocument>> {
        self.directory
            .optional_filename(kind)
            .map(|path| registry().from_file(path))
            .transpose()
    }
}
