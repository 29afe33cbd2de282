use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::ops::Range;

use log::debug;

use crate::blocks::RawBinFile;
use crate::documents::DataInfo;
use crate::error::{MffError, Result};
use crate::DEFAULT_NATIVE_UNIT;

/// Multiplier turning a value in `native` units into `target` units.
///
/// The table is closed: V, mV and uV in every combination. Anything else
/// gives `None`.
pub fn unit_scale(native: &str, target: &str) -> Option<f64> {
    let scale = match (native, target) {
        ("V", "V") | ("mV", "mV") | ("uV", "uV") => 1.0,
        ("V", "mV") | ("mV", "uV") => 1e3,
        ("V", "uV") => 1e6,
        ("mV", "V") | ("uV", "mV") => 1e-3,
        ("uV", "V") => 1e-6,
        _ => return None,
    };
    Some(scale)
}

/// Output precision of physical samples
pub trait PhysicalSample: Copy {
    fn from_f64(value: f64) -> Self;
}

impl PhysicalSample for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl PhysicalSample for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// A signal group: one binary stream plus its data-info document, with the
/// per-channel calibration matrix and unit scale applied on read.
///
/// ```rust
/// use std::io::Cursor;
/// use mffio::{BinFile, BinWriter, DataInfo, RawBinFile, XmlSchema};
/// use mffio::schema::{registry, DocumentContent};
/// use mffio::documents::DataInfoContent;
///
/// let mut writer = BinWriter::new(100, 1)?;
/// writer.add_block(&[vec![0.25f32; 100]])?;
/// let raw = RawBinFile::new(Cursor::new(writer.into_bytes()))?;
///
/// let content = DocumentContent::DataInfo(DataInfoContent::new("EEG"));
/// let desc = registry().describe_for_write(DataInfo::ROOT_TAG, &content)?;
/// let info = DataInfo::from_root(desc.content)?;
///
/// let mut eeg = BinFile::new(raw, info)?;
/// eeg.select_unit("mV")?;
/// let (samples, _) = eeg.get_physical_samples::<f64>(0.0, None, None)?;
/// assert_eq!(samples[0].len(), 100);
/// assert_eq!(samples[0][0], 0.25e-3);
/// # Ok::<(), mffio::MffError>(())
/// ```
#[derive(Debug)]
pub struct BinFile<R = BufReader<File>> {
    raw: RawBinFile<R>,
    info: DataInfo,
    signal_type: String,
    calibration: Vec<f64>,
    active_calibration: Option<String>,
    native_unit: String,
    unit: String,
    scale: f64,
}

impl<R: Read + Seek> BinFile<R> {
    /// Pair a scanned stream with its data-info document.
    ///
    /// The signal type comes from the document's `fileDataType` entry. The
    /// calibration starts as all ones and the unit as the native unit.
    pub fn new(raw: RawBinFile<R>, info: DataInfo) -> Result<Self> {
        let signal_type = info.channel_type()?.to_string();
        let num_channels = raw.num_channels();
        Ok(BinFile {
            raw,
            info,
            signal_type,
            calibration: vec![1.0; num_channels],
            active_calibration: None,
            native_unit: DEFAULT_NATIVE_UNIT.to_string(),
            unit: DEFAULT_NATIVE_UNIT.to_string(),
            scale: 1.0,
        })
    }

    pub fn signal_type(&self) -> &str {
        &self.signal_type
    }

    pub fn info(&self) -> &DataInfo {
        &self.info
    }

    pub fn raw(&self) -> &RawBinFile<R> {
        &self.raw
    }

    pub fn num_channels(&self) -> usize {
        self.raw.num_channels()
    }

    pub fn sampling_rate(&self) -> u32 {
        self.raw.sampling_rate()
    }

    pub fn duration(&self) -> f64 {
        self.raw.duration()
    }

    /// Current per-channel factors, one per channel
    pub fn calibration(&self) -> &[f64] {
        &self.calibration
    }

    pub fn active_calibration(&self) -> Option<&str> {
        self.active_calibration.as_deref()
    }

    /// Apply the named calibration from the data-info document.
    ///
    /// The matrix is rebuilt from ones, so channels the calibration does not
    /// list get 1.0. On error the current matrix is left untouched.
    ///
    /// # Errors
    ///
    /// [`MffError::InvalidCalibration`] if the name is unknown, if the
    /// calibration does not start at the recording origin, or if it names a
    /// channel outside `1..=num_channels`.
    pub fn select_calibration(&mut self, name: &str) -> Result<()> {
        let cal = self.info.calibrations()?.get(name).ok_or_else(|| {
            MffError::InvalidCalibration(format!("no calibration named {}", name))
        })?;
        if cal.begin_time != 0.0 {
            return Err(MffError::InvalidCalibration(format!(
                "{} starts at {}, only calibrations starting at 0 can be applied",
                name, cal.begin_time
            )));
        }

        let mut matrix = vec![1.0; self.calibration.len()];
        for (&n, &factor) in &cal.channels {
            // 通道编号从 1 开始
            if n == 0 || n > matrix.len() {
                return Err(MffError::InvalidCalibration(format!(
                    "{} names channel {} of {}",
                    name,
                    n,
                    matrix.len()
                )));
            }
            matrix[n - 1] = factor;
        }

        debug!("{}: calibration {} applied to {} channels", self.signal_type, name, cal.channels.len());
        self.calibration = matrix;
        self.active_calibration = Some(name.to_string());
        Ok(())
    }

    /// Reset every factor to 1.0
    pub fn clear_calibration(&mut self) {
        self.calibration.iter_mut().for_each(|f| *f = 1.0);
        self.active_calibration = None;
    }

    pub fn native_unit(&self) -> &str {
        &self.native_unit
    }

    /// Target unit of physical samples
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Convert physical samples to `target`; fails with
    /// [`MffError::UnsupportedUnit`] outside the conversion table
    pub fn select_unit(&mut self, target: &str) -> Result<()> {
        self.scale = unit_scale(&self.native_unit, target).ok_or_else(|| {
            MffError::UnsupportedUnit { from: self.native_unit.clone(), to: target.to_string() }
        })?;
        self.unit = target.to_string();
        Ok(())
    }

    /// Declare the unit raw samples are stored in; the current target unit is kept
    pub fn set_native_unit(&mut self, native: &str) -> Result<()> {
        let scale = unit_scale(native, &self.unit).ok_or_else(|| MffError::UnsupportedUnit {
            from: native.to_string(),
            to: self.unit.clone(),
        })?;
        self.native_unit = native.to_string();
        self.scale = scale;
        Ok(())
    }

    /// Raw samples as stored, see [`RawBinFile::read_raw_samples`]
    pub fn read_raw_samples(
        &mut self,
        t0: f64,
        dt: Option<f64>,
        block_range: Option<Range<usize>>,
    ) -> Result<(Vec<Vec<f32>>, f64)> {
        self.raw.read_raw_samples(t0, dt, block_range)
    }

    /// Samples scaled by `calibration[c] * scale`, in the requested precision.
    ///
    /// # Arguments
    ///
    /// * `t0`, `dt` - window in seconds, as for raw reads
    /// * `block_range` - optional zero-based half-open block selection
    ///
    /// # Returns
    ///
    /// `(channels x samples, actual start time in seconds)`
    pub fn get_physical_samples<T: PhysicalSample>(
        &mut self,
        t0: f64,
        dt: Option<f64>,
        block_range: Option<Range<usize>>,
    ) -> Result<(Vec<Vec<T>>, f64)> {
        let (raw, start_time) = self.raw.read_raw_samples(t0, dt, block_range)?;
        let samples = raw
            .into_iter()
            .zip(&self.calibration)
            .map(|(channel, &cal)| {
                let factor = cal * self.scale;
                channel
                    .into_iter()
                    .map(|v| T::from_f64(v as f64 * factor))
                    .collect()
            })
            .collect();
        Ok((samples, start_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::XmlSchema;
    use crate::tree::parse_str;
    use crate::writer::BinWriter;
    use std::io::Cursor;

    const INFO: &str = r#"<dataInfo xmlns="http://www.egi.com/info_n_mff">
    <generalInformation><fileDataType><EEG/></fileDataType></generalInformation>
    <calibrations>
        <calibration>
            <beginTime>0</beginTime>
            <type>GCAL</type>
            <channels><ch n="1">2.0</ch><ch n="2">0.5</ch></channels>
        </calibration>
        <calibration>
            <beginTime>0</beginTime>
            <type>ZCAL</type>
            <channels><ch n="2">4.0</ch></channels>
        </calibration>
        <calibration>
            <beginTime>1200</beginTime>
            <type>ICAL</type>
            <channels><ch n="1">3.0</ch></channels>
        </calibration>
        <calibration>
            <beginTime>0</beginTime>
            <type>BAD</type>
            <channels><ch n="1">3.0</ch><ch n="9">3.0</ch></channels>
        </calibration>
    </calibrations>
</dataInfo>"#;

    fn fixture() -> BinFile<Cursor<Vec<u8>>> {
        let mut writer = BinWriter::new(4, 3).unwrap();
        writer
            .add_block(&[vec![1.0f32, 2.0, 3.0, 4.0], vec![-1.0f32, 0.0, 1.0, 2.0], vec![8.0f32; 4]])
            .unwrap();
        let raw = RawBinFile::new(Cursor::new(writer.into_bytes())).unwrap();
        let info = DataInfo::from_root(parse_str(INFO).unwrap()).unwrap();
        BinFile::new(raw, info).unwrap()
    }

    #[test]
    fn test_unit_table_is_closed() {
        assert_eq!(unit_scale("V", "mV"), Some(1000.0));
        assert_eq!(unit_scale("uV", "V"), Some(1e-6));
        assert_eq!(unit_scale("mV", "mV"), Some(1.0));
        assert_eq!(unit_scale("nV", "V"), None);
        assert_eq!(unit_scale("V", "kV"), None);
    }

    #[test]
    fn test_defaults() {
        let bin = fixture();
        assert_eq!(bin.signal_type(), "EEG");
        assert_eq!(bin.calibration(), &[1.0, 1.0, 1.0]);
        assert_eq!(bin.native_unit(), "uV");
        assert_eq!(bin.unit(), "uV");
        assert_eq!(bin.scale(), 1.0);
    }

    #[test]
    fn test_physical_samples_apply_calibration_and_scale() {
        let mut bin = fixture();
        bin.select_calibration("GCAL").unwrap();
        bin.set_native_unit("V").unwrap();
        bin.select_unit("mV").unwrap();
        assert_eq!(bin.scale(), 1000.0);

        let (raw, _) = bin.read_raw_samples(0.0, None, None).unwrap();
        let (phys, start) = bin.get_physical_samples::<f64>(0.0, None, None).unwrap();
        assert_eq!(start, 0.0);
        let factors = [2.0, 0.5, 1.0];
        for c in 0..3 {
            for (p, r) in phys[c].iter().zip(&raw[c]) {
                assert_eq!(*p, *r as f64 * factors[c] * 1000.0);
            }
        }
        assert_eq!(phys[0], vec![2000.0, 4000.0, 6000.0, 8000.0]);
    }

    #[test]
    fn test_selecting_calibration_replaces_previous_one() {
        let mut bin = fixture();
        bin.select_calibration("GCAL").unwrap();
        bin.select_calibration("ZCAL").unwrap();
        // GCAL 的系数不能残留在通道 1
        assert_eq!(bin.calibration(), &[1.0, 4.0, 1.0]);
        assert_eq!(bin.active_calibration(), Some("ZCAL"));
        bin.clear_calibration();
        assert_eq!(bin.calibration(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_invalid_calibration_leaves_matrix_unchanged() {
        let mut bin = fixture();
        bin.select_calibration("GCAL").unwrap();
        for name in ["ICAL", "BAD", "NOPE"] {
            assert!(matches!(
                bin.select_calibration(name),
                Err(MffError::InvalidCalibration(_))
            ));
            assert_eq!(bin.calibration(), &[2.0, 0.5, 1.0]);
        }
        assert_eq!(bin.active_calibration(), Some("GCAL"));
    }

    #[test]
    fn test_unsupported_unit_keeps_scale() {
        let mut bin = fixture();
        bin.select_unit("mV").unwrap();
        assert!(matches!(
            bin.select_unit("furlong"),
            Err(MffError::UnsupportedUnit { .. })
        ));
        assert!(bin.set_native_unit("nV").is_err());
        assert_eq!(bin.unit(), "mV");
        assert_eq!(bin.scale(), 1e-3);
    }

    #[test]
    fn test_f32_output() {
        let mut bin = fixture();
        let (phys, _) = bin.get_physical_samples::<f32>(0.25, Some(0.5), None).unwrap();
        assert_eq!(phys[1], vec![0.0, 1.0]);
    }
}
