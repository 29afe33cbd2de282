//! # MFF Library for Rust
//!
//! A pure Rust library for reading and writing MFF recordings: directory
//! containers holding multichannel biosignal streams (`signal<N>.bin`) next
//! to the XML documents that describe them.
//!
//! ## Quick Start
//!
//! ### Reading a container
//!
//! ```rust
//! use mffio::{Reader, Result};
//!
//! fn main() -> Result<()> {
//!     # mffio::doctest_utils::create_test_container("lib_doc.mff")?;
//!     let mut reader = Reader::open("lib_doc.mff")?;
//!
//!     println!("MFF version: {:?}", reader.mff_version());
//!     println!("Recorded at: {}", reader.start_datetime()?);
//!     for (signal_type, rate) in reader.sampling_rates() {
//!         println!("{}: {} Hz", signal_type, rate);
//!     }
//!
//!     // 应用增益校准, 转换为 mV
//!     if let Some(eeg) = reader.bin_file_mut("EEG") {
//!         eeg.select_calibration("GCAL")?;
//!         eeg.select_unit("mV")?;
//!     }
//!
//!     // Half a second from every signal group
//!     let samples = reader.get_physical_samples(0.5, Some(0.5), None)?;
//!     for (signal_type, (channels, start)) in &samples {
//!         println!("{}: {} x {} from {:.3} s", signal_type, channels.len(), channels[0].len(), start);
//!     }
//!
//!     # drop(reader);
//!     # mffio::doctest_utils::cleanup_doctest_container("lib_doc.mff");
//!     Ok(())
//! }
//! ```
//!
//! ### Writing a container
//!
//! ```rust
//! use mffio::{BinWriter, MffWriter, Result};
//! use mffio::documents::{DataInfoContent, FileInfoContent};
//! use mffio::schema::DocumentContent;
//! use mffio::utils::parse_timestamp;
//!
//! fn main() -> Result<()> {
//!     # let dir = tempfile::tempdir()?;
//!     # let path = dir.path().join("new_recording.mff");
//!     let mut eeg = BinWriter::new(500, 8)?;
//!     for _ in 0..10 {
//!         eeg.add_block(&vec![vec![0.0f32; 500]; 8])?;
//!     }
//!
//!     let mut writer = MffWriter::create(&path)?;
//!     let start = parse_timestamp("2022-11-05T08:00:00.000000+0100")?;
//!     writer.add_document(DocumentContent::FileInfo(FileInfoContent::new(start)))?;
//!     writer.add_signal(eeg, DataInfoContent::new("EEG"))?;
//!     writer.finalize()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Metadata documents
//!
//! Every XML document is dispatched on the namespace and name of its root
//! element through the [`schema::registry`]:
//!
//! ```rust
//! use mffio::schema::registry;
//!
//! let doc = registry().from_str(r#"<epochs xmlns="http://www.egi.com/epochs_mff">
//!     <epoch><beginTime>0</beginTime><endTime>1000000</endTime>
//!     <firstBlock>1</firstBlock><lastBlock>4</lastBlock></epoch>
//! </epochs>"#)?;
//! let epochs = doc.into_epochs()?;
//! assert_eq!(epochs.epochs()?[0].dt(), 1.0);
//! # Ok::<(), mffio::MffError>(())
//! ```

pub mod error;
pub mod types;
pub mod utils;
pub mod tree;
pub mod schema;
pub mod documents;
pub mod blocks;
pub mod signal;
pub mod directory;
pub mod reader;
pub mod writer;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use error::{MffError, Result};
pub use types::{BlockDescriptor, BlockKind, Calibration, Epoch, FileKind};
pub use schema::{registry, DocumentContent, SchemaRegistry, XmlDocument, XmlSchema};
pub use documents::{
    Categories, Coordinates, DataInfo, DipoleSet, EventTrack, Epochs, FileInfo, Patient,
    SensorLayout,
};
pub use blocks::{BlockIndex, RawBinFile};
pub use signal::{unit_scale, BinFile, PhysicalSample};
pub use directory::MffDirectory;
pub use reader::Reader;
pub use writer::{BinWriter, MffWriter};

// Important constants
pub const MFF_VERSION: &str = "3";
pub const DEFAULT_NATIVE_UNIT: &str = "uV"; // 原始样本的默认单位
pub const SAMPLE_DEPTH_BITS: u32 = 32;
pub const MFF_EXTENSION: &str = "mff";
pub const MAX_CHANNELS: usize = 4096;

/// Library version
///
/// Returns the current version of the mffio library.
///
/// # Examples
///
/// ```rust
/// let version = mffio::version();
/// assert!(!version.is_empty());
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_constants_agree() {
        assert_eq!(SAMPLE_DEPTH_BITS % 8, 0);
        assert_eq!(unit_scale(DEFAULT_NATIVE_UNIT, DEFAULT_NATIVE_UNIT), Some(1.0));
    }
}
