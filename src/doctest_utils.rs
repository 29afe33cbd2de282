// Internal utilities for documentation tests
// Builds small containers on disk through the public writer

use std::collections::BTreeMap;
use std::f32::consts::PI;
use std::path::Path;

use crate::documents::{
    DataInfoContent, EventTrackContent, FileInfoContent, PatientContent, PatientField,
};
use crate::schema::DocumentContent;
use crate::types::{Calibration, Epoch, Event};
use crate::utils::parse_timestamp;
use crate::{BinWriter, MffWriter, Result};

pub const RECORD_TIME: &str = "2021-03-04T10:15:00.000000-08:00";

/// `seconds` one-second blocks of a 10 Hz sine, channel `c` scaled by `c + 1`
fn sine_blocks(rate: u32, num_channels: usize, seconds: usize) -> Result<BinWriter> {
    let mut writer = BinWriter::new(rate, num_channels)?;
    for s in 0..seconds {
        let block: Vec<Vec<f32>> = (0..num_channels)
            .map(|c| {
                (0..rate as usize)
                    .map(|i| {
                        let t = (s * rate as usize + i) as f32 / rate as f32;
                        (c + 1) as f32 * 10.0 * (2.0 * PI * 10.0 * t).sin()
                    })
                    .collect()
            })
            .collect();
        writer.add_block(&block)?;
    }
    Ok(writer)
}

/// Creates a two-second container with 4 EEG channels and 2 PNS channels
/// at 250 Hz, one epoch, a subject and one event track
pub fn create_test_container<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    cleanup_doctest_container(path);
    let start = parse_timestamp(RECORD_TIME)?;

    let mut writer = MffWriter::create(path)?;
    writer.add_document(DocumentContent::FileInfo(FileInfoContent::new(start)))?;
    writer.add_document(DocumentContent::Epochs(vec![Epoch {
        begin_time: 0,
        end_time: 2_000_000,
        first_block: 1,
        last_block: 2,
    }]))?;
    writer.add_document(DocumentContent::Patient(PatientContent {
        fields: vec![PatientField {
            name: "localIdentifier".to_string(),
            data: "DOC001".to_string(),
            data_type: "string".to_string(),
        }],
    }))?;
    writer.add_document_as(
        DocumentContent::EventTrack(EventTrackContent {
            name: "Tech Markup".to_string(),
            track_type: "EVNT".to_string(),
            events: vec![Event {
                begin_time: Some(start),
                duration: Some(1000),
                code: Some("STIM".to_string()),
                keys: BTreeMap::new(),
                ..Default::default()
            }],
        }),
        "Events_Tech.xml",
    )?;

    let mut eeg_info = DataInfoContent::new("EEG");
    eeg_info.calibrations.push(Calibration {
        kind: "GCAL".to_string(),
        begin_time: 0.0,
        channels: (1..=4).map(|n| (n, 1.0 + n as f64 / 8.0)).collect(),
    });
    writer.add_signal(sine_blocks(250, 4, 2)?, eeg_info)?;
    writer.add_signal(sine_blocks(250, 2, 2)?, DataInfoContent::new("PNSData"))?;
    writer.finalize()
}

/// Cleanup function to remove a container left behind by a doctest.
/// Doctests run in parallel, so each one only removes its own container.
pub fn cleanup_doctest_container<P: AsRef<Path>>(path: P) {
    let _ = std::fs::remove_dir_all(path);
}
