use chrono::{FixedOffset, NaiveDate, TimeZone};

use mffio::documents::{EventTrackContent, FileInfoContent};
use mffio::schema::{registry, DocumentContent, SchemaRegistry};
use mffio::tree::to_xml_string;
use mffio::types::Event;
use mffio::utils::{format_timestamp, parse_timestamp};
use mffio::{Categories, Epoch, Epochs, FileInfo, MffError, XmlSchema};

#[test]
fn test_unknown_root_tag_is_named() {
    let doc = r#"<recording xmlns="http://example.com/other"><a>1</a></recording>"#;
    match registry().from_str(doc) {
        Err(MffError::UnknownSchema(tag)) => {
            assert_eq!(tag, "{http://example.com/other}recording");
        }
        other => panic!("expected UnknownSchema, got {:?}", other),
    }
}

#[test]
fn test_known_tag_in_wrong_namespace_is_unknown() {
    let doc = r#"<fileInfo xmlns="http://www.egi.com/epochs_mff"><mffVersion>3</mffVersion></fileInfo>"#;
    assert!(matches!(registry().from_str(doc), Err(MffError::UnknownSchema(_))));
}

#[test]
fn test_timestamp_round_trip_is_exact() {
    let offset = FixedOffset::west_opt(7 * 3600).unwrap();
    let original = offset
        .from_local_datetime(
            &NaiveDate::from_ymd_opt(2018, 7, 9)
                .unwrap()
                .and_hms_micro_opt(16, 4, 5, 987_654)
                .unwrap(),
        )
        .unwrap();
    let wire = format_timestamp(&original).unwrap();
    assert_eq!(wire, "2018-07-09T16:04:05.987654-07:00");
    assert_eq!(parse_timestamp(&wire).unwrap(), original);
    assert_eq!(parse_timestamp("2018-07-09T16:04:05.987654-0700").unwrap(), original);
}

#[test]
fn test_naive_timestamp_cannot_be_written() {
    let naive = NaiveDate::from_ymd_opt(2018, 7, 9).unwrap().and_hms_opt(0, 0, 0).unwrap();
    assert!(matches!(format_timestamp(&naive), Err(MffError::MissingTimezone(_))));
}

#[test]
fn test_describe_for_write_file_info() {
    let start = parse_timestamp("2003-04-17T13:35:22.000000-08:00").unwrap();
    let content = DocumentContent::FileInfo(FileInfoContent::new(start));
    let desc = registry().describe_for_write("fileInfo", &content).unwrap();
    assert_eq!(desc.filename, "info.xml");
    assert_eq!(desc.namespace, FileInfo::NAMESPACE);

    let text = to_xml_string(&desc.content).unwrap();
    assert!(text.contains("<recordTime>2003-04-17T13:35:22.000000-08:00</recordTime>"));
    let info = registry().from_str(&text).unwrap().into_file_info().unwrap();
    assert_eq!(info.version(), Some("3"));
    assert_eq!(info.record_time().unwrap(), Some(start));
}

#[test]
fn test_describe_for_write_is_deterministic() {
    let content = DocumentContent::Epochs(vec![Epoch {
        begin_time: 0,
        end_time: 216_000_000,
        first_block: 1,
        last_block: 54,
    }]);
    let a = registry().describe_for_write("epochs", &content).unwrap();
    let b = registry().describe_for_write("epochs", &content).unwrap();
    assert_eq!(a.content, b.content);
    assert_eq!(a.filename, "epochs.xml");

    let text = to_xml_string(&a.content).unwrap();
    let epochs = registry().from_str(&text).unwrap().into_epochs().unwrap();
    assert_eq!(epochs.epochs().unwrap()[0].block_range(), 0..54);
    assert_eq!(epochs.epochs().unwrap()[0].dt(), 216.0);
}

#[test]
fn test_describe_for_write_unknown_name() {
    let content = DocumentContent::Epochs(Vec::new());
    assert!(matches!(
        registry().describe_for_write("montage", &content),
        Err(MffError::UnknownSchema(_))
    ));
}

#[test]
fn test_describe_for_write_non_writable_type() {
    let content = DocumentContent::EventTrack(EventTrackContent {
        name: "ECI".into(),
        track_type: "EVNT".into(),
        events: vec![Event::default()],
    });
    assert!(matches!(
        registry().describe_for_write(Categories::ROOT_TAG, &content),
        Err(MffError::InvalidFormat(_))
    ));
}

#[test]
fn test_duplicate_registration_overwrites() {
    let mut reg = SchemaRegistry::new();
    assert!(reg.is_empty());
    assert!(!reg.register::<Epochs>());
    assert!(reg.register::<Epochs>());
    assert_eq!(reg.len(), 1);
    assert!(reg.entry("epochs").is_some());
    assert!(reg.lookup("{http://www.egi.com/epochs_mff}epochs").is_some());
}
