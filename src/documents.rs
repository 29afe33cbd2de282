//! Metadata document parsers.
//!
//! Each type wraps its parsed [`XmlNode`] tree and exposes accessors that are
//! computed on first use and cached in a [`Memo`]. Types that can be written
//! also provide a pure `build_content` returning the root's children.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};

use crate::error::{MffError, Result};
use crate::schema::XmlSchema;
use crate::tree::XmlNode;
use crate::types::{
    Calibration, ChannelStatus, Dipoles, Epoch, Event, EventKey, Filter, Segment, Sensor,
};
use crate::utils::{format_timestamp, parse_text, parse_timestamp, Memo};
use crate::MFF_VERSION;

fn expect_tag(el: &XmlNode, tag: &str) -> Result<()> {
    if el.name != tag {
        return Err(MffError::InvalidFormat(format!(
            "unknown element <{}>, expected <{}>",
            el.name, tag
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// info.xml

#[derive(Debug)]
pub struct FileInfo {
    root: XmlNode,
    record_time: Memo<Option<DateTime<FixedOffset>>>,
}

#[derive(Debug, Clone)]
pub struct FileInfoContent {
    pub record_time: DateTime<FixedOffset>,
    pub mff_version: String,
}

impl FileInfoContent {
    pub fn new(record_time: DateTime<FixedOffset>) -> Self {
        FileInfoContent { record_time, mff_version: MFF_VERSION.to_string() }
    }
}

impl XmlSchema for FileInfo {
    const NAMESPACE: &'static str = "http://www.egi.com/info_mff";
    const ROOT_TAG: &'static str = "fileInfo";
    const DEFAULT_FILENAME: &'static str = "info.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(FileInfo { root, record_time: Memo::new() })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl FileInfo {
    pub fn version(&self) -> Option<&str> {
        self.root.find_text("mffVersion")
    }

    /// Recording start, if the document carries one
    pub fn record_time(&self) -> Result<Option<DateTime<FixedOffset>>> {
        self.record_time
            .get_or_try_init(|| {
                self.root
                    .find_text("recordTime")
                    .map(parse_timestamp)
                    .transpose()
            })
            .copied()
    }

    /// Only version "3" is written
    pub fn build_content(content: &FileInfoContent) -> Result<Vec<XmlNode>> {
        if content.mff_version != MFF_VERSION {
            return Err(MffError::InvalidFormat(format!(
                "version {} not supported",
                content.mff_version
            )));
        }
        Ok(vec![
            XmlNode::text("mffVersion", content.mff_version.as_str()),
            XmlNode::text("recordTime", format_timestamp(&content.record_time)?),
        ])
    }
}

// ---------------------------------------------------------------------------
// info<N>.xml

/// `generalInformation/fileDataType`: the signal type tag and its properties
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralInformation {
    pub channel_type: String,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct DataInfo {
    root: XmlNode,
    general_information: Memo<GeneralInformation>,
    filters: Memo<Vec<Filter>>,
    calibrations: Memo<BTreeMap<String, Calibration>>,
}

#[derive(Debug, Clone, Default)]
pub struct DataInfoContent {
    pub file_data_type: String,
    pub data_type_props: Vec<(String, String)>,
    pub filters: Vec<Filter>,
    pub calibrations: Vec<Calibration>,
}

impl DataInfoContent {
    pub fn new(file_data_type: &str) -> Self {
        DataInfoContent { file_data_type: file_data_type.to_string(), ..Default::default() }
    }
}

impl XmlSchema for DataInfo {
    const NAMESPACE: &'static str = "http://www.egi.com/info_n_mff";
    const ROOT_TAG: &'static str = "dataInfo";
    const DEFAULT_FILENAME: &'static str = "info1.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(DataInfo {
            root,
            general_information: Memo::new(),
            filters: Memo::new(),
            calibrations: Memo::new(),
        })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl DataInfo {
    pub fn general_information(&self) -> Result<&GeneralInformation> {
        self.general_information.get_or_try_init(|| {
            let file_data_type = self.root.child("generalInformation")?.child("fileDataType")?;
            let el = file_data_type.children().first().ok_or_else(|| {
                MffError::InvalidFormat("<fileDataType> is empty".to_string())
            })?;
            let properties = el
                .children()
                .iter()
                .map(|p| (p.name.clone(), p.text_content().unwrap_or("").to_string()))
                .collect();
            Ok(GeneralInformation { channel_type: el.name.clone(), properties })
        })
    }

    /// Signal type of the paired stream, e.g. `EEG` or `PNSData`
    pub fn channel_type(&self) -> Result<&str> {
        Ok(self.general_information()?.channel_type.as_str())
    }

    pub fn filters(&self) -> Result<&[Filter]> {
        let filters = self.filters.get_or_try_init(|| match self.root.find("filters") {
            Some(filters) => filters.children().iter().map(parse_filter).collect(),
            None => Ok(Vec::new()),
        })?;
        Ok(filters.as_slice())
    }

    /// Calibrations keyed by their type (e.g. `GCAL`, `ICAL`)
    pub fn calibrations(&self) -> Result<&BTreeMap<String, Calibration>> {
        self.calibrations.get_or_try_init(|| {
            let mut out = BTreeMap::new();
            if let Some(calibrations) = self.root.find("calibrations") {
                for el in calibrations.children() {
                    let cal = parse_calibration(el)?;
                    out.insert(cal.kind.clone(), cal);
                }
            }
            Ok(out)
        })
    }

    pub fn build_content(content: &DataInfoContent) -> Result<Vec<XmlNode>> {
        let props = content
            .data_type_props
            .iter()
            .map(|(k, v)| XmlNode::text(k, v.as_str()))
            .collect();
        let general = XmlNode::parent(
            "generalInformation",
            vec![XmlNode::parent(
                "fileDataType",
                vec![XmlNode::parent(&content.file_data_type, props)],
            )],
        );

        let filters = content
            .filters
            .iter()
            .map(|f| {
                let mut cutoff = XmlNode::text("cutoffFrequency", f.cutoff_frequency.to_string());
                if let Some(units) = &f.cutoff_units {
                    cutoff = cutoff.with_attribute("units", units.as_str());
                }
                XmlNode::parent(
                    "filter",
                    vec![
                        XmlNode::text("beginTime", f.begin_time.to_string()),
                        XmlNode::text("method", f.method.as_str()),
                        XmlNode::text("type", f.kind.as_str()),
                        cutoff,
                    ],
                )
            })
            .collect();

        let calibrations = content
            .calibrations
            .iter()
            .map(|cal| {
                let channels = cal
                    .channels
                    .iter()
                    .map(|(n, v)| XmlNode::text("ch", v.to_string()).with_attribute("n", n.to_string()))
                    .collect();
                XmlNode::parent(
                    "calibration",
                    vec![
                        XmlNode::text("beginTime", cal.begin_time.to_string()),
                        XmlNode::text("type", cal.kind.as_str()),
                        XmlNode::parent("channels", channels),
                    ],
                )
            })
            .collect();

        Ok(vec![
            general,
            XmlNode::parent("filters", filters),
            XmlNode::parent("calibrations", calibrations),
        ])
    }
}

fn parse_filter(el: &XmlNode) -> Result<Filter> {
    expect_tag(el, "filter")?;
    let cutoff = el.child("cutoffFrequency")?;
    Ok(Filter {
        begin_time: parse_text(el.child_text("beginTime")?, "filter beginTime")?,
        method: el.child_text("method")?.to_string(),
        kind: el.child_text("type")?.to_string(),
        cutoff_frequency: parse_text(cutoff.text_content().unwrap_or(""), "cutoffFrequency")?,
        cutoff_units: cutoff.attribute("units").map(str::to_string),
    })
}

fn parse_calibration(el: &XmlNode) -> Result<Calibration> {
    expect_tag(el, "calibration")?;
    let mut channels = BTreeMap::new();
    if let Some(chs) = el.find("channels") {
        for ch in chs.children() {
            let n = ch
                .attribute("n")
                .ok_or_else(|| MffError::InvalidFormat("<ch> without attribute n".to_string()))?;
            let n: usize = parse_text(n, "calibration channel number")?;
            let factor: f64 = parse_text(ch.text_content().unwrap_or(""), "calibration factor")?;
            channels.insert(n, factor);
        }
    }
    Ok(Calibration {
        kind: el.child_text("type")?.to_string(),
        begin_time: parse_text(el.child_text("beginTime")?, "calibration beginTime")?,
        channels,
    })
}

// ---------------------------------------------------------------------------
// subject.xml

#[derive(Debug)]
pub struct Patient {
    root: XmlNode,
    fields: Memo<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientField {
    pub name: String,
    pub data: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct PatientContent {
    pub fields: Vec<PatientField>,
}

impl XmlSchema for Patient {
    const NAMESPACE: &'static str = "http://www.egi.com/subject_mff";
    const ROOT_TAG: &'static str = "patient";
    const DEFAULT_FILENAME: &'static str = "subject.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(Patient { root, fields: Memo::new() })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl Patient {
    pub fn fields(&self) -> Result<&BTreeMap<String, String>> {
        self.fields.get_or_try_init(|| {
            let mut out = BTreeMap::new();
            let Some(fields) = self.root.find("fields") else {
                return Ok(out);
            };
            for field in fields.children() {
                expect_tag(field, "field")?;
                let data = field.child("data")?;
                match data.attribute("dataType") {
                    None | Some("string") => {}
                    Some(other) => {
                        return Err(MffError::InvalidFormat(format!(
                            "unsupported subject field dataType '{}'",
                            other
                        )))
                    }
                }
                out.insert(
                    field.child_text("name")?.to_string(),
                    data.text_content().unwrap_or("").to_string(),
                );
            }
            Ok(out)
        })
    }

    pub fn build_content(content: &PatientContent) -> Result<Vec<XmlNode>> {
        let fields = content
            .fields
            .iter()
            .map(|f| {
                XmlNode::parent(
                    "field",
                    vec![
                        XmlNode::text("name", f.name.as_str()),
                        XmlNode::text("data", f.data.as_str())
                            .with_attribute("dataType", f.data_type.as_str()),
                    ],
                )
            })
            .collect();
        Ok(vec![XmlNode::parent("fields", fields)])
    }
}

// ---------------------------------------------------------------------------
// sensorLayout.xml / coordinates.xml

fn parse_sensor(el: &XmlNode) -> Result<Sensor> {
    expect_tag(el, "sensor")?;
    let coord = |tag: &str| -> Result<f32> { parse_text(el.child_text(tag)?, tag) };
    Ok(Sensor {
        name: el.find_text("name").map(str::to_string),
        number: parse_text(el.child_text("number")?, "sensor number")?,
        kind: parse_text(el.child_text("type")?, "sensor type")?,
        identifier: el
            .find_text("identifier")
            .map(|t| parse_text(t, "sensor identifier"))
            .transpose()?,
        x: coord("x")?,
        y: coord("y")?,
        z: coord("z")?,
    })
}

fn parse_sensors(sensors: Option<&XmlNode>) -> Result<BTreeMap<u32, Sensor>> {
    let mut out = BTreeMap::new();
    if let Some(sensors) = sensors {
        for el in sensors.children() {
            let sensor = parse_sensor(el)?;
            out.insert(sensor.number, sensor);
        }
    }
    Ok(out)
}

fn parse_int_list(text: &str, sep: Option<char>, what: &str) -> Result<Vec<u32>> {
    let parts: Vec<&str> = match sep {
        Some(c) => text.split(c).collect(),
        None => text.split_whitespace().collect(),
    };
    parts.into_iter().map(|p| parse_text(p, what)).collect()
}

#[derive(Debug)]
pub struct SensorLayout {
    root: XmlNode,
    sensors: Memo<BTreeMap<u32, Sensor>>,
    threads: Memo<Vec<(u32, u32)>>,
    tiling_sets: Memo<Vec<Vec<u32>>>,
    neighbors: Memo<BTreeMap<u32, Vec<u32>>>,
}

impl XmlSchema for SensorLayout {
    const NAMESPACE: &'static str = "http://www.egi.com/sensorLayout_mff";
    const ROOT_TAG: &'static str = "sensorLayout";
    const DEFAULT_FILENAME: &'static str = "sensorLayout.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(SensorLayout {
            root,
            sensors: Memo::new(),
            threads: Memo::new(),
            tiling_sets: Memo::new(),
            neighbors: Memo::new(),
        })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl SensorLayout {
    pub fn name(&self) -> &str {
        self.root.find_text("name").unwrap_or("UNK")
    }

    pub fn sensors(&self) -> Result<&BTreeMap<u32, Sensor>> {
        self.sensors.get_or_try_init(|| parse_sensors(self.root.find("sensors")))
    }

    pub fn threads(&self) -> Result<&[(u32, u32)]> {
        let threads = self.threads.get_or_try_init(|| {
            let mut out = Vec::new();
            if let Some(threads) = self.root.find("threads") {
                for thread in threads.children() {
                    expect_tag(thread, "thread")?;
                    let pair = parse_int_list(thread.text_content().unwrap_or(""), Some(','), "thread")?;
                    match pair.as_slice() {
                        [a, b] => out.push((*a, *b)),
                        _ => {
                            return Err(MffError::InvalidFormat(format!(
                                "thread needs two sensors, got {:?}",
                                pair
                            )))
                        }
                    }
                }
            }
            Ok(out)
        })?;
        Ok(threads.as_slice())
    }

    pub fn tiling_sets(&self) -> Result<&[Vec<u32>]> {
        let sets = self.tiling_sets.get_or_try_init(|| {
            let mut out = Vec::new();
            if let Some(sets) = self.root.find("tilingSets") {
                for set in sets.children() {
                    expect_tag(set, "tilingSet")?;
                    out.push(parse_int_list(set.text_content().unwrap_or(""), None, "tilingSet")?);
                }
            }
            Ok(out)
        })?;
        Ok(sets.as_slice())
    }

    pub fn neighbors(&self) -> Result<&BTreeMap<u32, Vec<u32>>> {
        self.neighbors.get_or_try_init(|| {
            let mut out = BTreeMap::new();
            if let Some(neighbors) = self.root.find("neighbors") {
                for ch in neighbors.children() {
                    expect_tag(ch, "ch")?;
                    let n: u32 = parse_text(ch.attribute("n").unwrap_or(""), "neighbor channel")?;
                    out.insert(n, parse_int_list(ch.text_content().unwrap_or(""), None, "neighbors")?);
                }
            }
            Ok(out)
        })
    }
}

#[derive(Debug)]
pub struct Coordinates {
    root: XmlNode,
    acq_time: Memo<DateTime<FixedOffset>>,
    sensors: Memo<BTreeMap<u32, Sensor>>,
}

impl XmlSchema for Coordinates {
    const NAMESPACE: &'static str = "http://www.egi.com/coordinates_mff";
    const ROOT_TAG: &'static str = "coordinates";
    const DEFAULT_FILENAME: &'static str = "coordinates.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(Coordinates { root, acq_time: Memo::new(), sensors: Memo::new() })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl Coordinates {
    pub fn acq_time(&self) -> Result<DateTime<FixedOffset>> {
        self.acq_time
            .get_or_try_init(|| parse_timestamp(self.root.child_text("acqTime")?))
            .copied()
    }

    pub fn acq_method(&self) -> Option<&str> {
        self.root.find_text("acqMethod")
    }

    pub fn name(&self) -> &str {
        self.root
            .find("sensorLayout")
            .and_then(|layout| layout.find_text("name"))
            .unwrap_or("UNK")
    }

    pub fn default_subject(&self) -> bool {
        self.root.find_text("defaultSubject") == Some("true")
    }

    pub fn sensors(&self) -> Result<&BTreeMap<u32, Sensor>> {
        self.sensors.get_or_try_init(|| {
            let layout = self.root.child("sensorLayout")?;
            parse_sensors(layout.find("sensors"))
        })
    }
}

// ---------------------------------------------------------------------------
// epochs.xml

#[derive(Debug)]
pub struct Epochs {
    root: XmlNode,
    epochs: Memo<Vec<Epoch>>,
}

impl XmlSchema for Epochs {
    const NAMESPACE: &'static str = "http://www.egi.com/epochs_mff";
    const ROOT_TAG: &'static str = "epochs";
    const DEFAULT_FILENAME: &'static str = "epochs.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(Epochs { root, epochs: Memo::new() })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl Epochs {
    pub fn epochs(&self) -> Result<&[Epoch]> {
        let epochs = self
            .epochs
            .get_or_try_init(|| self.root.children().iter().map(parse_epoch).collect())?;
        Ok(epochs.as_slice())
    }

    pub fn get(&self, n: usize) -> Result<Option<&Epoch>> {
        Ok(self.epochs()?.get(n))
    }

    pub fn build_content(epochs: &[Epoch]) -> Result<Vec<XmlNode>> {
        Ok(epochs
            .iter()
            .map(|e| {
                XmlNode::parent(
                    "epoch",
                    vec![
                        XmlNode::text("beginTime", e.begin_time.to_string()),
                        XmlNode::text("endTime", e.end_time.to_string()),
                        XmlNode::text("firstBlock", e.first_block.to_string()),
                        XmlNode::text("lastBlock", e.last_block.to_string()),
                    ],
                )
            })
            .collect())
    }
}

fn parse_epoch(el: &XmlNode) -> Result<Epoch> {
    expect_tag(el, "epoch")?;
    let epoch = Epoch {
        begin_time: parse_text(el.child_text("beginTime")?, "epoch beginTime")?,
        end_time: parse_text(el.child_text("endTime")?, "epoch endTime")?,
        first_block: parse_text(el.child_text("firstBlock")?, "epoch firstBlock")?,
        last_block: parse_text(el.child_text("lastBlock")?, "epoch lastBlock")?,
    };
    if epoch.first_block == 0 || epoch.last_block < epoch.first_block {
        return Err(MffError::InvalidFormat(format!(
            "epoch blocks {}..={} are not a 1-based range",
            epoch.first_block, epoch.last_block
        )));
    }
    Ok(epoch)
}

// ---------------------------------------------------------------------------
// Events*.xml

#[derive(Debug)]
pub struct EventTrack {
    root: XmlNode,
    events: Memo<Vec<Event>>,
}

#[derive(Debug, Clone, Default)]
pub struct EventTrackContent {
    pub name: String,
    pub track_type: String,
    pub events: Vec<Event>,
}

impl XmlSchema for EventTrack {
    const NAMESPACE: &'static str = "http://www.egi.com/event_mff";
    const ROOT_TAG: &'static str = "eventTrack";
    const DEFAULT_FILENAME: &'static str = "Events.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(EventTrack { root, events: Memo::new() })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl EventTrack {
    pub fn name(&self) -> Option<&str> {
        self.root.find_text("name")
    }

    pub fn track_type(&self) -> Option<&str> {
        self.root.find_text("trackType")
    }

    pub fn events(&self) -> Result<&[Event]> {
        let events = self
            .events
            .get_or_try_init(|| self.root.find_all("event").map(parse_event).collect())?;
        Ok(events.as_slice())
    }

    pub fn build_content(content: &EventTrackContent) -> Result<Vec<XmlNode>> {
        let mut out = vec![
            XmlNode::text("name", content.name.as_str()),
            XmlNode::text("trackType", content.track_type.as_str()),
        ];
        for event in &content.events {
            out.push(XmlNode::parent("event", build_event(event)?));
        }
        Ok(out)
    }
}

fn parse_event(el: &XmlNode) -> Result<Event> {
    let mut event = Event::default();
    for field in el.children() {
        let text = field.text_content().unwrap_or("");
        match field.name.as_str() {
            "beginTime" => event.begin_time = Some(parse_timestamp(text)?),
            "duration" => event.duration = Some(parse_text(text, "event duration")?),
            "relativeBeginTime" => {
                event.relative_begin_time = Some(parse_text(text, "event relativeBeginTime")?)
            }
            "segmentationEvent" => event.segmentation_event = Some(text == "true"),
            "code" => event.code = Some(text.to_string()),
            "label" => event.label = Some(text.to_string()),
            "description" => event.description = Some(text.to_string()),
            "sourceDevice" => event.source_device = Some(text.to_string()),
            "keys" => {
                for key in field.children() {
                    let code = key.child_text("keyCode")?.to_string();
                    let data = key.child("data")?;
                    let raw = data.text_content().unwrap_or("");
                    let value = match data.attribute("dataType") {
                        Some("short") => EventKey::Short(parse_text(raw, "short key")?),
                        Some("string") | None => EventKey::Text(raw.to_string()),
                        Some(other) => {
                            return Err(MffError::InvalidFormat(format!(
                                "unsupported key dataType '{}'",
                                other
                            )))
                        }
                    };
                    event.keys.insert(code, value);
                }
            }
            other => {
                return Err(MffError::InvalidFormat(format!("unknown event property <{}>", other)))
            }
        }
    }
    Ok(event)
}

fn build_event(event: &Event) -> Result<Vec<XmlNode>> {
    let mut out = Vec::new();
    if let Some(t) = &event.begin_time {
        out.push(XmlNode::text("beginTime", format_timestamp(t)?));
    }
    if let Some(d) = event.duration {
        out.push(XmlNode::text("duration", d.to_string()));
    }
    if let Some(r) = event.relative_begin_time {
        out.push(XmlNode::text("relativeBeginTime", r.to_string()));
    }
    if let Some(s) = event.segmentation_event {
        out.push(XmlNode::text("segmentationEvent", if s { "true" } else { "false" }));
    }
    let texts = [
        ("code", &event.code),
        ("label", &event.label),
        ("description", &event.description),
        ("sourceDevice", &event.source_device),
    ];
    for (tag, value) in texts {
        if let Some(v) = value {
            out.push(XmlNode::text(tag, v.as_str()));
        }
    }
    if !event.keys.is_empty() {
        let keys = event
            .keys
            .iter()
            .map(|(code, value)| {
                let data = match value {
                    EventKey::Short(v) => XmlNode::text("data", v.to_string()).with_attribute("dataType", "short"),
                    EventKey::Text(v) => XmlNode::text("data", v.as_str()).with_attribute("dataType", "string"),
                };
                XmlNode::parent("key", vec![XmlNode::text("keyCode", code.as_str()), data])
            })
            .collect();
        out.push(XmlNode::parent("keys", keys));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// categories.xml

#[derive(Debug)]
pub struct Categories {
    root: XmlNode,
    categories: Memo<BTreeMap<String, Vec<Segment>>>,
}

impl XmlSchema for Categories {
    const NAMESPACE: &'static str = "http://www.egi.com/categories_mff";
    const ROOT_TAG: &'static str = "categories";
    const DEFAULT_FILENAME: &'static str = "categories.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(Categories { root, categories: Memo::new() })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl Categories {
    pub fn categories(&self) -> Result<&BTreeMap<String, Vec<Segment>>> {
        self.categories.get_or_try_init(|| {
            let mut out = BTreeMap::new();
            for cat in self.root.children() {
                expect_tag(cat, "cat")?;
                let name = cat.child_text("name")?.to_string();
                let segments: Vec<Segment> = match cat.find("segments") {
                    Some(segs) => segs.find_all("seg").map(parse_segment).collect::<Result<_>>()?,
                    None => Vec::new(),
                };
                out.insert(name, segments);
            }
            Ok(out)
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<&Vec<Segment>>> {
        Ok(self.categories()?.get(name))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.categories()?.len())
    }
}

fn parse_segment(el: &XmlNode) -> Result<Segment> {
    let faults: Vec<String> = el
        .find("faults")
        .map(|f| f.find_all("fault").map(|x| x.text_content().unwrap_or("").to_string()).collect())
        .unwrap_or_default();

    let mut channel_status = Vec::new();
    if let Some(status) = el.find("channelStatus") {
        for ch in status.find_all("channels") {
            channel_status.push(ChannelStatus {
                signal_bin: parse_text(ch.attribute("signalBin").unwrap_or(""), "signalBin")?,
                exclusion: ch.attribute("exclusion").unwrap_or("").to_string(),
                channels: parse_int_list(ch.text_content().unwrap_or(""), None, "channel list")?,
            });
        }
    }

    Ok(Segment {
        status: el.attribute("status").map(str::to_string),
        faults,
        begin_time: parse_text(el.child_text("beginTime")?, "segment beginTime")?,
        end_time: parse_text(el.child_text("endTime")?, "segment endTime")?,
        evt_begin: parse_text(el.child_text("evtBegin")?, "segment evtBegin")?,
        evt_end: parse_text(el.child_text("evtEnd")?, "segment evtEnd")?,
        channel_status,
    })
}

// ---------------------------------------------------------------------------
// dipoleSet.xml

#[derive(Debug)]
pub struct DipoleSet {
    root: XmlNode,
    dipoles: Memo<Dipoles>,
}

impl XmlSchema for DipoleSet {
    const NAMESPACE: &'static str = "http://www.egi.com/dipoleSet_mff";
    const ROOT_TAG: &'static str = "dipoleSet";
    const DEFAULT_FILENAME: &'static str = "dipoleSet.xml";

    fn from_root(root: XmlNode) -> Result<Self> {
        Ok(DipoleSet { root, dipoles: Memo::new() })
    }

    fn root(&self) -> &XmlNode {
        &self.root
    }
}

impl DipoleSet {
    pub fn name(&self) -> Option<&str> {
        self.root.find_text("name")
    }

    pub fn kind(&self) -> Option<&str> {
        self.root.find_text("type")
    }

    /// All dipole attributes must be present for every dipole, each with 3 components
    pub fn dipoles(&self) -> Result<&Dipoles> {
        self.dipoles.get_or_try_init(|| {
            let mut dipoles = Dipoles::default();
            let Some(set) = self.root.find("dipoles") else {
                return Ok(dipoles);
            };
            let mut count = 0;
            for dipole in set.find_all("dipole") {
                count += 1;
                for attr in dipole.children() {
                    let v = parse_vec3(attr.text_content().unwrap_or(""))?;
                    match attr.name.as_str() {
                        "computationCoordinate" => dipoles.computation_coordinate.push(v),
                        "visualizationCoordinate" => dipoles.visualization_coordinate.push(v),
                        "orientationVector" => dipoles.orientation_vector.push(v),
                        other => {
                            return Err(MffError::InvalidFormat(format!(
                                "unknown dipole attribute <{}>",
                                other
                            )))
                        }
                    }
                }
            }
            let lengths = [
                dipoles.computation_coordinate.len(),
                dipoles.visualization_coordinate.len(),
                dipoles.orientation_vector.len(),
            ];
            if lengths.iter().any(|&n| n != count) {
                return Err(MffError::InvalidFormat(format!(
                    "dipole arrays have broken shape {:?} for {} dipoles",
                    lengths, count
                )));
            }
            Ok(dipoles)
        })
    }
}

fn parse_vec3(text: &str) -> Result<[f32; 3]> {
    let values: Vec<f32> = text
        .split(',')
        .map(|p| parse_text(p, "dipole component"))
        .collect::<Result<_>>()?;
    match values.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(MffError::InvalidFormat(format!("expected 3 components, got '{}'", text))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::registry;

    const DATA_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<dataInfo xmlns="http://www.egi.com/info_n_mff" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
    <generalInformation>
        <fileDataType>
            <EEG>
                <sensorLayoutName>HydroCel GSN 256 1.0</sensorLayoutName>
                <montageName>HydroCel GSN 256 1.0</montageName>
            </EEG>
        </fileDataType>
    </generalInformation>
    <filters>
        <filter>
            <beginTime>0</beginTime>
            <method>Hardware</method>
            <type>highpass</type>
            <cutoffFrequency units="Hz">0.1</cutoffFrequency>
        </filter>
    </filters>
    <calibrations>
        <calibration>
            <beginTime>0</beginTime>
            <type>GCAL</type>
            <channels>
                <ch n="1">0.9987</ch>
                <ch n="2">1.0021</ch>
            </channels>
        </calibration>
        <calibration>
            <beginTime>5000</beginTime>
            <type>ICAL</type>
            <channels>
                <ch n="1">2.0</ch>
            </channels>
        </calibration>
    </calibrations>
</dataInfo>"#;

    #[test]
    fn test_data_info_accessors() {
        let info = registry().from_str(DATA_INFO).unwrap().into_data_info().unwrap();
        let general = info.general_information().unwrap();
        assert_eq!(general.channel_type, "EEG");
        assert_eq!(general.properties["montageName"], "HydroCel GSN 256 1.0");

        let filters = info.filters().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].kind, "highpass");
        assert_eq!(filters[0].cutoff_units.as_deref(), Some("Hz"));

        let cals = info.calibrations().unwrap();
        assert_eq!(cals.len(), 2);
        assert_eq!(cals["GCAL"].channels[&2], 1.0021);
        assert_eq!(cals["ICAL"].begin_time, 5000.0);
    }

    #[test]
    fn test_data_info_content_round_trip() {
        let mut content = DataInfoContent::new("PNSData");
        content.data_type_props.push(("pnsSetName".into(), "Physio 16".into()));
        content.calibrations.push(Calibration {
            kind: "GCAL".into(),
            begin_time: 0.0,
            channels: [(1, 2.0), (2, 0.5)].into_iter().collect(),
        });
        let desc = registry()
            .describe_for_write("dataInfo", &crate::schema::DocumentContent::DataInfo(content))
            .unwrap();
        let text = crate::tree::to_xml_string(&desc.content).unwrap();
        let info = registry().from_str(&text).unwrap().into_data_info().unwrap();
        assert_eq!(info.channel_type().unwrap(), "PNSData");
        assert_eq!(info.calibrations().unwrap()["GCAL"].channels[&1], 2.0);
        assert!(info.filters().unwrap().is_empty());
    }

    #[test]
    fn test_file_info_rejects_unsupported_version() {
        let mut content = FileInfoContent::new(parse_timestamp("2020-01-01T00:00:00.000000+00:00").unwrap());
        content.mff_version = "2".into();
        assert!(matches!(FileInfo::build_content(&content), Err(MffError::InvalidFormat(_))));
    }

    #[test]
    fn test_event_track_round_trip() {
        let mut event = Event {
            begin_time: Some(parse_timestamp("2019-03-12T11:12:31.100000-0700").unwrap()),
            duration: Some(1000),
            code: Some("STIM".into()),
            label: Some("stimulus".into()),
            ..Default::default()
        };
        event.keys.insert("cel#".into(), EventKey::Short(1));
        event.keys.insert("note".into(), EventKey::Text("x".into()));
        let content = EventTrackContent {
            name: "Tech Markup".into(),
            track_type: "EVNT".into(),
            events: vec![event.clone()],
        };
        let desc = registry()
            .describe_for_write("eventTrack", &crate::schema::DocumentContent::EventTrack(content))
            .unwrap();
        let text = crate::tree::to_xml_string(&desc.content).unwrap();
        let track = registry().from_str(&text).unwrap().into_event_track().unwrap();
        assert_eq!(track.name(), Some("Tech Markup"));
        assert_eq!(track.events().unwrap(), &[event][..]);
    }

    #[test]
    fn test_categories_parse() {
        let doc = r#"<categories xmlns="http://www.egi.com/categories_mff">
    <cat>
        <name>ULRN</name>
        <segments>
            <seg status="bad">
                <faults><fault>eyeb</fault><fault>badc</fault></faults>
                <beginTime>0</beginTime>
                <endTime>1200000</endTime>
                <evtBegin>201981</evtBegin>
                <evtEnd>201981</evtEnd>
                <channelStatus>
                    <channels signalBin="1" exclusion="badChannels">
                    1 12 15</channels>
                </channelStatus>
                <keys />
            </seg>
        </segments>
    </cat>
</categories>"#;
        let cats = registry().from_str(doc).unwrap().into_categories().unwrap();
        assert_eq!(cats.len().unwrap(), 1);
        let seg = &cats.get("ULRN").unwrap().unwrap()[0];
        assert_eq!(seg.status.as_deref(), Some("bad"));
        assert_eq!(seg.faults, vec!["eyeb", "badc"]);
        assert_eq!(seg.end_time, 1_200_000);
        assert_eq!(seg.channel_status[0].channels, vec![1, 12, 15]);
    }

    #[test]
    fn test_sensor_layout_parse() {
        let doc = r#"<sensorLayout xmlns="http://www.egi.com/sensorLayout_mff">
    <name>HydroCel GSN 256 1.0</name>
    <sensors>
        <sensor><name></name><number>1</number><type>0</type><x>6.96</x><y>5.38</y><z>-2.37</z></sensor>
        <sensor><name>Cz</name><number>257</number><type>1</type><identifier>1001</identifier><x>0</x><y>0</y><z>8.9</z></sensor>
    </sensors>
    <threads><thread>1,2</thread></threads>
    <tilingSets><tilingSet>1 2 3</tilingSet></tilingSets>
    <neighbors><ch n="1">2 3</ch></neighbors>
</sensorLayout>"#;
        let layout = registry().from_str(doc).unwrap().into_sensor_layout().unwrap();
        assert_eq!(layout.name(), "HydroCel GSN 256 1.0");
        let sensors = layout.sensors().unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[&257].name.as_deref(), Some("Cz"));
        assert_eq!(sensors[&257].identifier, Some(1001));
        assert_eq!(sensors[&1].name, None);
        assert_eq!(layout.threads().unwrap(), &[(1, 2)]);
        assert_eq!(layout.tiling_sets().unwrap()[0], vec![1, 2, 3]);
        assert_eq!(layout.neighbors().unwrap()[&1], vec![2, 3]);
    }

    #[test]
    fn test_dipole_set_shape_checked() {
        let doc = r#"<dipoleSet xmlns="http://www.egi.com/dipoleSet_mff">
    <name>SWS_003_IHM</name>
    <type>Dense</type>
    <dipoles>
        <dipole>
            <computationCoordinate>64,1.2e+02,1.5e+02</computationCoordinate>
            <visualizationCoordinate>61,1.4e+02,1.5e+02</visualizationCoordinate>
            <orientationVector>0.25,0.35,0.9</orientationVector>
        </dipole>
        <dipole>
            <computationCoordinate>1,2,3</computationCoordinate>
        </dipole>
    </dipoles>
</dipoleSet>"#;
        let set = registry().from_str(doc).unwrap().into_dipole_set().unwrap();
        assert_eq!(set.kind(), Some("Dense"));
        assert!(matches!(set.dipoles(), Err(MffError::InvalidFormat(_))));
    }

    #[test]
    fn test_patient_fields() {
        let content = PatientContent {
            fields: vec![PatientField {
                name: "localIdentifier".into(),
                data: "S001".into(),
                data_type: "string".into(),
            }],
        };
        let desc = registry()
            .describe_for_write("patient", &crate::schema::DocumentContent::Patient(content))
            .unwrap();
        assert_eq!(desc.filename, "subject.xml");
        let text = crate::tree::to_xml_string(&desc.content).unwrap();
        let patient = registry().from_str(&text).unwrap().into_patient().unwrap();
        assert_eq!(patient.fields().unwrap()["localIdentifier"], "S001");
    }
}
