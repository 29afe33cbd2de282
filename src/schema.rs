//! Runtime schema registry.
//!
//! Every metadata document is identified by the namespace and local name of
//! its root element. The registry maps that pair to a parser, and maps the
//! logical name (the root tag) back to what a writer needs: the serialized
//! tree, the default filename and the namespace.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use log::warn;

use crate::documents::{
    Categories, Coordinates, DataInfo, DataInfoContent, DipoleSet, EventTrack, EventTrackContent,
    Epochs, FileInfo, FileInfoContent, Patient, PatientContent, SensorLayout,
};
use crate::error::{MffError, Result};
use crate::tree::{parse_tree, XmlNode, XSI_NAMESPACE};
use crate::types::Epoch;

/// A metadata document type that can be dispatched to by the registry
pub trait XmlSchema: Sized {
    const NAMESPACE: &'static str;
    const ROOT_TAG: &'static str;
    const DEFAULT_FILENAME: &'static str;

    /// Wrap a parsed tree; accessors compute lazily from it
    fn from_root(root: XmlNode) -> Result<Self>;

    fn root(&self) -> &XmlNode;
}

type ParseFn = fn(XmlNode) -> Result<XmlDocument>;

fn parse_as<T>(root: XmlNode) -> Result<XmlDocument>
where
    T: XmlSchema + Into<XmlDocument>,
{
    T::from_root(root).map(Into::into)
}

/// Registry record for one document type
#[derive(Clone, Copy)]
pub struct SchemaEntry {
    pub namespace: &'static str,
    pub root_tag: &'static str,
    pub default_filename: &'static str,
    parse: ParseFn,
}

impl SchemaEntry {
    pub fn of<T>() -> Self
    where
        T: XmlSchema + Into<XmlDocument>,
    {
        SchemaEntry {
            namespace: T::NAMESPACE,
            root_tag: T::ROOT_TAG,
            default_filename: T::DEFAULT_FILENAME,
            parse: parse_as::<T>,
        }
    }

    /// `{namespace}rootTag`
    pub fn qualified_tag(&self) -> String {
        format!("{{{}}}{}", self.namespace, self.root_tag)
    }
}

impl std::fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("namespace", &self.namespace)
            .field("root_tag", &self.root_tag)
            .field("default_filename", &self.default_filename)
            .finish()
    }
}

/// A parsed document of any registered type
#[derive(Debug)]
pub enum XmlDocument {
    FileInfo(FileInfo),
    DataInfo(DataInfo),
    Patient(Patient),
    SensorLayout(SensorLayout),
    Coordinates(Coordinates),
    Epochs(Epochs),
    EventTrack(EventTrack),
    Categories(Categories),
    DipoleSet(DipoleSet),
}

impl XmlDocument {
    pub fn root_tag(&self) -> &'static str {
        match self {
            XmlDocument::FileInfo(_) => FileInfo::ROOT_TAG,
            XmlDocument::DataInfo(_) => DataInfo::ROOT_TAG,
            XmlDocument::Patient(_) => Patient::ROOT_TAG,
            XmlDocument::SensorLayout(_) => SensorLayout::ROOT_TAG,
            XmlDocument::Coordinates(_) => Coordinates::ROOT_TAG,
            XmlDocument::Epochs(_) => Epochs::ROOT_TAG,
            XmlDocument::EventTrack(_) => EventTrack::ROOT_TAG,
            XmlDocument::Categories(_) => Categories::ROOT_TAG,
            XmlDocument::DipoleSet(_) => DipoleSet::ROOT_TAG,
        }
    }

    fn mismatch(&self, expected: &str) -> MffError {
        MffError::InvalidFormat(format!(
            "expected a <{}> document, found <{}>",
            expected,
            self.root_tag()
        ))
    }

    pub fn into_file_info(self) -> Result<FileInfo> {
        match self {
            XmlDocument::FileInfo(doc) => Ok(doc),
            other => Err(other.mismatch(FileInfo::ROOT_TAG)),
        }
    }

    pub fn into_data_info(self) -> Result<DataInfo> {
        match self {
            XmlDocument::DataInfo(doc) => Ok(doc),
            other => Err(other.mismatch(DataInfo::ROOT_TAG)),
        }
    }

    pub fn into_patient(self) -> Result<Patient> {
        match self {
            XmlDocument::Patient(doc) => Ok(doc),
            other => Err(other.mismatch(Patient::ROOT_TAG)),
        }
    }

    pub fn into_epochs(self) -> Result<Epochs> {
        match self {
            XmlDocument::Epochs(doc) => Ok(doc),
            other => Err(other.mismatch(Epochs::ROOT_TAG)),
        }
    }

    pub fn into_event_track(self) -> Result<EventTrack> {
        match self {
            XmlDocument::EventTrack(doc) => Ok(doc),
            other => Err(other.mismatch(EventTrack::ROOT_TAG)),
        }
    }

    pub fn into_categories(self) -> Result<Categories> {
        match self {
            XmlDocument::Categories(doc) => Ok(doc),
            other => Err(other.mismatch(Categories::ROOT_TAG)),
        }
    }

    pub fn into_sensor_layout(self) -> Result<SensorLayout> {
        match self {
            XmlDocument::SensorLayout(doc) => Ok(doc),
            other => Err(other.mismatch(SensorLayout::ROOT_TAG)),
        }
    }

    pub fn into_coordinates(self) -> Result<Coordinates> {
        match self {
            XmlDocument::Coordinates(doc) => Ok(doc),
            other => Err(other.mismatch(Coordinates::ROOT_TAG)),
        }
    }

    pub fn into_dipole_set(self) -> Result<DipoleSet> {
        match self {
            XmlDocument::DipoleSet(doc) => Ok(doc),
            other => Err(other.mismatch(DipoleSet::ROOT_TAG)),
        }
    }
}

impl From<FileInfo> for XmlDocument {
    fn from(doc: FileInfo) -> Self {
        XmlDocument::FileInfo(doc)
    }
}

impl From<DataInfo> for XmlDocument {
    fn from(doc: DataInfo) -> Self {
        XmlDocument::DataInfo(doc)
    }
}

impl From<Patient> for XmlDocument {
    fn from(doc: Patient) -> Self {
        XmlDocument::Patient(doc)
    }
}

impl From<SensorLayout> for XmlDocument {
    fn from(doc: SensorLayout) -> Self {
        XmlDocument::SensorLayout(doc)
    }
}

impl From<Coordinates> for XmlDocument {
    fn from(doc: Coordinates) -> Self {
        XmlDocument::Coordinates(doc)
    }
}

impl From<Epochs> for XmlDocument {
    fn from(doc: Epochs) -> Self {
        XmlDocument::Epochs(doc)
    }
}

impl From<EventTrack> for XmlDocument {
    fn from(doc: EventTrack) -> Self {
        XmlDocument::EventTrack(doc)
    }
}

impl From<Categories> for XmlDocument {
    fn from(doc: Categories) -> Self {
        XmlDocument::Categories(doc)
    }
}

impl From<DipoleSet> for XmlDocument {
    fn from(doc: DipoleSet) -> Self {
        XmlDocument::DipoleSet(doc)
    }
}

/// Fields for serializing one document, tagged by document type
#[derive(Debug, Clone)]
pub enum DocumentContent {
    FileInfo(FileInfoContent),
    DataInfo(DataInfoContent),
    Patient(PatientContent),
    Epochs(Vec<Epoch>),
    EventTrack(EventTrackContent),
}

impl DocumentContent {
    /// Logical name (root tag) of the document this content serializes to
    pub fn logical_name(&self) -> &'static str {
        match self {
            DocumentContent::FileInfo(_) => FileInfo::ROOT_TAG,
            DocumentContent::DataInfo(_) => DataInfo::ROOT_TAG,
            DocumentContent::Patient(_) => Patient::ROOT_TAG,
            DocumentContent::Epochs(_) => Epochs::ROOT_TAG,
            DocumentContent::EventTrack(_) => EventTrack::ROOT_TAG,
        }
    }

    /// Children of the root element; pure and deterministic
    pub fn build(&self) -> Result<Vec<XmlNode>> {
        match self {
            DocumentContent::FileInfo(c) => FileInfo::build_content(c),
            DocumentContent::DataInfo(c) => DataInfo::build_content(c),
            DocumentContent::Patient(c) => Patient::build_content(c),
            DocumentContent::Epochs(c) => Epochs::build_content(c),
            DocumentContent::EventTrack(c) => EventTrack::build_content(c),
        }
    }
}

/// Everything a writer needs to emit one document file
#[derive(Debug, Clone)]
pub struct WriteDescriptor {
    /// Complete tree including the namespaced root element
    pub content: XmlNode,
    pub filename: &'static str,
    pub namespace: &'static str,
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    by_tag: HashMap<String, SchemaEntry>,
    by_name: HashMap<&'static str, SchemaEntry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Registry holding every document type this crate understands
    pub fn with_builtin_schemas() -> Self {
        let mut registry = SchemaRegistry::new();
        registry.register::<FileInfo>();
        registry.register::<DataInfo>();
        registry.register::<Patient>();
        registry.register::<SensorLayout>();
        registry.register::<Coordinates>();
        registry.register::<Epochs>();
        registry.register::<EventTrack>();
        registry.register::<Categories>();
        registry.register::<DipoleSet>();
        registry
    }

    /// Register `T` under its namespace and root tag; returns `true` if an
    /// earlier entry was overwritten
    pub fn register<T>(&mut self) -> bool
    where
        T: XmlSchema + Into<XmlDocument>,
    {
        self.register_entry(SchemaEntry::of::<T>()).is_some()
    }

    pub fn register_entry(&mut self, entry: SchemaEntry) -> Option<SchemaEntry> {
        let key = entry.qualified_tag();
        let previous = self.by_tag.insert(key.clone(), entry);
        if let Some(old) = &previous {
            warn!("overwriting {:?} in schema registry under {}", old, key);
        }
        self.by_name.insert(entry.root_tag, entry);
        previous
    }

    pub fn lookup(&self, qualified_tag: &str) -> Option<&SchemaEntry> {
        self.by_tag.get(qualified_tag)
    }

    pub fn entry(&self, logical_name: &str) -> Option<&SchemaEntry> {
        self.by_name.get(logical_name)
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    /// Parse a document and construct the parser registered for its root element
    pub fn from_document<R: BufRead>(&self, source: R) -> Result<XmlDocument> {
        let root = parse_tree(source)?;
        let tag = root.qualified_tag();
        let entry = self.lookup(&tag).ok_or(MffError::UnknownSchema(tag))?;
        (entry.parse)(root)
    }

    pub fn from_str(&self, text: &str) -> Result<XmlDocument> {
        self.from_document(text.as_bytes())
    }

    pub fn from_file<P: AsRef<Path>>(&self, path: P) -> Result<XmlDocument> {
        let file = File::open(&path)
            .map_err(|e| MffError::FileNotFound(format!("{}: {}", path.as_ref().display(), e)))?;
        self.from_document(BufReader::new(file))
    }

    /// Describe how to write `content` as the document named `logical_name`
    pub fn describe_for_write(
        &self,
        logical_name: &str,
        content: &DocumentContent,
    ) -> Result<WriteDescriptor> {
        let entry = self
            .entry(logical_name)
            .ok_or_else(|| MffError::UnknownSchema(logical_name.to_string()))?;
        if content.logical_name() != logical_name {
            return Err(MffError::InvalidFormat(format!(
                "content for <{}> cannot be written as <{}>",
                content.logical_name(),
                logical_name
            )));
        }

        let root = XmlNode::parent(entry.root_tag, content.build()?)
            .with_namespace(entry.namespace)
            .with_attribute("xmlns:xsi", XSI_NAMESPACE);
        Ok(WriteDescriptor {
            content: root,
            filename: entry.default_filename,
            namespace: entry.namespace,
        })
    }
}

/// Process-wide registry of the built-in schemas
pub fn registry() -> &'static SchemaRegistry {
    static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SchemaRegistry::with_builtin_schemas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_knows_all_types() {
        let reg = registry();
        assert_eq!(reg.len(), 9);
        assert!(reg.lookup("{http://www.egi.com/info_n_mff}dataInfo").is_some());
        assert_eq!(reg.entry("epochs").unwrap().default_filename, "epochs.xml");
    }

    #[test]
    fn test_duplicate_registration_overwrites() {
        let mut reg = SchemaRegistry::new();
        assert!(!reg.register::<Epochs>());
        assert!(reg.register::<Epochs>());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_unknown_root_tag_names_the_tag() {
        let doc = r#"<mystery xmlns="http://example.com/x"><a/></mystery>"#;
        match registry().from_str(doc) {
            Err(MffError::UnknownSchema(tag)) => {
                assert_eq!(tag, "{http://example.com/x}mystery");
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.root_tag())),
        }
    }

    #[test]
    fn test_wrong_namespace_is_unknown() {
        let doc = r#"<epochs xmlns="http://example.com/other"/>"#;
        assert!(matches!(registry().from_str(doc), Err(MffError::UnknownSchema(_))));
    }

    #[test]
    fn test_describe_for_write_unknown_name() {
        let content = DocumentContent::Epochs(Vec::new());
        assert!(matches!(
            registry().describe_for_write("nonsense", &content),
            Err(MffError::UnknownSchema(_))
        ));
    }

    #[test]
    fn test_describe_for_write_content_mismatch() {
        let content = DocumentContent::Epochs(Vec::new());
        assert!(matches!(
            registry().describe_for_write("fileInfo", &content),
            Err(MffError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_describe_for_write_epochs() {
        let epochs = vec![Epoch { begin_time: 0, end_time: 2_000_000, first_block: 1, last_block: 2 }];
        let desc = registry()
            .describe_for_write("epochs", &DocumentContent::Epochs(epochs))
            .unwrap();
        assert_eq!(desc.filename, "epochs.xml");
        assert_eq!(desc.namespace, "http://www.egi.com/epochs_mff");
        assert_eq!(desc.content.name, "epochs");
        assert_eq!(desc.content.find_all("epoch").count(), 1);
    }
}
