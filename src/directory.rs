//! Container resolver: maps a `.mff` directory onto its documents and
//! `signal<N>.bin` / `info<N>.xml` pairs.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::vec;

use log::{debug, info};

use crate::blocks::RawBinFile;
use crate::documents::DataInfo;
use crate::error::{MffError, Result};
use crate::schema::registry;
use crate::signal::BinFile;
use crate::types::FileKind;
use crate::MFF_EXTENSION;

/// `prefix<N>ext` → `N`
fn numbered(name: &str, prefix: &str, ext: &str) -> Option<u32> {
    let digits = name.strip_prefix(prefix)?.strip_suffix(ext)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn is_container_path(path: &Path) -> bool {
    path.is_dir()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case(MFF_EXTENSION))
}

/// An opened container directory.
///
/// Entries are enumerated once in [`MffDirectory::open`]; nothing is parsed
/// until asked for.
#[derive(Debug, Clone)]
pub struct MffDirectory {
    path: PathBuf,
    singletons: BTreeMap<FileKind, PathBuf>,
    signals: BTreeMap<u32, PathBuf>,
    infos: BTreeMap<u32, PathBuf>,
    event_tracks: Vec<PathBuf>,
}

impl MffDirectory {
    /// Enumerate a container directory.
    ///
    /// # Errors
    ///
    /// * [`MffError::NotAContainer`] if `path` is not a directory with the
    ///   `.mff` extension
    /// * [`MffError::MissingFile`] if `info.xml` is absent
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !is_container_path(path) {
            return Err(MffError::NotAContainer(path.display().to_string()));
        }

        let mut dir = MffDirectory {
            path: path.to_path_buf(),
            singletons: BTreeMap::new(),
            signals: BTreeMap::new(),
            infos: BTreeMap::new(),
            event_tracks: Vec::new(),
        };

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let full = entry.path();

            if let Some(kind) = FileKind::ALL.iter().find(|k| k.filename() == name) {
                dir.singletons.insert(*kind, full);
            } else if let Some(n) = numbered(name, "signal", ".bin") {
                dir.signals.insert(n, full);
            } else if let Some(n) = numbered(name, "info", ".xml") {
                dir.infos.insert(n, full);
            } else if name.starts_with("Events") && name.ends_with(".xml") {
                dir.event_tracks.push(full);
            } else {
                debug!("ignoring {} in {}", name, path.display());
            }
        }
        dir.event_tracks.sort();

        for kind in FileKind::ALL.iter().filter(|k| k.is_mandatory()) {
            if !dir.singletons.contains_key(kind) {
                return Err(MffError::MissingFile(format!(
                    "{} in {}",
                    kind.filename(),
                    path.display()
                )));
            }
        }

        info!(
            "opened container {}: {} signal files, {} documents, {} event tracks",
            path.display(),
            dir.signals.len(),
            dir.singletons.len(),
            dir.event_tracks.len()
        );
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a singleton document; absent documents are [`MffError::MissingFile`]
    pub fn filename(&self, kind: FileKind) -> Result<&Path> {
        self.optional_filename(kind).ok_or_else(|| {
            MffError::MissingFile(format!("{} in {}", kind.filename(), self.path.display()))
        })
    }

    pub fn optional_filename(&self, kind: FileKind) -> Option<&Path> {
        self.singletons.get(&kind).map(PathBuf::as_path)
    }

    /// `Events*.xml` files, sorted by name
    pub fn event_track_files(&self) -> &[PathBuf] {
        &self.event_tracks
    }

    /// Numeric suffixes of the signal files, ascending
    pub fn signal_suffixes(&self) -> Vec<u32> {
        self.signals.keys().copied().collect()
    }

    /// Lazily open every signal group, ordered by ascending suffix.
    ///
    /// Pairing is checked up front, so an [`MffError::UnpairedFile`] is
    /// returned before any stream is opened. Each call starts a fresh pass.
    pub fn signals_with_info(&self) -> Result<SignalsWithInfo> {
        if let Some((n, bin)) = self.signals.iter().find(|(n, _)| !self.infos.contains_key(*n)) {
            return Err(MffError::UnpairedFile(format!(
                "{} has no info{}.xml",
                bin.display(),
                n
            )));
        }
        if let Some((n, xml)) = self.infos.iter().find(|(n, _)| !self.signals.contains_key(*n)) {
            return Err(MffError::UnpairedFile(format!(
                "{} has no signal{}.bin",
                xml.display(),
                n
            )));
        }

        let pairs: Vec<_> = self
            .signals
            .iter()
            .map(|(n, bin)| (*n, bin.clone(), self.infos[n].clone()))
            .collect();
        Ok(SignalsWithInfo { pairs: pairs.into_iter() })
    }
}

/// One signal group as found on disk
#[derive(Debug)]
pub struct SignalWithInfo {
    pub suffix: u32,
    pub signal: RawBinFile<BufReader<File>>,
    pub info: DataInfo,
}

impl SignalWithInfo {
    pub fn into_bin_file(self) -> Result<BinFile> {
        BinFile::new(self.signal, self.info)
    }
}

/// Iterator returned by [`MffDirectory::signals_with_info`]
#[derive(Debug)]
pub struct SignalsWithInfo {
    pairs: vec::IntoIter<(u32, PathBuf, PathBuf)>,
}

impl Iterator for SignalsWithInfo {
    type Item = Result<SignalWithInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let (suffix, bin, xml) = self.pairs.next()?;
        debug!("pairing {} with {}", bin.display(), xml.display());
        Some(open_pair(suffix, &bin, &xml))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pairs.size_hint()
    }
}

fn open_pair(suffix: u32, bin: &Path, xml: &Path) -> Result<SignalWithInfo> {
    let info = registry().from_file(xml)?.into_data_info()?;
    let signal = RawBinFile::open(bin)?;
    Ok(SignalWithInfo { suffix, signal, info })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_names() {
        assert_eq!(numbered("signal1.bin", "signal", ".bin"), Some(1));
        assert_eq!(numbered("signal12.bin", "signal", ".bin"), Some(12));
        assert_eq!(numbered("signal.bin", "signal", ".bin"), None);
        assert_eq!(numbered("signal1a.bin", "signal", ".bin"), None);
        assert_eq!(numbered("info.xml", "info", ".xml"), None);
        assert_eq!(numbered("info2.xml", "info", ".xml"), Some(2));
    }

    #[test]
    fn test_plain_directory_is_not_a_container() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MffDirectory::open(dir.path()),
            Err(MffError::NotAContainer(_))
        ));
    }

    #[test]
    fn test_missing_info_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mff = dir.path().join("empty.mff");
        fs::create_dir(&mff).unwrap();
        assert!(matches!(MffDirectory::open(&mff), Err(MffError::MissingFile(_))));
    }

    #[test]
    fn test_unpaired_file_detected_before_open() {
        let dir = tempfile::tempdir().unwrap();
        let mff = dir.path().join("rec.MFF");
        fs::create_dir(&mff).unwrap();
        fs::write(mff.join("info.xml"), "").unwrap();
        fs::write(mff.join("signal1.bin"), "").unwrap();
        fs::write(mff.join("Events_ECI.xml"), "").unwrap();

        let container = MffDirectory::open(&mff).unwrap();
        assert_eq!(container.signal_suffixes(), vec![1]);
        assert_eq!(container.event_track_files().len(), 1);
        assert!(container.optional_filename(FileKind::Epochs).is_none());
        assert!(matches!(
            container.filename(FileKind::Epochs),
            Err(MffError::MissingFile(_))
        ));
        assert!(matches!(
            container.signals_with_info(),
            Err(MffError::UnpairedFile(_))
        ));
    }

    #[test]
    fn test_orphan_info_detected_before_open() {
        let dir = tempfile::tempdir().unwrap();
        let mff = dir.path().join("rec.mff");
        fs::create_dir(&mff).unwrap();
        fs::write(mff.join("info.xml"), "").unwrap();
        // 文件都是空的: 配对检查必须在打开之前失败
        fs::write(mff.join("signal1.bin"), "").unwrap();
        fs::write(mff.join("info1.xml"), "").unwrap();
        fs::write(mff.join("info3.xml"), "").unwrap();

        let container = MffDirectory::open(&mff).unwrap();
        assert_eq!(container.signal_suffixes(), vec![1]);
        match container.signals_with_info() {
            Err(MffError::UnpairedFile(msg)) => assert!(msg.contains("signal3.bin"), "{}", msg),
            other => panic!("expected UnpairedFile, got {:?}", other.map(|_| ())),
        }
    }
}
