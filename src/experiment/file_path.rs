//! Naming and placement of measurement files.
//!
//! Files live under `<data_dir>/<YYYYMMDD>/<UUID>_<name>/<UUID>_<name>.h5`.
//! The UUID is the unix timestamp of creation written in base 36 (six upper-case
//! characters for any date in this century), so it sorts by time and can be
//! decoded back into a timestamp.

use chrono::{DateTime, Local, TimeZone};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SweepError, SweepResult};

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Location of one measurement file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementFilePath {
    data_dir: PathBuf,
    datemark: String,
    uuid: String,
    name: String,
}

impl MeasurementFilePath {
    /// Path for a measurement started now.
    pub fn new(data_dir: impl Into<PathBuf>, name: &str) -> Self {
        Self::at(data_dir, name, Local::now())
    }

    /// Path for a measurement started at `time`.
    pub fn at<Tz: TimeZone>(data_dir: impl Into<PathBuf>, name: &str, time: DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            data_dir: data_dir.into(),
            datemark: time.format("%Y%m%d").to_string(),
            uuid: encode_uuid(time.timestamp().max(0) as u64),
            name: name.to_string(),
        }
    }

    /// Measurement name (without UUID).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Short identifier of the file.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// `<UUID>_<name>`.
    pub fn stem(&self) -> String {
        format!("{}_{}", self.uuid, self.name)
    }

    /// Folder relative to the data directory.
    pub fn rel_folder(&self) -> PathBuf {
        Path::new(&self.datemark).join(self.stem())
    }

    /// File path relative to the data directory.
    pub fn rel_path(&self) -> PathBuf {
        self.rel_folder().join(format!("{}.h5", self.stem()))
    }

    /// Folder holding the file and its side files.
    pub fn folder(&self) -> PathBuf {
        self.data_dir.join(self.rel_folder())
    }

    /// Absolute (or data-dir relative) path of the file.
    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(self.rel_path())
    }

    /// Create the folder.
    pub fn mkdirs(&self) -> SweepResult<()> {
        fs::create_dir_all(self.folder())?;
        Ok(())
    }
}

/// Base-36 representation of a unix timestamp.
pub fn encode_uuid(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    digits.iter().rev().collect()
}

/// Timestamp encoded by [`encode_uuid`].
pub fn decode_uuid(uuid: &str) -> SweepResult<u64> {
    uuid.to_ascii_uppercase().bytes().try_fold(0u64, |acc, byte| {
        let digit = ALPHABET
            .iter()
            .position(|c| *c == byte)
            .ok_or_else(|| SweepError::Configuration(format!("cannot decode uuid '{uuid}'")))?;
        acc.checked_mul(36)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| SweepError::Configuration(format!("uuid '{uuid}' overflows")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn layout_is_dated_and_prefixed() {
        let time = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let path = MeasurementFilePath::at("/data", "1D_demo", time);
        assert_eq!(path.uuid().len(), 6);
        let stem = format!("{}_1D_demo", path.uuid());
        assert_eq!(
            path.file_path(),
            PathBuf::from(format!("/data/20240305/{stem}/{stem}.h5"))
        );
        assert_eq!(path.rel_path(), PathBuf::from(format!("20240305/{stem}/{stem}.h5")));
    }

    #[test]
    fn uuid_decodes_to_timestamp() {
        let stamp = 1_700_000_000;
        assert_eq!(decode_uuid(&encode_uuid(stamp)).unwrap(), stamp);
        assert!(decode_uuid("ab-c").is_err());
    }

    #[test]
    fn mkdirs_creates_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = MeasurementFilePath::new(dir.path(), "scan");
        path.mkdirs().unwrap();
        assert!(path.folder().is_dir());
    }
}
