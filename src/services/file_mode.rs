//! Open dispositions and the decision table that emulates them on a blob.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::errors::{FsError, FsResult};

/// How `open` treats an existing or missing object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FileMode {
    /// Fail if the object exists.
    CreateNew,
    /// Start empty whether or not the object exists.
    Create,
    /// Fail if the object is missing.
    Open,
    /// Keep existing content, or start empty.
    OpenOrCreate,
    /// Fail if missing, otherwise start empty.
    Truncate,
    /// Keep existing content and position at its end.
    Append,
}

impl FileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateNew => "create-new",
            Self::Create => "create",
            Self::Open => "open",
            Self::OpenOrCreate => "open-or-create",
            Self::Truncate => "truncate",
            Self::Append => "append",
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create-new" => Ok(Self::CreateNew),
            "create" => Ok(Self::Create),
            "open" => Ok(Self::Open),
            "open-or-create" => Ok(Self::OpenOrCreate),
            "truncate" => Ok(Self::Truncate),
            "append" => Ok(Self::Append),
            other => Err(FsError::invalid(format!("unsupported file mode `{other}`"))),
        }
    }
}

/// Requested access on an opened file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Tri-state existence requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Existence {
    Required,
    DontCare,
}

/// What a staged open must check and do for a given mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeDecision {
    pub must_exist: Existence,
    pub forbid_exist: bool,
    pub preload: bool,
    pub seek_to_end: bool,
}

impl ModeDecision {
    /// Decision table for staged opens.
    ///
    /// Modes that replace or extend content need write access; asking for
    /// them read-only is rejected naming the mode.
    pub fn resolve(mode: FileMode, access: FileAccess) -> FsResult<Self> {
        use Existence::*;

        if !access.can_write()
            && matches!(
                mode,
                FileMode::CreateNew | FileMode::Create | FileMode::Truncate | FileMode::Append
            )
        {
            return Err(FsError::invalid(format!(
                "file mode `{mode}` requires write access"
            )));
        }

        let (must_exist, forbid_exist, preload, seek_to_end) = match mode {
            FileMode::CreateNew => (DontCare, true, false, false),
            FileMode::Create => (DontCare, false, false, false),
            FileMode::Open => (Required, false, false, false),
            FileMode::OpenOrCreate => (DontCare, false, true, false),
            FileMode::Truncate => (Required, false, false, false),
            FileMode::Append => (DontCare, false, true, true),
        };

        Ok(Self {
            must_exist,
            forbid_exist,
            preload,
            seek_to_end,
        })
    }

    /// Whether opening the object requires it to exist.
    pub fn requires_existing(&self) -> bool {
        self.must_exist == Existence::Required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table() {
        let rw = FileAccess::ReadWrite;
        let row = |mode| {
            let d = ModeDecision::resolve(mode, rw).unwrap();
            (d.requires_existing(), d.forbid_exist, d.preload, d.seek_to_end)
        };

        assert_eq!(row(FileMode::CreateNew), (false, true, false, false));
        assert_eq!(row(FileMode::Create), (false, false, false, false));
        assert_eq!(row(FileMode::Open), (true, false, false, false));
        assert_eq!(row(FileMode::OpenOrCreate), (false, false, true, false));
        assert_eq!(row(FileMode::Truncate), (true, false, false, false));
        assert_eq!(row(FileMode::Append), (false, false, true, true));
    }

    #[test]
    fn write_modes_need_write_access() {
        for mode in [
            FileMode::CreateNew,
            FileMode::Create,
            FileMode::Truncate,
            FileMode::Append,
        ] {
            let err = ModeDecision::resolve(mode, FileAccess::Read).unwrap_err();
            assert!(err.to_string().contains(mode.as_str()));
        }
        assert!(ModeDecision::resolve(FileMode::Open, FileAccess::Read).is_ok());
        assert!(ModeDecision::resolve(FileMode::OpenOrCreate, FileAccess::Read).is_ok());
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("append".parse::<FileMode>().unwrap(), FileMode::Append);
        assert_eq!(
            "open-or-create".parse::<FileMode>().unwrap(),
            FileMode::OpenOrCreate
        );
        let err = "overwrite".parse::<FileMode>().unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(ref m) if m.contains("overwrite")));
    }
}
