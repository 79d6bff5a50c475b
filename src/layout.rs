//! Versioned CPython struct layouts.
//!
//! Everything the profiler knows about the target's in-memory data layout
//! lives in this table; the locator and frame walker consume it and nothing
//! else hard-codes an offset. Offsets are for x86_64/aarch64 (LP64) builds
//! of the stock interpreter.

use std::path::Path;

use crate::error::LocatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PythonVersion {
    /// CPython 2.6 and 2.7.
    Py2,
    /// CPython 3.4 and 3.5.
    Py34,
    /// CPython 3.6.
    Py36,
}

/// Offsets of the size field and character data within a string-ish object
/// (PyStringObject, PyBytesObject, or a compact-ASCII PyUnicodeObject).
#[derive(Debug, Clone, Copy)]
pub struct StringLayout {
    pub size: u64,
    pub data: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct StructLayout {
    pub version: PythonVersion,
    /// PyInterpreterState.tstate_head
    pub istate_tstate_head: u64,
    /// PyThreadState.frame
    pub tstate_frame: u64,
    /// PyFrameObject.{f_back, f_code, f_lasti}
    pub frame_back: u64,
    pub frame_code: u64,
    pub frame_lasti: u64,
    /// PyCodeObject.{co_filename, co_name, co_firstlineno, co_lnotab}
    pub code_filename: u64,
    pub code_name: u64,
    pub code_firstlineno: u64,
    pub code_lnotab: u64,
    /// Layout of co_name / co_filename objects.
    pub string: StringLayout,
    /// Layout of the co_lnotab object (bytes under py3, str under py2).
    pub lnotab: StringLayout,
    /// 3.6 switched lnotab line deltas from unsigned to signed bytes.
    pub signed_lnotab: bool,
}

// PyStringObject: ob_refcnt, ob_type, ob_size, ob_shash, ob_sstate, ob_sval.
const PY2_STRING: StringLayout = StringLayout { size: 16, data: 36 };
// PyBytesObject: ob_refcnt, ob_type, ob_size, ob_shash, ob_sval.
const PY3_BYTES: StringLayout = StringLayout { size: 16, data: 32 };
// Compact ASCII PyUnicodeObject: data follows the PyASCIIObject header.
const PY3_UNICODE: StringLayout = StringLayout { size: 16, data: 48 };

const PY2_LAYOUT: StructLayout = StructLayout {
    version: PythonVersion::Py2,
    istate_tstate_head: 8,
    tstate_frame: 16,
    frame_back: 24,
    frame_code: 32,
    frame_lasti: 120,
    code_filename: 80,
    code_name: 88,
    code_firstlineno: 96,
    code_lnotab: 104,
    string: PY2_STRING,
    lnotab: PY2_STRING,
    signed_lnotab: false,
};

const PY34_LAYOUT: StructLayout = StructLayout {
    version: PythonVersion::Py34,
    istate_tstate_head: 8,
    tstate_frame: 24,
    frame_back: 24,
    frame_code: 32,
    frame_lasti: 120,
    code_filename: 96,
    code_name: 104,
    code_firstlineno: 112,
    code_lnotab: 120,
    string: PY3_UNICODE,
    lnotab: PY3_BYTES,
    signed_lnotab: false,
};

// 3.6 moved co_firstlineno up next to co_flags.
const PY36_LAYOUT: StructLayout = StructLayout {
    version: PythonVersion::Py36,
    istate_tstate_head: 8,
    tstate_frame: 24,
    frame_back: 24,
    frame_code: 32,
    frame_lasti: 120,
    code_filename: 96,
    code_name: 104,
    code_firstlineno: 36,
    code_lnotab: 112,
    string: PY3_UNICODE,
    lnotab: PY3_BYTES,
    signed_lnotab: true,
};

impl StructLayout {
    pub fn for_version(major: u32, minor: u32) -> Result<&'static StructLayout, LocatorError> {
        match (major, minor) {
            (2, 6) | (2, 7) => Ok(&PY2_LAYOUT),
            (3, 4) | (3, 5) => Ok(&PY34_LAYOUT),
            (3, 6) => Ok(&PY36_LAYOUT),
            _ => Err(LocatorError::UnsupportedRuntime(format!(
                "python {major}.{minor} is not supported (supported: 2.6-2.7, 3.4-3.6)"
            ))),
        }
    }
}

/// Extracts the interpreter version from the image file name, e.g.
/// `python2.7`, `libpython3.6m.so.1.0`.
pub fn version_from_path(path: &Path) -> Result<(u32, u32), LocatorError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let unsupported = || {
        LocatorError::UnsupportedRuntime(format!(
            "cannot determine python version from image name `{name}`"
        ))
    };

    let rest = name
        .find("python")
        .map(|i| &name[i + "python".len()..])
        .ok_or_else(unsupported)?;
    let mut parts = rest.splitn(2, '.');
    let major: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(unsupported)?;
    let minor_str = parts.next().ok_or_else(unsupported)?;
    let digits: String = minor_str.chars().take_while(char::is_ascii_digit).collect();
    let minor: u32 = digits.parse().map_err(|_| unsupported())?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn version_parsed_from_executable_and_library_names() {
        assert_eq!(
            version_from_path(&PathBuf::from("/usr/bin/python2.7")).unwrap(),
            (2, 7)
        );
        assert_eq!(
            version_from_path(&PathBuf::from("/usr/lib/libpython3.6m.so.1.0")).unwrap(),
            (3, 6)
        );
        assert_eq!(
            version_from_path(&PathBuf::from("/opt/py/libpython3.4.so")).unwrap(),
            (3, 4)
        );
    }

    #[test]
    fn versionless_name_is_unsupported() {
        assert!(version_from_path(&PathBuf::from("/usr/bin/python")).is_err());
        assert!(version_from_path(&PathBuf::from("/usr/bin/cat")).is_err());
    }

    #[test]
    fn layout_table_covers_the_supported_range() {
        assert_eq!(
            StructLayout::for_version(2, 7).unwrap().version,
            PythonVersion::Py2
        );
        assert_eq!(
            StructLayout::for_version(3, 5).unwrap().version,
            PythonVersion::Py34
        );
        assert_eq!(
            StructLayout::for_version(3, 6).unwrap().version,
            PythonVersion::Py36
        );
        assert!(StructLayout::for_version(3, 7).is_err());
        assert!(StructLayout::for_version(2, 5).is_err());
    }

    #[test]
    fn firstlineno_moved_in_36() {
        assert_eq!(PY34_LAYOUT.code_firstlineno, 112);
        assert_eq!(PY36_LAYOUT.code_firstlineno, 36);
        assert!(PY36_LAYOUT.signed_lnotab);
        assert!(!PY34_LAYOUT.signed_lnotab);
    }
}
