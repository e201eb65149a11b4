//! Path utilities for egg entries
//!
//! ZIP entry names always use forward slashes, with a trailing slash marking a
//! directory entry. On extraction every name is checked before it is joined
//! onto the destination so that no entry can land outside it.

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Convert a relative filesystem path into a ZIP entry name
///
/// # Examples
///
/// ```
/// use egg_archive::path::entry_name_from_path;
/// use std::path::Path;
///
/// assert_eq!(entry_name_from_path(Path::new("pyovpn/lic/uprop.pyc")), "pyovpn/lic/uprop.pyc");
/// ```
pub fn entry_name_from_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Code page 437 characters for bytes 0x80 to 0xFF
const CP437_HIGH: &str = "\
ÇüéâäàåçêëèïîìÄÅÉæÆôöòûùÿÖÜ¢£¥₧ƒáíóúñÑªº¿⌐¬½¼¡«»\
░▒▓│┤╡╢╖╕╣║╗╝╜╛┐└┴┬├─┼╞╟╚╔╩╦╠═╬╧╨╤╥╙╘╒╓╫╪┘┌█▄▌▐▀\
αßΓπΣσµτΦΘΩδ∞φε∩≡±≥≤⌠⌡÷≈°∙·√ⁿ²■\u{a0}";

/// Decode an entry name written without the UTF-8 flag
///
/// Such names are code page 437, the ZIP default.
pub fn decode_cp437(raw: &[u8]) -> String {
    if raw.is_ascii() {
        return String::from_utf8_lossy(raw).into_owned();
    }
    raw.iter()
        .map(|&byte| {
            if byte.is_ascii() {
                char::from(byte)
            } else {
                CP437_HIGH
                    .chars()
                    .nth(usize::from(byte - 0x80))
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
            }
        })
        .collect()
}

/// Whether an entry name denotes a directory
pub fn is_directory_name(name: &str) -> bool {
    name.ends_with('/')
}

/// Validate an entry name and resolve it beneath `dest`
///
/// Rejects empty names, NUL bytes, absolute paths and parent directory
/// references. Backslashes are treated as separators, as some Windows tools
/// write them.
pub fn resolve_entry_path(dest: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(Error::UnsafePath("empty entry name".to_string()));
    }

    if name.contains('\0') {
        return Err(Error::UnsafePath(format!("{name:?} contains a NUL byte")));
    }

    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(Error::UnsafePath(format!("{name} is absolute")));
    }

    let mut resolved = dest.to_path_buf();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(Error::UnsafePath(format!(
                    "{name} contains a parent directory reference"
                )));
            }
            part => resolved.push(part),
        }
    }

    Ok(resolved)
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
