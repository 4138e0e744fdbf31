// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::fs;
use std::io;
use std::path::Path;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Recursively copies a directory. The destination must not exist yet.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// Formats a byte count with a binary unit suffix.
pub fn human_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use crate::util::{copy_dir_all, filename_display, human_bytes};

    #[test]
    fn test_human_bytes() {
        assert_eq!("0 B", human_bytes(0));
        assert_eq!("1023 B", human_bytes(1023));
        assert_eq!("1.0 KiB", human_bytes(1024));
        assert_eq!("1.5 MiB", human_bytes(1024 * 1024 * 3 / 2));
    }

    #[test]
    fn test_filename_display() {
        assert_eq!("click.wav", filename_display(Path::new("/a/b/click.wav")));
        assert_eq!("unreadable file name", filename_display(Path::new("/")));
    }

    #[test]
    fn test_copy_dir_all() -> std::io::Result<()> {
        let temp = tempfile::tempdir()?;
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested"))?;
        fs::write(src.join("top.txt"), "top")?;
        fs::write(src.join("nested").join("inner.txt"), "inner")?;

        let dst = temp.path().join("dst");
        copy_dir_all(&src, &dst)?;

        assert_eq!(fs::read_to_string(dst.join("top.txt"))?, "top");
        assert_eq!(fs::read_to_string(dst.join("nested").join("inner.txt"))?, "inner");
        assert!(copy_dir_all(&src, &dst).is_err());
        Ok(())
    }
}
