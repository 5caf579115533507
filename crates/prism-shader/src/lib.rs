// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Loads precompiled SPIR-V from disk and validates the module header.
//! The renderer only ever sees validated word arrays; everything that can go
//! wrong here is reported as a value, never a panic.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

/// Word 0 of every valid SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to read SPIR-V file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("SPIR-V file is empty: {path}")]
    Empty { path: PathBuf },
    #[error("invalid SPIR-V size (not a multiple of 4 bytes): {path}, size: {size}")]
    Misaligned { path: PathBuf, size: usize },
    #[error("invalid SPIR-V magic number in {path}: expected 0x07230203, got {got:#010x}")]
    BadMagic { path: PathBuf, got: u32 },
}

/// A validated SPIR-V wordstream plus a human-readable status line.
pub struct ShaderModule {
    pub words: Vec<u32>,
    pub info: String,
}

impl fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderModule")
            .field("words", &self.words.len())
            .field("info", &self.info)
            .finish()
    }
}

/// Turn raw bytes into a SPIR-V wordstream, enforcing the header contract:
/// non-empty, byte length a multiple of 4, word 0 equal to the magic.
pub fn words_from_bytes(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.is_empty() {
        return Err(ShaderError::Empty {
            path: path.to_path_buf(),
        });
    }
    if bytes.len() % 4 != 0 {
        return Err(ShaderError::Misaligned {
            path: path.to_path_buf(),
            size: bytes.len(),
        });
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(ShaderError::BadMagic {
            path: path.to_path_buf(),
            got: words[0],
        });
    }
    Ok(words)
}

/// Load and validate a SPIR-V module from `path`.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<ShaderModule, ShaderError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| ShaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let words = words_from_bytes(path, &bytes)?;
    let info = format!(
        "loaded SPIR-V from {} ({} bytes, {} words)",
        path.display(),
        bytes.len(),
        words.len()
    );
    info!("{info}");
    Ok(ShaderModule { words, info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spirv_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn valid_magic_round_trips() {
        let bytes = spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000, 7, 0, 0]);
        let words = words_from_bytes(Path::new("tri.vert.spv"), &bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn zero_magic_is_rejected_with_diagnostic() {
        let bytes = spirv_bytes(&[0x0000_0000, 1, 2]);
        let err = words_from_bytes(Path::new("bad.spv"), &bytes).unwrap_err();
        assert!(matches!(err, ShaderError::BadMagic { got: 0, .. }));
        assert!(!err.to_string().is_empty());
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn misaligned_length_is_rejected() {
        let mut bytes = spirv_bytes(&[SPIRV_MAGIC]);
        bytes.push(0xff);
        let err = words_from_bytes(Path::new("odd.spv"), &bytes).unwrap_err();
        assert!(matches!(err, ShaderError::Misaligned { size: 5, .. }));
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = words_from_bytes(Path::new("empty.spv"), &[]).unwrap_err();
        assert!(matches!(err, ShaderError::Empty { .. }));
    }

    #[test]
    fn load_reports_path_size_and_word_count() {
        let dir = std::env::temp_dir();
        let path = dir.join("prism_shader_load_test.spv");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000, 3]))
            .unwrap();
        drop(f);

        let module = load_spirv(&path).unwrap();
        assert_eq!(module.words.len(), 3);
        assert!(module.info.contains("12 bytes"));
        assert!(module.info.contains("3 words"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_io_error_not_a_panic() {
        let err = load_spirv("/definitely/not/here.spv").unwrap_err();
        assert!(matches!(err, ShaderError::Io { .. }));
    }
}
