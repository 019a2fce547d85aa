//! Utility functions for file handling and common operations

use crate::{ArtifactError, ArtifactResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Check if a file is gzip compressed
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> ArtifactResult<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0; 2];

    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(ArtifactError::Io(e)),
    }
}

/// Open a text file, decompressing it when it starts with the gzip magic bytes
pub fn open_text<P: AsRef<Path>>(path: P) -> ArtifactResult<Box<dyn BufRead>> {
    let file = File::open(&path)
        .map_err(|_| ArtifactError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    let reader: Box<dyn BufRead> = if is_gzipped(&path)? {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// Create an output file, gzip compressed when the path ends in `.gz`
pub fn create_output<P: AsRef<Path>>(path: P) -> ArtifactResult<Box<dyn Write>> {
    ensure_parent_dirs(&path)?;
    let file = File::create(&path)?;
    let writer: Box<dyn Write> = if has_extension(&path, "gz") {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(BufWriter::new(file))
    };
    Ok(writer)
}

/// Get the number of CPU cores, with a fallback default
pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Validate file paths and check if they exist
pub fn validate_file_exists<P: AsRef<Path>>(path: P) -> ArtifactResult<()> {
    if !path.as_ref().exists() {
        return Err(ArtifactError::FileNotFound(
            path.as_ref().to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

/// Validate that a file is readable
pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> ArtifactResult<()> {
    validate_file_exists(&path)?;

    File::open(&path)
        .map_err(|_| ArtifactError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    Ok(())
}

/// Check if a path has a specific extension
pub fn has_extension<P: AsRef<Path>>(path: P, extension: &str) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Create parent directories if they don't exist
pub fn ensure_parent_dirs<P: AsRef<Path>>(path: P) -> ArtifactResult<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Log progress information
pub fn log_progress(current: usize, total: usize, message: &str) {
    if total > 0 {
        let percentage = (current as f64 / total as f64) * 100.0;
        log::info!("{}: {} / {} ({:.1}%)", message, current, total, percentage);
    }
}

/// Split items into at most `num_chunks` contiguous chunks, preserving order
pub fn chunkify<T: Clone>(items: &[T], num_chunks: usize) -> Vec<Vec<T>> {
    if items.is_empty() || num_chunks == 0 {
        return vec![items.to_vec()];
    }

    let num_chunks = std::cmp::min(num_chunks, items.len());
    let chunk_size = items.len().div_ceil(num_chunks);

    items.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

/// Timer utility for measuring execution time
pub struct Timer {
    start: std::time::Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::info!("Starting timer: {}", name);
        Timer {
            start: std::time::Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn log_elapsed(&self) {
        log::info!("Timer '{}' elapsed: {:.2?}", self.name, self.elapsed());
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.log_elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_is_gzipped() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "test content").unwrap();
        assert!(!is_gzipped(temp_file.path()).unwrap());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0x1f, 0x8b]).unwrap();
        assert!(is_gzipped(temp_file.path()).unwrap());

        let empty = NamedTempFile::new().unwrap();
        assert!(!is_gzipped(empty.path()).unwrap());
    }

    #[test]
    fn test_gzip_output_round_trips_through_open_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.tsv.gz");
        {
            let mut writer = create_output(&path).unwrap();
            writeln!(writer, "a\tb").unwrap();
        }
        assert!(is_gzipped(&path).unwrap());

        let mut content = String::new();
        open_text(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "a\tb\n");
    }

    #[test]
    fn test_open_text_missing_file() {
        assert!(matches!(
            open_text("/nonexistent/file.maf"),
            Err(ArtifactError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_get_num_cpus() {
        assert!(get_num_cpus() >= 1);
    }

    #[test]
    fn test_validate_file_exists() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(validate_file_exists(temp_file.path()).is_ok());
        assert!(validate_file_readable(temp_file.path()).is_ok());

        assert!(validate_file_exists("/nonexistent/file").is_err());
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("out.tsv.gz", "gz"));
        assert!(has_extension("out.TSV.GZ", "gz"));
        assert!(!has_extension("out.tsv", "gz"));
        assert!(!has_extension("out", "gz"));
    }

    #[test]
    fn test_chunkify_preserves_order() {
        let items: Vec<i32> = (1..=10).collect();
        let chunks = chunkify(&items, 3);

        assert_eq!(chunks.len(), 3);
        let flattened: Vec<i32> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, items);
    }

    #[test]
    fn test_chunkify_empty() {
        let items: Vec<i32> = vec![];
        let chunks = chunkify(&items, 3);

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new("test");
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(timer.elapsed().as_millis() >= 1);
    }
}
