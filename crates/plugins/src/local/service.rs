use std::path::{Path, PathBuf};

/// One candidate file found under the watch directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeFile {
    pub file_path: PathBuf,
    pub filename: String,
}

/// Directory plumbing of the local plugin: the watched ingest directory
/// and the processed parking lot next to it.
pub struct LocalService {
    watch_directory: PathBuf,
    processed_directory: PathBuf,
}

impl LocalService {
    pub fn new(
        watch_directory: impl Into<PathBuf>,
        processed_directory: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        let watch_directory = watch_directory.into();
        let processed_directory = processed_directory.into();
        std::fs::create_dir_all(&watch_directory)?;
        std::fs::create_dir_all(&processed_directory)?;
        Ok(Self {
            watch_directory,
            processed_directory,
        })
    }

    /// Walk the watch directory recursively, listing every regular file.
    pub fn fetch_scrape_files(&self) -> std::io::Result<Vec<ScrapeFile>> {
        let mut files = Vec::new();
        walk(&self.watch_directory, &mut files)?;
        Ok(files)
    }

    /// Read a file's content, transparently decompressing `.zst` drops.
    pub fn read_file_content(&self, file_path: &Path) -> std::io::Result<Vec<u8>> {
        let bytes = std::fs::read(file_path)?;
        if file_path.extension().and_then(|ext| ext.to_str()) == Some("zst") {
            return zstd::decode_all(bytes.as_slice());
        }
        Ok(bytes)
    }

    /// Expand a compressed drop in place: write the decompressed
    /// content next to it (shedding the `.zst` suffix) and remove the
    /// original, so hashing and scanning see plaintext.
    pub fn expand_compressed(&self, file: &ScrapeFile) -> std::io::Result<ScrapeFile> {
        let content = self.read_file_content(&file.file_path)?;
        let target = file.file_path.with_extension("");
        std::fs::write(&target, content)?;
        std::fs::remove_file(&file.file_path)?;

        let filename = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.filename.clone());
        tracing::info!(from = %file.file_path.display(), to = %target.display(), "expanded compressed drop");
        Ok(ScrapeFile {
            file_path: target,
            filename,
        })
    }

    /// Park a finished file in the processed directory.
    pub fn move_file_to_processed(&self, file_path: &str) -> std::io::Result<PathBuf> {
        let source = Path::new(file_path);
        let filename = source
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no filename"))?;
        let destination = self.processed_directory.join(filename);

        match std::fs::rename(source, &destination) {
            Ok(()) => {}
            Err(_) => {
                std::fs::copy(source, &destination)?;
                std::fs::remove_file(source)?;
            }
        }
        tracing::info!(from = file_path, to = %destination.display(), "moved file to processed directory");
        Ok(destination)
    }
}

fn walk(dir: &Path, files: &mut Vec<ScrapeFile>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else if path.is_file() {
            let filename = entry.file_name().to_string_lossy().into_owned();
            files.push(ScrapeFile {
                file_path: path,
                filename,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn walk_finds_nested_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("top.txt"), "a").unwrap();
        std::fs::create_dir(root.path().join("nested")).unwrap();
        std::fs::write(root.path().join("nested/deep.txt"), "b").unwrap();

        let service = LocalService::new(root.path(), root.path().join("processed")).unwrap();
        let mut files = service.fetch_scrape_files().unwrap();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));

        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["deep.txt", "top.txt"]);
    }

    #[test]
    fn zst_files_are_read_decompressed() {
        let root = tempfile::tempdir().unwrap();
        let compressed = zstd::encode_all("user@example.com:hunter2".as_bytes(), 0).unwrap();
        let path = root.path().join("combo.txt.zst");
        std::fs::write(&path, compressed).unwrap();

        let service = LocalService::new(root.path(), root.path().join("processed")).unwrap();
        let content = service.read_file_content(&path).unwrap();
        assert_eq!(content, b"user@example.com:hunter2");
    }

    #[test]
    fn plain_files_are_read_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("plain.txt");
        std::fs::write(&path, "raw bytes").unwrap();

        let service = LocalService::new(root.path(), root.path().join("processed")).unwrap();
        assert_eq!(service.read_file_content(&path).unwrap(), b"raw bytes");
    }

    #[test]
    fn compressed_drops_expand_in_place() {
        let root = tempfile::tempdir().unwrap();
        let compressed = zstd::encode_all("leaked".as_bytes(), 0).unwrap();
        let path = root.path().join("dump.txt.zst");
        std::fs::write(&path, compressed).unwrap();

        let service = LocalService::new(root.path(), root.path().join("processed")).unwrap();
        let expanded = service
            .expand_compressed(&ScrapeFile {
                file_path: path.clone(),
                filename: "dump.txt.zst".to_string(),
            })
            .unwrap();

        assert!(!path.exists());
        assert_eq!(expanded.filename, "dump.txt");
        assert_eq!(
            std::fs::read_to_string(&expanded.file_path).unwrap(),
            "leaked"
        );
    }

    #[test]
    fn processed_files_leave_the_watch_directory() {
        let root = tempfile::tempdir().unwrap();
        let watch = root.path().join("watch");
        let processed = root.path().join("processed");
        let service = LocalService::new(&watch, &processed).unwrap();

        let path = watch.join("done.txt");
        std::fs::write(&path, "x").unwrap();

        let destination = service
            .move_file_to_processed(path.to_str().unwrap())
            .unwrap();
        assert!(!path.exists());
        assert_eq!(destination, processed.join("done.txt"));
        assert_eq!(std::fs::read_to_string(destination).unwrap(), "x");
    }
}
