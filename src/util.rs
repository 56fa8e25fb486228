use std::io::Write;
use std::path::Path;

/// Write `content` to `path` atomically (temp file in the same directory, then rename).
///
/// Creates the parent directory when missing.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    if !parent.exists() {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Join a relative endpoint path onto an API base URL.
///
/// `Url::join` drops the last base segment unless it ends with `/`, so the
/// base is normalized first: `http://h/api` + `dashboard` → `http://h/api/dashboard`.
pub fn join_endpoint(base: &url::Url, path: &str) -> Result<url::Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
}
