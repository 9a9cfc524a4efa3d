use crate::retry::RetryPolicy;
use crate::source::{split_url, HttpConnector, LocalConnector, SourceError, SourceFactory};
use std::path::Path;
use std::sync::Arc;

/// Something to install: how to connect, the object's path on that
/// connection, and the key its content hash is derived from.
#[derive(Clone)]
pub struct InstallTarget {
    pub factory: Arc<dyn SourceFactory>,
    pub path: String,
    pub key: String,
}

impl std::fmt::Debug for InstallTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallTarget")
            .field("origin", &self.factory.describe())
            .field("path", &self.path)
            .field("key", &self.key)
            .finish()
    }
}

impl InstallTarget {
    pub fn new(factory: Arc<dyn SourceFactory>, path: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            factory,
            path: path.into(),
            key: key.into(),
        }
    }

    /// `http(s)://` URLs connect through curl; `file://` URLs read the local
    /// file's directory.
    pub fn from_url(url: &str, retry: RetryPolicy) -> Result<Self, SourceError> {
        let parsed = url::Url::parse(url).map_err(|e| SourceError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() == "file" {
            let file = parsed.to_file_path().map_err(|()| SourceError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local path".to_string(),
            })?;
            let (dir, name) = match (file.parent(), file.file_name()) {
                (Some(dir), Some(name)) => (dir.to_path_buf(), name.to_string_lossy().into_owned()),
                _ => {
                    return Err(SourceError::InvalidUrl {
                        url: url.to_string(),
                        reason: "no file name".to_string(),
                    })
                }
            };
            return Ok(Self::local(&dir, &name));
        }
        let (origin, path) = split_url(url)?;
        Ok(Self::new(
            Arc::new(HttpConnector::new(origin, retry)),
            path,
            url,
        ))
    }

    /// A file under a local root directory.
    pub fn local(root: &Path, path: &str) -> Self {
        let path = format!("/{}", path.trim_start_matches('/'));
        let key = format!("file://{}{}", root.display(), path);
        Self::new(Arc::new(LocalConnector::new(root)), path, key)
    }

    /// Last path segment, for logs and the activity label.
    pub fn label(&self) -> &str {
        let path = self.path.split(['?', '#']).next().unwrap_or(&self.path);
        path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
    }
}
