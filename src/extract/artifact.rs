//! Persisting extracted text to disk.

use std::io::Write as _;

use clap::ValueEnum;
use schemars::JsonSchema;
use uuid::Uuid;

use crate::{
    async_utils::spawn_blocking_propagating_panics, errors::ExtractionError,
    prelude::*,
};

/// Default directory for extracted text.
pub const DEFAULT_ARTIFACT_DIR: &str = "extracted";

/// File name used by [`ArtifactNaming::Shared`].
pub const SHARED_ARTIFACT_NAME: &str = "full_text.txt";

/// How should we name the artifact for each run?
#[derive(
    Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize,
    ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactNaming {
    /// Always write to `full_text.txt`. The last run wins.
    #[default]
    Shared,
    /// Write to `full_text-<uuid>.txt`, unique to each run.
    PerRequest,
}

/// Where extracted text gets written.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    naming: ArtifactNaming,
}

impl ArtifactStore {
    /// Create a new store writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>, naming: ArtifactNaming) -> Self {
        Self {
            dir: dir.into(),
            naming,
        }
    }

    /// Pick the path for the next artifact.
    fn next_path(&self) -> PathBuf {
        match self.naming {
            ArtifactNaming::Shared => self.dir.join(SHARED_ARTIFACT_NAME),
            ArtifactNaming::PerRequest => {
                self.dir.join(format!("full_text-{}.txt", Uuid::new_v4()))
            }
        }
    }

    /// Write `text` to a fresh artifact, replacing any previous contents.
    ///
    /// The text is written to a temporary file in the same directory and then
    /// renamed into place, so readers never see a partial or mixed file.
    #[instrument(level = "debug", skip_all, fields(dir = %self.dir.display()))]
    pub async fn persist(&self, text: &str) -> Result<PathBuf, ExtractionError> {
        let path = self.next_path();
        let persist_err = |err: anyhow::Error| ExtractionError::Persist {
            path: path.clone(),
            message: format!("{:#}", err),
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create directory {:?}", self.dir))
            .map_err(persist_err)?;

        let dir = self.dir.clone();
        let target = path.clone();
        let text = text.to_owned();
        spawn_blocking_propagating_panics(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)
                .with_context(|| format!("failed to create temporary file in {:?}", dir))?;
            tmp.write_all(text.as_bytes())
                .context("failed to write extracted text")?;
            tmp.flush().context("failed to flush extracted text")?;
            tmp.persist(&target)
                .with_context(|| format!("failed to move extracted text to {:?}", target))?;
            Ok(())
        })
        .await
        .map_err(persist_err)?;

        debug!(path = %path.display(), "Wrote extracted text");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_directory() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let dir = tmp.path().join("nested").join("extracted");
        let store = ArtifactStore::new(&dir, ArtifactNaming::Shared);
        let path = store.persist("hello").await?;
        assert_eq!(path, dir.join(SHARED_ARTIFACT_NAME));
        assert_eq!(std::fs::read_to_string(&path)?, "hello");
        Ok(())
    }

    #[tokio::test]
    async fn shared_artifact_is_overwritten_not_appended() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let store = ArtifactStore::new(tmp.path(), ArtifactNaming::Shared);
        store.persist("first run, which is fairly long").await?;
        let path = store.persist("second").await?;
        assert_eq!(std::fs::read_to_string(&path)?, "second");
        Ok(())
    }

    #[tokio::test]
    async fn per_request_artifacts_are_unique() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let store = ArtifactStore::new(tmp.path(), ArtifactNaming::PerRequest);
        let a = store.persist("a").await?;
        let b = store.persist("b").await?;
        assert_ne!(a, b);
        assert_eq!(std::fs::read_to_string(&a)?, "a");
        assert_eq!(std::fs::read_to_string(&b)?, "b");
        Ok(())
    }

    #[tokio::test]
    async fn unwritable_location_is_a_persist_error() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        // A regular file where the directory should be.
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "not a directory")?;
        let store = ArtifactStore::new(blocker.join("extracted"), ArtifactNaming::Shared);
        let err = store.persist("text").await.expect_err("should fail");
        assert!(matches!(err, ExtractionError::Persist { .. }));
        Ok(())
    }
}
