use crate::domain::artifact::Artifact;
use crate::domain::ports::{Publisher, Storage};
use crate::utils::error::{CompileError, Result};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use zip::write::{SimpleFileOptions, ZipWriter};

/// 發佈時額外打包的壓縮檔名稱
pub const ARCHIVE_NAME: &str = "bundle.zip";

/// 以某個目錄為根的本機檔案存取
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.base_path.join(path);
        let data = tokio::fs::read(full_path).await?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.base_path.join(path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(full_path, data).await?;
        Ok(())
    }
}

fn emission_error(path: &Path) -> impl FnOnce(std::io::Error) -> CompileError + '_ {
    move |source| CompileError::EmissionIoError {
        path: path.to_path_buf(),
        source,
    }
}

/// 所有產物打包成單一 zip；時間戳固定，內容可重現
fn build_archive(artifacts: &[Artifact]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().last_modified_time(zip::DateTime::default());
    for artifact in artifacts {
        zip.start_file(artifact.display_path(), options.clone())?;
        zip.write_all(artifact.contents.as_bytes())?;
    }
    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// 產物路徑必須是輸出目錄內的相對路徑
fn check_artifact_path(artifact: &Artifact) -> Result<()> {
    let path = artifact.path();
    let contained = path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if contained {
        Ok(())
    } else {
        Err(CompileError::EmissionError {
            emitter: "publisher".to_string(),
            details: format!(
                "artifact path '{}' escapes the output directory",
                path.display()
            ),
        })
    }
}

/// 將產物寫入暫存目錄後一次換上：成功前不動到既有輸出，失敗時還原
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    target: PathBuf,
    archive: bool,
}

impl DirectoryPublisher {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            archive: false,
        }
    }

    pub fn with_archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    fn publish_blocking(&self, artifacts: &[Artifact]) -> Result<PathBuf> {
        for artifact in artifacts {
            check_artifact_path(artifact)?;
        }

        let target = &self.target;
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(emission_error(&parent))?;

        let staging = tempfile::Builder::new()
            .prefix(".fleet-staging-")
            .tempdir_in(&parent)
            .map_err(emission_error(&parent))?;
        tracing::debug!("📂 Staging output in {}", staging.path().display());

        for artifact in artifacts {
            let staged = staging.path().join(artifact.path());
            if let Some(dir) = staged.parent() {
                fs::create_dir_all(dir).map_err(emission_error(&target.join(artifact.path())))?;
            }
            fs::write(&staged, artifact.contents.as_bytes())
                .map_err(emission_error(&target.join(artifact.path())))?;
        }

        if self.archive {
            let bytes = build_archive(artifacts)?;
            fs::write(staging.path().join(ARCHIVE_NAME), bytes)
                .map_err(emission_error(&target.join(ARCHIVE_NAME)))?;
        }

        // 舊輸出先移到備份位置，換上失敗時搬回
        let backup = if target.exists() {
            let holder = tempfile::Builder::new()
                .prefix(".fleet-previous-")
                .tempdir_in(&parent)
                .map_err(emission_error(&parent))?;
            let previous = holder.path().join("output");
            fs::rename(target, &previous).map_err(emission_error(target))?;
            Some((holder, previous))
        } else {
            None
        };

        if let Err(source) = fs::rename(staging.path(), target) {
            if let Some((_, previous)) = &backup {
                if let Err(e) = fs::rename(previous, target) {
                    tracing::error!(
                        "❌ Could not restore previous output from {}: {}",
                        previous.display(),
                        e
                    );
                }
            }
            return Err(CompileError::EmissionIoError {
                path: target.clone(),
                source,
            });
        }

        Ok(target.clone())
    }
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    async fn publish(&self, artifacts: &[Artifact]) -> Result<PathBuf> {
        let publisher = self.clone();
        let artifacts = artifacts.to_vec();
        tokio::task::spawn_blocking(move || publisher.publish_blocking(&artifacts))
            .await
            .map_err(|e| CompileError::EmissionError {
                emitter: "publisher".to_string(),
                details: e.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn artifacts() -> Vec<Artifact> {
        vec![
            Artifact::new("docker-compose.yml", "services: {}\n"),
            Artifact::new("env/api.env", "A=1\n"),
        ]
    }

    #[test]
    fn test_local_storage_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        tokio_test::block_on(storage.write_file("nested/master.yaml", b"system: {}")).unwrap();
        let data = tokio_test::block_on(storage.read_file("nested/master.yaml")).unwrap();
        assert_eq!(data, b"system: {}");
    }

    #[tokio::test]
    async fn test_publish_replaces_previous_output() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.txt"), "old").unwrap();

        let location = DirectoryPublisher::new(&target)
            .publish(&artifacts())
            .await
            .unwrap();
        assert_eq!(location, target);
        assert!(!target.join("stale.txt").exists());
        assert_eq!(fs::read_to_string(target.join("env/api.env")).unwrap(), "A=1\n");

        // 暫存與備份目錄都不應殘留
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_previous_output() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("docker-compose.yml"), "previous").unwrap();

        // 同一路徑既是檔案又是目錄，寫入必定失敗
        let conflicting = vec![
            Artifact::new("k8s", "not a directory"),
            Artifact::new("k8s/api.yaml", "kind: Deployment\n"),
        ];
        let result = DirectoryPublisher::new(&target).publish(&conflicting).await;
        assert!(matches!(result, Err(CompileError::EmissionIoError { .. })));
        assert_eq!(
            fs::read_to_string(target.join("docker-compose.yml")).unwrap(),
            "previous"
        );
        assert!(!target.join("k8s").exists());
    }

    #[tokio::test]
    async fn test_artifact_paths_must_stay_inside_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/out");

        for path in ["env/../../escaped.env", "/etc/escaped.env", "./a.env"] {
            let result = DirectoryPublisher::new(&target)
                .publish(&[Artifact::new(path, "X=1\n")])
                .await;
            assert!(
                matches!(result, Err(CompileError::EmissionError { .. })),
                "{} was accepted",
                path
            );
        }
        assert!(!dir.path().join("nested/escaped.env").exists());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_archive_bundle() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out");
        DirectoryPublisher::new(&target)
            .with_archive(true)
            .publish(&artifacts())
            .await
            .unwrap();

        let file = fs::File::open(target.join(ARCHIVE_NAME)).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.len(), 2);
        let mut contents = String::new();
        archive
            .by_name("env/api.env")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "A=1\n");
    }

    #[test]
    fn test_archive_is_reproducible() {
        assert_eq!(build_archive(&artifacts()).unwrap(), build_archive(&artifacts()).unwrap());
    }
}
