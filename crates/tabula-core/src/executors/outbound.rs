//! Outbound artifact transport: expected output files back to the host.
//!
//! Every expected name is tried independently. A name that cannot be
//! extracted for any reason is a miss and is left out of both lists, so
//! membership in `files_generated` is how callers learn their code produced
//! a file.

use std::io::Read;
use std::path::{Path, PathBuf};

use super::lifecycle::{InstanceLease, RequestId};
use super::runtime::ContainerRuntime;
use super::{container_path, normalize_container_path, relative_file_name};
use crate::errors::SandboxError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievedArtifacts {
    pub files_generated: Vec<String>,
    pub host_file_paths: Vec<PathBuf>,
}

/// Creates `<output_root>/<request_id>` and returns its absolute path.
///
/// The leaf is created non-recursively, so an existing directory is an error
/// and a directory is never shared between two requests.
pub async fn prepare_host_dir(
    output_root: &Path,
    request_id: &RequestId,
) -> Result<PathBuf, SandboxError> {
    tokio::fs::create_dir_all(output_root).await?;
    let dir = output_root.join(request_id.as_str());
    tokio::fs::create_dir(&dir).await.map_err(|e| {
        SandboxError::Internal(format!(
            "Failed to create output directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    Ok(tokio::fs::canonicalize(&dir).await?)
}

/// Returns the bytes of the first entry of a tar archive, which must be a
/// regular file.
pub fn unpack_single_file(archive: &[u8]) -> Result<Vec<u8>, SandboxError> {
    let mut archive = tar::Archive::new(archive);
    let mut entries = archive
        .entries()
        .map_err(|e| SandboxError::Retrieval(format!("Failed to read tar archive: {}", e)))?;

    let mut entry = match entries.next() {
        Some(entry) => entry
            .map_err(|e| SandboxError::Retrieval(format!("Failed to read tar entry: {}", e)))?,
        None => return Err(SandboxError::Retrieval("Archive is empty".to_string())),
    };

    if !entry.header().entry_type().is_file() {
        return Err(SandboxError::Retrieval(format!(
            "Archive entry is not a regular file ({:?})",
            entry.header().entry_type()
        )));
    }

    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| SandboxError::Retrieval(format!("Failed to read tar entry: {}", e)))?;
    Ok(data)
}

#[derive(Debug, Clone)]
pub struct OutboundTransport {
    workspace: String,
}

impl OutboundTransport {
    pub fn new(workspace: &str) -> Self {
        Self {
            workspace: normalize_container_path(workspace),
        }
    }

    pub async fn extract_all(
        &self,
        runtime: &dyn ContainerRuntime,
        lease: &InstanceLease,
        expected: &[String],
        host_dir: &Path,
    ) -> RetrievedArtifacts {
        let mut artifacts = RetrievedArtifacts::default();

        for name in expected {
            match self.extract_one(runtime, lease.id(), name, host_dir).await {
                Ok(host_path) => {
                    artifacts.files_generated.push(name.clone());
                    artifacts.host_file_paths.push(host_path);
                }
                Err(e) => {
                    // File was expected but not created by the script
                    log::debug!("Output file '{}' not retrieved from {}: {}", name, lease.name(), e);
                }
            }
        }

        artifacts
    }

    async fn extract_one(
        &self,
        runtime: &dyn ContainerRuntime,
        container_id: &str,
        name: &str,
        host_dir: &Path,
    ) -> Result<PathBuf, SandboxError> {
        let relative = relative_file_name(name).ok_or_else(|| {
            SandboxError::Retrieval(format!("'{}' is not a workspace-relative file name", name))
        })?;
        let in_instance = container_path(&self.workspace, &relative.to_string_lossy());

        let archive = runtime.download_archive(container_id, &in_instance).await?;
        let data = unpack_single_file(&archive)?;

        let host_path = host_dir.join(&relative);
        if let Some(parent) = host_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&host_path, data).await?;
        Ok(host_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, EntryType, Header};

    fn file_archive(name: &str, data: &[u8]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_unpack_single_file_reads_first_entry() {
        let archive = file_archive("total.csv", b"Product,Total\nA,100\n");
        assert_eq!(unpack_single_file(&archive).unwrap(), b"Product,Total\nA,100\n");
    }

    #[test]
    fn test_unpack_rejects_empty_and_directory_archives() {
        let empty = Builder::new(Vec::new()).into_inner().unwrap();
        assert!(matches!(unpack_single_file(&empty), Err(SandboxError::Retrieval(_))));

        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        builder.append_data(&mut header, "plots/", std::io::empty()).unwrap();
        let dir_archive = builder.into_inner().unwrap();
        assert!(matches!(unpack_single_file(&dir_archive), Err(SandboxError::Retrieval(_))));

        assert!(unpack_single_file(b"not a tar archive").is_err());
    }

    #[tokio::test]
    async fn test_prepare_host_dir_is_unique_and_absolute() {
        let root = tempfile::tempdir().unwrap();
        let id = RequestId::generate("test");

        let dir = prepare_host_dir(root.path(), &id).await.unwrap();
        assert!(dir.is_absolute());
        assert!(dir.is_dir());
        assert!(dir.ends_with(id.as_str()));

        let again = prepare_host_dir(root.path(), &id).await;
        assert!(matches!(again, Err(SandboxError::Internal(_))));
    }
}
