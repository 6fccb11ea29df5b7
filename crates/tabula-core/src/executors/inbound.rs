//! Inbound artifact transport: script and input files into the instance.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{Builder, Header};

use super::lifecycle::InstanceLease;
use super::runtime::ContainerRuntime;
use super::{normalize_container_path, relative_file_name};
use crate::config::SandboxConfig;
use crate::errors::SandboxError;

/// Imports the libraries the base image guarantees, forces a headless
/// plotting backend and bounds default data-frame printing.
pub const DEFAULT_PREAMBLE: &str = "\
import os
import sys
import pandas as pd
import matplotlib.pyplot as plt
import seaborn as sns
plt.switch_backend('Agg')
pd.set_option('display.max_rows', 50)
pd.set_option('display.max_columns', 20)
";

pub fn wrap_code(preamble: &str, code: &str) -> String {
    format!("{}\n{}\n", preamble.trim_end(), code)
}

/// Tar archive ready for upload, plus what went into it
#[derive(Debug)]
pub struct InboundPackage {
    pub archive: Vec<u8>,
    pub injected: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InboundTransport {
    input_dir: PathBuf,
    workspace: String,
    script_name: String,
    preamble: String,
}

impl InboundTransport {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            workspace: normalize_container_path(&config.workspace),
            script_name: config.script_name.clone(),
            preamble: config
                .preamble
                .clone()
                .unwrap_or_else(|| DEFAULT_PREAMBLE.to_string()),
        }
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Builds one archive holding the wrapped script and every input that
    /// exists under the input root. Missing inputs are skipped, not errors.
    ///
    /// Reads host files synchronously; call it from a blocking context.
    pub fn package(&self, code: &str, input_files: &[String]) -> Result<InboundPackage, SandboxError> {
        let mut builder = Builder::new(Vec::new());
        let script = wrap_code(&self.preamble, code);

        let mut header = Header::new_gnu();
        header.set_size(script.len() as u64);
        header.set_mode(0o755);
        header.set_mtime(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        );
        builder
            .append_data(&mut header, &self.script_name, script.as_bytes())
            .map_err(|e| {
                SandboxError::Packaging(format!("Failed to add {} to archive: {}", self.script_name, e))
            })?;

        let mut injected = Vec::new();
        let mut skipped = Vec::new();

        for name in input_files {
            let Some((host_path, base_name)) = self.resolve_input(name) else {
                log::debug!(
                    "Input file '{}' not found under {}, skipping",
                    name,
                    self.input_dir.display()
                );
                skipped.push(name.clone());
                continue;
            };

            builder
                .append_path_with_name(&host_path, &base_name)
                .map_err(|e| {
                    SandboxError::Packaging(format!(
                        "Failed to add input file {} to archive: {}",
                        host_path.display(),
                        e
                    ))
                })?;
            injected.push(name.clone());
        }

        let archive = builder
            .into_inner()
            .map_err(|e| SandboxError::Packaging(format!("Failed to finish archive: {}", e)))?;

        Ok(InboundPackage {
            archive,
            injected,
            skipped,
        })
    }

    /// Uploads a package into the instance workspace.
    pub async fn inject(
        &self,
        runtime: &dyn ContainerRuntime,
        lease: &InstanceLease,
        package: InboundPackage,
    ) -> Result<(), SandboxError> {
        log::debug!(
            "Injecting {} and {} input file(s) into {}",
            self.script_name,
            package.injected.len(),
            lease.name()
        );
        runtime
            .upload_archive(lease.id(), &self.workspace, package.archive)
            .await
    }

    /// Host path and in-archive base name of an input, if it is a regular file
    fn resolve_input(&self, name: &str) -> Option<(PathBuf, String)> {
        let relative = relative_file_name(name)?;
        let host_path = self.input_dir.join(&relative);
        if !host_path.is_file() {
            return None;
        }
        let base_name = Path::new(&relative).file_name()?.to_str()?.to_string();
        Some((host_path, base_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entries(archive: &[u8]) -> Vec<(String, Vec<u8>, u32)> {
        let mut archive = tar::Archive::new(archive);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let path = entry.path().unwrap().to_string_lossy().to_string();
                let mode = entry.header().mode().unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (path, data, mode)
            })
            .collect()
    }

    fn transport(input_dir: &Path) -> InboundTransport {
        InboundTransport::new(&SandboxConfig {
            input_dir: input_dir.to_path_buf(),
            ..Default::default()
        })
    }

    #[test]
    fn test_wrap_code_puts_preamble_first() {
        let wrapped = wrap_code(DEFAULT_PREAMBLE, "print('hi')");
        assert!(wrapped.starts_with("import os\n"));
        assert!(wrapped.contains("plt.switch_backend('Agg')"));
        assert!(wrapped.contains("pd.set_option('display.max_rows', 50)"));
        assert!(wrapped.contains("pd.set_option('display.max_columns', 20)"));
        assert!(wrapped.ends_with("print('hi')\n"));
    }

    #[test]
    fn test_package_contains_script_and_existing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sales.csv"), "Product,Sales\nA,100\n").unwrap();

        let package = transport(dir.path())
            .package(
                "print(1)",
                &["sales.csv".to_string(), "absent.csv".to_string()],
            )
            .unwrap();

        assert_eq!(package.injected, vec!["sales.csv".to_string()]);
        assert_eq!(package.skipped, vec!["absent.csv".to_string()]);

        let entries = entries(&package.archive);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "script.py");
        assert_eq!(entries[0].2, 0o755);
        assert!(String::from_utf8_lossy(&entries[0].1).ends_with("print(1)\n"));
        assert_eq!(entries[1].0, "sales.csv");
        assert_eq!(entries[1].1, b"Product,Sales\nA,100\n");
    }

    #[test]
    fn test_nested_input_is_packaged_under_base_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("raw")).unwrap();
        std::fs::write(dir.path().join("raw").join("q1.csv"), "x\n1\n").unwrap();

        let package = transport(dir.path())
            .package("pass", &["raw/q1.csv".to_string()])
            .unwrap();

        let names: Vec<String> = entries(&package.archive).into_iter().map(|e| e.0).collect();
        assert_eq!(names, vec!["script.py".to_string(), "q1.csv".to_string()]);
    }

    #[test]
    fn test_inputs_outside_root_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let inputs = root.path().join("data");
        std::fs::create_dir_all(&inputs).unwrap();
        std::fs::write(root.path().join("secret.txt"), "nope").unwrap();
        std::fs::create_dir_all(inputs.join("folder")).unwrap();

        let secret = root.path().join("secret.txt").to_string_lossy().to_string();
        let package = transport(&inputs)
            .package(
                "pass",
                &["../secret.txt".to_string(), secret, "folder".to_string(), "".to_string()],
            )
            .unwrap();

        assert!(package.injected.is_empty());
        assert_eq!(package.skipped.len(), 4);
        assert_eq!(entries(&package.archive).len(), 1);
    }

    #[test]
    fn test_custom_preamble_and_script_name() {
        let dir = tempfile::tempdir().unwrap();
        let transport = InboundTransport::new(&SandboxConfig {
            input_dir: dir.path().to_path_buf(),
            script_name: "main.py".to_string(),
            preamble: Some("import json".to_string()),
            ..Default::default()
        });

        let package = transport.package("print(json.dumps(1))", &[]).unwrap();
        let entries = entries(&package.archive);
        assert_eq!(entries[0].0, "main.py");
        assert_eq!(
            String::from_utf8_lossy(&entries[0].1),
            "import json\nprint(json.dumps(1))\n"
        );
    }
}
