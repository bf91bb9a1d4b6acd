//! Detached signature generation and the release manifest.

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::MANIFEST_SUFFIX;

/// Placeholder substituted with the artifact path in the signature
/// command template.
const FILE_PLACEHOLDER: &str = "{{ file }}";
const FILE_TOKEN: &str = "{{file}}";

/// Run the configured signature command over each artifact, expecting a
/// detached `<file>.asc` signature as a side effect. Returns the generated
/// signature paths and the artifacts that failed. A failing command is
/// reported per artifact and does not stop the rest of the batch.
pub async fn generate_signatures(
    artifacts: &[PathBuf],
    command_template: &str,
    con_limit: usize,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let results: Vec<(PathBuf, Option<PathBuf>)> = stream::iter(artifacts.iter())
        .map(|artifact| async move {
            match sign_file(artifact, command_template).await {
                Ok(signature) => (artifact.clone(), Some(signature)),
                Err(reason) => {
                    error!("Failed to sign {}: {}", artifact.display(), reason);
                    (artifact.clone(), None)
                }
            }
        })
        .buffer_unordered(con_limit.max(1))
        .collect()
        .await;

    let mut generated = Vec::new();
    let mut failed = Vec::new();
    for (artifact, signature) in results {
        match signature {
            Some(signature) => generated.push(signature),
            None => failed.push(artifact),
        }
    }
    (generated, failed)
}

/// Execute the signature command for one artifact. The `{{ file }}`
/// placeholder is substituted as a single argv element; the joined string
/// is never handed to a shell.
async fn sign_file(artifact: &Path, command_template: &str) -> Result<PathBuf, String> {
    let normalized = command_template.replace(FILE_PLACEHOLDER, FILE_TOKEN);
    let tokens = shlex::split(&normalized)
        .ok_or_else(|| format!("can not parse signature command: {}", command_template))?;
    if tokens.is_empty() {
        return Err("signature command is empty".to_string());
    }
    let artifact_str = artifact.to_string_lossy();
    let argv: Vec<String> = tokens
        .iter()
        .map(|token| token.replace(FILE_TOKEN, &artifact_str))
        .collect();

    debug!("Running signature command: {:?}", argv);
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        return Err(format!(
            "signature command failed with exit code {}: {}",
            exit_code, stderr
        ));
    }
    let signature = PathBuf::from(format!("{}.asc", artifact_str));
    if !signature.is_file() {
        return Err(format!(
            "signature command succeeded but {} was not produced",
            signature.display()
        ));
    }
    Ok(signature)
}

/// Write the release manifest into the scratch tree: the newline-joined
/// list of repository-relative artifact paths, named `<productKey>.txt`.
/// Returns the manifest name and its full path.
pub fn write_manifest(
    paths: &[PathBuf],
    root: &Path,
    product_key: &str,
) -> std::io::Result<(String, PathBuf)> {
    let manifest_name = format!("{}{}", product_key, MANIFEST_SUFFIX);
    let manifest_path = root.join(&manifest_name);
    let artifacts: Vec<String> = paths
        .iter()
        .map(|p| {
            p.strip_prefix(root)
                .unwrap_or(p)
                .to_string_lossy()
                .trim_start_matches('/')
                .to_string()
        })
        .collect();
    std::fs::write(&manifest_path, artifacts.join("\n"))?;
    info!("Generated manifest {}", manifest_path.display());
    Ok((manifest_name, manifest_path))
}
