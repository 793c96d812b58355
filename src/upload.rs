use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

const UPLOAD_URL: &str = "https://content.dropboxapi.com/2/files/upload";
pub const TOKEN_ENV: &str = "DROPBOX_ACCESS_TOKEN";

/// Dropbox file upload. Overwrites whatever is already at the destination.
pub struct DropboxUploader {
    client: reqwest::Client,
    token: String,
}

impl DropboxUploader {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }

    /// Read the access token from the environment.
    pub fn from_env() -> Option<Self> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
    }

    pub async fn upload(&self, file: &Path, destination: &str) -> Result<()> {
        let body = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let arg = serde_json::json!({
            "path": destination,
            "mode": "overwrite",
            "mute": true,
        });

        let response = self
            .client
            .post(UPLOAD_URL)
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", dropbox_api_arg(&arg))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("Dropbox answered {}: {}", status, detail.trim());
        }
        Ok(())
    }
}

/// Remote path for an archive: `<root>/<file name>`.
pub fn destination(root: &str, archive: &Path) -> String {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{}", root.trim_end_matches('/'), name)
}

/// Upload and log the result. Never fails; returns whether it worked.
pub async fn upload_logged(uploader: Option<&DropboxUploader>, archive: &Path, root: &str) -> bool {
    let Some(uploader) = uploader else {
        error!("Dropbox token not found in {}", TOKEN_ENV);
        return false;
    };
    let dest = destination(root, archive);
    match uploader.upload(archive, &dest).await {
        Ok(()) => {
            info!("Uploaded to Dropbox: {}", dest);
            true
        }
        Err(e) => {
            error!("Dropbox upload failed for {}: {:#}", dest, e);
            false
        }
    }
}

/// The API argument travels in an HTTP header, which must be ASCII: escape
/// everything else as `\uXXXX`.
fn dropbox_api_arg(arg: &serde_json::Value) -> String {
    let mut out = String::new();
    for c in arg.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
