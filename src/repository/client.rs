// src/repository/client.rs

//! Transport clients
//!
//! A [`Client`] knows how to fetch named files from a repository and how to
//! bring an artifact into the local package cache. Disk repositories are
//! plain directories; HTTP repositories are fetched with a blocking reqwest
//! client, streamed to a temporary file and moved into place.

use super::{PackageArtifact, Repository, RepositoryType};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filesystem::move_file;
use crate::filesystem::path::sanitize_filename;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Transport contract consumed by sync and the installer
pub trait Client: Send + Sync {
    /// Bring the artifact's archive into the package cache and verify it
    ///
    /// On success `artifact.cache_path` points at the verified archive. A
    /// cached copy with matching checksums is reused without fetching.
    fn download_artifact(&self, artifact: &mut PackageArtifact, label: &str) -> Result<()>;

    /// Fetch a file from the repository root into a local temporary file
    ///
    /// The caller owns the returned path and removes it when done.
    fn download_file(&self, name: &str) -> Result<PathBuf>;
}

/// Build the client matching a repository's transport
pub fn new_client(repo: &Repository, config: &Config) -> Result<Box<dyn Client>> {
    if repo.urls.is_empty() {
        return Err(Error::ConfigError(format!(
            "Repository '{}' has no urls",
            repo.name
        )));
    }

    let cache_dir = config.system.pkgs_cache_path.clone();
    let tmp_dir = config.system.tmpdir.clone();

    match repo.kind {
        RepositoryType::Disk => Ok(Box::new(LocalClient::new(
            repo.urls.clone(),
            cache_dir,
            tmp_dir,
        ))),
        RepositoryType::Http => Ok(Box::new(HttpClient::new(
            repo,
            cache_dir,
            tmp_dir,
            Duration::from_secs(config.general.http_timeout_secs),
        )?)),
        RepositoryType::Docker => Err(Error::DownloadError(format!(
            "Repository '{}': docker transport is not supported",
            repo.name
        ))),
    }
}

/// Reuse a cached archive when it verifies, otherwise fetch it through `fetch`
///
/// `fetch(url, dest)` writes the archive found under `url` to `dest`. Each url
/// is tried in order; a download that fails verification is discarded.
fn fetch_artifact(
    artifact: &mut PackageArtifact,
    urls: &[String],
    cache_dir: &Path,
    fetch: impl Fn(&str, &Path) -> Result<()>,
) -> Result<()> {
    let file_name = artifact.file_name()?;
    fs::create_dir_all(cache_dir)?;
    let cache_path = cache_dir.join(&file_name);

    if cache_path.exists() {
        match artifact.verify(&cache_path) {
            Ok(()) => {
                debug!("Using cached {}", cache_path.display());
                artifact.cache_path = Some(cache_path);
                return Ok(());
            }
            Err(e) => {
                warn!("Cached {} is stale ({}), fetching again", file_name, e);
                let _ = fs::remove_file(&cache_path);
            }
        }
    }

    let mut errors = Vec::new();
    for url in urls {
        let partial = cache_dir.join(format!(".{}.part", file_name));
        match fetch(url, &partial).and_then(|()| artifact.verify(&partial)) {
            Ok(()) => {
                move_file(&partial, &cache_path)?;
                artifact.cache_path = Some(cache_path);
                return Ok(());
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                warn!("Fetching {} from {} failed: {}", file_name, url, e);
                errors.push(format!("{}: {}", url, e));
            }
        }
    }

    Err(Error::DownloadError(format!(
        "Could not download {} ({})",
        artifact.runtime,
        errors.join("; ")
    )))
}

/// Reserve a temporary file for a downloaded repository file
fn temp_target(tmp_dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(tmp_dir)?;
    let file = tempfile::Builder::new()
        .prefix("quarry-")
        .suffix(&format!("-{}", name))
        .tempfile_in(tmp_dir)?;
    Ok(file.into_temp_path().keep().map_err(|e| e.error)?)
}

// =============================================================================
// Disk repositories
// =============================================================================

/// Client for repositories living in local directories
pub struct LocalClient {
    urls: Vec<String>,
    cache_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl LocalClient {
    pub fn new(urls: Vec<String>, cache_dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self {
            urls,
            cache_dir,
            tmp_dir,
        }
    }

    fn source(url: &str, name: &str) -> PathBuf {
        Path::new(url.strip_prefix("file://").unwrap_or(url)).join(name)
    }
}

impl Client for LocalClient {
    fn download_artifact(&self, artifact: &mut PackageArtifact, label: &str) -> Result<()> {
        debug!("{}: copying {}", label, artifact.runtime);
        let relative = artifact.path.trim_start_matches('/').to_string();
        fetch_artifact(artifact, &self.urls, &self.cache_dir, |url, dest| {
            fs::copy(Self::source(url, &relative), dest)?;
            Ok(())
        })
    }

    fn download_file(&self, name: &str) -> Result<PathBuf> {
        let name = sanitize_filename(name)?;
        for url in &self.urls {
            let src = Self::source(url, &name);
            if src.is_file() {
                let dest = temp_target(&self.tmp_dir, &name)?;
                fs::copy(&src, &dest)?;
                return Ok(dest);
            }
            debug!("{} not found", src.display());
        }
        Err(Error::DownloadError(format!(
            "{} not found in {}",
            name,
            self.urls.join(", ")
        )))
    }
}

// =============================================================================
// HTTP repositories
// =============================================================================

/// Client for repositories served over HTTP(S)
pub struct HttpClient {
    client: reqwest::blocking::Client,
    urls: Vec<String>,
    auth: Option<(String, String)>,
    cache_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl HttpClient {
    pub fn new(
        repo: &Repository,
        cache_dir: PathBuf,
        tmp_dir: PathBuf,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        let auth = match (
            repo.authentication.get("username"),
            repo.authentication.get("password"),
        ) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            urls: repo.urls.clone(),
            auth,
            cache_dir,
            tmp_dir,
        })
    }

    fn join_url(base: &str, name: &str) -> String {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            name.trim_start_matches('/')
        )
    }

    /// Stream a URL to `dest`, optionally reporting progress
    fn get_to_file(&self, url: &str, dest: &Path, progress: Option<&ProgressBar>) -> Result<u64> {
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }

        let mut response = request
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        if let (Some(pb), Some(len)) = (progress, response.content_length()) {
            pb.set_length(len);
        }

        let mut file = File::create(dest)?;
        let mut downloaded: u64 = 0;
        let mut buffer = [0u8; STREAM_BUFFER_SIZE];
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|e| Error::DownloadError(format!("Failed to read response: {e}")))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])?;
            downloaded += read as u64;
            if let Some(pb) = progress {
                pb.set_position(downloaded);
            }
        }
        file.sync_all()?;
        Ok(downloaded)
    }
}

fn progress_bar(label: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg:30} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(label.to_string());
    pb
}

impl Client for HttpClient {
    fn download_artifact(&self, artifact: &mut PackageArtifact, label: &str) -> Result<()> {
        let relative = artifact.path.clone();
        let pb = progress_bar(label);
        let result = fetch_artifact(artifact, &self.urls, &self.cache_dir, |base, dest| {
            let bytes = self.get_to_file(&Self::join_url(base, &relative), dest, Some(&pb))?;
            info!("Downloaded {} ({} bytes)", relative, bytes);
            Ok(())
        });
        pb.finish_and_clear();
        result
    }

    fn download_file(&self, name: &str) -> Result<PathBuf> {
        let name = sanitize_filename(name)?;
        let mut errors = Vec::new();
        for base in &self.urls {
            let dest = temp_target(&self.tmp_dir, &name)?;
            match self.get_to_file(&Self::join_url(base, &name), &dest, None) {
                Ok(_) => return Ok(dest),
                Err(e) => {
                    let _ = fs::remove_file(&dest);
                    errors.push(e.to_string());
                }
            }
        }
        Err(Error::DownloadError(errors.join("; ")))
    }
}
