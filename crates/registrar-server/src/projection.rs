//! Prometheus file-SD projection of status-capable instances.

use parking_lot::Mutex;
use registrar_core::{Catalogue, ScrapeTarget};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// First line of every file we own. Files without it are left alone.
pub const MARKER: &str = "# this yaml file was written by the registry";

const METRICS_PATH: &str = "/internal/service-info/metrics";

#[derive(Serialize)]
struct TargetGroup<'a> {
    targets: &'a [String],
}

#[derive(Serialize)]
struct TlsConfig {
    insecure_skip_verify: bool,
}

#[derive(Serialize)]
struct FileSdConfig {
    files: Vec<String>,
}

#[derive(Serialize)]
struct ScrapeJob<'a> {
    job_name: &'a str,
    metrics_path: &'static str,
    scheme: &'static str,
    tls_config: TlsConfig,
    file_sd_configs: Vec<FileSdConfig>,
}

/// Target names become file names, so only a single plain path component
/// is accepted.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn yaml_error(err: serde_yaml::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

pub trait TargetProjection: Send + Sync {
    /// Re-derive output from the current catalogue contents.
    fn refresh(&self, catalogue: &Catalogue);
}

pub struct NoProjection;

impl TargetProjection for NoProjection {
    fn refresh(&self, _catalogue: &Catalogue) {}
}

pub struct ScrapeFileWriter {
    dir: PathBuf,
    config_template: Option<PathBuf>,
    config_file: Option<PathBuf>,
    // one writer at a time
    lock: Mutex<()>,
}

impl ScrapeFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config_template: None,
            config_file: None,
            lock: Mutex::new(()),
        }
    }

    pub fn with_config(mut self, template: Option<PathBuf>, config_file: Option<PathBuf>) -> Self {
        self.config_template = template;
        self.config_file = config_file;
        self
    }

    fn target_file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.yaml"))
    }

    /// Targets whose name is not a plain file name are skipped.
    pub fn write(&self, targets: &[ScrapeTarget]) -> io::Result<()> {
        let _guard = self.lock.lock();
        let targets: Vec<&ScrapeTarget> = targets
            .iter()
            .filter(|t| {
                let plain = is_plain_name(&t.name);
                if !plain {
                    tracing::warn!(target_name = %t.name, "Skipping scrape target with unusable name");
                }
                plain
            })
            .collect();

        for target in &targets {
            let group = [TargetGroup { targets: &target.addresses }];
            let body = serde_yaml::to_string(&group).map_err(yaml_error)?;
            fs::write(self.target_file(&target.name), format!("{MARKER}\n{body}"))?;
        }
        self.blank_vanished(&targets)?;
        if let Some(config_file) = &self.config_file {
            self.write_config(config_file, &targets)?;
        }
        Ok(())
    }

    fn blank_vanished(&self, targets: &[&ScrapeTarget]) -> io::Result<()> {
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".yaml"))
            else {
                continue;
            };
            if targets.iter().any(|t| t.name == name) || !is_ours(&path) {
                continue;
            }
            fs::write(&path, format!("{MARKER}\n"))?;
            tracing::info!(file = %path.display(), "Cleared scrape targets");
        }
        Ok(())
    }

    /// Template text followed by one job per target, indented to sit under
    /// the template's trailing `scrape_configs:` key.
    fn write_config(&self, config_file: &Path, targets: &[&ScrapeTarget]) -> io::Result<()> {
        let mut config = match &self.config_template {
            Some(template) => fs::read_to_string(template)?,
            None => String::new(),
        };
        if !targets.is_empty() {
            let jobs: Vec<ScrapeJob> = targets
                .iter()
                .map(|target| ScrapeJob {
                    job_name: &target.name,
                    metrics_path: METRICS_PATH,
                    scheme: "https",
                    tls_config: TlsConfig { insecure_skip_verify: true },
                    file_sd_configs: vec![FileSdConfig {
                        files: vec![self.target_file(&target.name).display().to_string()],
                    }],
                })
                .collect();
            let jobs = serde_yaml::to_string(&jobs).map_err(yaml_error)?;
            for line in jobs.lines() {
                config.push_str("  ");
                config.push_str(line);
                config.push('\n');
            }
        }
        fs::write(config_file, config)
    }
}

fn is_ours(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|s| s.lines().next() == Some(MARKER))
        .unwrap_or(false)
}

impl TargetProjection for ScrapeFileWriter {
    fn refresh(&self, catalogue: &Catalogue) {
        let targets = catalogue.scrape_targets();
        if let Err(err) = self.write(&targets) {
            tracing::warn!(dir = %self.dir.display(), error = %err, "Failed to write scrape targets");
        }
    }
}
