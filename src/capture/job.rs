//! Capture job description and input enumeration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{CollectorConfig, Config};
use crate::error::{Error, Result};

/// Order in which a directory of captures is replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputOrder {
    /// Whatever order the directory listing returns
    #[default]
    Filesystem,
    /// Lexicographic by path
    Sorted,
}

/// One conversion of a capture file or directory into a flow store.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    /// Identifier used in log records
    pub id: Uuid,
    /// A single capture file or a directory of captures
    pub input: PathBuf,
    pub collector_address: String,
    pub collector_port: u16,
    /// nfcapd file rotation interval
    pub rotation_interval: Duration,
    /// Directory nfcapd writes into
    pub output_dir: PathBuf,
    /// Canonical name of the finished flow file
    pub output_name: String,
    pub input_order: InputOrder,
}

impl CaptureJob {
    /// Job with the default collector settings.
    pub fn new(
        input: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        output_name: impl Into<String>,
    ) -> Self {
        let collector = CollectorConfig::default();
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            collector_address: collector.address,
            collector_port: collector.port,
            rotation_interval: collector.rotation_interval,
            output_dir: output_dir.into(),
            output_name: output_name.into(),
            input_order: InputOrder::default(),
        }
    }

    /// Job for the configured pcap path and store.
    pub fn from_config(config: &Config) -> Self {
        Self {
            collector_address: config.collector.address.clone(),
            collector_port: config.collector.port,
            rotation_interval: config.collector.rotation_interval,
            input_order: config.input_order,
            ..Self::new(&config.pcap_path, &config.store_dir, &config.store_name)
        }
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_input_order(mut self, order: InputOrder) -> Self {
        self.input_order = order;
        self
    }

    /// Final location of the flow store.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_name)
    }

    /// `address:port` the exporter sends to.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.collector_address, self.collector_port)
    }

    /// Capture files to replay, in [`InputOrder`].
    ///
    /// A file input yields itself; a directory yields its regular files.
    pub fn inputs(&self) -> Result<Vec<PathBuf>> {
        if self.input.is_file() {
            return Ok(vec![self.input.clone()]);
        }
        if !self.input.is_dir() {
            return Err(Error::InputNotFound {
                path: self.input.clone(),
            });
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.input)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }

        if self.input_order == InputOrder::Sorted {
            files.sort();
        }
        Ok(files)
    }

    pub fn input(&self) -> &Path {
        &self.input
    }
}
