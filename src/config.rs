use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{EmberError, Result};

/// Flat `key=value` configuration map.
///
/// One assignment per line in the file form; `#` starts a comment. Override
/// strings (the CLI `-c` flag) hold assignments separated by whitespace or
/// semicolons and replace earlier values.
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    entries: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|err| {
            EmberError::Config(format!(
                "cannot read config file {}: {err}",
                path.as_ref().display()
            ))
        })?;
        let mut map = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            map.insert_assignment(line).map_err(|err| {
                EmberError::Config(format!("line {}: {err}", lineno + 1))
            })?;
        }
        Ok(map)
    }

    /// Applies `-c` style overrides: assignments separated by whitespace
    /// or `;`.
    pub fn add_options(&mut self, options: &str) -> Result<()> {
        for part in options.split(|c: char| c.is_whitespace() || c == ';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            self.insert_assignment(part)?;
        }
        Ok(())
    }

    fn insert_assignment(&mut self, text: &str) -> Result<()> {
        let (key, value) = text
            .split_once('=')
            .ok_or_else(|| EmberError::Config(format!("expected key=value, got {text:?}")))?;
        self.entries
            .insert(key.trim().to_string(), value.trim().to_string());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| EmberError::Config(format!("{key}: expected integer, got {raw:?}"))),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some("1") | Some("true") | Some("yes") => Ok(true),
            Some("0") | Some("false") | Some("no") => Ok(false),
            Some(raw) => Err(EmberError::Config(format!(
                "{key}: expected boolean, got {raw:?}"
            ))),
        }
    }
}

/// Engine-wide configuration resolved from a [`ConfigMap`].
///
/// This is a plain value threaded through construction; nothing here is
/// process-global.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Path for CPU profiler output; empty disables profiling.
    pub prof_file: String,
    /// Print per-worker I/O counters when a run completes.
    pub print_io_stat: bool,
    /// Worker threads, one per partition.
    pub num_threads: usize,
    /// NUMA node count used by the partition → node mapping.
    pub num_nodes: usize,
    /// Page-cache capacity in bytes.
    pub cache_size: usize,
    /// Threads servicing block reads.
    pub io_threads: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            prof_file: String::new(),
            print_io_stat: false,
            num_threads: 4,
            num_nodes: 1,
            cache_size: 64 * 1024 * 1024,
            io_threads: 2,
        }
    }
}

impl GraphConfig {
    pub fn from_map(map: &ConfigMap) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            prof_file: map.get_str("prof_file", &defaults.prof_file),
            print_io_stat: map.get_bool("print_io_stat", defaults.print_io_stat)?,
            num_threads: map.get_usize("num_threads", defaults.num_threads)?,
            num_nodes: map.get_usize("num_nodes", defaults.num_nodes)?,
            cache_size: map.get_usize("cache_size", defaults.cache_size)?,
            io_threads: map.get_usize("io_threads", defaults.io_threads)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(EmberError::Config("num_threads must be positive".into()));
        }
        if self.num_nodes == 0 {
            return Err(EmberError::Config("num_nodes must be positive".into()));
        }
        if self.io_threads == 0 {
            return Err(EmberError::Config("io_threads must be positive".into()));
        }
        Ok(())
    }
}

/// Sparse-matrix execution configuration resolved from a [`ConfigMap`].
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    /// Rows per row-block in the block index.
    pub row_block_size: usize,
    /// Row-blocks fetched per I/O.
    pub rb_io_size: usize,
    /// Process blocks along a Hilbert curve instead of file order.
    pub use_hilbert_order: bool,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            row_block_size: 1024,
            rb_io_size: 8,
            use_hilbert_order: false,
        }
    }
}

impl MatrixConfig {
    pub fn from_map(map: &ConfigMap) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            row_block_size: map.get_usize("row_block_size", defaults.row_block_size)?,
            rb_io_size: map.get_usize("rb_io_size", defaults.rb_io_size)?,
            use_hilbert_order: map.get_bool("use_hilbert_order", defaults.use_hilbert_order)?,
        };
        if config.row_block_size == 0 {
            return Err(EmberError::Config("row_block_size must be positive".into()));
        }
        if config.rb_io_size == 0 {
            return Err(EmberError::Config("rb_io_size must be positive".into()));
        }
        Ok(config)
    }
}
