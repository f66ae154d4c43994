//! Configuration layering
//!
//! Sources, lowest precedence first: built-in defaults, the optional
//! `--config` file, `CRUCIBLE_*` environment variables, command-line flags.

use crate::Cli;
use anyhow::{Context, Result};
use crucible_core::{parse_components, BenchConfig, BufferingMode};

/// Build the benchmark configuration for this invocation
///
/// Only parsing happens here; range checks are left to
/// [`BenchConfig::validate`] when the orchestrator starts.
pub fn load(cli: &Cli) -> Result<BenchConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = &cli.config {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }

    let layered = builder
        .add_source(config::Environment::with_prefix("CRUCIBLE").try_parsing(true))
        .build()
        .context("failed to read configuration sources")?;
    let mut bench: BenchConfig = layered
        .try_deserialize()
        .context("invalid configuration value")?;

    apply_flags(&mut bench, cli)?;
    Ok(bench)
}

fn apply_flags(bench: &mut BenchConfig, cli: &Cli) -> Result<()> {
    if let Some(list) = &cli.components {
        bench.components = parse_components(list).context("invalid --components")?;
    }
    if let Some(mode) = cli.mode {
        bench.mode = mode;
    }
    if let Some(duration) = cli.duration {
        bench.duration_secs = duration;
    }
    if let Some(interval) = cli.sample_freq {
        bench.sample_interval_secs = interval;
    }
    if cli.intensity.is_some() {
        bench.intensity = cli.intensity;
    }
    if let Some(diagnostics) = cli.diagnostics {
        bench.diagnostics_secs = diagnostics;
    }
    if let Some(dir) = &cli.log_dir {
        bench.log_dir = dir.clone();
    }
    if let Some(level) = cli.log_level {
        bench.log_level = level;
    }
    if let Some(rotate_mb) = cli.rotate_mb {
        bench.rotate_mb = rotate_mb;
    }
    if cli.unbuffered {
        bench.buffering = BufferingMode::Unbuffered;
    }
    if let Some(dir) = &cli.scratch_dir {
        bench.scratch_dir = Some(dir.clone());
    }
    Ok(())
}

/// Host name attached to structured run events
pub fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use crucible_core::{Severity, SubsystemKind, TestMode};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("crucible").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_without_flags() {
        let bench = load(&cli(&[])).unwrap();
        assert_eq!(bench.mode, TestMode::All);
        assert_eq!(bench.duration_secs, 300);
        assert_eq!(bench.sample_interval_secs, 5);
        assert_eq!(bench.buffering, BufferingMode::Line);
    }

    #[test]
    fn test_flags_override_defaults() {
        let bench = load(&cli(&[
            "--components",
            "io, CPU",
            "--mode",
            "Load",
            "--duration",
            "20",
            "--sample-freq",
            "2",
            "--intensity",
            "50",
            "--log-level",
            "debug",
            "--log-dir",
            "/tmp/bench",
            "--unbuffered",
        ]))
        .unwrap();

        assert_eq!(bench.components, vec![SubsystemKind::Cpu, SubsystemKind::Io]);
        assert_eq!(bench.mode, TestMode::Load);
        assert_eq!(bench.duration_secs, 20);
        assert_eq!(bench.sample_interval_secs, 2);
        assert_eq!(bench.intensity, Some(50));
        assert_eq!(bench.log_level, Severity::Debug);
        assert_eq!(bench.log_dir, PathBuf::from("/tmp/bench"));
        assert_eq!(bench.buffering, BufferingMode::Unbuffered);
    }

    #[test]
    fn test_file_layer_below_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(
            &path,
            "components = \"memory\"\nmode = \"spike\"\nduration_secs = 45\nrotate_mb = 1\n",
        )
        .unwrap();

        let bench = load(&cli(&["--config", path.to_str().unwrap(), "--duration", "10"])).unwrap();

        assert_eq!(bench.components, vec![SubsystemKind::Memory]);
        assert_eq!(bench.mode, TestMode::Spike);
        assert_eq!(bench.duration_secs, 10);
        assert_eq!(bench.rotate_mb, 1);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load(&cli(&["--config", path.to_str().unwrap()])).is_err());
    }

    #[test]
    fn test_unknown_component_flag_is_error() {
        let err = load(&cli(&["--components", "cpu,gpu"])).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown component 'gpu'"));
    }

    #[test]
    fn test_intensity_flag_range() {
        assert!(Cli::try_parse_from(["crucible", "--intensity", "101"]).is_err());
        assert!(Cli::try_parse_from(["crucible", "--intensity", "0"]).is_ok());
    }

    #[test]
    fn test_host_name_is_never_empty() {
        assert!(!host_name().is_empty());
    }
}
