//! Resolved runtime settings: the TOML config with global flags layered
//! on top, plus builders for the core services the commands drive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use edgeprov_config::{self as appconfig, Config};
use edgeprov_core::{
    DeviceConnector, Dispatcher, FileJobStore, HandlerRegistry, JobStore, MemoryJobStore, TcpConnector,
};
use tracing::warn;

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// Everything a command handler needs besides its own arguments.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub output: OutputFormat,
    pub color: bool,
    pub quiet: bool,
    pub yes: bool,
    pub dry_run: bool,
    pub timeout: Duration,
}

impl Context {
    /// Load the config file (`--config` or the platform path) and apply
    /// flag overrides. Flags beat config; config beats built-in defaults.
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config_path = global.config.clone().unwrap_or_else(appconfig::config_path);
        let config = appconfig::load_config_from(&config_path)?;

        let output = match global.output {
            Some(format) => format,
            None => parse_output(&config.defaults.output)?,
        };
        let color_mode = match global.color {
            Some(mode) => mode,
            None => parse_color(&config.defaults.color)?,
        };
        let timeout = global
            .timeout
            .map_or_else(|| config.defaults.io_timeout(), Duration::from_secs);
        let dry_run = global.dry_run || config.dispatcher.dry_run;

        Ok(Self {
            color: output::should_color(color_mode),
            config,
            config_path,
            output,
            quiet: global.quiet,
            yes: global.yes,
            dry_run,
            timeout,
        })
    }

    pub fn jobs_path(&self) -> PathBuf {
        appconfig::jobs_path(&self.config)
    }

    /// Connector for real devices, honouring dry-run and timeouts.
    pub fn connector(&self) -> Arc<dyn DeviceConnector> {
        Arc::new(TcpConnector {
            probe_timeout: self.config.defaults.probe_timeout(),
            io_timeout: self.timeout,
            dry_run: self.dry_run,
        })
    }

    /// Dispatcher over the file-backed queue and the configured devices.
    /// A dry run works on an in-memory copy of the queue, so state changes
    /// are never written back.
    pub fn dispatcher(&self) -> Result<Dispatcher, CliError> {
        let devices = appconfig::device_directory(&self.config)?;
        let store = self.job_store()?;
        Ok(
            Dispatcher::new(store, HandlerRegistry::with_builtin(), self.connector(), devices)
                .with_default_max_attempts(self.config.dispatcher.default_max_attempts),
        )
    }

    fn job_store(&self) -> Result<Arc<dyn JobStore>, CliError> {
        let file = FileJobStore::new(self.jobs_path());
        if !self.dry_run {
            return Ok(Arc::new(file));
        }
        let scratch = MemoryJobStore::new();
        for job in file.list()? {
            scratch.insert(job)?;
        }
        warn!(path = %file.path().display(), "dry run: job queue changes will not be saved");
        Ok(Arc::new(scratch))
    }
}

fn parse_output(raw: &str) -> Result<OutputFormat, CliError> {
    match raw {
        "table" => Ok(OutputFormat::Table),
        "json" => Ok(OutputFormat::Json),
        "json-compact" | "json_compact" => Ok(OutputFormat::JsonCompact),
        "yaml" => Ok(OutputFormat::Yaml),
        "plain" => Ok(OutputFormat::Plain),
        other => Err(CliError::Validation {
            field: "defaults.output".into(),
            reason: format!("expected table, json, json-compact, yaml or plain, got '{other}'"),
        }),
    }
}

fn parse_color(raw: &str) -> Result<ColorMode, CliError> {
    match raw {
        "auto" => Ok(ColorMode::Auto),
        "always" => Ok(ColorMode::Always),
        "never" => Ok(ColorMode::Never),
        other => Err(CliError::Validation {
            field: "defaults.color".into(),
            reason: format!("expected auto, always or never, got '{other}'"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use edgeprov_core::{JobState, JobTarget, JobType};
    use serde_json::Map;

    use super::*;

    fn global(config: PathBuf) -> GlobalOpts {
        GlobalOpts {
            config: Some(config),
            output: None,
            color: None,
            verbose: 0,
            quiet: false,
            yes: false,
            dry_run: false,
            timeout: None,
        }
    }

    #[test]
    fn config_defaults_apply_when_flags_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[defaults]\noutput = \"yaml\"\ncolor = \"never\"\ntimeout = 3\n\n[dispatcher]\ndry_run = true\n",
        )
        .unwrap();

        let ctx = Context::load(&global(path)).unwrap();
        assert_eq!(ctx.output, OutputFormat::Yaml);
        assert!(!ctx.color);
        assert_eq!(ctx.timeout, Duration::from_secs(3));
        assert!(ctx.dry_run);
    }

    #[test]
    fn flags_beat_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[defaults]\noutput = \"yaml\"\ntimeout = 3\n").unwrap();

        let mut opts = global(path);
        opts.output = Some(OutputFormat::Json);
        opts.timeout = Some(20);
        let ctx = Context::load(&opts).unwrap();
        assert_eq!(ctx.output, OutputFormat::Json);
        assert_eq!(ctx.timeout, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn dry_run_leaves_the_saved_queue_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let jobs = dir.path().join("jobs.json");
        std::fs::write(
            &path,
            format!(
                "[dispatcher]\njobs_file = \"{}\"\n\n[devices.core-1]\nhost = \"10.0.0.1\"\npassword = \"x\"\n",
                jobs.display().to_string().replace('\\', "/")
            ),
        )
        .unwrap();

        let ctx = Context::load(&global(path.clone())).unwrap();
        let id = ctx
            .dispatcher()
            .unwrap()
            .enqueue(JobType::DeviceHealthcheck, JobTarget::device("core-1"), Map::new())
            .unwrap();

        let mut opts = global(path);
        opts.dry_run = true;
        let preview = Context::load(&opts).unwrap();
        let report = preview.dispatcher().unwrap().run_pending(10).await.unwrap();
        assert_eq!(report.succeeded, 1);

        let saved = FileJobStore::new(&jobs).get(id).unwrap().unwrap();
        assert_eq!(saved.state, JobState::Queued);
        assert_eq!(saved.attempts, 0);
    }

    #[test]
    fn unknown_output_in_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[defaults]\noutput = \"xml\"\n").unwrap();

        let err = Context::load(&global(path)).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
    }
}
