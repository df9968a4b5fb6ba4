//! Sequential fetching of every configured source, with optional merge.

use std::path::{Path, PathBuf};

use execfetch::{
    merge_files, ExecResult, FetchOutcome, Fetcher, HostResolver, JsonRpcConnector,
    ManagementConnector, SourceSpec, SystemResolver,
};

use crate::config::BatchConfig;
use crate::types::{BatchReport, CliError, CliResult, SourceOutcome, SourceReport};

/// Output file of the single-source commands when none is given.
pub const DEFAULT_OUTPUT_FILE: &str = "target/execfetch/jacoco.exec";

/// Resolve `source` and fetch it into `output`.
pub fn fetch_source<C: ManagementConnector>(
    fetcher: &Fetcher<C>,
    resolver: &dyn HostResolver,
    source: &SourceSpec,
    output: &Path,
) -> ExecResult<FetchOutcome> {
    let resolved = source.resolve_with(resolver)?;
    tracing::debug!("Resolved {} to {}", source.describe(), resolved.endpoint);
    fetcher.fetch_to_file(&resolved, output)
}

/// Fetch one source given on the command line.
///
/// Failures are returned when `fail_on_error` is set and otherwise logged
/// and reported as [`SourceOutcome::Failed`].
pub fn fetch_single(
    fetcher: &Fetcher,
    source: &SourceSpec,
    fail_on_error: bool,
) -> CliResult<SourceOutcome> {
    let output = source
        .output_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE));

    match fetch_source(fetcher, &SystemResolver, source, &output) {
        Ok(outcome) => Ok(outcome.into()),
        Err(e) if fail_on_error => Err(e.into()),
        Err(e) => {
            tracing::warn!("Unable to fetch from {}: {e}", source.describe());
            Ok(SourceOutcome::Failed {
                error: e.to_string(),
            })
        }
    }
}

/// Runs a [`BatchConfig`].
pub struct BatchRunner<C = JsonRpcConnector> {
    config: BatchConfig,
    fetcher: Fetcher<C>,
    resolver: Box<dyn HostResolver>,
}

impl BatchRunner<JsonRpcConnector> {
    pub fn new(config: BatchConfig) -> Self {
        let fetcher = Fetcher::with_timeouts(config.connect_timeout(), config.read_timeout());
        Self::with_fetcher(config, fetcher)
    }
}

impl<C: ManagementConnector> BatchRunner<C> {
    pub fn with_fetcher(config: BatchConfig, fetcher: Fetcher<C>) -> Self {
        Self {
            config,
            fetcher,
            resolver: Box::new(SystemResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: impl HostResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Fetch every source in order, then merge if configured.
    pub fn run(&self) -> CliResult<BatchReport> {
        let mut report = BatchReport::default();
        if self.config.sources.is_empty() {
            self.fail_or_record(&mut report, CliError::NoSources)?;
            return Ok(report);
        }

        for (i, source) in self.config.sources.iter().enumerate() {
            let index = i + 1;
            let label = source.describe();
            let output = self.config.output_for(index, source);
            tracing::info!("Fetching source {index} ({label})");

            let outcome =
                match fetch_source(&self.fetcher, self.resolver.as_ref(), source, &output) {
                    Ok(outcome) => outcome.into(),
                    Err(source) if self.config.fail_on_error => {
                        return Err(CliError::Source {
                            index,
                            label,
                            source,
                        })
                    }
                    Err(e) => {
                        tracing::warn!("Skipping source {index} ({label}): {e}");
                        SourceOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };

            report.sources.push(SourceReport {
                index,
                label,
                output,
                outcome,
            });
        }

        if self.config.merge {
            self.merge_outputs(&mut report)?;
        }
        Ok(report)
    }

    fn merge_outputs(&self, report: &mut BatchReport) -> CliResult<()> {
        let mut inputs: Vec<PathBuf> = Vec::new();
        for source in &report.sources {
            if source.output.exists() && !inputs.contains(&source.output) {
                inputs.push(source.output.clone());
            }
        }
        if inputs.is_empty() {
            tracing::warn!("No execution data files to merge");
            return Ok(());
        }

        let destination = self.config.merge_path();
        match merge_files(&inputs, &destination) {
            Ok(summary) => {
                report.merged = Some(summary);
                Ok(())
            }
            Err(source) => self.fail_or_record(
                report,
                CliError::Merge {
                    path: destination,
                    source,
                },
            ),
        }
    }

    fn fail_or_record(&self, report: &mut BatchReport, error: CliError) -> CliResult<()> {
        if self.config.fail_on_error {
            return Err(error);
        }
        tracing::warn!("{error}");
        report.errors.push(error.to_string());
        Ok(())
    }
}
