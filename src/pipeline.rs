//! Corpus processing: read `.eml` inputs, normalize or anonymize every
//! message in parallel against one shared store, write the results.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::anonymize::{AnonymizationStore, AnonymizeReport, Anonymizer, Blocklist};
use crate::config::Config;
use crate::error::{PrepError, Result};
use crate::export::eml;
use crate::model::message::{DecodeSummary, StructuredMessage};
use crate::parser::patterns::PatternCatalog;

/// What the pipeline does to each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Decode, replace sensitive values, re-encode as UTF-8.
    Anonymize,
    /// Decode and re-encode every textual unit as UTF-8, no substitutions.
    Normalize,
}

/// Everything a run needs besides its inputs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub mode: Mode,
    pub output_dir: PathBuf,
    /// Worker threads (0 = one per CPU).
    pub threads: usize,
    /// Larger inputs are skipped.
    pub max_message_size: usize,
    pub catalog: PatternCatalog,
    pub blocklist: Blocklist,
}

impl PipelineOptions {
    /// Options taken from configuration.
    pub fn from_config(config: &Config, mode: Mode, output_dir: PathBuf) -> Result<Self> {
        let mut catalog = PatternCatalog::default();
        if let Some(label) = &config.normalize.default_charset {
            catalog = catalog.with_default_charset(label.clone());
        }
        Ok(Self {
            mode,
            output_dir,
            threads: config.performance.threads,
            max_message_size: config.performance.max_message_size,
            catalog,
            blocklist: Blocklist::from_config(&config.anonymize)?,
        })
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub messages_processed: usize,
    pub messages_failed: usize,
    pub messages_skipped: usize,
    pub units_decoded: usize,
    pub units_failed: usize,
    pub units_skipped: usize,
    pub substitutions: usize,
    pub tokens_issued: usize,
    pub bytes_written: u64,
    pub anonymize: AnonymizeReport,
}

impl RunSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Written { processed, bytes, .. } => {
                self.messages_processed += 1;
                self.units_decoded += processed.decode.decoded;
                self.units_failed += processed.decode.failed;
                self.units_skipped += processed.decode.skipped;
                self.substitutions += processed.report.substitutions;
                self.anonymize.merge(&processed.report);
                self.bytes_written += bytes;
            }
            FileOutcome::Skipped { .. } => self.messages_skipped += 1,
            FileOutcome::Failed { .. } => self.messages_failed += 1,
        }
    }
}

/// One message after processing.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    pub decode: DecodeSummary,
    pub report: AnonymizeReport,
    pub output: Vec<u8>,
}

/// What happened to one input file.
#[derive(Debug)]
pub enum FileOutcome {
    Written {
        path: PathBuf,
        processed: ProcessedMessage,
        bytes: u64,
    },
    Skipped {
        size: u64,
    },
    Failed {
        error: PrepError,
    },
}

/// Runs messages through parse, decode, anonymize and re-encode.
#[derive(Debug, Clone)]
pub struct Pipeline {
    options: PipelineOptions,
    anonymizer: Anonymizer,
}

impl Pipeline {
    pub fn new(options: PipelineOptions, store: Arc<AnonymizationStore>) -> Self {
        Self {
            options,
            anonymizer: Anonymizer::new(store),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<AnonymizationStore> {
        self.anonymizer.store()
    }

    /// Process one message held in memory.
    ///
    /// Only a structural parse failure is an error; undecodable units stay
    /// as they were and are counted in the decode summary.
    pub fn process_message(&self, raw: &[u8]) -> Result<ProcessedMessage> {
        let mut message = StructuredMessage::parse_with(raw, &self.options.catalog)?;
        let decode = message.decode_all();

        let report = match self.options.mode {
            Mode::Anonymize => self.anonymizer.anonymize(&mut message, &self.options.blocklist),
            Mode::Normalize => AnonymizeReport::default(),
        };
        // Units left untouched by substitution are normalized too
        message.reencode_all();

        Ok(ProcessedMessage {
            decode,
            report,
            output: message.serialize(),
        })
    }

    /// Read, process and write one input file.
    pub fn process_file(&self, input: &Path) -> FileOutcome {
        match self.try_process_file(input) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(path = %input.display(), error = %error, "Skipping message");
                FileOutcome::Failed { error }
            }
        }
    }

    fn try_process_file(&self, input: &Path) -> Result<FileOutcome> {
        let size = std::fs::metadata(input)
            .map_err(|e| PrepError::io(input, e))?
            .len();
        if size > self.options.max_message_size as u64 {
            warn!(
                path = %input.display(),
                size,
                limit = self.options.max_message_size,
                "Message exceeds size limit, skipping"
            );
            return Ok(FileOutcome::Skipped { size });
        }

        let raw = std::fs::read(input).map_err(|e| PrepError::io(input, e))?;
        let processed = self.process_message(&raw)?;
        let path = eml::write_eml(
            &self.options.output_dir,
            &eml::eml_filename(input),
            &processed.output,
        )?;
        debug!(
            input = %input.display(),
            output = %path.display(),
            decoded = processed.decode.decoded,
            failed = processed.decode.failed,
            substitutions = processed.report.substitutions,
            "Processed message"
        );
        let bytes = processed.output.len() as u64;
        Ok(FileOutcome::Written {
            path,
            processed,
            bytes,
        })
    }

    /// Process every input in parallel.
    ///
    /// The progress callback receives `(done, total)` after each message.
    /// Per-message failures are logged and counted; only setup problems
    /// (bad thread pool, unwritable output directory) fail the run.
    pub fn run(
        &self,
        inputs: &[PathBuf],
        progress: Option<&(dyn Fn(usize, usize) + Sync)>,
    ) -> Result<RunSummary> {
        let output_dir = &self.options.output_dir;
        std::fs::create_dir_all(output_dir).map_err(|e| PrepError::io(output_dir, e))?;
        ensure_distinct_output(inputs, output_dir)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads)
            .build()
            .map_err(|e| PrepError::Config(format!("thread pool: {e}")))?;

        info!(
            inputs = inputs.len(),
            threads = pool.current_num_threads(),
            mode = ?self.options.mode,
            "Processing corpus"
        );

        let total = inputs.len();
        let done = AtomicUsize::new(0);
        let outcomes: Vec<FileOutcome> = pool.install(|| {
            inputs
                .par_iter()
                .map(|input| {
                    let outcome = self.process_file(input);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(cb) = progress {
                        cb(finished, total);
                    }
                    outcome
                })
                .collect()
        });

        let mut summary = RunSummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }
        summary.tokens_issued = self.store().len();

        info!(
            processed = summary.messages_processed,
            failed = summary.messages_failed,
            skipped = summary.messages_skipped,
            substitutions = summary.substitutions,
            "Corpus done"
        );
        Ok(summary)
    }
}

/// Process a file or a directory of `.eml` files with a shared store.
pub fn process_corpus(
    input: &Path,
    options: PipelineOptions,
    store: Arc<AnonymizationStore>,
    progress: Option<&(dyn Fn(usize, usize) + Sync)>,
) -> Result<RunSummary> {
    let inputs = collect_inputs(input)?;
    Pipeline::new(options, store).run(&inputs, progress)
}

/// A single file, or every `.eml` file directly inside a directory, sorted.
pub fn collect_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(PrepError::FileNotFound(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(PrepError::InvalidPath(path.display().to_string()));
    }

    let mut inputs = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|e| PrepError::io(path, e))? {
        let entry = entry.map_err(|e| PrepError::io(path, e))?;
        let file = entry.path();
        let is_eml = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("eml"));
        if is_eml && file.is_file() {
            inputs.push(file);
        }
    }
    inputs.sort();
    debug!(dir = %path.display(), count = inputs.len(), "Collected inputs");
    Ok(inputs)
}

/// Refuse to overwrite inputs in place.
fn ensure_distinct_output(inputs: &[PathBuf], output_dir: &Path) -> Result<()> {
    let Ok(output_dir) = output_dir.canonicalize() else {
        return Ok(());
    };
    let clash = inputs.iter().any(|input| {
        input
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .is_some_and(|parent| parent == output_dir)
    });
    if clash {
        return Err(PrepError::InvalidPath(format!(
            "output directory {} contains the inputs",
            output_dir.display()
        )));
    }
    Ok(())
}
