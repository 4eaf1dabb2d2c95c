use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};

use crate::categorizing::categorizer::Categorizer;
use crate::categorizing::rule_store::RuleStore;
use crate::categorizing::{CategorizeError, CategoryPrompter, PersonMode, PromptError};
use crate::config::{CategoryConfig, Config};
use crate::data;
use crate::integration::{self, WebhookSink};
use crate::report::{self, Summary};

/// The configured source, or the user's pick when none is configured.
pub fn choose_source<P: CategoryPrompter>(config: &CategoryConfig, prompter: &mut P) -> Result<String, PromptError> {
    if !config.source.is_empty() {
        return Ok(config.source.clone());
    }

    match config.sources.as_slice() {
        [] => Ok(String::new()),
        [only] => Ok(only.clone()),
        sources => prompter.select_source(sources),
    }
}

/// `None` when there is nobody to attribute transactions to.
pub fn choose_person_mode<P: CategoryPrompter>(
    people: &[String],
    prompter: &mut P,
) -> Result<Option<PersonMode>, PromptError> {
    match people {
        [] => Ok(None),
        [only] => Ok(Some(PersonMode::Fixed(only.clone()))),
        people => prompter.select_person_mode(people).map(Some),
    }
}

/// One full session in `dir`: load the statement, categorize and review it,
/// then write the export and the rule store. `input` overrides the configured
/// statement path. Returns the export path, or `None` when the user stopped
/// before the end; what was learned until then is still saved.
pub fn run<P, W>(dir: &Path, input: Option<&Path>, prompter: &mut P, out: &mut W) -> Result<Option<PathBuf>>
where
    P: CategoryPrompter,
    W: Write,
{
    let config = Config::load(dir);
    let input = input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.input_path(dir));

    let mut transactions = data::load_transactions(&input, &config.columns)?;
    let mut store = RuleStore::load_or_default(&config.rules_path(dir), config.limits);

    let source = choose_source(&config.categories, prompter)?;
    let person_mode = choose_person_mode(&config.categories.people, prompter)?;
    info!("source {:?}, people {:?}", source, person_mode);

    let mut categorizer = Categorizer::new(&mut store, &config.categories)
        .with_person_mode(person_mode)
        .with_progress_interval(config.display.progress_interval);
    match categorizer.categorize(&mut transactions, prompter) {
        Ok(()) => {},
        Err(err @ (CategorizeError::Aborted { .. } | CategorizeError::Prompt(PromptError::InputClosed))) => {
            warn!("{}, nothing exported", err);
            store.save()?;
            return Ok(None);
        },
        Err(err) => return Err(err.into()),
    }

    match categorizer.review(&mut transactions, prompter) {
        Ok(changed) => info!("review changed {} rows", changed),
        Err(CategorizeError::Prompt(PromptError::InputClosed)) => info!("input closed, review finished"),
        Err(err) => {
            store.save()?;
            return Err(err.into());
        },
    }
    let stats = categorizer.stats().clone();

    let records = data::export_records(&transactions, &source);
    let output = data::export_transactions(
        &records,
        &config.output_dir(dir),
        &config.files.output_prefix,
        &mut store,
    )?;

    if let Some(settings) = &config.integration {
        match WebhookSink::new(settings) {
            Ok(sink) => {
                integration::push_best_effort(&sink, &source, &records);
            },
            Err(err) => warn!("integration disabled: {}", err),
        }
    }

    report::write_preview(out, &records, config.display.preview_count)?;
    report::write_statistics(out, &stats, &Summary::from_records(&records))?;
    writeln!(out)?;
    writeln!(out, "Saved {} ({} rules learned)", output.display(), store.len())?;

    Ok(Some(output))
}
