//! Generation controller.
//!
//! A request opens a history record with one pending slot per image, then
//! slot workers call the provider concurrently. The calling thread receives
//! completions in whatever order they finish and settles each one on its own:
//! the image is written, a receipt is recorded, the history slot is filled by
//! index and `image_generated` is emitted. The batch result is assembled in
//! slot order once every worker is done.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use edugen_contracts::categories::{CategoryCatalog, Frame};
use edugen_contracts::config::AppConfig;
use edugen_contracts::events::{self, EventWriter};
use edugen_contracts::history::{HistoryRecord, HistoryStore, Revision, SlotOutcome, SlotUpdate};
use edugen_contracts::models::{
    distribute_models, ModelRegistry, ModelSelector, ModelTier, REFINE_MODEL,
};
use edugen_contracts::runs::receipts::{
    build_receipt, write_receipt, ReceiptRequest, ResolvedRequest,
};
use edugen_contracts::runs::session::{read_session, write_session, SavedImage, SessionMetadata};
use serde_json::{json, Value};

use crate::imaging::correct_aspect_ratio;
use crate::prompt::{
    build_content, compose_generation_instruction, compose_refinement_instruction, PromptBuilder,
    PromptOptions,
};
use crate::providers::{
    api_key_error, default_provider_registry, ImageProviderRegistry, ProviderRequest,
    ProviderResponse,
};
use crate::references::{image_input_to_url, load_system_references, resolve_user_references};
use crate::util::{
    decode_data_url, error_chain_text, file_timestamp, map_object, now_utc_iso,
    push_unique_warning,
};
use crate::validate::ImageValidator;

/// Result of a generate or refine request; also what `session_<id>.json` holds.
pub type GenerationResult = SessionMetadata;

const REFINE_STEPS: u64 = 3;
const MAX_NAME_SUFFIX: u32 = 100;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub app: AppConfig,
    pub catalog: CategoryCatalog,
    /// Project root. Reference and relative output directories resolve here.
    pub base_dir: PathBuf,
}

impl GeneratorConfig {
    pub fn load(config_dir: &Path, base_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            app: AppConfig::load(config_dir)?,
            catalog: CategoryCatalog::load(config_dir)?,
            base_dir: base_dir.into(),
        })
    }
}

/// Receives progress and per-image notifications as they happen. Slot
/// workers report progress from their own threads.
pub trait GenerationObserver: Sync {
    fn on_progress(&self, _session_id: &str, _current: u64, _total: u64, _status: &str) {}
    fn on_image(&self, _session_id: &str, _index: usize, _image: &SavedImage) {}
}

pub struct NoopObserver;

impl GenerationObserver for NoopObserver {}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub category: String,
    pub user_input: String,
    /// Falls back to `generation.images_per_prompt`.
    pub count: Option<usize>,
    pub models: Vec<ModelTier>,
    pub prompt: PromptOptions,
    /// URLs, data URLs, local paths or raw base64.
    pub user_references: Vec<String>,
    pub use_system_references: bool,
    pub api_key: Option<String>,
}

/// A generated history slot to attach a refinement to. `index` is 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTarget {
    pub record_id: String,
    pub index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RefineRequest {
    pub category: String,
    /// Path or URL of the image to refine; defaults to the target slot's
    /// current image.
    pub base_image: Option<String>,
    pub instructions: String,
    pub target: Option<HistoryTarget>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

pub struct Generator {
    config: AppConfig,
    catalog: CategoryCatalog,
    base_dir: PathBuf,
    output_dir: PathBuf,
    models: ModelRegistry,
    providers: ImageProviderRegistry,
    validator: ImageValidator,
    events: Option<EventWriter>,
    dry_run: bool,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let GeneratorConfig {
            app,
            catalog,
            base_dir,
        } = config;
        let output_dir = app.output_dir(&base_dir)?;
        let dry_run = app.is_dry_run();
        if dry_run {
            tracing::info!("dry run enabled; images are rendered locally");
        }
        Ok(Self {
            providers: default_provider_registry(&app.api),
            validator: ImageValidator::new(app.validation.clone()),
            models: ModelRegistry::new(None),
            config: app,
            catalog,
            base_dir,
            output_dir,
            events: None,
            dry_run,
        })
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_providers(mut self, providers: ImageProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn categories(&self) -> &CategoryCatalog {
        &self.catalog
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Fresh view of the history file.
    pub fn history(&self) -> HistoryStore {
        HistoryStore::open(
            self.config.history_path(&self.output_dir),
            self.config.output.history_limit,
        )
    }

    pub fn session(&self, session_id: &str) -> Result<SessionMetadata> {
        read_session(&self.output_dir, session_id)
    }

    pub fn generate(
        &self,
        request: &GenerationRequest,
        observer: &dyn GenerationObserver,
    ) -> Result<GenerationResult> {
        let category = request.category.trim();
        let user_input = request.user_input.trim();
        if category.is_empty() || user_input.is_empty() {
            bail!("Missing required fields: category and user_input");
        }
        let count = request
            .count
            .unwrap_or(self.config.generation.images_per_prompt as usize);
        if count == 0 {
            bail!("image count must be at least 1");
        }

        let session_id = new_session_id();
        let reporter = self.reporter(&session_id, observer);
        let models = distribute_models(&request.models, count);
        tracing::info!(
            session_id = %session_id,
            category,
            user_input,
            count,
            models = ?models,
            "generation started"
        );
        reporter.emit(
            events::GENERATION_STARTED,
            json!({
                "mode": "generate",
                "category": category,
                "user_input": user_input,
                "count": count,
                "models": models,
            }),
        );

        let total = count as u64 + 2;
        reporter.progress(0, total, "Building prompt...");
        let builder = PromptBuilder::new(&self.catalog);
        let built = match builder.build(category, user_input, &request.prompt) {
            Ok(built) => built,
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "prompt building failed");
                let result = SessionMetadata {
                    success: false,
                    session_id: session_id.clone(),
                    history_id: None,
                    category: category.to_string(),
                    user_input: user_input.to_string(),
                    prompt: String::new(),
                    total_requested: count,
                    total_generated: 0,
                    images: Vec::new(),
                    validation: None,
                    models_used: models,
                    warnings: Vec::new(),
                    error: Some(format!("Prompt building failed: {err}")),
                    timestamp: now_utc_iso(),
                };
                reporter.emit(events::GENERATION_COMPLETE, json!({ "result": &result }));
                return Ok(result);
            }
        };

        let batch = BatchInput {
            request,
            category,
            user_input,
            prompt: &built.text,
            frame: &built.frame,
            models: &models,
        };
        self.run_batch(&batch, &reporter).map_err(|err| {
            reporter.error(&err);
            err
        })
    }

    fn run_batch(
        &self,
        batch: &BatchInput<'_>,
        reporter: &Reporter<'_>,
    ) -> Result<GenerationResult> {
        let request = batch.request;
        let session_id = reporter.session_id;
        let count = batch.models.len();
        let total = count as u64 + 2;
        let frame = batch.frame;
        let mut warnings = Vec::new();

        let system_refs = if request.use_system_references {
            load_system_references(
                &self
                    .catalog
                    .reference_images_dir(&self.base_dir, batch.category)?,
            )
        } else {
            Vec::new()
        };
        let user_refs = resolve_user_references(&request.user_references, &mut warnings);
        let instruction = compose_generation_instruction(
            batch.prompt,
            !system_refs.is_empty(),
            !user_refs.is_empty(),
            frame.width,
            frame.height,
        );
        let content = build_content(&system_refs, &user_refs, None, &instruction);
        let api_key = self.config.resolve_api_key(request.api_key.as_deref());

        let mut history = self.history();
        let record = HistoryRecord::pending(
            session_id,
            batch.category,
            batch.user_input,
            request.prompt.style.clone(),
            batch.prompt,
            batch.models,
        );
        let record_id = record.id.clone();
        history.begin(record).context("failed to open history record")?;

        let base_filename = format!(
            "{}_{}_{}",
            batch.category,
            safe_input(batch.user_input),
            file_timestamp()
        );
        let receipts = ReceiptContext {
            session_id,
            history_id: Some(&record_id),
            request: ReceiptRequest {
                mode: "generate".to_string(),
                category: batch.category.to_string(),
                user_input: batch.user_input.to_string(),
                style: request.prompt.style.clone(),
                orientation: request
                    .prompt
                    .orientation
                    .map(|orientation| orientation.label().to_ascii_lowercase()),
                user_reference_images: request.user_references.clone(),
                use_system_references: request.use_system_references,
            },
            prompt: batch.prompt,
            instruction: &instruction,
            frame,
            system_reference_count: system_refs.len(),
            user_reference_count: user_refs.len(),
        };

        reporter.progress(1, total, "Generating images...");

        let mut state = BatchState {
            history,
            record_id: &record_id,
            base_filename: &base_filename,
            frame,
            images: vec![None; count],
            accepted: vec![None; count],
            warnings,
            fatal: None,
        };

        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let workers = (self.config.generation.max_parallel.max(1) as usize).min(count);
        let spacing = Duration::from_millis(self.config.generation.request_spacing_ms);
        let started = Instant::now();
        let (tx, rx) = mpsc::channel::<SlotResult>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (next, abort, content, api_key) = (&next, &abort, &content, &api_key);
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= count || abort.load(Ordering::SeqCst) {
                        break;
                    }
                    let due = started + spacing.saturating_mul(index as u32);
                    thread::sleep(due.saturating_duration_since(Instant::now()));
                    if abort.load(Ordering::SeqCst) {
                        break;
                    }

                    let model = batch.models[index].clone();
                    reporter.progress(
                        index as u64 + 2,
                        total,
                        &format!(
                            "Generating image {}/{count} using {}...",
                            index + 1,
                            self.models.resolve_or_openrouter(&model).short_name()
                        ),
                    );
                    let outcome = self.request_image(
                        &model,
                        content.clone(),
                        Some(frame.clone()),
                        api_key.clone(),
                        index as u64,
                    );
                    if tx.send(SlotResult { index, model, outcome }).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for completion in rx {
                let accepted = self.accept_completion(completion, &receipts, &mut state, reporter);
                if let Err(err) = accepted {
                    if state.fatal.is_none() {
                        abort.store(true, Ordering::SeqCst);
                        state.fatal = Some(err);
                    }
                }
            }
        });

        let BatchState {
            mut history,
            images,
            accepted,
            warnings,
            fatal,
            ..
        } = state;
        if let Some(err) = fatal {
            let message = api_key_error(&err)
                .map(|key_err| key_err.to_string())
                .unwrap_or_else(|| err.to_string());
            for (index, saved) in images.iter().enumerate() {
                if saved.is_none() {
                    let outcome = SlotOutcome::Failed {
                        error: message.clone(),
                    };
                    settle(&mut history, &record_id, index, outcome);
                }
            }
            return Err(err);
        }

        reporter.progress(count as u64 + 1, total, "Validating and saving...");
        let accepted_bytes: Vec<&[u8]> = accepted.iter().flatten().map(Vec::as_slice).collect();
        let validation = self
            .validator
            .validate_batch(&accepted_bytes, frame, &base_filename);

        let images: Vec<SavedImage> = images
            .into_iter()
            .enumerate()
            .map(|(index, saved)| {
                saved.unwrap_or_else(|| {
                    let model = batch.models[index].clone();
                    SavedImage::failed(index + 1, Some(model), "Generation failed")
                })
            })
            .collect();
        let total_generated = images.iter().filter(|image| image.success).count();
        tracing::info!(session_id, total_generated, count, "generation finished");

        let result = SessionMetadata {
            success: total_generated > 0,
            session_id: session_id.to_string(),
            history_id: Some(record_id),
            category: batch.category.to_string(),
            user_input: batch.user_input.to_string(),
            prompt: batch.prompt.to_string(),
            total_requested: count,
            total_generated,
            images,
            validation: Some(validation),
            models_used: batch.models.to_vec(),
            warnings,
            error: None,
            timestamp: now_utc_iso(),
        };
        self.persist_session(&result);
        reporter.progress(total, total, "Complete!");
        reporter.emit(events::GENERATION_COMPLETE, json!({ "result": &result }));
        Ok(result)
    }

    /// Settles one slot: saves the image, writes its receipt, fills the
    /// history slot and notifies. Only a credential failure is returned.
    fn accept_completion(
        &self,
        completion: SlotResult,
        receipts: &ReceiptContext<'_>,
        state: &mut BatchState<'_>,
        reporter: &Reporter<'_>,
    ) -> Result<()> {
        let SlotResult {
            index,
            model,
            outcome,
        } = completion;
        let slot = index + 1;
        let session_id = reporter.session_id;

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                if let Some(key_err) = api_key_error(&err) {
                    tracing::error!(session_id, slot, error = %key_err, "aborting generation");
                    let outcome = SlotOutcome::Failed {
                        error: key_err.to_string(),
                    };
                    settle(&mut state.history, state.record_id, index, outcome);
                    return Err(err);
                }
                let message = error_chain_text(&err, 400);
                tracing::warn!(
                    session_id,
                    slot,
                    model = %model,
                    error = %message,
                    "image generation failed"
                );
                push_unique_warning(
                    &mut state.warnings,
                    format!("image {slot} failed: {message}"),
                );
                settle(
                    &mut state.history,
                    state.record_id,
                    index,
                    SlotOutcome::Failed { error: message },
                );
                state.images[index] =
                    Some(SavedImage::failed(slot, Some(model), "Generation failed"));
                return Ok(());
            }
        };

        let bytes = correct_aspect_ratio(
            &response.image.bytes,
            state.frame.width,
            state.frame.height,
        );
        let size_bytes = bytes.len() as u64;
        let requested_name = format!("{}_{slot}.png", state.base_filename);
        let (filename, path) = match self.store_image(&requested_name, &bytes) {
            Ok(stored) => stored,
            Err(err) => {
                let message = error_chain_text(&err, 400);
                tracing::error!(session_id, slot, error = %message, "failed to save image");
                let outcome = SlotOutcome::Failed {
                    error: message.clone(),
                };
                settle(&mut state.history, state.record_id, index, outcome);
                state.images[index] = Some(SavedImage::failed(slot, Some(model), message));
                return Ok(());
            }
        };

        for warning in &response.warnings {
            push_unique_warning(&mut state.warnings, format!("image {slot}: {warning}"));
        }
        self.write_image_receipt(receipts, slot, &model, &response, &path, size_bytes);
        let filepath = path.to_string_lossy().to_string();
        settle(
            &mut state.history,
            state.record_id,
            index,
            SlotOutcome::Ready {
                filename: filename.clone(),
                path: filepath.clone(),
                size_bytes,
            },
        );
        let saved = SavedImage {
            index: slot,
            success: true,
            filename: Some(filename),
            filepath: Some(filepath),
            size_bytes: Some(size_bytes),
            model: Some(model),
            error: None,
        };
        reporter.image(slot, &saved);
        state.images[index] = Some(saved);
        state.accepted[index] = Some(bytes);
        Ok(())
    }

    pub fn refine(
        &self,
        request: &RefineRequest,
        observer: &dyn GenerationObserver,
    ) -> Result<GenerationResult> {
        let category = request.category.trim();
        let instructions = request.instructions.trim();
        if category.is_empty() || instructions.is_empty() {
            bail!("Missing required fields: category and instructions");
        }
        self.catalog.get(category)?;

        let session_id = new_session_id();
        let reporter = self.reporter(&session_id, observer);
        tracing::info!(session_id = %session_id, category, instructions, "refinement started");
        reporter.emit(
            events::GENERATION_STARTED,
            json!({
                "mode": "refine",
                "category": category,
                "instructions": instructions,
            }),
        );
        self.run_refine(request, category, instructions, &reporter)
            .map_err(|err| {
                reporter.error(&err);
                err
            })
    }

    fn run_refine(
        &self,
        request: &RefineRequest,
        category: &str,
        instructions: &str,
        reporter: &Reporter<'_>,
    ) -> Result<GenerationResult> {
        let session_id = reporter.session_id;
        reporter.progress(0, REFINE_STEPS, "Processing request...");

        let mut warnings = Vec::new();
        let mut history = self.history();
        let base = self.refine_base(request, &history)?;
        let base_url = image_input_to_url(&base).context("base image is not usable")?;
        let expected = self.base_frame(&base_url, category)?;

        let selection = ModelSelector::new(Some(self.models.clone()))
            .select(Some(request.model.as_deref().unwrap_or(REFINE_MODEL)), "edit")
            .map_err(|reason| anyhow!(reason))?;
        if let Some(reason) = selection.fallback_reason {
            push_unique_warning(&mut warnings, reason);
        }
        let model = selection.model.name;

        let system_refs =
            load_system_references(&self.catalog.reference_images_dir(&self.base_dir, category)?);
        let instruction = compose_refinement_instruction(instructions, !system_refs.is_empty());
        let content = build_content(&system_refs, &[], Some(&base_url), &instruction);
        let api_key = self.config.resolve_api_key(request.api_key.as_deref());

        reporter.progress(1, REFINE_STEPS, "Generating refined image...");
        let response = match self.request_image(&model, content, None, api_key, 0) {
            Ok(response) => Some(response),
            Err(err) if api_key_error(&err).is_some() => return Err(err),
            Err(err) => {
                let message = error_chain_text(&err, 400);
                tracing::warn!(session_id, model = %model, error = %message, "refinement failed");
                push_unique_warning(&mut warnings, format!("refinement failed: {message}"));
                None
            }
        };

        reporter.progress(2, REFINE_STEPS, "Saving result...");
        let slot = request.target.as_ref().map_or(1, |target| target.index + 1);
        let filename = format!("refined_{category}_{}_1.png", file_timestamp());
        let receipts = ReceiptContext {
            session_id,
            history_id: request
                .target
                .as_ref()
                .map(|target| target.record_id.as_str()),
            request: ReceiptRequest {
                mode: "refine".to_string(),
                category: category.to_string(),
                user_input: instructions.to_string(),
                style: None,
                orientation: None,
                user_reference_images: Vec::new(),
                use_system_references: true,
            },
            prompt: instructions,
            instruction: &instruction,
            frame: &expected,
            system_reference_count: system_refs.len(),
            user_reference_count: 0,
        };

        let mut accepted: Vec<Vec<u8>> = Vec::new();
        let saved = match response {
            None => SavedImage::failed(slot, Some(model.clone()), "Generation failed"),
            Some(response) => match self.store_image(&filename, &response.image.bytes) {
                Err(err) => {
                    let message = error_chain_text(&err, 400);
                    tracing::error!(session_id, error = %message, "failed to save refined image");
                    SavedImage::failed(slot, Some(model.clone()), message)
                }
                Ok((filename, path)) => {
                    let size_bytes = response.image.bytes.len() as u64;
                    let filepath = path.to_string_lossy().to_string();
                    warnings.extend(response.warnings.iter().cloned());
                    self.write_image_receipt(&receipts, slot, &model, &response, &path, size_bytes);
                    if let Some(target) = &request.target {
                        let revision = Revision {
                            instructions: instructions.to_string(),
                            filename: filename.clone(),
                            path: filepath.clone(),
                            size_bytes,
                            created_at: now_utc_iso(),
                        };
                        record_revision(&mut history, target, revision, &mut warnings);
                    }
                    let saved = SavedImage {
                        index: slot,
                        success: true,
                        filename: Some(filename),
                        filepath: Some(filepath),
                        size_bytes: Some(size_bytes),
                        model: Some(model.clone()),
                        error: None,
                    };
                    reporter.image(slot, &saved);
                    accepted.push(response.image.bytes);
                    saved
                }
            },
        };

        let accepted_bytes: Vec<&[u8]> = accepted.iter().map(Vec::as_slice).collect();
        let validation = self
            .validator
            .validate_batch(&accepted_bytes, &expected, "refinement");
        reporter.progress(REFINE_STEPS, REFINE_STEPS, "Complete!");

        let success = saved.success;
        let result = SessionMetadata {
            success,
            session_id: session_id.to_string(),
            history_id: request.target.as_ref().map(|target| target.record_id.clone()),
            category: category.to_string(),
            user_input: instructions.to_string(),
            prompt: format!("Refinement: {instructions}"),
            total_requested: 1,
            total_generated: usize::from(success),
            images: vec![saved],
            validation: Some(validation),
            models_used: vec![model],
            warnings,
            error: None,
            timestamp: now_utc_iso(),
        };
        self.persist_session(&result);
        reporter.emit(events::GENERATION_COMPLETE, json!({ "result": &result }));
        Ok(result)
    }

    fn refine_base(&self, request: &RefineRequest, history: &HistoryStore) -> Result<String> {
        if let Some(base) = request
            .base_image
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Ok(base.to_string());
        }
        let Some(target) = &request.target else {
            bail!("Missing required fields: base image");
        };
        let record = history
            .get(&target.record_id)
            .with_context(|| format!("history record not found: {}", target.record_id))?;
        let slot = record
            .slots
            .iter()
            .find(|slot| slot.index == target.index)
            .with_context(|| {
                format!(
                    "history record {} has no slot {}",
                    target.record_id, target.index
                )
            })?;
        slot.current_path()
            .map(str::to_string)
            .with_context(|| format!("history slot {} has no image yet", target.index))
    }

    /// Expected frame of a refinement: the base image's own size when it is
    /// inline, else the category default.
    fn base_frame(&self, base_url: &str, category: &str) -> Result<Frame> {
        let spec = self.catalog.get(category)?;
        let dims = base_url
            .starts_with("data:")
            .then(|| decode_data_url(base_url).ok())
            .flatten()
            .and_then(|decoded| {
                image::ImageReader::new(std::io::Cursor::new(decoded.bytes))
                    .with_guessed_format()
                    .ok()?
                    .into_dimensions()
                    .ok()
            });
        Ok(match dims {
            Some((width, height)) if width > 0 && height > 0 => Frame {
                width,
                height,
                aspect_ratio: spec.aspect_label(width, height),
            },
            _ => spec.frame(None),
        })
    }

    fn provider_name(&self, model: &str) -> String {
        if self.dry_run {
            return "dryrun".to_string();
        }
        self.models.resolve_or_openrouter(model).provider
    }

    fn request_image(
        &self,
        model: &str,
        content: Vec<Value>,
        frame: Option<Frame>,
        api_key: Option<String>,
        seed: u64,
    ) -> Result<ProviderResponse> {
        let provider_name = self.provider_name(model);
        let provider = self
            .providers
            .get(&provider_name)
            .ok_or_else(|| anyhow!("image provider '{provider_name}' is not registered"))?;
        provider.generate(&ProviderRequest {
            model: model.to_string(),
            content,
            frame,
            api_key,
            seed,
        })
    }

    /// Writes a new file and returns the name actually used. An existing file
    /// is never replaced; a taken name gets a `-2`, `-3`, ... suffix.
    fn store_image(&self, filename: &str, bytes: &[u8]) -> Result<(String, PathBuf)> {
        let (stem, ext) = filename.rsplit_once('.').unwrap_or((filename, "png"));
        for attempt in 1..=MAX_NAME_SUFFIX {
            let name = if attempt == 1 {
                filename.to_string()
            } else {
                format!("{stem}-{attempt}.{ext}")
            };
            let path = self.output_dir.join(&name);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed creating {}", path.display()))
                }
            };
            file.write_all(bytes)
                .with_context(|| format!("failed writing {}", path.display()))?;
            tracing::info!(file = %path.display(), size_bytes = bytes.len(), "saved image");
            return Ok((name, path));
        }
        bail!("no free file name for {filename} in {}", self.output_dir.display())
    }

    fn write_image_receipt(
        &self,
        context: &ReceiptContext<'_>,
        slot: usize,
        model: &str,
        response: &ProviderResponse,
        image_path: &Path,
        size_bytes: u64,
    ) {
        let receipt_path = self
            .output_dir
            .join("receipts")
            .join(format!("receipt-{}-{slot}.json", context.session_id));
        let resolved = ResolvedRequest {
            provider: self.provider_name(model),
            model: model.to_string(),
            width: context.frame.width,
            height: context.frame.height,
            aspect_ratio: context.frame.aspect_ratio.clone(),
            prompt: context.prompt.to_string(),
            instruction: context.instruction.to_string(),
            system_reference_count: context.system_reference_count,
            user_reference_count: context.user_reference_count,
            warnings: response.warnings.clone(),
        };
        let metadata = map_object(json!({
            "session_id": context.session_id,
            "history_id": context.history_id,
            "slot": slot,
            "attempts": response.attempts,
            "size_bytes": size_bytes,
            "mime_type": response.image.mime_type,
        }));
        let receipt = build_receipt(
            &context.request,
            &resolved,
            &response.provider_request,
            &response.provider_response,
            image_path,
            &receipt_path,
            &metadata,
        );
        if let Err(err) = write_receipt(&receipt_path, &receipt) {
            tracing::warn!(file = %receipt_path.display(), error = %err, "failed to write receipt");
        }
    }

    fn persist_session(&self, result: &SessionMetadata) {
        if !self.config.output.save_metadata {
            return;
        }
        match write_session(&self.output_dir, result) {
            Ok(path) => tracing::debug!(file = %path.display(), "saved session metadata"),
            Err(err) => tracing::error!(error = %err, "failed to save session metadata"),
        }
    }

    fn reporter<'a>(
        &self,
        session_id: &'a str,
        observer: &'a dyn GenerationObserver,
    ) -> Reporter<'a> {
        Reporter {
            session_id,
            events: self
                .events
                .as_ref()
                .map(|writer| writer.for_session(session_id)),
            observer,
        }
    }
}

struct BatchInput<'a> {
    request: &'a GenerationRequest,
    category: &'a str,
    user_input: &'a str,
    prompt: &'a str,
    frame: &'a Frame,
    models: &'a [String],
}

/// Coordinator-side state of a batch while slots are settling.
struct BatchState<'a> {
    history: HistoryStore,
    record_id: &'a str,
    base_filename: &'a str,
    frame: &'a Frame,
    images: Vec<Option<SavedImage>>,
    accepted: Vec<Option<Vec<u8>>>,
    warnings: Vec<String>,
    fatal: Option<anyhow::Error>,
}

struct SlotResult {
    index: usize,
    model: String,
    outcome: Result<ProviderResponse>,
}

struct ReceiptContext<'a> {
    session_id: &'a str,
    history_id: Option<&'a str>,
    request: ReceiptRequest,
    prompt: &'a str,
    instruction: &'a str,
    frame: &'a Frame,
    system_reference_count: usize,
    user_reference_count: usize,
}

/// Fans progress and results out to the observer and the events file.
struct Reporter<'a> {
    session_id: &'a str,
    events: Option<EventWriter>,
    observer: &'a dyn GenerationObserver,
}

impl Reporter<'_> {
    fn progress(&self, current: u64, total: u64, status: &str) {
        tracing::debug!(session_id = self.session_id, current, total, status, "progress");
        self.observer
            .on_progress(self.session_id, current, total, status);
        if let Some(events) = &self.events {
            if let Err(err) = events.progress(current, total, status) {
                tracing::warn!(error = %err, "failed to write progress event");
            }
        }
    }

    fn image(&self, index: usize, image: &SavedImage) {
        self.observer.on_image(self.session_id, index, image);
        self.emit(events::IMAGE_GENERATED, json!({ "index": index, "image": image }));
    }

    fn error(&self, err: &anyhow::Error) {
        let message = api_key_error(err)
            .map(|key_err| key_err.to_string())
            .unwrap_or_else(|| format!("{err:#}"));
        tracing::error!(session_id = self.session_id, error = %message, "generation failed");
        self.emit(events::GENERATION_ERROR, json!({ "error": message }));
    }

    fn emit(&self, event_type: &str, payload: Value) {
        if let Some(events) = &self.events {
            if let Err(err) = events.emit(event_type, map_object(payload)) {
                tracing::warn!(event_type, error = %err, "failed to write event");
            }
        }
    }
}

fn record_revision(
    history: &mut HistoryStore,
    target: &HistoryTarget,
    revision: Revision,
    warnings: &mut Vec<String>,
) {
    match history.add_revision(&target.record_id, target.index, revision) {
        Ok(SlotUpdate::Applied) => {}
        Ok(SlotUpdate::Stale) => push_unique_warning(
            warnings,
            format!("history slot {} has no image; revision not recorded", target.index),
        ),
        Ok(SlotUpdate::Unknown) => push_unique_warning(
            warnings,
            format!("history record {} no longer exists", target.record_id),
        ),
        Err(err) => {
            tracing::warn!(
                record_id = %target.record_id,
                error = %err,
                "failed to record revision"
            );
        }
    }
}

fn settle(history: &mut HistoryStore, record_id: &str, index: usize, outcome: SlotOutcome) {
    match history.complete_slot(record_id, index, outcome) {
        Ok(SlotUpdate::Applied) => {}
        Ok(update) => tracing::debug!(record_id, index, ?update, "history slot not updated"),
        Err(err) => tracing::warn!(record_id, index, error = %err, "failed to update history"),
    }
}

/// Local timestamp plus a short random suffix so concurrent requests never
/// share a session file.
fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", file_timestamp(), &suffix[..8])
}

/// Letters, digits, space, `-` and `_`; spaces become `_`; at most 30 chars.
fn safe_input(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, ' ' | '-' | '_'))
        .map(|ch| if ch == ' ' { '_' } else { ch })
        .take(30)
        .collect()
}
