//! Workflow templates and their parameterization.
//!
//! A template is a ComfyUI API-format graph (node id -> `{class_type,
//! inputs}`) plus slot bindings that say which node input receives which
//! request value. Slots are either declared in the template document:
//!
//! ```yaml
//! slots:
//!   positive: { node: "6", input: text }
//!   seed: [{ node: "3", input: seed }, { node: "11", input: noise_seed }]
//! graph:
//!   "3": { class_type: KSampler, inputs: { ... } }
//! ```
//!
//! or discovered from well-known node class types when the file holds a
//! bare graph. Templates are loaded once and shared read-only; every job
//! works on its own copy of the graph.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use comfybot_core::catalog::ModelCatalog;
use comfybot_core::command::{CommandKind, TemplateKey, TemplateVariant};
use comfybot_core::error::GenerationError;
use comfybot_core::request::GenerationRequest;
use comfybot_core::settings::GenerationDefaults;

// ---------------------------------------------------------------------------
// ComfyUI node class types used for slot discovery
// ---------------------------------------------------------------------------

const KSAMPLER_CLASS: &str = "KSampler";
const KSAMPLER_ADVANCED_CLASS: &str = "KSamplerAdvanced";
const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";
const LOAD_IMAGE_CLASS: &str = "LoadImage";
const LOAD_IMAGE_MASK_CLASS: &str = "LoadImageMask";
const LOAD_CHECKPOINT_CLASS: &str = "CheckpointLoaderSimple";
const EMPTY_LATENT_CLASS: &str = "EmptyLatentImage";

/// How far to follow conditioning links from a sampler back to its text
/// encoder (through ControlNet / combine nodes).
const MAX_CONDITIONING_HOPS: usize = 8;

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// A request value that can be written into a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Model,
    Positive,
    Negative,
    Steps,
    Cfg,
    Seed,
    SamplerName,
    Scheduler,
    Width,
    Height,
    BatchSize,
    SourceImage,
    MaskImage,
    ColorizeMethod,
}

impl Slot {
    pub fn name(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Steps => "steps",
            Self::Cfg => "cfg",
            Self::Seed => "seed",
            Self::SamplerName => "sampler_name",
            Self::Scheduler => "scheduler",
            Self::Width => "width",
            Self::Height => "height",
            Self::BatchSize => "batch_size",
            Self::SourceImage => "source_image",
            Self::MaskImage => "mask_image",
            Self::ColorizeMethod => "colorize_method",
        }
    }
}

/// Slots a template must bind to serve `key`.
pub fn required_slots(key: TemplateKey) -> Vec<Slot> {
    let mut slots = match key.kind {
        CommandKind::Text2Img | CommandKind::Animate => {
            vec![Slot::Model, Slot::Positive, Slot::Width, Slot::Height]
        }
        CommandKind::Img2Img => vec![Slot::Model, Slot::Positive, Slot::SourceImage],
        CommandKind::Upscale | CommandKind::Depth => vec![Slot::SourceImage],
        CommandKind::Inpaint | CommandKind::CanvasEdit => {
            vec![Slot::Model, Slot::Positive, Slot::SourceImage, Slot::MaskImage]
        }
    };
    if key.variant == TemplateVariant::Colorized {
        slots.push(Slot::ColorizeMethod);
    }
    slots
}

/// One node input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    pub node: String,
    pub input: String,
}

impl SlotRef {
    fn new(node: &str, input: &str) -> Self {
        Self {
            node: node.to_string(),
            input: input.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SlotBinding {
    One(SlotRef),
    Many(Vec<SlotRef>),
}

#[derive(Debug, Deserialize)]
struct TemplateDocument {
    #[serde(default)]
    slots: BTreeMap<Slot, SlotBinding>,
    graph: Value,
}

// ---------------------------------------------------------------------------
// WorkflowTemplate
// ---------------------------------------------------------------------------

/// A parsed, slot-resolved workflow template. Immutable once built.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    name: String,
    graph: Value,
    slots: BTreeMap<Slot, Vec<SlotRef>>,
}

impl WorkflowTemplate {
    /// Build a template from a parsed document (`{slots?, graph}` or a
    /// bare graph).
    pub fn from_value(name: impl Into<String>, value: Value) -> Result<Self, GenerationError> {
        let name = name.into();
        let is_document = value
            .get("graph")
            .is_some_and(|g| g.is_object() && g.get("class_type").is_none());

        let (graph, declared) = if is_document {
            let doc: TemplateDocument = serde_json::from_value(value)
                .map_err(|e| GenerationError::Template(format!("{name}: {e}")))?;
            let declared = doc
                .slots
                .into_iter()
                .map(|(slot, binding)| {
                    let refs = match binding {
                        SlotBinding::One(r) => vec![r],
                        SlotBinding::Many(rs) => rs,
                    };
                    (slot, refs)
                })
                .collect::<BTreeMap<_, _>>();
            (doc.graph, declared)
        } else {
            (value, BTreeMap::new())
        };

        validate_graph(&name, &graph)?;

        let mut slots = discover_slots(&graph);
        slots.extend(declared);
        slots.retain(|_, refs| !refs.is_empty());

        for (slot, refs) in &slots {
            for r in refs {
                if graph.get(&r.node).is_none() {
                    return Err(GenerationError::Template(format!(
                        "{name}: slot '{}' points at missing node '{}'",
                        slot.name(),
                        r.node
                    )));
                }
            }
        }

        Ok(Self { name, graph, slots })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Value {
        &self.graph
    }

    pub fn slot(&self, slot: Slot) -> &[SlotRef] {
        self.slots.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_slot(&self, slot: Slot) -> bool {
        !self.slot(slot).is_empty()
    }

    /// Required slots for `key` that this template does not bind.
    pub fn missing_slots(&self, key: TemplateKey) -> Vec<Slot> {
        required_slots(key)
            .into_iter()
            .filter(|s| !self.has_slot(*s))
            .collect()
    }
}

fn validate_graph(name: &str, graph: &Value) -> Result<(), GenerationError> {
    let nodes = graph.as_object().ok_or_else(|| {
        GenerationError::Template(format!("{name}: workflow graph must be an object"))
    })?;
    if nodes.is_empty() {
        return Err(GenerationError::Template(format!(
            "{name}: workflow graph has no nodes"
        )));
    }
    for (id, node) in nodes {
        if node.get("class_type").and_then(Value::as_str).is_none() {
            return Err(GenerationError::Template(format!(
                "{name}: node '{id}' is missing 'class_type'"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Slot discovery
// ---------------------------------------------------------------------------

/// Node ids in numeric order when possible, lexical otherwise.
fn ordered_nodes(graph: &Value) -> Vec<(&String, &Value)> {
    let mut nodes: Vec<_> = graph
        .as_object()
        .map(|m| m.iter().collect())
        .unwrap_or_default();
    nodes.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });
    nodes
}

fn class_type(node: &Value) -> &str {
    node.get("class_type").and_then(Value::as_str).unwrap_or("")
}

fn is_literal(node: &Value, input: &str) -> bool {
    node.get("inputs")
        .and_then(|i| i.get(input))
        .is_some_and(|v| !v.is_array())
}

fn node_title(node: &Value) -> String {
    node.get("_meta")
        .and_then(|m| m.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase()
}

/// Source node id of a `[node_id, output_index]` link.
fn link_source(value: &Value) -> Option<String> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    match &arr[0] {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Follow a conditioning link back to the text encoder that produced it.
fn find_text_encoder(graph: &Value, start: &Value) -> Option<String> {
    let mut current = link_source(start)?;
    for _ in 0..MAX_CONDITIONING_HOPS {
        let node = graph.get(&current)?;
        if class_type(node) == CLIP_TEXT_ENCODE_CLASS {
            return is_literal(node, "text").then_some(current);
        }
        let inputs = node.get("inputs")?;
        let next = ["conditioning", "conditioning_to", "conditioning_1", "positive"]
            .iter()
            .find_map(|name| inputs.get(*name).and_then(link_source))?;
        current = next;
    }
    None
}

fn push_unique(slots: &mut BTreeMap<Slot, Vec<SlotRef>>, slot: Slot, r: SlotRef) {
    let refs = slots.entry(slot).or_default();
    if !refs.contains(&r) {
        refs.push(r);
    }
}

/// Heuristic slot bindings from node class types.
fn discover_slots(graph: &Value) -> BTreeMap<Slot, Vec<SlotRef>> {
    let mut slots: BTreeMap<Slot, Vec<SlotRef>> = BTreeMap::new();
    let mut plain_images = Vec::new();

    for (id, node) in ordered_nodes(graph) {
        match class_type(node) {
            LOAD_CHECKPOINT_CLASS => {
                push_unique(&mut slots, Slot::Model, SlotRef::new(id, "ckpt_name"));
            }
            KSAMPLER_CLASS | KSAMPLER_ADVANCED_CLASS => {
                let seed_input = if is_literal(node, "noise_seed") { "noise_seed" } else { "seed" };
                for (slot, input) in [
                    (Slot::Seed, seed_input),
                    (Slot::Steps, "steps"),
                    (Slot::Cfg, "cfg"),
                    (Slot::SamplerName, "sampler_name"),
                    (Slot::Scheduler, "scheduler"),
                ] {
                    if is_literal(node, input) {
                        push_unique(&mut slots, slot, SlotRef::new(id, input));
                    }
                }
                let inputs = node.get("inputs");
                for (slot, input) in [(Slot::Positive, "positive"), (Slot::Negative, "negative")] {
                    if let Some(encoder) = inputs
                        .and_then(|i| i.get(input))
                        .and_then(|link| find_text_encoder(graph, link))
                    {
                        push_unique(&mut slots, slot, SlotRef::new(&encoder, "text"));
                    }
                }
            }
            EMPTY_LATENT_CLASS => {
                for (slot, input) in [
                    (Slot::Width, "width"),
                    (Slot::Height, "height"),
                    (Slot::BatchSize, "batch_size"),
                ] {
                    if is_literal(node, input) {
                        push_unique(&mut slots, slot, SlotRef::new(id, input));
                    }
                }
            }
            LOAD_IMAGE_MASK_CLASS => {
                push_unique(&mut slots, Slot::MaskImage, SlotRef::new(id, "image"));
            }
            LOAD_IMAGE_CLASS => {
                if node_title(node).contains("mask") || id.to_lowercase().contains("mask") {
                    push_unique(&mut slots, Slot::MaskImage, SlotRef::new(id, "image"));
                } else {
                    plain_images.push(id.clone());
                }
            }
            _ => {}
        }

        if is_literal(node, "colorize_method") {
            push_unique(&mut slots, Slot::ColorizeMethod, SlotRef::new(id, "colorize_method"));
        }
    }

    // First plain LoadImage is the source; a second one is the mask unless
    // a mask loader was already identified.
    let mut plain = plain_images.into_iter();
    if let Some(source) = plain.next() {
        push_unique(&mut slots, Slot::SourceImage, SlotRef::new(&source, "image"));
    }
    if !slots.contains_key(&Slot::MaskImage) {
        if let Some(mask) = plain.next() {
            push_unique(&mut slots, Slot::MaskImage, SlotRef::new(&mask, "image"));
        }
    }

    slots
}

// ---------------------------------------------------------------------------
// TemplateLibrary
// ---------------------------------------------------------------------------

/// Every template found in the workflows directory, keyed by command kind
/// and variant.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: HashMap<TemplateKey, Arc<WorkflowTemplate>>,
}

impl TemplateLibrary {
    /// Load every recognized `*.yaml`, `*.yml` and `*.json` file in `dir`.
    ///
    /// Unrecognized file names are ignored. A recognized file that fails
    /// to parse is an error.
    pub async fn load_dir(dir: &Path) -> Result<Self, GenerationError> {
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            GenerationError::Template(format!("cannot read workflows directory {}: {e}", dir.display()))
        })?;

        let mut library = Self::default();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GenerationError::Template(format!("{}: {e}", dir.display())))?
        {
            let path = entry.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            let keys = TemplateKey::from_file_stem(stem);
            if keys.is_empty() || !matches!(ext, "yaml" | "yml" | "json") {
                tracing::debug!(file = %path.display(), "Skipping unrecognized workflow file");
                continue;
            }

            let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                GenerationError::Template(format!("cannot read {}: {e}", path.display()))
            })?;
            let value = if ext == "json" {
                serde_json::from_str(&text)
                    .map_err(|e| GenerationError::Template(format!("{}: {e}", path.display())))?
            } else {
                parse_yaml(&text)
                    .map_err(|e| GenerationError::Template(format!("{}: {e}", path.display())))?
            };

            let template = Arc::new(WorkflowTemplate::from_value(stem, value)?);
            for key in keys {
                let missing = template.missing_slots(key);
                if !missing.is_empty() {
                    tracing::warn!(
                        template = stem,
                        %key,
                        missing = ?missing.iter().map(|s| s.name()).collect::<Vec<_>>(),
                        "Template lacks required slots; requests for it will fail",
                    );
                }
                library.templates.insert(key, Arc::clone(&template));
            }
            tracing::info!(template = stem, "Loaded workflow template");
        }

        Ok(library)
    }

    /// Register a template programmatically.
    pub fn insert(&mut self, key: TemplateKey, template: WorkflowTemplate) {
        self.templates.insert(key, Arc::new(template));
    }

    pub fn get(&self, key: TemplateKey) -> Result<Arc<WorkflowTemplate>, GenerationError> {
        self.templates.get(&key).cloned().ok_or_else(|| {
            GenerationError::Template(format!("no workflow template for {key} (expected {}.yaml)", key.file_stem()))
        })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TemplateKey> {
        self.templates.keys()
    }
}

/// YAML allows integer mapping keys (ComfyUI node ids are often written
/// bare); JSON objects need strings.
fn parse_yaml(text: &str) -> Result<Value, String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
    yaml_to_json(yaml)
}

fn yaml_to_json(yaml: serde_yaml::Value) -> Result<Value, String> {
    use serde_yaml::Value as Y;
    Ok(match yaml {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                let f = n.as_f64().ok_or_else(|| format!("unsupported number {n}"))?;
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| format!("non-finite number {f}"))?
            }
        }
        Y::String(s) => Value::String(s),
        Y::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Y::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    Y::String(s) => s,
                    Y::Number(n) => n.to_string(),
                    Y::Bool(b) => b.to_string(),
                    other => return Err(format!("unsupported mapping key {other:?}")),
                };
                out.insert(key, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        Y::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

// ---------------------------------------------------------------------------
// Parameterization
// ---------------------------------------------------------------------------

/// An image that must reach the backend before the graph is submitted.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub slot: Slot,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Values actually written into the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSettings {
    pub model: Option<String>,
    pub checkpoint: Option<String>,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg: f64,
    pub sampler_name: String,
    pub scheduler: String,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    pub colorize_method: Option<String>,
}

/// A template instantiated for one request.
#[derive(Debug, Clone)]
pub struct JobGraph {
    pub key: TemplateKey,
    pub graph: Value,
    pub settings: ResolvedSettings,
    pub uploads: Vec<ImageUpload>,
    template: Arc<WorkflowTemplate>,
}

impl JobGraph {
    /// Point `slot` at the name the backend stored an upload under.
    pub fn rename_upload(&mut self, slot: Slot, stored_name: &str) -> Result<(), GenerationError> {
        let refs = self.template.slot(slot).to_vec();
        for r in &refs {
            set_input(&mut self.graph, r, Value::String(stored_name.to_string()))?;
        }
        Ok(())
    }
}

/// Everything outside the request that parameterization consults.
pub struct ParameterContext<'a> {
    pub catalog: &'a ModelCatalog,
    pub defaults: &'a GenerationDefaults,
    /// The requester's stored model preference, if any.
    pub preferred_model: Option<&'a str>,
}

fn set_input(graph: &mut Value, r: &SlotRef, value: Value) -> Result<(), GenerationError> {
    let inputs = graph
        .get_mut(&r.node)
        .and_then(|node| {
            let node = node.as_object_mut()?;
            Some(
                node.entry("inputs")
                    .or_insert_with(|| Value::Object(Default::default())),
            )
        })
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            GenerationError::Template(format!("node '{}' has no inputs object", r.node))
        })?;
    inputs.insert(r.input.clone(), value);
    Ok(())
}

fn write_slot(
    graph: &mut Value,
    template: &WorkflowTemplate,
    slot: Slot,
    value: Value,
) -> Result<(), GenerationError> {
    for r in template.slot(slot) {
        set_input(graph, r, value.clone())?;
    }
    Ok(())
}

/// Instantiate `template` for `request`.
///
/// The shared template is never modified; the returned [`JobGraph`] owns
/// its own copy of the graph.
pub fn parameterize(
    template: &Arc<WorkflowTemplate>,
    key: TemplateKey,
    request: &GenerationRequest,
    ctx: &ParameterContext<'_>,
) -> Result<JobGraph, GenerationError> {
    let missing = template.missing_slots(key);
    if !missing.is_empty() {
        return Err(GenerationError::Template(format!(
            "{} cannot serve {key}: missing slots {}",
            template.name(),
            missing.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
        )));
    }

    let kind = request.kind;
    let options = &request.options;

    if kind.needs_source_image() && request.source_image.is_none() {
        return Err(GenerationError::Parameter(format!("{kind} requires a source image")));
    }
    if kind.needs_mask() && request.mask_image.is_none() {
        return Err(GenerationError::Parameter(format!("{kind} requires a mask image")));
    }

    // Model: explicit option, then stored preference, then catalog default.
    let (model, profile) = if kind.uses_model() {
        let key = match (&options.model, ctx.preferred_model) {
            (Some(explicit), _) => {
                if !ctx.catalog.contains(explicit) {
                    return Err(GenerationError::Parameter(format!(
                        "Unknown model '{explicit}'. Available: {}",
                        ctx.catalog.keys().collect::<Vec<_>>().join(", ")
                    )));
                }
                explicit.clone()
            }
            (None, Some(preferred)) if ctx.catalog.contains(preferred) => preferred.to_string(),
            (None, preferred) => {
                if let Some(stale) = preferred {
                    tracing::debug!(model = stale, "Stored model preference no longer in catalog");
                }
                ctx.catalog.default_model().to_string()
            }
        };
        let profile = ctx.catalog.get(&key).cloned();
        (Some(key), profile)
    } else {
        (None, None)
    };

    let defaults = ctx.defaults;
    let prefix = profile
        .as_ref()
        .and_then(|p| p.prompt_prefix.as_deref())
        .unwrap_or(&defaults.prompt_prefix);
    let positive_prompt = format!("{prefix} {}", request.prompt).trim().to_string();
    let negative_prompt = if options.no_negative {
        String::new()
    } else {
        request
            .negative_prompt
            .clone()
            .or_else(|| profile.as_ref().and_then(|p| p.negative_prompt.clone()))
            .unwrap_or_else(|| defaults.negative_prompt.clone())
    };

    let seed = options
        .seed
        .unwrap_or_else(|| rand::rng().random_range(0..=u64::from(u32::MAX)));

    let settings = ResolvedSettings {
        checkpoint: profile.as_ref().map(|p| p.file.clone()),
        model,
        positive_prompt,
        negative_prompt,
        steps: options.steps.unwrap_or(defaults.steps),
        cfg: options
            .cfg
            .or_else(|| profile.as_ref().and_then(|p| p.cfg))
            .unwrap_or(defaults.cfg),
        sampler_name: options
            .sampler_name
            .clone()
            .or_else(|| profile.as_ref().and_then(|p| p.sampler_name.clone()))
            .unwrap_or_else(|| defaults.sampler_name.clone()),
        scheduler: options
            .scheduler
            .clone()
            .or_else(|| profile.as_ref().and_then(|p| p.scheduler.clone()))
            .unwrap_or_else(|| defaults.scheduler.clone()),
        seed,
        width: options.width.unwrap_or(defaults.width),
        height: options.height.unwrap_or(defaults.height),
        batch_size: match kind {
            CommandKind::Animate => 1,
            _ => options.batch.unwrap_or(defaults.batch_size),
        },
        colorize_method: (key.variant == TemplateVariant::Colorized)
            .then(|| options.colorize_method_or_default().to_string()),
    };

    let mut graph = template.graph().clone();
    let t = template.as_ref();

    if kind.uses_model() {
        if let Some(checkpoint) = &settings.checkpoint {
            write_slot(&mut graph, t, Slot::Model, Value::from(checkpoint.as_str()))?;
        }
        write_slot(&mut graph, t, Slot::Positive, Value::from(settings.positive_prompt.as_str()))?;
        write_slot(&mut graph, t, Slot::Negative, Value::from(settings.negative_prompt.as_str()))?;
        write_slot(&mut graph, t, Slot::Steps, Value::from(settings.steps))?;
        write_slot(&mut graph, t, Slot::Cfg, Value::from(settings.cfg))?;
        write_slot(&mut graph, t, Slot::Seed, Value::from(settings.seed))?;
        write_slot(&mut graph, t, Slot::SamplerName, Value::from(settings.sampler_name.as_str()))?;
        write_slot(&mut graph, t, Slot::Scheduler, Value::from(settings.scheduler.as_str()))?;
    }
    if kind.chooses_size() {
        write_slot(&mut graph, t, Slot::Width, Value::from(settings.width))?;
        write_slot(&mut graph, t, Slot::Height, Value::from(settings.height))?;
        write_slot(&mut graph, t, Slot::BatchSize, Value::from(settings.batch_size))?;
    }
    if let Some(method) = &settings.colorize_method {
        write_slot(&mut graph, t, Slot::ColorizeMethod, Value::from(method.as_str()))?;
    }

    let mut uploads = Vec::new();
    for (slot, bytes, prefix) in [
        (Slot::SourceImage, &request.source_image, "input"),
        (Slot::MaskImage, &request.mask_image, "mask"),
    ] {
        if let (Some(bytes), true) = (bytes, t.has_slot(slot)) {
            let filename = format!("{prefix}_{}.png", uuid::Uuid::new_v4().simple());
            write_slot(&mut graph, t, slot, Value::from(filename.as_str()))?;
            uploads.push(ImageUpload {
                slot,
                filename,
                bytes: bytes.clone(),
            });
        }
    }

    Ok(JobGraph {
        key,
        graph,
        settings,
        uploads,
        template: Arc::clone(template),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
