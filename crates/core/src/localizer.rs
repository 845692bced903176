//! Resolution engine: cascading lookup over a hot-swappable catalog.
//!
//! Lookup order for `key` is `key.<active tag>`, then `key.<default tag>`,
//! then the raw key with `found = false`. A miss is never an error.
//!
//! The catalog lives behind an [`ArcSwapOption`]. Readers load the current
//! snapshot without locking; [`DynamicLocalizer::reload`] calls the loader
//! with no lock held, builds a fresh [`Catalog`] and publishes it with one
//! pointer swap. A lookup that loaded the old snapshot finishes against it.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, composite_key};
use crate::culture::{Culture, CultureFormat, current_request_culture};
use crate::format::{FormatError, format_positional};
use crate::loader::{EmptyLoader, LoadError, ResourceLoader};

pub const DEFAULT_CULTURE_TAG: &str = "zh_CN";

/// Maps a culture to the suffix used in composite keys. Must be pure.
pub type CultureFormatter = Arc<dyn Fn(&Culture) -> String + Send + Sync>;

#[derive(Clone)]
pub struct LocalizerOptions {
    pub loader: Arc<dyn ResourceLoader>,
    pub format_culture: CultureFormatter,
    /// Second-tier fallback, used verbatim as a key suffix.
    pub default_culture: String,
}

impl Default for LocalizerOptions {
    fn default() -> Self {
        Self {
            loader: Arc::new(EmptyLoader),
            format_culture: Arc::new(|c: &Culture| CultureFormat::Full.apply(c)),
            default_culture: DEFAULT_CULTURE_TAG.to_string(),
        }
    }
}

impl fmt::Debug for LocalizerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalizerOptions")
            .field("loader", &self.loader.describe())
            .field("default_culture", &self.default_culture)
            .finish_non_exhaustive()
    }
}

impl LocalizerOptions {
    pub fn with_loader(mut self, loader: impl ResourceLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_culture_format(mut self, format: CultureFormat) -> Self {
        self.format_culture = Arc::new(move |c: &Culture| format.apply(c));
        self
    }

    pub fn with_formatter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Culture) -> String + Send + Sync + 'static,
    {
        self.format_culture = Arc::new(f);
        self
    }

    pub fn with_default_culture(mut self, tag: impl Into<String>) -> Self {
        self.default_culture = tag.into();
        self
    }
}

/// Result of a lookup. `found` is false only when neither the active nor the
/// default culture had an entry; `text` is then the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalizedText {
    pub key: String,
    pub text: String,
    pub found: bool,
}

impl LocalizedText {
    pub fn is_missing(&self) -> bool {
        !self.found
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A lookup whose template could not be formatted; `fallback` carries the raw
/// key as text and the lookup's original `found` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatFailure {
    pub fallback: LocalizedText,
    pub template: String,
    pub error: FormatError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReloadOutcome {
    Loaded {
        generation: u64,
        entries: usize,
        duplicates: usize,
    },
    /// The loader failed; an empty catalog was published.
    Failed { generation: u64, error: String },
    /// A newer reload published first; this result was discarded.
    Superseded {
        generation: u64,
        current_generation: u64,
    },
}

impl ReloadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ReloadOutcome::Loaded { .. })
    }

    pub fn generation(&self) -> u64 {
        match self {
            ReloadOutcome::Loaded { generation, .. }
            | ReloadOutcome::Failed { generation, .. }
            | ReloadOutcome::Superseded { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalizerStatus {
    pub initialized: bool,
    pub generation: u64,
    pub entries: usize,
    pub duplicates: usize,
    pub loaded_at_ms: u64,
    /// Error of the load that produced the live snapshot.
    pub last_error: Option<String>,
    pub default_culture: String,
    pub loader: String,
    pub cultures: Vec<String>,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct DynamicLocalizer {
    catalog: ArcSwapOption<Catalog>,
    first_build: Mutex<()>,
    generation: AtomicU64,
    loader: Arc<dyn ResourceLoader>,
    format_culture: CultureFormatter,
    default_culture: String,
}

impl fmt::Debug for DynamicLocalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLocalizer")
            .field("loader", &self.loader.describe())
            .field("default_culture", &self.default_culture)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for DynamicLocalizer {
    fn default() -> Self {
        Self::new(LocalizerOptions::default())
    }
}

impl DynamicLocalizer {
    pub fn new(options: LocalizerOptions) -> Self {
        Self {
            catalog: ArcSwapOption::empty(),
            first_build: Mutex::new(()),
            generation: AtomicU64::new(0),
            loader: options.loader,
            format_culture: options.format_culture,
            default_culture: options.default_culture,
        }
    }

    pub fn default_culture(&self) -> &str {
        &self.default_culture
    }

    pub fn culture_tag(&self, culture: &Culture) -> String {
        (self.format_culture)(culture)
    }

    pub fn is_initialized(&self) -> bool {
        self.catalog.load().is_some()
    }

    /// Build the first snapshot. On failure an empty catalog is still
    /// published so lookups keep working, and the error is returned.
    pub fn initialize(&self) -> Result<ReloadOutcome, LoadError> {
        let rebuilt = self.rebuild();
        match rebuilt {
            Rebuilt {
                error: Some(e),
                superseded_by: None,
                ..
            } => Err(e),
            other => Ok(other.outcome()),
        }
    }

    /// Replace the catalog with a fresh load. Never fails: a loader error
    /// publishes an empty catalog and is reported in the outcome.
    pub fn reload(&self) -> ReloadOutcome {
        self.rebuild().outcome()
    }

    fn rebuild(&self) -> Rebuilt {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let loaded = match catch_unwind(AssertUnwindSafe(|| self.loader.load())) {
            Ok(r) => r,
            Err(payload) => Err(LoadError::Panicked(panic_message(payload.as_ref()))),
        };
        let (catalog, error) = match loaded {
            Ok(entries) => (Catalog::from_entries(entries), None),
            Err(e) => (Catalog::failed(e.to_string()), Some(e)),
        };
        let catalog = Arc::new(catalog.stamped(generation, now_ms()));

        // A slower, older reload must not overwrite a newer snapshot.
        let mut superseded_by = None;
        self.catalog.rcu(|current| match current {
            Some(cur) if cur.generation() > generation => {
                superseded_by = Some(cur.generation());
                Some(Arc::clone(cur))
            }
            _ => {
                superseded_by = None;
                Some(Arc::clone(&catalog))
            }
        });

        match (&error, superseded_by) {
            (_, Some(current)) => {
                debug!(
                    generation,
                    current_generation = current,
                    "reload finished after a newer snapshot, discarded"
                );
            }
            (None, None) => {
                info!(
                    generation,
                    entries = catalog.len(),
                    duplicates = catalog.duplicates(),
                    "catalog loaded"
                );
            }
            (Some(e), None) => {
                warn!(
                    generation,
                    loader = %self.loader.describe(),
                    "failed to load resources, using empty catalog: {}",
                    e
                );
            }
        }
        Rebuilt {
            catalog,
            error,
            superseded_by,
        }
    }

    /// Current snapshot, building it on first use if `initialize` was skipped.
    pub fn snapshot(&self) -> Arc<Catalog> {
        if let Some(catalog) = self.catalog.load_full() {
            return catalog;
        }
        let _guard = match self.first_build.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        if let Some(catalog) = self.catalog.load_full() {
            return catalog;
        }
        let rebuilt = self.rebuild();
        self.catalog.load_full().unwrap_or(rebuilt.catalog)
    }

    fn resolve(&self, catalog: &Catalog, tag: &str, key: &str) -> LocalizedText {
        if let Some(text) = catalog.get(&composite_key(key, tag)) {
            return LocalizedText {
                key: key.to_string(),
                text: text.to_string(),
                found: true,
            };
        }
        if let Some(text) = catalog.get(&composite_key(key, &self.default_culture)) {
            return LocalizedText {
                key: key.to_string(),
                text: text.to_string(),
                found: true,
            };
        }
        debug!(key, culture = tag, "no translation, falling back to key");
        LocalizedText {
            key: key.to_string(),
            text: key.to_string(),
            found: false,
        }
    }

    fn resolve_tag(&self, tag: &str, key: &str) -> LocalizedText {
        let catalog = self.snapshot();
        self.resolve(&catalog, tag, key)
    }

    fn format_resolved(
        resolved: LocalizedText,
        args: &[&dyn fmt::Display],
    ) -> Result<LocalizedText, FormatFailure> {
        match format_positional(&resolved.text, args) {
            Ok(text) => Ok(LocalizedText { text, ..resolved }),
            Err(error) => Err(FormatFailure {
                fallback: LocalizedText {
                    text: resolved.key.clone(),
                    key: resolved.key,
                    found: resolved.found,
                },
                template: resolved.text,
                error,
            }),
        }
    }

    fn swallow(result: Result<LocalizedText, FormatFailure>) -> LocalizedText {
        result.unwrap_or_else(|failure| {
            debug!(
                key = %failure.fallback.key,
                template = %failure.template,
                "format failed, returning key: {}",
                failure.error
            );
            failure.fallback
        })
    }

    pub fn lookup(&self, culture: &Culture, key: &str) -> LocalizedText {
        self.resolve_tag(&self.culture_tag(culture), key)
    }

    pub fn try_lookup_formatted(
        &self,
        culture: &Culture,
        key: &str,
        args: &[&dyn fmt::Display],
    ) -> Result<LocalizedText, FormatFailure> {
        Self::format_resolved(self.lookup(culture, key), args)
    }

    /// Lookup, then positional substitution. A substitution error yields the
    /// key as text; `found` still reflects the lookup.
    pub fn lookup_formatted(
        &self,
        culture: &Culture,
        key: &str,
        args: &[&dyn fmt::Display],
    ) -> LocalizedText {
        Self::swallow(self.try_lookup_formatted(culture, key, args))
    }

    fn current_tag(&self) -> String {
        match current_request_culture() {
            Some(rc) => self.culture_tag(&rc.culture),
            None => self.default_culture.clone(),
        }
    }

    /// Lookup using the request culture of the current task (see
    /// [`crate::culture::with_request_culture`]), or the default culture when
    /// no scope is active.
    pub fn lookup_current(&self, key: &str) -> LocalizedText {
        self.resolve_tag(&self.current_tag(), key)
    }

    pub fn lookup_current_formatted(&self, key: &str, args: &[&dyn fmt::Display]) -> LocalizedText {
        let resolved = self.resolve_tag(&self.current_tag(), key);
        Self::swallow(Self::format_resolved(resolved, args))
    }

    /// A view bound to one culture.
    pub fn scoped(&self, culture: &Culture) -> ScopedLocalizer<'_> {
        ScopedLocalizer {
            localizer: self,
            tag: self.culture_tag(culture),
        }
    }

    pub fn status(&self) -> LocalizerStatus {
        let current = self.catalog.load_full();
        let (generation, entries, duplicates, loaded_at_ms, cultures, last_error) =
            match current.as_deref() {
                Some(c) => (
                    c.generation(),
                    c.len(),
                    c.duplicates(),
                    c.loaded_at_ms(),
                    c.cultures().into_iter().map(str::to_string).collect(),
                    c.load_error().map(str::to_string),
                ),
                None => (0, 0, 0, 0, Vec::new(), None),
            };
        LocalizerStatus {
            initialized: current.is_some(),
            generation,
            entries,
            duplicates,
            loaded_at_ms,
            last_error,
            default_culture: self.default_culture.clone(),
            loader: self.loader.describe(),
            cultures,
        }
    }
}

/// One finished rebuild: the snapshot it produced and whether it went live.
struct Rebuilt {
    catalog: Arc<Catalog>,
    error: Option<LoadError>,
    superseded_by: Option<u64>,
}

impl Rebuilt {
    fn outcome(self) -> ReloadOutcome {
        if let Some(current_generation) = self.superseded_by {
            return ReloadOutcome::Superseded {
                generation: self.catalog.generation(),
                current_generation,
            };
        }
        match self.error {
            None => loaded_outcome(&self.catalog),
            Some(e) => ReloadOutcome::Failed {
                generation: self.catalog.generation(),
                error: e.to_string(),
            },
        }
    }
}

fn loaded_outcome(catalog: &Catalog) -> ReloadOutcome {
    ReloadOutcome::Loaded {
        generation: catalog.generation(),
        entries: catalog.len(),
        duplicates: catalog.duplicates(),
    }
}

/// [`DynamicLocalizer`] with the culture tag computed once.
///
/// All lookups through one `ScopedLocalizer` read the same snapshot only if
/// no reload happens in between; use [`DynamicLocalizer::snapshot`] when a
/// consistent multi-key read matters.
#[derive(Debug)]
pub struct ScopedLocalizer<'a> {
    localizer: &'a DynamicLocalizer,
    tag: String,
}

impl ScopedLocalizer<'_> {
    pub fn culture_tag(&self) -> &str {
        &self.tag
    }

    pub fn get(&self, key: &str) -> LocalizedText {
        self.localizer.resolve_tag(&self.tag, key)
    }

    pub fn format(&self, key: &str, args: &[&dyn fmt::Display]) -> LocalizedText {
        let resolved = self.localizer.resolve_tag(&self.tag, key);
        DynamicLocalizer::swallow(DynamicLocalizer::format_resolved(resolved, args))
    }
}
