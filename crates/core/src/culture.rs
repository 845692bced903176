use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CultureError {
    #[error("culture tag is empty")]
    Empty,
    #[error("malformed culture tag '{0}'")]
    Malformed(String),
}

/// A validated culture descriptor: language, optional script, optional region.
///
/// Tags are accepted with either `-` or `_` as separator and are normalized on
/// parse (`zh_hans_cn` becomes `zh-Hans-CN`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Culture {
    language: String,
    script: Option<String>,
    region: Option<String>,
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z]{2,3})(?:[-_]([A-Za-z]{4}))?(?:[-_]([A-Za-z]{2}|[0-9]{3}))?$")
            .unwrap_or_else(|e| panic!("invalid culture tag pattern: {e}"))
    })
}

impl Culture {
    pub fn parse(tag: &str) -> Result<Self, CultureError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(CultureError::Empty);
        }
        let caps = tag_pattern()
            .captures(tag)
            .ok_or_else(|| CultureError::Malformed(tag.to_string()))?;

        let language = caps[1].to_ascii_lowercase();
        let script = caps.get(2).map(|m| {
            let s = m.as_str();
            let mut out = s[..1].to_ascii_uppercase();
            out.push_str(&s[1..].to_ascii_lowercase());
            out
        });
        let region = caps.get(3).map(|m| m.as_str().to_ascii_uppercase());
        Ok(Self {
            language,
            script,
            region,
        })
    }

    /// Parse a POSIX locale string such as `zh_CN.UTF-8` or `de_DE@euro`.
    ///
    /// `C` and `POSIX` carry no language and are rejected.
    pub fn from_posix_locale(value: &str) -> Result<Self, CultureError> {
        let base = value
            .split(['.', '@'])
            .next()
            .unwrap_or(value)
            .trim();
        if base.eq_ignore_ascii_case("c") || base.eq_ignore_ascii_case("posix") {
            return Err(CultureError::Malformed(value.to_string()));
        }
        Self::parse(base)
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Canonical tag joined with `sep`.
    pub fn tag_with(&self, sep: char) -> String {
        let mut out = self.language.clone();
        for part in [self.script.as_deref(), self.region.as_deref()]
            .into_iter()
            .flatten()
        {
            out.push(sep);
            out.push_str(part);
        }
        out
    }
}

impl fmt::Display for Culture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag_with('-'))
    }
}

impl FromStr for Culture {
    type Err = CultureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Culture {
    type Error = CultureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Culture> for String {
    fn from(value: Culture) -> Self {
        value.to_string()
    }
}

/// How a culture is turned into the suffix of a composite catalog key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CultureFormat {
    /// `en-US`
    #[default]
    Full,
    /// `en_US`
    Underscore,
    /// `en`
    Language,
}

impl CultureFormat {
    pub fn apply(self, culture: &Culture) -> String {
        match self {
            CultureFormat::Full => culture.to_string(),
            CultureFormat::Underscore => culture.tag_with('_'),
            CultureFormat::Language => culture.language().to_string(),
        }
    }
}

/// Content culture plus UI culture for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCulture {
    pub culture: Culture,
    pub ui_culture: Culture,
}

impl RequestCulture {
    pub fn new(culture: Culture, ui_culture: Culture) -> Self {
        Self {
            culture,
            ui_culture,
        }
    }

    pub fn uniform(culture: Culture) -> Self {
        Self {
            ui_culture: culture.clone(),
            culture,
        }
    }
}

tokio::task_local! {
    static REQUEST_CULTURE: RequestCulture;
}

/// Run `fut` with `culture` as the request culture of the current task.
pub async fn with_request_culture<F: Future>(culture: RequestCulture, fut: F) -> F::Output {
    REQUEST_CULTURE.scope(culture, fut).await
}

/// Synchronous counterpart of [`with_request_culture`].
pub fn with_request_culture_sync<R>(culture: RequestCulture, f: impl FnOnce() -> R) -> R {
    REQUEST_CULTURE.sync_scope(culture, f)
}

/// The request culture of the current task, if a scope is active.
pub fn current_request_culture() -> Option<RequestCulture> {
    REQUEST_CULTURE.try_with(Clone::clone).ok()
}
