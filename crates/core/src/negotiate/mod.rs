//! Request culture negotiation.
//!
//! Providers are asked one at a time, in order. The first one that returns a
//! usable culture wins and the rest are never called. A provider that
//! declines, times out, or proposes a malformed tag is skipped. When nobody
//! wins, the configured default applies.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::http::{HeaderMap, Request, Uri, header::COOKIE};
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::culture::{Culture, CultureError, RequestCulture};

pub mod middleware;
pub mod providers;

pub use middleware::localize_request;
pub use providers::{AcceptLanguageProvider, CookieProvider, FnProvider, QueryStringProvider};

/// What a provider can see of the inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    headers: HeaderMap,
    uri: Uri,
}

impl RequestContext {
    pub fn new(headers: HeaderMap, uri: Uri) -> Self {
        Self { headers, uri }
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            headers: req.headers().clone(),
            uri: req.uri().clone(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&self.uri).ok()?;
        params.get(name).cloned()
    }

    /// Cookie value, percent-decoded. Values that do not decode to UTF-8 are
    /// returned as sent.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let raw = self
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| k.trim() == name)
            .map(|(_, v)| v.trim().trim_matches('"'))?;
        Some(match urlencoding::decode(raw) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => raw.to_string(),
        })
    }
}

/// Raw tags proposed by a provider. Only the first entry of each list is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderCultureResult {
    pub cultures: Vec<String>,
    pub ui_cultures: Vec<String>,
}

impl ProviderCultureResult {
    pub fn new(culture: impl Into<String>) -> Self {
        Self {
            cultures: vec![culture.into()],
            ui_cultures: Vec::new(),
        }
    }

    pub fn with_ui(culture: impl Into<String>, ui_culture: impl Into<String>) -> Self {
        Self {
            cultures: vec![culture.into()],
            ui_cultures: vec![ui_culture.into()],
        }
    }

    /// Parse into a [`RequestCulture`]. `Ok(None)` means the result carried
    /// no culture at all. An empty UI list mirrors the content culture.
    pub fn to_request_culture(&self) -> Result<Option<RequestCulture>, CultureError> {
        let Some(first) = self.cultures.first() else {
            return Ok(None);
        };
        let culture = Culture::parse(first)?;
        let ui_culture = match self.ui_cultures.first() {
            Some(ui) => Culture::parse(ui)?,
            None => culture.clone(),
        };
        Ok(Some(RequestCulture::new(culture, ui_culture)))
    }
}

pub trait CultureProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `None` declines.
    fn determine<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Option<ProviderCultureResult>>;
}

/// Outcome of negotiation, attached to the request for downstream handlers.
#[derive(Clone)]
pub struct RequestCultureFeature {
    pub request_culture: RequestCulture,
    pub winning_provider: Option<Arc<dyn CultureProvider>>,
}

impl RequestCultureFeature {
    pub fn provider_name(&self) -> Option<&str> {
        self.winning_provider.as_deref().map(|p| p.name())
    }
}

impl fmt::Debug for RequestCultureFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCultureFeature")
            .field("request_culture", &self.request_culture)
            .field("winning_provider", &self.provider_name())
            .finish()
    }
}

const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 2_000;

/// Per-provider budget; `LOCALIZER_PROVIDER_TIMEOUT_MS` overrides the default.
pub fn default_provider_timeout() -> Duration {
    let ms = std::env::var("LOCALIZER_PROVIDER_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_MS);
    clamp_provider_timeout(Duration::from_millis(ms))
}

pub(crate) fn clamp_provider_timeout(d: Duration) -> Duration {
    d.clamp(Duration::from_millis(10), Duration::from_secs(30))
}

pub struct CultureNegotiator {
    providers: Vec<Arc<dyn CultureProvider>>,
    default: RequestCulture,
    provider_timeout: Duration,
}

impl fmt::Debug for CultureNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CultureNegotiator")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("default", &self.default)
            .field("provider_timeout", &self.provider_timeout)
            .finish()
    }
}

impl CultureNegotiator {
    pub fn new(default: RequestCulture) -> Self {
        Self {
            providers: Vec::new(),
            default,
            provider_timeout: default_provider_timeout(),
        }
    }

    pub fn with_provider(mut self, provider: impl CultureProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = clamp_provider_timeout(timeout);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn CultureProvider>] {
        &self.providers
    }

    pub fn default_culture(&self) -> &RequestCulture {
        &self.default
    }

    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    pub async fn negotiate(&self, ctx: &RequestContext) -> RequestCultureFeature {
        for provider in &self.providers {
            let result =
                match tokio::time::timeout(self.provider_timeout, provider.determine(ctx)).await {
                    Ok(Some(r)) => r,
                    Ok(None) => continue,
                    Err(_) => {
                        warn!(
                            provider = provider.name(),
                            timeout_ms = self.provider_timeout.as_millis() as u64,
                            "culture provider timed out, skipping"
                        );
                        continue;
                    }
                };

            match result.to_request_culture() {
                Ok(Some(request_culture)) => {
                    debug!(
                        provider = provider.name(),
                        culture = %request_culture.culture,
                        ui_culture = %request_culture.ui_culture,
                        "request culture negotiated"
                    );
                    return RequestCultureFeature {
                        request_culture,
                        winning_provider: Some(Arc::clone(provider)),
                    };
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        provider = provider.name(),
                        "culture provider returned an unusable culture, skipping: {}",
                        err
                    );
                    continue;
                }
            }
        }

        RequestCultureFeature {
            request_culture: self.default.clone(),
            winning_provider: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn c(tag: &str) -> Culture {
        Culture::parse(tag).expect("valid tag")
    }

    fn default_negotiator() -> CultureNegotiator {
        CultureNegotiator::new(RequestCulture::uniform(c("zh-CN")))
            .with_provider_timeout(Duration::from_millis(200))
    }

    fn counting(
        name: &str,
        answer: Option<ProviderCultureResult>,
    ) -> (impl CultureProvider + 'static, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let provider = FnProvider::new(name, move |_ctx| {
            h.fetch_add(1, Ordering::SeqCst);
            let answer = answer.clone();
            async move { answer }
        });
        (provider, hits)
    }

    #[tokio::test]
    async fn first_accepting_provider_wins_and_later_ones_are_skipped() {
        let (p1, h1) = counting("p1", None);
        let (p2, h2) = counting("p2", Some(ProviderCultureResult::new("fr-FR")));
        let (p3, h3) = counting("p3", Some(ProviderCultureResult::new("de-DE")));
        let negotiator = default_negotiator()
            .with_provider(p1)
            .with_provider(p2)
            .with_provider(p3);

        let feature = negotiator.negotiate(&RequestContext::default()).await;
        assert_eq!(feature.request_culture, RequestCulture::uniform(c("fr-FR")));
        assert_eq!(feature.provider_name(), Some("p2"));
        assert_eq!(h1.load(Ordering::SeqCst), 1);
        assert_eq!(h2.load(Ordering::SeqCst), 1);
        assert_eq!(h3.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_providers_or_all_declining_uses_default() {
        let feature = default_negotiator().negotiate(&RequestContext::default()).await;
        assert_eq!(feature.request_culture, RequestCulture::uniform(c("zh-CN")));
        assert!(feature.winning_provider.is_none());

        let (p1, _) = counting("p1", None);
        let (p2, _) = counting("p2", Some(ProviderCultureResult::default()));
        let feature = default_negotiator()
            .with_provider(p1)
            .with_provider(p2)
            .negotiate(&RequestContext::default())
            .await;
        assert_eq!(feature.provider_name(), None);
        assert_eq!(feature.request_culture.culture, c("zh-CN"));
    }

    #[tokio::test]
    async fn malformed_tags_decline_instead_of_failing() {
        let (bad, bad_hits) = counting("bad", Some(ProviderCultureResult::new("not a culture")));
        let (bad_ui, _) = counting("bad-ui", Some(ProviderCultureResult::with_ui("en-US", "??")));
        let (good, _) = counting("good", Some(ProviderCultureResult::with_ui("en-US", "ja-JP")));
        let feature = default_negotiator()
            .with_provider(bad)
            .with_provider(bad_ui)
            .with_provider(good)
            .negotiate(&RequestContext::default())
            .await;
        assert_eq!(bad_hits.load(Ordering::SeqCst), 1);
        assert_eq!(feature.provider_name(), Some("good"));
        assert_eq!(
            feature.request_culture,
            RequestCulture::new(c("en-US"), c("ja-JP"))
        );
    }

    #[tokio::test]
    async fn slow_provider_times_out_as_decline() {
        let slow = FnProvider::new("slow", |_ctx| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Some(ProviderCultureResult::new("de-DE"))
        });
        let (fast, _) = counting("fast", Some(ProviderCultureResult::new("it-IT")));
        let negotiator = CultureNegotiator::new(RequestCulture::uniform(c("zh-CN")))
            .with_provider_timeout(Duration::from_millis(20))
            .with_provider(slow)
            .with_provider(fast);
        let feature = negotiator.negotiate(&RequestContext::default()).await;
        assert_eq!(feature.provider_name(), Some("fast"));
        assert_eq!(feature.request_culture.culture, c("it-IT"));
    }

    #[test]
    fn provider_timeout_is_clamped() {
        let n = CultureNegotiator::new(RequestCulture::uniform(c("en")))
            .with_provider_timeout(Duration::from_millis(1));
        assert_eq!(n.provider_timeout(), Duration::from_millis(10));
        let n = n.with_provider_timeout(Duration::from_secs(600));
        assert_eq!(n.provider_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn request_context_reads_query_and_cookies() {
        let req = Request::builder()
            .uri("/v1/text/greet?culture=fr-FR&ui-culture=en%2DUS")
            .header(COOKIE, "a=1; .Localizer.Culture=c=de-DE|uic=de-AT")
            .header(COOKIE, "b=\"quoted\"; bad=%FF%FE")
            .body(())
            .expect("request");
        let ctx = RequestContext::from_request(&req);
        assert_eq!(ctx.query_param("culture").as_deref(), Some("fr-FR"));
        assert_eq!(ctx.query_param("ui-culture").as_deref(), Some("en-US"));
        assert_eq!(ctx.query_param("missing"), None);
        assert_eq!(
            ctx.cookie(".Localizer.Culture").as_deref(),
            Some("c=de-DE|uic=de-AT")
        );
        assert_eq!(ctx.cookie("b").as_deref(), Some("quoted"));
        assert_eq!(ctx.cookie("bad").as_deref(), Some("%FF%FE"));
        assert_eq!(ctx.cookie("nope"), None);
    }

    #[test]
    fn result_without_ui_mirrors_culture() {
        let rc = ProviderCultureResult::new("pt_br")
            .to_request_culture()
            .expect("parse")
            .expect("culture");
        assert_eq!(rc, RequestCulture::uniform(c("pt-BR")));
        assert_eq!(ProviderCultureResult::default().to_request_culture(), Ok(None));
    }
}
