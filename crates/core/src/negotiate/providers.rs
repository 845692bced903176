use std::future::Future;

use axum::http::header::ACCEPT_LANGUAGE;
use futures_util::future::{BoxFuture, FutureExt};

use super::{CultureProvider, ProviderCultureResult, RequestContext};
use crate::culture::Culture;

/// `?culture=fr-FR&ui-culture=en-US`; either key alone is enough.
#[derive(Debug, Clone)]
pub struct QueryStringProvider {
    pub culture_key: String,
    pub ui_culture_key: String,
}

impl Default for QueryStringProvider {
    fn default() -> Self {
        Self {
            culture_key: "culture".to_string(),
            ui_culture_key: "ui-culture".to_string(),
        }
    }
}

impl QueryStringProvider {
    fn result(&self, ctx: &RequestContext) -> Option<ProviderCultureResult> {
        let non_empty = |v: String| if v.trim().is_empty() { None } else { Some(v) };
        let culture = ctx.query_param(&self.culture_key).and_then(non_empty);
        let ui = ctx.query_param(&self.ui_culture_key).and_then(non_empty);
        match (culture, ui) {
            (None, None) => None,
            (Some(c), None) => Some(ProviderCultureResult::new(c)),
            (None, Some(u)) => Some(ProviderCultureResult::with_ui(u.clone(), u)),
            (Some(c), Some(u)) => Some(ProviderCultureResult::with_ui(c, u)),
        }
    }
}

impl CultureProvider for QueryStringProvider {
    fn name(&self) -> &str {
        "query"
    }

    fn determine<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Option<ProviderCultureResult>> {
        std::future::ready(self.result(ctx)).boxed()
    }
}

pub const DEFAULT_CULTURE_COOKIE: &str = ".Localizer.Culture";

/// Cookie holding `c=<culture>|uic=<ui-culture>`.
#[derive(Debug, Clone)]
pub struct CookieProvider {
    pub cookie_name: String,
}

impl Default for CookieProvider {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_CULTURE_COOKIE.to_string(),
        }
    }
}

impl CookieProvider {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    /// Render the cookie value for a culture pair.
    pub fn make_value(culture: &Culture, ui_culture: &Culture) -> String {
        format!("c={culture}|uic={ui_culture}")
    }

    pub fn parse_value(value: &str) -> Option<ProviderCultureResult> {
        let mut culture = None;
        let mut ui = None;
        for part in value.split('|') {
            match part.trim().split_once('=') {
                Some(("c", v)) if !v.trim().is_empty() => culture = Some(v.trim().to_string()),
                Some(("uic", v)) if !v.trim().is_empty() => ui = Some(v.trim().to_string()),
                _ => {}
            }
        }
        match (culture, ui) {
            (None, None) => None,
            (Some(c), None) => Some(ProviderCultureResult::new(c)),
            (None, Some(u)) => Some(ProviderCultureResult::with_ui(u.clone(), u)),
            (Some(c), Some(u)) => Some(ProviderCultureResult::with_ui(c, u)),
        }
    }
}

impl CultureProvider for CookieProvider {
    fn name(&self) -> &str {
        "cookie"
    }

    fn determine<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Option<ProviderCultureResult>> {
        let result = ctx
            .cookie(&self.cookie_name)
            .and_then(|v| Self::parse_value(&v));
        std::future::ready(result).boxed()
    }
}

/// `Accept-Language`, highest weight first.
#[derive(Debug, Clone)]
pub struct AcceptLanguageProvider {
    /// How many header values are considered.
    pub max_values: usize,
}

impl Default for AcceptLanguageProvider {
    fn default() -> Self {
        Self { max_values: 3 }
    }
}

/// Tags from an `Accept-Language` value ordered by `q` (stable for ties).
/// `*`, `q=0` and entries with an unreadable weight are dropped.
pub fn parse_accept_language(value: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f32)> = Vec::new();
    for part in value.split(',') {
        let mut pieces = part.split(';');
        let tag = pieces.next().unwrap_or("").trim();
        if tag.is_empty() || tag == "*" {
            continue;
        }
        let mut q = Some(1.0_f32);
        for param in pieces {
            if let Some((k, v)) = param.trim().split_once('=')
                && k.trim().eq_ignore_ascii_case("q")
            {
                q = v.trim().parse::<f32>().ok().filter(|q| (0.0..=1.0).contains(q));
            }
        }
        let Some(q) = q else {
            continue;
        };
        if q <= 0.0 {
            continue;
        }
        weighted.push((tag.to_string(), q));
    }
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
    weighted.into_iter().map(|(tag, _)| tag).collect()
}

impl AcceptLanguageProvider {
    fn result(&self, ctx: &RequestContext) -> Option<ProviderCultureResult> {
        let header = ctx.headers().get(ACCEPT_LANGUAGE)?.to_str().ok()?;
        let tags: Vec<String> = parse_accept_language(header)
            .into_iter()
            .take(self.max_values.max(1))
            .filter(|t| Culture::parse(t).is_ok())
            .collect();
        if tags.is_empty() {
            return None;
        }
        Some(ProviderCultureResult {
            cultures: tags.clone(),
            ui_cultures: tags,
        })
    }
}

impl CultureProvider for AcceptLanguageProvider {
    fn name(&self) -> &str {
        "accept-language"
    }

    fn determine<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Option<ProviderCultureResult>> {
        std::future::ready(self.result(ctx)).boxed()
    }
}

/// A provider backed by a closure; the closure gets its own copy of the context.
pub struct FnProvider<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnProvider<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Option<ProviderCultureResult>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F, Fut> CultureProvider for FnProvider<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Option<ProviderCultureResult>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn determine<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Option<ProviderCultureResult>> {
        (self.f)(ctx.clone()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, Uri, header::COOKIE};
    use pretty_assertions::assert_eq;

    fn ctx(uri: &str, headers: &[(axum::http::HeaderName, &str)]) -> RequestContext {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.append(k.clone(), HeaderValue::from_str(v).expect("header value"));
        }
        RequestContext::new(map, uri.parse::<Uri>().expect("uri"))
    }

    #[test]
    fn accept_language_orders_by_weight() {
        assert_eq!(
            parse_accept_language("fr-CH, fr;q=0.9, en;q=0.8, de;q=0.7, *;q=0.5"),
            vec!["fr-CH", "fr", "en", "de"]
        );
        assert_eq!(
            parse_accept_language("en;q=0.5, ja-JP, zh;q=0.5, ko;q=0"),
            vec!["ja-JP", "en", "zh"]
        );
        assert_eq!(parse_accept_language("de;q=abc, it;q=1.5, es"), vec!["es"]);
        assert!(parse_accept_language("").is_empty());
    }

    #[tokio::test]
    async fn accept_language_provider_limits_and_filters() {
        let provider = AcceptLanguageProvider { max_values: 2 };
        let c = ctx("/", &[(ACCEPT_LANGUAGE, "x-bogus-tag-123, en-GB;q=0.9, fr;q=0.8")]);
        let result = provider.determine(&c).await.expect("result");
        assert_eq!(result.cultures, vec!["en-GB".to_string()]);

        let none = provider.determine(&ctx("/", &[])).await;
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn query_provider_mirrors_single_key() {
        let provider = QueryStringProvider::default();
        let only_ui = provider
            .determine(&ctx("/?ui-culture=ja-JP", &[]))
            .await
            .expect("result");
        assert_eq!(only_ui, ProviderCultureResult::with_ui("ja-JP", "ja-JP"));

        let both = provider
            .determine(&ctx("/?culture=en-US&ui-culture=fr-FR", &[]))
            .await
            .expect("result");
        assert_eq!(both, ProviderCultureResult::with_ui("en-US", "fr-FR"));

        assert_eq!(provider.determine(&ctx("/?culture=", &[])).await, None);
        assert_eq!(provider.determine(&ctx("/", &[])).await, None);
    }

    #[tokio::test]
    async fn cookie_provider_reads_pair() {
        let provider = CookieProvider::default();
        let value = CookieProvider::make_value(
            &Culture::parse("de-DE").expect("culture"),
            &Culture::parse("en-US").expect("culture"),
        );
        assert_eq!(value, "c=de-DE|uic=en-US");

        let header = format!("{DEFAULT_CULTURE_COOKIE}={value}");
        let result = provider
            .determine(&ctx("/", &[(COOKIE, header.as_str())]))
            .await
            .expect("result");
        assert_eq!(result, ProviderCultureResult::with_ui("de-DE", "en-US"));

        assert_eq!(
            CookieProvider::parse_value("c=it-IT"),
            Some(ProviderCultureResult::new("it-IT"))
        );
        let encoded = format!("{DEFAULT_CULTURE_COOKIE}=c%3Den-US%7Cuic%3Dfr-FR");
        let result = provider
            .determine(&ctx("/", &[(COOKIE, encoded.as_str())]))
            .await
            .expect("encoded result");
        assert_eq!(result, ProviderCultureResult::with_ui("en-US", "fr-FR"));

        assert_eq!(CookieProvider::parse_value("garbage"), None);
        assert_eq!(CookieProvider::parse_value("c=|uic="), None);
    }
}
