use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::{CultureNegotiator, RequestContext};
use crate::culture::with_request_culture;

/// Negotiate the request culture, attach the resulting
/// [`super::RequestCultureFeature`] as a request extension and run the rest of
/// the request inside a task-local culture scope.
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(axum::middleware::from_fn_with_state(negotiator, localize_request));
/// ```
pub async fn localize_request(
    State(negotiator): State<Arc<CultureNegotiator>>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&req);
    let feature = negotiator.negotiate(&ctx).await;
    let culture = feature.request_culture.clone();
    req.extensions_mut().insert(feature);
    with_request_culture(culture, next.run(req)).await
}
