//! DHCP lease webhook server.
//!
//! RouterOS lease scripts call `GET /isp/mac_onboarding?token=..&mac=..`
//! on every bind and release. Answers are plain text; the status code is
//! what the script checks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use edgeprov_config::mac_onboarding_settings;
use edgeprov_core::{LeaseEvent, MacOnboarding, MemoryBackOffice};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::config::Context;
use crate::error::CliError;

pub const WEBHOOK_PATH: &str = "/isp/mac_onboarding";
pub const TOKEN_HEADER: &str = "X-ISP-TOKEN";

/// Routes of the webhook server.
pub fn router(service: Arc<MacOnboarding>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, get(lease_event).post(lease_event))
        .route("/health", get(|| async { "ok" }))
        .with_state(service)
}

async fn lease_event(
    State(service): State<Arc<MacOnboarding>>,
    headers: HeaderMap,
    Query(event): Query<LeaseEvent>,
) -> (StatusCode, String) {
    let header_token = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
    match service.handle(&event, header_token) {
        Ok(outcome) => {
            info!(
                mac = %outcome.profile.mac_address,
                state = ?outcome.profile.state,
                created = outcome.created,
                "lease event accepted"
            );
            (StatusCode::OK, "ok".into())
        }
        Err(err) => {
            let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                warn!(error = %err, "lease event failed");
            }
            (status, err.to_string())
        }
    }
}

pub async fn handle(args: ServeArgs, ctx: &Context) -> Result<(), CliError> {
    let settings = mac_onboarding_settings(&ctx.config);
    if settings.token.is_none() {
        warn!("webhook token not configured; every lease event will be refused");
    }

    let dispatcher = Arc::new(ctx.dispatcher()?);
    let mut back_office = MemoryBackOffice::new();
    let sectors = dispatcher
        .devices()
        .iter()
        .filter_map(|(_, entry)| entry.sector.clone())
        .chain(args.sectors);
    for code in sectors {
        back_office = back_office.with_sector(code);
    }

    let mut service = MacOnboarding::new(settings, Arc::new(back_office));
    if ctx.config.webhook.auto_provision_captive {
        service = service.with_dispatcher(dispatcher);
    }

    let bind = args.bind.unwrap_or_else(|| ctx.config.webhook.bind.clone());
    let addr: SocketAddr = bind.parse().map_err(|_| CliError::Validation {
        field: "bind".into(),
        reason: format!("expected host:port, got '{bind}'"),
    })?;

    let app = router(Arc::new(service)).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, path = WEBHOOK_PATH, "webhook listening");
    if !ctx.quiet {
        eprintln!("Listening on http://{addr}{WEBHOOK_PATH}");
    }
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use edgeprov_core::MacOnboardingSettings;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;

    fn app(token: Option<&str>) -> (Router, Arc<MemoryBackOffice>) {
        let back_office = Arc::new(MemoryBackOffice::new().with_sector("NORTE"));
        let settings = MacOnboardingSettings {
            token: token.map(|t| SecretString::from(t.to_owned())),
            ..MacOnboardingSettings::default()
        };
        let service = MacOnboarding::new(settings, back_office.clone());
        (router(Arc::new(service)), back_office)
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn bound_lease_upserts_profile() {
        let (app, back_office) = app(Some("s3cret"));
        let (status, body) = call(
            app,
            get("/isp/mac_onboarding?token=s3cret&leaseActMAC=aa-bb-cc-dd-ee-ff&leaseActIP=10.1.0.9&leaseBound=1&sector=NORTE"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        let profiles = back_office.profiles();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].mac_address.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn header_token_is_accepted() {
        let (app, _) = app(Some("s3cret"));
        let request = Request::builder()
            .uri("/isp/mac_onboarding?mac=AA:BB:CC:DD:EE:01")
            .header(TOKEN_HEADER, "s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_token_is_unauthorized() {
        let (app, back_office) = app(Some("s3cret"));
        let (status, _) = call(app, get("/isp/mac_onboarding?token=nope&mac=AA:BB:CC:DD:EE:01")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(back_office.profiles().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_token_is_forbidden() {
        let (app, _) = app(None);
        let (status, _) = call(app, get("/isp/mac_onboarding?token=x&mac=AA:BB:CC:DD:EE:01")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_mac_is_a_bad_request() {
        let (app, _) = app(Some("s3cret"));
        let (status, body) = call(app, get("/isp/mac_onboarding?token=s3cret")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "mac required");
    }
}
