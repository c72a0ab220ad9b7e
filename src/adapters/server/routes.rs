//! warp filters of the local signing API.

use super::protocol::{
    decode_pdf, error_codes, ErrorResponse, HealthResponse, SignPdfRequest,
    SignPdfResponse, SignXmlRequest, SignXmlResponse, SubjectQuery, SubjectResponse,
    TrustSetupRequest, ValidatePdfRequest,
};
use crate::domain::types::{SignatureRequest, TokenPin};
use crate::infra::error::{ErrorKind, SigningError, SigningResult};
use crate::pipelines::SigningOrchestrator;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Documents above this size are refused before parsing.
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

type Shared = Arc<SigningOrchestrator>;

/// All API routes, with CORS for `allowed_origins` (any origin when empty).
pub fn routes(
    orchestrator: Shared,
    allowed_origins: &[String],
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let mut cors = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"]);
    cors = if allowed_origins.is_empty() {
        cors.allow_any_origin()
    } else {
        cors.allow_origins(
            allowed_origins
                .iter()
                .map(String::as_str)
                .filter(|origin| is_valid_origin(origin)),
        )
    };

    health_route()
        .or(devices_route(orchestrator.clone()))
        .or(subject_route(orchestrator.clone()))
        .or(sign_xml_route(orchestrator.clone()))
        .or(sign_pdf_route(orchestrator.clone()))
        .or(trust_setup_route(orchestrator.clone()))
        .or(validate_pdf_route(orchestrator))
        .recover(handle_rejection)
        .with(cors)
        .with(warp::log("esign_agent::server"))
}

/// `scheme://host[:port]` without path, as CORS origins must be.
#[must_use]
pub fn is_valid_origin(origin: &str) -> bool {
    let rest = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"));
    rest.is_some_and(|host| !host.is_empty() && !host.contains('/'))
}

fn with_orchestrator(orchestrator: Shared) -> impl Filter<Extract = (Shared,), Error = Infallible> + Clone {
    warp::any().map(move || orchestrator.clone())
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn health_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&HealthResponse {
            status: "esign-agent running".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    })
}

fn devices_route(orchestrator: Shared) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("devices")
        .and(warp::get())
        .and(with_orchestrator(orchestrator))
        .and_then(|orchestrator: Shared| async move {
            Ok::<_, Infallible>(respond(orchestrator.list_devices().await))
        })
}

fn subject_route(orchestrator: Shared) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("get-subject")
        .and(warp::get())
        .and(warp::query::<SubjectQuery>())
        .and(with_orchestrator(orchestrator))
        .and_then(|query: SubjectQuery, orchestrator: Shared| async move {
            let slot = query.slot_index.unwrap_or(0);
            let result = orchestrator
                .get_subject(slot)
                .await
                .map(|subject| SubjectResponse { subject });
            Ok::<_, Infallible>(respond(result))
        })
}

fn sign_xml_route(orchestrator: Shared) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("sign-xml")
        .and(warp::post())
        .and(json_body::<SignXmlRequest>())
        .and(with_orchestrator(orchestrator))
        .and_then(handle_sign_xml)
}

fn sign_pdf_route(orchestrator: Shared) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("sign-pdf")
        .and(warp::post())
        .and(json_body::<SignPdfRequest>())
        .and(with_orchestrator(orchestrator))
        .and_then(handle_sign_pdf)
}

fn trust_setup_route(orchestrator: Shared) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("trust-setup")
        .and(warp::post())
        .and(json_body::<TrustSetupRequest>())
        .and(with_orchestrator(orchestrator))
        .and_then(|request: TrustSetupRequest, orchestrator: Shared| async move {
            let result = match required_slot(request.slot_index) {
                Ok(slot) => Ok(orchestrator.trust_setup(slot, request.apply_changes).await),
                Err(e) => Err(e),
            };
            Ok::<_, Infallible>(respond(result))
        })
}

fn validate_pdf_route(orchestrator: Shared) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("validate-pdf")
        .and(warp::post())
        .and(json_body::<ValidatePdfRequest>())
        .and(with_orchestrator(orchestrator))
        .and_then(|request: ValidatePdfRequest, orchestrator: Shared| async move {
            let result = decode_pdf(&request.pdf_base64).map(|pdf| orchestrator.validate_pdf(&pdf));
            Ok::<_, Infallible>(respond(result))
        })
}

fn required_slot(slot: Option<usize>) -> SigningResult<usize> {
    slot.ok_or_else(|| SigningError::InvalidInput("no signature card selected (slotIndex)".into()))
}

async fn handle_sign_xml(request: SignXmlRequest, orchestrator: Shared) -> Result<impl Reply, Infallible> {
    Ok(respond(sign_xml(request, &orchestrator).await))
}

async fn sign_xml(request: SignXmlRequest, orchestrator: &SigningOrchestrator) -> SigningResult<SignXmlResponse> {
    let outcome = if request.use_raw_xml {
        orchestrator.store_raw_xml(request.xml_content.as_bytes())?
    } else {
        let slot = required_slot(request.slot_index)?;
        let pin = TokenPin::new(&request.pin)?;
        let signature = SignatureRequest::new(request.xml_content.into_bytes(), pin, slot)
            .with_force_fresh_login(request.force_fresh_login);
        orchestrator.sign_xml(&signature, false).await?
    };
    Ok(SignXmlResponse {
        signed_file_content: outcome.content.clone(),
        signed_xml: outcome.content,
        file_path: outcome.artifact.output_path.display().to_string(),
        status: "Signature created".to_string(),
    })
}

async fn handle_sign_pdf(request: SignPdfRequest, orchestrator: Shared) -> Result<impl Reply, Infallible> {
    Ok(respond(sign_pdf(request, &orchestrator).await))
}

async fn sign_pdf(request: SignPdfRequest, orchestrator: &SigningOrchestrator) -> SigningResult<SignPdfResponse> {
    let pdf = decode_pdf(&request.pdf_base64)?;
    let pin = TokenPin::new(&request.pin)?;
    let slot = required_slot(request.slot_index)?;
    let options = request.effective_options();
    let signature =
        SignatureRequest::new(pdf, pin, slot).with_force_fresh_login(request.force_fresh_login);
    let artifact = orchestrator.sign_pdf(&signature, &options).await?;
    Ok(SignPdfResponse::from_artifact(&artifact))
}

fn status_for(error: &SigningError) -> StatusCode {
    match error.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::PinIncorrect | ErrorKind::PinLocked => StatusCode::FORBIDDEN,
        ErrorKind::SessionInvalid | ErrorKind::HardwareUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: SigningResult<T>) -> warp::reply::WithStatus<warp::reply::Json> {
    match result {
        Ok(body) => warp::reply::with_status(warp::reply::json(&body), StatusCode::OK),
        Err(error) => {
            log::warn!("Request failed: {error}");
            warp::reply::with_status(
                warp::reply::json(&ErrorResponse::from(&error)),
                status_for(&error),
            )
        }
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("malformed request: {e}"))
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "document too large".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        (StatusCode::BAD_REQUEST, format!("{rejection:?}"))
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorResponse::new(error_codes::INVALID_INPUT, message)),
        status,
    ))
}
