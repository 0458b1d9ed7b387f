//! Streaming completion handler.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Response,
    Json,
};
use persona_rag::augment_prompt;

use crate::{
    cancel::CancelController,
    encoder::{self, EncoderConfig},
    error::ServerError,
    models::CompletionRequest,
    session::GenerationSession,
    state::AppState,
};

/// Handle `POST /completion/{persona}`.
///
/// Everything that can be rejected is checked here, before the session goes
/// near the gate: unknown persona (404), malformed body or parameters (400).
/// After that the response is always a 200 event stream.
pub async fn handle_completion(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let persona = state
        .registry
        .resolve(&name)
        .ok_or_else(|| ServerError::UnknownPersona(name.clone()))?;
    let Json(body) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let request = body.into_request(persona.id())?;
    let params = request.sampling_params(&state.config.generation)?;
    if state.shutdown.is_cancelled() {
        return Err(ServerError::ShuttingDown);
    }

    let context = state.context.context_for(persona.id(), &request.prompt);
    let prompt = augment_prompt(&request.prompt, context.as_deref());
    let session = GenerationSession::new(
        persona,
        prompt,
        params,
        state.config.stream.strip_reasoning,
    );
    tracing::info!(
        parent: session.span(),
        context = context.is_some(),
        max_output_tokens = session.params().max_output_tokens,
        "completion accepted"
    );

    let cancel = CancelController::new(&state.shutdown, session.id());
    let stream = encoder::event_stream(
        state.gate.clone(),
        session,
        cancel,
        EncoderConfig::from(&state.config.stream),
    );
    Ok(encoder::sse_response(stream))
}
