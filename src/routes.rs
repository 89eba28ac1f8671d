use log::{debug, warn};
use std::sync::Arc;

use actix_web::http::header::AUTHORIZATION;
use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::backup;
use crate::error::HubError;
use crate::events::{ValueEvent, ValueEvents};
use crate::hub::Hub;
use crate::options::{Options, parse_form};
use crate::scheduler;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Mutex<Hub>>,
    pub events: Arc<ValueEvents>,
}

impl AppState {
    pub fn new(hub: Hub) -> Self {
        let events = hub.events();
        Self {
            hub: Arc::new(Mutex::new(hub)),
            events,
        }
    }
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct StreamQuery {
    device: Option<usize>,
}

/// Feeds one WebSocket client: the newest value of every watched device
/// first, then each change as it is published.
async fn stream_events(
    mut session: Session,
    mut incoming: MessageStream,
    rx: broadcast::Receiver<ValueEvent>,
    snapshot: Vec<ValueEvent>,
    watch: Option<usize>,
) {
    for event in &snapshot {
        if send_event(&mut session, event).await.is_err() {
            return;
        }
    }

    let mut changes = BroadcastStream::new(rx).filter(move |change| match (change, watch) {
        (Ok(event), Some(id)) => event.device_id == id,
        _ => true,
    });

    loop {
        tokio::select! {
            Some(msg) = incoming.recv() => match msg {
                Ok(Message::Ping(bytes)) => {
                    if session.pong(&bytes).await.is_err() {
                        return;
                    }
                }
                Ok(Message::Close(reason)) => {
                    let _ = session.close(reason).await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket protocol error: {e}");
                    break;
                }
            },
            Some(change) = changes.next() => {
                let sent = match change {
                    Ok(event) => send_event(&mut session, &event).await,
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        session.text(json!({ "lagged": n }).to_string()).await
                    }
                };
                if sent.is_err() {
                    debug!("WebSocket client went away");
                    return;
                }
            }
            else => break,
        }
    }
    let _ = session.close(None).await;
}

async fn send_event(session: &mut Session, event: &ValueEvent) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(event) {
        Ok(text) => session.text(text).await,
        Err(e) => {
            warn!("Dropping unserializable event: {e}");
            Ok(())
        }
    }
}

impl AppState {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/status")
                    .route(web::get().to(status))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/server")
                    .route(web::post().to(set_server))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/devices")
                    .route(web::get().to(list_devices))
                    .route(web::post().to(create_device))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/devices/events")
                    .route(web::get().to(events_ws))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/device/{id}")
                    .route(web::get().to(get_device))
                    .route(web::post().to(update_device))
                    .route(web::delete().to(delete_device))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[
                                Method::GET,
                                Method::POST,
                                Method::DELETE,
                            ]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/device/{id}/value")
                    .route(web::post().to(set_value))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/device/{id}/events")
                    .route(web::get().to(get_events))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/backup")
                    .route(web::get().to(get_backup))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/restore")
                    .route(web::post().to(post_restore))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

/// Every route but `/status` requires the server token once one is set.
fn authorize(req: &HttpRequest, state: &AppState) -> Result<(), HubError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    state.hub.lock().authorize(header)
}

async fn status(state: web::Data<AppState>) -> Result<impl Responder, HubError> {
    let report = state.hub.lock().status();

    Ok(web::Json(report))
}

async fn set_server(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let opts = parse_form_payload(&body)?;

    state.hub.lock().set_server_config(&opts)?;

    Ok(HttpResponse::Ok().finish())
}

async fn list_devices(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let devices = state.hub.lock().devices();

    Ok(web::Json(devices))
}

async fn create_device(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let opts = parse_form_payload(&body)?;

    let view = {
        let mut hub = state.hub.lock();
        let id = hub.create_device(&opts)?;
        hub.device(id)?
    };

    Ok(HttpResponse::Created().json(view))
}

async fn get_device(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let id = parse_device_id(&req)?;
    let view = state.hub.lock().device(id)?;

    Ok(web::Json(view))
}

async fn update_device(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let id = parse_device_id(&req)?;
    let opts = parse_form_payload(&body)?;

    let view = {
        let mut hub = state.hub.lock();
        hub.update_device(id, &opts)?;
        hub.device(id)?
    };

    Ok(web::Json(view))
}

async fn delete_device(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let id = parse_device_id(&req)?;

    state.hub.lock().delete_device(id)?;

    Ok(HttpResponse::Ok().finish())
}

async fn set_value(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let id = parse_device_id(&req)?;
    let value = parse_value_payload(&body)?;

    let pushes = state.hub.lock().command_device(id, &value)?;
    if !pushes.is_empty() {
        let hub = Arc::clone(&state.hub);
        web::block(move || scheduler::deliver(&hub, 0, pushes))
            .await
            .map_err(|e| HubError::Network(format!("callback delivery: {e}")))?;
    }
    let view = state.hub.lock().device(id)?;

    Ok(web::Json(view))
}

async fn get_events(
    req: HttpRequest,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let id = parse_device_id(&req)?;
    state.hub.lock().device(id)?;

    let events = state.events.history(id, query.limit);

    Ok(web::Json(events))
}

async fn events_ws(
    req: HttpRequest,
    query: web::Query<StreamQuery>,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, HubError> {
    authorize(&req, &state)?;
    let rx = state.events.subscribe();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| HubError::Network(format!("Websocket error: {e}")))?;

    let watch = query.device;
    let snapshot = state.events.latest(watch);
    actix_web::rt::spawn(stream_events(session, client_stream, rx, snapshot, watch));

    Ok(response)
}

async fn get_backup(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let text = backup::backup(&state.hub.lock())?;

    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .body(text))
}

async fn post_restore(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, HubError> {
    authorize(&req, &state)?;
    let text = std::str::from_utf8(&body)
        .map_err(|_| HubError::Restore("Backup payload must be valid UTF-8".into()))?;

    let devices = {
        let mut hub = state.hub.lock();
        backup::restore(&mut hub, text)?;
        hub.len()
    };

    Ok(HttpResponse::Ok().json(json!({ "devices": devices })))
}

fn parse_form_payload(body: &[u8]) -> Result<Options, HubError> {
    std::str::from_utf8(body)
        .map(|text| parse_form(text.trim()))
        .map_err(|_| HubError::InvalidValue("Form payload must be valid UTF-8".into()))
}

fn parse_value_payload(body: &[u8]) -> Result<String, HubError> {
    if body.is_empty() {
        return Err(HubError::InvalidValue("Empty value payload".into()));
    }

    match std::str::from_utf8(body) {
        Ok(text) => Ok(text.trim().to_string()),
        _ => Err(HubError::InvalidValue(
            "Value payload must be valid UTF-8".into(),
        )),
    }
}

fn parse_device_id(req: &HttpRequest) -> Result<usize, HubError> {
    let id = req
        .match_info()
        .get("id")
        .ok_or_else(|| HubError::InvalidValue("Missing device id".into()))?;
    let id = id
        .parse::<usize>()
        .map_err(|_| HubError::InvalidValue("Invalid device id".into()))?;

    Ok(id)
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
