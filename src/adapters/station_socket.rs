use actix_web::{HttpRequest, HttpResponse, get, rt, web};
use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};

use crate::adapters::api::ApiState;
use crate::app::services::{IngestHandler, ServiceError, WindService};
use crate::domain::registry::{DropReason, RegistrationOutcome, SampleOutcome};
use crate::domain::session_state::{OutboundMessage, SessionStateMachine, SessionStep};
use crate::domain::telemetry::decode_message;

#[get("/ws")]
pub async fn station_socket(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<ApiState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, messages) = actix_ws::handle(&req, body)?;
    let source_addr = source_address(&req);

    rt::spawn(run_session(
        state.stations.clone(),
        session,
        messages,
        source_addr,
    ));

    Ok(response)
}

pub fn source_address(req: &HttpRequest) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn run_session(
    service: WindService,
    mut session: Session,
    mut messages: MessageStream,
    source_addr: String,
) {
    let mut machine = SessionStateMachine::new();
    let mut station_name: Option<String> = None;
    let mut close_reason: Option<CloseReason> = None;

    if send(&mut session, &machine.open()).await.is_err() {
        return;
    }

    while let Some(frame) = messages.recv().await {
        let raw = match frame {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Ping(bytes)) => {
                if session.pong(&bytes).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(error) => {
                tracing::warn!(source_addr = %source_addr, error = %error, "websocket protocol error");
                break;
            }
        };

        let payload = match decode_message(&raw) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::debug!(source_addr = %source_addr, error = %error, "dropped undecodable message");
                continue;
            }
        };

        match machine.on_message(payload) {
            SessionStep::Ignore => {}
            SessionStep::Register(identity) => match service.register(&identity, &source_addr) {
                Ok(RegistrationOutcome::Accepted {
                    session_id,
                    replaced,
                }) => {
                    tracing::info!(
                        uuid = %identity.uuid,
                        station_name = %identity.station_name,
                        short_id = %identity.short_id(),
                        session_id = %session_id,
                        replaced_session = ?replaced,
                        source_addr = %source_addr,
                        "station connected"
                    );
                    station_name = Some(identity.station_name.clone());
                    let reply = machine.accept(&identity.uuid, session_id);
                    if send(&mut session, &reply).await.is_err() {
                        break;
                    }
                }
                Ok(RegistrationOutcome::Rejected(reason)) => {
                    tracing::warn!(
                        uuid = %identity.uuid,
                        station_name = %identity.station_name,
                        source_addr = %source_addr,
                        reason = %reason,
                        "station registration rejected"
                    );
                    let reply = machine.reject(reason);
                    let _ = send(&mut session, &reply).await;
                    close_reason = Some(CloseReason {
                        code: CloseCode::Policy,
                        description: Some(reason.to_string()),
                    });
                    break;
                }
                Err(error) => {
                    tracing::error!(uuid = %identity.uuid, error = %error, "station registration failed");
                    close_reason = Some(CloseCode::Error.into());
                    break;
                }
            },
            SessionStep::Record {
                uuid,
                session_id,
                payload,
            } => {
                let ingest = service.clone();
                let target = uuid.clone();
                let result =
                    web::block(move || ingest.record_sample(&target, session_id, payload)).await;

                match result {
                    Ok(Ok(SampleOutcome::Recorded)) => {}
                    Ok(Ok(SampleOutcome::Dropped(reason))) => {
                        tracing::warn!(
                            uuid = %uuid,
                            session_id = %session_id,
                            reason = ?reason,
                            "session no longer owns its station; closing"
                        );
                        let description = match reason {
                            DropReason::Superseded => "superseded",
                            DropReason::Unregistered => "unregistered",
                        };
                        close_reason = Some(CloseReason {
                            code: CloseCode::Policy,
                            description: Some(description.to_string()),
                        });
                        break;
                    }
                    Ok(Err(ServiceError::Parse(error))) => {
                        tracing::debug!(uuid = %uuid, error = %error, "dropped malformed telemetry");
                    }
                    Ok(Err(error)) => {
                        tracing::warn!(
                            uuid = %uuid,
                            station_name = station_name.as_deref().unwrap_or_default(),
                            error = %error,
                            "failed to store telemetry"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(uuid = %uuid, error = %error, "telemetry write task failed");
                    }
                }
            }
        }
    }

    if let Some((uuid, session_id)) = machine.close() {
        match service.close(&uuid, session_id) {
            Ok(true) => tracing::info!(
                uuid = %uuid,
                station_name = station_name.as_deref().unwrap_or_default(),
                session_id = %session_id,
                "station disconnected"
            ),
            Ok(false) => tracing::debug!(
                uuid = %uuid,
                session_id = %session_id,
                "superseded session closed"
            ),
            Err(error) => tracing::warn!(uuid = %uuid, error = %error, "failed to release station"),
        }
    }

    let _ = session.close(close_reason).await;
}

async fn send(session: &mut Session, message: &OutboundMessage) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(message) {
        Ok(text) => session.text(text).await,
        Err(error) => {
            tracing::error!(error = %error, "failed to encode outbound message");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use actix_web::{App, HttpServer, dev::ServerHandle, http::StatusCode, test, web};
    use awc::error::WsProtocolError;
    use awc::ws::{CloseCode, Frame, Message};
    use chrono::Duration;
    use futures::{Sink, SinkExt, Stream, StreamExt};
    use serde_json::{Value, json};

    use super::source_address;
    use crate::adapters::api::{ApiState, configure_routes};
    use crate::app::services::{StationQueryHandler, WindowLookup};
    use crate::domain::registry::AllowList;
    use crate::test_support::{api_state, api_state_with, noon, temp_data_dir};

    const PIER: &str = "3f2b8c1e-9d4a-4b7e-8f21-0a1b2c3d4e5f";

    async fn start_server(state: ApiState) -> (SocketAddr, ServerHandle) {
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure_routes)
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("server should bind");
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (addr, handle)
    }

    async fn connect(
        addr: SocketAddr,
    ) -> impl Stream<Item = Result<Frame, WsProtocolError>>
    + Sink<Message, Error = WsProtocolError>
    + Unpin {
        let (_, connection) = awc::Client::new()
            .ws(format!("ws://{addr}/ws"))
            .connect()
            .await
            .expect("websocket should connect");
        connection
    }

    async fn next_frame<S>(connection: &mut S) -> Frame
    where
        S: Stream<Item = Result<Frame, WsProtocolError>> + Unpin,
    {
        connection
            .next()
            .await
            .expect("connection should stay open")
            .expect("frame should be valid")
    }

    async fn next_json<S>(connection: &mut S) -> Value
    where
        S: Stream<Item = Result<Frame, WsProtocolError>> + Unpin,
    {
        match next_frame(connection).await {
            Frame::Text(bytes) => serde_json::from_slice(&bytes).expect("frame should be json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn send_json<S>(connection: &mut S, payload: Value)
    where
        S: Sink<Message, Error = WsProtocolError> + Unpin,
    {
        connection
            .send(Message::Text(payload.to_string().into()))
            .await
            .expect("message should be sent");
    }

    async fn ping<S>(connection: &mut S)
    where
        S: Stream<Item = Result<Frame, WsProtocolError>>
            + Sink<Message, Error = WsProtocolError>
            + Unpin,
    {
        connection
            .send(Message::Ping(web::Bytes::from_static(b"x")))
            .await
            .expect("ping should be sent");
        match next_frame(connection).await {
            Frame::Pong(bytes) => assert_eq!(&bytes[..], b"x"),
            other => panic!("expected pong, got {other:?}"),
        }
    }

    async fn register<S>(connection: &mut S, uuid: &str, station_name: &str)
    where
        S: Stream<Item = Result<Frame, WsProtocolError>>
            + Sink<Message, Error = WsProtocolError>
            + Unpin,
    {
        assert_eq!(next_json(connection).await, json!({ "action": "identify" }));
        send_json(connection, json!({ "uuid": uuid, "station_name": station_name })).await;
        assert_eq!(
            next_json(connection).await,
            json!({ "action": "registered", "uuid": uuid })
        );
    }

    fn stored_speeds(state: &ApiState) -> Vec<f64> {
        match state
            .stations
            .get_window(PIER, noon(), Duration::hours(1))
            .expect("window")
        {
            WindowLookup::Found(samples) => samples.iter().filter_map(|s| s.windspeed()).collect(),
            WindowLookup::NotFound => Vec::new(),
        }
    }

    #[actix_web::test]
    async fn upgrades_websocket_handshake() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(api_state("ws-upgrade")))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/ws")
            .insert_header(("upgrade", "websocket"))
            .insert_header(("connection", "upgrade"))
            .insert_header(("sec-websocket-version", "13"))
            .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    #[actix_web::test]
    async fn plain_get_is_not_upgraded() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(api_state("ws-plain")))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn prefers_forwarded_for_header() {
        let req = test::TestRequest::default()
            .insert_header(("x-forwarded-for", "203.0.113.7, 10.0.0.1"))
            .peer_addr("10.0.0.1:5000".parse().expect("socket addr"))
            .to_http_request();
        assert_eq!(source_address(&req), "203.0.113.7");

        let req = test::TestRequest::default()
            .peer_addr("10.0.0.1:5000".parse().expect("socket addr"))
            .to_http_request();
        assert_eq!(source_address(&req), "10.0.0.1");
    }

    #[actix_web::test]
    async fn unauthorized_station_is_rejected_and_closed() {
        let state = api_state_with(temp_data_dir("ws-reject"), AllowList::only(["good-1"]));
        let (addr, server) = start_server(state.clone()).await;
        let mut connection = connect(addr).await;

        assert_eq!(next_json(&mut connection).await, json!({ "action": "identify" }));
        send_json(&mut connection, json!({ "uuid": "bad-1", "station_name": "Bad" })).await;
        assert_eq!(
            next_json(&mut connection).await,
            json!({ "action": "rejected", "reason": "unauthorized" })
        );
        match next_frame(&mut connection).await {
            Frame::Close(Some(reason)) => {
                assert_eq!(reason.code, CloseCode::Policy);
                assert_eq!(reason.description.as_deref(), Some("unauthorized"));
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(state.stations.list_stations().expect("list").is_empty());

        server.stop(false).await;
    }

    #[actix_web::test]
    async fn registered_session_records_only_post_registration_telemetry() {
        let state = api_state("ws-session");
        let (addr, server) = start_server(state.clone()).await;
        let mut connection = connect(addr).await;

        assert_eq!(next_json(&mut connection).await, json!({ "action": "identify" }));
        send_json(&mut connection, json!({ "windspeed_mps": 9.0 })).await;
        send_json(&mut connection, json!({ "uuid": PIER, "station_name": "Pier" })).await;
        assert_eq!(
            next_json(&mut connection).await,
            json!({ "action": "registered", "uuid": PIER })
        );

        send_json(&mut connection, json!({ "windspeed_mps": 4.0 })).await;
        ping(&mut connection).await;
        assert_eq!(stored_speeds(&state), vec![4.0]);
        assert!(state.stations.list_stations().expect("list")[0].online);

        connection
            .send(Message::Close(None))
            .await
            .expect("close should be sent");
        assert!(matches!(next_frame(&mut connection).await, Frame::Close(_)));
        assert!(!state.stations.list_stations().expect("list")[0].online);

        server.stop(false).await;
    }

    #[actix_web::test]
    async fn superseded_session_is_closed_on_its_next_message() {
        let state = api_state("ws-superseded");
        let (addr, server) = start_server(state.clone()).await;
        let mut older = connect(addr).await;
        register(&mut older, PIER, "Pier").await;
        let mut newer = connect(addr).await;
        register(&mut newer, PIER, "Pier").await;

        send_json(&mut older, json!({ "windspeed_mps": 7.0 })).await;
        match next_frame(&mut older).await {
            Frame::Close(Some(reason)) => {
                assert_eq!(reason.code, CloseCode::Policy);
                assert_eq!(reason.description.as_deref(), Some("superseded"));
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        send_json(&mut newer, json!({ "windspeed_mps": 3.0 })).await;
        ping(&mut newer).await;
        assert_eq!(stored_speeds(&state), vec![3.0]);
        assert!(state.stations.list_stations().expect("list")[0].online);

        server.stop(false).await;
    }

    #[actix_web::test]
    async fn session_survives_storage_failure_and_malformed_telemetry() {
        let data_dir = temp_data_dir("ws-storage-failure");
        let state = api_state_with(data_dir.clone(), AllowList::allow_all());
        let blocker = data_dir.join(PIER);
        std::fs::write(&blocker, b"not a directory").expect("blocker file");

        let (addr, server) = start_server(state.clone()).await;
        let mut connection = connect(addr).await;
        register(&mut connection, PIER, "Pier").await;

        send_json(&mut connection, json!({ "windspeed_mps": 3.0 })).await;
        send_json(&mut connection, json!({ "speed": 3.0 })).await;
        ping(&mut connection).await;
        assert!(stored_speeds(&state).is_empty());

        std::fs::remove_file(&blocker).expect("remove blocker");
        send_json(&mut connection, json!({ "windspeed_mps": 5.0 })).await;
        ping(&mut connection).await;
        assert_eq!(stored_speeds(&state), vec![5.0]);

        server.stop(false).await;
    }
}
