// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON-over-TCP listener for acq-server.
//!
//! Accepts client connections speaking the `ClientEnvelope`/`ClientResponse`
//! protocol defined in `acq-protocol`. A watch command switches the
//! connection into streaming mode until the client sends `{"stop": true}`
//! or disconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use acq_core::{AcquisitionController, AcquisitionError, Subscription};
use acq_protocol::auth::{SimpleTokenValidator, TokenValidator};
use acq_protocol::codec::{encode_response, parse_envelope, parse_watch_control};
use acq_protocol::mapping::{client_command_to_request, ClientRequest};
use acq_protocol::types::{ClientResponse, ResponsePayload, WatchControl};

type LineReader = Lines<BufReader<OwnedReadHalf>>;

/// Run the JSON TCP listener until the shutdown flag is raised.
pub async fn run_listener(
    addr: SocketAddr,
    controller: AcquisitionController,
    auth_tokens: Vec<String>,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let validator: Arc<dyn TokenValidator> = Arc::new(SimpleTokenValidator::new(auth_tokens));
    serve(listener, controller, validator, shutdown_rx).await
}

/// Accept connections on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    controller: AcquisitionController,
    validator: Arc<dyn TokenValidator>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                info!("Client connected: {}", peer);

                let controller = controller.clone();
                let validator = Arc::clone(&validator);
                let client_shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        handle_client(socket, peer, controller, validator, client_shutdown_rx).await
                    {
                        error!("Client {} error: {:?}", peer, e);
                    }
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    controller: AcquisitionController,
    validator: Arc<dyn TokenValidator>,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    // A line read while a blocking request was still pending.
    let mut queued: Option<String> = None;

    loop {
        let line = match queued.take() {
            Some(line) => Some(line),
            None => tokio::select! {
                line = lines.next_line() => line?,
                _ = wait_for_shutdown(shutdown_rx.clone()) => break,
            },
        };
        let Some(line) = line else {
            info!("Client {} disconnected", addr);
            break;
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request = match authorize(trimmed, validator.as_ref()) {
            Ok(request) => request,
            Err(resp) => {
                send_response(&mut writer, &resp).await?;
                continue;
            }
        };

        let keep_open = match request {
            ClientRequest::WatchStatus => {
                let sub = controller.watch_for_status_change();
                stream_watch(sub, &mut lines, &mut writer, addr, shutdown_rx.clone()).await?
            }
            ClientRequest::WatchCurrentRun => {
                let sub = controller.watch_current_acquisition_run();
                stream_watch(sub, &mut lines, &mut writer, addr, shutdown_rx.clone()).await?
            }
            request => {
                // Abandoning a pending start or stop never affects the task's own transition.
                let dispatched = dispatch(&controller, request);
                tokio::pin!(dispatched);
                let resp = loop {
                    tokio::select! {
                        biased;
                        resp = &mut dispatched => break Some(resp),
                        line = lines.next_line(), if queued.is_none() => match line? {
                            Some(line) => queued = Some(line),
                            None => {
                                info!("Client {} disconnected while waiting", addr);
                                break None;
                            }
                        },
                        _ = wait_for_shutdown(shutdown_rx.clone()) => break None,
                    }
                };
                let Some(resp) = resp else {
                    break;
                };
                send_response(&mut writer, &resp).await?;
                true
            }
        };
        if !keep_open {
            break;
        }
    }

    Ok(())
}

/// Parse, authorize and map one request line.
fn authorize(line: &str, validator: &dyn TokenValidator) -> Result<ClientRequest, ClientResponse> {
    let envelope = parse_envelope(line).map_err(|e| {
        ClientResponse::from(&AcquisitionError::validation(format!(
            "Invalid JSON: {}",
            e
        )))
    })?;

    validator
        .validate(envelope.token.as_deref())
        .map_err(ClientResponse::failure)?;

    client_command_to_request(envelope.cmd).map_err(|e| ClientResponse::from(&e))
}

async fn dispatch(controller: &AcquisitionController, request: ClientRequest) -> ClientResponse {
    let started = std::time::Instant::now();
    let resp: ClientResponse = match request {
        ClientRequest::Start(options) => controller
            .start(options)
            .await
            .map(|run_id| ResponsePayload::Started { run_id })
            .into(),
        ClientRequest::Stop(options) => controller
            .stop(options)
            .await
            .map(|()| ResponsePayload::Stopped)
            .into(),
        ClientRequest::CurrentStatus => ClientResponse::ok(controller.current_status().into()),
        ClientRequest::GetProgress => {
            ClientResponse::ok(ResponsePayload::Progress(controller.get_progress()))
        }
        ClientRequest::GetAcquisitionInfo(run_id) => {
            controller.get_acquisition_info(run_id.as_deref()).into()
        }
        ClientRequest::ListAcquisitionRuns => ClientResponse::ok(ResponsePayload::Runs {
            run_ids: controller.list_acquisition_runs(),
        }),
        ClientRequest::GetCurrentAcquisitionRun => controller.get_current_acquisition_run().into(),
        ClientRequest::SetSignalReader(config) => controller.set_signal_reader(config).await.into(),
        ClientRequest::GetSignalReader => controller.signal_reader().await.into(),
        ClientRequest::WatchStatus | ClientRequest::WatchCurrentRun => ClientResponse::from(
            &AcquisitionError::internal("watch requests are streamed, not dispatched"),
        ),
    };
    debug!("Request handled in {:?}", started.elapsed());
    resp
}

/// Stream a subscription to the client. Returns `false` when the connection
/// should be closed.
async fn stream_watch<T>(
    mut sub: Subscription<T>,
    lines: &mut LineReader,
    writer: &mut OwnedWriteHalf,
    addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<bool>
where
    T: Into<ResponsePayload>,
{
    debug!("Client {} started watch {:?}", addr, sub.id());
    send_response(writer, &ClientResponse::ok(ResponsePayload::WatchStarted)).await?;

    loop {
        tokio::select! {
            item = sub.recv() => match item {
                Some(value) => send_response(writer, &ClientResponse::ok(value.into())).await?,
                None => {
                    send_response(writer, &ClientResponse::ok(ResponsePayload::WatchStopped)).await?;
                    return Ok(true);
                }
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Client {} disconnected during watch", addr);
                    return Ok(false);
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_watch_control(trimmed) {
                    Ok(WatchControl { stop: true }) => {
                        debug!("Client {} stopped watch {:?}", addr, sub.id());
                        send_response(writer, &ClientResponse::ok(ResponsePayload::WatchStopped)).await?;
                        return Ok(true);
                    }
                    Ok(WatchControl { stop: false }) => {}
                    Err(e) => {
                        warn!("Client {} sent {:?} during watch: {}", addr, trimmed, e);
                        let err = AcquisitionError::validation(
                            "only {\"stop\": true} is accepted while a watch is active",
                        );
                        send_response(writer, &ClientResponse::from(&err)).await?;
                    }
                }
            }
            _ = wait_for_shutdown(shutdown_rx.clone()) => return Ok(false),
        }
    }
}

async fn send_response(writer: &mut OwnedWriteHalf, resp: &ClientResponse) -> std::io::Result<()> {
    let line = encode_response(resp).map_err(std::io::Error::other)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    use acq_backend::{register_builtin_backends_on, BackendSettings, RegistrationContext};
    use acq_core::{AcquisitionTaskConfig, DeviceStatus, ErrorKind};
    use acq_protocol::auth::NoAuthValidator;

    const WAIT: Duration = Duration::from_secs(3);

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> ClientResponse {
            let line = timeout(WAIT, self.lines.next_line())
                .await
                .expect("timed out waiting for response")
                .unwrap()
                .expect("connection closed");
            serde_json::from_str(&line).unwrap()
        }

        async fn call(&mut self, line: &str) -> ClientResponse {
            self.send(line).await;
            self.recv().await
        }
    }

    async fn start_server(tokens: &[&str]) -> (SocketAddr, AcquisitionController, watch::Sender<bool>) {
        let mut ctx = RegistrationContext::new();
        register_builtin_backends_on(&mut ctx);
        let settings = BackendSettings {
            ready_delay: Duration::from_millis(10),
            feed_interval: Duration::from_millis(10),
            ..BackendSettings::default()
        };
        let backend = ctx.build_backend("simulated", &settings).unwrap();
        let (controller, _task) =
            AcquisitionController::spawn(AcquisitionTaskConfig::new(backend.device, backend.pipeline));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let validator: Arc<dyn TokenValidator> =
            Arc::new(SimpleTokenValidator::new(tokens.iter().copied()));
        tokio::spawn(serve(listener, controller.clone(), validator, shutdown_rx));
        (addr, controller, shutdown_tx)
    }

    fn status_of(resp: &ClientResponse) -> Option<DeviceStatus> {
        match &resp.payload {
            Some(ResponsePayload::Status(report)) => Some(report.status),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_start_stop_over_tcp() {
        let (addr, _ctrl, _shutdown) = start_server(&[]).await;
        let mut client = Client::connect(addr).await;

        let resp = client.call(r#"{"cmd":"current_status"}"#).await;
        assert!(resp.success);
        assert_eq!(status_of(&resp), Some(DeviceStatus::Ready));

        let resp = client
            .call(r#"{"cmd":"start","wait_until_processing":true}"#)
            .await;
        let run_id = match resp.payload {
            Some(ResponsePayload::Started { run_id }) => run_id,
            other => panic!("Expected Started, got {:?}", other),
        };
        assert!(!run_id.is_empty());

        let resp = client.call(r#"{"cmd":"get_current_acquisition_run"}"#).await;
        match resp.payload {
            Some(ResponsePayload::Run(run)) => assert_eq!(run.run_id, run_id),
            other => panic!("Expected Run, got {:?}", other),
        }

        let resp = client
            .call(r#"{"cmd":"stop","data_action":"FINISH_PROCESSING","wait_until_ready":true}"#)
            .await;
        assert!(resp.success, "stop failed: {:?}", resp.error);
        assert_eq!(resp.payload, Some(ResponsePayload::Stopped));

        let resp = client.call(r#"{"cmd":"list_acquisition_runs"}"#).await;
        assert_eq!(
            resp.payload,
            Some(ResponsePayload::Runs {
                run_ids: vec![run_id]
            })
        );
    }

    #[tokio::test]
    async fn test_disconnect_abandons_pending_start() {
        let mut ctx = RegistrationContext::new();
        register_builtin_backends_on(&mut ctx);
        let settings = BackendSettings {
            ready_delay: Duration::from_secs(30),
            ..BackendSettings::default()
        };
        let backend = ctx.build_backend("simulated", &settings).unwrap();
        let (controller, _task) =
            AcquisitionController::spawn(AcquisitionTaskConfig::new(backend.device, backend.pipeline));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (socket, peer) = listener.accept().await.unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let validator: Arc<dyn TokenValidator> = Arc::new(NoAuthValidator);
        let handle = tokio::spawn(handle_client(
            socket,
            peer,
            controller.clone(),
            validator,
            shutdown_rx,
        ));

        client
            .write_all(b"{\"cmd\":\"start\",\"wait_until_processing\":true}\n")
            .await
            .unwrap();
        drop(client);

        let result = timeout(WAIT, handle)
            .await
            .expect("client handler kept waiting after disconnect")
            .unwrap();
        assert!(result.is_ok());

        let mut sub = controller.watch_for_status_change();
        let status = timeout(WAIT, async {
            loop {
                match sub.recv().await {
                    Some(report) if report.status == DeviceStatus::Starting => break report.status,
                    Some(_) => continue,
                    None => panic!("status feed closed"),
                }
            }
        })
        .await
        .expect("start was not applied");
        assert_eq!(status, DeviceStatus::Starting);
    }

    #[tokio::test]
    async fn test_line_sent_during_pending_start_is_answered_after() {
        let (addr, _ctrl, _shutdown) = start_server(&[]).await;
        let mut client = Client::connect(addr).await;

        client
            .send(r#"{"cmd":"start","wait_until_processing":true}"#)
            .await;
        client.send(r#"{"cmd":"current_status"}"#).await;

        let resp = client.recv().await;
        assert!(matches!(resp.payload, Some(ResponsePayload::Started { .. })));
        let resp = client.recv().await;
        assert_eq!(status_of(&resp), Some(DeviceStatus::Processing));
    }

    #[tokio::test]
    async fn test_errors_carry_kind() {
        let (addr, _ctrl, _shutdown) = start_server(&[]).await;
        let mut client = Client::connect(addr).await;

        let resp = client.call(r#"{"cmd":"stop"}"#).await;
        assert!(!resp.success);
        assert_eq!(resp.error_kind, Some(ErrorKind::Precondition));

        let resp = client.call(r#"{"cmd":"get_current_acquisition_run"}"#).await;
        assert!(!resp.success);
        assert_eq!(resp.error_kind, Some(ErrorKind::Precondition));

        let resp = client
            .call(r#"{"cmd":"get_acquisition_info","run_id":"nope"}"#)
            .await;
        assert_eq!(resp.error_kind, Some(ErrorKind::NotFound));

        let resp = client.call("not json").await;
        assert_eq!(resp.error_kind, Some(ErrorKind::Validation));

        let resp = client
            .call(r#"{"cmd":"stop","data_action":"DISCARD_ALL"}"#)
            .await;
        assert_eq!(resp.error_kind, Some(ErrorKind::Validation));

        let resp = client
            .call(r#"{"cmd":"set_signal_reader","reader_type":"DEVICE","replay":{}}"#)
            .await;
        assert_eq!(resp.error_kind, Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_token_required() {
        let (addr, _ctrl, _shutdown) = start_server(&["s3cret"]).await;
        let mut client = Client::connect(addr).await;

        let resp = client.call(r#"{"cmd":"current_status"}"#).await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("missing authorization token"));
        assert_eq!(resp.error_kind, None);

        let resp = client
            .call(r#"{"token":"wrong","cmd":"current_status"}"#)
            .await;
        assert_eq!(resp.error.as_deref(), Some("invalid authorization token"));

        let resp = client
            .call(r#"{"token":"Bearer s3cret","cmd":"current_status"}"#)
            .await;
        assert!(resp.success);
    }

    #[tokio::test]
    async fn test_status_watch_streams_until_stopped() {
        let (addr, ctrl, _shutdown) = start_server(&[]).await;
        let mut watcher = Client::connect(addr).await;

        let resp = watcher.call(r#"{"cmd":"watch_for_status_change"}"#).await;
        assert_eq!(resp.payload, Some(ResponsePayload::WatchStarted));
        assert_eq!(status_of(&watcher.recv().await), Some(DeviceStatus::Ready));

        let mut control = Client::connect(addr).await;
        let resp = control
            .call(r#"{"cmd":"start","wait_until_processing":true}"#)
            .await;
        assert!(resp.success);

        assert_eq!(
            status_of(&watcher.recv().await),
            Some(DeviceStatus::Starting)
        );
        assert_eq!(
            status_of(&watcher.recv().await),
            Some(DeviceStatus::Processing)
        );

        watcher.send(r#"{"stop":true}"#).await;
        // Updates published before the stop line may still be in flight.
        loop {
            let resp = watcher.recv().await;
            if resp.payload == Some(ResponsePayload::WatchStopped) {
                break;
            }
            assert!(status_of(&resp).is_some());
        }

        // Back in request/response mode.
        let resp = watcher.call(r#"{"cmd":"get_progress"}"#).await;
        assert!(matches!(resp.payload, Some(ResponsePayload::Progress(_))));

        let resp = control
            .call(r#"{"cmd":"stop","wait_until_ready":true}"#)
            .await;
        assert!(resp.success);
        assert_eq!(ctrl.current_status().status, DeviceStatus::Ready);
    }

    #[tokio::test]
    async fn test_run_watch_starts_with_placeholder() {
        let (addr, _ctrl, _shutdown) = start_server(&[]).await;
        let mut client = Client::connect(addr).await;

        let resp = client
            .call(r#"{"cmd":"watch_current_acquisition_run"}"#)
            .await;
        assert_eq!(resp.payload, Some(ResponsePayload::WatchStarted));
        match client.recv().await.payload {
            Some(ResponsePayload::Run(run)) => assert!(run.run_id.is_empty()),
            other => panic!("Expected placeholder run, got {:?}", other),
        }

        let resp = client.call(r#"{"cmd":"current_status"}"#).await;
        assert!(!resp.success);
        assert_eq!(resp.error_kind, Some(ErrorKind::Validation));

        let resp = client.call(r#"{"stop":true}"#).await;
        assert_eq!(resp.payload, Some(ResponsePayload::WatchStopped));
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscription() {
        let (addr, ctrl, _shutdown) = start_server(&[]).await;
        let mut client = Client::connect(addr).await;
        client.call(r#"{"cmd":"watch_for_status_change"}"#).await;
        client.recv().await;
        assert_eq!(ctrl.status_subscriber_count(), 1);
        drop(client);

        let released = timeout(WAIT, async {
            while ctrl.status_subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(released.is_ok(), "subscription was not released");
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (addr, _ctrl, shutdown) = start_server(&[]).await;
        let mut client = Client::connect(addr).await;
        assert!(client.call(r#"{"cmd":"current_status"}"#).await.success);

        shutdown.send(true).unwrap();
        let closed = timeout(WAIT, client.lines.next_line()).await.unwrap().unwrap();
        assert!(closed.is_none());
    }
}
