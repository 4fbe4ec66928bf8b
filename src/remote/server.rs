//! The setup server: one façade shared by every connected client.

use super::proto::setup_service_server::{SetupService, SetupServiceServer};
use super::proto::{
    CallReply, CallRequest, HelloReply, HelloRequest, LeaseReply, LeaseRequest, LeaseStep,
    Operation, Outcome, PROTOCOL_VERSION, TOKEN_HEADER, channel, output_status,
};
use crate::error::{Result, SetupError};
use crate::events::{self, Event, EventAction};
use crate::locks::ResourceGroup;
use crate::setup::SetupApi;
use serde_json::json;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::service::Interceptor;
use tonic::{Request, Response, Status, Streaming};

/// Serves a [`SetupApi`] over gRPC.
///
/// Every call runs on the blocking pool of the server's runtime, so a
/// client blocked in a lock acquisition or a trigger wait does not hold up
/// the others. Each named lock a client holds is tied to one lease stream
/// and returned when that stream ends, including when the client dies.
pub struct SetupServer {
    listener: TcpListener,
    api: Arc<dyn SetupApi>,
    token: String,
    audit_log: Option<PathBuf>,
}

impl SetupServer {
    pub fn bind(
        address: impl ToSocketAddrs,
        api: Arc<dyn SetupApi>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .map_err(|e| SetupError::Transport(format!("failed to bind setup server: {}", e)))?;
        Ok(Self {
            listener,
            api,
            token: token.into(),
            audit_log: None,
        })
    }

    /// Record server start and disconnect releases in an audit log.
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| SetupError::Transport(format!("failed to read local address: {}", e)))
    }

    /// Start serving on a background thread.
    pub fn spawn(self) -> Result<ServerHandle> {
        let address = self.local_addr()?;
        let startup =
            |e: std::io::Error| SetupError::Transport(format!("failed to start setup server: {}", e));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("setup-server")
            .enable_all()
            .build()
            .map_err(startup)?;
        self.listener.set_nonblocking(true).map_err(startup)?;
        let listener = {
            let _entered = runtime.enter();
            tokio::net::TcpListener::from_std(self.listener).map_err(startup)?
        };

        tracing::info!(%address, "setup server listening");
        if let Some(path) = &self.audit_log {
            events::record(
                path,
                &Event::new(EventAction::ServerStart)
                    .with_details(json!({ "address": address.to_string() })),
            );
        }

        let service = SetupServiceServer::with_interceptor(
            SetupEndpoint {
                api: self.api,
                audit_log: self.audit_log,
            },
            TokenCheck { token: self.token },
        );
        let (stop, stopped) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("setup-server".to_string())
            .spawn(move || {
                let served = runtime.block_on(
                    tonic::transport::Server::builder()
                        .add_service(service)
                        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                            let _ = stopped.await;
                        }),
                );
                if let Err(e) = served {
                    tracing::error!("setup server failed: {}", e);
                }
                // Calls still blocked on hardware or locks are abandoned.
                runtime.shutdown_background();
                tracing::info!("setup server stopped");
            })
            .map_err(startup)?;

        Ok(ServerHandle {
            address,
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Serve until the process is terminated.
    pub fn serve(self) -> Result<()> {
        self.spawn()?.wait();
        Ok(())
    }
}

/// Handle to a running [`SetupServer`]. Dropping it stops the server.
pub struct ServerHandle {
    address: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Stop accepting connections and wait for open ones to finish.
    pub fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.join();
    }

    /// Block until the server stops.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("setup server thread panicked");
        }
    }
}

/// Rejects requests that do not carry the shared token.
#[derive(Clone)]
struct TokenCheck {
    token: String,
}

impl Interceptor for TokenCheck {
    fn call(&mut self, request: Request<()>) -> std::result::Result<Request<()>, Status> {
        match request.metadata().get(TOKEN_HEADER) {
            Some(token) if token.as_bytes() == self.token.as_bytes() => Ok(request),
            _ => Err(Status::unauthenticated("authentication token mismatch")),
        }
    }
}

#[derive(Clone)]
struct SetupEndpoint {
    api: Arc<dyn SetupApi>,
    audit_log: Option<PathBuf>,
}

impl SetupEndpoint {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SetupApi) -> Result<T> + Send + 'static,
    {
        let api = Arc::clone(&self.api);
        tokio::task::spawn_blocking(move || f(api.as_ref()))
            .await
            .map_err(|e| SetupError::Instrument(format!("setup call aborted: {}", e)))?
    }

    async fn release(&self, group: ResourceGroup, who: &str) -> Result<()> {
        let who = who.to_string();
        self.blocking(move |api| api.release(group, &who)).await
    }

    /// Drive one lease: acquire, report the grant, then release on request
    /// or when the stream goes away.
    async fn serve_lease(
        self,
        peer: String,
        mut requests: Streaming<LeaseRequest>,
        replies: mpsc::Sender<std::result::Result<LeaseReply, Status>>,
    ) {
        let acquire = match requests.message().await {
            Ok(Some(LeaseRequest {
                step: Some(LeaseStep::Acquire(acquire)),
            })) => acquire,
            Ok(Some(_)) => {
                let e = SetupError::InvalidInput("a lease must open with an acquire".to_string());
                let _ = replies.send(Ok(LeaseReply::error(&e))).await;
                return;
            }
            Ok(None) | Err(_) => return,
        };
        let group = match acquire.resource_group() {
            Ok(group) => group,
            Err(e) => {
                let _ = replies.send(Ok(LeaseReply::error(&e))).await;
                return;
            }
        };
        let who = acquire.who;

        let owner = who.clone();
        if let Err(e) = self.blocking(move |api| api.acquire(group, &owner)).await {
            let _ = replies.send(Ok(LeaseReply::error(&e))).await;
            return;
        }

        if replies.send(Ok(LeaseReply::granted())).await.is_err() {
            // The client never learns it holds the lock.
            tracing::warn!(%peer, %group, %who, "lease closed before the grant was delivered; releasing");
            if let Err(e) = self.release(group, &who).await {
                tracing::warn!(%group, %who, "failed to release undelivered grant: {}", e);
            }
            return;
        }

        match requests.message().await {
            Ok(Some(LeaseRequest {
                step: Some(LeaseStep::Release(_)),
            })) => {
                let reply = match self.release(group, &who).await {
                    Ok(()) => LeaseReply::released(),
                    Err(e) => LeaseReply::error(&e),
                };
                let _ = replies.send(Ok(reply)).await;
            }
            Ok(Some(_)) => {
                let _ = self.release(group, &who).await;
                let e = SetupError::InvalidInput(
                    "a lease carries one acquire and one release".to_string(),
                );
                let _ = replies.send(Ok(LeaseReply::error(&e))).await;
            }
            Ok(None) | Err(_) => self.release_abandoned(&peer, group, &who).await,
        }
    }

    async fn release_abandoned(&self, peer: &str, group: ResourceGroup, who: &str) {
        tracing::warn!(%peer, %group, %who, "client disconnected while holding lock; releasing");
        if let Err(e) = self.release(group, who).await {
            tracing::warn!(%group, %who, "failed to release lock of disconnected client: {}", e);
        }
        if let Some(path) = &self.audit_log {
            events::record(
                path,
                &Event::new(EventAction::DisconnectRelease)
                    .with_actor(who)
                    .with_lock(group.as_str())
                    .with_details(json!({ "peer": peer })),
            );
        }
    }
}

#[tonic::async_trait]
impl SetupService for SetupEndpoint {
    async fn hello(
        &self,
        request: Request<HelloRequest>,
    ) -> std::result::Result<Response<HelloReply>, Status> {
        let peer = request_peer(request.remote_addr());
        let version = request.into_inner().version;
        if version != PROTOCOL_VERSION {
            tracing::warn!(%peer, version, "rejected client speaking another protocol version");
            return Err(Status::failed_precondition(format!(
                "protocol version {} not supported (server speaks {})",
                version, PROTOCOL_VERSION
            )));
        }
        tracing::info!(%peer, "client connected");
        Ok(Response::new(HelloReply {
            version: PROTOCOL_VERSION,
        }))
    }

    async fn call(
        &self,
        request: Request<CallRequest>,
    ) -> std::result::Result<Response<CallReply>, Status> {
        let CallRequest { who, op } = request.into_inner();
        let result = match op {
            Some(op) => self.blocking(move |api| dispatch(api, op, who.as_deref())).await,
            None => Err(SetupError::InvalidInput(
                "call carries no operation".to_string(),
            )),
        };
        Ok(Response::new(CallReply::from_result(result)))
    }

    type LeaseStream = ReceiverStream<std::result::Result<LeaseReply, Status>>;

    async fn lease(
        &self,
        request: Request<Streaming<LeaseRequest>>,
    ) -> std::result::Result<Response<Self::LeaseStream>, Status> {
        let peer = request_peer(request.remote_addr());
        let (replies, outgoing) = mpsc::channel(4);
        tokio::spawn(self.clone().serve_lease(peer, request.into_inner(), replies));
        Ok(Response::new(ReceiverStream::new(outgoing)))
    }
}

fn request_peer(address: Option<SocketAddr>) -> String {
    address
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Invoke a non-lock operation on the façade.
fn dispatch(api: &dyn SetupApi, op: Operation, who: Option<&str>) -> Result<Outcome> {
    let done = |r: Result<()>| r.map(|()| Outcome::done());
    let number = |r: Result<f64>| r.map(Outcome::Number);

    match op {
        Operation::MoveTo(target) => done(api.move_to(target.x, target.y, target.z, who)),
        Operation::StagePosition(_) => api.stage_position().map(Outcome::position),
        Operation::LaserStatus(_) => api.laser_status().map(|s| Outcome::status(Some(s))),
        Operation::SetLaserStatus(status) => {
            done(api.set_laser_status(output_status(status)?, who))
        }
        Operation::LaserDac(_) => api.laser_dac().map(|dac| Outcome::Dac(u32::from(dac))),
        Operation::SetLaserDac(dac) => {
            let dac = u16::try_from(dac).map_err(|_| {
                SetupError::InvalidInput(format!("laser DAC {} out of range", dac))
            })?;
            done(api.set_laser_dac(dac, who))
        }
        Operation::LaserFrequency(_) => number(api.laser_frequency()),
        Operation::SetLaserFrequency(hz) => done(api.set_laser_frequency(hz, who)),
        Operation::MeasureBiasVoltage(_) => number(api.measure_bias_voltage()),
        Operation::SetBiasVoltage(volts) => done(api.set_bias_voltage(volts, who)),
        Operation::MeasureBiasCurrent(_) => number(api.measure_bias_current()),
        Operation::CurrentCompliance(_) => number(api.current_compliance()),
        Operation::SetCurrentCompliance(amperes) => {
            done(api.set_current_compliance(amperes, who))
        }
        Operation::BiasOutputStatus(_) => api.bias_output_status().map(Outcome::status),
        Operation::SetBiasOutputStatus(status) => {
            done(api.set_bias_output_status(output_status(status)?, who))
        }
        Operation::ConfigureForTwoPulses(_) => done(api.configure_for_two_pulses(who)),
        Operation::ConfigureSequenceAcquisition(n) => {
            done(api.configure_sequence_acquisition(n, who))
        }
        Operation::WaitForTrigger(_) => done(api.wait_for_trigger()),
        Operation::GetWaveform(ch) => api.get_waveform(channel(ch)?).map(Outcome::waveforms),
        Operation::SetVdiv(vdiv) => {
            done(api.set_vdiv(channel(vdiv.channel)?, vdiv.volts_per_div, who))
        }
        Operation::MeasureTemperature(_) => number(api.measure_temperature()),
        Operation::MeasureHumidity(_) => number(api.measure_humidity()),
        Operation::PeltierVoltageSetpoint(_) => number(api.peltier_voltage_setpoint()),
        Operation::SetPeltierVoltage(volts) => done(api.set_peltier_voltage(volts, who)),
        Operation::PeltierCurrentSetpoint(_) => number(api.peltier_current_setpoint()),
        Operation::SetPeltierCurrent(amperes) => done(api.set_peltier_current(amperes, who)),
        Operation::MeasurePeltierVoltage(_) => number(api.measure_peltier_voltage()),
        Operation::MeasurePeltierCurrent(_) => number(api.measure_peltier_current()),
        Operation::PeltierStatus(_) => api.peltier_status().map(Outcome::status),
        Operation::SetPeltierStatus(status) => {
            done(api.set_peltier_status(output_status(status)?, who))
        }
    }
}
