//! Client proxy for a remote setup.

use super::proto::setup_service_client::SetupServiceClient;
use super::proto::{
    CallRequest, Empty, HelloRequest, LeaseOutcome, LeaseReply, LeaseRequest, MoveTo, Operation,
    Outcome, PROTOCOL_VERSION, TOKEN_HEADER, Vdiv, output,
};
use crate::config::Config;
use crate::error::{Result, SetupError};
use crate::instruments::{OutputStatus, StagePosition, Waveform};
use crate::locks::ResourceGroup;
use crate::setup::{Identified, SetupApi};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status, Streaming};

type Client = SetupServiceClient<InterceptedService<Channel, TokenInterceptor>>;

/// A connection to a [`SetupServer`](super::SetupServer) that implements
/// [`SetupApi`] by forwarding every call.
///
/// Calls are synchronous for the caller but independent on the wire, so a
/// thread blocked on a held lock does not delay reads from other threads.
/// Read-only calls must be answered within the call timeout. Calls that
/// change hardware and lock acquisitions have no deadline, since the server
/// queues them behind other clients' holds; a CAEN ramp alone can take
/// longer than any sensible read timeout.
///
/// Every named lock acquired through this proxy is held by its own lease
/// stream. Dropping the proxy, or the process dying, ends those streams and
/// the server returns the locks.
pub struct RemoteSetup {
    address: String,
    call_timeout: Duration,
    client: Mutex<Client>,
    leases: Mutex<HashMap<(ResourceGroup, String), Vec<Lease>>>,
    // Last, so the connection tasks outlive the streams above.
    runtime: Runtime,
}

/// One granted named lock.
struct Lease {
    requests: mpsc::Sender<LeaseRequest>,
    replies: Streaming<LeaseReply>,
}

/// Attaches the shared token to every request.
#[derive(Clone)]
struct TokenInterceptor {
    token: AsciiMetadataValue,
}

impl Interceptor for TokenInterceptor {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(TOKEN_HEADER, self.token.clone());
        Ok(request)
    }
}

impl RemoteSetup {
    /// Connect and authenticate with `token`.
    pub fn connect(address: &str, token: &str, call_timeout: Duration) -> Result<Self> {
        let token: AsciiMetadataValue = token.parse().map_err(|_| {
            SetupError::Config("auth_token must be printable ASCII".to_string())
        })?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("setup-client")
            .enable_all()
            .build()
            .map_err(|e| SetupError::Transport(format!("failed to start client runtime: {}", e)))?;

        let endpoint = Endpoint::from_shared(format!("http://{}", address))
            .map_err(|e| {
                SetupError::Transport(format!("invalid setup server address '{}': {}", address, e))
            })?
            .connect_timeout(call_timeout)
            .tcp_nodelay(true);
        let channel = runtime.block_on(endpoint.connect()).map_err(|e| {
            SetupError::Transport(format!(
                "cannot reach setup server at {}: {}",
                address,
                describe(&e)
            ))
        })?;
        let mut client = SetupServiceClient::with_interceptor(channel, TokenInterceptor { token });

        let hello = runtime.block_on(within(
            call_timeout,
            client.hello(HelloRequest {
                version: PROTOCOL_VERSION,
            }),
        ))?;
        let server_version = hello.map_err(transport)?.into_inner().version;
        tracing::debug!(address, server_version, "connected to setup server");

        Ok(Self {
            address: address.to_string(),
            call_timeout,
            client: Mutex::new(client),
            leases: Mutex::new(HashMap::new()),
            runtime,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn client(&self) -> Client {
        self.client.lock().clone()
    }

    fn call(&self, op: Operation, who: Option<&str>) -> Result<Outcome> {
        let deadline = if op.waits_for_lock() {
            None
        } else {
            Some(self.call_timeout)
        };
        let mut client = self.client();
        let request = CallRequest {
            who: who.map(str::to_string),
            op: Some(op),
        };

        let reply = self.runtime.block_on(async move {
            let reply = match deadline {
                Some(limit) => within(limit, client.call(request)).await?,
                None => client.call(request).await,
            };
            reply.map_err(transport)
        })?;
        reply.into_inner().into_outcome()
    }

    fn open_lease(&self, group: ResourceGroup, who: &str) -> Result<Lease> {
        let mut client = self.client();
        let (requests, outgoing) = mpsc::channel(2);
        let acquire = LeaseRequest::acquire(group, who);

        self.runtime.block_on(async move {
            requests.send(acquire).await.map_err(|_| lease_closed())?;
            let mut replies = client
                .lease(ReceiverStream::new(outgoing))
                .await
                .map_err(transport)?
                .into_inner();
            match replies.message().await.map_err(transport)? {
                Some(LeaseReply {
                    outcome: Some(LeaseOutcome::Granted(_)),
                }) => Ok(Lease { requests, replies }),
                Some(reply) => Err(reply.into_error("granted")),
                None => Err(lease_closed()),
            }
        })
    }

    fn close_lease(&self, lease: Lease) -> Result<()> {
        let Lease {
            requests,
            mut replies,
        } = lease;
        let limit = self.call_timeout;

        self.runtime.block_on(async move {
            requests
                .send(LeaseRequest::release())
                .await
                .map_err(|_| lease_closed())?;
            match within(limit, replies.message()).await?.map_err(transport)? {
                Some(LeaseReply {
                    outcome: Some(LeaseOutcome::Released(_)),
                }) => Ok(()),
                Some(reply) => Err(reply.into_error("released")),
                None => Err(lease_closed()),
            }
        })
    }
}

async fn within<F: Future>(limit: Duration, call: F) -> Result<F::Output> {
    tokio::time::timeout(limit, call).await.map_err(|_| {
        SetupError::Transport(format!("no reply from setup server within {:?}", limit))
    })
}

fn transport(status: Status) -> SetupError {
    match status.code() {
        Code::Unauthenticated | Code::FailedPrecondition => {
            SetupError::Transport(status.message().to_string())
        }
        code => SetupError::Transport(format!(
            "setup server call failed ({}): {}",
            code,
            status.message()
        )),
    }
}

fn lease_closed() -> SetupError {
    SetupError::Transport("lock lease stream closed by the setup server".to_string())
}

/// The error with its sources, which carry the useful part for transport errors.
fn describe(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn none() -> Empty {
    Empty {}
}

impl SetupApi for RemoteSetup {
    fn move_to(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        who: Option<&str>,
    ) -> Result<()> {
        self.call(Operation::MoveTo(MoveTo { x, y, z }), who)?
            .into_done()
    }

    fn stage_position(&self) -> Result<StagePosition> {
        self.call(Operation::StagePosition(none()), None)?
            .into_position()
    }

    fn laser_status(&self) -> Result<OutputStatus> {
        self.call(Operation::LaserStatus(none()), None)?
            .into_status()?
            .ok_or_else(|| SetupError::Transport("missing laser status in reply".to_string()))
    }

    fn set_laser_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetLaserStatus(output(status)), who)?
            .into_done()
    }

    fn laser_dac(&self) -> Result<u16> {
        self.call(Operation::LaserDac(none()), None)?.into_dac()
    }

    fn set_laser_dac(&self, dac: u16, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetLaserDac(u32::from(dac)), who)?
            .into_done()
    }

    fn laser_frequency(&self) -> Result<f64> {
        self.call(Operation::LaserFrequency(none()), None)?
            .into_number()
    }

    fn set_laser_frequency(&self, hz: f64, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetLaserFrequency(hz), who)?.into_done()
    }

    fn measure_bias_voltage(&self) -> Result<f64> {
        self.call(Operation::MeasureBiasVoltage(none()), None)?
            .into_number()
    }

    fn set_bias_voltage(&self, volts: f64, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetBiasVoltage(volts), who)?.into_done()
    }

    fn measure_bias_current(&self) -> Result<f64> {
        self.call(Operation::MeasureBiasCurrent(none()), None)?
            .into_number()
    }

    fn current_compliance(&self) -> Result<f64> {
        self.call(Operation::CurrentCompliance(none()), None)?
            .into_number()
    }

    fn set_current_compliance(&self, amperes: f64, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetCurrentCompliance(amperes), who)?
            .into_done()
    }

    fn bias_output_status(&self) -> Result<Option<OutputStatus>> {
        self.call(Operation::BiasOutputStatus(none()), None)?
            .into_status()
    }

    fn set_bias_output_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetBiasOutputStatus(output(status)), who)?
            .into_done()
    }

    fn configure_for_two_pulses(&self, who: Option<&str>) -> Result<()> {
        self.call(Operation::ConfigureForTwoPulses(none()), who)?
            .into_done()
    }

    fn configure_sequence_acquisition(&self, n: u32, who: Option<&str>) -> Result<()> {
        self.call(Operation::ConfigureSequenceAcquisition(n), who)?
            .into_done()
    }

    fn wait_for_trigger(&self) -> Result<()> {
        self.call(Operation::WaitForTrigger(none()), None)?
            .into_done()
    }

    fn get_waveform(&self, channel: u8) -> Result<Vec<Waveform>> {
        self.call(Operation::GetWaveform(u32::from(channel)), None)?
            .into_waveforms()
    }

    fn set_vdiv(&self, channel: u8, volts_per_div: f64, who: Option<&str>) -> Result<()> {
        let vdiv = Vdiv {
            channel: u32::from(channel),
            volts_per_div,
        };
        self.call(Operation::SetVdiv(vdiv), who)?.into_done()
    }

    fn measure_temperature(&self) -> Result<f64> {
        self.call(Operation::MeasureTemperature(none()), None)?
            .into_number()
    }

    fn measure_humidity(&self) -> Result<f64> {
        self.call(Operation::MeasureHumidity(none()), None)?
            .into_number()
    }

    fn peltier_voltage_setpoint(&self) -> Result<f64> {
        self.call(Operation::PeltierVoltageSetpoint(none()), None)?
            .into_number()
    }

    fn set_peltier_voltage(&self, volts: f64, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetPeltierVoltage(volts), who)?
            .into_done()
    }

    fn peltier_current_setpoint(&self) -> Result<f64> {
        self.call(Operation::PeltierCurrentSetpoint(none()), None)?
            .into_number()
    }

    fn set_peltier_current(&self, amperes: f64, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetPeltierCurrent(amperes), who)?
            .into_done()
    }

    fn measure_peltier_voltage(&self) -> Result<f64> {
        self.call(Operation::MeasurePeltierVoltage(none()), None)?
            .into_number()
    }

    fn measure_peltier_current(&self) -> Result<f64> {
        self.call(Operation::MeasurePeltierCurrent(none()), None)?
            .into_number()
    }

    fn peltier_status(&self) -> Result<Option<OutputStatus>> {
        self.call(Operation::PeltierStatus(none()), None)?
            .into_status()
    }

    fn set_peltier_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()> {
        self.call(Operation::SetPeltierStatus(output(status)), who)?
            .into_done()
    }

    /// Waits as long as the lock is held elsewhere.
    fn acquire(&self, group: ResourceGroup, who: &str) -> Result<()> {
        let lease = self.open_lease(group, who)?;
        self.leases
            .lock()
            .entry((group, who.to_string()))
            .or_default()
            .push(lease);
        Ok(())
    }

    fn release(&self, group: ResourceGroup, who: &str) -> Result<()> {
        let key = (group, who.to_string());
        let lease = {
            let mut leases = self.leases.lock();
            let lease = leases.get_mut(&key).and_then(Vec::pop);
            if leases.get(&key).is_some_and(Vec::is_empty) {
                leases.remove(&key);
            }
            lease
        };
        let lease = lease.ok_or_else(|| {
            SetupError::LockProtocol(format!(
                "'{}' does not hold '{}' through this connection",
                who, group
            ))
        })?;
        // A lease that fails to close cleanly still ends its stream, which
        // returns the lock on the server.
        self.close_lease(lease)
    }
}

/// Connect to the configured setup server as `who`.
pub fn connect_to_setup(config: &Config, who: &str) -> Result<Identified<RemoteSetup>> {
    let remote = RemoteSetup::connect(&config.address, &config.auth_token, config.call_timeout())?;
    Ok(Identified::new(remote, who))
}
