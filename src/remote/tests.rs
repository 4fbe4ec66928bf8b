//! Tests for the remote setup over loopback gRPC.

use super::proto::setup_service_client::SetupServiceClient;
use super::proto::{
    CallReply, CallRequest, ErrorReply, Operation, Outcome, TOKEN_HEADER, output,
};
use super::*;
use crate::config::Config;
use crate::context::SetupContext;
use crate::error::SetupError;
use crate::events::{EventAction, read_events};
use crate::instruments::OutputStatus;
use crate::instruments::simulated::*;
use crate::locks::{NamedMutex, ResourceGroup, ResourceLockSet};
use crate::setup::{
    AcquisitionBackend, BiasBackend, Identified, NamedLockSetup, SetupApi, TctSetup,
};
use std::net::TcpListener;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TOKEN: &str = "abracadabra";
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

struct Fixture {
    _home: TempDir,
    ctx: SetupContext,
    server: ServerHandle,
}

impl Fixture {
    /// Server over a named-lock setup with audit logging in a temp home.
    fn start() -> Self {
        let setup = TctSetup::new()
            .with_tct(SimulatedTct::new())
            .with_bias(BiasBackend::keithley(SimulatedBiasSupply::new()))
            .with_acquisition(AcquisitionBackend::digitizer(SimulatedDigitizer::new()))
            .with_environment_sensor(SimulatedEnvironmentSensor::new(22.5, 30.0));
        Self::serving(setup)
    }

    fn serving(setup: TctSetup) -> Self {
        let home = TempDir::new().unwrap();
        let config = Config {
            lock_poll_interval_ms: 5,
            ..Config::default()
        };
        let ctx = SetupContext::resolve_from(home.path()).with_config(&config);
        let named = NamedLockSetup::new(setup, ResourceLockSet::from_config(&ctx, &config));
        let server = SetupServer::bind("127.0.0.1:0", Arc::new(named), TOKEN)
            .unwrap()
            .with_audit_log(ctx.events_path())
            .spawn()
            .unwrap();
        Self {
            _home: home,
            ctx,
            server,
        }
    }

    fn address(&self) -> String {
        self.server.local_addr().to_string()
    }

    fn connect(&self) -> RemoteSetup {
        RemoteSetup::connect(&self.address(), TOKEN, CALL_TIMEOUT).unwrap()
    }

    fn connect_as(&self, who: &str) -> Identified<RemoteSetup> {
        Identified::new(self.connect(), who)
    }

    fn connect_with_timeout(&self, who: &str, call_timeout: Duration) -> Identified<RemoteSetup> {
        let remote = RemoteSetup::connect(&self.address(), TOKEN, call_timeout).unwrap();
        Identified::new(remote, who)
    }

    fn lock_holder(&self, group: ResourceGroup) -> Option<String> {
        NamedMutex::new(&self.ctx.lock_dir, group.as_str())
            .state()
            .unwrap()
            .map(|state| state.holder)
    }
}

#[test]
fn test_remote_calls_reach_the_setup() {
    let fixture = Fixture::start();
    let setup = fixture.connect_as("scan");

    setup.move_to(Some(1e-3), None, Some(2e-3)).unwrap();
    setup.set_laser_dac(640).unwrap();
    setup.set_laser_status(OutputStatus::On).unwrap();
    setup.set_bias_output_status(OutputStatus::On).unwrap();
    setup.set_bias_voltage(-150.0).unwrap();

    let position = setup.stage_position().unwrap();
    assert_eq!((position.x, position.y, position.z), (1e-3, 0.0, 2e-3));
    assert_eq!(setup.laser_dac().unwrap(), 640);
    assert_eq!(setup.laser_status().unwrap(), OutputStatus::On);
    assert_eq!(setup.measure_bias_voltage().unwrap(), -150.0);
    assert_eq!(setup.bias_output_status().unwrap(), Some(OutputStatus::On));
    assert_eq!(setup.measure_temperature().unwrap(), 22.5);
}

#[test]
fn test_remote_waveforms() {
    let fixture = Fixture::start();
    let setup = fixture.connect_as("scan");

    setup.configure_sequence_acquisition(2).unwrap();
    setup.wait_for_trigger().unwrap();
    let waveforms = setup.get_waveform(0).unwrap();

    assert_eq!(waveforms.len(), 2);
    assert!(!waveforms[0].is_empty());
}

#[test]
fn test_nan_readings_cross_the_wire() {
    let fixture = Fixture::start();
    let setup = fixture.connect();

    // No Peltier supply in the fixture
    assert!(setup.measure_peltier_voltage().unwrap().is_nan());
    assert_eq!(setup.peltier_status().unwrap(), None);
}

#[test]
fn test_remote_errors_keep_their_variant() {
    let fixture = Fixture::start();
    let setup = fixture.connect();

    assert!(matches!(
        setup.set_laser_dac(5000, Some("scan")),
        Err(SetupError::InvalidInput(_))
    ));
    assert_eq!(
        setup.set_bias_voltage(1.0, None).unwrap_err(),
        SetupError::IdentityRequired("set_bias_voltage".to_string())
    );
    assert!(matches!(
        setup.release(ResourceGroup::Tct, "scan"),
        Err(SetupError::LockProtocol(_))
    ));

    // The connection survives errors raised by the setup
    assert_eq!(setup.laser_dac().unwrap(), 0);
}

#[test]
fn test_every_error_kind_maps_back_to_its_variant() {
    let errors = [
        SetupError::InvalidInput("a".to_string()),
        SetupError::Config("b".to_string()),
        SetupError::IdentityRequired("c".to_string()),
        SetupError::Unsupported("d".to_string()),
        SetupError::LockProtocol("e".to_string()),
        SetupError::Lock("f".to_string()),
        SetupError::HardwareTimeout("g".to_string()),
        SetupError::Instrument("h".to_string()),
        SetupError::Transport("i".to_string()),
    ];

    for error in errors {
        assert_eq!(SetupError::from(ErrorReply::from(&error)), error);
    }

    let unknown = ErrorReply {
        kind: 99,
        message: "boom".to_string(),
    };
    assert!(matches!(SetupError::from(unknown), SetupError::Transport(ref m) if m.contains("boom")));
}

#[test]
fn test_wrong_token_is_rejected() {
    let fixture = Fixture::start();

    let err = RemoteSetup::connect(&fixture.address(), "hocus pocus", CALL_TIMEOUT)
        .err()
        .unwrap();

    assert!(matches!(err, SetupError::Transport(ref m) if m.contains("token")));
}

#[test]
fn test_unreachable_server_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = RemoteSetup::connect(&address, TOKEN, Duration::from_secs(1))
        .err()
        .unwrap();

    assert!(matches!(err, SetupError::Transport(_)));
}

#[test]
fn test_identity_is_injected_remotely() {
    let fixture = Fixture::start();
    let setup = fixture.connect_as("abc");

    setup.set_laser_frequency(100.0).unwrap();
    assert_eq!(setup.laser_frequency().unwrap(), 100.0);

    let events = read_events(&fixture.ctx.events_path()).unwrap();
    let lock_events: Vec<_> = events
        .iter()
        .filter(|e| e.lock.as_deref() == Some("tct"))
        .collect();
    assert_eq!(lock_events.len(), 2);
    assert!(lock_events.iter().all(|e| e.actor == "abc"));
    assert!(events.iter().any(|e| e.action == EventAction::ServerStart));
}

#[test]
fn test_remote_hold_blocks_other_client() {
    let fixture = Fixture::start();
    let a = fixture.connect_as("client A");
    let b = fixture.connect_as("client B");

    let hold = a.hold_control_of_bias().unwrap();

    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        b.set_bias_voltage(-10.0).unwrap();
        tx.send(Instant::now()).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    a.set_bias_voltage(-20.0).unwrap();
    let released_at = Instant::now();
    hold.release().unwrap();

    let done_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(done_at >= released_at);
    handle.join().unwrap();
}

#[test]
fn test_queued_setter_outlasts_call_timeout() {
    let fixture = Fixture::start();
    let a = fixture.connect_as("iv curve");
    let b = fixture.connect_with_timeout("scan", Duration::from_secs(1));

    let hold = a.hold_control_of_bias().unwrap();

    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let result = b.set_bias_voltage(-500.0);
        let voltage = b.measure_bias_voltage();
        tx.send((result, voltage)).unwrap();
    });

    // Well past the one second read deadline
    assert!(rx.recv_timeout(Duration::from_millis(1500)).is_err());
    hold.release().unwrap();

    let (result, voltage) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    result.unwrap();
    assert_eq!(voltage.unwrap(), -500.0);
    handle.join().unwrap();
}

#[test]
fn test_reads_proceed_while_another_thread_waits_for_lock() {
    let fixture = Fixture::start();
    let other = fixture.connect_as("other");
    let me = Arc::new(fixture.connect_as("me"));

    let held = other.hold_tct_control().unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let me = Arc::clone(&me);
        thread::spawn(move || {
            let hold = me.hold_tct_control().unwrap();
            tx.send(()).unwrap();
            hold.release().unwrap();
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(rx.try_recv().is_err());

    let start = Instant::now();
    assert_eq!(me.measure_temperature().unwrap(), 22.5);
    assert!(start.elapsed() < Duration::from_secs(1));

    held.release().unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    waiter.join().unwrap();
}

#[test]
fn test_other_groups_stay_available_remotely() {
    let fixture = Fixture::start();
    let a = fixture.connect_as("scan");
    let b = fixture.connect_as("iv curve");

    let _tct = a.hold_tct_control().unwrap();
    let start = Instant::now();
    for _ in 0..3 {
        let hold = b.hold_control_of_bias().unwrap();
        hold.release().unwrap();
    }

    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_reentrant_remote_holds() {
    let fixture = Fixture::start();
    let setup = fixture.connect_as("scan");

    setup.acquire(ResourceGroup::Bias).unwrap();
    setup.acquire(ResourceGroup::Bias).unwrap();
    setup.release(ResourceGroup::Bias).unwrap();
    assert_eq!(fixture.lock_holder(ResourceGroup::Bias).as_deref(), Some("scan"));

    setup.release(ResourceGroup::Bias).unwrap();
    assert_eq!(fixture.lock_holder(ResourceGroup::Bias), None);
    assert!(matches!(
        setup.release(ResourceGroup::Bias),
        Err(SetupError::LockProtocol(_))
    ));
}

#[test]
fn test_disconnect_releases_holds() {
    let fixture = Fixture::start();
    let crashed = fixture.connect_as("crashed scan");
    crashed.acquire(ResourceGroup::Tct).unwrap();
    crashed.acquire(ResourceGroup::Tct).unwrap();
    drop(crashed);

    let next = fixture.connect_as("next scan");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = next.acquire(ResourceGroup::Tct);
        tx.send(result).unwrap();
    });

    rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    let events = read_events(&fixture.ctx.events_path()).unwrap();
    let disconnect = events
        .iter()
        .find(|e| e.action == EventAction::DisconnectRelease)
        .unwrap();
    assert_eq!(disconnect.actor, "crashed scan");
    assert_eq!(disconnect.lock.as_deref(), Some("tct"));
}

#[test]
fn test_read_timeout_leaves_proxy_usable() {
    let setup = TctSetup::new()
        .with_tct(SimulatedTct::new())
        .with_acquisition(AcquisitionBackend::oscilloscope(
            SimulatedScope::oscilloscope().never_triggers(),
        ))
        .with_trigger_timeout(Duration::from_secs(2));
    let fixture = Fixture::serving(setup);
    let remote = fixture.connect_with_timeout("scan", Duration::from_millis(200));

    let err = remote.wait_for_trigger().unwrap_err();
    assert!(matches!(err, SetupError::Transport(ref m) if m.contains("no reply")));

    assert_eq!(remote.laser_dac().unwrap(), 0);
}

#[test]
fn test_hold_released_after_trigger_timeout() {
    let setup = TctSetup::new().with_acquisition(AcquisitionBackend::oscilloscope(
        SimulatedScope::oscilloscope().never_triggers(),
    ));
    let fixture = Fixture::serving(setup.with_trigger_timeout(Duration::from_secs(2)));
    let a = fixture.connect_with_timeout("scan A", Duration::from_millis(200));
    let b = fixture.connect_as("scan B");

    {
        let _hold = a.hold_signal_acquisition().unwrap();
        assert!(matches!(
            a.wait_for_trigger(),
            Err(SetupError::Transport(_))
        ));
    }
    assert_eq!(fixture.lock_holder(ResourceGroup::SignalAcquisition), None);

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = b.acquire(ResourceGroup::SignalAcquisition);
        tx.send(result).unwrap();
    });
    rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
}

#[test]
fn test_plain_setup_served_without_named_locks() {
    let server = SetupServer::bind("127.0.0.1:0", Arc::new(TctSetup::new()), TOKEN)
        .unwrap()
        .spawn()
        .unwrap();
    let setup = Identified::new(
        RemoteSetup::connect(&server.local_addr().to_string(), TOKEN, CALL_TIMEOUT).unwrap(),
        "abc",
    );

    setup.set_bias_voltage(5.0).unwrap();
    assert!(setup.measure_bias_voltage().unwrap().is_nan());
    assert!(matches!(
        setup.hold_tct_control(),
        Err(SetupError::Unsupported(_))
    ));
}

#[test]
fn test_malformed_call_gets_error_reply() {
    let fixture = Fixture::start();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let replies: Vec<CallReply> = runtime.block_on(async {
        let endpoint = format!("http://{}", fixture.address());
        let channel = tonic::transport::Endpoint::from_shared(endpoint)
            .unwrap()
            .connect()
            .await
            .unwrap();
        let mut client =
            SetupServiceClient::with_interceptor(channel, |mut request: tonic::Request<()>| {
                request
                    .metadata_mut()
                    .insert(TOKEN_HEADER, TOKEN.parse().unwrap());
                Ok::<_, tonic::Status>(request)
            });

        let mut replies = Vec::new();
        for op in [
            None,
            Some(Operation::SetLaserStatus(0)),
            Some(Operation::GetWaveform(300)),
            Some(Operation::SetLaserStatus(output(OutputStatus::On))),
        ] {
            let request = CallRequest {
                who: Some("raw".to_string()),
                op,
            };
            replies.push(client.call(request).await.unwrap().into_inner());
        }
        replies
    });

    let results: Vec<_> = replies.into_iter().map(CallReply::into_outcome).collect();
    assert!(matches!(results[0], Err(SetupError::InvalidInput(_))));
    assert!(matches!(results[1], Err(SetupError::InvalidInput(_))));
    assert!(matches!(results[2], Err(SetupError::InvalidInput(_))));
    assert!(matches!(results[3], Ok(Outcome::Done(_))));
}

#[test]
fn test_shutdown_stops_accepting() {
    let fixture = Fixture::start();
    let address = fixture.address();
    let connected = fixture.connect();
    assert_eq!(connected.laser_dac().unwrap(), 0);
    drop(connected);

    fixture.server.shutdown();

    assert!(RemoteSetup::connect(&address, TOKEN, Duration::from_secs(1)).is_err());
}
