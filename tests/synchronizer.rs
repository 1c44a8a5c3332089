// State synchronizer tests against a scripted controller

use async_trait::async_trait;
use kiln_dash::api::{
    ApiError, ControllerApi, DeviceState, ModeRequest, PidSaveRequest, ProfileSaveRequest, ProfileStep,
};
use kiln_dash::chart::{draw_chart, BitmapSurface, Rgb, DUTY_COLOR, GRID_COLOR, TEMP_COLOR};
use kiln_dash::pins::{PinError, PinMap, PinRole};
use kiln_dash::sync::SyncError;
use kiln_dash::view::{Bindings, DashboardView, Field, FieldValue, StepRow};
use kiln_dash::{CycleOutcome, StateSynchronizer, SyncEvent, ViewMode};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Fetch,
    Start,
    Stop,
    Mode(ModeRequest),
    AddStep,
    SaveProfile(ProfileSaveRequest),
    LoadProfile(String),
    SavePins(PinMap),
    SavePid(PidSaveRequest),
}

/// Serves `state` (or fails when it is `None`) and records every call.
#[derive(Default)]
struct FakeController {
    state: Mutex<Option<DeviceState>>,
    calls: Mutex<Vec<Call>>,
    held_fetch: Mutex<Option<oneshot::Receiver<DeviceState>>>,
    reject_mutations: Mutex<bool>,
}

impl FakeController {
    fn serving(state: DeviceState) -> Arc<Self> {
        let fake = Self::default();
        *fake.state.lock().unwrap() = Some(state);
        Arc::new(fake)
    }

    fn set_state(&self, state: Option<DeviceState>) {
        *self.state.lock().unwrap() = state;
    }

    /// The next fetch waits until a state is sent on the returned channel.
    fn hold_next_fetch(&self) -> oneshot::Sender<DeviceState> {
        let (tx, rx) = oneshot::channel();
        *self.held_fetch.lock().unwrap() = Some(rx);
        tx
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| *c != Call::Fetch).collect()
    }

    fn fetches(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Fetch).count()
    }

    fn record(&self, call: Call) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call);
        if *self.reject_mutations.lock().unwrap() {
            return Err(unavailable());
        }
        Ok(())
    }
}

fn unavailable() -> ApiError {
    ApiError::Status { path: "/api/state".to_string(), status: 503 }
}

#[async_trait]
impl ControllerApi for FakeController {
    async fn fetch_state(&self) -> Result<DeviceState, ApiError> {
        self.calls.lock().unwrap().push(Call::Fetch);
        let held = self.held_fetch.lock().unwrap().take();
        if let Some(rx) = held {
            return rx.await.map_err(|_| unavailable());
        }
        self.state.lock().unwrap().clone().ok_or_else(unavailable)
    }

    async fn start(&self) -> Result<(), ApiError> {
        self.record(Call::Start)
    }

    async fn stop(&self) -> Result<(), ApiError> {
        self.record(Call::Stop)
    }

    async fn set_mode(&self, request: ModeRequest) -> Result<(), ApiError> {
        self.record(Call::Mode(request))
    }

    async fn add_profile_step(&self) -> Result<(), ApiError> {
        self.record(Call::AddStep)
    }

    async fn save_profile(&self, request: &ProfileSaveRequest) -> Result<(), ApiError> {
        self.record(Call::SaveProfile(request.clone()))
    }

    async fn load_profile(&self, name: &str) -> Result<(), ApiError> {
        self.record(Call::LoadProfile(name.to_string()))
    }

    async fn save_pins(&self, pins: &PinMap) -> Result<(), ApiError> {
        self.record(Call::SavePins(pins.clone()))
    }

    async fn save_pid(&self, request: PidSaveRequest) -> Result<(), ApiError> {
        self.record(Call::SavePid(request))
    }
}

fn live_state() -> DeviceState {
    serde_json::from_value(json!({
        "temp": 24.3, "out": 57, "mode": 0, "setpoint": 180,
        "active": true, "maxTempC": 250, "sampleSec": 5
    }))
    .unwrap()
}

fn config_state() -> DeviceState {
    serde_json::from_value(json!({
        "pins": { "SSR": 16, "LED": 2, "BUZZ": 4, "BTN_A": -1, "I2C_SDA": 14, "I2C_SCL": 12 },
        "pid": { "Kp": 20, "Ki": 0.8, "Kd": 50, "windowMs": 1000 },
        "sampleSec": 5,
        "maxTempC": 950,
        "net": { "staEnabled": true }
    }))
    .unwrap()
}

fn synchronizer(fake: &Arc<FakeController>, mode: ViewMode) -> Arc<StateSynchronizer> {
    Arc::new(StateSynchronizer::new(fake.clone(), mode))
}

#[tokio::test]
async fn test_live_polls_fill_history_and_fields() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);

    assert_eq!(sync.poll().await, CycleOutcome::Applied);
    assert_eq!(sync.poll().await, CycleOutcome::Applied);

    let history = sync.history().await;
    assert_eq!(history.temperatures(), vec![24.3, 24.3]);
    assert_eq!(history.duties(), vec![57.0, 57.0]);

    let view = sync.view().await;
    assert_eq!(view.fields.text(Field::TempNow), Some("24.3"));
    assert_eq!(view.fields.text(Field::OutputNow), Some("57"));
    assert_eq!(view.fields.text(Field::Setpoint), Some("180"));
    assert_eq!(view.fields.text(Field::SetpointNow), Some("180"));
    assert_eq!(view.fields.text(Field::MaxTempNow), Some("250"));
    assert_eq!(view.fields.text(Field::SampleNow), Some("5"));
    assert_eq!(view.fields.text(Field::Mode), Some("0"));
    assert_eq!(view.fields.flag(Field::SetpointBox), Some(true));
    assert_eq!(view.fields.get(Field::HeatIndicator), Some(&FieldValue::heating(true)));
    assert_eq!(view.fields.text(Field::HeatIndicator), Some("HEATING"));

    let stats = sync.stats().await;
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.applied, 2);
}

#[tokio::test]
async fn test_profile_mode_hides_setpoint_box_and_idle_indicator() {
    let mut state = live_state();
    state.mode = Some(1);
    state.active = Some(false);
    let fake = FakeController::serving(state);
    let sync = synchronizer(&fake, ViewMode::Live);

    sync.poll().await;
    let view = sync.view().await;
    assert_eq!(view.fields.flag(Field::SetpointBox), Some(false));
    assert_eq!(view.fields.text(Field::HeatIndicator), Some("OFF"));
}

#[tokio::test]
async fn test_failed_fetch_changes_nothing() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);
    sync.poll().await;
    let before = sync.view().await;

    fake.set_state(None);
    assert_eq!(sync.poll().await, CycleOutcome::FetchFailed);
    assert_eq!(sync.poll().await, CycleOutcome::FetchFailed);

    assert_eq!(sync.history().await.len(), 1);
    assert_eq!(sync.view().await, before);
    let stats = sync.stats().await;
    assert_eq!(stats.fetch_failures, 2);
    assert_eq!(stats.consecutive_failures, 2);

    fake.set_state(Some(live_state()));
    assert_eq!(sync.poll().await, CycleOutcome::Applied);
    assert_eq!(sync.stats().await.consecutive_failures, 0);
    assert_eq!(sync.history().await.len(), 2);
}

#[tokio::test]
async fn test_missing_reading_keeps_buffers_aligned() {
    let mut state = live_state();
    state.temp = None;
    let fake = FakeController::serving(state);
    let sync = synchronizer(&fake, ViewMode::Live);
    sync.poll().await;

    let history = sync.history().await;
    assert_eq!(history.temperatures(), vec![0.0]);
    assert_eq!(history.duties(), vec![57.0]);
    assert_eq!(sync.view().await.fields.get(Field::TempNow), None);
}

#[tokio::test]
async fn test_history_window_is_bounded() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);
    for _ in 0..130 {
        sync.poll().await;
    }
    let history = sync.history().await;
    assert_eq!(history.temperatures().len(), 120);
    assert_eq!(history.duties().len(), 120);
}

#[tokio::test]
async fn test_unbound_fields_are_tolerated() {
    let fake = FakeController::serving(live_state());
    let view = DashboardView::new(Bindings::with_fields([Field::TempNow]));
    let sync = Arc::new(StateSynchronizer::with_view(fake.clone(), ViewMode::Live, view));

    assert_eq!(sync.poll().await, CycleOutcome::Applied);
    let view = sync.view().await;
    assert_eq!(view.fields.text(Field::TempNow), Some("24.3"));
    assert!(!view.fields.is_bound(Field::OutputNow));
    assert_eq!(view.fields.iter().count(), 1);
    assert_eq!(sync.history().await.len(), 1);
}

fn reading(temp: f64, out: f64) -> DeviceState {
    let mut state = live_state();
    state.temp = Some(temp);
    state.out = Some(out);
    state
}

fn exported_frame(path: &std::path::Path) -> Vec<u8> {
    image::open(path).unwrap().to_rgb8().into_raw()
}

#[tokio::test]
async fn test_live_cycle_redraws_attached_surface() {
    let fake = FakeController::serving(reading(20.0, 0.0));
    let sync = synchronizer(&fake, ViewMode::Live);
    sync.attach_surface(Box::new(BitmapSurface::new(640, 1.0))).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chart.png");

    assert_eq!(sync.poll().await, CycleOutcome::Applied);
    sync.export_chart(&path).await.unwrap();
    let first = exported_frame(&path);

    fake.set_state(Some(reading(30.0, 100.0)));
    assert_eq!(sync.poll().await, CycleOutcome::Applied);
    sync.export_chart(&path).await.unwrap();
    let second = exported_frame(&path);
    assert_ne!(first, second);
    assert_eq!(sync.stats().await.render_failures, 0);

    // The frame is exactly the chart of the current window.
    let history = sync.history().await;
    let mut expected = BitmapSurface::new(640, 1.0);
    draw_chart(&mut expected, &history.temperatures(), &history.duties()).unwrap();
    assert_eq!(second.as_slice(), expected.as_raw());

    let image = image::open(&path).unwrap().to_rgb8();
    let has = |color: Rgb| image.pixels().any(|p| p.0 == [color.0, color.1, color.2]);
    assert!(has(GRID_COLOR));
    assert!(has(DUTY_COLOR));
    assert!(has(TEMP_COLOR));
    let p = image.get_pixel(599, 150).0;
    assert_eq!(Rgb(p[0], p[1], p[2]), DUTY_COLOR);
}

#[tokio::test]
async fn test_snapshot_writer_survives_lag() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);
    sync.attach_surface(Box::new(BitmapSurface::new(320, 1.0))).await;
    let events = sync.subscribe();

    // More cycles than the event channel holds.
    for _ in 0..70 {
        sync.poll().await;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.png");
    let writer = {
        let sync = sync.clone();
        let path = path.clone();
        tokio::spawn(async move { sync.write_snapshots(events, &path).await })
    };

    let written = tokio::time::timeout(Duration::from_secs(5), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    writer.abort();
    assert!(written.is_ok(), "snapshot writer stopped after falling behind");
}

#[tokio::test]
async fn test_export_without_surface() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);
    let dir = tempfile::tempdir().unwrap();
    assert!(sync.export_chart(&dir.path().join("chart.png")).await.is_err());
}

#[tokio::test]
async fn test_step_rows_use_whole_minutes() {
    let mut state = live_state();
    state.profile = serde_json::from_value(json!({ "steps": [ { "t": 600, "sec": 3600 }, { "t": 1000, "sec": 90 } ] }))
        .unwrap();
    let fake = FakeController::serving(state);
    let sync = synchronizer(&fake, ViewMode::Live);
    sync.poll().await;

    let steps = sync.view().await.steps;
    assert_eq!(
        steps,
        vec![StepRow { temp_c: 600.0, minutes: 60 }, StepRow { temp_c: 1000.0, minutes: 1 }]
    );
}

#[tokio::test]
async fn test_config_without_pins_is_skipped() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Config);

    assert_eq!(sync.poll().await, CycleOutcome::NoPinMap);
    let view = sync.view().await;
    assert!(view.pin_selectors.is_empty());
    assert_eq!(view.fields.get(Field::Kp), None);
    assert!(sync.history().await.is_empty());
}

#[tokio::test]
async fn test_config_projection() {
    let fake = FakeController::serving(config_state());
    let sync = synchronizer(&fake, ViewMode::Config);

    assert_eq!(sync.poll().await, CycleOutcome::Applied);
    let view = sync.view().await;

    assert_eq!(view.pin_selectors.len(), 10);
    let fixed: Vec<_> = view.pin_selectors.iter().filter(|s| s.read_only).collect();
    assert_eq!(fixed.len(), 2);
    assert_eq!(fixed[0].role, PinRole::I2cSda);
    assert_eq!(fixed[0].options[0].label, "D5 (14)");
    assert_eq!(fixed[1].options[0].label, "D6 (12)");

    let led = view.pin_selectors.iter().find(|s| s.role == PinRole::Led).unwrap();
    assert_eq!(led.selected().map(|o| o.label.as_str()), Some("D4 (2)"));

    assert_eq!(view.fields.text(Field::Kp), Some("20"));
    assert_eq!(view.fields.text(Field::Ki), Some("0.8"));
    assert_eq!(view.fields.text(Field::Kd), Some("50"));
    assert_eq!(view.fields.text(Field::WindowMs), Some("1000"));
    assert_eq!(view.fields.text(Field::SampleSec), Some("5"));
    assert_eq!(view.fields.text(Field::MaxTemp), Some("950"));
    assert_eq!(view.fields.flag(Field::StaEnabled), Some(true));

    // config cycles leave the chart alone
    assert!(sync.history().await.is_empty());
}

#[tokio::test]
async fn test_sta_flag_defaults_off() {
    let mut state = config_state();
    state.net = None;
    let fake = FakeController::serving(state);
    let sync = synchronizer(&fake, ViewMode::Config);
    sync.poll().await;
    assert_eq!(sync.view().await.fields.flag(Field::StaEnabled), Some(false));
}

#[tokio::test]
async fn test_view_mode_switch() {
    let fake = FakeController::serving(config_state());
    let sync = synchronizer(&fake, ViewMode::Live);
    sync.poll().await;
    assert!(sync.view().await.pin_selectors.is_empty());

    sync.set_view_mode(ViewMode::Config).await;
    assert_eq!(sync.view_mode().await, ViewMode::Config);
    sync.poll().await;
    assert_eq!(sync.view().await.pin_selectors.len(), 10);
    assert_eq!(sync.history().await.len(), 1);
}

#[tokio::test]
async fn test_stale_result_is_dropped() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);

    let release = fake.hold_next_fetch();
    let slow = {
        let sync = sync.clone();
        tokio::spawn(async move { sync.sync_live().await })
    };
    while fake.fetches() == 0 {
        tokio::task::yield_now().await;
    }

    let mut newer = live_state();
    newer.temp = Some(30.0);
    fake.set_state(Some(newer));
    assert_eq!(sync.sync_live().await, CycleOutcome::Applied);

    let mut older = live_state();
    older.temp = Some(10.0);
    release.send(older).unwrap();
    assert_eq!(slow.await.unwrap(), CycleOutcome::Stale);

    assert_eq!(sync.history().await.temperatures(), vec![30.0]);
    assert_eq!(sync.view().await.fields.text(Field::TempNow), Some("30.0"));
    assert_eq!(sync.stats().await.stale_dropped, 1);
}

#[tokio::test]
async fn test_cycles_publish_events() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);
    let mut events = sync.subscribe();

    sync.poll().await;
    fake.set_state(None);
    sync.poll().await;

    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent { generation: 1, mode: ViewMode::Live, outcome: CycleOutcome::Applied }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent { generation: 2, mode: ViewMode::Live, outcome: CycleOutcome::FetchFailed }
    );
}

#[tokio::test]
async fn test_run_polls_until_shutdown() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);
    let mut events = sync.subscribe();

    let (stop, stopped) = oneshot::channel::<()>();
    let runner = tokio::spawn(sync.clone().run(std::time::Duration::from_millis(10), async move {
        let _ = stopped.await;
    }));

    for _ in 0..2 {
        let event = events.recv().await.unwrap();
        assert_eq!(event.outcome, CycleOutcome::Applied);
    }
    stop.send(()).unwrap();
    runner.await.unwrap();
    assert!(sync.stats().await.cycles >= 2);
}

#[tokio::test]
async fn test_mutations_resync() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);

    assert_eq!(sync.start().await.unwrap(), CycleOutcome::Applied);
    assert_eq!(sync.stop().await.unwrap(), CycleOutcome::Applied);
    assert_eq!(sync.set_mode(0, 180.0).await.unwrap(), CycleOutcome::Applied);
    assert_eq!(sync.add_profile_step().await.unwrap(), CycleOutcome::Applied);

    assert_eq!(
        fake.calls(),
        vec![
            Call::Start,
            Call::Fetch,
            Call::Stop,
            Call::Fetch,
            Call::Mode(ModeRequest { mode: 0, set: 180.0 }),
            Call::Fetch,
            Call::AddStep,
            Call::Fetch,
        ]
    );
    assert_eq!(sync.history().await.len(), 4);
}

#[tokio::test]
async fn test_rejected_mutation_is_reported_without_resync() {
    let fake = FakeController::serving(live_state());
    *fake.reject_mutations.lock().unwrap() = true;
    let sync = synchronizer(&fake, ViewMode::Live);

    assert!(sync.start().await.is_err());
    assert_eq!(fake.fetches(), 0);
}

#[tokio::test]
async fn test_save_profile_sends_seconds() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);

    sync.set_step_rows(vec![StepRow { temp_c: 600.0, minutes: 60 }, StepRow { temp_c: 1000.0, minutes: 1 }])
        .await;
    assert!(sync.edit_step(1, StepRow { temp_c: 1050.0, minutes: 2 }).await);
    assert!(!sync.edit_step(5, StepRow { temp_c: 0.0, minutes: 0 }).await);
    sync.save_profile().await.unwrap();

    let expected = ProfileSaveRequest {
        steps: vec![ProfileStep { t: 600.0, sec: 3600 }, ProfileStep { t: 1050.0, sec: 120 }],
    };
    assert_eq!(fake.mutations(), vec![Call::SaveProfile(expected)]);
}

#[tokio::test]
async fn test_load_profile_trims_and_skips_blank() {
    let fake = FakeController::serving(live_state());
    let sync = synchronizer(&fake, ViewMode::Live);

    assert_eq!(sync.load_profile("   ").await.unwrap(), None);
    assert!(fake.calls().is_empty());

    assert_eq!(sync.load_profile(" bisque ").await.unwrap(), Some(CycleOutcome::Applied));
    assert_eq!(fake.calls(), vec![Call::LoadProfile("bisque".to_string()), Call::Fetch]);
}

#[tokio::test]
async fn test_save_pins_forces_fixed_i2c() {
    let fake = FakeController::serving(config_state());
    let sync = synchronizer(&fake, ViewMode::Config);

    let edited = PinMap::default()
        .with(PinRole::Ssr, 5)
        .with(PinRole::I2cSda, 4)
        .with(PinRole::I2cScl, 0);
    assert_eq!(sync.save_pins(&edited).await.unwrap(), CycleOutcome::Applied);

    let expected = PinMap::default()
        .with(PinRole::Ssr, 5)
        .with(PinRole::I2cSda, 14)
        .with(PinRole::I2cScl, 12);
    assert_eq!(fake.calls(), vec![Call::SavePins(expected), Call::Fetch]);
}

#[tokio::test]
async fn test_save_pins_rejects_shared_pin() {
    let fake = FakeController::serving(config_state());
    let sync = synchronizer(&fake, ViewMode::Config);

    let clashing = PinMap::default().with(PinRole::Ssr, 2).with(PinRole::Led, 2);
    match sync.save_pins(&clashing).await {
        Err(SyncError::Pins(PinError::Conflict { pin, first, second })) => {
            assert_eq!(pin, 2);
            assert_eq!((first, second), (PinRole::Ssr, PinRole::Led));
        }
        other => panic!("expected a pin conflict, got {:?}", other),
    }
    assert!(fake.calls().is_empty());

    // Unassigned roles never clash.
    let freed = PinMap::default().with(PinRole::Ssr, 2).with(PinRole::Led, -1).with(PinRole::Buzz, -1);
    assert_eq!(sync.save_pins(&freed).await.unwrap(), CycleOutcome::Applied);
}

#[tokio::test]
async fn test_save_pid_resyncs_config() {
    let fake = FakeController::serving(config_state());
    let sync = synchronizer(&fake, ViewMode::Live);

    let request = PidSaveRequest { kp: 20.0, ki: 0.8, kd: 50.0, window_ms: 1000, sample_sec: 5, max_temp_c: 950.0 };
    assert_eq!(sync.save_pid(request).await.unwrap(), CycleOutcome::Applied);
    assert_eq!(fake.mutations(), vec![Call::SavePid(request)]);
    assert_eq!(sync.view().await.fields.text(Field::Kp), Some("20"));
}
