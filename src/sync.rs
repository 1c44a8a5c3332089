//! # State Synchronizer
//!
//! Periodically pulls the controller's state and reconciles the dashboard with
//! it. What a cycle does depends on the externally set [`ViewMode`]:
//!
//! - **Live**: project the process values onto the bound fields, append the
//!   reading to the rolling history, redraw the chart and rebuild the profile
//!   step editor.
//! - **Config**: resolve the pin selectors and project PID, guard and network
//!   settings.
//!
//! Cycles may overlap (timer ticks and operator actions both trigger them).
//! Each cycle takes a generation number before it fetches; a result that
//! arrives after a newer generation was applied is dropped as stale.
//!
//! A failed or undecodable fetch skips the cycle. Nothing is shown to the
//! operator, but the failure is logged and counted in [`SyncStats`] and
//! published as a [`SyncEvent`].

use crate::api::{ApiError, ControllerApi, DeviceState, ModeRequest, PidSaveRequest, ProfileSaveRequest, ProfileStep};
use crate::chart::{draw_chart, RenderError, Surface};
use crate::history::{ChartHistory, Sample};
use crate::pins::{self, PinError, PinMap, PinRole, PIN_CATALOG};
use crate::view::{plain_number, Bindings, DashboardView, Field, FieldValue, StepRow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Which synchronization path a cycle takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Live,
    Config,
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::Live => f.write_str("live"),
            ViewMode::Config => f.write_str("config"),
        }
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(ViewMode::Live),
            "config" => Ok(ViewMode::Config),
            other => Err(format!("unknown view mode '{}' (expected live or config)", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("controller request failed: {0}")]
    Api(#[from] ApiError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("pin map rejected: {0}")]
    Pins(#[from] PinError),
    #[error("no chart surface attached")]
    NoSurface,
}

/// Result of one synchronization cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The snapshot was projected onto the view.
    Applied,
    /// The fetch failed or returned something that is not device state.
    FetchFailed,
    /// A newer cycle had already been applied.
    Stale,
    /// Config view, but the controller does not report a pin map yet.
    NoPinMap,
}

/// Published after every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEvent {
    pub generation: u64,
    pub mode: ViewMode,
    pub outcome: CycleOutcome,
}

/// Counters distinguishing "nothing changed" from "the controller is unreachable".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub cycles: u64,
    pub applied: u64,
    pub fetch_failures: u64,
    pub consecutive_failures: u64,
    pub stale_dropped: u64,
    pub render_failures: u64,
}

struct Shared {
    mode: ViewMode,
    history: ChartHistory,
    view: DashboardView,
    surface: Option<Box<dyn Surface>>,
    stats: SyncStats,
    applied_generation: u64,
}

impl Shared {
    fn project_live(&mut self, state: &DeviceState) {
        let fields = &mut self.view.fields;
        if let Some(mode) = state.mode {
            fields.set(Field::Mode, FieldValue::text(mode.to_string()));
        }
        if let Some(manual) = state.is_manual() {
            fields.set(Field::SetpointBox, FieldValue::Flag(manual));
        }
        if let Some(setpoint) = state.setpoint {
            fields.set(Field::Setpoint, FieldValue::text(format!("{:.0}", setpoint)));
            fields.set(Field::SetpointNow, FieldValue::text(format!("{:.0}", setpoint)));
        }
        if let Some(temp) = state.temp {
            fields.set(Field::TempNow, FieldValue::text(format!("{:.1}", temp)));
        }
        if let Some(out) = state.out {
            fields.set(Field::OutputNow, FieldValue::text(format!("{:.0}", out)));
        }
        if let Some(max_temp) = state.max_temp_c {
            fields.set(Field::MaxTempNow, FieldValue::text(format!("{:.0}", max_temp)));
        }
        if let Some(sample_sec) = state.sample_sec {
            fields.set(Field::SampleNow, FieldValue::text(plain_number(sample_sec)));
        }
        if let Some(active) = state.active {
            fields.set(Field::HeatIndicator, FieldValue::heating(active));
        }

        // Both windows advance together; a missing reading plots as zero.
        self.history.record(Sample {
            temperature_c: state.temp.unwrap_or(0.0),
            duty_percent: state.out.unwrap_or(0.0),
        });

        if let Some(surface) = self.surface.as_deref_mut() {
            let temps = self.history.temperatures();
            let duties = self.history.duties();
            if let Err(e) = draw_chart(surface, &temps, &duties) {
                self.stats.render_failures += 1;
                tracing::warn!("Chart redraw failed: {}", e);
            }
        }

        if let Some(steps) = state.profile.as_ref().and_then(|p| p.steps.as_ref()) {
            self.view.steps = steps.iter().map(|s| StepRow::from_seconds(s.t, s.sec)).collect();
        }
    }

    /// Returns false when there is no pin map to reconcile.
    fn project_config(&mut self, state: &DeviceState) -> bool {
        let Some(pin_map) = state.pins.as_ref() else {
            return false;
        };

        let mut selectors = pins::resolve(pin_map, &PIN_CATALOG);
        selectors.extend(
            [PinRole::I2cSda, PinRole::I2cScl]
                .into_iter()
                .filter_map(|role| pins::fixed_selector(role, pin_map, &PIN_CATALOG)),
        );
        self.view.pin_selectors = selectors;

        let fields = &mut self.view.fields;
        if let Some(pid) = state.pid.as_ref() {
            for (field, value) in [
                (Field::Kp, pid.kp),
                (Field::Ki, pid.ki),
                (Field::Kd, pid.kd),
                (Field::WindowMs, pid.window_ms),
            ] {
                if let Some(value) = value {
                    fields.set(field, FieldValue::text(plain_number(value)));
                }
            }
        }
        if let Some(sample_sec) = state.sample_sec {
            fields.set(Field::SampleSec, FieldValue::text(plain_number(sample_sec)));
        }
        if let Some(max_temp) = state.max_temp_c {
            fields.set(Field::MaxTemp, FieldValue::text(plain_number(max_temp)));
        }
        let sta_enabled = state.net.as_ref().and_then(|n| n.sta_enabled).unwrap_or(false);
        fields.set(Field::StaEnabled, FieldValue::Flag(sta_enabled));
        true
    }
}

/// Owns the rolling history, the bound view and the chart surface, and keeps
/// them in step with the controller.
pub struct StateSynchronizer {
    api: Arc<dyn ControllerApi>,
    shared: Mutex<Shared>,
    next_generation: AtomicU64,
    events: broadcast::Sender<SyncEvent>,
}

impl StateSynchronizer {
    /// New synchronizer with empty history and every known field bound.
    pub fn new(api: Arc<dyn ControllerApi>, mode: ViewMode) -> Self {
        Self::with_view(api, mode, DashboardView::new(Bindings::all()))
    }

    pub fn with_view(api: Arc<dyn ControllerApi>, mode: ViewMode, view: DashboardView) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            shared: Mutex::new(Shared {
                mode,
                history: ChartHistory::new(),
                view,
                surface: None,
                stats: SyncStats::default(),
                applied_generation: 0,
            }),
            next_generation: AtomicU64::new(0),
            events,
        }
    }

    /// Attach the surface the chart is drawn on in live mode.
    pub async fn attach_surface(&self, surface: Box<dyn Surface>) {
        self.shared.lock().await.surface = Some(surface);
    }

    pub async fn set_view_mode(&self, mode: ViewMode) {
        let mut shared = self.shared.lock().await;
        if shared.mode != mode {
            tracing::info!("View mode: {} -> {}", shared.mode, mode);
            shared.mode = mode;
        }
    }

    pub async fn view_mode(&self) -> ViewMode {
        self.shared.lock().await.mode
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn stats(&self) -> SyncStats {
        self.shared.lock().await.stats.clone()
    }

    pub async fn history(&self) -> ChartHistory {
        self.shared.lock().await.history.clone()
    }

    pub async fn view(&self) -> DashboardView {
        self.shared.lock().await.view.clone()
    }

    /// Replace the rows of the profile step editor.
    pub async fn set_step_rows(&self, rows: Vec<StepRow>) {
        self.shared.lock().await.view.steps = rows;
    }

    /// Edit one row of the step editor. Returns false for an unknown index.
    pub async fn edit_step(&self, index: usize, row: StepRow) -> bool {
        let mut shared = self.shared.lock().await;
        match shared.view.steps.get_mut(index) {
            Some(slot) => {
                *slot = row;
                true
            }
            None => false,
        }
    }

    /// Save the attached chart surface's current frame.
    pub async fn export_chart(&self, path: &Path) -> Result<(), SyncError> {
        let shared = self.shared.lock().await;
        let surface = shared.surface.as_deref().ok_or(SyncError::NoSurface)?;
        surface.export_png(path)?;
        Ok(())
    }

    /// Save the chart to `path` after every applied live cycle, until the
    /// event channel closes. Lagging behind only skips snapshots.
    pub async fn write_snapshots(&self, mut events: broadcast::Receiver<SyncEvent>, path: &Path) {
        loop {
            match events.recv().await {
                Ok(event) if event.mode == ViewMode::Live && event.outcome == CycleOutcome::Applied => {
                    if let Err(e) = self.export_chart(path).await {
                        tracing::warn!("Failed to write chart snapshot: {}", e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Snapshot writer fell behind by {} cycles", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Run one cycle for the current view mode.
    pub async fn poll(&self) -> CycleOutcome {
        match self.view_mode().await {
            ViewMode::Live => self.sync_live().await,
            ViewMode::Config => self.sync_config().await,
        }
    }

    pub async fn sync_live(&self) -> CycleOutcome {
        self.cycle(ViewMode::Live).await
    }

    pub async fn sync_config(&self) -> CycleOutcome {
        self.cycle(ViewMode::Config).await
    }

    async fn cycle(&self, mode: ViewMode) -> CycleOutcome {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = self.api.fetch_state().await;

        let outcome = {
            let mut shared = self.shared.lock().await;
            shared.stats.cycles += 1;
            match fetched {
                Err(e) => {
                    shared.stats.fetch_failures += 1;
                    shared.stats.consecutive_failures += 1;
                    tracing::warn!(
                        "State fetch failed (generation {}, {} in a row): {}",
                        generation,
                        shared.stats.consecutive_failures,
                        e
                    );
                    CycleOutcome::FetchFailed
                }
                Ok(state) => {
                    shared.stats.consecutive_failures = 0;
                    if generation < shared.applied_generation {
                        shared.stats.stale_dropped += 1;
                        tracing::debug!(
                            "Dropping stale state (generation {} < {})",
                            generation,
                            shared.applied_generation
                        );
                        CycleOutcome::Stale
                    } else {
                        shared.applied_generation = generation;
                        let applied = match mode {
                            ViewMode::Live => {
                                shared.project_live(&state);
                                true
                            }
                            ViewMode::Config => shared.project_config(&state),
                        };
                        if applied {
                            shared.stats.applied += 1;
                            tracing::debug!("Applied {} state (generation {})", mode, generation);
                            CycleOutcome::Applied
                        } else {
                            tracing::debug!("Controller has not reported pins yet");
                            CycleOutcome::NoPinMap
                        }
                    }
                }
            }
        };

        let _ = self.events.send(SyncEvent { generation, mode, outcome });
        outcome
    }

    pub async fn start(&self) -> Result<CycleOutcome, SyncError> {
        tracing::info!("Starting run");
        self.api.start().await?;
        Ok(self.sync_live().await)
    }

    pub async fn stop(&self) -> Result<CycleOutcome, SyncError> {
        tracing::info!("Stopping run");
        self.api.stop().await?;
        Ok(self.sync_live().await)
    }

    /// Switch control mode; the setpoint is sent along for manual mode.
    pub async fn set_mode(&self, mode: i64, setpoint: f64) -> Result<CycleOutcome, SyncError> {
        tracing::info!("Setting mode {} with setpoint {:.0}", mode, setpoint);
        self.api.set_mode(ModeRequest { mode, set: setpoint }).await?;
        Ok(self.sync_live().await)
    }

    pub async fn add_profile_step(&self) -> Result<CycleOutcome, SyncError> {
        self.api.add_profile_step().await?;
        Ok(self.sync_live().await)
    }

    /// Send the step editor's rows as the active profile.
    pub async fn save_profile(&self) -> Result<CycleOutcome, SyncError> {
        let steps: Vec<ProfileStep> = self
            .shared
            .lock()
            .await
            .view
            .steps
            .iter()
            .map(|row| ProfileStep { t: row.temp_c, sec: row.seconds() })
            .collect();
        tracing::info!("Saving profile with {} steps", steps.len());
        self.api.save_profile(&ProfileSaveRequest { steps }).await?;
        Ok(self.sync_live().await)
    }

    /// Load a stored profile by name. A blank name does nothing.
    pub async fn load_profile(&self, name: &str) -> Result<Option<CycleOutcome>, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        tracing::info!("Loading profile '{}'", name);
        self.api.load_profile(name).await?;
        Ok(Some(self.sync_live().await))
    }

    pub async fn save_pins(&self, pins: &PinMap) -> Result<CycleOutcome, SyncError> {
        let pins = pins.for_save();
        pins::check_conflicts(&pins)?;
        tracing::info!("Saving pin map");
        self.api.save_pins(&pins).await?;
        Ok(self.sync_config().await)
    }

    pub async fn save_pid(&self, request: PidSaveRequest) -> Result<CycleOutcome, SyncError> {
        tracing::info!(
            "Saving PID: Kp={:.3}, Ki={:.3}, Kd={:.3}, window={} ms",
            request.kp,
            request.ki,
            request.kd,
            request.window_ms
        );
        self.api.save_pid(request).await?;
        Ok(self.sync_config().await)
    }

    /// Poll every `interval` until `shutdown` resolves. Each tick runs in its
    /// own task so a slow controller never delays the timer.
    pub async fn run<F>(self: Arc<Self>, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        tracing::info!("Polling controller every {} ms", interval.as_millis());
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Poll loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let sync = Arc::clone(&self);
                    tokio::spawn(async move {
                        sync.poll().await;
                    });
                }
            }
        }
    }
}
