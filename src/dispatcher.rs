// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Turns filtered key edges into shots on the audio graph.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, error, info, span, warn, Level};

use crate::audio::{AudioError, AudioGraph, Shot, ShotParams};
use crate::input::{KeyEdgeFilter, RawKeyEvent};
use crate::keys::{self, Edge, KeyEdge};
use crate::pack::{PackId, SoundPack};
use crate::samples::{PackBinder, PackReady, SampleBank};
use crate::service::{Signal, Signals};
use crate::settings::AppSettings;
use crate::util::human_bytes;

/// Edges closer together than this count as rapid typing.
const RAPID_INTERVAL: Duration = Duration::from_millis(100);
const SPEED_STEP: f64 = 0.1;
const RAPID_THRESHOLD: f64 = 0.5;

/// Volume multiplier applied while typing rapidly.
pub const RAPID_TYPING_MULTIPLIER: f32 = 0.6;

/// Where the dispatcher is in its lifecycle. Edges only produce shots when active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Disabled with no pack bound.
    Idle,
    /// Either enabled or bound, but not both.
    Armed,
    Active,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Idle => write!(f, "idle"),
            DispatcherState::Armed => write!(f, "armed"),
            DispatcherState::Active => write!(f, "active"),
        }
    }
}

/// A rolling estimate of how fast the user is typing, from 0 to 1.
#[derive(Debug)]
pub struct TypingSpeed {
    last: Instant,
    score: f64,
}

impl TypingSpeed {
    pub fn new(now: Instant) -> TypingSpeed {
        TypingSpeed {
            last: now,
            score: 0.0,
        }
    }

    /// Records an edge and returns the new score. Rapid edges raise the score one step;
    /// slower ones lower it one step per elapsed interval.
    pub fn update(&mut self, now: Instant) -> f64 {
        let dt = now.saturating_duration_since(self.last);
        self.last = self.last.max(now);
        if dt < RAPID_INTERVAL {
            self.score = (self.score + SPEED_STEP).min(1.0);
        } else {
            let steps = (dt.as_millis() / RAPID_INTERVAL.as_millis()) as f64;
            self.score = (self.score - SPEED_STEP * steps).max(0.0);
        }
        self.score
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn is_rapid(&self) -> bool {
        self.score > RAPID_THRESHOLD
    }
}

/// Counters published by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    presses: AtomicU64,
    shots: AtomicU64,
}

impl DispatcherStats {
    /// Press edges that produced a shot.
    pub fn presses(&self) -> u64 {
        self.presses.load(Ordering::Relaxed)
    }

    /// Every shot, press or release.
    pub fn shots(&self) -> u64 {
        self.shots.load(Ordering::Relaxed)
    }
}

/// Maps key edges to samples of the bound pack under the current settings.
pub struct Dispatcher {
    graph: Arc<AudioGraph>,
    settings: AppSettings,
    pack: Option<Arc<SoundPack>>,
    speed: TypingSpeed,
    rng: StdRng,
    stats: Arc<DispatcherStats>,
}

impl Dispatcher {
    pub fn new(graph: Arc<AudioGraph>, settings: AppSettings, rng: StdRng) -> Dispatcher {
        graph.set_params(ShotParams::from(&settings));
        Dispatcher {
            graph,
            settings,
            pack: None,
            speed: TypingSpeed::new(Instant::now()),
            rng,
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    pub fn state(&self) -> DispatcherState {
        match (self.settings.is_enabled, self.pack.is_some()) {
            (true, true) => DispatcherState::Active,
            (false, false) => DispatcherState::Idle,
            _ => DispatcherState::Armed,
        }
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    pub fn pack(&self) -> Option<&Arc<SoundPack>> {
        self.pack.as_ref()
    }

    /// Replaces the cached settings and pushes the shot parameters to the graph.
    pub fn apply_settings(&mut self, settings: AppSettings) {
        let before = self.state();
        self.graph.set_params(ShotParams::from(&settings));
        self.settings = settings;
        let after = self.state();
        if before != after {
            info!(from = %before, to = %after, "Dispatcher state changed");
        }
    }

    /// Makes a decoded pack the one edges are mapped against.
    pub fn bind(&mut self, pack: Arc<SoundPack>, bank: Arc<SampleBank>) -> Result<(), AudioError> {
        self.graph.install(bank.clone())?;
        info!(
            pack = %pack.id,
            name = %pack.name,
            samples = bank.len(),
            press_keys = pack.mapping.press_map().count(),
            release_keys = pack.mapping.release_map().count(),
            memory = %human_bytes(bank.memory_size()),
            "Pack bound"
        );
        self.pack = Some(pack);
        Ok(())
    }

    /// Drops the bound pack and releases its samples.
    pub fn unbind(&mut self) {
        if let Some(pack) = self.pack.take() {
            info!(pack = %pack.id, "Pack unbound");
        }
        self.graph.clear_all();
    }

    /// Handles one edge. Returns the shot it produced, if any.
    pub fn handle(&mut self, edge: KeyEdge, now: Instant) -> Option<Shot> {
        if self.state() != DispatcherState::Active {
            return None;
        }
        if keys::is_modifier(edge.key) && !self.settings.enable_modifier_keys {
            return None;
        }
        if keys::is_function(edge.key) && !self.settings.enable_function_keys {
            return None;
        }

        self.speed.update(now);
        let multiplier = if self.settings.reduce_volume_on_rapid_typing && self.speed.is_rapid() {
            RAPID_TYPING_MULTIPLIER
        } else {
            1.0
        };

        self.graph.set_params(ShotParams::from(&self.settings));

        let pack = self.pack.as_ref()?;
        let variant = pack.mapping.variants(edge.key, edge.edge)?.choose(&mut self.rng)?;
        let shot = self.graph.play(variant, multiplier, &mut self.rng)?;

        self.stats.shots.fetch_add(1, Ordering::Relaxed);
        if edge.edge == Edge::Press {
            self.stats.presses.fetch_add(1, Ordering::Relaxed);
        }
        Some(shot)
    }
}

/// Commands for the dispatcher thread.
pub enum Control {
    /// The bound pack is gone.
    Unbind,
    /// The key source stopped. Held keys are forgotten.
    SourceStopped,
    Shutdown,
}

/// What the dispatcher thread last reported.
#[derive(Debug, Clone, PartialEq)]
struct Status {
    state: DispatcherState,
    pack: Option<PackId>,
}

impl Status {
    fn of(dispatcher: &Dispatcher) -> Status {
        Status {
            state: dispatcher.state(),
            pack: dispatcher.pack().map(|pack| pack.id.clone()),
        }
    }
}

/// A running dispatcher thread.
pub struct DispatcherHandle {
    control: Sender<Control>,
    status: Arc<Mutex<Status>>,
    stats: Arc<DispatcherStats>,
    join: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Starts the dispatcher thread. It consumes raw events, settings changes, and
    /// decoded packs until shut down.
    pub fn spawn(
        dispatcher: Dispatcher,
        events: Receiver<RawKeyEvent>,
        settings: Receiver<AppSettings>,
        ready: Receiver<PackReady>,
        binder: Arc<PackBinder>,
        signals: Arc<Signals>,
    ) -> io::Result<DispatcherHandle> {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let status = Arc::new(Mutex::new(Status::of(&dispatcher)));
        let stats = dispatcher.stats();

        let join = {
            let status = status.clone();
            thread::Builder::new()
                .name("keyasmr-dispatcher".to_string())
                .spawn(move || {
                    let span = span!(Level::INFO, "dispatcher");
                    let _enter = span.enter();
                    let channels = Channels {
                        events,
                        settings,
                        ready,
                        control: control_rx,
                    };
                    run(dispatcher, channels, &binder, &signals, &status);
                })?
        };

        Ok(DispatcherHandle {
            control: control_tx,
            status,
            stats,
            join: Some(join),
        })
    }

    pub fn state(&self) -> DispatcherState {
        self.status.lock().state
    }

    /// The pack edges are currently mapped against.
    pub fn bound_pack(&self) -> Option<PackId> {
        self.status.lock().pack.clone()
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    pub fn send(&self, control: Control) {
        if self.control.send(control).is_err() {
            warn!("Dispatcher is not running");
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.send(Control::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Dispatcher thread panicked");
            }
        }
    }
}

struct Channels {
    events: Receiver<RawKeyEvent>,
    settings: Receiver<AppSettings>,
    ready: Receiver<PackReady>,
    control: Receiver<Control>,
}

fn run(
    mut dispatcher: Dispatcher,
    channels: Channels,
    binder: &PackBinder,
    signals: &Signals,
    status: &Mutex<Status>,
) {
    let Channels {
        mut events,
        mut settings,
        mut ready,
        control,
    } = channels;
    let mut filter = KeyEdgeFilter::new();

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => {
                    if let Some(edge) = filter.process(event) {
                        dispatcher.handle(edge, Instant::now());
                    }
                }
                Err(_) => {
                    debug!("Key events closed");
                    events = crossbeam_channel::never();
                }
            },
            recv(settings) -> changed => match changed {
                Ok(changed) => dispatcher.apply_settings(changed),
                Err(_) => settings = crossbeam_channel::never(),
            },
            recv(ready) -> bound => match bound {
                Ok(bound) => {
                    if bound.generation != binder.latest_generation() {
                        debug!(generation = bound.generation, "Ignoring superseded pack");
                    } else if let Err(e) = dispatcher.bind(bound.pack, bound.bank) {
                        error!(err = %e, "Unable to bind pack");
                        signals.emit(Signal::Error(format!("Unable to play sounds: {}", e)));
                    }
                }
                Err(_) => ready = crossbeam_channel::never(),
            },
            recv(control) -> command => match command {
                Ok(Control::Unbind) => dispatcher.unbind(),
                Ok(Control::SourceStopped) => {
                    debug!(held = filter.pressed_count(), "Forgetting held keys");
                    filter.clear();
                }
                Ok(Control::Shutdown) | Err(_) => break,
            },
        }
        *status.lock() = Status::of(&dispatcher);
    }
    info!(
        presses = dispatcher.stats.presses(),
        shots = dispatcher.stats.shots(),
        "Dispatcher stopped"
    );
}
