//! SIGUSR2-driven profiling.
//!
//! Each delivery flips CPU capture (idle → capturing → idle …) and, when
//! enabled, writes a memory snapshot. A tokio task receives the signals and
//! queues them to a dedicated thread that exclusively owns [`ProfilingState`].

use std::{fs::File, path::PathBuf, sync::mpsc::Receiver};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, error, info};

/// Memory snapshots overwrite this file in the profile directory.
pub const MEM_PROFILE_FILE: &str = "keyseed-load.mem.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingOptions {
    /// `--cpuprof`: allow CPU capture.
    pub cpu: bool,
    /// `--memprof`: write memory snapshots.
    pub memory: bool,
    pub dir: PathBuf,
}

/// Does the actual profiling work; swapped out in tests.
pub trait ProfileBackend {
    type Capture;

    fn start_cpu(&mut self) -> Result<Self::Capture>;

    /// Stop `capture` and write its report to `output`.
    fn finish_cpu(&mut self, capture: Self::Capture, output: &mut File) -> Result<()>;

    fn write_memory(&mut self, output: &mut File) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    Idle,
    Capturing,
}

struct ActiveCapture<C> {
    path: PathBuf,
    output: File,
    capture: C,
}

/// Toggle state plus the one open CPU profile output, if any.
pub struct ProfilingState<B: ProfileBackend> {
    options: ProfilingOptions,
    backend: B,
    active: Option<ActiveCapture<B::Capture>>,
}

impl<B: ProfileBackend> ProfilingState<B> {
    pub fn new(options: ProfilingOptions, backend: B) -> Self {
        Self {
            options,
            backend,
            active: None,
        }
    }

    pub fn state(&self) -> ToggleState {
        if self.active.is_some() {
            ToggleState::Capturing
        } else {
            ToggleState::Idle
        }
    }

    /// Handle one signal delivery and return the new toggle state.
    pub fn toggle(&mut self) -> ToggleState {
        match self.active.take() {
            Some(active) => self.stop_cpu(active),
            None if self.options.cpu => self.start_cpu(),
            None => debug!("cpu profiling not enabled"),
        }
        if self.options.memory {
            self.snapshot_memory();
        }
        self.state()
    }

    fn start_cpu(&mut self) {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let path = self.options.dir.join(format!("keyseed-load-{stamp}.cpu.svg"));
        let output = match File::create(&path) {
            Ok(output) => output,
            Err(err) => {
                error!("failed to create cpu profile {}: {err}", path.display());
                return;
            }
        };
        match self.backend.start_cpu() {
            Ok(capture) => {
                info!("cpu profiling started, writing to {}", path.display());
                self.active = Some(ActiveCapture {
                    path,
                    output,
                    capture,
                });
            }
            Err(err) => error!("failed to start cpu profiling: {err:#}"),
        }
    }

    fn stop_cpu(&mut self, active: ActiveCapture<B::Capture>) {
        let ActiveCapture {
            path,
            mut output,
            capture,
        } = active;
        match self.backend.finish_cpu(capture, &mut output) {
            Ok(()) => info!("cpu profile written to {}", path.display()),
            Err(err) => error!("failed to write cpu profile {}: {err:#}", path.display()),
        }
    }

    fn snapshot_memory(&mut self) {
        let path = self.options.dir.join(MEM_PROFILE_FILE);
        let result = File::create(&path)
            .map_err(anyhow::Error::from)
            .and_then(|mut output| self.backend.write_memory(&mut output));
        match result {
            Ok(()) => info!("memory snapshot written to {}", path.display()),
            Err(err) => error!("failed to write memory snapshot {}: {err:#}", path.display()),
        }
    }
}

/// Apply one toggle per queued signal until the sender goes away.
pub fn drain<B: ProfileBackend>(state: &mut ProfilingState<B>, deliveries: Receiver<()>) {
    for () in deliveries {
        let now = state.toggle();
        debug!(?now, "profiling toggled");
    }
}

/// Process memory figures, as written to [`MEM_PROFILE_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub taken_at: DateTime<Utc>,
    pub pid: u32,
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub system_total_bytes: u64,
    pub system_used_bytes: u64,
}

pub fn memory_snapshot() -> Result<MemorySnapshot> {
    let pid = sysinfo::get_current_pid().map_err(|err| anyhow!(err))?;
    let sys = System::new_all();
    let process = sys
        .process(pid)
        .ok_or_else(|| anyhow!("process {pid} not visible"))?;
    Ok(MemorySnapshot {
        taken_at: Utc::now(),
        pid: pid.as_u32(),
        resident_bytes: process.memory(),
        virtual_bytes: process.virtual_memory(),
        system_total_bytes: sys.total_memory(),
        system_used_bytes: sys.used_memory(),
    })
}

/// pprof sampling for CPU, sysinfo for memory.
#[cfg(unix)]
pub struct PprofBackend {
    frequency: i32,
}

#[cfg(unix)]
impl Default for PprofBackend {
    fn default() -> Self {
        Self { frequency: 1000 }
    }
}

#[cfg(unix)]
impl ProfileBackend for PprofBackend {
    type Capture = pprof::ProfilerGuard<'static>;

    fn start_cpu(&mut self) -> Result<Self::Capture> {
        Ok(pprof::ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()?)
    }

    fn finish_cpu(&mut self, capture: Self::Capture, output: &mut File) -> Result<()> {
        let report = capture.report().build()?;
        report.flamegraph(output)?;
        Ok(())
    }

    fn write_memory(&mut self, output: &mut File) -> Result<()> {
        serde_json::to_writer_pretty(output, &memory_snapshot()?)?;
        Ok(())
    }
}

/// Start the SIGUSR2 listener for the rest of the process lifetime.
#[cfg(unix)]
pub fn spawn_listener(options: ProfilingOptions) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut signals = signal(SignalKind::user_defined2())?;
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::Builder::new()
        .name("profiling-toggle".to_string())
        .spawn(move || {
            let mut state = ProfilingState::new(options, PprofBackend::default());
            drain(&mut state, rx);
        })?;
    tokio::spawn(async move {
        while signals.recv().await.is_some() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    debug!("profiling toggle listening for SIGUSR2");
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_listener(_options: ProfilingOptions) -> std::io::Result<()> {
    tracing::warn!("signal-driven profiling is only available on unix");
    Ok(())
}
