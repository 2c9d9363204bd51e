//! A dedicated thread that owns and runs the machine.
//!
//! The frontend talks to it over two lock-free SPSC channels: commands in
//! one direction, events in the other. Pixels and audio do not cross the
//! channels; the thread shares the core's framebuffer and sample buffer
//! handles instead, so the frontend reads them directly.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use emu::gba::{CYCLES_PER_SECOND, Gba};
pub use emu::hardware::apu::SampleBuffer;
pub use emu::hardware::keypad::GbaButton;

/// Instructions to run per batch before checking for commands. Only
/// affects responsiveness to pause/step; frames are paced by the core.
const STEPS_PER_BATCH: u32 = 2000;

const COMMAND_BUFFER_SIZE: usize = 64;
const EVENT_BUFFER_SIZE: usize = 64;

/// Commands sent from the frontend to the emulator thread.
#[derive(Debug, Clone)]
pub enum EmuCommand {
    /// Run continuously until paused or a breakpoint hits.
    Run,
    /// Pause execution.
    Pause,
    /// Execute N instructions then pause.
    Step(u32),
    /// Hardware reset.
    Reset,
    /// Add a breakpoint at an address.
    AddBreakpoint(u32),
    /// Remove a breakpoint at an address.
    RemoveBreakpoint(u32),
    /// Request a register/state snapshot event.
    RequestState,
    /// Request serialized machine state.
    RequestSaveState,
    /// Restore serialized machine state.
    LoadState(Vec<u8>),
    /// Update one key.
    SetKey { button: GbaButton, pressed: bool },
    /// Emulation speed multiplier; 0 means uncapped.
    SetSpeed(f64),
    /// Audio output rate in Hz; takes effect on the next sample tick.
    SetResampleRate(u32),
    /// Mark the cartridge's real-time clock as fitted or absent.
    SetRtcPresence(bool),
    /// Stop the thread.
    Shutdown,
}

/// Events sent from the emulator thread back to the frontend.
#[derive(Debug, Clone)]
pub enum EmuEvent {
    State(EmuState),
    FramePresented { frame_count: u64 },
    Paused { reason: PauseReason },
    SaveStateData(Vec<u8>),
}

/// Register-level snapshot for display purposes.
#[derive(Debug, Clone, Default)]
pub struct EmuState {
    pub registers: [u32; 16],
    pub cpsr: u32,
    pub spsr: u32,
    pub cycles: u64,
    pub is_running: bool,
    pub game_title: String,
}

#[derive(Debug, Clone)]
pub enum PauseReason {
    User,
    Breakpoint(u32),
    Step,
}

struct EmuThread {
    gba: Gba,
    cmd_rx: rtrb::Consumer<EmuCommand>,
    event_tx: rtrb::Producer<EmuEvent>,

    running: bool,
    steps_remaining: u32,
    breakpoints: BTreeSet<u32>,
    /// Speed multiplier; 0 disables pacing entirely.
    speed: f64,
    /// Wall-clock anchor for pacing: (instant, cycle count at anchor).
    pace_anchor: Option<(Instant, u64)>,
    last_frame_count: u64,
}

impl EmuThread {
    fn new(gba: Gba, cmd_rx: rtrb::Consumer<EmuCommand>, event_tx: rtrb::Producer<EmuEvent>) -> Self {
        let last_frame_count = gba.frame_count();
        Self {
            gba,
            cmd_rx,
            event_tx,
            running: false,
            steps_remaining: 0,
            breakpoints: BTreeSet::new(),
            speed: 1.0,
            pace_anchor: None,
            last_frame_count,
        }
    }

    fn run(mut self) {
        loop {
            if self.process_commands() {
                return;
            }

            if self.running || self.steps_remaining > 0 {
                self.execute_batch();
                self.pace();
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Drains pending commands. Returns true on shutdown.
    fn process_commands(&mut self) -> bool {
        while let Ok(cmd) = self.cmd_rx.pop() {
            match cmd {
                EmuCommand::Run => {
                    self.running = true;
                    self.steps_remaining = 0;
                    self.pace_anchor = None;
                }
                EmuCommand::Pause => {
                    self.running = false;
                    self.steps_remaining = 0;
                    self.send_event(EmuEvent::Paused {
                        reason: PauseReason::User,
                    });
                    self.send_state();
                }
                EmuCommand::Step(count) => {
                    self.running = false;
                    self.steps_remaining = count;
                }
                EmuCommand::Reset => {
                    self.gba.reset();
                    self.pace_anchor = None;
                    self.send_state();
                }
                EmuCommand::AddBreakpoint(address) => {
                    self.breakpoints.insert(address);
                }
                EmuCommand::RemoveBreakpoint(address) => {
                    self.breakpoints.remove(&address);
                }
                EmuCommand::RequestState => self.send_state(),
                EmuCommand::RequestSaveState => match self.gba.save_state() {
                    Ok(data) => self.send_event(EmuEvent::SaveStateData(data)),
                    Err(e) => tracing::error!("save state failed: {e}"),
                },
                EmuCommand::LoadState(data) => {
                    if let Err(e) = self.gba.load_state(&data) {
                        tracing::error!("load state failed: {e}");
                    }
                    self.pace_anchor = None;
                    self.send_state();
                }
                EmuCommand::SetKey { button, pressed } => {
                    self.gba.set_key(button, pressed);
                }
                EmuCommand::SetSpeed(speed) => {
                    self.speed = speed.max(0.0);
                    self.pace_anchor = None;
                }
                EmuCommand::SetResampleRate(rate) => {
                    self.gba.cpu.bus.apu.sample_rate = rate.max(1);
                }
                EmuCommand::SetRtcPresence(present) => {
                    self.gba.set_rtc_present(present);
                }
                EmuCommand::Shutdown => return true,
            }
        }
        false
    }

    fn execute_batch(&mut self) {
        for _ in 0..STEPS_PER_BATCH {
            let pc = self.gba.cpu.registers.program_counter();
            if self.breakpoints.contains(&pc) {
                self.running = false;
                self.steps_remaining = 0;
                self.send_event(EmuEvent::Paused {
                    reason: PauseReason::Breakpoint(pc),
                });
                self.send_state();
                return;
            }

            self.gba.step();

            let frames = self.gba.frame_count();
            if frames != self.last_frame_count {
                self.last_frame_count = frames;
                self.send_event(EmuEvent::FramePresented {
                    frame_count: frames,
                });
            }

            if self.steps_remaining > 0 {
                self.steps_remaining -= 1;
                if self.steps_remaining == 0 {
                    self.running = false;
                    self.send_event(EmuEvent::Paused {
                        reason: PauseReason::Step,
                    });
                    self.send_state();
                    return;
                }
            }
        }
    }

    /// Sleeps long enough that emulated time does not outrun wall-clock
    /// time at the configured speed.
    fn pace(&mut self) {
        if self.speed <= 0.0 {
            return;
        }
        let (anchor, anchor_cycles) =
            *self.pace_anchor.get_or_insert((Instant::now(), self.gba.cycles()));
        let emulated = (self.gba.cycles() - anchor_cycles) as f64 / CYCLES_PER_SECOND as f64;
        let budget = anchor.elapsed().as_secs_f64() * self.speed;
        if emulated > budget {
            thread::sleep(Duration::from_secs_f64(
                ((emulated - budget) / self.speed).min(0.05),
            ));
        }
    }

    /// Non-blocking; events are dropped when the frontend lags.
    fn send_event(&mut self, event: EmuEvent) {
        let _ = self.event_tx.push(event);
    }

    fn send_state(&mut self) {
        let mut registers = [0u32; 16];
        for (i, reg) in registers.iter_mut().enumerate() {
            *reg = self.gba.cpu.registers.register_at(i);
        }
        let state = EmuState {
            registers,
            cpsr: u32::from(self.gba.cpu.cpsr),
            spsr: u32::from(self.gba.cpu.spsr()),
            cycles: self.gba.cycles(),
            is_running: self.running,
            game_title: self.gba.header().title.clone(),
        };
        self.send_event(EmuEvent::State(state));
    }
}

/// Frontend-side handle. Dropping it shuts the thread down.
pub struct EmuHandle {
    cmd_tx: rtrb::Producer<EmuCommand>,
    event_rx: rtrb::Consumer<EmuEvent>,
    thread_handle: Option<JoinHandle<()>>,

    /// Last presented frame, RGBA8, shared with the core.
    pub framebuffer: Arc<Mutex<Vec<u8>>>,
    /// Mixed audio frames, shared with the core.
    pub audio_samples: Arc<Mutex<SampleBuffer>>,
    /// Latest state snapshot received from the thread.
    pub state: EmuState,
}

impl EmuHandle {
    pub fn send(&mut self, cmd: EmuCommand) {
        let _ = self.cmd_tx.push(cmd);
    }

    /// Drains pending events, updating the cached state. Returns them for
    /// the caller to act on.
    pub fn poll(&mut self) -> Vec<EmuEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.pop() {
            match &event {
                EmuEvent::State(state) => self.state = state.clone(),
                EmuEvent::Paused { .. } => self.state.is_running = false,
                _ => {}
            }
            events.push(event);
        }
        events
    }
}

impl Drop for EmuHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.push(EmuCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns the emulator thread, transferring ownership of the machine.
pub fn spawn(gba: Gba) -> EmuHandle {
    let (cmd_tx, cmd_rx) = rtrb::RingBuffer::new(COMMAND_BUFFER_SIZE);
    let (event_tx, event_rx) = rtrb::RingBuffer::new(EVENT_BUFFER_SIZE);

    let framebuffer = gba.framebuffer();
    let audio_samples = gba.audio_samples();
    let game_title = gba.header().title.clone();

    let thread_handle = thread::Builder::new()
        .name("emu".into())
        .spawn(move || EmuThread::new(gba, cmd_rx, event_tx).run())
        .expect("spawn emulator thread");

    EmuHandle {
        cmd_tx,
        event_rx,
        thread_handle: Some(thread_handle),
        framebuffer,
        audio_samples,
        state: EmuState {
            game_title,
            ..EmuState::default()
        },
    }
}
