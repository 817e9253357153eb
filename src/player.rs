//! Media-player pair (C5): two independent handles (`music`, `announcement`)
//! wrapping an `mpv` subprocess addressed over its JSON IPC socket, grounded
//! on the original's `python-mpv`-based `mpv_player.py` and on the worker
//! thread / command-channel shape of `audio_sink.rs`'s `AudioSink`.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("failed to spawn mpv: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to connect to mpv IPC socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("player worker thread is gone")]
    WorkerGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopping,
}

/// Pure volume bookkeeping for `duck`/`unduck`/`set_volume` (§4.4): split out
/// from the IO-bound worker so the guarantees are unit-testable without an
/// mpv process.
#[derive(Debug, Clone, Copy)]
struct VolumeState {
    current: u8,
    pre_duck: Option<u8>,
}

impl VolumeState {
    fn new(initial: u8) -> Self {
        Self { current: initial, pre_duck: None }
    }

    /// Returns the volume to request from the current user. While ducked,
    /// `set_volume` updates the saved pre-duck value rather than the live
    /// output (§4.4: "the saved value is authoritative for unduck").
    fn set_volume(&mut self, volume: u8) -> u8 {
        if let Some(saved) = &mut self.pre_duck {
            *saved = volume;
            self.current
        } else {
            self.current = volume;
            self.current
        }
    }

    fn duck(&mut self, target_pct: u8) -> u8 {
        if self.pre_duck.is_none() {
            self.pre_duck = Some(self.current);
        }
        self.current = target_pct;
        self.current
    }

    fn unduck(&mut self) -> u8 {
        if let Some(saved) = self.pre_duck.take() {
            self.current = saved;
        }
        self.current
    }

    fn is_ducked(&self) -> bool {
        self.pre_duck.is_some()
    }
}

type OnFinished = Box<dyn FnOnce() + Send>;

enum PlayerCommand {
    Play { urls: Vec<String>, on_finished: Option<OnFinished> },
    Stop,
    Pause,
    Resume,
    SetVolume(u8),
    Duck(u8),
    Unduck,
    Mute,
    Unmute,
    Shutdown,
}

/// One playback handle: its own `mpv` subprocess, worker thread, and command
/// channel. `music` and `announcement` are each a `PlayerHandle`; the
/// coupling between them (pause music during an announcement) is the
/// orchestrator's job, not this type's.
pub struct PlayerHandle {
    command_tx: Sender<PlayerCommand>,
    _worker: thread::JoinHandle<()>,
}

impl PlayerHandle {
    pub fn spawn(label: &str, ipc_socket_path: PathBuf, initial_volume: u8) -> Result<Self, PlayerError> {
        let child = Command::new("mpv")
            .arg("--idle")
            .arg("--no-video")
            .arg("--no-terminal")
            .arg(format!("--input-ipc-server={}", ipc_socket_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(PlayerError::Spawn)?;

        let socket = connect_with_retry(&ipc_socket_path)?;

        let (command_tx, command_rx) = bounded(16);
        let label = label.to_string();
        let worker = thread::spawn(move || {
            run_worker(label, child, socket, command_rx, initial_volume);
        });

        Ok(Self { command_tx, _worker: worker })
    }

    /// Replace any current content. Any pending `on_finished` on this handle
    /// is cancelled (dropped, not invoked) before playback starts.
    pub fn play(&self, urls: Vec<String>, on_finished: Option<OnFinished>) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Play { urls, on_finished })
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Stop)
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Resume)
    }

    pub fn set_volume(&self, volume: u8) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetVolume(volume))
    }

    pub fn duck(&self, target_pct: u8) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Duck(target_pct))
    }

    pub fn unduck(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Unduck)
    }

    pub fn mute(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Mute)
    }

    pub fn unmute(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Unmute)
    }

    fn send(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        self.command_tx.send(command).map_err(|_| PlayerError::WorkerGone)
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        let _ = self.command_tx.send(PlayerCommand::Shutdown);
    }
}

fn connect_with_retry(path: &PathBuf) -> Result<UnixStream, PlayerError> {
    let mut last_err = None;
    for _ in 0..50 {
        match UnixStream::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                last_err = Some(err);
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
    Err(PlayerError::Connect {
        path: path.clone(),
        source: last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "mpv ipc socket never appeared")),
    })
}

fn run_worker(
    label: String,
    mut child: Child,
    socket: UnixStream,
    command_rx: crossbeam_channel::Receiver<PlayerCommand>,
    initial_volume: u8,
) {
    let mut writer = socket.try_clone().expect("cloning a UnixStream handle does not fail");
    let reader = BufReader::new(socket.try_clone().expect("cloning a UnixStream handle does not fail"));

    send_ipc(&mut writer, &json!({"command": ["observe_property", 1, "eof-reached"]}));
    send_ipc(&mut writer, &json!({"command": ["observe_property", 2, "idle-active"]}));
    send_ipc(&mut writer, &json!({"command": ["set_property", "volume", initial_volume]}));

    let mut volume = VolumeState::new(initial_volume);
    let mut state = PlaybackState::Idle;
    let mut pending_urls: VecDeque<String> = VecDeque::new();
    let mut on_finished: Option<OnFinished> = None;
    let mut muted = false;
    // mpv normally reports both `eof-reached` and `idle-active` for a
    // natural end of the current file; a failed/404 URL or a decode error
    // can skip straight to `idle-active` without ever reaching
    // `eof-reached`. This flag dedupes the pair so a single completion is
    // only ever acted on once per loaded file.
    let mut completion_handled = true;

    // A dedicated thread drains IPC events so the command loop never
    // blocks waiting on the socket; it hands eof/idle notifications back
    // through a small bounded channel.
    let (eof_tx, eof_rx) = bounded::<PlayerEvent>(4);
    let reader_label = label.clone();
    thread::spawn(move || watch_eof(reader, eof_tx, reader_label));

    loop {
        crossbeam_channel::select! {
            recv(command_rx) -> command => {
                match command {
                    Ok(PlayerCommand::Play { urls, on_finished: new_callback }) => {
                        // Cancel any pending callback before starting new playback.
                        on_finished = new_callback;
                        pending_urls = urls.into();
                        if let Some(first) = pending_urls.pop_front() {
                            send_ipc(&mut writer, &json!({"command": ["loadfile", first, "replace"]}));
                            state = PlaybackState::Playing;
                            completion_handled = false;
                        }
                    }
                    Ok(PlayerCommand::Stop) => {
                        if state == PlaybackState::Playing || state == PlaybackState::Paused {
                            send_ipc(&mut writer, &json!({"command": ["stop"]}));
                            state = PlaybackState::Idle;
                            completion_handled = true;
                            if let Some(cb) = on_finished.take() {
                                cb();
                            }
                        }
                    }
                    Ok(PlayerCommand::Pause) => {
                        send_ipc(&mut writer, &json!({"command": ["set_property", "pause", true]}));
                        state = PlaybackState::Paused;
                    }
                    Ok(PlayerCommand::Resume) => {
                        send_ipc(&mut writer, &json!({"command": ["set_property", "pause", false]}));
                        state = PlaybackState::Playing;
                    }
                    Ok(PlayerCommand::SetVolume(v)) => {
                        let effective = volume.set_volume(v);
                        if !volume.is_ducked() {
                            send_ipc(&mut writer, &json!({"command": ["set_property", "volume", effective]}));
                        }
                    }
                    Ok(PlayerCommand::Duck(target)) => {
                        let effective = volume.duck(target);
                        send_ipc(&mut writer, &json!({"command": ["set_property", "volume", effective]}));
                    }
                    Ok(PlayerCommand::Unduck) => {
                        let effective = volume.unduck();
                        send_ipc(&mut writer, &json!({"command": ["set_property", "volume", effective]}));
                    }
                    Ok(PlayerCommand::Mute) => {
                        muted = true;
                        send_ipc(&mut writer, &json!({"command": ["set_property", "mute", true]}));
                    }
                    Ok(PlayerCommand::Unmute) => {
                        muted = false;
                        send_ipc(&mut writer, &json!({"command": ["set_property", "mute", false]}));
                    }
                    Ok(PlayerCommand::Shutdown) | Err(_) => break,
                }
            }
            recv(eof_rx) -> event => {
                if event.is_ok() && !completion_handled {
                    completion_handled = true;
                    if let Some(next) = pending_urls.pop_front() {
                        send_ipc(&mut writer, &json!({"command": ["loadfile", next, "replace"]}));
                        completion_handled = false;
                    } else {
                        state = PlaybackState::Idle;
                        if let Some(cb) = on_finished.take() {
                            cb();
                        }
                    }
                }
            }
        }
    }

    let _ = muted;
    let _ = child.kill();
    let _ = child.wait();
}

fn send_ipc(writer: &mut UnixStream, message: &serde_json::Value) {
    if let Ok(mut line) = serde_json::to_vec(message) {
        line.push(b'\n');
        if let Err(err) = writer.write_all(&line) {
            log::warn!("mpv ipc write failed: {err}");
        }
    }
}

/// A terminal playback-property transition observed over mpv's IPC socket.
/// `IdleActive` is the fallback signal for playback that goes idle without
/// ever reaching `eof-reached` (a failed/404 URL, a decode error).
enum PlayerEvent {
    EofReached,
    IdleActive,
}

/// Reads newline-delimited JSON events from mpv, signalling `eof_tx` on
/// either observed property becoming `true`.
fn watch_eof(reader: BufReader<UnixStream>, eof_tx: Sender<PlayerEvent>, label: String) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        if value.get("event").and_then(|e| e.as_str()) != Some("property-change") {
            continue;
        }
        if value.get("data").and_then(|d| d.as_bool()) != Some(true) {
            continue;
        }
        let event = match value.get("name").and_then(|n| n.as_str()) {
            Some("eof-reached") => PlayerEvent::EofReached,
            Some("idle-active") => PlayerEvent::IdleActive,
            _ => continue,
        };
        if eof_tx.send(event).is_err() {
            log::debug!("{label}: eof/idle observed after worker exited");
            break;
        }
    }
}

/// Owns both playback handles and the single coupling rule between them:
/// when an announcement starts while music is playing, music is paused;
/// when the announcement finishes, music resumes.
pub struct PlayerPair {
    pub music: PlayerHandle,
    pub announcement: PlayerHandle,
}

impl PlayerPair {
    pub fn new(music: PlayerHandle, announcement: PlayerHandle) -> Self {
        Self { music, announcement }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duck_then_unduck_restores_original_volume() {
        let mut volume = VolumeState::new(70);
        assert_eq!(volume.duck(10), 10);
        assert_eq!(volume.unduck(), 70);
        assert!(!volume.is_ducked());
    }

    #[test]
    fn duck_is_idempotent_about_the_saved_value() {
        let mut volume = VolumeState::new(70);
        volume.duck(10);
        // Ducking again while already ducked must not overwrite the saved 70.
        assert_eq!(volume.duck(5), 5);
        assert_eq!(volume.unduck(), 70);
    }

    #[test]
    fn set_volume_while_ducked_updates_only_the_saved_value() {
        let mut volume = VolumeState::new(70);
        let effective = volume.duck(10);
        assert_eq!(effective, 10);

        // A user-driven volume change while ducked should not change the
        // live (ducked) output, only what unduck restores to.
        let effective = volume.set_volume(40);
        assert_eq!(effective, 10);
        assert_eq!(volume.unduck(), 40);
    }

    #[test]
    fn set_volume_while_not_ducked_applies_immediately() {
        let mut volume = VolumeState::new(70);
        assert_eq!(volume.set_volume(55), 55);
    }
}
