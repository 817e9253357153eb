//! Satellite orchestrator (C10): owns process-wide state and drives the
//! three cooperating execution contexts described in §5 — audio capture,
//! detector, and protocol/network. Connection handling is a blocking,
//! single-threaded accept loop over a non-blocking listener, grounded on
//! the teacher's `consumer_server.rs` (`AtomicBool` shutdown flag,
//! nonblocking `TcpListener`, dedicated detector thread posting through a
//! bounded channel).

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::audio::AudioCapture;
use crate::config::AppConfig;
use crate::entity::{Entity, EntityRegistry, MediaPlayerDelegate, SwitchEntity};
use crate::error::{Result, SatelliteError};
use crate::event_bus::{Event, EventBus, Topic};
use crate::features::FeatureExtractor;
use crate::led::{LedIndicator, LedState, NullLedIndicator};
use crate::mdns::{MulticastAdvertiser, ServiceInfo};
use crate::player::{PlayerHandle, PlayerPair};
use crate::preferences::PreferencesStore;
use crate::protocol::message::{decode_message, encode_message, Message};
use crate::protocol::session::{ProtocolSession, SessionEnvironment};
use crate::protocol::FrameReader;
use crate::wakeword::pool::DetectorPool;
use crate::wakeword::load_manifests;

/// Events posted from the detector thread to the protocol context (§5:
/// "Detector → protocol: thread-safe function submission").
enum DetectorEvent {
    Fired(String),
}

/// Completion signals posted back onto the protocol loop from the player
/// worker thread and from timer-replay threads. Each is tagged with the
/// session ID it was raised for (§9's session-ID-keyed closure registry):
/// the loop looks the ID up against its one live connection and no-ops if
/// that session is already gone rather than storing a back-pointer into it.
enum SessionEvent {
    AnnouncementFinished(u64),
    TimerReplay(u64),
}

pub struct Orchestrator {
    config: AppConfig,
    should_stop: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Self {
        Self { config, should_stop: Arc::new(AtomicBool::new(false)) }
    }

    pub fn request_shutdown(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    /// Runs the full startup sequence (§4.8) and then the protocol listener
    /// loop until shutdown is requested.
    pub fn run(&self) -> Result<()> {
        let runtime_dir = runtime_directory();
        std::fs::create_dir_all(&runtime_dir).map_err(SatelliteError::Io)?;

        let manifests = self
            .config
            .wake_word
            .directories
            .iter()
            .flat_map(|dir| load_manifests(dir).unwrap_or_default())
            .collect::<Vec<_>>();

        let preferences_path = self.config.app.preferences_file.clone();
        let mut preferences = PreferencesStore::load(preferences_path)?;

        let active: Vec<String> = preferences.document().active_wake_words.iter().cloned().collect();
        let detector_pool = DetectorPool::new(manifests, &active, &self.config.wake_word.stop_model)?;
        let detector_pool = Arc::new(Mutex::new(detector_pool));

        let music = PlayerHandle::spawn("music", runtime_dir.join("music.sock"), preferences.document().volume_level)
            .map_err(SatelliteError::Player)?;
        let announcement = PlayerHandle::spawn("announcement", runtime_dir.join("announce.sock"), 100)
            .map_err(SatelliteError::Player)?;
        let players = PlayerPair::new(music, announcement);

        let event_bus = Arc::new(Mutex::new(EventBus::new()));
        let led: Arc<Mutex<Box<dyn LedIndicator>>> =
            Arc::new(Mutex::new(Box::new(NullLedIndicator::new(self.config.led.num_leds))));
        {
            let led_for_bus = led.clone();
            event_bus.lock().expect("event bus mutex is never poisoned by a panic here").subscribe(
                Topic::WakeWord,
                Box::new(move |_event| {
                    led_for_bus.lock().expect("event bus mutex is never poisoned by a panic here").set_state(LedState::Listening);
                }),
            );
        }

        let advertiser = MulticastAdvertiser::bind(ServiceInfo {
            instance_name: self.config.app.name.clone(),
            host_name: format!("{}.local", self.config.app.name),
            port: self.config.server.port,
        });
        match advertiser {
            Ok(advertiser) => {
                let _handle = advertiser.spawn_periodic(Duration::from_secs(10));
            }
            Err(err) => log::warn!("mDNS advertiser disabled: {err}"),
        }

        let capture = AudioCapture::start(self.config.audio.input_device.as_deref()).map_err(|err| {
            SatelliteError::Audio(err.to_string())
        })?;

        let (detector_tx, detector_rx) = bounded::<DetectorEvent>(8);
        self.start_detector_thread(capture, detector_pool.clone(), detector_tx);

        let (session_tx, session_rx) = bounded::<SessionEvent>(8);
        self.run_protocol_loop(detector_pool, players, &mut preferences, event_bus, detector_rx, session_tx, session_rx)
    }

    fn start_detector_thread(
        &self,
        capture: AudioCapture,
        detector_pool: Arc<Mutex<DetectorPool>>,
        events_tx: Sender<DetectorEvent>,
    ) {
        let should_stop = self.should_stop.clone();
        thread::spawn(move || {
            let mut extractor = FeatureExtractor::new();
            let receiver = capture.receiver();
            while !should_stop.load(Ordering::SeqCst) {
                let chunk = match receiver.recv_timeout(Duration::from_millis(200)) {
                    Ok(chunk) => chunk,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                };
                for frame in extractor.push(&chunk.0) {
                    let fired = {
                        let mut pool = detector_pool.lock().expect("detector pool mutex is never poisoned by a panic here");
                        pool.feed_all(frame)
                    };
                    if let Some(id) = fired {
                        if events_tx.send(DetectorEvent::Fired(id)).is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    fn run_protocol_loop(
        &self,
        detector_pool: Arc<Mutex<DetectorPool>>,
        players: PlayerPair,
        preferences: &mut PreferencesStore,
        event_bus: Arc<Mutex<EventBus>>,
        detector_rx: Receiver<DetectorEvent>,
        session_tx: Sender<SessionEvent>,
        session_rx: Receiver<SessionEvent>,
    ) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&bind_addr).map_err(SatelliteError::Io)?;
        listener.set_nonblocking(true).map_err(SatelliteError::Io)?;
        log::info!("satellite protocol listening on {bind_addr}");

        let mut current: Option<(TcpStream, ProtocolSession, FrameReader, u64)> = None;
        let mut next_session_id: u64 = 0;

        while !self.should_stop.load(Ordering::SeqCst) {
            if current.is_none() {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        log::info!("accepted connection from {addr}");
                        stream.set_nonblocking(true).map_err(SatelliteError::Io)?;
                        let id = next_session_id;
                        next_session_id += 1;
                        current = Some((stream, ProtocolSession::new(), FrameReader::new(), id));
                    }
                    Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(SatelliteError::Io(err)),
                }
            }

            if let Some((stream, session, reader, session_id)) = current.as_mut() {
                let mut buf = [0u8; 4096];
                match stream.read(&mut buf) {
                    Ok(0) => {
                        log::info!("connection closed by peer");
                        current = None;
                    }
                    Ok(n) => {
                        reader.feed(&buf[..n]);
                        let frames = reader.drain_frames().map_err(SatelliteError::Protocol)?;
                        for (message_type, payload) in frames {
                            let decoded = decode_message(message_type, &payload).ok();
                            let is_entity_message = matches!(
                                decoded,
                                Some(Message::ListEntitiesRequest)
                                    | Some(Message::MediaPlayerCommandRequest { .. })
                                    | Some(Message::SwitchCommandRequest { .. })
                            );

                            if is_entity_message {
                                let msg = decoded.expect("matched Some above");
                                let initial_volume = preferences.document().volume_level;
                                let mut bridge = MediaPlayerBridge { handle: &players.music, preferences: &mut *preferences };
                                let mut registry = build_entity_registry(&mut bridge, initial_volume);
                                let replies = match &msg {
                                    Message::ListEntitiesRequest => registry.describe_all(),
                                    _ => registry.dispatch(&msg),
                                };
                                for reply in replies {
                                    let (reply_type, reply_payload) = encode_message(&reply);
                                    let frame = crate::protocol::encode(reply_type, &reply_payload);
                                    if let Err(err) = stream.write_all(&frame) {
                                        log::warn!("failed to send entity reply: {err}");
                                    }
                                }
                                continue;
                            }

                            let mut env = ConnectionEnvironment {
                                stream,
                                config: &self.config,
                                preferences,
                                detector_pool: &detector_pool,
                                players: &players,
                                event_bus: &event_bus,
                                session_id: *session_id,
                                session_tx: &session_tx,
                            };
                            session.handle_frame(&mut env, message_type, &payload).map_err(SatelliteError::Protocol)?;
                        }
                    }
                    Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(_) => {
                        current = None;
                    }
                }
            }

            if let Some((stream, session, _, session_id)) = current.as_mut() {
                while let Ok(event) = detector_rx.try_recv() {
                    let DetectorEvent::Fired(id) = event;
                    let mut env = ConnectionEnvironment {
                        stream,
                        config: &self.config,
                        preferences,
                        detector_pool: &detector_pool,
                        players: &players,
                        event_bus: &event_bus,
                        session_id: *session_id,
                        session_tx: &session_tx,
                    };
                    session.on_wake_word_detected(&mut env, &id);
                }
            }

            if let Some((stream, session, _, session_id)) = current.as_mut() {
                while let Ok(event) = session_rx.try_recv() {
                    let (event_session_id, is_timer_replay) = match event {
                        SessionEvent::AnnouncementFinished(id) => (id, false),
                        SessionEvent::TimerReplay(id) => (id, true),
                    };
                    if event_session_id != *session_id {
                        // Stale signal from a connection that has since closed.
                        continue;
                    }
                    let mut env = ConnectionEnvironment {
                        stream,
                        config: &self.config,
                        preferences,
                        detector_pool: &detector_pool,
                        players: &players,
                        event_bus: &event_bus,
                        session_id: *session_id,
                        session_tx: &session_tx,
                    };
                    if is_timer_replay {
                        if session.timer_ringing() {
                            session.on_timer_finished(&mut env);
                        }
                    } else {
                        session.on_tts_finished(&mut env);
                    }
                }
            }

            thread::sleep(Duration::from_millis(5));
        }

        Ok(())
    }
}

fn runtime_directory() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("voice-satellite")
}

/// Bridges a live connection to the session's collaborator trait. Built
/// fresh per dispatched frame/event since `ProtocolSession` itself holds no
/// IO state.
struct ConnectionEnvironment<'a> {
    stream: &'a mut TcpStream,
    config: &'a AppConfig,
    preferences: &'a mut PreferencesStore,
    detector_pool: &'a Arc<Mutex<DetectorPool>>,
    players: &'a PlayerPair,
    event_bus: &'a Arc<Mutex<EventBus>>,
    session_id: u64,
    session_tx: &'a Sender<SessionEvent>,
}

impl<'a> SessionEnvironment for ConnectionEnvironment<'a> {
    fn send_message(&mut self, message: Message) {
        let (message_type, payload) = encode_message(&message);
        let frame = crate::protocol::encode(message_type, &payload);
        if let Err(err) = self.stream.write_all(&frame) {
            log::warn!("failed to send message: {err}");
        }
    }

    fn device_name(&self) -> String {
        self.config.app.name.clone()
    }

    fn mac_address(&self) -> String {
        "00:00:00:00:00:00".to_string()
    }

    fn available_wake_words(&self) -> Vec<(String, String)> {
        self.detector_pool
            .lock()
            .expect("detector pool mutex is never poisoned by a panic here")
            .catalog()
            .values()
            .map(|m| (m.id.clone(), m.phrase.clone()))
            .collect()
    }

    fn active_wake_words(&self) -> Vec<String> {
        self.detector_pool.lock().expect("detector pool mutex is never poisoned by a panic here").active_ids()
    }

    fn max_active_wake_words(&self) -> u32 {
        4
    }

    fn persist_active_wake_words(&mut self, ids: BTreeSet<String>) {
        let ordered: Vec<String> = ids.iter().cloned().collect();
        if let Err(err) = self
            .detector_pool
            .lock()
            .expect("detector pool mutex is never poisoned by a panic here")
            .set_active(&ordered)
        {
            log::warn!("failed to apply new active wake-word set: {err}");
            return;
        }
        if let Err(err) = self.preferences.set_active_wake_words(ids) {
            log::warn!("failed to persist active wake-word set: {err}");
        }
    }

    fn wakeup_sound_url(&self) -> String {
        self.config.app.wakeup_sound.clone()
    }

    fn timer_finished_sound_url(&self) -> String {
        self.config.app.timer_finished_sound.clone()
    }

    fn duck(&mut self) {
        if let Err(err) = self.players.music.duck(20) {
            log::warn!("failed to duck music: {err}");
        }
    }

    fn unduck(&mut self) {
        if let Err(err) = self.players.music.unduck() {
            log::warn!("failed to unduck music: {err}");
        }
    }

    fn arm_stop_word(&mut self) {
        self.detector_pool.lock().expect("detector pool mutex is never poisoned by a panic here").arm_stop_word();
    }

    fn disarm_stop_word(&mut self) {
        self.detector_pool.lock().expect("detector pool mutex is never poisoned by a panic here").disarm_stop_word();
    }

    fn play_announcement(&mut self, urls: Vec<String>, _announcement: bool) {
        let session_id = self.session_id;
        let tx = self.session_tx.clone();
        let on_finished: Box<dyn FnOnce() + Send> = Box::new(move || {
            let _ = tx.send(SessionEvent::AnnouncementFinished(session_id));
        });
        if let Err(err) = self.players.announcement.play(urls, Some(on_finished)) {
            log::warn!("failed to start announcement playback: {err}");
        }
    }

    fn stop_announcement(&mut self) {
        if let Err(err) = self.players.announcement.stop() {
            log::warn!("failed to stop announcement playback: {err}");
        }
    }

    fn emit_wake_word_event(&mut self, phrase: &str) {
        self.event_bus
            .lock()
            .expect("event bus mutex is never poisoned by a panic here")
            .publish(Event::WakeWord { phrase: phrase.to_string() });
    }

    fn schedule_timer_replay(&mut self, after: Duration) {
        let session_id = self.session_id;
        let tx = self.session_tx.clone();
        thread::spawn(move || {
            thread::sleep(after);
            let _ = tx.send(SessionEvent::TimerReplay(session_id));
        });
    }
}

struct MediaPlayerBridge<'a> {
    handle: &'a PlayerHandle,
    preferences: &'a mut PreferencesStore,
}

impl<'a> MediaPlayerDelegate for MediaPlayerBridge<'a> {
    fn persist_volume(&mut self, volume: u8) {
        if let Err(err) = self.preferences.set_volume(volume) {
            log::warn!("failed to persist volume: {err}");
        }
        if let Err(err) = self.handle.set_volume(volume) {
            log::warn!("failed to apply volume: {err}");
        }
    }

    fn play(&mut self, url: &str, announcement: bool) {
        if let Err(err) = self.handle.play(vec![url.to_string()], None) {
            log::warn!("failed to play {url}: {err}");
        }
        let _ = announcement;
    }

    fn pause(&mut self) {
        if let Err(err) = self.handle.pause() {
            log::warn!("failed to pause: {err}");
        }
    }

    fn resume(&mut self) {
        if let Err(err) = self.handle.resume() {
            log::warn!("failed to resume: {err}");
        }
    }
}

pub fn build_entity_registry<'a>(
    media_delegate: &'a mut dyn MediaPlayerDelegate,
    initial_volume: u8,
) -> EntityRegistry<'a> {
    let player = crate::entity::MediaPlayerEntity::new(1, "media_player", "Media Player", initial_volume, media_delegate);
    let mute_switch = SwitchEntity::new(2, "mic_mute", "Mic Mute");
    EntityRegistry::new(vec![Box::new(player) as Box<dyn Entity>, Box::new(mute_switch)])
}
