//! Black-box end-to-end scenarios driven entirely through the crate's public
//! API: encode a frame, push it through `FrameReader`, decode it, and drive
//! `ProtocolSession` the same way the orchestrator's connection loop does.
//! These complement the inline unit tests (which call `ProtocolSession`'s
//! private `handle_message` directly) by also exercising the wire codec.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use voice_satellite::entity::{Entity, EntityRegistry, MediaPlayerDelegate, SwitchEntity};
use voice_satellite::protocol::message::{encode_message, Message, VoiceAssistantEventKind};
use voice_satellite::protocol::session::{ProtocolSession, SessionEnvironment};
use voice_satellite::protocol::{encode, FrameReader};

#[derive(Default)]
struct Recorded {
    sent: Vec<Message>,
    ducked: bool,
    stop_armed: bool,
    announced: Vec<(Vec<String>, bool)>,
}

struct Env(Rc<RefCell<Recorded>>);

impl SessionEnvironment for Env {
    fn send_message(&mut self, message: Message) {
        self.0.borrow_mut().sent.push(message);
    }
    fn device_name(&self) -> String {
        "kitchen".to_string()
    }
    fn mac_address(&self) -> String {
        "00:11:22:33:44:55".to_string()
    }
    fn available_wake_words(&self) -> Vec<(String, String)> {
        vec![("okay_nabu".to_string(), "Okay Nabu".to_string())]
    }
    fn active_wake_words(&self) -> Vec<String> {
        vec!["okay_nabu".to_string()]
    }
    fn max_active_wake_words(&self) -> u32 {
        2
    }
    fn persist_active_wake_words(&mut self, _ids: BTreeSet<String>) {}
    fn wakeup_sound_url(&self) -> String {
        "sounds/wake.flac".to_string()
    }
    fn timer_finished_sound_url(&self) -> String {
        "sounds/timer.flac".to_string()
    }
    fn duck(&mut self) {
        self.0.borrow_mut().ducked = true;
    }
    fn unduck(&mut self) {
        self.0.borrow_mut().ducked = false;
    }
    fn arm_stop_word(&mut self) {
        self.0.borrow_mut().stop_armed = true;
    }
    fn disarm_stop_word(&mut self) {
        self.0.borrow_mut().stop_armed = false;
    }
    fn play_announcement(&mut self, urls: Vec<String>, announcement: bool) {
        self.0.borrow_mut().announced.push((urls, announcement));
    }
    fn stop_announcement(&mut self) {}
    fn emit_wake_word_event(&mut self, _phrase: &str) {}
    fn schedule_timer_replay(&mut self, _after: Duration) {}
}

/// Pushes `message` through the real wire codec (encode -> FrameReader ->
/// decode) and hands the resulting frame to `session`, the way the
/// orchestrator's connection loop does.
fn send_over_wire(session: &mut ProtocolSession, env: &mut Env, reader: &mut FrameReader, message: Message) {
    let (message_type, payload) = encode_message(&message);
    let frame = encode(message_type, &payload);

    // Split the frame into two ragged writes to also exercise buffering.
    let split = frame.len() / 2;
    reader.feed(&frame[..split]);
    assert!(reader.drain_frames().unwrap().is_empty() || split == frame.len());
    reader.feed(&frame[split..]);

    for (message_type, payload) in reader.drain_frames().unwrap() {
        session.handle_frame(env, message_type, &payload).unwrap();
    }
}

#[test]
fn hello_auth_configure_handshake_over_the_wire() {
    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let mut session = ProtocolSession::new();
    let mut env = Env(recorded.clone());
    let mut reader = FrameReader::new();

    send_over_wire(
        &mut session,
        &mut env,
        &mut reader,
        Message::HelloRequest {
            client_info: "hub".to_string(),
            api_version_major: 1,
            api_version_minor: 9,
        },
    );
    send_over_wire(&mut session, &mut env, &mut reader, Message::AuthRequest { password: String::new() });
    send_over_wire(&mut session, &mut env, &mut reader, Message::VoiceAssistantConfigurationRequest);

    let sent = recorded.borrow();
    assert!(sent.sent.iter().any(|m| matches!(m, Message::HelloResponse { .. })));
    assert!(sent.sent.iter().any(|m| matches!(m, Message::AuthResponse { invalid_auth: false })));
    assert!(sent.sent.iter().any(|m| matches!(m, Message::VoiceAssistantConfigurationResponse { .. })));
}

/// Scenario 1 (wake-then-pipeline), driven over the wire codec rather than
/// by calling the session's internal methods directly.
#[test]
fn wake_then_run_start_then_audio_then_run_end_over_the_wire() {
    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let mut session = ProtocolSession::new();
    let mut env = Env(recorded.clone());

    session.on_wake_word_detected(&mut env, "okay_nabu");
    assert!(session.streaming_audio());
    assert!(recorded.borrow().ducked);

    let mut reader = FrameReader::new();
    send_over_wire(
        &mut session,
        &mut env,
        &mut reader,
        Message::VoiceAssistantEventResponse { event: VoiceAssistantEventKind::RunStart },
    );
    send_over_wire(
        &mut session,
        &mut env,
        &mut reader,
        Message::VoiceAssistantEventResponse { event: VoiceAssistantEventKind::SttEnd },
    );
    assert!(!session.streaming_audio());

    send_over_wire(
        &mut session,
        &mut env,
        &mut reader,
        Message::VoiceAssistantEventResponse { event: VoiceAssistantEventKind::RunEnd },
    );
    assert!(!recorded.borrow().ducked);
    assert!(recorded.borrow().sent.iter().any(|m| matches!(m, Message::VoiceAssistantAnnounceFinished)));
}

#[derive(Default)]
struct RecordingDelegate {
    played: Vec<String>,
    persisted_volume: Option<u8>,
}

impl MediaPlayerDelegate for RecordingDelegate {
    fn persist_volume(&mut self, volume: u8) {
        self.persisted_volume = Some(volume);
    }
    fn play(&mut self, url: &str, _announcement: bool) {
        self.played.push(url.to_string());
    }
    fn pause(&mut self) {}
    fn resume(&mut self) {}
}

/// A `MediaPlayerCommandRequest` frame decoded off the wire reaches the
/// media-player entity, not `ProtocolSession` (which only knows about the
/// terminal `ListEntitiesDoneResponse` marker for discovery).
#[test]
fn media_player_command_reaches_entity_registry_via_wire_decode() {
    let mut delegate = RecordingDelegate::default();
    let player = voice_satellite::entity::MediaPlayerEntity::new(1, "media_player", "Media Player", 70, &mut delegate);
    let switch = SwitchEntity::new(2, "mic_mute", "Mic Mute");
    let mut registry = EntityRegistry::new(vec![Box::new(player) as Box<dyn Entity>, Box::new(switch)]);

    let command = Message::MediaPlayerCommandRequest {
        key: 1,
        has_command: false,
        command: 0,
        has_volume: false,
        volume: 0.0,
        has_media_url: true,
        media_url: "http://x/song.mp3".to_string(),
        has_announcement: false,
        announcement: false,
    };
    let (message_type, payload) = encode_message(&command);
    let frame = encode(message_type, &payload);

    let mut reader = FrameReader::new();
    reader.feed(&frame);
    let frames = reader.drain_frames().unwrap();
    assert_eq!(frames.len(), 1);

    let decoded = voice_satellite::protocol::message::decode_message(frames[0].0, &frames[0].1).unwrap();
    let replies = registry.dispatch(&decoded);
    assert_eq!(replies.len(), 1);
    assert!(matches!(replies[0], Message::MediaPlayerStateResponse { key: 1, .. }));

    assert_eq!(delegate.played, vec!["http://x/song.mp3".to_string()]);
}

/// Testable property: preferences written and then re-read yield an
/// equivalent document.
#[test]
fn preferences_round_trip_through_disk() {
    use voice_satellite::preferences::PreferencesStore;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preferences.json");

    let mut store = PreferencesStore::load(path.clone()).unwrap();
    store.set_volume(55).unwrap();
    store.set_active_wake_words(BTreeSet::from(["okay_nabu".to_string(), "stop".to_string()])).unwrap();

    let reloaded = PreferencesStore::load(path).unwrap();
    assert_eq!(reloaded.document().volume_level, 55);
    assert_eq!(
        reloaded.document().active_wake_words,
        BTreeSet::from(["okay_nabu".to_string(), "stop".to_string()])
    );
}
