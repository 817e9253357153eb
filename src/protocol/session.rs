//! Per-connection satellite protocol session (C7): the state machine and
//! voice-pipeline lifecycle described in §4.7. The session owns no sockets,
//! players, or detectors directly — it drives an injected `SessionEnvironment`
//! so the state machine itself stays pure and unit-testable, the way the
//! teacher's connection handlers separate framing from business logic.

use std::collections::BTreeSet;
use std::time::Duration;

use super::message::{Message, VoiceAssistantEventKind};
use super::{MessageError, ProtocolError};

const API_VERSION_MAJOR: u32 = 1;
const API_VERSION_MINOR: u32 = 9;

const FEATURE_VOICE_ASSISTANT: u32 = 1 << 0;
const FEATURE_API_AUDIO: u32 = 1 << 1;
const FEATURE_ANNOUNCE: u32 = 1 << 2;
const FEATURE_START_CONVERSATION: u32 = 1 << 3;
const FEATURE_TIMERS: u32 = 1 << 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opened,
    HelloDone,
    Authenticated,
    Configured,
}

/// Everything a `ProtocolSession` needs from the rest of the satellite to
/// carry out the voice-pipeline lifecycle, without owning any of it.
pub trait SessionEnvironment {
    fn send_message(&mut self, message: Message);
    fn device_name(&self) -> String;
    fn mac_address(&self) -> String;
    fn available_wake_words(&self) -> Vec<(String, String)>;
    fn active_wake_words(&self) -> Vec<String>;
    fn max_active_wake_words(&self) -> u32;
    fn persist_active_wake_words(&mut self, ids: BTreeSet<String>);
    fn wakeup_sound_url(&self) -> String;
    fn timer_finished_sound_url(&self) -> String;

    fn duck(&mut self);
    fn unduck(&mut self);
    fn arm_stop_word(&mut self);
    fn disarm_stop_word(&mut self);
    /// Start playback of `urls` in order on the announcement handle.
    /// `announcement` marks this as a hub-originated announcement rather
    /// than synthesized TTS (both paths share the same handle/callback).
    fn play_announcement(&mut self, urls: Vec<String>, announcement: bool);
    fn stop_announcement(&mut self);
    fn emit_wake_word_event(&mut self, phrase: &str);
    /// Schedule `on_timer_finished` to be invoked again after `after`, as
    /// long as the timer is still ringing when it fires.
    fn schedule_timer_replay(&mut self, after: Duration);
}

/// The full per-connection state: lifecycle plus the voice-pipeline flags
/// described in §3/§4.7.
pub struct ProtocolSession {
    state: SessionState,
    streaming_audio: bool,
    tts_url: Option<String>,
    tts_played: bool,
    continue_conversation: bool,
    timer_ringing: bool,
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Opened,
            streaming_audio: false,
            tts_url: None,
            tts_played: false,
            continue_conversation: false,
            timer_ringing: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn streaming_audio(&self) -> bool {
        self.streaming_audio
    }

    pub fn timer_ringing(&self) -> bool {
        self.timer_ringing
    }

    /// Decode and dispatch one received frame body. A disconnect request or
    /// a fatal protocol error moves the session to `Closed`.
    pub fn handle_frame(
        &mut self,
        env: &mut dyn SessionEnvironment,
        message_type: u32,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let message = match super::message::decode_message(message_type, payload) {
            Ok(message) => message,
            Err(MessageError::Protocol(err)) => return Err(err),
            Err(_) => return Ok(()),
        };
        self.handle_message(env, message);
        Ok(())
    }

    fn handle_message(&mut self, env: &mut dyn SessionEnvironment, message: Message) {
        match (self.state, message) {
            (SessionState::Opened, Message::HelloRequest { .. }) => {
                env.send_message(Message::HelloResponse {
                    api_version_major: API_VERSION_MAJOR,
                    api_version_minor: API_VERSION_MINOR,
                    server_info: "voice-satellite".to_string(),
                    name: env.device_name(),
                });
                self.state = SessionState::HelloDone;
            }
            (SessionState::HelloDone, Message::AuthRequest { .. }) => {
                env.send_message(Message::AuthResponse { invalid_auth: false });
                self.state = SessionState::Authenticated;
            }
            (_, Message::DeviceInfoRequest) => {
                env.send_message(Message::DeviceInfoResponse {
                    name: env.device_name(),
                    mac_address: env.mac_address(),
                    voice_assistant_feature_flags: FEATURE_VOICE_ASSISTANT
                        | FEATURE_API_AUDIO
                        | FEATURE_ANNOUNCE
                        | FEATURE_START_CONVERSATION
                        | FEATURE_TIMERS,
                });
            }
            (_, Message::PingRequest) => env.send_message(Message::PingResponse),
            (_, Message::ListEntitiesRequest) => {
                // Entity descriptions are appended by the registry before
                // this session sees the request; here we only guarantee the
                // terminal marker.
                env.send_message(Message::ListEntitiesDoneResponse);
            }
            (SessionState::Authenticated, Message::VoiceAssistantConfigurationRequest)
            | (SessionState::Configured, Message::VoiceAssistantConfigurationRequest) => {
                self.state = SessionState::Configured;
                env.send_message(Message::VoiceAssistantConfigurationResponse {
                    available_wake_words: env.available_wake_words(),
                    active_wake_words: env.active_wake_words(),
                    max_active_wake_words: env.max_active_wake_words(),
                });
            }
            (SessionState::Configured, Message::VoiceAssistantSetConfiguration { active_wake_words }) => {
                env.persist_active_wake_words(active_wake_words.into_iter().collect());
            }
            (_, Message::VoiceAssistantEventResponse { event }) => {
                self.handle_voice_assistant_event(env, event);
            }
            (_, Message::DisconnectRequest) => {
                env.send_message(Message::DisconnectResponse);
                self.state = SessionState::Closed;
            }
            _ => {}
        }
    }

    fn handle_voice_assistant_event(&mut self, env: &mut dyn SessionEnvironment, event: VoiceAssistantEventKind) {
        match event {
            VoiceAssistantEventKind::RunStart => {
                self.tts_played = false;
                self.continue_conversation = false;
            }
            VoiceAssistantEventKind::SttVadEnd | VoiceAssistantEventKind::SttEnd => {
                self.streaming_audio = false;
            }
            VoiceAssistantEventKind::IntentProgress { start_streaming } => {
                if start_streaming {
                    self.play_tts(env);
                }
            }
            VoiceAssistantEventKind::IntentEnd { continue_conversation } => {
                self.continue_conversation = continue_conversation;
            }
            VoiceAssistantEventKind::TtsEnd { url } => {
                if let Some(url) = url {
                    self.tts_url = Some(url);
                }
                self.play_tts(env);
            }
            VoiceAssistantEventKind::RunEnd => {
                self.streaming_audio = false;
                if !self.tts_played {
                    self.on_tts_finished(env);
                }
            }
            VoiceAssistantEventKind::Error => {
                log::warn!("voice-assistant run reported an error");
                self.streaming_audio = false;
            }
        }
    }

    fn play_tts(&mut self, env: &mut dyn SessionEnvironment) {
        if self.tts_played {
            return;
        }
        let Some(url) = self.tts_url.clone() else {
            return;
        };
        self.tts_played = true;
        env.arm_stop_word();
        env.duck();
        env.play_announcement(vec![url], false);
    }

    /// Invoked by the owning orchestrator when the announcement handle
    /// reports that playback of the (TTS or announcement) clip finished.
    pub fn on_tts_finished(&mut self, env: &mut dyn SessionEnvironment) {
        env.disarm_stop_word();
        env.send_message(Message::VoiceAssistantAnnounceFinished);
        if self.continue_conversation {
            self.continue_conversation = false;
            self.tts_played = false;
            self.tts_url = None;
            self.streaming_audio = true;
            env.send_message(Message::VoiceAssistantRequest {
                start: true,
                wake_word_phrase: String::new(),
            });
        } else {
            env.unduck();
        }
    }

    /// Wake word fired locally. If a timer is ringing, interprets the
    /// detection as "stop the timer" instead of starting a new interaction.
    pub fn on_wake_word_detected(&mut self, env: &mut dyn SessionEnvironment, phrase: &str) {
        if self.timer_ringing {
            self.timer_ringing = false;
            env.disarm_stop_word();
            env.stop_announcement();
            return;
        }
        log::info!("wake word detected: {phrase}");
        env.emit_wake_word_event(phrase);
        env.send_message(Message::VoiceAssistantRequest {
            start: true,
            wake_word_phrase: phrase.to_string(),
        });
        env.duck();
        self.streaming_audio = true;
        env.play_announcement(vec![env.wakeup_sound_url()], false);
    }

    /// Local stop-word detection or hardware stop button.
    pub fn on_stop_requested(&mut self, env: &mut dyn SessionEnvironment) {
        env.disarm_stop_word();
        if self.timer_ringing {
            self.timer_ringing = false;
            env.stop_announcement();
            return;
        }
        env.stop_announcement();
        self.on_tts_finished(env);
    }

    /// Announcement request from the hub, unrelated to a voice-pipeline run.
    pub fn on_announce_request(
        &mut self,
        env: &mut dyn SessionEnvironment,
        media_id: String,
        preannounce_media_id: Option<String>,
        start_conversation: bool,
    ) {
        let mut urls = Vec::new();
        if let Some(pre) = preannounce_media_id {
            urls.push(pre);
        }
        urls.push(media_id);
        env.arm_stop_word();
        if start_conversation {
            self.continue_conversation = true;
        }
        env.duck();
        self.tts_played = true;
        env.play_announcement(urls, true);
    }

    /// A timer managed by the hub finished. Starts (or continues) the
    /// replay loop until cleared by `on_stop_requested` or a wake word.
    pub fn on_timer_finished(&mut self, env: &mut dyn SessionEnvironment) {
        if !self.timer_ringing {
            env.arm_stop_word();
            self.timer_ringing = true;
        }
        if !self.timer_ringing {
            return;
        }
        env.duck();
        env.play_announcement(vec![env.timer_finished_sound_url()], false);
        env.schedule_timer_replay(Duration::from_secs(1));
    }

    pub fn feed_audio_frame(&self, env: &mut dyn SessionEnvironment, frame: Vec<u8>) {
        if !self.streaming_audio {
            return;
        }
        env.send_message(Message::VoiceAssistantAudio { data: frame, end: false });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordedEnv {
        sent: Vec<Message>,
        ducked: bool,
        stop_armed: bool,
        announced: Vec<(Vec<String>, bool)>,
        persisted: Option<BTreeSet<String>>,
    }

    struct TestEnv(Rc<RefCell<RecordedEnv>>);

    impl SessionEnvironment for TestEnv {
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
        fn persist_active_wake_words(&mut self, ids: BTreeSet<String>) {
            self.0.borrow_mut().persisted = Some(ids);
        }
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

    fn harness() -> (ProtocolSession, TestEnv, Rc<RefCell<RecordedEnv>>) {
        let recorded = Rc::new(RefCell::new(RecordedEnv::default()));
        (ProtocolSession::new(), TestEnv(recorded.clone()), recorded)
    }

    #[test]
    fn hello_then_auth_then_configuration_request_advances_state() {
        let (mut session, mut env, _) = harness();
        session.handle_message(
            &mut env,
            Message::HelloRequest {
                client_info: "hub".to_string(),
                api_version_major: 1,
                api_version_minor: 9,
            },
        );
        assert_eq!(session.state(), SessionState::HelloDone);

        session.handle_message(&mut env, Message::AuthRequest { password: String::new() });
        assert_eq!(session.state(), SessionState::Authenticated);

        session.handle_message(&mut env, Message::VoiceAssistantConfigurationRequest);
        assert_eq!(session.state(), SessionState::Configured);
    }

    #[test]
    fn wake_word_starts_pipeline_and_plays_wakeup_sound() {
        let (mut session, mut env, recorded) = harness();
        session.on_wake_word_detected(&mut env, "okay_nabu");
        assert!(session.streaming_audio());
        let rec = recorded.borrow();
        assert!(rec.ducked);
        assert_eq!(rec.announced.last().unwrap().0, vec!["sounds/wake.flac".to_string()]);
    }

    #[test]
    fn run_end_without_tts_triggers_finished_path_and_unducks() {
        let (mut session, mut env, recorded) = harness();
        session.handle_voice_assistant_event(&mut env, VoiceAssistantEventKind::RunStart);
        session.handle_voice_assistant_event(&mut env, VoiceAssistantEventKind::RunEnd);
        assert!(!recorded.borrow().ducked);
        assert!(recorded
            .borrow()
            .sent
            .iter()
            .any(|m| matches!(m, Message::VoiceAssistantAnnounceFinished)));
    }

    #[test]
    fn tts_end_plays_once_and_continue_conversation_starts_new_request() {
        let (mut session, mut env, recorded) = harness();
        session.handle_voice_assistant_event(&mut env, VoiceAssistantEventKind::RunStart);
        session.handle_voice_assistant_event(
            &mut env,
            VoiceAssistantEventKind::IntentEnd { continue_conversation: true },
        );
        session.handle_voice_assistant_event(
            &mut env,
            VoiceAssistantEventKind::TtsEnd { url: Some("http://x/tts.mp3".to_string()) },
        );
        assert_eq!(recorded.borrow().announced.len(), 1);

        // A second TtsEnd before on_tts_finished must not replay.
        session.handle_voice_assistant_event(
            &mut env,
            VoiceAssistantEventKind::TtsEnd { url: Some("http://x/other.mp3".to_string()) },
        );
        assert_eq!(recorded.borrow().announced.len(), 1);

        session.on_tts_finished(&mut env);
        assert!(session.streaming_audio());
        assert!(recorded
            .borrow()
            .sent
            .iter()
            .any(|m| matches!(m, Message::VoiceAssistantRequest { start: true, .. })));
    }

    #[test]
    fn wake_word_while_timer_ringing_stops_the_timer_instead() {
        let (mut session, mut env, recorded) = harness();
        session.on_timer_finished(&mut env);
        assert!(session.timer_ringing());

        session.on_wake_word_detected(&mut env, "okay_nabu");
        assert!(!session.timer_ringing());
        assert!(!recorded.borrow().stop_armed);
    }

    #[test]
    fn set_configuration_persists_requested_ids() {
        let (mut session, mut env, recorded) = harness();
        session.state = SessionState::Configured;
        session.handle_message(
            &mut env,
            Message::VoiceAssistantSetConfiguration {
                active_wake_words: vec!["a".to_string(), "b".to_string()],
            },
        );
        assert_eq!(
            recorded.borrow().persisted,
            Some(BTreeSet::from(["a".to_string(), "b".to_string()]))
        );
    }
}
