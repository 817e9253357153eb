//! Entity registry (C8): the small set of satellite-side entities the hub
//! can list and command — a media player and a mic-mute switch. Grounded on
//! the original's entity model, redesigned as an explicit trait dispatched
//! by key rather than runtime attribute introspection (§9 Design Notes).

use crate::protocol::message::Message;

/// Player state codes mirrored from the hub's media-player entity contract.
pub const PLAYER_STATE_IDLE: u32 = 0;
pub const PLAYER_STATE_PLAYING: u32 = 1;
pub const PLAYER_STATE_PAUSED: u32 = 2;

/// Media-player command codes as carried in `MediaPlayerCommandRequest`.
const COMMAND_PLAY: u32 = 1;
const COMMAND_PAUSE: u32 = 2;
const COMMAND_STOP: u32 = 3;

pub trait Entity: Send {
    fn key(&self) -> u32;
    /// One or more "list entity" messages describing this entity, emitted
    /// during discovery.
    fn describe(&self) -> Vec<Message>;
    /// Handle an incoming command. Entities silently ignore any message
    /// whose key does not match their own.
    fn handle(&mut self, message: &Message) -> Vec<Message>;
}

/// Side effects a `MediaPlayerEntity` command handler needs from its owner
/// (volume persistence, URL playback) without owning the player itself.
pub trait MediaPlayerDelegate {
    fn persist_volume(&mut self, volume: u8);
    fn play(&mut self, url: &str, announcement: bool);
    fn pause(&mut self);
    fn resume(&mut self);
}

pub struct MediaPlayerEntity<'a> {
    key: u32,
    object_id: String,
    name: String,
    state: u32,
    volume: f32,
    muted: bool,
    delegate: &'a mut dyn MediaPlayerDelegate,
}

impl<'a> MediaPlayerEntity<'a> {
    pub fn new(key: u32, object_id: impl Into<String>, name: impl Into<String>, initial_volume: u8, delegate: &'a mut dyn MediaPlayerDelegate) -> Self {
        Self {
            key,
            object_id: object_id.into(),
            name: name.into(),
            state: PLAYER_STATE_IDLE,
            volume: f32::from(initial_volume) / 100.0,
            muted: false,
            delegate,
        }
    }

    pub fn set_state(&mut self, state: u32) -> Message {
        self.state = state;
        self.state_message()
    }

    fn state_message(&self) -> Message {
        Message::MediaPlayerStateResponse {
            key: self.key,
            state: self.state,
            volume: self.volume,
            muted: self.muted,
        }
    }
}

impl<'a> Entity for MediaPlayerEntity<'a> {
    fn key(&self) -> u32 {
        self.key
    }

    fn describe(&self) -> Vec<Message> {
        vec![Message::ListEntitiesMediaPlayerResponse {
            object_id: self.object_id.clone(),
            key: self.key,
            name: self.name.clone(),
        }]
    }

    fn handle(&mut self, message: &Message) -> Vec<Message> {
        let Message::MediaPlayerCommandRequest {
            key,
            has_command,
            command,
            has_volume,
            volume,
            has_media_url,
            media_url,
            has_announcement,
            announcement,
        } = message
        else {
            return Vec::new();
        };
        if *key != self.key {
            return Vec::new();
        }

        if *has_volume {
            self.volume = volume.clamp(0.0, 1.0);
            self.delegate.persist_volume((self.volume * 100.0).round() as u8);
        }

        if *has_media_url {
            let announcement = *has_announcement && *announcement;
            self.delegate.play(media_url, announcement);
            self.state = PLAYER_STATE_PLAYING;
        } else if *has_command {
            match *command {
                COMMAND_PLAY => {
                    self.delegate.resume();
                    self.state = PLAYER_STATE_PLAYING;
                }
                COMMAND_PAUSE => {
                    self.delegate.pause();
                    self.state = PLAYER_STATE_PAUSED;
                }
                COMMAND_STOP => {
                    self.delegate.pause();
                    self.state = PLAYER_STATE_IDLE;
                }
                _ => {}
            }
        }

        vec![self.state_message()]
    }
}

pub struct SwitchEntity {
    key: u32,
    object_id: String,
    name: String,
    state: bool,
}

impl SwitchEntity {
    pub fn new(key: u32, object_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key,
            object_id: object_id.into(),
            name: name.into(),
            state: false,
        }
    }

    pub fn state(&self) -> bool {
        self.state
    }
}

impl Entity for SwitchEntity {
    fn key(&self) -> u32 {
        self.key
    }

    fn describe(&self) -> Vec<Message> {
        vec![Message::ListEntitiesSwitchResponse {
            object_id: self.object_id.clone(),
            key: self.key,
            name: self.name.clone(),
        }]
    }

    fn handle(&mut self, message: &Message) -> Vec<Message> {
        let Message::SwitchCommandRequest { key, state } = message else {
            return Vec::new();
        };
        if *key != self.key {
            return Vec::new();
        }
        self.state = *state;
        vec![Message::SwitchStateResponse { key: self.key, state: self.state }]
    }
}

/// Dispatches discovery and command messages to a fixed set of entities.
pub struct EntityRegistry<'a> {
    entities: Vec<Box<dyn Entity + 'a>>,
}

impl<'a> EntityRegistry<'a> {
    pub fn new(entities: Vec<Box<dyn Entity + 'a>>) -> Self {
        Self { entities }
    }

    pub fn describe_all(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.entities.iter().flat_map(|e| e.describe()).collect();
        messages.push(Message::ListEntitiesDoneResponse);
        messages
    }

    pub fn dispatch(&mut self, message: &Message) -> Vec<Message> {
        self.entities.iter_mut().flat_map(|e| e.handle(message)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingDelegate {
        played: Vec<(String, bool)>,
        persisted_volume: Option<u8>,
        paused: bool,
        resumed: bool,
    }

    impl MediaPlayerDelegate for RecordingDelegate {
        fn persist_volume(&mut self, volume: u8) {
            self.persisted_volume = Some(volume);
        }
        fn play(&mut self, url: &str, announcement: bool) {
            self.played.push((url.to_string(), announcement));
        }
        fn pause(&mut self) {
            self.paused = true;
        }
        fn resume(&mut self) {
            self.resumed = true;
        }
    }

    #[test]
    fn media_player_ignores_commands_for_other_keys() {
        let mut delegate = RecordingDelegate::default();
        let mut entity = MediaPlayerEntity::new(1, "media_player", "Media Player", 70, &mut delegate);
        let replies = entity.handle(&Message::MediaPlayerCommandRequest {
            key: 99,
            has_command: true,
            command: 1,
            has_volume: false,
            volume: 0.0,
            has_media_url: false,
            media_url: String::new(),
            has_announcement: false,
            announcement: false,
        });
        assert!(replies.is_empty());
    }

    #[test]
    fn media_player_play_url_persists_volume_and_plays() {
        let mut delegate = RecordingDelegate::default();
        let mut entity = MediaPlayerEntity::new(1, "media_player", "Media Player", 70, &mut delegate);
        let replies = entity.handle(&Message::MediaPlayerCommandRequest {
            key: 1,
            has_command: false,
            command: 0,
            has_volume: true,
            volume: 0.3,
            has_media_url: true,
            media_url: "http://x/song.mp3".to_string(),
            has_announcement: false,
            announcement: false,
        });
        assert_eq!(replies.len(), 1);
        assert_eq!(delegate.persisted_volume, Some(30));
        assert_eq!(delegate.played, vec![("http://x/song.mp3".to_string(), false)]);
    }

    #[test]
    fn switch_flips_and_reports_state() {
        let mut switch = SwitchEntity::new(2, "mic_mute", "Mic Mute");
        let replies = switch.handle(&Message::SwitchCommandRequest { key: 2, state: true });
        assert_eq!(replies, vec![Message::SwitchStateResponse { key: 2, state: true }]);
        assert!(switch.state());
    }

    #[test]
    fn registry_describe_all_ends_with_done_marker() {
        let mut delegate = RecordingDelegate::default();
        let player = MediaPlayerEntity::new(1, "media_player", "Media Player", 70, &mut delegate);
        let switch = SwitchEntity::new(2, "mic_mute", "Mic Mute");
        let registry = EntityRegistry::new(vec![Box::new(player), Box::new(switch)]);
        let described = registry.describe_all();
        assert_eq!(described.len(), 3);
        assert!(matches!(described.last().unwrap(), Message::ListEntitiesDoneResponse));
    }
}
