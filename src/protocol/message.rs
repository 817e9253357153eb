//! The satellite's message catalog (§4.7.1): a tagged union of decoded
//! message variants plus the generic field-encoding substrate the hub
//! actually speaks (tag = `field_number << 3 | wire_type`, wire type 0 =
//! varint, 2 = length-delimited). This replaces the original's runtime type
//! inspection with an explicit, typed dispatch surface (§9 Design Notes,
//! "Dynamic message dispatch").

use std::collections::HashMap;

use thiserror::Error;

use super::ProtocolError;

const WIRE_VARINT: u32 = 0;
const WIRE_LEN: u32 = 2;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("missing required field {0}")]
    MissingField(u32),
    #[error("field {0} has the wrong wire type")]
    WrongWireType(u32),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Message type numbers. A small, spec-fixed subset of the hub's published
/// catalog (§6) sufficient to drive the satellite protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    HelloRequest = 1,
    HelloResponse = 2,
    AuthRequest = 3,
    AuthResponse = 4,
    PingRequest = 7,
    PingResponse = 8,
    DisconnectRequest = 5,
    DisconnectResponse = 6,
    DeviceInfoRequest = 9,
    DeviceInfoResponse = 10,
    ListEntitiesRequest = 11,
    ListEntitiesMediaPlayerResponse = 63,
    ListEntitiesSwitchResponse = 17,
    ListEntitiesDoneResponse = 19,
    MediaPlayerStateResponse = 64,
    MediaPlayerCommandRequest = 65,
    SwitchStateResponse = 26,
    SwitchCommandRequest = 33,
    VoiceAssistantRequest = 90,
    VoiceAssistantResponse = 91,
    VoiceAssistantEventResponse = 92,
    VoiceAssistantAudio = 106,
    VoiceAssistantConfigurationRequest = 111,
    VoiceAssistantConfigurationResponse = 112,
    VoiceAssistantSetConfiguration = 113,
    VoiceAssistantAnnounceRequest = 119,
    VoiceAssistantAnnounceFinished = 120,
    VoiceAssistantTimerEventResponse = 115,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceAssistantEventKind {
    RunStart,
    SttVadEnd,
    SttEnd,
    IntentProgress { start_streaming: bool },
    IntentEnd { continue_conversation: bool },
    TtsEnd { url: Option<String> },
    RunEnd,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    HelloRequest { client_info: String, api_version_major: u32, api_version_minor: u32 },
    HelloResponse { api_version_major: u32, api_version_minor: u32, server_info: String, name: String },
    AuthRequest { password: String },
    AuthResponse { invalid_auth: bool },
    PingRequest,
    PingResponse,
    DisconnectRequest,
    DisconnectResponse,
    DeviceInfoRequest,
    DeviceInfoResponse { name: String, mac_address: String, voice_assistant_feature_flags: u32 },
    ListEntitiesRequest,
    ListEntitiesDoneResponse,
    ListEntitiesMediaPlayerResponse { object_id: String, key: u32, name: String },
    ListEntitiesSwitchResponse { object_id: String, key: u32, name: String },
    MediaPlayerStateResponse { key: u32, state: u32, volume: f32, muted: bool },
    MediaPlayerCommandRequest {
        key: u32,
        has_command: bool,
        command: u32,
        has_volume: bool,
        volume: f32,
        has_media_url: bool,
        media_url: String,
        has_announcement: bool,
        announcement: bool,
    },
    SwitchStateResponse { key: u32, state: bool },
    SwitchCommandRequest { key: u32, state: bool },
    VoiceAssistantRequest { start: bool, wake_word_phrase: String },
    VoiceAssistantResponse { port: u32, error: bool },
    VoiceAssistantEventResponse { event: VoiceAssistantEventKind },
    VoiceAssistantAudio { data: Vec<u8>, end: bool },
    VoiceAssistantConfigurationRequest,
    VoiceAssistantConfigurationResponse { available_wake_words: Vec<(String, String)>, active_wake_words: Vec<String>, max_active_wake_words: u32 },
    VoiceAssistantSetConfiguration { active_wake_words: Vec<String> },
    VoiceAssistantAnnounceRequest { media_id: String, preannounce_media_id: Option<String>, start_conversation: bool },
    VoiceAssistantAnnounceFinished,
    VoiceAssistantTimerEventResponse { event_type: u32, timer_id: String },
}

struct FieldWriter {
    out: Vec<u8>,
}

impl FieldWriter {
    fn new() -> Self {
        Self { out: Vec::new() }
    }

    fn write_tag(&mut self, field: u32, wire_type: u32) {
        write_varint(&mut self.out, u64::from((field << 3) | wire_type));
    }

    fn write_uint32(&mut self, field: u32, value: u32) {
        if value == 0 {
            return;
        }
        self.write_tag(field, WIRE_VARINT);
        write_varint(&mut self.out, u64::from(value));
    }

    fn write_bool(&mut self, field: u32, value: bool) {
        if !value {
            return;
        }
        self.write_tag(field, WIRE_VARINT);
        write_varint(&mut self.out, 1);
    }

    fn write_string(&mut self, field: u32, value: &str) {
        if value.is_empty() {
            return;
        }
        self.write_bytes(field, value.as_bytes());
    }

    fn write_bytes(&mut self, field: u32, value: &[u8]) {
        self.write_tag(field, WIRE_LEN);
        write_varint(&mut self.out, value.len() as u64);
        self.out.extend_from_slice(value);
    }

    fn write_float(&mut self, field: u32, value: f32) {
        if value == 0.0 {
            return;
        }
        self.write_tag(field, WIRE_LEN);
        write_varint(&mut self.out, 4);
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

enum FieldValue {
    Varint(u64),
    Bytes(Vec<u8>),
}

fn parse_fields(payload: &[u8]) -> Result<HashMap<u32, FieldValue>, MessageError> {
    let mut fields = HashMap::new();
    let mut cursor = 0usize;
    while cursor < payload.len() {
        let tag = read_varint(payload, &mut cursor).ok_or(ProtocolError::VaruintOverflow)?;
        let field = (tag >> 3) as u32;
        let wire_type = (tag & 0x7) as u32;
        match wire_type {
            w if w == WIRE_VARINT => {
                let value = read_varint(payload, &mut cursor).ok_or(ProtocolError::VaruintOverflow)?;
                fields.insert(field, FieldValue::Varint(value));
            }
            w if w == WIRE_LEN => {
                let len = read_varint(payload, &mut cursor).ok_or(ProtocolError::VaruintOverflow)? as usize;
                if cursor + len > payload.len() {
                    return Err(MessageError::WrongWireType(field));
                }
                let bytes = payload[cursor..cursor + len].to_vec();
                cursor += len;
                fields.insert(field, FieldValue::Bytes(bytes));
            }
            _ => return Err(MessageError::WrongWireType(field)),
        }
    }
    Ok(fields)
}

fn get_string(fields: &HashMap<u32, FieldValue>, field: u32) -> String {
    match fields.get(&field) {
        Some(FieldValue::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
        _ => String::new(),
    }
}

fn get_u32(fields: &HashMap<u32, FieldValue>, field: u32) -> u32 {
    match fields.get(&field) {
        Some(FieldValue::Varint(v)) => *v as u32,
        _ => 0,
    }
}

fn get_bool(fields: &HashMap<u32, FieldValue>, field: u32) -> bool {
    get_u32(fields, field) != 0
}

fn get_bytes(fields: &HashMap<u32, FieldValue>, field: u32) -> Vec<u8> {
    match fields.get(&field) {
        Some(FieldValue::Bytes(b)) => b.clone(),
        _ => Vec::new(),
    }
}

fn get_float(fields: &HashMap<u32, FieldValue>, field: u32) -> f32 {
    match fields.get(&field) {
        Some(FieldValue::Bytes(b)) if b.len() == 4 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        _ => 0.0,
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(buf: &[u8], cursor: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(*cursor)?;
        *cursor += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

/// Encode a decoded `Message` back into its wire type number and body bytes.
pub fn encode_message(message: &Message) -> (u32, Vec<u8>) {
    let mut w = FieldWriter::new();
    let message_type = match message {
        Message::HelloRequest { client_info, api_version_major, api_version_minor } => {
            w.write_string(1, client_info);
            w.write_uint32(2, *api_version_major);
            w.write_uint32(3, *api_version_minor);
            MessageType::HelloRequest
        }
        Message::HelloResponse { api_version_major, api_version_minor, server_info, name } => {
            w.write_uint32(1, *api_version_major);
            w.write_uint32(2, *api_version_minor);
            w.write_string(3, server_info);
            w.write_string(4, name);
            MessageType::HelloResponse
        }
        Message::AuthRequest { password } => {
            w.write_string(1, password);
            MessageType::AuthRequest
        }
        Message::AuthResponse { invalid_auth } => {
            w.write_bool(1, *invalid_auth);
            MessageType::AuthResponse
        }
        Message::PingRequest => MessageType::PingRequest,
        Message::PingResponse => MessageType::PingResponse,
        Message::DisconnectRequest => MessageType::DisconnectRequest,
        Message::DisconnectResponse => MessageType::DisconnectResponse,
        Message::DeviceInfoRequest => MessageType::DeviceInfoRequest,
        Message::DeviceInfoResponse { name, mac_address, voice_assistant_feature_flags } => {
            w.write_string(1, name);
            w.write_string(2, mac_address);
            w.write_uint32(10, *voice_assistant_feature_flags);
            MessageType::DeviceInfoResponse
        }
        Message::ListEntitiesRequest => MessageType::ListEntitiesRequest,
        Message::ListEntitiesDoneResponse => MessageType::ListEntitiesDoneResponse,
        Message::ListEntitiesMediaPlayerResponse { object_id, key, name } => {
            w.write_string(1, object_id);
            w.write_uint32(2, *key);
            w.write_string(3, name);
            MessageType::ListEntitiesMediaPlayerResponse
        }
        Message::ListEntitiesSwitchResponse { object_id, key, name } => {
            w.write_string(1, object_id);
            w.write_uint32(2, *key);
            w.write_string(3, name);
            MessageType::ListEntitiesSwitchResponse
        }
        Message::MediaPlayerStateResponse { key, state, volume, muted } => {
            w.write_uint32(1, *key);
            w.write_uint32(2, *state);
            w.write_float(3, *volume);
            w.write_bool(4, *muted);
            MessageType::MediaPlayerStateResponse
        }
        Message::MediaPlayerCommandRequest {
            key,
            has_command,
            command,
            has_volume,
            volume,
            has_media_url,
            media_url,
            has_announcement,
            announcement,
        } => {
            w.write_uint32(1, *key);
            w.write_bool(2, *has_command);
            w.write_uint32(3, *command);
            w.write_bool(4, *has_volume);
            w.write_float(5, *volume);
            w.write_bool(6, *has_media_url);
            w.write_string(7, media_url);
            w.write_bool(8, *has_announcement);
            w.write_bool(9, *announcement);
            MessageType::MediaPlayerCommandRequest
        }
        Message::SwitchStateResponse { key, state } => {
            w.write_uint32(1, *key);
            w.write_bool(2, *state);
            MessageType::SwitchStateResponse
        }
        Message::SwitchCommandRequest { key, state } => {
            w.write_uint32(1, *key);
            w.write_bool(2, *state);
            MessageType::SwitchCommandRequest
        }
        Message::VoiceAssistantRequest { start, wake_word_phrase } => {
            w.write_bool(1, *start);
            w.write_string(3, wake_word_phrase);
            MessageType::VoiceAssistantRequest
        }
        Message::VoiceAssistantResponse { port, error } => {
            w.write_uint32(1, *port);
            w.write_bool(2, *error);
            MessageType::VoiceAssistantResponse
        }
        Message::VoiceAssistantEventResponse { event } => {
            let (code, sub) = encode_event(event);
            w.write_uint32(1, code);
            if let Some((field, value)) = sub {
                w.write_string(field, &value);
            }
            MessageType::VoiceAssistantEventResponse
        }
        Message::VoiceAssistantAudio { data, end } => {
            w.write_bytes(1, data);
            w.write_bool(2, *end);
            MessageType::VoiceAssistantAudio
        }
        Message::VoiceAssistantConfigurationRequest => MessageType::VoiceAssistantConfigurationRequest,
        Message::VoiceAssistantConfigurationResponse {
            available_wake_words,
            active_wake_words,
            max_active_wake_words,
        } => {
            for (id, phrase) in available_wake_words {
                let mut entry = FieldWriter::new();
                entry.write_string(1, id);
                entry.write_string(2, phrase);
                w.write_bytes(1, &entry.finish());
            }
            for id in active_wake_words {
                w.write_string(2, id);
            }
            w.write_uint32(3, *max_active_wake_words);
            MessageType::VoiceAssistantConfigurationResponse
        }
        Message::VoiceAssistantSetConfiguration { active_wake_words } => {
            for id in active_wake_words {
                w.write_string(1, id);
            }
            MessageType::VoiceAssistantSetConfiguration
        }
        Message::VoiceAssistantAnnounceRequest { media_id, preannounce_media_id, start_conversation } => {
            w.write_string(1, media_id);
            if let Some(pre) = preannounce_media_id {
                w.write_string(2, pre);
            }
            w.write_bool(3, *start_conversation);
            MessageType::VoiceAssistantAnnounceRequest
        }
        Message::VoiceAssistantAnnounceFinished => MessageType::VoiceAssistantAnnounceFinished,
        Message::VoiceAssistantTimerEventResponse { event_type, timer_id } => {
            w.write_uint32(1, *event_type);
            w.write_string(2, timer_id);
            MessageType::VoiceAssistantTimerEventResponse
        }
    };
    (message_type as u32, w.finish())
}

fn encode_event(event: &VoiceAssistantEventKind) -> (u32, Option<(u32, String)>) {
    match event {
        VoiceAssistantEventKind::RunStart => (1, None),
        VoiceAssistantEventKind::SttVadEnd => (2, None),
        VoiceAssistantEventKind::SttEnd => (3, None),
        VoiceAssistantEventKind::IntentProgress { start_streaming } => {
            (4, Some((2, start_streaming.to_string())))
        }
        VoiceAssistantEventKind::IntentEnd { continue_conversation } => {
            (5, Some((2, continue_conversation.to_string())))
        }
        VoiceAssistantEventKind::TtsEnd { url } => (6, url.clone().map(|u| (2, u))),
        VoiceAssistantEventKind::RunEnd => (7, None),
        VoiceAssistantEventKind::Error => (8, None),
    }
}

/// Decode a message body given its wire type number (from the frame codec).
pub fn decode_message(message_type: u32, payload: &[u8]) -> Result<Message, MessageError> {
    let fields = parse_fields(payload)?;
    let message = match message_type {
        t if t == MessageType::HelloRequest as u32 => Message::HelloRequest {
            client_info: get_string(&fields, 1),
            api_version_major: get_u32(&fields, 2),
            api_version_minor: get_u32(&fields, 3),
        },
        t if t == MessageType::AuthRequest as u32 => Message::AuthRequest {
            password: get_string(&fields, 1),
        },
        t if t == MessageType::PingRequest as u32 => Message::PingRequest,
        t if t == MessageType::DisconnectRequest as u32 => Message::DisconnectRequest,
        t if t == MessageType::DeviceInfoRequest as u32 => Message::DeviceInfoRequest,
        t if t == MessageType::ListEntitiesRequest as u32 => Message::ListEntitiesRequest,
        t if t == MessageType::MediaPlayerCommandRequest as u32 => Message::MediaPlayerCommandRequest {
            key: get_u32(&fields, 1),
            has_command: get_bool(&fields, 2),
            command: get_u32(&fields, 3),
            has_volume: get_bool(&fields, 4),
            volume: get_float(&fields, 5),
            has_media_url: get_bool(&fields, 6),
            media_url: get_string(&fields, 7),
            has_announcement: get_bool(&fields, 8),
            announcement: get_bool(&fields, 9),
        },
        t if t == MessageType::SwitchCommandRequest as u32 => Message::SwitchCommandRequest {
            key: get_u32(&fields, 1),
            state: get_bool(&fields, 2),
        },
        t if t == MessageType::VoiceAssistantEventResponse as u32 => {
            let code = get_u32(&fields, 1);
            let sub = get_string(&fields, 2);
            let event = match code {
                1 => VoiceAssistantEventKind::RunStart,
                2 => VoiceAssistantEventKind::SttVadEnd,
                3 => VoiceAssistantEventKind::SttEnd,
                4 => VoiceAssistantEventKind::IntentProgress {
                    start_streaming: sub == "true",
                },
                5 => VoiceAssistantEventKind::IntentEnd {
                    continue_conversation: sub == "true",
                },
                6 => VoiceAssistantEventKind::TtsEnd {
                    url: if sub.is_empty() { None } else { Some(sub) },
                },
                7 => VoiceAssistantEventKind::RunEnd,
                _ => VoiceAssistantEventKind::Error,
            };
            Message::VoiceAssistantEventResponse { event }
        }
        t if t == MessageType::VoiceAssistantConfigurationRequest as u32 => {
            Message::VoiceAssistantConfigurationRequest
        }
        t if t == MessageType::VoiceAssistantSetConfiguration as u32 => {
            let mut active_wake_words = Vec::new();
            let mut cursor = 0usize;
            while cursor < payload.len() {
                let tag = read_varint(payload, &mut cursor).ok_or(ProtocolError::VaruintOverflow)?;
                let field = (tag >> 3) as u32;
                let wire_type = tag & 0x7;
                if wire_type as u32 == WIRE_LEN {
                    let len = read_varint(payload, &mut cursor).ok_or(ProtocolError::VaruintOverflow)? as usize;
                    let bytes = &payload[cursor..cursor + len];
                    cursor += len;
                    if field == 1 {
                        active_wake_words.push(String::from_utf8_lossy(bytes).into_owned());
                    }
                } else {
                    read_varint(payload, &mut cursor).ok_or(ProtocolError::VaruintOverflow)?;
                }
            }
            Message::VoiceAssistantSetConfiguration { active_wake_words }
        }
        t if t == MessageType::VoiceAssistantAnnounceRequest as u32 => Message::VoiceAssistantAnnounceRequest {
            media_id: get_string(&fields, 1),
            preannounce_media_id: {
                let pre = get_string(&fields, 2);
                if pre.is_empty() {
                    None
                } else {
                    Some(pre)
                }
            },
            start_conversation: get_bool(&fields, 3),
        },
        t if t == MessageType::VoiceAssistantAnnounceFinished as u32 => {
            Message::VoiceAssistantAnnounceFinished
        }
        t if t == MessageType::VoiceAssistantTimerEventResponse as u32 => {
            Message::VoiceAssistantTimerEventResponse {
                event_type: get_u32(&fields, 1),
                timer_id: get_string(&fields, 2),
            }
        }
        t if t == MessageType::VoiceAssistantAudio as u32 => Message::VoiceAssistantAudio {
            data: get_bytes(&fields, 1),
            end: get_bool(&fields, 2),
        },
        other => return Err(MessageError::MissingField(other)),
    };
    Ok(message)
}
