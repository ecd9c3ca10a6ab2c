//! Message format: one tag character, `|`-separated arguments, `\n`.
//!
//! ```text
//! P|0\n                         PlayerID       [assigned id]
//! X|-1\n                        Disconnect     [id or -1]
//! C|3|-1|0|1.00|2.00|3.00\n     Create         [contract, owner, net id, pos.., rot..]
//! D|0\n                         Delete         [net id]
//! M|4|I|0.5|-1\n                Command        [net id, sub-command, payload..]
//! U|4|P|1|2|3\n                 Update         [net id, sub-command, payload..]
//! ```
//!
//! [`Message`] is the raw, lossless form: a kind plus string arguments.
//! [`Directive`] is the typed view the session dispatches on.

use std::fmt;

use crate::numbers::{format_fixed, parse_f32_or};
use crate::types::{ContractId, NetId, PlayerId, Quat, Transform, Vec3};
use crate::ProtocolError;

/// Ends every message. Never valid inside an argument.
pub const TERMINATOR: char = '\n';

/// Separates the tag and arguments. Never valid inside an argument.
pub const SEPARATOR: char = '|';

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The six message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// server → client: the client's assigned player id.
    PlayerId,
    /// either direction: leave / evict.
    Disconnect,
    /// server → client: instantiate an object.
    Create,
    /// server → client: destroy an object.
    Delete,
    /// client → server: component traffic.
    Command,
    /// server → client: component traffic.
    Update,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::PlayerId,
        MessageKind::Disconnect,
        MessageKind::Create,
        MessageKind::Delete,
        MessageKind::Command,
        MessageKind::Update,
    ];

    /// The wire tag.
    pub fn tag(self) -> char {
        match self {
            MessageKind::PlayerId => 'P',
            MessageKind::Disconnect => 'X',
            MessageKind::Create => 'C',
            MessageKind::Delete => 'D',
            MessageKind::Command => 'M',
            MessageKind::Update => 'U',
        }
    }

    /// Looks up a kind by wire tag.
    pub fn from_tag(tag: char) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Control messages manage sessions and objects; the rest carry
    /// component traffic.
    pub fn is_control(self) -> bool {
        !matches!(self, MessageKind::Command | MessageKind::Update)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::PlayerId => "PlayerID",
            MessageKind::Disconnect => "Disconnect",
            MessageKind::Create => "Create",
            MessageKind::Delete => "Delete",
            MessageKind::Command => "Command",
            MessageKind::Update => "Update",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message as it appears on the wire: a kind and its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub args: Vec<String>,
}

impl Message {
    pub fn new(kind: MessageKind, args: Vec<String>) -> Self {
        Self { kind, args }
    }

    /// `PlayerID` carrying the id the server assigned to the receiver.
    pub fn player_id(id: PlayerId) -> Self {
        Self::new(MessageKind::PlayerId, vec![id.0.to_string()])
    }

    /// `Disconnect` naming the leaving player, or [`PlayerId::WORLD`] when
    /// the server shuts down.
    pub fn disconnect(id: PlayerId) -> Self {
        Self::new(MessageKind::Disconnect, vec![id.0.to_string()])
    }

    /// `Create` with the full transform, two fixed decimals per field.
    pub fn create(
        contract: ContractId,
        owner: PlayerId,
        net_id: NetId,
        transform: &Transform,
    ) -> Self {
        let Transform { position: p, rotation: r } = transform;
        let mut args = vec![
            contract.0.to_string(),
            owner.0.to_string(),
            net_id.0.to_string(),
        ];
        args.extend(
            [p.x, p.y, p.z, r.x, r.y, r.z, r.w].into_iter().map(format_fixed),
        );
        Self::new(MessageKind::Create, args)
    }

    /// `Delete` for one object.
    pub fn delete(net_id: NetId) -> Self {
        Self::new(MessageKind::Delete, vec![net_id.0.to_string()])
    }

    /// Client → server component traffic.
    pub fn command(net_id: NetId, command: &str, payload: &[String]) -> Self {
        Self::component(MessageKind::Command, net_id, command, payload)
    }

    /// Server → client component traffic.
    pub fn update(net_id: NetId, command: &str, payload: &[String]) -> Self {
        Self::component(MessageKind::Update, net_id, command, payload)
    }

    fn component(
        kind: MessageKind,
        net_id: NetId,
        command: &str,
        payload: &[String],
    ) -> Self {
        let mut args = Vec::with_capacity(payload.len() + 2);
        args.push(net_id.0.to_string());
        args.push(command.to_owned());
        args.extend(payload.iter().cloned());
        Self::new(kind, args)
    }

    /// Argument `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Encoding / decoding
// ---------------------------------------------------------------------------

/// Appends the wire form of `message` (terminator included) to `out`.
///
/// On error `out` is left unchanged.
pub fn encode_into(
    message: &Message,
    out: &mut String,
) -> Result<(), ProtocolError> {
    for (index, arg) in message.args.iter().enumerate() {
        if let Some(bad) = arg
            .chars()
            .find(|&c| c == SEPARATOR || c == TERMINATOR || !c.is_ascii())
        {
            return Err(ProtocolError::InvalidArgument {
                index,
                reason: format!("{bad:?} is not allowed in an argument"),
            });
        }
    }

    out.push(message.kind.tag());
    for arg in &message.args {
        out.push(SEPARATOR);
        out.push_str(arg);
    }
    out.push(TERMINATOR);
    Ok(())
}

/// Encodes one message, terminator included.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    let mut out = String::new();
    encode_into(message, &mut out)?;
    Ok(out)
}

/// Encodes several messages back to back.
pub fn encode_batch<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
) -> Result<String, ProtocolError> {
    let mut out = String::new();
    for message in messages {
        encode_into(message, &mut out)?;
    }
    Ok(out)
}

/// Decodes one line. A single trailing terminator is tolerated.
pub fn decode(line: &str) -> Result<Message, ProtocolError> {
    let line = line.strip_suffix(TERMINATOR).unwrap_or(line);
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let mut parts = line.split(SEPARATOR);
    let tag_text = parts.next().unwrap_or_default();
    let mut tag_chars = tag_text.chars();
    let kind = match (tag_chars.next(), tag_chars.next()) {
        (Some(tag), None) => MessageKind::from_tag(tag),
        _ => None,
    }
    .ok_or_else(|| ProtocolError::UnknownTag(tag_text.to_owned()))?;

    Ok(Message::new(kind, parts.map(str::to_owned).collect()))
}

/// Decodes every non-empty line of `text`, in order.
pub fn decode_all(text: &str) -> Result<Vec<Message>, ProtocolError> {
    text.split(TERMINATOR)
        .filter(|line| !line.is_empty())
        .map(decode)
        .collect()
}

// ---------------------------------------------------------------------------
// Directive: typed view
// ---------------------------------------------------------------------------

/// Arguments of a Create message.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateObject {
    pub contract: ContractId,
    pub owner: PlayerId,
    pub net_id: NetId,
    pub transform: Transform,
}

/// Component traffic addressed to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentMessage {
    pub net_id: NetId,
    /// Sub-command name, e.g. `"I"` for input.
    pub command: String,
    /// Opaque payload forwarded verbatim.
    pub payload: Vec<String>,
}

/// A decoded message with its arguments parsed.
///
/// Matching on this enum is exhaustive, so every kind has a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    AssignPlayer(PlayerId),
    Disconnect(PlayerId),
    Create(CreateObject),
    Delete(NetId),
    Command(ComponentMessage),
    Update(ComponentMessage),
}

impl TryFrom<&Message> for Directive {
    type Error = ProtocolError;

    /// Parses identifiers strictly and spatial fields leniently: a missing
    /// or malformed position/rotation field keeps its default.
    fn try_from(message: &Message) -> Result<Self, Self::Error> {
        let directive = match message.kind {
            MessageKind::PlayerId => {
                Directive::AssignPlayer(PlayerId(required(message, 0)?))
            }
            MessageKind::Disconnect => {
                Directive::Disconnect(PlayerId(required(message, 0)?))
            }
            MessageKind::Create => Directive::Create(CreateObject {
                contract: ContractId(required(message, 0)?),
                owner: PlayerId(required(message, 1)?),
                net_id: NetId(required(message, 2)?),
                transform: spatial_fields(&message.args),
            }),
            MessageKind::Delete => Directive::Delete(NetId(required(message, 0)?)),
            MessageKind::Command => Directive::Command(component(message)?),
            MessageKind::Update => Directive::Update(component(message)?),
        };
        Ok(directive)
    }
}

fn required<T: std::str::FromStr>(
    message: &Message,
    index: usize,
) -> Result<T, ProtocolError> {
    let text = message.arg(index).ok_or_else(|| {
        ProtocolError::InvalidMessage(format!(
            "{} needs at least {} arguments, got {}",
            message.kind,
            index + 1,
            message.args.len()
        ))
    })?;
    text.trim().parse().map_err(|_| ProtocolError::InvalidArgument {
        index,
        reason: format!("{text:?} is not a valid identifier"),
    })
}

fn component(message: &Message) -> Result<ComponentMessage, ProtocolError> {
    let net_id = NetId(required(message, 0)?);
    let command = message.arg(1).ok_or_else(|| {
        ProtocolError::InvalidMessage(format!(
            "{} for {net_id} has no sub-command",
            message.kind
        ))
    })?;
    Ok(ComponentMessage {
        net_id,
        command: command.to_owned(),
        payload: message.args[2..].to_vec(),
    })
}

/// Position is read when all three fields are present, rotation when all
/// four are. Each unparsable field keeps its default.
fn spatial_fields(args: &[String]) -> Transform {
    let mut transform = Transform::default();
    if let [x, y, z, ..] = args.get(3..).unwrap_or_default() {
        let d = Vec3::ZERO;
        transform.position = Vec3::new(
            parse_f32_or(x, d.x),
            parse_f32_or(y, d.y),
            parse_f32_or(z, d.z),
        );
    }
    if let [x, y, z, w, ..] = args.get(6..).unwrap_or_default() {
        let d = Quat::IDENTITY;
        transform.rotation = Quat::new(
            parse_f32_or(x, d.x),
            parse_f32_or(y, d.y),
            parse_f32_or(z, d.z),
            parse_f32_or(w, d.w),
        );
    }
    transform
}
