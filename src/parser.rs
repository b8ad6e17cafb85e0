//! Classification of single chat log lines into [`Message`]s.
//!
//! Lines are checked in a fixed order and the first match wins:
//!
//!   1. A lead character picks the kind: `C` chat, `E` freq, `P` remote or
//!      private, `T` team.
//!   2. Anything else is tried as public chat first, then as a kill notice,
//!      a `?namelen` reply, a `?log` reply and finally a `?find` reply.
//!   3. Caller-registered custom patterns.
//!   4. [`MessageData::Unknown`].
//!
//! Public chat comes first because it is the line players control; anything
//! typed there must never be mistaken for a server notice.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{ParseError, Result};
use crate::message::{
    ChatMessage, CustomMessage, FindResult, KillMessage, LogType, Message, MessageData,
    MessageKind, PlayerMessage, QueryFindMessage, QueryLogMessage, QueryNamelenMessage,
    RemoteMessage, MAX_NAMELEN,
};

/// Default number of lines a `?find` reply may trail its command by.
pub const DEFAULT_HISTORY_WINDOW: usize = 3;

/// Command name recorded for `?find` queries.
pub const FIND_COMMAND: &str = "find";

/// Largest reported name width that is adopted. Wider reports are still
/// returned but leave the current width alone.
pub const NAMELEN_LIMIT: usize = 255;

/// Leading character of a squad name in remote messages.
pub const SQUAD_MARKER: char = '#';

macro_rules! static_regex {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect(concat!("invalid pattern ", stringify!($name))));
    };
}

// 'C 1:Name> Message'
static_regex!(CHAT_RE, r"\AC (?P<channel>\d+):(?P<name>.*?\S)> (?P<message>.*)\z");
// 'P :SelfName:Message'
static_regex!(REMOTE_OWN_RE, r"\AP :(?P<name>.*?\S):(?P<message>.*)\z");
// 'P (Name)>Message'
static_regex!(REMOTE_IN_RE, r"\AP \((?P<name>.*?\S)\)>(?P<message>.*)\z");
// '  Name(100) killed by: Name'
static_regex!(
    KILL_RE,
    r"\A  (?P<killed>.*\S)\((?P<bounty>\d+)\) killed by: (?P<killer>.*\S)\s*\z"
);
// '  Message Name Length: 24'
static_regex!(NAMELEN_RE, r"\A  Message Name Length: (?P<namelen>\d+)\s*\z");
// '  Log file open: name.log'
static_regex!(LOG_OPEN_RE, r"\A  Log file open: (?P<filename>.*\S)\s*\z");
// '  Log file closed'
static_regex!(LOG_CLOSE_RE, r"\A  Log file closed\s*\z");

static_regex!(
    FIND_DAYS_RE,
    r"\A  Not online, last seen (?P<more>more than )?(?P<days>\d+) days? ago\s*\z"
);
static_regex!(
    FIND_HOURS_RE,
    r"\A  Not online, last seen (?P<hours>\d+) hours? ago\s*\z"
);
static_regex!(
    FIND_ARENA_RE,
    r"\A  (?P<player>.*\S) is in (?P<private>private )?arena (?P<arena>.*\S)\s*\z"
);
static_regex!(FIND_ZONE_RE, r"\A  (?P<player>.*\S) is in (?P<zone>.*\S)\s*\z");

/// Player message layouts whose name field depends on the name width.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum PlayerPattern {
    Pub,
    Team,
    Freq,
    Private,
}

impl PlayerPattern {
    fn prefix(self) -> &'static str {
        match self {
            PlayerPattern::Pub => "  ",
            PlayerPattern::Team => "T ",
            PlayerPattern::Freq => "E ",
            PlayerPattern::Private => "P ",
        }
    }

    fn kind(self) -> MessageKind {
        match self {
            PlayerPattern::Pub => MessageKind::Pub,
            PlayerPattern::Team => MessageKind::Team,
            PlayerPattern::Freq => MessageKind::Freq,
            PlayerPattern::Private => MessageKind::Private,
        }
    }

    fn compile(self, namelen: Option<usize>) -> Result<Regex, regex::Error> {
        let prefix = regex::escape(self.prefix());

        // With a known width the name may itself contain "> ", so it is cut
        // by width. Otherwise the first "> " ends the name.
        let pattern = match namelen {
            Some(width) if width > 0 => format!(r"\A{}(?P<name>.{{{}}})> (?P<message>.*)\z", prefix, width),
            _ => format!(r"\A{}(?P<name>.*?\S)> (?P<message>.*)\z", prefix),
        };

        Regex::new(&pattern)
    }
}

/// The reply phrases of a `?find` query.
///
/// Each is a regex with named groups: `days` needs `days` (and optionally
/// `more`), `hours` needs `hours`, `arena` needs `player` and `arena` (and
/// optionally `private`), `zone` needs `player` and `zone`. They are tried in
/// that order.
#[derive(Clone, Debug)]
pub struct FindTemplates {
    pub days: Regex,
    pub hours: Regex,
    pub arena: Regex,
    pub zone: Regex,
}

impl FindTemplates {
    /// Compiles the four phrases, failing with [`Error::Pattern`](crate::Error::Pattern)
    /// if any of them is not a valid regex.
    pub fn new(days: &str, hours: &str, arena: &str, zone: &str) -> Result<Self> {
        Ok(FindTemplates {
            days: Regex::new(days)?,
            hours: Regex::new(hours)?,
            arena: Regex::new(arena)?,
            zone: Regex::new(zone)?,
        })
    }

    /// Returns `None` if no phrase matches, or the reason a matching phrase
    /// carried a bad number.
    fn parse(&self, line: &str) -> Option<Result<FindResult, &'static str>> {
        if let Some(caps) = self.days.captures(line) {
            return Some(number(&caps, "days").map(|days| FindResult::Days {
                more: caps.name("more").is_some(),
                days,
            }));
        }

        if let Some(caps) = self.hours.captures(line) {
            return Some(number(&caps, "hours").map(|hours| FindResult::Hours { hours }));
        }

        if let Some(caps) = self.arena.captures(line) {
            return Some(Ok(FindResult::Arena {
                player: text(&caps, "player"),
                arena: text(&caps, "arena"),
                private: caps.name("private").is_some(),
            }));
        }

        self.zone.captures(line).map(|caps| {
            Ok(FindResult::Zone {
                player: text(&caps, "player"),
                zone: text(&caps, "zone"),
            })
        })
    }
}

impl Default for FindTemplates {
    fn default() -> Self {
        FindTemplates {
            days: FIND_DAYS_RE.clone(),
            hours: FIND_HOURS_RE.clone(),
            arena: FIND_ARENA_RE.clone(),
            zone: FIND_ZONE_RE.clone(),
        }
    }
}

/// A caller-defined message kind recognized by a regex.
///
/// Every named group that takes part in a match becomes a field of the
/// resulting [`CustomMessage`].
#[derive(Clone, Debug)]
pub struct CustomPattern {
    pub tag: String,
    pub regex: Regex,
}

impl CustomPattern {
    pub fn new(tag: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(CustomPattern {
            tag: tag.into(),
            regex: Regex::new(pattern)?,
        })
    }

    fn parse(&self, line: &str) -> Option<CustomMessage> {
        let caps = self.regex.captures(line)?;
        let fields = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect::<BTreeMap<_, _>>();

        Some(CustomMessage {
            tag: self.tag.clone(),
            fields,
        })
    }
}

/// Settings for a [`MessageParser`].
#[derive(Clone, Debug)]
pub struct ParserConfig {
    /// Width of the name field, if known up front.
    pub namelen: Option<usize>,
    /// Report malformed lines as errors instead of falling through.
    pub strict: bool,
    /// Adopt the width reported by `?namelen` replies.
    pub auto_namelen: bool,
    /// Lines a `?find` reply may trail its recorded command by; `0` accepts
    /// replies without any recorded command.
    pub history_window: usize,
    pub find_templates: FindTemplates,
    pub custom_patterns: Vec<CustomPattern>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            namelen: None,
            strict: false,
            auto_namelen: true,
            history_window: DEFAULT_HISTORY_WINDOW,
            find_templates: FindTemplates::default(),
            custom_patterns: Vec::new(),
        }
    }
}

impl ParserConfig {
    pub fn namelen(mut self, namelen: Option<usize>) -> Self {
        self.namelen = namelen;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn auto_namelen(mut self, auto_namelen: bool) -> Self {
        self.auto_namelen = auto_namelen;
        self
    }

    pub fn history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn find_templates(mut self, templates: FindTemplates) -> Self {
        self.find_templates = templates;
        self
    }

    pub fn custom_pattern(mut self, pattern: CustomPattern) -> Self {
        self.custom_patterns.push(pattern);
        self
    }

    pub fn build(self) -> MessageParser {
        MessageParser::with_config(self)
    }
}

/// Turns lines into [`Message`]s, keeping the state that carries from one
/// line to the next: the learned name width and recently issued commands.
#[derive(Debug)]
pub struct MessageParser {
    namelen: Option<usize>,
    strict: bool,
    auto_namelen: bool,
    history_window: usize,
    find_templates: FindTemplates,
    custom_patterns: Vec<CustomPattern>,
    patterns: HashMap<(PlayerPattern, Option<usize>), Regex>,
    commands: HashMap<(MessageKind, String), u64>,
    sequence: u64,
}

impl Default for MessageParser {
    fn default() -> Self {
        MessageParser::with_config(ParserConfig::default())
    }
}

impl MessageParser {
    pub fn new() -> Self {
        MessageParser::default()
    }

    pub fn with_config(config: ParserConfig) -> Self {
        let ParserConfig {
            namelen,
            strict,
            auto_namelen,
            history_window,
            find_templates,
            custom_patterns,
        } = config;

        MessageParser {
            namelen,
            strict,
            auto_namelen,
            history_window,
            find_templates,
            custom_patterns,
            patterns: HashMap::new(),
            commands: HashMap::new(),
            sequence: 0,
        }
    }

    pub fn namelen(&self) -> Option<usize> {
        self.namelen
    }

    /// Sets the name width used from the next line on; `None` goes back to
    /// finding the name by its delimiter.
    pub fn set_namelen(&mut self, namelen: Option<usize>) {
        self.namelen = namelen;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_auto_namelen(&self) -> bool {
        self.auto_namelen
    }

    pub fn set_auto_namelen(&mut self, auto_namelen: bool) {
        self.auto_namelen = auto_namelen;
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn set_history_window(&mut self, window: usize) {
        self.history_window = window;
    }

    /// Number of lines parsed so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Notes that `command` was sent in `scope`, so that its reply is
    /// recognized within the next `history_window` lines.
    ///
    /// `?find` replies are looked up under `(MessageKind::Pub, FIND_COMMAND)`.
    pub fn record_command(&mut self, scope: MessageKind, command: impl Into<String>) {
        let window = self.history_window as u64;
        let sequence = self.sequence;

        if window > 0 {
            self.commands
                .retain(|_, recorded| sequence.saturating_sub(*recorded) <= window);
        }

        self.commands.insert((scope, command.into()), sequence);
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Classifies `line`.
    pub fn parse(&mut self, line: &str) -> Result<Message, ParseError> {
        self.parse_opt(Some(line))
    }

    /// Classifies `line`, where `None` is a line that could not be read.
    ///
    /// In lenient mode an absent or empty line becomes an unknown message
    /// with an empty line; in strict mode it is [`ParseError::Input`].
    pub fn parse_opt(&mut self, line: Option<&str>) -> Result<Message, ParseError> {
        self.sequence += 1;

        let line = match line {
            Some(line) if !line.is_empty() => line,
            _ if self.strict => return Err(ParseError::Input(line.map(str::to_owned))),
            _ => return Ok(Message::unknown("")),
        };

        let data = match self.classify(line)? {
            Some(data) => data,
            None => self
                .custom_patterns
                .iter()
                .find_map(|pattern| pattern.parse(line))
                .map(MessageData::Custom)
                .unwrap_or(MessageData::Unknown),
        };

        Ok(Message::new(line, data))
    }

    fn classify(&mut self, line: &str) -> Result<Option<MessageData>, ParseError> {
        match line.as_bytes()[0] {
            b'C' => Ok(self.parse_chat(line)?.map(MessageData::Chat)),
            b'E' => Ok(self
                .parse_player(line, PlayerPattern::Freq)?
                .map(MessageData::Freq)),
            b'P' => {
                if let Some(remote) = self.parse_remote(line)? {
                    return Ok(Some(MessageData::Remote(remote)));
                }
                Ok(self
                    .parse_player(line, PlayerPattern::Private)?
                    .map(MessageData::Private))
            }
            b'T' => Ok(self
                .parse_player(line, PlayerPattern::Team)?
                .map(MessageData::Team)),
            _ => self.parse_unprefixed(line),
        }
    }

    fn parse_unprefixed(&mut self, line: &str) -> Result<Option<MessageData>, ParseError> {
        if let Some(player) = self.probe_pub(line) {
            return Ok(Some(MessageData::Pub(player)));
        }
        if let Some(kill) = self.parse_kill(line)? {
            return Ok(Some(MessageData::Kill(kill)));
        }
        if let Some(namelen) = self.parse_namelen(line)? {
            return Ok(Some(MessageData::QueryNamelen(namelen)));
        }
        if let Some(log) = parse_log(line) {
            return Ok(Some(MessageData::QueryLog(log)));
        }
        // Last: these phrases are loose enough to match almost anything.
        if let Some(find) = self.parse_find(line)? {
            return Ok(Some(MessageData::QueryFind(QueryFindMessage { find })));
        }

        Ok(None)
    }

    fn reject<T>(
        &self,
        kind: MessageKind,
        line: &str,
        reason: &'static str,
    ) -> Result<Option<T>, ParseError> {
        if self.strict {
            Err(ParseError::validation(kind, line, reason))
        } else {
            Ok(None)
        }
    }

    fn player_regex(&mut self, family: PlayerPattern) -> Result<&Regex, regex::Error> {
        let key = (family, self.namelen);

        if !self.patterns.contains_key(&key) {
            let regex = match family.compile(self.namelen) {
                Ok(regex) => regex,
                Err(err) => {
                    // Cached below, so this is only reported once per width.
                    tracing::warn!(
                        "No {} pattern for name width {:?}, finding names by delimiter: {}",
                        family.kind(),
                        self.namelen,
                        err
                    );
                    family.compile(None)?
                }
            };
            self.patterns.insert(key, regex);
        }

        Ok(&self.patterns[&key])
    }

    fn match_player(&mut self, line: &str, family: PlayerPattern) -> Option<PlayerMessage> {
        let caps = match self.player_regex(family) {
            Ok(regex) => regex.captures(line)?,
            Err(err) => {
                tracing::warn!("No {} pattern for name width {:?}: {}", family.kind(), self.namelen, err);
                return None;
            }
        };

        Some(PlayerMessage {
            name: text(&caps, "name"),
            message: text(&caps, "message"),
        })
    }

    // 'X Name> Message'
    fn parse_player(
        &mut self,
        line: &str,
        family: PlayerPattern,
    ) -> Result<Option<PlayerMessage>, ParseError> {
        let kind = family.kind();

        let Some(player) = self.match_player(line, family) else {
            return self.reject(kind, line, "line does not match");
        };

        self.validate_player(kind, line, player)
    }

    fn validate_player(
        &self,
        kind: MessageKind,
        line: &str,
        player: PlayerMessage,
    ) -> Result<Option<PlayerMessage>, ParseError> {
        // Fixed-width names are padded, so both ends are trimmed.
        let name = player.name.trim();

        if name.is_empty() || name.chars().count() > MAX_NAMELEN {
            return self.reject(kind, line, "invalid player name");
        }
        if player.message.is_empty() {
            return self.reject(kind, line, "empty player message");
        }

        Ok(Some(PlayerMessage {
            name: name.to_string(),
            message: player.message,
        }))
    }

    // '  Name> Message'
    fn probe_pub(&mut self, line: &str) -> Option<PlayerMessage> {
        let player = self.match_player(line, PlayerPattern::Pub)?;
        let name = player.name.trim();

        if name.is_empty() || name.chars().count() > MAX_NAMELEN || player.message.is_empty() {
            return None;
        }

        Some(PlayerMessage {
            name: name.to_string(),
            message: player.message,
        })
    }

    // 'C 1:Name> Message'
    fn parse_chat(&mut self, line: &str) -> Result<Option<ChatMessage>, ParseError> {
        let Some(caps) = CHAT_RE.captures(line) else {
            return self.reject(MessageKind::Chat, line, "line does not match");
        };
        let Ok(channel) = number(&caps, "channel") else {
            return self.reject(MessageKind::Chat, line, "invalid chat channel");
        };
        let player = PlayerMessage {
            name: text(&caps, "name"),
            message: text(&caps, "message"),
        };

        Ok(self
            .validate_player(MessageKind::Chat, line, player)?
            .map(|player| ChatMessage {
                channel,
                name: player.name,
                message: player.message,
            }))
    }

    // 'P :SelfName:Message'
    // 'P (Name)>Message'
    fn parse_remote(&mut self, line: &str) -> Result<Option<RemoteMessage>, ParseError> {
        let (own, caps) = match REMOTE_OWN_RE.captures(line) {
            Some(caps) => (true, caps),
            None => match REMOTE_IN_RE.captures(line) {
                Some(caps) => (false, caps),
                None => return Ok(None),
            },
        };
        let player = PlayerMessage {
            name: text(&caps, "name"),
            message: text(&caps, "message"),
        };

        Ok(self
            .validate_player(MessageKind::Remote, line, player)?
            .map(|player| RemoteMessage {
                own,
                squad: player.name.starts_with(SQUAD_MARKER),
                name: player.name,
                message: player.message,
            }))
    }

    // '  Name(100) killed by: Name'
    fn parse_kill(&mut self, line: &str) -> Result<Option<KillMessage>, ParseError> {
        let Some(caps) = KILL_RE.captures(line) else {
            return Ok(None);
        };
        let Ok(bounty) = number(&caps, "bounty") else {
            return self.reject(MessageKind::Kill, line, "invalid bounty");
        };
        let killed = text(&caps, "killed").trim_start().to_string();

        if killed.is_empty() {
            return self.reject(MessageKind::Kill, line, "invalid killed name");
        }

        Ok(Some(KillMessage {
            killed,
            bounty,
            killer: text(&caps, "killer"),
        }))
    }

    // '  Message Name Length: 24'
    fn parse_namelen(&mut self, line: &str) -> Result<Option<QueryNamelenMessage>, ParseError> {
        let Some(caps) = NAMELEN_RE.captures(line) else {
            return Ok(None);
        };
        let Ok(namelen) = number(&caps, "namelen") else {
            return self.reject(MessageKind::QueryNamelen, line, "invalid name length");
        };
        let message = QueryNamelenMessage { namelen };

        if message.exceeds_max() {
            tracing::warn!(
                "Reported name length {} exceeds maximum of {}",
                namelen,
                MAX_NAMELEN
            );
        }

        if !self.auto_namelen {
            return Ok(Some(message));
        }

        let width = namelen as usize;

        if width == 0 || width > NAMELEN_LIMIT {
            tracing::warn!("Ignoring reported name length {}", namelen);
        } else {
            tracing::debug!("Adjusting name length to {}", namelen);
            self.namelen = Some(width);
        }

        Ok(Some(message))
    }

    fn find_expected(&mut self) -> bool {
        let window = self.history_window as u64;

        if window == 0 {
            return true;
        }

        let key = (MessageKind::Pub, FIND_COMMAND.to_string());

        match self.commands.get(&key) {
            Some(&recorded) if self.sequence.saturating_sub(recorded) <= window => true,
            Some(_) => {
                self.commands.remove(&key);
                false
            }
            None => false,
        }
    }

    fn parse_find(&mut self, line: &str) -> Result<Option<FindResult>, ParseError> {
        if !self.find_expected() {
            return Ok(None);
        }

        match self.find_templates.parse(line) {
            None => Ok(None),
            Some(Ok(find)) => {
                self.commands
                    .remove(&(MessageKind::Pub, FIND_COMMAND.to_string()));
                Ok(Some(find))
            }
            Some(Err(reason)) => self.reject(MessageKind::QueryFind, line, reason),
        }
    }
}

// '  Log file open: name.log'
// '  Log file closed'
fn parse_log(line: &str) -> Option<QueryLogMessage> {
    if let Some(caps) = LOG_OPEN_RE.captures(line) {
        return Some(QueryLogMessage {
            log_type: LogType::Open,
            filename: Some(text(&caps, "filename")),
        });
    }

    LOG_CLOSE_RE.is_match(line).then_some(QueryLogMessage {
        log_type: LogType::Close,
        filename: None,
    })
}

fn text(caps: &Captures<'_>, name: &str) -> String {
    caps.name(name)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn number(caps: &Captures<'_>, name: &str) -> Result<u32, &'static str> {
    caps.name(name)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or("invalid number")
}
