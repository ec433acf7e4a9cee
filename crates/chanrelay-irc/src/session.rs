//! One bridged IRC server: a hub backend plus a wire driver task.
//!
//! The session joins the bus like any other connection. It is subscribed to
//! `irc:server:<host>` (lifecycle commands), `chat:channels` (discovery) and
//! one `chat:channel:<id>` per buffer. The wire driver owns the socket and
//! translates IRC lines into broadcasts through a clone of the backend's
//! [`BackendCtx`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use chanrelay_core::{fields, Backend, BackendCtx, RelayError};
use chanrelay_frame::Envelope;

use crate::wire::{privmsg_message, sigil_mode, ChatMessage, IrcLine};

pub const DEFAULT_IRC_PORT: u16 = 6667;

/// Connection settings for one bridged server, taken from the
/// `irc:servers`/`add` payload.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub nick_names: Vec<String>,
    pub user_name: String,
    pub real_name: String,
    pub display_name: String,
}

impl ServerConfig {
    pub fn from_data(data: &Map<String, Value>) -> Result<Self, RelayError> {
        let port = match data.get("port") {
            None => DEFAULT_IRC_PORT,
            Some(value) => value
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or(RelayError::WrongType {
                    field: "port",
                    expected: "port number",
                })?,
        };
        Ok(Self {
            host: fields::ensure_str(data, "host")?.to_string(),
            port,
            nick_names: fields::ensure_str_array(data, "nickNames")?,
            user_name: fields::ensure_str(data, "userName")?.to_string(),
            real_name: fields::ensure_str(data, "realName")?.to_string(),
            display_name: fields::str_or(data, "displayName", "").to_string(),
        })
    }
}

#[derive(Debug, Clone)]
struct UserEntry {
    mode: String,
    status: String,
}

/// One chat buffer: the server console or a joined channel/query.
#[derive(Debug)]
struct Buffer {
    id: String,
    title: String,
    users: HashMap<String, UserEntry>,
}

impl Buffer {
    fn is_channel(&self) -> bool {
        self.title.starts_with('#')
    }
}

/// All buffers of one session, shared between the backend half and the
/// wire driver. The server console buffer uses the host as its id and is
/// always present.
struct BufferBook {
    host: String,
    buffers: Vec<Buffer>,
}

impl BufferBook {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            buffers: vec![Buffer {
                id: host.to_string(),
                title: host.to_string(),
                users: HashMap::new(),
            }],
        }
    }

    fn get(&self, id: &str) -> Option<&Buffer> {
        self.buffers.iter().find(|b| b.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Buffer> {
        self.buffers.iter_mut().find(|b| b.id == id)
    }

    fn id_for_title(&self, title: &str) -> Option<String> {
        self.buffers
            .iter()
            .find(|b| b.title == title)
            .map(|b| b.id.clone())
    }

    fn add(&mut self, title: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.buffers.push(Buffer {
            id: id.clone(),
            title: title.to_string(),
            users: HashMap::new(),
        });
        id
    }

    fn remove_by_title(&mut self, title: &str) -> Option<String> {
        let index = self
            .buffers
            .iter()
            .position(|b| b.title == title && b.id != self.host)?;
        Some(self.buffers.remove(index).id)
    }

    fn parent_of(&self, id: &str) -> Value {
        if id == self.host {
            Value::String(String::new())
        } else {
            Value::String(self.host.clone())
        }
    }

    fn channels(&self) -> Vec<Value> {
        self.buffers
            .iter()
            .map(|b| {
                let parent = if b.id == self.host { "" } else { self.host.as_str() };
                json!({"id": b.id, "parent": parent})
            })
            .collect()
    }
}

/// Handle to a running wire driver. Dropping it tears the socket task down.
struct WireHandle {
    outbound: mpsc::UnboundedSender<IrcLine>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
}

impl WireHandle {
    /// The driver task is still running (it drops its receiver on exit).
    fn active(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn send(&self, line: IrcLine) {
        let _ = self.outbound.send(line);
    }
}

impl Drop for WireHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The backend half of one bridged server.
pub struct IrcSession {
    config: ServerConfig,
    server_channel: String,
    buffers: Arc<Mutex<BufferBook>>,
    wire: Option<WireHandle>,
}

impl IrcSession {
    pub fn new(config: ServerConfig) -> Self {
        let server_channel = format!("irc:server:{}", config.host);
        let buffers = Arc::new(Mutex::new(BufferBook::new(&config.host)));
        Self {
            config,
            server_channel,
            buffers,
            wire: None,
        }
    }

    /// The channels this session must be registered under on the bus.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.server_channel.clone(),
            "chat:channels".to_string(),
            format!("chat:channel:{}", self.config.host),
        ]
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    fn is_connected(&self) -> bool {
        self.wire
            .as_ref()
            .is_some_and(|w| w.active() && w.is_connected())
    }

    fn dispatch(&mut self, envelope: Envelope, ctx: &BackendCtx) -> Result<(), RelayError> {
        let request = envelope.msg_id.ok_or(RelayError::MissingMsgId)?;

        if envelope.channel == self.server_channel {
            match envelope.cmd.as_str() {
                "connect" => self.handle_connect(request, ctx),
                "disconnect" => self.handle_disconnect(request, ctx),
                _ => {}
            }
            return Ok(());
        }

        if envelope.channel == "chat:channels" {
            if envelope.cmd == "list" {
                let channels = self.buffers.lock().expect("buffer book poisoned").channels();
                let mut data = Map::new();
                data.insert("channels".into(), Value::Array(channels));
                ctx.reply("chat:channels", "all", data, request);
            }
            return Ok(());
        }

        if let Some(id) = envelope.channel.strip_prefix("chat:channel:") {
            let id = id.to_string();
            if self.buffers.lock().expect("buffer book poisoned").get(&id).is_none() {
                // Another session's buffer.
                return Ok(());
            }
            match envelope.cmd.as_str() {
                "send" => {
                    let msg = fields::ensure_str(&envelope.data, "msg")?.to_string();
                    self.handle_send(&id, &msg, request, ctx);
                }
                "wantInfo" => self.reply_info(&id, request, ctx),
                "wantUsers" => self.reply_users(&id, request, ctx),
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_connect(&mut self, request: Uuid, ctx: &BackendCtx) {
        if self.wire.as_ref().is_some_and(WireHandle::active) {
            ctx.reply_error(
                &self.server_channel,
                "connect:error",
                "Already connected",
                request,
            );
            return;
        }
        ctx.broadcast(&self.server_channel, "connecting", Map::new());
        self.wire = Some(spawn_wire(
            self.config.clone(),
            Arc::clone(&self.buffers),
            ctx.clone(),
            self.server_channel.clone(),
        ));
    }

    fn handle_disconnect(&mut self, request: Uuid, ctx: &BackendCtx) {
        if !self.is_connected() {
            ctx.reply_error(
                &self.server_channel,
                "disconnect:error",
                "Not connected",
                request,
            );
            return;
        }
        if let Some(wire) = self.wire.take() {
            wire.send(IrcLine::cmd("QUIT", &["leaving"]));
            // Drop cancels the driver; it broadcasts `disconnected` on exit.
        }
    }

    fn handle_send(&mut self, buffer_id: &str, msg: &str, request: Uuid, ctx: &BackendCtx) {
        let Some(wire) = self.wire.as_ref().filter(|w| w.active()) else {
            ctx.reply_error(
                &format!("chat:channel:{buffer_id}"),
                "send:error",
                "Not connected",
                request,
            );
            return;
        };

        let title = self
            .buffers
            .lock()
            .expect("buffer book poisoned")
            .get(buffer_id)
            .map(|b| b.title.clone())
            .unwrap_or_default();
        let nick = self
            .config
            .nick_names
            .first()
            .cloned()
            .unwrap_or_else(|| "chanrelay".to_string());

        // A slash command is parsed, anything else is a plain message to
        // the buffer's target.
        if let Some(rest) = msg.strip_prefix("/join ") {
            wire.send(IrcLine::cmd("JOIN", &[rest.trim()]));
        } else if msg.trim() == "/part" {
            wire.send(IrcLine::cmd("PART", &[&title]));
        } else if let Some(rest) = msg.strip_prefix("/me ") {
            let body = format!("\u{1}ACTION {rest}\u{1}");
            wire.send(IrcLine::cmd("PRIVMSG", &[&title, &body]));
            broadcast_chat(
                ctx,
                buffer_id,
                ChatMessage {
                    from: "-*-".to_string(),
                    content: format!("{nick} {rest}"),
                    kind: "action",
                },
            );
        } else {
            wire.send(IrcLine::cmd("PRIVMSG", &[&title, msg]));
            // Echo the own message so every subscriber, sender included,
            // sees the same stream.
            broadcast_chat(
                ctx,
                buffer_id,
                ChatMessage {
                    from: nick,
                    content: msg.to_string(),
                    kind: "normal",
                },
            );
        }
    }

    fn reply_info(&self, buffer_id: &str, request: Uuid, ctx: &BackendCtx) {
        let book = self.buffers.lock().expect("buffer book poisoned");
        let Some(buffer) = book.get(buffer_id) else {
            return;
        };
        let mut data = Map::new();
        data.insert("title".into(), json!(buffer.title));
        data.insert("id".into(), json!(buffer.id));
        data.insert("parent".into(), book.parent_of(buffer_id));
        data.insert("active".into(), json!(self.is_connected()));
        data.insert(
            "type".into(),
            json!(if buffer.is_channel() { "pound" } else { "user" }),
        );
        ctx.reply(&format!("chat:channel:{buffer_id}"), "info", data, request);
    }

    fn reply_users(&self, buffer_id: &str, request: Uuid, ctx: &BackendCtx) {
        let book = self.buffers.lock().expect("buffer book poisoned");
        let Some(buffer) = book.get(buffer_id) else {
            return;
        };
        let mut users: Vec<(&String, &UserEntry)> = buffer.users.iter().collect();
        users.sort_by_key(|(name, _)| name.as_str());
        let users: Vec<Value> = users
            .into_iter()
            .map(|(name, entry)| {
                json!({"name": name, "mode": entry.mode, "status": entry.status})
            })
            .collect();
        let mut data = Map::new();
        data.insert("users".into(), Value::Array(users));
        ctx.reply(&format!("chat:channel:{buffer_id}"), "users", data, request);
    }
}

impl Backend for IrcSession {
    fn name(&self) -> &'static str {
        "irc-session"
    }

    fn started(
        &mut self,
        ctx: &BackendCtx,
    ) -> impl Future<Output = Result<(), RelayError>> + Send {
        // Announce the server console buffer to discovery subscribers.
        let mut data = Map::new();
        data.insert("parent".into(), Value::Null);
        data.insert("id".into(), json!(self.config.host));
        ctx.broadcast("chat:channels", "added", data);
        async { Ok(()) }
    }

    fn handle(
        &mut self,
        envelope: Envelope,
        ctx: &BackendCtx,
    ) -> impl Future<Output = Result<(), RelayError>> + Send {
        let result = self.dispatch(envelope, ctx);
        async move { result }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn broadcast_chat(ctx: &BackendCtx, buffer_id: &str, message: ChatMessage) {
    let mut data = Map::new();
    data.insert("content".into(), json!(message.content));
    data.insert("from".into(), json!(message.from));
    data.insert("type".into(), json!(message.kind));
    data.insert("timestamp".into(), json!(now_ms()));
    ctx.broadcast(&format!("chat:channel:{buffer_id}"), "message", data);
}

fn spawn_wire(
    config: ServerConfig,
    buffers: Arc<Mutex<BufferBook>>,
    ctx: BackendCtx,
    server_channel: String,
) -> WireHandle {
    let (outbound, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let connected = Arc::new(AtomicBool::new(false));
    tokio::spawn(run_wire(
        config,
        buffers,
        ctx,
        server_channel,
        cancel.clone(),
        rx,
        Arc::clone(&connected),
    ));
    WireHandle {
        outbound,
        cancel,
        connected,
    }
}

async fn run_wire(
    config: ServerConfig,
    buffers: Arc<Mutex<BufferBook>>,
    ctx: BackendCtx,
    server_channel: String,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedReceiver<IrcLine>,
    connected: Arc<AtomicBool>,
) {
    let host = config.host.clone();
    match TcpStream::connect((config.host.as_str(), config.port)).await {
        Err(err) => {
            warn!(%host, port = config.port, %err, "irc connect failed");
        }
        Ok(stream) => {
            let mut driver = WireDriver {
                framed: Framed::new(stream, LinesCodec::new_with_max_length(1024)),
                nick: config
                    .nick_names
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "chanrelay".to_string()),
                nick_index: 0,
                config,
                buffers,
                ctx: ctx.clone(),
                server_channel: server_channel.clone(),
                connected: Arc::clone(&connected),
            };
            if let Err(err) = driver.run(cancel, outbound).await {
                debug!(%host, %err, "irc wire ended");
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    ctx.broadcast(&server_channel, "disconnected", Map::new());
}

/// Owns the socket; translates between IRC lines and bus broadcasts.
struct WireDriver {
    framed: Framed<TcpStream, LinesCodec>,
    config: ServerConfig,
    nick: String,
    nick_index: usize,
    buffers: Arc<Mutex<BufferBook>>,
    ctx: BackendCtx,
    server_channel: String,
    connected: Arc<AtomicBool>,
}

impl WireDriver {
    async fn run(
        &mut self,
        cancel: CancellationToken,
        mut outbound: mpsc::UnboundedReceiver<IrcLine>,
    ) -> Result<(), LinesCodecError> {
        self.send(IrcLine::cmd("NICK", &[&self.nick.clone()])).await?;
        self.send(IrcLine::cmd(
            "USER",
            &[
                &self.config.user_name.clone(),
                "0",
                "*",
                &self.config.real_name.clone(),
            ],
        ))
        .await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = outbound.recv() => match line {
                    None => break,
                    Some(line) => self.send(line).await?,
                },
                frame = self.framed.next() => match frame {
                    None => break,
                    Some(Err(err)) => return Err(err),
                    Some(Ok(text)) => {
                        if let Some(line) = IrcLine::parse(&text) {
                            self.handle_line(line).await?;
                        }
                    }
                },
            }
        }
        Ok(())
    }

    async fn send(&mut self, line: IrcLine) -> Result<(), LinesCodecError> {
        self.framed.send(line.to_string()).await
    }

    async fn handle_line(&mut self, line: IrcLine) -> Result<(), LinesCodecError> {
        match line.command.as_str() {
            "PING" => {
                let token = line.trailing().to_string();
                self.send(IrcLine::cmd("PONG", &[&token])).await?;
            }
            // Welcome: registration done.
            "001" => {
                self.connected.store(true, Ordering::Relaxed);
                self.ctx
                    .broadcast(&self.server_channel, "connected", Map::new());
            }
            // Nick collision: fall through the configured alternatives.
            "433" => {
                self.nick_index += 1;
                self.nick = match self.config.nick_names.get(self.nick_index) {
                    Some(next) => next.clone(),
                    None => format!("{}_", self.nick),
                };
                let nick = self.nick.clone();
                self.send(IrcLine::cmd("NICK", &[&nick])).await?;
            }
            "JOIN" => self.handle_join(&line),
            "PART" => self.handle_part(&line),
            "QUIT" => self.handle_quit(&line),
            "353" => self.handle_names(&line),
            "PRIVMSG" => self.handle_privmsg(&line),
            "NOTICE" => self.handle_notice(&line),
            _ => {}
        }
        Ok(())
    }

    fn handle_join(&mut self, line: &IrcLine) {
        let channel = if line.params.is_empty() {
            return;
        } else {
            line.param(0).to_string()
        };
        let Some(who) = line.nick().map(str::to_string) else {
            return;
        };

        if who == self.nick {
            let id = {
                let mut book = self.buffers.lock().expect("buffer book poisoned");
                book.add(&channel)
            };
            self.ctx.subscribe(&format!("chat:channel:{id}"));
            let mut data = Map::new();
            data.insert("parent".into(), json!(self.config.host));
            data.insert("id".into(), json!(id));
            self.ctx.broadcast("chat:channels", "added", data);
            self.special(
                &id,
                format!("You have joined {channel} as {}", self.nick),
            );
        } else if let Some(id) = self.buffer_id(&channel) {
            self.add_user(&id, &who, "", "normal");
            self.special(&id, format!("{who} has joined {channel}"));
        }
    }

    fn handle_part(&mut self, line: &IrcLine) {
        let channel = line.param(0).to_string();
        let Some(who) = line.nick().map(str::to_string) else {
            return;
        };

        if who == self.nick {
            let removed = self
                .buffers
                .lock()
                .expect("buffer book poisoned")
                .remove_by_title(&channel);
            if let Some(id) = removed {
                self.ctx.unsubscribe(&format!("chat:channel:{id}"));
                let mut data = Map::new();
                data.insert("id".into(), json!(id));
                self.ctx.broadcast("chat:channels", "removed", data);
            }
        } else if let Some(id) = self.buffer_id(&channel) {
            self.remove_user(&id, &who);
            self.special(&id, format!("{who} has left {channel}"));
        }
    }

    fn handle_quit(&mut self, line: &IrcLine) {
        let Some(who) = line.nick().map(str::to_string) else {
            return;
        };
        let reason = line.trailing().to_string();
        let affected: Vec<String> = {
            let book = self.buffers.lock().expect("buffer book poisoned");
            book.buffers
                .iter()
                .filter(|b| b.users.contains_key(&who))
                .map(|b| b.id.clone())
                .collect()
        };
        for id in affected {
            self.remove_user(&id, &who);
            self.special(&id, format!("{who} has quit ({reason})"));
        }
    }

    fn handle_names(&mut self, line: &IrcLine) {
        // :server 353 <me> <symbol> <channel> :nick @nick +nick
        let channel = line.param(2).to_string();
        let Some(id) = self.buffer_id(&channel) else {
            return;
        };
        let names = line.trailing().to_string();
        for raw in names.split_ascii_whitespace() {
            let (name, mode) = sigil_mode(raw);
            self.add_user(&id, name, mode, "normal");
        }
    }

    fn handle_privmsg(&mut self, line: &IrcLine) {
        let target = line.param(0).to_string();
        let from = line.nick().unwrap_or("*").to_string();
        // Channel traffic lands in its buffer; everything else (queries,
        // server chatter) falls back to the server console.
        let id = self
            .buffer_id(&target)
            .unwrap_or_else(|| self.config.host.clone());
        broadcast_chat(&self.ctx, &id, privmsg_message(&from, line.trailing()));
    }

    fn handle_notice(&mut self, line: &IrcLine) {
        let from = line.nick().unwrap_or("*").to_string();
        let target = line.param(0).to_string();
        let id = self
            .buffer_id(&target)
            .unwrap_or_else(|| self.config.host.clone());
        broadcast_chat(
            &self.ctx,
            &id,
            ChatMessage {
                from,
                content: line.trailing().to_string(),
                kind: "notice",
            },
        );
    }

    fn buffer_id(&self, title: &str) -> Option<String> {
        self.buffers
            .lock()
            .expect("buffer book poisoned")
            .id_for_title(title)
    }

    fn add_user(&mut self, buffer_id: &str, name: &str, mode: &str, status: &str) {
        {
            let mut book = self.buffers.lock().expect("buffer book poisoned");
            let Some(buffer) = book.get_mut(buffer_id) else {
                return;
            };
            buffer.users.insert(
                name.to_string(),
                UserEntry {
                    mode: mode.to_string(),
                    status: status.to_string(),
                },
            );
        }
        let mut data = Map::new();
        data.insert("status".into(), json!(status));
        data.insert("mode".into(), json!(mode));
        data.insert("name".into(), json!(name));
        self.ctx
            .broadcast(&format!("chat:channel:{buffer_id}"), "users:added", data);
    }

    fn remove_user(&mut self, buffer_id: &str, name: &str) {
        {
            let mut book = self.buffers.lock().expect("buffer book poisoned");
            let Some(buffer) = book.get_mut(buffer_id) else {
                return;
            };
            if buffer.users.remove(name).is_none() {
                return;
            }
        }
        let mut data = Map::new();
        data.insert("name".into(), json!(name));
        self.ctx
            .broadcast(&format!("chat:channel:{buffer_id}"), "users:removed", data);
    }

    fn special(&self, buffer_id: &str, content: String) {
        broadcast_chat(
            &self.ctx,
            buffer_id,
            ChatMessage {
                from: "-->".to_string(),
                content,
                kind: "special",
            },
        );
    }
}
