/// Routing engine: turns one parsed command into outbound frames.
///
/// Frames are planned and delivered while the registry lock is held, so a
/// fan-out always goes to the exact membership of one snapshot. Delivery only
/// queues onto per-connection outboxes and never waits on a socket.
use tracing::{debug, info};

use super::command::{Command, IDENTIFY_PREFIX, TYPING_END, TYPING_START};
use super::log::ChatLog;
use super::registry::{Connection, ConnectionId, Registry, SharedRegistry};

/// Display name of a connection that never sent `/user`.
pub const ANONYMOUS: &str = "Anonymous";

pub const REJECTED_NOTICE: &str = "[SYSTEM] Username already taken. Connection rejected.";
pub const IDENTIFY_FIRST_NOTICE: &str = "[SYSTEM] Identify with /user <name> first.";

pub fn join_notice(name: &str) -> String {
    format!("[SYSTEM] {name} has joined.")
}

pub fn leave_notice(name: &str) -> String {
    format!("[SYSTEM] {name} has left.")
}

pub fn not_found_notice(target: &str) -> String {
    format!("[SYSTEM] User '{target}' not found.")
}

pub fn chat_line(sender: &str, text: &str) -> String {
    format!("{sender}: {text}")
}

pub fn private_line(sender: &str, target: &str, text: &str) -> String {
    format!("[PM to {target}] {sender}: {text}")
}

pub fn user_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.into_iter().collect();
    format!("/users {}", names.join(","))
}

/// Who receives a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every admitted connection.
    Everyone,
    /// Every admitted connection except this one.
    AllExcept(ConnectionId),
    /// One admitted connection.
    Member(ConnectionId),
    /// The connection that issued the command, admitted or not.
    Origin,
}

/// An outbound frame and its delivery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub text: String,
    pub target: Target,
}

impl Frame {
    pub fn new(text: impl Into<String>, target: Target) -> Self {
        Self {
            text: text.into(),
            target,
        }
    }
}

/// Outcome of an identify attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

/// Plan the frames for one command from `origin`, known as `sender`.
///
/// `Identify` here is a repeated `/user` and is treated as chat.
pub fn plan(
    registry: &Registry,
    origin: ConnectionId,
    sender: &str,
    command: Command,
) -> Vec<Frame> {
    match command {
        Command::Identify(name) => plan(
            registry,
            origin,
            sender,
            Command::Broadcast(format!("{IDENTIFY_PREFIX}{name}")),
        ),
        Command::Broadcast(text) => {
            vec![Frame::new(chat_line(sender, &text), Target::AllExcept(origin))]
        }
        Command::DirectMessage { target, text } => match registry.find_by_name(&target) {
            Some(member) => {
                let line = private_line(sender, &target, &text);
                if member.conn.id == origin {
                    vec![Frame::new(line, Target::Origin)]
                } else {
                    vec![
                        Frame::new(line.clone(), Target::Member(member.conn.id)),
                        Frame::new(line, Target::Origin),
                    ]
                }
            }
            None => vec![Frame::new(not_found_notice(&target), Target::Origin)],
        },
        Command::TypingStart => vec![Frame::new(
            format!("{TYPING_START} {sender}"),
            Target::AllExcept(origin),
        )],
        Command::TypingEnd => vec![Frame::new(
            format!("{TYPING_END} {sender}"),
            Target::AllExcept(origin),
        )],
        Command::Unrecognized => Vec::new(),
    }
}

/// The `/users` frame for the registry's current snapshot.
pub fn current_user_list(registry: &Registry) -> String {
    user_list(registry.snapshot().iter().map(|(_, name)| name.as_str()))
}

/// Queue frames onto recipients' outboxes. Closed outboxes are skipped.
pub fn deliver(registry: &Registry, origin: &Connection, frames: &[Frame]) {
    for frame in frames {
        match frame.target {
            Target::Everyone => {
                for member in registry.members() {
                    member.conn.send(&frame.text);
                }
            }
            Target::AllExcept(skip) => {
                for member in registry.members().filter(|m| m.conn.id != skip) {
                    member.conn.send(&frame.text);
                }
            }
            Target::Member(id) => {
                if let Some(member) = registry.get(id) {
                    member.conn.send(&frame.text);
                }
            }
            Target::Origin => origin.send(&frame.text),
        }
    }
}

/// Routes commands against a shared registry.
#[derive(Debug, Clone)]
pub struct Router {
    registry: SharedRegistry,
    log: ChatLog,
}

impl Router {
    pub fn new(registry: SharedRegistry, log: ChatLog) -> Self {
        Self { registry, log }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    /// Try to admit `origin` as `name`.
    ///
    /// On success everyone else hears the join notice and everyone, the new
    /// member included, gets the refreshed user list. On a name clash nothing
    /// is sent; the caller reports the rejection and closes the connection.
    pub async fn admit(&self, origin: &Connection, name: &str) -> Admission {
        let mut reg = self.registry.lock().await;
        if !reg.try_admit(origin, name) {
            info!(conn = %origin.id, addr = %origin.addr, user = name, "rejected duplicate username");
            self.log.log(&format!(
                "Connection from {} rejected (duplicate username).",
                origin.addr
            ));
            return Admission::Rejected;
        }

        info!(conn = %origin.id, addr = %origin.addr, user = name, "admitted");
        self.log.log(&format!("Client '{name}' connected."));

        let frames = [
            Frame::new(join_notice(name), Target::AllExcept(origin.id)),
            Frame::new(current_user_list(&reg), Target::Everyone),
        ];
        deliver(&reg, origin, &frames);
        Admission::Admitted
    }

    /// Route one command from `origin`, known to peers as `sender`.
    pub async fn route(&self, origin: &Connection, sender: &str, command: Command) {
        let reg = self.registry.lock().await;

        match &command {
            Command::Identify(name) => {
                self.log.chat(&chat_line(sender, &format!("{IDENTIFY_PREFIX}{name}")));
            }
            Command::Broadcast(text) => self.log.chat(&chat_line(sender, text)),
            Command::DirectMessage { target, text } => {
                if reg.find_by_name(target).is_some() {
                    self.log.chat(&format!("PM from {sender} to {target}: {text}"));
                } else {
                    debug!(conn = %origin.id, sender, to = %target, "direct message target not found");
                }
            }
            Command::TypingStart | Command::TypingEnd => {}
            Command::Unrecognized => {
                debug!(conn = %origin.id, sender, "dropped malformed command");
            }
        }

        let frames = plan(&reg, origin.id, sender, command);
        deliver(&reg, origin, &frames);
    }

    /// Remove `origin` and tell the remaining members.
    ///
    /// Also runs for connections that were never admitted: a rejected
    /// duplicate leaves under the name it claimed, and the member holding
    /// that name stays registered.
    pub async fn depart(&self, origin: &Connection, name: &str) {
        let mut reg = self.registry.lock().await;
        reg.remove(origin.id);
        self.log.log(&format!("Client '{name}' disconnected."));

        let frames = [
            Frame::new(leave_notice(name), Target::Everyone),
            Frame::new(current_user_list(&reg), Target::Everyone),
        ];
        deliver(&reg, origin, &frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    struct Peer {
        conn: Connection,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl Peer {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                conn: Connection::new(([127, 0, 0, 1], 0).into(), tx),
                rx,
            }
        }

        fn drain(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(frame);
            }
            out
        }
    }

    fn router() -> Router {
        Router::new(Registry::shared(), ChatLog::disabled())
    }

    async fn joined(router: &Router, names: &[&str]) -> Vec<Peer> {
        let mut peers = Vec::new();
        for name in names {
            let peer = Peer::new();
            assert_eq!(router.admit(&peer.conn, name).await, Admission::Admitted);
            peers.push(peer);
        }
        for peer in &mut peers {
            peer.drain();
        }
        peers
    }

    // ── Planning ─────────────────────────────────────────────────

    #[test]
    fn broadcast_skips_origin() {
        let reg = Registry::new();
        let origin = ConnectionId::next();
        assert_eq!(
            plan(&reg, origin, "alice", Command::Broadcast("hi".into())),
            vec![Frame::new("alice: hi", Target::AllExcept(origin))]
        );
    }

    #[test]
    fn repeated_identify_is_chat() {
        let reg = Registry::new();
        let origin = ConnectionId::next();
        assert_eq!(
            plan(&reg, origin, "alice", Command::Identify("eve".into())),
            vec![Frame::new("alice: /user eve", Target::AllExcept(origin))]
        );
    }

    #[test]
    fn typing_relays_name() {
        let reg = Registry::new();
        let origin = ConnectionId::next();
        assert_eq!(
            plan(&reg, origin, "bob", Command::TypingStart),
            vec![Frame::new("/typing-start bob", Target::AllExcept(origin))]
        );
        assert_eq!(
            plan(&reg, origin, "bob", Command::TypingEnd),
            vec![Frame::new("/typing-end bob", Target::AllExcept(origin))]
        );
    }

    #[test]
    fn unrecognized_plans_nothing() {
        let reg = Registry::new();
        assert!(plan(&reg, ConnectionId::next(), "bob", Command::Unrecognized).is_empty());
    }

    #[test]
    fn direct_message_to_missing_user_answers_origin() {
        let reg = Registry::new();
        assert_eq!(
            plan(
                &reg,
                ConnectionId::next(),
                "bob",
                Command::DirectMessage {
                    target: "carol".into(),
                    text: "hey".into()
                }
            ),
            vec![Frame::new("[SYSTEM] User 'carol' not found.", Target::Origin)]
        );
    }

    #[test]
    fn user_list_format() {
        assert_eq!(user_list(["alice", "bob"]), "/users alice,bob");
        assert_eq!(user_list(Vec::<&str>::new()), "/users ");
    }

    // ── Routing through the registry ─────────────────────────────

    #[tokio::test]
    async fn admission_notifies_others_and_lists_everyone() {
        let router = router();
        let mut peers = joined(&router, &["alice"]).await;
        let mut bob = Peer::new();

        assert_eq!(router.admit(&bob.conn, "bob").await, Admission::Admitted);

        assert_eq!(
            peers[0].drain(),
            vec!["[SYSTEM] bob has joined.", "/users alice,bob"]
        );
        assert_eq!(bob.drain(), vec!["/users alice,bob"]);
    }

    #[tokio::test]
    async fn duplicate_admission_changes_nothing() {
        let router = router();
        let mut peers = joined(&router, &["bob"]).await;
        let mut imposter = Peer::new();

        assert_eq!(router.admit(&imposter.conn, "BOB").await, Admission::Rejected);

        assert!(imposter.drain().is_empty());
        assert!(peers[0].drain().is_empty());
        assert_eq!(
            current_user_list(&*router.registry().lock().await),
            "/users bob"
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_else_once() {
        let router = router();
        let mut peers = joined(&router, &["alice", "bob", "carol"]).await;
        let alice = peers[0].conn.clone();

        router.route(&alice, "alice", Command::Broadcast("hi".into())).await;

        assert!(peers[0].drain().is_empty());
        assert_eq!(peers[1].drain(), vec!["alice: hi"]);
        assert_eq!(peers[2].drain(), vec!["alice: hi"]);
    }

    #[tokio::test]
    async fn direct_message_reaches_target_and_sender() {
        let router = router();
        let mut peers = joined(&router, &["alice", "bob", "carol"]).await;
        let bob = peers[1].conn.clone();

        router
            .route(
                &bob,
                "bob",
                Command::DirectMessage {
                    target: "ALICE".into(),
                    text: "yo".into(),
                },
            )
            .await;

        assert_eq!(peers[0].drain(), vec!["[PM to ALICE] bob: yo"]);
        assert_eq!(peers[1].drain(), vec!["[PM to ALICE] bob: yo"]);
        assert!(peers[2].drain().is_empty());
    }

    #[tokio::test]
    async fn direct_message_to_self_arrives_once() {
        let router = router();
        let mut peers = joined(&router, &["alice"]).await;
        let alice = peers[0].conn.clone();

        router
            .route(
                &alice,
                "alice",
                Command::DirectMessage {
                    target: "alice".into(),
                    text: "note".into(),
                },
            )
            .await;

        assert_eq!(peers[0].drain(), vec!["[PM to alice] alice: note"]);
    }

    #[tokio::test]
    async fn anonymous_sender_reaches_members() {
        let router = router();
        let mut peers = joined(&router, &["alice"]).await;
        let mut anon = Peer::new();

        router
            .route(&anon.conn, ANONYMOUS, Command::Broadcast("hello".into()))
            .await;

        assert_eq!(peers[0].drain(), vec!["Anonymous: hello"]);
        assert!(anon.drain().is_empty());
    }

    #[tokio::test]
    async fn departure_announces_and_refreshes_list() {
        let router = router();
        let mut peers = joined(&router, &["alice", "bob"]).await;
        let alice = peers[0].conn.clone();

        router.depart(&alice, "alice").await;

        assert!(peers[0].drain().is_empty());
        assert_eq!(
            peers[1].drain(),
            vec!["[SYSTEM] alice has left.", "/users bob"]
        );
        assert!(router.registry().lock().await.find_by_name("alice").is_none());
    }

    #[tokio::test]
    async fn rejected_duplicate_departs_without_evicting_holder() {
        let router = router();
        let mut peers = joined(&router, &["bob"]).await;
        let imposter = Peer::new();
        assert_eq!(router.admit(&imposter.conn, "bob").await, Admission::Rejected);

        router.depart(&imposter.conn, "bob").await;

        assert_eq!(peers[0].drain(), vec!["[SYSTEM] bob has left.", "/users bob"]);
        assert!(router.registry().lock().await.find_by_name("bob").is_some());
    }

    #[tokio::test]
    async fn closed_recipient_does_not_stop_fan_out() {
        let router = router();
        let mut peers = joined(&router, &["alice", "bob", "carol"]).await;
        let alice = peers[0].conn.clone();

        // bob's handler is gone but bob hasn't been removed yet.
        let bob = peers.remove(1);
        drop(bob.rx);

        router.route(&alice, "alice", Command::Broadcast("still here?".into())).await;

        assert_eq!(peers[1].drain(), vec!["alice: still here?"]);
    }
}
