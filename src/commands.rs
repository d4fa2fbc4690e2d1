//! Command routing: one stripped input line in, at most one state change out.
//!
//! Lines starting with `/` are split into command, first argument, and
//! remainder (at most three fields). Everything else is chat, gated by flood
//! control. Handler output goes to the issuing session only, except where a
//! handler's contract is an announcement (join/leave, login, rename).

use std::time::Instant;

use crate::avatar;
use crate::connection::Session;
use crate::forum::FORUM_RECENT;
use crate::identity::{is_banned_name, AuthError};
use crate::ratelimit::{FloodVerdict, FLOOD_STRIKE_LIMIT};
use crate::registry::DeliverError;
use crate::server::ServerState;

/// What the lifecycle loop should do after one line.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// `/quit`: teardown with reason `user-quit`.
    Quit,
    /// Third flood strike: teardown with reason `flood`.
    Eject,
}

pub fn dispatch(line: &str, sess: &mut Session, state: &ServerState) -> Outcome {
    let line = line.trim();
    if line.is_empty() {
        return Outcome::Continue;
    }
    if line.starts_with('/') {
        let (cmd, arg, rest) = tokenize(line);
        let cmd = cmd.to_ascii_lowercase();

        if state.require_auth && !sess.identity.is_authenticated() && !allowed_pre_auth(&cmd) {
            sess.reply("Log in first: /register <user> <pass> or /login <user> <pass>");
            return Outcome::Continue;
        }

        match cmd.as_str() {
            "/register" => cmd_register(sess, state, arg, rest),
            "/login" => cmd_login(sess, state, arg, rest),
            "/logout" => cmd_logout(sess, state),
            "/nick" => cmd_nick(sess, state, arg),
            "/who" => cmd_who(sess, state),
            "/msg" => cmd_msg(sess, state, arg, rest),
            "/avatar" => cmd_avatar(sess, arg),
            "/forum" => cmd_forum(sess, state, arg, rest),
            "/clear" => sess.reply("\x1b[2J\x1b[H"),
            "/quit" | "/exit" => return Outcome::Quit,
            "/help" => cmd_help(sess),
            _ => sess.reply("Unknown command. Try /help"),
        }
        return Outcome::Continue;
    }
    chat(line, sess, state)
}

/// Split a command line into (command, first argument, remainder). The
/// first two fields are delimited by whitespace runs of any length; the
/// remainder keeps its inner spacing verbatim.
fn tokenize(line: &str) -> (&str, &str, &str) {
    let line = line.trim();
    let cmd_end = line.find(char::is_whitespace).unwrap_or(line.len());
    let (cmd, tail) = line.split_at(cmd_end);
    let tail = tail.trim_start();
    let arg_end = tail.find(char::is_whitespace).unwrap_or(tail.len());
    let (arg, rest) = tail.split_at(arg_end);
    (cmd, arg, rest.trim_start())
}

/// Commands usable before login when `--require-auth` is set.
fn allowed_pre_auth(cmd: &str) -> bool {
    matches!(
        cmd,
        "/register" | "/login" | "/help" | "/quit" | "/exit" | "/clear"
    )
}

fn cmd_register(sess: &mut Session, state: &ServerState, username: &str, password: &str) {
    if username.is_empty() || password.is_empty() {
        sess.reply("Usage: /register <user> <password>");
        return;
    }
    if is_banned_name(username) {
        sess.reply(AuthError::NameForbidden.to_string());
        return;
    }
    if state.accounts.exists(username) {
        sess.reply(AuthError::NameTaken.to_string());
        return;
    }
    if let Err(e) = state.accounts.create(username, password) {
        tracing::error!("Account creation failed for {username}: {e}");
        sess.reply("Could not create account. Try again later.");
        return;
    }
    sess.identity.log_in(username);
    sess.flood.reset();
    let name = sess.identity.display_name();
    state
        .hub
        .update_name(sess.id, name.clone(), Some(username.to_string()));
    tracing::info!("User registered: {username}");
    state
        .hub
        .broadcast(&format!("* {name} registered and logged in"), None);
    sess.reply("Registered and logged in.");
}

fn cmd_login(sess: &mut Session, state: &ServerState, username: &str, password: &str) {
    if username.is_empty() || password.is_empty() {
        sess.reply("Usage: /login <user> <password>");
        return;
    }
    // An unreadable store reports no users; that deliberately reads as
    // "unknown user" rather than leaking a storage error.
    if !state.accounts.exists(username) {
        sess.reply(AuthError::UnknownUser.to_string());
        return;
    }
    if state.hub.is_online(username) {
        sess.reply(AuthError::AlreadyOnline.to_string());
        return;
    }
    if !state.accounts.verify(username, password) {
        sess.reply(AuthError::BadPassword.to_string());
        return;
    }
    sess.identity.log_in(username);
    sess.flood.reset();
    let name = sess.identity.display_name();
    state
        .hub
        .update_name(sess.id, name.clone(), Some(username.to_string()));
    tracing::info!("User logged in: {username}");
    state.hub.broadcast(&format!("* {name} logged in"), None);
    sess.reply("Login successful.");
}

fn cmd_logout(sess: &mut Session, state: &ServerState) {
    match sess.identity.log_out() {
        Ok(user) => {
            sess.flood.reset();
            state
                .hub
                .update_name(sess.id, sess.identity.display_name(), None);
            state.hub.broadcast(&format!("* {user} logged out"), None);
            sess.reply("Logged out.");
        }
        Err(e) => sess.reply(e.to_string()),
    }
}

fn cmd_nick(sess: &mut Session, state: &ServerState, name: &str) {
    if name.is_empty() {
        sess.reply("Usage: /nick <name>");
        return;
    }
    match sess.identity.set_nick(name) {
        Ok((old, new)) => {
            state.hub.update_name(sess.id, new.clone(), None);
            tracing::info!("Nick change: {old} -> {new}");
            state.hub.broadcast(&format!("* {old} now is {new}"), None);
        }
        Err(e) => sess.reply(e.to_string()),
    }
}

fn cmd_who(sess: &Session, state: &ServerState) {
    let mut lines = vec!["Users connected:".to_string()];
    for name in state.hub.list_online() {
        lines.push(format!(" - {name}"));
    }
    sess.reply(lines.join("\r\n"));
}

fn cmd_msg(sess: &Session, state: &ServerState, target: &str, text: &str) {
    if target.is_empty() || text.is_empty() {
        sess.reply("Usage: /msg <user> <text>");
        return;
    }
    let from = sess.identity.display_name();
    match state.hub.private(target, &format!("[PM from {from}] {text}")) {
        // A transport failure on the target ran its disconnect inside the
        // hub; the sender is only told about a failed lookup.
        Ok(()) => sess.reply(format!("[PM to {target}] {text}")),
        Err(DeliverError::RecipientNotFound) => sess.reply("User not found."),
    }
}

fn cmd_avatar(sess: &mut Session, path: &str) {
    if path.is_empty() {
        sess.reply("Usage: /avatar <file>");
        return;
    }
    match avatar::from_image(path) {
        Some(block) => {
            sess.identity.avatar = Some(block);
            sess.reply("Avatar set successfully.");
        }
        None => sess.reply("Failed to load avatar."),
    }
}

fn cmd_forum(sess: &Session, state: &ServerState, arg: &str, rest: &str) {
    if arg == "post" {
        if rest.is_empty() {
            sess.reply("Usage: /forum post <text>");
            return;
        }
        match state.forum.append(&sess.identity.display_name(), rest) {
            Ok(()) => sess.reply("Post submitted."),
            Err(e) => {
                tracing::error!("Forum append failed: {e}");
                sess.reply("Could not submit post.");
            }
        }
        return;
    }
    let posts = state.forum.recent(FORUM_RECENT);
    if posts.is_empty() {
        sess.reply("No posts yet.");
        return;
    }
    let mut lines = vec!["--- Forum last posts ---".to_string()];
    lines.extend(posts);
    lines.push("--- End forum ---".to_string());
    sess.reply(lines.join("\r\n"));
}

fn cmd_help(sess: &Session) {
    sess.reply(
        "/register <user> <password> - create account and login\r\n\
         /login <user> <password> - login to existing account\r\n\
         /logout - logout of account\r\n\
         /nick <name> - temporary nick (not while logged in)\r\n\
         /who - list users\r\n\
         /msg <user> <text> - private message\r\n\
         /forum - view forum, /forum post <text> - post\r\n\
         /avatar <file> - set ASCII avatar (server-side)\r\n\
         /clear - clear your screen\r\n\
         /quit - exit",
    );
}

fn chat(line: &str, sess: &mut Session, state: &ServerState) -> Outcome {
    if state.require_auth && !sess.identity.is_authenticated() {
        sess.reply("Log in first: /register <user> <pass> or /login <user> <pass>");
        return Outcome::Continue;
    }
    match sess.flood.check(Instant::now()) {
        FloodVerdict::Warn(strikes) => {
            sess.reply(format!(
                "Flood detected ({strikes}/{FLOOD_STRIKE_LIMIT}). Slow down."
            ));
            Outcome::Continue
        }
        FloodVerdict::Eject => {
            sess.reply(format!(
                "Flood detected ({FLOOD_STRIKE_LIMIT}/{FLOOD_STRIKE_LIMIT}). Slow down."
            ));
            Outcome::Eject
        }
        FloodVerdict::Clear => {
            let sender = sess.identity.display_name();
            let mut msg = format!("[{sender}] {line}");
            if let Some(ref block) = sess.identity.avatar {
                msg = format!("{block}\n{msg}");
            }
            tracing::info!("{msg}");
            state.hub.broadcast(&msg, None);
            Outcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tokio::sync::Notify;

    use crate::accounts::PasswordStore;
    use crate::forum::ForumStore;
    use crate::registry::Hub;

    struct Fixture {
        _dir: tempfile::TempDir,
        state: ServerState,
    }

    fn fixture(require_auth: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state = ServerState {
            hub: Hub::new(),
            accounts: PasswordStore::new(dir.path().join("users.json")),
            forum: ForumStore::new(dir.path().join("forum.txt")),
            require_auth,
        };
        Fixture { _dir: dir, state }
    }

    /// Register a session with the hub and hand back its context + receiver.
    fn join(state: &ServerState) -> (Session, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let id = state.hub.register(tx.clone(), Arc::new(Notify::new())).unwrap();
        (Session::new(id, tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn empty_line_is_a_noop() {
        let fx = fixture(false);
        let (mut sess, mut rx) = join(&fx.state);
        assert_eq!(dispatch("", &mut sess, &fx.state), Outcome::Continue);
        assert_eq!(dispatch("   ", &mut sess, &fx.state), Outcome::Continue);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_command_gets_fixed_reply() {
        let fx = fixture(false);
        let (mut sess, mut rx) = join(&fx.state);
        dispatch("/frobnicate now", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx), vec!["Unknown command. Try /help"]);
    }

    #[test]
    fn tokenize_collapses_whitespace_runs_between_fields() {
        assert_eq!(tokenize("/msg alice hi"), ("/msg", "alice", "hi"));
        assert_eq!(tokenize("/msg  alice   hi"), ("/msg", "alice", "hi"));
        assert_eq!(
            tokenize("/msg alice hi  there"),
            ("/msg", "alice", "hi  there")
        );
        assert_eq!(tokenize("/who"), ("/who", "", ""));
        assert_eq!(tokenize("/login  alice"), ("/login", "alice", ""));
    }

    #[tokio::test]
    async fn repeated_spaces_between_arguments_are_accepted() {
        let fx = fixture(false);
        fx.state.accounts.create("alice", "pw").unwrap();
        let (mut alice, mut rx_alice) = join(&fx.state);
        dispatch("/login   alice  pw", &mut alice, &fx.state);
        assert!(drain(&mut rx_alice).contains(&"Login successful.".to_string()));

        let (mut bob, mut rx_bob) = join(&fx.state);
        dispatch("/msg  alice  hi  there", &mut bob, &fx.state);
        assert_eq!(drain(&mut rx_alice), vec![format!(
            "[PM from User{}] hi  there",
            bob.id
        )]);
        assert_eq!(drain(&mut rx_bob), vec!["[PM to alice] hi  there"]);
    }

    #[tokio::test]
    async fn command_keyword_is_case_insensitive() {
        let fx = fixture(false);
        let (mut sess, mut rx) = join(&fx.state);
        dispatch("/WHO", &mut sess, &fx.state);
        let lines = drain(&mut rx);
        assert!(lines[0].starts_with("Users connected:"));
    }

    #[tokio::test]
    async fn register_announces_and_confirms() {
        let fx = fixture(false);
        let (mut alice, mut rx_alice) = join(&fx.state);
        let (_bob, mut rx_bob) = join(&fx.state);

        dispatch("/register alice secret", &mut alice, &fx.state);

        assert_eq!(alice.identity.display_name(), "alice");
        let to_bob = drain(&mut rx_bob);
        assert_eq!(to_bob, vec!["* alice registered and logged in"]);
        let to_alice = drain(&mut rx_alice);
        assert!(to_alice.contains(&"* alice registered and logged in".to_string()));
        assert!(to_alice.contains(&"Registered and logged in.".to_string()));
        assert!(fx.state.accounts.verify("alice", "secret"));
    }

    #[tokio::test]
    async fn register_rejects_banned_and_taken_names() {
        let fx = fixture(false);
        let (mut sess, mut rx) = join(&fx.state);

        dispatch("/register Admin pw", &mut sess, &fx.state);
        assert!(drain(&mut rx)[0].contains("prohibited"));

        fx.state.accounts.create("alice", "pw").unwrap();
        dispatch("/register alice other", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx), vec!["Username already exists."]);
        assert!(!sess.identity.is_authenticated());
    }

    #[tokio::test]
    async fn login_flow_and_failures() {
        let fx = fixture(false);
        fx.state.accounts.create("alice", "secret").unwrap();
        let (mut sess, mut rx) = join(&fx.state);

        dispatch("/login ghost pw", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx), vec!["Unknown user."]);

        dispatch("/login alice wrong", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx), vec!["Invalid password."]);

        dispatch("/login alice secret", &mut sess, &fx.state);
        let lines = drain(&mut rx);
        assert!(lines.contains(&"Login successful.".to_string()));
        assert!(lines.contains(&"* alice logged in".to_string()));
        assert_eq!(sess.identity.display_name(), "alice");
    }

    #[tokio::test]
    async fn double_login_is_rejected() {
        let fx = fixture(false);
        fx.state.accounts.create("alice", "pw").unwrap();
        let (mut first, _rx_first) = join(&fx.state);
        dispatch("/login alice pw", &mut first, &fx.state);

        let (mut second, mut rx_second) = join(&fx.state);
        dispatch("/login alice pw", &mut second, &fx.state);
        assert_eq!(drain(&mut rx_second), vec!["User already logged in elsewhere."]);
        assert!(!second.identity.is_authenticated());
    }

    #[tokio::test]
    async fn login_clears_nick_and_nick_rejected_while_authed() {
        let fx = fixture(false);
        fx.state.accounts.create("alice", "pw").unwrap();
        let (mut sess, mut rx) = join(&fx.state);

        dispatch("/nick ghost", &mut sess, &fx.state);
        assert_eq!(sess.identity.display_name(), "ghost");

        dispatch("/login alice pw", &mut sess, &fx.state);
        assert_eq!(sess.identity.display_name(), "alice");

        drain(&mut rx);
        dispatch("/nick other", &mut sess, &fx.state);
        assert!(drain(&mut rx)[0].contains("logout first"));
        assert_eq!(sess.identity.display_name(), "alice");
    }

    #[tokio::test]
    async fn logout_returns_to_anonymous() {
        let fx = fixture(false);
        fx.state.accounts.create("alice", "pw").unwrap();
        let (mut sess, mut rx) = join(&fx.state);
        let (_peer, mut rx_peer) = join(&fx.state);

        dispatch("/logout", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx), vec!["Not logged in."]);

        dispatch("/login alice pw", &mut sess, &fx.state);
        drain(&mut rx);
        drain(&mut rx_peer);

        dispatch("/logout", &mut sess, &fx.state);
        assert!(drain(&mut rx).contains(&"Logged out.".to_string()));
        assert_eq!(drain(&mut rx_peer), vec!["* alice logged out"]);
        assert_eq!(sess.identity.display_name(), format!("User{}", sess.id));
        // Back online appears under the anonymous name, not the account.
        assert!(!fx.state.hub.is_online("alice"));
    }

    #[tokio::test]
    async fn nick_rename_is_announced() {
        let fx = fixture(false);
        let (mut sess, _rx) = join(&fx.state);
        let (_peer, mut rx_peer) = join(&fx.state);
        let old = sess.identity.display_name();

        dispatch("/nick ghost", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx_peer), vec![format!("* {old} now is ghost")]);
        assert_eq!(fx.state.hub.list_online()[0], "ghost");
    }

    #[tokio::test]
    async fn private_message_scenario() {
        let fx = fixture(false);
        fx.state.accounts.create("alice", "pw").unwrap();
        let (mut alice, mut rx_alice) = join(&fx.state);
        dispatch("/login alice pw", &mut alice, &fx.state);
        let (mut bob, mut rx_bob) = join(&fx.state);
        dispatch("/nick B", &mut bob, &fx.state);
        let (_carol, mut rx_carol) = join(&fx.state);
        drain(&mut rx_alice);
        drain(&mut rx_bob);
        drain(&mut rx_carol);

        dispatch("/msg alice hello", &mut bob, &fx.state);

        assert_eq!(drain(&mut rx_alice), vec!["[PM from B] hello"]);
        assert_eq!(drain(&mut rx_bob), vec!["[PM to alice] hello"]);
        assert!(drain(&mut rx_carol).is_empty());

        dispatch("/msg nobody hi", &mut bob, &fx.state);
        assert_eq!(drain(&mut rx_bob), vec!["User not found."]);
    }

    #[tokio::test]
    async fn chat_broadcasts_with_sender_name() {
        let fx = fixture(false);
        let (mut sess, _rx) = join(&fx.state);
        let (_peer, mut rx_peer) = join(&fx.state);

        dispatch("hello room", &mut sess, &fx.state);
        assert_eq!(
            drain(&mut rx_peer),
            vec![format!("[User{}] hello room", sess.id)]
        );
    }

    #[tokio::test]
    async fn flood_warns_twice_then_ejects() {
        let fx = fixture(false);
        let (mut sess, mut rx) = join(&fx.state);
        let (_peer, mut rx_peer) = join(&fx.state);

        let mut outcome = Outcome::Continue;
        let mut warnings = Vec::new();
        for i in 0..20 {
            outcome = dispatch(&format!("spam {i}"), &mut sess, &fx.state);
            warnings.extend(
                drain(&mut rx).into_iter().filter(|l| l.contains("Flood")),
            );
            if outcome == Outcome::Eject {
                break;
            }
        }
        assert_eq!(outcome, Outcome::Eject);
        assert_eq!(
            warnings,
            vec![
                "Flood detected (1/3). Slow down.",
                "Flood detected (2/3). Slow down.",
                "Flood detected (3/3). Slow down.",
            ]
        );
        // Suppressed lines never reached the room.
        let delivered = drain(&mut rx_peer)
            .into_iter()
            .filter(|l| l.contains("spam"))
            .count();
        assert!(delivered < 20);
    }

    #[tokio::test]
    async fn require_auth_blocks_chat_and_most_commands() {
        let fx = fixture(true);
        let (mut sess, mut rx) = join(&fx.state);
        let (_peer, mut rx_peer) = join(&fx.state);

        dispatch("hello?", &mut sess, &fx.state);
        assert!(drain(&mut rx)[0].starts_with("Log in first:"));
        assert!(drain(&mut rx_peer).is_empty());

        dispatch("/who", &mut sess, &fx.state);
        assert!(drain(&mut rx)[0].starts_with("Log in first:"));
        dispatch("/nick ghost", &mut sess, &fx.state);
        assert!(drain(&mut rx)[0].starts_with("Log in first:"));

        // Registering unlocks everything.
        dispatch("/register alice pw", &mut sess, &fx.state);
        drain(&mut rx);
        drain(&mut rx_peer);
        dispatch("hello!", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx_peer), vec!["[alice] hello!"]);
    }

    #[tokio::test]
    async fn forum_post_and_listing() {
        let fx = fixture(false);
        let (mut sess, mut rx) = join(&fx.state);

        dispatch("/forum", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx), vec!["No posts yet."]);

        dispatch("/forum post hello forum", &mut sess, &fx.state);
        assert_eq!(drain(&mut rx), vec!["Post submitted."]);

        dispatch("/forum", &mut sess, &fx.state);
        let listing = drain(&mut rx).pop().unwrap();
        assert!(listing.starts_with("--- Forum last posts ---"));
        assert!(listing.contains("hello forum"));
        assert!(listing.ends_with("--- End forum ---"));
    }

    #[tokio::test]
    async fn clear_queues_the_escape_sequence_as_one_line() {
        let fx = fixture(false);
        let (mut sess, mut rx) = join(&fx.state);
        dispatch("/clear", &mut sess, &fx.state);
        // Delivered through the writer like any other line, so it picks up
        // a CRLF terminator on the wire.
        assert_eq!(drain(&mut rx), vec!["\x1b[2J\x1b[H"]);
    }

    #[tokio::test]
    async fn quit_returns_quit_outcome() {
        let fx = fixture(false);
        let (mut sess, _rx) = join(&fx.state);
        assert_eq!(dispatch("/quit", &mut sess, &fx.state), Outcome::Quit);
        assert_eq!(dispatch("/exit", &mut sess, &fx.state), Outcome::Quit);
    }
}
