//! IRC line classification and command composition
//!
//! Only the small part of the protocol the gateway itself speaks lives
//! here: numeric replies during the handshake, the NICK/USER identity
//! commands and the PING/PONG keepalive. Everything else is passed through
//! verbatim.

use std::sync::LazyLock;

use regex::Regex;

/// No nickname given (RFC 1459)
pub const ERR_NONICKNAMEGIVEN: u16 = 431;
/// Erroneous nickname
pub const ERR_ERRONEUSNICKNAME: u16 = 432;
/// Nickname is already in use
pub const ERR_NICKNAMEINUSE: u16 = 433;
/// Nickname collision
pub const ERR_NICKCOLLISION: u16 = 436;
/// Welcome to the network
pub const RPL_WELCOME: u16 = 1;

/// Prefix of a keepalive probe sent by the server
pub const PING_PREFIX: &str = "PING :";

/// Fixed hostname announced in USER
const LOCAL_HOSTNAME: &str = "localhost";
/// Fixed server address announced in USER
const LOCAL_ADDRESS: &str = "127.0.0.1";

static SERVER_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:[^ ]+ ([0-9]{2,4}) ([^ ]+) (.*)").expect("server reply pattern is valid")
});

/// A numeric server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<'a> {
    pub code: u16,
    pub target: &'a str,
    pub text: &'a str,
}

impl Reply<'_> {
    /// Whether the server refused the nickname we announced
    pub fn rejects_nickname(&self) -> bool {
        matches!(
            self.code,
            ERR_NONICKNAMEGIVEN | ERR_ERRONEUSNICKNAME | ERR_NICKNAMEINUSE | ERR_NICKCOLLISION
        )
    }

    /// Whether the reply is addressed to `nickname`
    ///
    /// Servers put `*` in place of a nickname they refused, so a `*` target
    /// counts only for nickname rejections. Any other reply must name us.
    pub fn is_addressed_to(&self, nickname: &str) -> bool {
        self.target == nickname || (self.target == "*" && self.rejects_nickname())
    }
}

/// Parse a numeric reply of the form `:<source> <code> <target> <text>`
pub fn parse_reply(line: &str) -> Option<Reply<'_>> {
    let captures = SERVER_REPLY.captures(line)?;
    let code = captures.get(1)?.as_str().parse().ok()?;
    Some(Reply {
        code,
        target: captures.get(2)?.as_str(),
        text: captures.get(3)?.as_str(),
    })
}

/// If `line` is a keepalive probe, the response to send back
pub fn keepalive_response(line: &str) -> Option<String> {
    line.strip_prefix(PING_PREFIX)
        .map(|token| format!("PONG :{token}"))
}

/// Nickname declaration
pub fn nick_command(nickname: &str) -> String {
    format!("NICK {nickname}")
}

/// User declaration, with the nickname doubling as the real name
pub fn user_command(nickname: &str) -> String {
    format!("USER {nickname} {LOCAL_HOSTNAME} {LOCAL_ADDRESS} :{nickname}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_welcome() {
        let reply = parse_reply(":irc.example.net 001 bot :Welcome to the network bot").unwrap();
        assert_eq!(reply.code, RPL_WELCOME);
        assert_eq!(reply.target, "bot");
        assert_eq!(reply.text, ":Welcome to the network bot");
        assert!(!reply.rejects_nickname());
    }

    #[test]
    fn test_parse_nickname_in_use() {
        let reply = parse_reply(":irc.example.net 433 * bot :Nickname is already in use").unwrap();
        assert_eq!(reply.code, ERR_NICKNAMEINUSE);
        assert!(reply.rejects_nickname());
        assert!(reply.is_addressed_to("bot"));
    }

    #[test]
    fn test_rejection_class() {
        for code in [431, 432, 433, 436] {
            let line = format!(":srv {code} bot :no");
            assert!(parse_reply(&line).unwrap().rejects_nickname(), "{code}");
        }
        for code in [1, 2, 375, 437, 451] {
            let line = format!(":srv {code:03} bot :ok");
            assert!(!parse_reply(&line).unwrap().rejects_nickname(), "{code}");
        }
    }

    #[test]
    fn test_addressed_to_other_nick() {
        let reply = parse_reply(":srv 001 someone :hi").unwrap();
        assert!(!reply.is_addressed_to("bot"));
    }

    #[test]
    fn test_star_target_only_for_rejections() {
        let notice = parse_reply(":srv 020 * :Please wait while we process your connection").unwrap();
        assert!(!notice.is_addressed_to("bot"));

        let welcome = parse_reply(":srv 001 * :Welcome").unwrap();
        assert!(!welcome.is_addressed_to("bot"));

        let in_use = parse_reply(":srv 433 * bot :Nickname is already in use").unwrap();
        assert!(in_use.is_addressed_to("bot"));
    }

    #[test]
    fn test_non_replies() {
        assert!(parse_reply("PING :irc.example.net").is_none());
        assert!(parse_reply(":nick!u@h PRIVMSG #room :hello").is_none());
        assert!(parse_reply(":srv 1 bot :one digit").is_none());
        assert!(parse_reply(":srv 12345 bot :five digits").is_none());
    }

    #[test]
    fn test_keepalive() {
        assert_eq!(
            keepalive_response("PING :irc.example.net").as_deref(),
            Some("PONG :irc.example.net")
        );
        assert!(keepalive_response("PRIVMSG #room :PING :x").is_none());
        assert!(keepalive_response("PING irc.example.net").is_none());
    }

    #[test]
    fn test_identity_commands() {
        assert_eq!(nick_command("bot_"), "NICK bot_");
        assert_eq!(user_command("bot"), "USER bot localhost 127.0.0.1 :bot");
    }
}
