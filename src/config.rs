use clap::Parser;

/// Real-time terminal BBS with ephemeral nicks and persistent accounts.
#[derive(Parser, Debug, Clone)]
#[command(name = "bbs-server", version, about)]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// TCP port to listen on.
    #[arg(long, default_value = "2323")]
    pub port: u16,

    /// Path to the account store (JSON, atomically replaced on write).
    #[arg(long, default_value = "users.json")]
    pub users_file: String,

    /// Path to the append-only forum log.
    #[arg(long, default_value = "forum.txt")]
    pub forum_file: String,

    /// Reject plain chat (and most commands) until the session has logged in.
    #[arg(long)]
    pub require_auth: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2323,
            users_file: "users.json".to_string(),
            forum_file: "forum.txt".to_string(),
            require_auth: false,
        }
    }
}

impl ServerConfig {
    /// The socket address string the listener binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
