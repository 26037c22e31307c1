use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Parser, Debug, Clone)]
#[command(name = "lending-api", version, about = "Book lending service")]
pub struct Config {
    #[arg(long, env = "LENDING_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Postgres connection string. Runs on the in-memory store when absent.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Tracing filter directives, e.g. "lending_api=debug,info".
    #[arg(long, env = "LENDING_LOG")]
    pub log_filter: Option<String>,

    /// Session to preload into the in-memory store, as TOKEN:USER_ID.
    #[arg(long = "seed-session", value_parser = parse_session)]
    pub seed_sessions: Vec<(String, i64)>,
}

impl Config {
    pub fn addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port)
    }
}

fn parse_session(text: &str) -> Result<(String, i64), String> {
    let (token, user_id) = text
        .rsplit_once(':')
        .ok_or_else(|| format!("expected TOKEN:USER_ID, got {text:?}"))?;
    if token.is_empty() {
        return Err("empty session token".to_string());
    }
    let user_id = user_id
        .parse()
        .map_err(|e| format!("invalid user id {user_id:?}: {e}"))?;
    Ok((token.to_string(), user_id))
}
