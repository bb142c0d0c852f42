//! Serves a fixed set of transfer sessions described by a JSON file.
//!
//! ```text
//! cargo run --example serve -- sessions.json
//! ```
//!
//! ```json
//! {
//!     "bind": "127.0.0.1:3000",
//!     "chunk_size": 65536,
//!     "sessions": [
//!         {
//!             "token": "49571502-60ca-49cd-bfe4-306bfe68037c",
//!             "path": "/data/fixture.txt",
//!             "local_path": "/srv/pool/fixture.txt",
//!             "mode": "read",
//!             "checksums": [{ "type": "adler32", "value": "03da0195" }]
//!         },
//!         {
//!             "token": "0dd2b6e7-4c27-4bbd-8a55-2d7b5c7a1e39",
//!             "path": "/data/upload.bin",
//!             "local_path": "/tmp/upload.bin",
//!             "mode": "write"
//!         }
//!     ]
//! }
//! ```
//!
//! Then fetch a range:
//!
//! ```text
//! curl -r 0-4 \
//!     'http://127.0.0.1:3000/data/fixture.txt?dcache-http-uuid=49571502-60ca-49cd-bfe4-306bfe68037c'
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use pool_http::{
    Channel, Checksum, FileChannel, HandlerConfig, IoMode, PoolRequestHandler, SessionTable,
    SessionToken,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ServeConfig {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(flatten)]
    handler: HandlerConfig,
    #[serde(default)]
    sessions: Vec<SessionConfig>,
}

#[derive(Debug, Deserialize)]
struct SessionConfig {
    token: SessionToken,
    path: String,
    local_path: PathBuf,
    mode: IoMode,
    #[serde(default)]
    checksums: Vec<Checksum>,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

async fn open_sessions(sessions: Vec<SessionConfig>) -> std::io::Result<SessionTable> {
    let table = SessionTable::new();
    for session in sessions {
        let channel = match session.mode {
            IoMode::Read => FileChannel::reader(session.path, &session.local_path).await?,
            IoMode::Write => FileChannel::writer(session.path, &session.local_path).await?,
        };
        let channel = channel.with_checksums(session.checksums);
        tracing::info!(
            token = %session.token,
            path = channel.path(),
            local_path = %channel.local_path().display(),
            mode = %channel.io_mode(),
            "session open"
        );
        table.insert(session.token, Arc::new(channel));
    }
    Ok(table)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let path = std::env::args().nth(1).ok_or("usage: serve <sessions.json>")?;
    let config: ServeConfig = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    config.handler.validate()?;

    let sessions = open_sessions(config.sessions).await?;
    tracing::info!(sessions = sessions.len(), "sessions loaded");
    let app = PoolRequestHandler::new(Arc::new(sessions), config.handler).into_router();

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(bind = %config.bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
