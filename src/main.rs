mod audit;
mod crypto;
mod db;
mod ipc;
mod sessions;
mod students;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "portald")]
#[command(about = "Teacher portal sidecar daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Provision a teacher account in a workspace database.
    CreateTeacher {
        /// Workspace directory holding (or receiving) the portal database.
        #[arg(long)]
        workspace: PathBuf,
        username: String,
        password: String,
    },
}

fn main() -> ExitCode {
    // stdout carries the reply stream; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::CreateTeacher {
            workspace,
            username,
            password,
        }) => match create_teacher(&workspace, &username, &password) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
        None => {
            serve();
            ExitCode::SUCCESS
        }
    }
}

fn create_teacher(workspace: &Path, username: &str, password: &str) -> anyhow::Result<()> {
    let username = username.trim();
    if username.is_empty() || username.chars().count() > 150 {
        anyhow::bail!("username must be 1..=150 characters");
    }
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }

    let conn = db::open_db(workspace)?;
    let salt = crypto::generate_salt();
    let hash = crypto::hash_password(password, &salt)?;
    let inserted = conn.execute(
        "INSERT INTO teachers(id, username, password_salt, password_hash, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (uuid::Uuid::new_v4().to_string(), username, &salt, &hash),
    );
    match inserted {
        Ok(_) => {
            println!("Teacher '{}' created successfully!", username);
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            anyhow::bail!("username '{}' is already taken", username)
        }
        Err(e) => Err(e.into()),
    }
}

fn serve() {
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply with an id we never parsed.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
