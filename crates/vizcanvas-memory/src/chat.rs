use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use vizcanvas_schema::{ChatSession, Message, SessionId};

const FORMAT_VERSION: u32 = 1;

/// JSONL line types for chat transcripts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEntry {
    Header {
        version: u32,
        session_id: SessionId,
        title: String,
        timestamp: DateTime<Utc>,
    },
    Message {
        timestamp: DateTime<Utc>,
        message: Message,
    },
}

fn chats_dir(root: &Path) -> PathBuf {
    root.join("chats")
}

/// File name for a session. ASCII letters, digits and `-` are kept; every
/// other byte becomes `_XX` (hex), so distinct ids never share a file.
fn chat_path(dir: &Path, session_id: &SessionId) -> PathBuf {
    let mut stem = String::with_capacity(session_id.as_str().len());
    for byte in session_id.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02X}"));
        }
    }
    dir.join(format!("{stem}.jsonl"))
}

/// Writer for per-session chat transcripts
pub struct ChatWriter {
    chats_dir: PathBuf,
}

impl ChatWriter {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            chats_dir: chats_dir(root.as_ref()),
        }
    }

    /// Start a new transcript file. Writes the header line. Returns the file path.
    pub async fn start_session(&self, session_id: &SessionId, title: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.chats_dir).await?;
        let path = chat_path(&self.chats_dir, session_id);
        let line = serde_json::to_string(&header(session_id, title))?;
        tokio::fs::write(&path, format!("{line}\n"))
            .await
            .with_context(|| format!("failed to write chat file: {}", path.display()))?;
        Ok(path)
    }

    /// Append a single message to an existing transcript
    pub async fn append_message(&self, session_id: &SessionId, message: &Message) -> Result<()> {
        tokio::fs::create_dir_all(&self.chats_dir).await?;
        let path = chat_path(&self.chats_dir, session_id);
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open chat file: {}", path.display()))?;
        let entry = ChatEntry::Message {
            timestamp: Utc::now(),
            message: message.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Rewrite the whole transcript of a session.
    ///
    /// Streaming replies replace earlier partial messages, so snapshots are
    /// written in full and swapped in with a rename.
    pub async fn save_session(&self, session: &ChatSession) -> Result<()> {
        tokio::fs::create_dir_all(&self.chats_dir).await?;
        let path = chat_path(&self.chats_dir, &session.id);
        let tmp = path.with_extension("jsonl.tmp");

        let mut body = serde_json::to_string(&header(&session.id, &session.title))?;
        body.push('\n');
        let now = Utc::now();
        for message in &session.messages {
            let entry = ChatEntry::Message {
                timestamp: now,
                message: message.clone(),
            };
            body.push_str(&serde_json::to_string(&entry)?);
            body.push('\n');
        }

        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write chat file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn save_all(&self, sessions: &[ChatSession]) -> Result<()> {
        for session in sessions {
            self.save_session(session).await?;
        }
        Ok(())
    }

    /// Delete a transcript. Returns true if the file was deleted.
    pub async fn clear_session(&self, session_id: &SessionId) -> Result<bool> {
        let path = chat_path(&self.chats_dir, session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn header(session_id: &SessionId, title: &str) -> ChatEntry {
    ChatEntry::Header {
        version: FORMAT_VERSION,
        session_id: session_id.clone(),
        title: title.to_owned(),
        timestamp: Utc::now(),
    }
}

/// Reader for chat transcripts
pub struct ChatReader {
    chats_dir: PathBuf,
}

impl ChatReader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            chats_dir: chats_dir(root.as_ref()),
        }
    }

    /// Load one transcript. Returns `None` when no file exists.
    pub async fn load_session(&self, session_id: &SessionId) -> Result<Option<ChatSession>> {
        let path = chat_path(&self.chats_dir, session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(parse_transcript(&content, &path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every stored transcript, `general` first and the rest ordered by id.
    pub async fn load_chats(&self) -> Result<Vec<ChatSession>> {
        let mut dir = match tokio::fs::read_dir(&self.chats_dir).await {
            Ok(dir) => dir,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            if let Some(session) = parse_transcript(&content, &path) {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| {
            b.id.is_general()
                .cmp(&a.id.is_general())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(sessions)
    }
}

fn parse_transcript(content: &str, path: &Path) -> Option<ChatSession> {
    let mut session: Option<ChatSession> = None;

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChatEntry>(line) {
            Ok(ChatEntry::Header {
                session_id, title, ..
            }) => {
                session = Some(ChatSession::new(session_id, title));
            }
            Ok(ChatEntry::Message { message, .. }) => match session.as_mut() {
                Some(session) => session.messages.push(message),
                None => warn!(path = %path.display(), line = index + 1, "message before chat header"),
            },
            Err(error) => {
                warn!(path = %path.display(), line = index + 1, %error, "failed to parse chat entry line")
            }
        }
    }

    if session.is_none() {
        warn!(path = %path.display(), "chat file has no header, skipping");
    }
    session
}
