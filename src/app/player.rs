use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::process::spawn_with_default_signals;
use crate::model::Track;
use crate::playback::{AudioEngine, ProgressEvent};

const SOCKET_ATTEMPTS: usize = 50;
const LOAD_WAIT_ATTEMPTS: usize = 50;
const RETRY_DELAY: Duration = Duration::from_millis(100);
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct IpcReply {
    #[serde(default)]
    request_id: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    event: Option<String>,
}

/// Reply to request `id` in one line of mpv IPC output. Event lines and
/// replies to other requests yield `None`.
fn reply_for(line: &str, id: u64) -> Option<IpcReply> {
    let reply: IpcReply = serde_json::from_str(line.trim()).ok()?;
    (reply.event.is_none() && reply.request_id == Some(id)).then_some(reply)
}

fn secs_to_ms(value: Option<&Value>) -> u64 {
    value
        .and_then(Value::as_f64)
        .map(|secs| (secs.max(0.0) * 1000.0).round() as u64)
        .unwrap_or(0)
}

/// mpv driven over its JSON IPC socket. The process runs headless with
/// `keep-open=always`, so it never advances on its own and reports
/// `eof-reached` instead.
pub(crate) struct MpvEngine {
    child: Option<Child>,
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    socket_path: Option<PathBuf>,
    next_request: u64,
    queue: Vec<String>,
}

impl MpvEngine {
    pub(crate) fn spawn(player_bin: &Path) -> Result<Self> {
        let socket_path = std::env::temp_dir().join(format!("kniga-mpv-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&socket_path);

        let mut cmd = ProcessCommand::new(player_bin);
        cmd.args([
            "--no-video",
            "--no-terminal",
            "--idle=yes",
            "--keep-open=always",
        ])
        .arg(format!("--input-ipc-server={}", socket_path.display()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
        let mut child = spawn_with_default_signals(cmd, &player_bin.display().to_string())?;

        let stream = match connect_with_retry(&socket_path) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        let mut engine = Self::from_stream(stream)?;
        engine.child = Some(child);
        engine.socket_path = Some(socket_path);
        Ok(engine)
    }

    fn from_stream(stream: UnixStream) -> Result<Self> {
        stream
            .set_read_timeout(Some(REPLY_TIMEOUT))
            .context("failed to configure mpv socket")?;
        let writer = stream.try_clone().context("failed to clone mpv socket")?;
        Ok(Self {
            child: None,
            reader: BufReader::new(stream),
            writer,
            socket_path: None,
            next_request: 0,
            queue: Vec::new(),
        })
    }

    pub(crate) fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    fn command(&mut self, args: Value) -> Result<Option<Value>> {
        self.next_request += 1;
        let id = self.next_request;
        let line = json!({ "command": args, "request_id": id });
        writeln!(self.writer, "{line}").context("failed to send mpv command")?;
        self.writer.flush().context("failed to send mpv command")?;

        loop {
            let mut buf = String::new();
            let read = self
                .reader
                .read_line(&mut buf)
                .context("failed to read mpv reply")?;
            if read == 0 {
                bail!("mpv closed its control socket");
            }
            let Some(reply) = reply_for(&buf, id) else {
                continue;
            };
            return match reply.error.as_deref() {
                None | Some("success") => Ok(reply.data),
                Some("property unavailable") => Ok(None),
                Some(other) => Err(anyhow!("mpv rejected {args}: {other}")),
            };
        }
    }

    fn property(&mut self, name: &str) -> Result<Option<Value>> {
        self.command(json!(["get_property", name]))
    }

    fn set_property(&mut self, name: &str, value: Value) -> Result<()> {
        self.command(json!(["set_property", name, value])).map(|_| ())
    }

    fn load_queue(&mut self) -> Result<()> {
        let urls = self.queue.clone();
        let Some((first, rest)) = urls.split_first() else {
            self.command(json!(["stop"]))?;
            return Ok(());
        };
        self.command(json!(["loadfile", first, "replace"]))?;
        for url in rest {
            self.command(json!(["loadfile", url, "append"]))?;
        }
        Ok(())
    }

    /// True once `url` is the open file and, when a start offset was
    /// requested, playback has been positioned past zero.
    fn has_opened(&mut self, url: &str, offset_requested: bool) -> Result<bool> {
        let path = self.property("path")?;
        if path.as_ref().and_then(Value::as_str) != Some(url) {
            return Ok(false);
        }
        if self.property("duration")?.is_none() {
            return Ok(false);
        }
        if !offset_requested {
            return Ok(true);
        }
        Ok(secs_to_ms(self.property("time-pos")?.as_ref()) > 0)
    }

    fn wait_until_opened(&mut self, url: &str, offset_requested: bool) -> Result<()> {
        for _ in 0..LOAD_WAIT_ATTEMPTS {
            if self.has_opened(url, offset_requested)? {
                return Ok(());
            }
            thread::sleep(RETRY_DELAY);
        }
        bail!("{url} did not open in time")
    }

    /// Loading is asynchronous; seeking before the file is open fails.
    fn wait_until_loaded(&mut self) -> Result<()> {
        for _ in 0..LOAD_WAIT_ATTEMPTS {
            if self.property("duration")?.is_some() {
                return Ok(());
            }
            thread::sleep(RETRY_DELAY);
        }
        debug!("track did not report a duration in time");
        Ok(())
    }
}

impl AudioEngine for MpvEngine {
    fn replace_queue(&mut self, tracks: &[Track]) -> Result<()> {
        self.set_property("pause", json!(true))?;
        self.queue = tracks.iter().map(|track| track.url.clone()).collect();
        self.load_queue()
    }

    fn play(&mut self) -> Result<()> {
        self.set_property("pause", json!(false))
    }

    fn pause(&mut self) -> Result<()> {
        self.set_property("pause", json!(true))
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.wait_until_loaded()?;
        let secs = position_ms as f64 / 1000.0;
        self.command(json!(["seek", secs, "absolute"])).map(|_| ())
    }

    fn skip_to(&mut self, index: usize) -> Result<()> {
        self.set_property("playlist-pos", json!(index))
    }

    /// The offset goes in through the `start` option so mpv applies it while
    /// opening the target file. The option is cleared afterwards so later
    /// tracks open at zero.
    fn start_at(&mut self, index: usize, position_ms: u64) -> Result<()> {
        let Some(url) = self.queue.get(index).cloned() else {
            bail!("track {} is not queued", index + 1);
        };
        let offset_requested = position_ms > 0;
        if offset_requested {
            let secs = position_ms as f64 / 1000.0;
            self.set_property("options/start", json!(format!("+{secs:.3}")))?;
        }
        let opened = if index > 0 {
            self.set_property("playlist-pos", json!(index))
        } else {
            self.load_queue()
        }
        .and_then(|()| self.wait_until_opened(&url, offset_requested));
        if offset_requested {
            self.set_property("options/start", json!("none"))?;
        }
        opened
    }

    fn skip_next(&mut self) -> Result<()> {
        self.command(json!(["playlist-next", "force"])).map(|_| ())
    }

    fn skip_previous(&mut self) -> Result<()> {
        self.command(json!(["playlist-prev", "force"])).map(|_| ())
    }

    fn status(&mut self) -> Result<ProgressEvent> {
        let position_ms = secs_to_ms(self.property("time-pos")?.as_ref());
        let duration_ms = secs_to_ms(self.property("duration")?.as_ref());
        let active_index = self
            .property("playlist-pos")?
            .and_then(|value| value.as_i64())
            .and_then(|pos| usize::try_from(pos).ok())
            .unwrap_or(0);
        let paused = self
            .property("pause")?
            .and_then(|value| value.as_bool())
            .unwrap_or(true);
        let finished = self
            .property("eof-reached")?
            .and_then(|value| value.as_bool())
            .unwrap_or(false);

        Ok(ProgressEvent {
            position_ms,
            duration_ms,
            active_index,
            is_playing: !paused && !finished,
            just_finished: finished,
        })
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = self.command(json!(["quit"]));
                let _ = child.kill();
            }
            let _ = child.wait();
        }
        if let Some(path) = self.socket_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn connect_with_retry(socket_path: &Path) -> Result<UnixStream> {
    let mut last_err = None;
    for _ in 0..SOCKET_ATTEMPTS {
        match UnixStream::connect(socket_path) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
        thread::sleep(RETRY_DELAY);
    }
    Err(anyhow!(
        "player did not open {}: {}",
        socket_path.display(),
        last_err.map(|err| err.to_string()).unwrap_or_default()
    ))
}
