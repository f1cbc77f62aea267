//! Offline transcription through a whisper.cpp-style command-line binary.
//!
//! Invocation: `<command> -m <model> -f <file.wav> -l <lang> -nt`. The binary
//! prints the transcript (no timestamps) on stdout. It is killed when it runs
//! past the timeout.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::audio::AudioBuffer;
use crate::error::{DetectError, Result};
use crate::transcribe::{backend_language, encode_wav_pcm16, Transcriber};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct WhisperCommandTranscriber {
    command: PathBuf,
    model: Option<PathBuf>,
    temp_dir: PathBuf,
    timeout: Duration,
    name: String,
}

impl WhisperCommandTranscriber {
    pub fn new(
        command: PathBuf,
        model: Option<PathBuf>,
        temp_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        let name = command
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "whisper-cli".into());
        Self {
            command,
            model,
            temp_dir,
            timeout,
            name,
        }
    }

    fn fail(&self, message: impl Into<String>) -> DetectError {
        DetectError::Transcription {
            backend: self.name.clone(),
            message: message.into(),
        }
    }
}

impl Transcriber for WhisperCommandTranscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn transcribe(&self, audio: &AudioBuffer, language: &str) -> Result<String> {
        std::fs::create_dir_all(&self.temp_dir)?;

        let mut wav = tempfile::Builder::new()
            .prefix("vmdetect-stt-")
            .suffix(".wav")
            .tempfile_in(&self.temp_dir)?;
        wav.write_all(&encode_wav_pcm16(audio)?)?;
        wav.flush()?;

        let mut stdout = tempfile::tempfile_in(&self.temp_dir)?;

        let mut cmd = Command::new(&self.command);
        if let Some(model) = &self.model {
            cmd.arg("-m").arg(model);
        }
        cmd.arg("-f")
            .arg(wav.path())
            .arg("-l")
            .arg(backend_language(language))
            .arg("-nt")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::null());

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| self.fail(format!("spawn {}: {e}", self.command.display())))?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                warn!(backend = %self.name, "transcription command timed out; killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(DetectError::Timeout {
                    what: format!("transcription command '{}'", self.name),
                    secs: self.timeout.as_secs_f64(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(self.fail(format!("exited with {status}")));
        }

        let mut raw = String::new();
        stdout.seek(SeekFrom::Start(0))?;
        stdout.read_to_string(&mut raw)?;

        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        debug!(
            backend = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = text.len(),
            "command transcript received"
        );
        Ok(text)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    // Both scenarios share one test so no other thread forks while a script
    // is still open for writing.
    #[test]
    fn runs_command_and_enforces_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let echo = script(
            dir.path(),
            "echo-whisper",
            r#"[ "$5" = "-l" ] && [ "$6" = "pt" ] || exit 3
printf '  deixe seu recado\n após o sinal \n'"#,
        );
        let sleepy = script(dir.path(), "sleepy-whisper", "sleep 5");
        let audio = AudioBuffer::new(vec![0.0; 1_600], 16_000);

        let ok = WhisperCommandTranscriber::new(
            echo,
            Some(PathBuf::from("model.bin")),
            dir.path().to_path_buf(),
            Duration::from_secs(10),
        );
        assert_eq!(ok.name(), "echo-whisper");
        assert_eq!(
            ok.transcribe(&audio, "pt-BR").unwrap(),
            "deixe seu recado após o sinal"
        );

        let slow = WhisperCommandTranscriber::new(
            sleepy,
            None,
            dir.path().to_path_buf(),
            Duration::from_millis(200),
        );
        let started = Instant::now();
        assert!(matches!(
            slow.transcribe(&audio, "en-US"),
            Err(DetectError::Timeout { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_binary_is_a_transcription_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = WhisperCommandTranscriber::new(
            dir.path().join("does-not-exist"),
            None,
            dir.path().to_path_buf(),
            Duration::from_secs(1),
        );
        let audio = AudioBuffer::new(vec![0.0; 160], 16_000);
        assert!(matches!(
            t.transcribe(&audio, "en-US"),
            Err(DetectError::Transcription { .. })
        ));
    }
}
