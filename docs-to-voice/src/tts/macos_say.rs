// macOS say command TTS backend

use super::{TtsBackend, TtsOptions, Voice};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, VoiceError};
use crate::process::{require_tool, run_tool};

/// Long documents can take a while to render
const SAY_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const AFCONVERT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const VOICE_LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// macOS TTS backend using the `say` command
pub struct MacOsSayBackend;

impl MacOsSayBackend {
    pub fn new() -> Self {
        Self
    }

    /// Parse voice list output from `say -v ?`
    fn parse_voice_list(output: &str) -> Vec<Voice> {
        output
            .lines()
            .filter_map(|line| {
                // Format: "Name    language  # description"
                let (name, rest) = match line.trim().split_once(char::is_whitespace) {
                    Some((name, rest)) => (name, rest),
                    None => (line.trim(), ""),
                };
                if name.is_empty() {
                    return None;
                }

                let language = rest
                    .split('#')
                    .next()
                    .map(str::trim)
                    .filter(|lang| !lang.is_empty())
                    .map(str::to_string);

                Some(Voice {
                    id: name.to_string(),
                    name: name.to_string(),
                    language,
                })
            })
            .collect()
    }

    fn say_args(output_path: &Path, options: &TtsOptions) -> Vec<String> {
        let mut args = vec!["-o".to_string(), output_path.display().to_string()];
        if let Some(voice) = options.voice.as_deref().filter(|v| !v.trim().is_empty()) {
            args.push("-v".to_string());
            args.push(voice.to_string());
        }
        if let Some(rate) = options.rate {
            args.push("-r".to_string());
            args.push(rate.to_string());
        }
        args
    }
}

impl Default for MacOsSayBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsBackend for MacOsSayBackend {
    async fn synthesize(&self, text: &str, output_path: &Path, options: &TtsOptions) -> Result<()> {
        let say = require_tool("say", "macOS 'say' command not found.")?;

        // For m4a, we need to generate AIFF first then convert
        let needs_conversion = output_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("m4a"));
        let actual_output = if needs_conversion {
            output_path.with_extension("aiff")
        } else {
            output_path.to_path_buf()
        };

        // Text goes through stdin to avoid argument escaping issues
        let args = Self::say_args(&actual_output, options);
        run_tool("say", say.as_os_str(), &args, Some(text.as_bytes()), SAY_TIMEOUT).await?;

        if needs_conversion {
            let afconvert = require_tool("afconvert", "macOS 'afconvert' command not found.")?;
            let args: [&OsStr; 8] = [
                OsStr::new("-f"),
                OsStr::new("m4af"), // M4A format
                OsStr::new("-d"),
                OsStr::new("aac"), // AAC codec
                OsStr::new("-b"),
                OsStr::new("128000"), // 128kbps bitrate
                actual_output.as_os_str(),
                output_path.as_os_str(),
            ];
            let result =
                run_tool("afconvert", afconvert.as_os_str(), args, None, AFCONVERT_TIMEOUT).await;
            let _ = std::fs::remove_file(&actual_output);
            result?;
        }

        if !output_path.is_file() {
            return Err(VoiceError::ToolFailed {
                tool: "say",
                detail: format!("no audio written to {}", output_path.display()),
            });
        }
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>> {
        let say = require_tool("say", "macOS 'say' command not found.")?;
        let output =
            run_tool("say", say.as_os_str(), ["-v", "?"], None, VOICE_LIST_TIMEOUT).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Self::parse_voice_list(&stdout))
    }

    fn name(&self) -> &str {
        "macos-say"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_voice_list() {
        let output = r#"Alex                en_US    # Most people recognize me by my voice.
Daniel              en_GB    # Hello, my name is Daniel. I am a British-English voice.
Mei-Jia             zh_TW    # 您好，我叫美佳。
"#;
        let voices = MacOsSayBackend::parse_voice_list(output);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[0].name, "Alex");
        assert_eq!(voices[0].language, Some("en_US".to_string()));
        assert_eq!(voices[2].id, "Mei-Jia");
        assert_eq!(voices[2].language, Some("zh_TW".to_string()));
    }

    #[tokio::test]
    async fn test_list_voices_runs_say() {
        let backend = MacOsSayBackend::new();
        match crate::process::find_tool("say") {
            Some(_) => assert!(!backend.list_voices().await.unwrap().is_empty()),
            None => {
                let err = backend.list_voices().await.unwrap_err();
                assert!(matches!(err, VoiceError::MissingTool { tool: "say", .. }));
            }
        }
    }

    #[test]
    fn test_say_args() {
        let options = TtsOptions {
            rate: Some(180),
            voice: Some("Mei-Jia".to_string()),
        };
        let args = MacOsSayBackend::say_args(&PathBuf::from("/tmp/part.aiff"), &options);
        assert_eq!(args, vec!["-o", "/tmp/part.aiff", "-v", "Mei-Jia", "-r", "180"]);
    }

    #[test]
    fn test_say_args_skip_blank_voice() {
        let options = TtsOptions {
            rate: None,
            voice: Some("  ".to_string()),
        };
        let args = MacOsSayBackend::say_args(&PathBuf::from("/tmp/out.aiff"), &options);
        assert_eq!(args, vec!["-o", "/tmp/out.aiff"]);
    }
}
