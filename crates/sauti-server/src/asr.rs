//! ASR subprocess driver.
//!
//! The engine is a whisper.cpp-style binary: primary invocation reads the
//! transcript from stdout; if that exits non-zero we retry once with the
//! text-output-file flags before giving up.

use std::path::Path;

use tracing::warn;

use sauti_core::error::{Error, Result};

use crate::config::ServerConfig;
use crate::process::{run_captured, Invocation};

pub async fn transcribe_wav(cfg: &ServerConfig, wav_path: &Path, work_dir: &Path) -> Result<String> {
    let bin = cfg
        .asr_bin
        .as_deref()
        .ok_or_else(|| Error::Config("asr binary not configured".into()))?;
    let model = cfg
        .asr_model
        .as_deref()
        .ok_or_else(|| Error::Config("asr model not configured".into()))?;

    let primary = run_captured(Invocation {
        name: "asr",
        bin,
        args: stdout_args(model, wav_path),
        stdin: None,
        timeout_secs: cfg.subprocess_timeout_secs,
    })
    .await;

    match primary {
        Ok(stdout) => Ok(String::from_utf8_lossy(&stdout).trim().to_string()),
        Err(first_err) => {
            warn!("asr primary invocation failed, retrying with text output: {first_err}");
            let out_base = work_dir.join("transcript");
            run_captured(Invocation {
                name: "asr-fallback",
                bin,
                args: text_file_args(model, wav_path, &out_base),
                stdin: None,
                timeout_secs: cfg.subprocess_timeout_secs,
            })
            .await?;

            let txt_path = out_base.with_extension("txt");
            let text = tokio::fs::read_to_string(&txt_path)
                .await
                .map_err(|e| Error::Subprocess(format!("asr fallback produced no transcript: {e}")))?;
            Ok(text.trim().to_string())
        }
    }
}

fn stdout_args(model: &Path, wav: &Path) -> Vec<String> {
    vec![
        "-m".to_string(),
        model.display().to_string(),
        "-f".to_string(),
        wav.display().to_string(),
        "--no-prints".to_string(),
        "--no-timestamps".to_string(),
    ]
}

fn text_file_args(model: &Path, wav: &Path, out_base: &Path) -> Vec<String> {
    vec![
        "-m".to_string(),
        model.display().to_string(),
        "-f".to_string(),
        wav.display().to_string(),
        "--no-prints".to_string(),
        "--output-txt".to_string(),
        "--output-file".to_string(),
        out_base.display().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cfg_with(bin: Option<PathBuf>, model: Option<PathBuf>) -> ServerConfig {
        ServerConfig {
            default_output_rate: 24000,
            asr_bin: bin,
            asr_model: model,
            tts_bin: None,
            tts_model: None,
            tts_config: None,
            tts_native_rate: 22050,
            resampler_bin: None,
            transcript_sink_url: None,
            max_pcm_bytes: 1024,
            subprocess_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn unconfigured_asr_is_a_config_error() {
        let cfg = cfg_with(None, None);
        let err = transcribe_wav(&cfg, Path::new("/tmp/x.wav"), Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invocations_carry_model_and_input() {
        let args = stdout_args(Path::new("/m/model.bin"), Path::new("/t/u.wav"));
        assert_eq!(args[0], "-m");
        assert_eq!(args[1], "/m/model.bin");
        assert!(args.contains(&"--no-timestamps".to_string()));

        let args = text_file_args(
            Path::new("/m/model.bin"),
            Path::new("/t/u.wav"),
            Path::new("/t/transcript"),
        );
        assert!(args.contains(&"--output-txt".to_string()));
        assert!(args.contains(&"/t/transcript".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fallback_reads_the_text_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("sauti-asr-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        // A fake engine that fails in stdout mode and writes the transcript
        // file when given --output-txt.
        let engine = dir.join("engine.sh");
        std::fs::write(
            &engine,
            b"#!/bin/sh\nfor a in \"$@\"; do\n  if [ \"$a\" = \"--output-txt\" ]; then\n    echo \"hello from fallback\" > \"$OUT.txt\"\n    exit 0\n  fi\ndone\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();

        // The stub reads $OUT for the output base path.
        let wrapper = dir.join("wrapper.sh");
        std::fs::write(
            &wrapper,
            format!(
                "#!/bin/sh\nOUT=\"{}/transcript\"\nexport OUT\nexec {} \"$@\"\n",
                dir.display(),
                engine.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755)).unwrap();

        let model = dir.join("model.bin");
        std::fs::write(&model, b"weights").unwrap();
        let wav = dir.join("u.wav");
        std::fs::write(&wav, b"RIFF").unwrap();

        let cfg = cfg_with(Some(wrapper), Some(model));
        let text = transcribe_wav(&cfg, &wav, &dir).await.unwrap();
        assert_eq!(text, "hello from fallback");

        let _ = std::fs::remove_dir_all(dir);
    }
}
