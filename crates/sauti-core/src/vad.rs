//! RMS-gated voice activity detection with a silence-to-commit timer.
//!
//! The detector sees one 20 ms frame at a time and reports whether the
//! frame carried speech and whether the utterance should be committed.
//! Barge-in policy lives with the bridge session, which owns the outbound
//! buffer; here we only classify frames.

pub use crate::audio::FRAME_MS;

#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Normalized RMS gate in (0, 1).
    pub threshold: f32,
    /// Trailing silence that commits a pending utterance.
    pub commit_silence_ms: u32,
    /// Forced commit after this much continuous speech; 0 disables.
    pub max_utterance_ms: u32,
    /// Whether caller speech interrupts assistant playback.
    pub barge_in: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.012,
            commit_silence_ms: 900,
            max_utterance_ms: 0,
            barge_in: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitReason {
    Silence,
    MaxUtterance,
    Dtmf,
}

impl CommitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitReason::Silence => "silence",
            CommitReason::MaxUtterance => "max_utterance",
            CommitReason::Dtmf => "dtmf",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameVerdict {
    /// Frame RMS met the gate.
    pub speech: bool,
    pub commit: Option<CommitReason>,
}

#[derive(Debug)]
pub struct CommitDetector {
    cfg: VadConfig,
    pending_speech: bool,
    silence_ms: u32,
    speech_ms: u32,
    last_speech_at_ms: u64,
    clock_ms: u64,
}

impl CommitDetector {
    pub fn new(cfg: VadConfig) -> Self {
        Self {
            cfg,
            pending_speech: false,
            silence_ms: 0,
            speech_ms: 0,
            last_speech_at_ms: 0,
            clock_ms: 0,
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.cfg
    }

    /// Account one 20 ms frame by its normalized RMS.
    pub fn push_frame(&mut self, rms: f32) -> FrameVerdict {
        self.clock_ms += FRAME_MS as u64;

        if rms >= self.cfg.threshold {
            self.pending_speech = true;
            self.silence_ms = 0;
            self.speech_ms += FRAME_MS;
            self.last_speech_at_ms = self.clock_ms;

            if self.cfg.max_utterance_ms > 0 && self.speech_ms >= self.cfg.max_utterance_ms {
                self.speech_ms = 0;
                self.silence_ms = 0;
                return FrameVerdict {
                    speech: true,
                    commit: Some(CommitReason::MaxUtterance),
                };
            }
            FrameVerdict {
                speech: true,
                commit: None,
            }
        } else {
            self.silence_ms += FRAME_MS;
            self.speech_ms = 0;

            if self.pending_speech && self.silence_ms >= self.cfg.commit_silence_ms {
                self.pending_speech = false;
                return FrameVerdict {
                    speech: false,
                    commit: Some(CommitReason::Silence),
                };
            }
            FrameVerdict {
                speech: false,
                commit: None,
            }
        }
    }

    /// Reset all utterance accounting (DTMF commits and turn teardown).
    pub fn reset_after_commit(&mut self) {
        self.pending_speech = false;
        self.silence_ms = 0;
        self.speech_ms = 0;
    }

    pub fn pending_speech(&self) -> bool {
        self.pending_speech
    }

    pub fn silence_ms(&self) -> u32 {
        self.silence_ms
    }

    pub fn speech_ms(&self) -> u32 {
        self.speech_ms
    }

    pub fn last_speech_at_ms(&self) -> u64 {
        self.last_speech_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEECH: f32 = 0.1;
    const QUIET: f32 = 0.001;

    fn detector() -> CommitDetector {
        CommitDetector::new(VadConfig::default())
    }

    #[test]
    fn silence_alone_never_commits() {
        let mut d = detector();
        for _ in 0..200 {
            let v = d.push_frame(QUIET);
            assert!(v.commit.is_none());
            assert!(!v.speech);
        }
        assert!(!d.pending_speech());
    }

    #[test]
    fn commits_after_900ms_of_trailing_silence() {
        let mut d = detector();
        for _ in 0..10 {
            assert!(d.push_frame(SPEECH).commit.is_none());
        }
        assert!(d.pending_speech());

        // 44 silent frames = 880 ms: not yet.
        for _ in 0..44 {
            assert!(d.push_frame(QUIET).commit.is_none());
        }
        // Frame 45 crosses 900 ms.
        let v = d.push_frame(QUIET);
        assert_eq!(v.commit, Some(CommitReason::Silence));
        assert!(!d.pending_speech());

        // No duplicate commit from continued silence.
        for _ in 0..100 {
            assert!(d.push_frame(QUIET).commit.is_none());
        }
    }

    #[test]
    fn speech_resets_the_silence_timer() {
        let mut d = detector();
        d.push_frame(SPEECH);
        for _ in 0..40 {
            d.push_frame(QUIET);
        }
        // Speech again: timer restarts.
        d.push_frame(SPEECH);
        assert_eq!(d.silence_ms(), 0);
        for _ in 0..44 {
            assert!(d.push_frame(QUIET).commit.is_none());
        }
        assert_eq!(d.push_frame(QUIET).commit, Some(CommitReason::Silence));
    }

    #[test]
    fn max_utterance_forces_a_commit() {
        let mut d = CommitDetector::new(VadConfig {
            max_utterance_ms: 200,
            ..VadConfig::default()
        });
        for _ in 0..9 {
            assert!(d.push_frame(SPEECH).commit.is_none());
        }
        let v = d.push_frame(SPEECH);
        assert_eq!(v.commit, Some(CommitReason::MaxUtterance));
        assert_eq!(d.speech_ms(), 0);
        assert_eq!(d.silence_ms(), 0);
    }

    #[test]
    fn zero_max_utterance_disables_forced_commit() {
        let mut d = detector();
        for _ in 0..10_000 {
            assert!(d.push_frame(SPEECH).commit.is_none());
        }
    }

    #[test]
    fn reset_after_commit_clears_counters() {
        let mut d = detector();
        for _ in 0..25 {
            d.push_frame(SPEECH);
        }
        d.reset_after_commit();
        assert!(!d.pending_speech());
        assert_eq!(d.silence_ms(), 0);
        assert_eq!(d.speech_ms(), 0);

        // Pure silence after a DTMF-style reset never commits.
        for _ in 0..100 {
            assert!(d.push_frame(QUIET).commit.is_none());
        }
    }

    #[test]
    fn last_speech_timestamp_advances_with_the_clock() {
        let mut d = detector();
        d.push_frame(SPEECH);
        assert_eq!(d.last_speech_at_ms(), 20);
        d.push_frame(QUIET);
        d.push_frame(SPEECH);
        assert_eq!(d.last_speech_at_ms(), 60);
    }
}
