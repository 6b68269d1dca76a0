//! Serialised spoken feedback.
//!
//! Utterances are played strictly one at a time in submission order. An
//! interrupting utterance cancels whatever is playing and discards every
//! utterance queued before it.

mod engine;

pub use engine::{ConsoleSpeech, CoquiSpeech, RecordingSpeech, SpeechEngine, SpeechLog};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::abort_guard::AbortGuard;

/// Playback rate used when the caller supplies none.
pub const DEFAULT_RATE: f32 = 0.8;

/// One piece of text with the voice parameters to speak it with.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
    pub volume: f32,
}

/// Caller supplied parameters for a single `speak` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakOptions {
    pub interrupt: bool,
    pub rate: f32,
    pub volume: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            interrupt: false,
            rate: DEFAULT_RATE,
            volume: 1.0,
        }
    }
}

impl SpeakOptions {
    pub fn interrupting(self) -> Self {
        Self {
            interrupt: true,
            ..self
        }
    }

    pub fn queued(self) -> Self {
        Self {
            interrupt: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    ImmediateInterrupt,
    Queued,
}

/// A scheduled utterance.
///
/// `epoch` is the scheduler's cancellation token at submission time; an
/// interrupt cancels it, which both stops the task if it is playing and
/// makes the worker skip it if it is still queued.
#[derive(Debug)]
pub struct NarrationTask {
    pub utterance: Utterance,
    pub priority: Priority,
    pub pause_before: Duration,
    epoch: CancellationToken,
}

struct Shared {
    engine: Arc<dyn SpeechEngine>,
    queue: Mutex<VecDeque<NarrationTask>>,
    epoch: Mutex<CancellationToken>,
    notify: Notify,
    pending: watch::Sender<usize>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn pop(&self) -> Option<NarrationTask> {
        lock(&self.queue).pop_front()
    }

    fn finish_one(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn play(&self, task: NarrationTask) {
        let token = task.epoch;
        if token.is_cancelled() {
            trace!(text = %task.utterance.text, "skipping superseded utterance");
            return;
        }
        if !task.pause_before.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(task.pause_before) => {}
                _ = token.cancelled() => return,
            }
        }
        debug!(text = %task.utterance.text, rate = task.utterance.rate, "speaking");
        tokio::select! {
            res = self.engine.speak(&task.utterance) => {
                if let Err(e) = res {
                    warn!(error = ?e, "speech engine failed");
                }
            }
            _ = token.cancelled() => debug!("utterance cancelled"),
        }
    }
}

async fn worker(shared: Arc<Shared>) {
    loop {
        let task = loop {
            if let Some(t) = shared.pop() {
                break t;
            }
            shared.notify.notified().await;
        };
        shared.play(task).await;
        shared.finish_one();
    }
}

/// FIFO narration queue driving a [`SpeechEngine`].
///
/// Must be created inside a Tokio runtime; the playback worker lives as
/// long as the scheduler.
pub struct NarrationScheduler {
    shared: Arc<Shared>,
    defaults: SpeakOptions,
    _worker: AbortGuard,
}

impl NarrationScheduler {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self::with_defaults(engine, SpeakOptions::default())
    }

    /// Create a scheduler whose `rate`/`volume` defaults come from settings.
    pub fn with_defaults(engine: Arc<dyn SpeechEngine>, defaults: SpeakOptions) -> Self {
        let (pending, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            engine,
            queue: Mutex::new(VecDeque::new()),
            epoch: Mutex::new(CancellationToken::new()),
            notify: Notify::new(),
            pending,
        });
        let worker = AbortGuard::spawn(worker(shared.clone()));
        Self {
            shared,
            defaults,
            _worker: worker,
        }
    }

    pub fn defaults(&self) -> SpeakOptions {
        self.defaults
    }

    /// Speak `text` with the default voice, optionally interrupting.
    pub fn speak(&self, text: impl Into<String>, interrupt: bool) {
        let opts = SpeakOptions {
            interrupt,
            ..self.defaults
        };
        self.speak_with(text, opts);
    }

    pub fn speak_with(&self, text: impl Into<String>, opts: SpeakOptions) {
        self.speak_after(text, opts, Duration::ZERO);
    }

    /// Queue `text` to start `pause` after the previous utterance ends.
    pub fn speak_after(&self, text: impl Into<String>, opts: SpeakOptions, pause: Duration) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        if opts.interrupt {
            self.cancel_all();
        }
        let epoch = lock(&self.shared.epoch).clone();
        let task = NarrationTask {
            utterance: Utterance {
                text,
                rate: opts.rate,
                volume: opts.volume,
            },
            priority: if opts.interrupt {
                Priority::ImmediateInterrupt
            } else {
                Priority::Queued
            },
            pause_before: pause,
            epoch,
        };
        trace!(text = %task.utterance.text, priority = ?task.priority, "queued utterance");
        {
            // counted before the worker can see it
            let mut queue = lock(&self.shared.queue);
            self.shared.pending.send_modify(|n| *n += 1);
            queue.push_back(task);
        }
        self.shared.notify.notify_one();
    }

    /// Cancel the current utterance and drop everything queued.
    pub fn stop(&self) {
        debug!("narration stopped");
        self.cancel_all();
    }

    fn cancel_all(&self) {
        {
            let mut epoch = lock(&self.shared.epoch);
            epoch.cancel();
            *epoch = CancellationToken::new();
        }
        let mut queue = lock(&self.shared.queue);
        let dropped = queue.len();
        queue.clear();
        self.shared
            .pending
            .send_modify(|n| *n = n.saturating_sub(dropped));
    }

    /// Number of utterances queued or playing.
    pub fn pending(&self) -> usize {
        *self.shared.pending.borrow()
    }

    /// Resolve once nothing is queued or playing.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(log: &SpeechLog) -> Vec<String> {
        log.utterances().into_iter().map(|u| u.text).collect()
    }

    #[tokio::test]
    async fn plays_in_submission_order() {
        let (engine, log) = RecordingSpeech::new();
        let narrator = NarrationScheduler::new(Arc::new(engine));
        narrator.speak("one", false);
        narrator.speak("two", false);
        narrator.speak("three", false);
        narrator.wait_idle().await;
        assert_eq!(texts(&log), ["one", "two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_drops_earlier_utterances() {
        let (engine, log) = RecordingSpeech::new();
        let engine = engine.with_duration(Duration::from_secs(2));
        let narrator = NarrationScheduler::new(Arc::new(engine));
        narrator.speak("long announcement", false);
        narrator.speak("stale", false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        narrator.speak("urgent", true);
        narrator.wait_idle().await;
        // the first utterance started, then was cut short; "stale" never played
        assert_eq!(texts(&log), ["long announcement", "urgent"]);
        assert_eq!(log.completed(), vec!["urgent".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_everything() {
        let (engine, log) = RecordingSpeech::new();
        let engine = engine.with_duration(Duration::from_secs(1));
        let narrator = NarrationScheduler::new(Arc::new(engine));
        narrator.speak("a", false);
        narrator.speak("b", false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        narrator.stop();
        narrator.wait_idle().await;
        assert_eq!(narrator.pending(), 0);
        assert_eq!(texts(&log), ["a"]);
        assert!(log.completed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_separates_items() {
        let (engine, log) = RecordingSpeech::new();
        let narrator = NarrationScheduler::new(Arc::new(engine));
        let start = tokio::time::Instant::now();
        narrator.speak("first", false);
        narrator.speak_after("second", SpeakOptions::default(), Duration::from_millis(500));
        narrator.wait_idle().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(texts(&log), ["first", "second"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_speakers_drain_to_idle() {
        for _ in 0..20 {
            let (engine, log) = RecordingSpeech::new();
            let narrator = Arc::new(NarrationScheduler::new(Arc::new(engine)));
            let speakers: Vec<_> = (0..4)
                .map(|t| {
                    let narrator = narrator.clone();
                    std::thread::spawn(move || {
                        for i in 0..200 {
                            narrator.speak(format!("{t}-{i}"), i % 50 == 49);
                        }
                    })
                })
                .collect();
            for speaker in speakers {
                speaker.join().unwrap();
            }
            tokio::time::timeout(Duration::from_secs(5), narrator.wait_idle())
                .await
                .expect("narration never went idle");
            assert_eq!(narrator.pending(), 0);
            assert!(!log.utterances().is_empty());
        }
    }

    #[tokio::test]
    async fn blank_text_is_ignored() {
        let (engine, log) = RecordingSpeech::new();
        let narrator = NarrationScheduler::new(Arc::new(engine));
        narrator.speak("   ", true);
        assert_eq!(narrator.pending(), 0);
        narrator.wait_idle().await;
        assert!(log.utterances().is_empty());
    }

    #[tokio::test]
    async fn defaults_apply_rate_and_volume() {
        let (engine, log) = RecordingSpeech::new();
        let defaults = SpeakOptions {
            interrupt: false,
            rate: 1.2,
            volume: 0.5,
        };
        let narrator = NarrationScheduler::with_defaults(Arc::new(engine), defaults);
        narrator.speak("hello", false);
        narrator.wait_idle().await;
        let spoken = log.utterances();
        assert_eq!(spoken[0].rate, 1.2);
        assert_eq!(spoken[0].volume, 0.5);
    }
}
